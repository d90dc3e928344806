// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the cloud's request/response API.
//!
//! Production authenticates with the device certificate (mTLS); other
//! environments forward the PEM in a header because TLS terminates
//! upstream. Transport failures surface as the synthetic 599 status.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value as Json;

use crate::device::Environment;
use crate::error::ResponseError;

/// Header carrying the client certificate outside production.
const FORWARDED_CERT_HEADER: &str = "X-SSL-Client-Certificate";
/// Header carrying a blob's version on download and upload.
pub const BLOB_VERSION_HEADER: &str = "X-BLOB-Version";

/// Client for the `/v1/device` API family.
pub struct CloudApi {
    client: Client,
    base_url: String,
    forwarded_cert: Option<String>,
}

impl CloudApi {
    /// Build a client for `environment` using the device credentials.
    pub fn for_environment(
        environment: Environment,
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<Self, ResponseError> {
        Self::new(environment, environment.api_base_url().to_owned(), cert_pem, key_pem)
    }

    /// Like [`Self::for_environment`] with an explicit base URL (tests,
    /// non-standard deployments).
    pub fn new(
        environment: Environment,
        base_url: String,
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<Self, ResponseError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(30)).use_rustls_tls();
        let forwarded_cert = if environment.uses_forwarded_cert() {
            Some(String::from_utf8_lossy(cert_pem).replace('\n', "\t"))
        } else {
            let mut identity_pem = cert_pem.to_vec();
            identity_pem.push(b'\n');
            identity_pem.extend_from_slice(key_pem);
            let identity = reqwest::Identity::from_pem(&identity_pem)
                .map_err(|e| ResponseError::new(0, format!("bad client identity: {e}")))?;
            builder = builder.identity(identity);
            None
        };
        let client = builder
            .build()
            .map_err(|e| ResponseError::new(0, format!("http client: {e}")))?;
        Ok(Self { client, base_url, forwarded_cert })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn prepare(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(cert) = &self.forwarded_cert {
            req = req.header(FORWARDED_CERT_HEADER, cert);
        }
        req
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Json>,
    ) -> Result<Json, ResponseError> {
        let mut req = self.prepare(method, path);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| ResponseError::no_link(e.to_string()))?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| ResponseError::no_link(e.to_string()))?;
        if !matches!(status, StatusCode::OK | StatusCode::CREATED) {
            return Err(ResponseError::new(status.as_u16(), extract_status(&bytes)));
        }
        if bytes.is_empty() {
            return Ok(Json::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|_| ResponseError::new(status.as_u16(), "undecodable response body"))
    }

    pub async fn get(&self, path: &str) -> Result<Json, ResponseError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Json) -> Result<Json, ResponseError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn post_empty(&self, path: &str) -> Result<Json, ResponseError> {
        self.request(Method::POST, path, None).await
    }

    pub async fn put(&self, path: &str, body: &Json) -> Result<Json, ResponseError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: &Json) -> Result<Json, ResponseError> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Json, ResponseError> {
        self.request(Method::DELETE, path, None).await
    }

    /// GET returning the raw body and headers (blob download).
    pub async fn get_raw(&self, path: &str) -> Result<(Vec<u8>, HeaderMap), ResponseError> {
        let resp = self
            .prepare(Method::GET, path)
            .send()
            .await
            .map_err(|e| ResponseError::no_link(e.to_string()))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.bytes().await.map_err(|e| ResponseError::no_link(e.to_string()))?;
        if !matches!(status, StatusCode::OK | StatusCode::CREATED) {
            return Err(ResponseError::new(status.as_u16(), extract_status(&bytes)));
        }
        Ok((bytes.to_vec(), headers))
    }

    /// PUT with a raw body and a version header (blob upload).
    pub async fn put_bytes(
        &self,
        path: &str,
        bytes: Vec<u8>,
        version: i64,
    ) -> Result<(), ResponseError> {
        let resp = self
            .prepare(Method::PUT, path)
            .header(BLOB_VERSION_HEADER, version)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ResponseError::no_link(e.to_string()))?;
        let status = resp.status();
        if !matches!(status, StatusCode::OK | StatusCode::CREATED) {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(ResponseError::new(status.as_u16(), extract_status(&body)));
        }
        Ok(())
    }
}

/// Pull a human-readable status out of an error body.
fn extract_status(bytes: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Json>(bytes) {
        if let Some(status) = value.get("status").and_then(Json::as_str) {
            return status.to_owned();
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
