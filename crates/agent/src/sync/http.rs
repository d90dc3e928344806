// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Default sync strategy over the request/response HTTP API.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::api::CloudApi;
use crate::error::SyncError;
use crate::sync::SyncWorker;

pub struct HttpSyncWorker {
    api: Arc<CloudApi>,
}

impl HttpSyncWorker {
    pub fn new(api: Arc<CloudApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SyncWorker for HttpSyncWorker {
    async fn sync_pathpoints(&self, batch: &Json) -> Result<(), SyncError> {
        self.api
            .post("/v1/device/pathpoints", batch)
            .await
            .map(|_| ())
            .map_err(|e| SyncError::from(&e))
    }

    async fn sync_logs(&self, batch: &Json) -> Result<(), SyncError> {
        self.api
            .put("/v1/device/device_logs", batch)
            .await
            .map(|_| ())
            .map_err(|e| SyncError::from(&e))
    }

    fn has_async_orders(&self) -> bool {
        false
    }
}
