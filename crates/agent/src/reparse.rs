// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Derived-pathpoint name parsing.
//!
//! A derived name like `rf{W1}+2` embeds an expression over other
//! pathpoints: each `{path}` reference is replaced by `v0`, `v1`, … in
//! order of appearance. Evaluation itself is pluggable — the agent only
//! requires the contract "expression + ordered constituent values in,
//! value or error out".

use crate::error::{FailureKind, OperationFailure};
use crate::value::PathpointValue;

/// Parse the expression part of a derived pathpoint name (everything
/// after the `r` marker and the type letter).
///
/// Returns the expression with references substituted by `v0..vN` and
/// the referenced pathpoint names in order of appearance. Nested braces
/// inside a reference are kept as part of the name.
pub fn parse(invocation: &str) -> Result<(String, Vec<String>), ReparseError> {
    if invocation.is_empty() {
        return Err(ReparseError::Empty);
    }
    let mut paths = Vec::new();
    let mut expression = String::new();
    let mut current = String::new();
    let mut nesting = 0usize;

    for ch in invocation.chars() {
        match ch {
            '{' => {
                if nesting > 0 {
                    current.push(ch);
                }
                nesting += 1;
            }
            '}' => {
                match nesting {
                    0 => return Err(ReparseError::UnbalancedBraces),
                    1 => {
                        expression.push_str(&format!("v{}", paths.len()));
                        paths.push(std::mem::take(&mut current));
                    }
                    _ => current.push(ch),
                }
                nesting -= 1;
            }
            _ if nesting > 0 => current.push(ch),
            _ => expression.push(ch),
        }
    }
    if nesting != 0 {
        return Err(ReparseError::UnbalancedBraces);
    }
    Ok((expression, paths))
}

/// Failure to parse a derived pathpoint name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReparseError {
    Empty,
    UnbalancedBraces,
}

impl std::fmt::Display for ReparseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("derived path is empty"),
            Self::UnbalancedBraces => f.write_str("derived path has unbalanced braces"),
        }
    }
}

impl std::error::Error for ReparseError {}

/// Evaluator contract for derived pathpoints: combine the constituents'
/// latest values through the parsed expression.
pub trait ReparseEvaluator: Send + Sync {
    fn eval(
        &self,
        expr: &str,
        values: &[PathpointValue],
    ) -> Result<PathpointValue, OperationFailure>;
}

/// Minimal shipped evaluator handling bare substitutions (`v0`, `v1`, …).
/// Arithmetic expressions need an embedder-supplied evaluator; anything
/// this one does not understand resolves to an `Invalid` failure.
pub struct SubstitutionEvaluator;

impl ReparseEvaluator for SubstitutionEvaluator {
    fn eval(
        &self,
        expr: &str,
        values: &[PathpointValue],
    ) -> Result<PathpointValue, OperationFailure> {
        let index: Option<usize> = expr.strip_prefix('v').and_then(|rest| rest.parse().ok());
        match index.and_then(|i| values.get(i)) {
            Some(value) => Ok(value.clone()),
            None => Err(OperationFailure::new(FailureKind::Invalid)),
        }
    }
}

#[cfg(test)]
#[path = "reparse_tests.rs"]
mod tests;
