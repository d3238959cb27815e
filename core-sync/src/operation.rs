//! Queued write operations

use bridge_traits::{HttpMethod, HttpRequest};
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use core_runtime::events::AbandonedOperation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Largest backoff exponent; keeps the delay computation from overflowing.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Type-safe sync operation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncOperationId(Uuid);

impl SyncOperationId {
    /// Create a new random operation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an operation ID from a string
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidOperationId(e.to_string()))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncOperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncOperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A write the caller wants delivered, online or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
}

impl SyncRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| SyncError::InvalidRecord(format!("JSON serialization failed: {}", e)))?;
        self.body = Some(Bytes::from(body));
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }
}

impl From<HttpRequest> for SyncRequest {
    fn from(request: HttpRequest) -> Self {
        Self {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body: request.body,
        }
    }
}

/// A persisted write awaiting delivery.
///
/// Only `retry_count` ever changes after registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOperation {
    pub id: SyncOperationId,
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    /// Registration time; drain order
    pub timestamp: DateTime<Utc>,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Failed attempts after which the operation is abandoned
    pub max_retries: u32,
}

impl SyncOperation {
    /// New operation registered at `now`. The timestamp keeps millisecond
    /// precision, the resolution it is persisted with.
    pub fn new(request: SyncRequest, now: DateTime<Utc>, max_retries: u32) -> Self {
        Self {
            id: SyncOperationId::new(),
            method: request.method,
            url: request.url,
            headers: request.headers,
            body: request.body,
            timestamp: now.trunc_subsecs(3),
            retry_count: 0,
            max_retries,
        }
    }

    pub fn to_http_request(&self) -> HttpRequest {
        let request = HttpRequest::new(self.method, self.url.clone()).headers(self.headers.clone());
        match &self.body {
            Some(body) => request.body(body.clone()),
            None => request,
        }
    }

    /// Count a failed attempt.
    pub fn record_failure(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Whether the retry budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Delay before the next attempt: `2^(retry_count - 1) × base`.
    pub fn backoff_delay(&self, base: Duration) -> Duration {
        backoff_delay(self.retry_count, base)
    }

    /// Snapshot handed to subscribers when the operation is given up on.
    pub fn to_abandoned(&self) -> AbandonedOperation {
        AbandonedOperation {
            id: self.id.to_string(),
            method: self.method.as_str().to_string(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.as_ref().map(|body| body.to_vec()),
            timestamp: self.timestamp,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
        }
    }
}

/// Exponential backoff after `retry_count` failed attempts.
pub fn backoff_delay(retry_count: u32, base: Duration) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    base.saturating_mul(1u32 << exponent)
}
