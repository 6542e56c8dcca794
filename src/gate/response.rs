//! Response headers and 429 bodies.

use std::time::Duration;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ratelimit::{Decision, Scope};

pub(crate) const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub(crate) const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub(crate) const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Why a request was short-circuited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The scope is serving a block
    Blocked,
    /// The per-second burst bucket is exhausted
    BurstExceeded,
    /// A minute or hour window is exhausted
    LimitExceeded,
}

impl RejectReason {
    pub fn error_code(&self) -> &'static str {
        match self {
            RejectReason::Blocked => "temporarily_blocked",
            RejectReason::BurstExceeded | RejectReason::LimitExceeded => "rate_limit_exceeded",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::Blocked => "temporarily blocked due to rate limit violations",
            RejectReason::BurstExceeded | RejectReason::LimitExceeded => "rate limit exceeded",
        }
    }
}

/// A denied request, ready to be rendered as a 429.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub reason: RejectReason,
    pub scope: Scope,
    /// Per-minute limit of the resolved policy
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
    pub retry_after: Duration,
    /// Denials recorded toward the next block, reported on window denials only
    pub violations: Option<u32>,
    /// When the decision was made
    pub at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct RejectionBody<'a> {
    error: &'static str,
    message: &'static str,
    path: &'a str,
    timestamp: String,
    retry_after_seconds: u64,
    limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    violation_count: Option<u32>,
}

impl Rejection {
    /// Render as a 429 with rate limit headers and a JSON body.
    pub fn into_response_for(self, path: &str) -> Response {
        let body = RejectionBody {
            error: self.reason.error_code(),
            message: self.reason.message(),
            path,
            timestamp: self.at.to_rfc3339(),
            retry_after_seconds: self.retry_after.as_secs(),
            limit: self.limit,
            violation_count: self.violations,
        };

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        insert_rate_limit_headers(headers, self.limit, 0, self.reset_at);
        headers.insert(header::RETRY_AFTER, HeaderValue::from(self.retry_after.as_secs()));
        response
    }
}

/// Set the rate limit headers for an admitted request.
pub(crate) fn apply_decision_headers(headers: &mut HeaderMap, decision: &Decision) {
    insert_rate_limit_headers(headers, decision.limit, decision.remaining, decision.reset_at);
}

fn insert_rate_limit_headers(
    headers: &mut HeaderMap,
    limit: u64,
    remaining: u64,
    reset_at: DateTime<Utc>,
) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(reset_at.timestamp()));
}
