// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Model call errors

use repograph_core::resilience::{Classify, ErrorCategory};
use std::time::Duration;
use thiserror::Error;

pub type LlmResult<T> = Result<T, LlmError>;

/// Errors from completion and embedding calls.
///
/// `RateLimited` is backpressure, not a failure: it is retried and never
/// counted against the target's breaker. `CircuitOpen` means no network
/// attempt was made; callers should move on to the next target.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Circuit open for {target}, retry after {retry_after:?}")]
    CircuitOpen { target: String, retry_after: Duration },

    #[error("All models failed: {}", attempted.join(", "))]
    AllModelsFailed { attempted: Vec<String> },

    #[error("No embedding provider configured")]
    EmbeddingUnavailable,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::RateLimited)
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, LlmError::CircuitOpen { .. })
    }
}

impl Classify for LlmError {
    fn category(&self) -> ErrorCategory {
        match self {
            LlmError::RateLimited => ErrorCategory::Transient,
            LlmError::Api { status, .. } => ErrorCategory::from_status(*status),
            LlmError::Timeout(_) => ErrorCategory::Timeout,
            LlmError::Http(e) if e.is_timeout() => ErrorCategory::Timeout,
            LlmError::Http(e) if e.is_connect() => ErrorCategory::Transient,
            LlmError::Http(e) => e
                .status()
                .map(|s| ErrorCategory::from_status(s.as_u16()))
                .unwrap_or(ErrorCategory::Unknown),
            LlmError::InvalidResponse(_) | LlmError::Json(_) => ErrorCategory::Unknown,
            LlmError::CircuitOpen { .. } => ErrorCategory::Transient,
            LlmError::AllModelsFailed { .. } | LlmError::EmbeddingUnavailable => {
                ErrorCategory::Unknown
            }
        }
    }
}
