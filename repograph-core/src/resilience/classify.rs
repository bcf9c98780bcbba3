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

//! Error classification for retry and logging decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Rate limits and dropped connections
    Transient,
    /// 5xx responses
    Server,
    Timeout,
    /// 4xx other than 429; retrying will not help
    Client,
    Unknown,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Transient | ErrorCategory::Server | ErrorCategory::Timeout
        )
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            429 => ErrorCategory::Transient,
            408 => ErrorCategory::Timeout,
            400..=499 => ErrorCategory::Client,
            500..=599 => ErrorCategory::Server,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Best-effort classification of an untyped message
    pub fn from_message(message: &str) -> Self {
        let msg = message.to_ascii_lowercase();
        if msg.contains("timeout") || msg.contains("timed out") {
            ErrorCategory::Timeout
        } else if msg.contains("429") || msg.contains("rate limit") || msg.contains("rate_limit") {
            ErrorCategory::Transient
        } else if ["500", "502", "503", "504"].iter().any(|c| msg.contains(c)) {
            ErrorCategory::Server
        } else if msg.contains("connection") || msg.contains("econnrefused") {
            ErrorCategory::Transient
        } else if ["400", "401", "403", "404"].iter().any(|c| msg.contains(c)) {
            ErrorCategory::Client
        } else {
            ErrorCategory::Unknown
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Server => "server",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Client => "client",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Errors that know their own category
pub trait Classify {
    fn category(&self) -> ErrorCategory;

    fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ErrorCategory::from_status(429), ErrorCategory::Transient);
        assert_eq!(ErrorCategory::from_status(401), ErrorCategory::Client);
        assert_eq!(ErrorCategory::from_status(503), ErrorCategory::Server);
        assert!(!ErrorCategory::from_status(404).is_retryable());
        assert!(ErrorCategory::from_status(502).is_retryable());
    }

    #[test]
    fn test_message_classification() {
        assert_eq!(
            ErrorCategory::from_message("request timed out after 60s"),
            ErrorCategory::Timeout
        );
        assert_eq!(
            ErrorCategory::from_message("Rate limit reached for gpt-4.1-mini"),
            ErrorCategory::Transient
        );
        assert_eq!(ErrorCategory::from_message("bad gateway 502"), ErrorCategory::Server);
        assert_eq!(ErrorCategory::from_message("who knows"), ErrorCategory::Unknown);
    }
}
