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

//! Per-target circuit breaker.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive counted failures before opening
    pub failure_threshold: u32,
    /// Successful trial calls needed to close from half-open
    pub success_threshold: u32,
    pub open_duration: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            open_duration: Duration::from_secs(30),
        }
    }
}

impl From<crate::config::BreakerSettings> for CircuitConfig {
    fn from(settings: crate::config::BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            success_threshold: 1,
            open_duration: settings.recovery(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

/// How a finished call should be booked against the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Neither resets nor advances the failure count
    Ignored,
}

pub struct CircuitBreaker {
    target: String,
    state: Mutex<CircuitState>,
    config: CircuitConfig,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            target: target.into(),
            state: Mutex::new(CircuitState::Closed),
            config,
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run `operation`, counting every error as a failure.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        self.call_classified(operation, |_| Outcome::Failure).await
    }

    /// Run `operation`, letting `classify` decide whether an error counts.
    pub async fn call_classified<F, Fut, T, E, C>(
        &self,
        operation: F,
        classify: C,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::error::Error,
        C: FnOnce(&E) -> Outcome,
    {
        if let CircuitState::Open { until } = self.check_state() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(CircuitError::Open {
                target: self.target.clone(),
                retry_after: until.saturating_duration_since(Instant::now()),
            });
        }

        let result = operation().await;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) => classify(e),
        };
        match outcome {
            Outcome::Success => self.record_success(),
            Outcome::Failure => self.record_failure(),
            Outcome::Ignored => {}
        }

        result.map_err(CircuitError::Inner)
    }

    /// Current state, moving Open to HalfOpen once the window has passed
    pub fn check_state(&self) -> CircuitState {
        let mut state = self.state.lock();
        if let CircuitState::Open { until } = *state {
            if Instant::now() >= until {
                *state = CircuitState::HalfOpen;
                self.success_count.store(0, Ordering::SeqCst);
                tracing::info!(target_id = %self.target, "Circuit half-open, allowing trial call");
            }
        }
        *state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.check_state(), CircuitState::Open { .. })
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = CircuitState::Closed;
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    *state = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::SeqCst);
                    tracing::info!(target_id = %self.target, "Circuit closed");
                }
            }
            CircuitState::Open { .. } => {}
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    let until = Instant::now() + self.config.open_duration;
                    *state = CircuitState::Open { until };
                    tracing::warn!(
                        target_id = %self.target,
                        failures,
                        open_secs = self.config.open_duration.as_secs(),
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                let until = Instant::now() + self.config.open_duration;
                *state = CircuitState::Open { until };
                tracing::warn!(target_id = %self.target, "Trial call failed, circuit re-opened");
            }
            CircuitState::Open { .. } => {}
        }
    }
}

#[derive(Debug, Error)]
pub enum CircuitError<E: std::error::Error> {
    #[error("Circuit open for {target}, retry after {retry_after:?}")]
    Open { target: String, retry_after: Duration },
    #[error(transparent)]
    Inner(E),
}

impl<E: std::error::Error> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Inner(e) => Some(e),
            CircuitError::Open { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("boom")]
        Boom,
        #[error("slow down")]
        Throttled,
    }

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test/model",
            CircuitConfig {
                failure_threshold: threshold,
                success_threshold: 1,
                open_duration: Duration::from_secs(30),
            },
        )
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_skips_operation() {
        let cb = breaker(3);
        for _ in 0..3 {
            let r: Result<(), _> = cb.call(|| async { Err(TestError::Boom) }).await;
            assert!(matches!(r, Err(CircuitError::Inner(TestError::Boom))));
        }

        let invoked = AtomicUsize::new(0);
        let r: Result<(), CircuitError<TestError>> = cb
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(r.unwrap_err().is_open());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(cb.rejected_count(), 1);
    }

    #[tokio::test]
    async fn test_ignored_errors_never_count() {
        let cb = breaker(2);
        for _ in 0..10 {
            let _: Result<(), _> = cb
                .call_classified(
                    || async { Err(TestError::Throttled) },
                    |e| match e {
                        TestError::Throttled => Outcome::Ignored,
                        TestError::Boom => Outcome::Failure,
                    },
                )
                .await;
        }
        assert_eq!(cb.failure_count(), 0);
        assert!(!cb.is_open());
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3);
        for _ in 0..2 {
            let _: Result<(), _> = cb.call(|| async { Err(TestError::Boom) }).await;
        }
        let _: Result<(), CircuitError<TestError>> = cb.call(|| async { Ok(()) }).await;
        let _: Result<(), _> = cb.call(|| async { Err(TestError::Boom) }).await;
        assert_eq!(cb.failure_count(), 1);
        assert!(!cb.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_recovery_window() {
        let cb = breaker(1);
        let _: Result<(), _> = cb.call(|| async { Err(TestError::Boom) }).await;
        assert!(cb.is_open());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cb.check_state(), CircuitState::HalfOpen);

        let r: Result<u8, CircuitError<TestError>> = cb.call(|| async { Ok(7) }).await;
        assert_eq!(r.unwrap(), 7);
        assert_eq!(cb.check_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let cb = breaker(1);
        let _: Result<(), _> = cb.call(|| async { Err(TestError::Boom) }).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        let _: Result<(), _> = cb.call(|| async { Err(TestError::Boom) }).await;
        assert!(cb.is_open());
    }

    #[tokio::test]
    async fn test_reset_closes() {
        let cb = breaker(1);
        let _: Result<(), _> = cb.call(|| async { Err(TestError::Boom) }).await;
        assert!(cb.is_open());
        cb.reset();
        assert!(!cb.is_open());
    }
}
