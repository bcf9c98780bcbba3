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

//! Progress events.
//!
//! The sink is the pipeline's only outward coupling while a run is in
//! flight. [`Progress`] wraps it so a slow or panicking sink can never
//! stall or fail the run.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: String,
    pub label: String,
    pub status: StageStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

impl StageEvent {
    pub fn new(stage: &str, status: StageStatus, message: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            label: stage_label(stage).to_string(),
            status,
            message: message.into(),
            duration_ms: None,
            completed: None,
            total: None,
            percent: None,
        }
    }

    pub fn running(stage: &str, message: impl Into<String>) -> Self {
        Self::new(stage, StageStatus::Running, message)
    }

    pub fn finished(stage: &str, ok: bool, duration: Duration, message: impl Into<String>) -> Self {
        let status = if ok { StageStatus::Done } else { StageStatus::Error };
        let mut event = Self::new(stage, status, message);
        event.duration_ms = Some(duration.as_millis() as u64);
        event
    }

    /// Running event carrying `completed / total` counts
    pub fn counted(stage: &str, completed: usize, total: usize, message: impl Into<String>) -> Self {
        let mut event = Self::running(stage, message);
        event.completed = Some(completed);
        event.total = Some(total);
        event.percent = (total > 0).then(|| {
            let pct = completed as f64 / total as f64 * 100.0;
            (pct * 10.0).round() / 10.0
        });
        event
    }
}

/// User-facing label for a stage name
pub fn stage_label(stage: &str) -> &str {
    match stage {
        "ingestion" => "Scanning codebase",
        "static" => "Parsing code structure",
        "model" => "AI analysis",
        "dual_analysis" => "Analyzing code",
        "reconciliation" => "Building Intelligence Model",
        "section_generation" => "Generating documentation",
        "citation_verification" => "Verifying citations",
        "persistence" => "Saving results",
        s if s.starts_with("generate_") => "Generating documentation",
        other => other,
    }
}

/// Receives pipeline events. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: StageEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(StageEvent) + Send + Sync,
{
    fn emit(&self, event: StageEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded channel
pub struct ChannelProgressSink {
    tx: mpsc::UnboundedSender<StageEvent>,
}

impl ChannelProgressSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: StageEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

/// Writes every event to the log
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn emit(&self, event: StageEvent) {
        match event.status {
            StageStatus::Error => tracing::warn!(
                stage = %event.stage,
                duration_ms = event.duration_ms,
                "{}: {}",
                event.label,
                event.message
            ),
            _ => tracing::info!(
                stage = %event.stage,
                status = ?event.status,
                percent = event.percent,
                "{}: {}",
                event.label,
                event.message
            ),
        }
    }
}

/// Non-throwing handle around an optional sink
#[derive(Clone, Default)]
pub struct Progress {
    sink: Option<Arc<dyn ProgressSink>>,
}

impl Progress {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: StageEvent) {
        let Some(sink) = &self.sink else {
            return;
        };
        let stage = event.stage.clone();
        if catch_unwind(AssertUnwindSafe(|| sink.emit(event))).is_err() {
            tracing::warn!(stage = %stage, "Progress sink panicked; event dropped");
        }
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(stage_label("model"), "AI analysis");
        assert_eq!(stage_label("generate_features"), "Generating documentation");
        assert_eq!(stage_label("custom"), "custom");
    }

    #[test]
    fn test_counted_percent() {
        let event = StageEvent::counted("model", 1, 3, "Analyzed 1/3 code chunks");
        assert_eq!(event.percent, Some(33.3));
        assert_eq!(StageEvent::counted("x", 0, 0, "").percent, None);
    }

    #[tokio::test]
    async fn test_channel_sink_receives_events() {
        let (sink, mut rx) = ChannelProgressSink::new();
        let progress = Progress::new(Arc::new(sink));
        progress.emit(StageEvent::running("reconciliation", "Cross-validating findings..."));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.label, "Building Intelligence Model");
        assert_eq!(event.status, StageStatus::Running);
    }

    #[test]
    fn test_panicking_sink_is_contained() {
        let progress = Progress::new(Arc::new(|_event: StageEvent| {
            panic!("sink exploded");
        }));
        progress.emit(StageEvent::running("persistence", ""));
        Progress::disabled().emit(StageEvent::running("persistence", ""));
    }
}
