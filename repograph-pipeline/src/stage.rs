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

//! Stages and parallel groups.
//!
//! A stage always yields a [`StageResult`]: errors and panics inside the
//! stage body are caught, timed and recorded as `Failed`. A
//! [`ParallelGroup`] runs stages concurrently over one shared input and
//! returns their results in declaration order.

use crate::error::PipelineResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct StageResult<O> {
    pub stage_name: String,
    pub output: Option<O>,
    pub duration: Duration,
    pub outcome: StageOutcome,
    pub error: Option<String>,
}

impl<O> StageResult<O> {
    pub fn completed(stage_name: impl Into<String>, output: O, duration: Duration) -> Self {
        Self {
            stage_name: stage_name.into(),
            output: Some(output),
            duration,
            outcome: StageOutcome::Completed,
            error: None,
        }
    }

    pub fn failed(stage_name: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            stage_name: stage_name.into(),
            output: None,
            duration,
            outcome: StageOutcome::Failed,
            error: Some(error.into()),
        }
    }

    pub fn skipped(stage_name: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            output: None,
            duration: Duration::ZERO,
            outcome: StageOutcome::Skipped,
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == StageOutcome::Completed
    }

    /// Name, outcome, timing and error, without the output
    pub fn status(&self) -> StageStatusRecord {
        StageStatusRecord {
            name: self.stage_name.clone(),
            outcome: self.outcome,
            duration_ms: self.duration.as_millis() as u64,
            error: self.error.clone(),
        }
    }
}

/// Output-free stage summary kept on the run result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatusRecord {
    pub name: String,
    pub outcome: StageOutcome,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageStatusRecord {
    pub fn ok(&self) -> bool {
        self.outcome == StageOutcome::Completed
    }
}

/// A named async single-input, single-output operation
#[async_trait]
pub trait Stage<I, O>: Send + Sync
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str;

    async fn run(&self, input: Arc<I>) -> PipelineResult<O>;
}

type StageFn<I, O> = dyn Fn(Arc<I>) -> BoxFuture<'static, PipelineResult<O>> + Send + Sync;

/// Stage built from a closure
pub struct FnStage<I, O> {
    name: String,
    body: Box<StageFn<I, O>>,
}

impl<I, O> FnStage<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Arc<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<O>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(move |input| Box::pin(body(input))),
        }
    }

    pub fn arc(self) -> Arc<dyn Stage<I, O>> {
        Arc::new(self)
    }
}

#[async_trait]
impl<I, O> Stage<I, O> for FnStage<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: Arc<I>) -> PipelineResult<O> {
        (self.body)(input).await
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "stage panicked".to_string()
    }
}

/// Run one stage on its own task, converting errors and panics to `Failed`
pub async fn run_stage<I, O>(stage: Arc<dyn Stage<I, O>>, input: Arc<I>) -> StageResult<O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    let name = stage.name().to_string();
    let start = Instant::now();
    let handle = tokio::spawn(async move { stage.run(input).await });

    match handle.await {
        Ok(Ok(output)) => StageResult::completed(name, output, start.elapsed()),
        Ok(Err(e)) => {
            tracing::warn!(stage = %name, error = %e, "Stage failed");
            StageResult::failed(name, e.to_string(), start.elapsed())
        }
        Err(join_error) => {
            let message = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                "stage cancelled".to_string()
            };
            tracing::error!(stage = %name, error = %message, "Stage panicked");
            StageResult::failed(name, message, start.elapsed())
        }
    }
}

/// Runs stages concurrently against the same input
pub struct ParallelGroup<I, O> {
    name: String,
    stages: Vec<Arc<dyn Stage<I, O>>>,
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
}

impl<I, O> ParallelGroup<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            max_concurrency: None,
            timeout: None,
        }
    }

    pub fn with_stage(mut self, stage: Arc<dyn Stage<I, O>>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_stages(mut self, stages: impl IntoIterator<Item = Arc<dyn Stage<I, O>>>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Bound how many stages run at once
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }

    /// Stop waiting after `timeout`; unfinished stages are reported
    /// `Skipped` and left running in the background
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// One result per stage, in declaration order
    pub async fn execute(&self, input: Arc<I>) -> Vec<StageResult<O>> {
        if self.stages.is_empty() {
            return Vec::new();
        }

        let results: Arc<Mutex<Vec<StageResult<O>>>> = Arc::new(Mutex::new(
            self.stages
                .iter()
                .map(|s| StageResult::skipped(s.name()))
                .collect(),
        ));
        let semaphore = self
            .max_concurrency
            .map(|max| Arc::new(Semaphore::new(max)));

        let tasks = self.stages.iter().enumerate().map(|(idx, stage)| {
            let stage = Arc::clone(stage);
            let input = Arc::clone(&input);
            let results = Arc::clone(&results);
            let semaphore = semaphore.clone();
            async move {
                let _permit = match &semaphore {
                    Some(semaphore) => semaphore.acquire().await.ok(),
                    None => None,
                };
                let result = run_stage(stage, input).await;
                results.lock()[idx] = result;
            }
        });
        let all = futures::future::join_all(tasks);

        match self.timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, all).await.is_err() {
                    tracing::error!(
                        group = %self.name,
                        timeout_ms = timeout.as_millis() as u64,
                        "Parallel group timed out"
                    );
                    for result in results.lock().iter_mut() {
                        if result.outcome == StageOutcome::Skipped {
                            result.error = Some(format!("{} timed out", self.name));
                        }
                    }
                }
            }
            None => {
                all.await;
            }
        }

        let mut guard = results.lock();
        std::mem::take(&mut *guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sleeper(name: &str, millis: u64, value: u32) -> Arc<dyn Stage<u32, u32>> {
        FnStage::new(name, move |input: Arc<u32>| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(*input + value)
        })
        .arc()
    }

    #[tokio::test]
    async fn test_failed_stage_is_recorded_not_propagated() {
        let stage = FnStage::new("boom", |_: Arc<()>| async {
            Err::<(), _>(PipelineError::stage("boom", "parser exploded"))
        })
        .arc();
        let result = run_stage(stage, Arc::new(())).await;
        assert_eq!(result.outcome, StageOutcome::Failed);
        assert!(result.error.unwrap().contains("parser exploded"));
        assert!(result.output.is_none());
    }

    #[tokio::test]
    async fn test_panicking_stage_is_recorded() {
        let stage = FnStage::new("panics", |_: Arc<()>| async {
            if true {
                panic!("index out of range");
            }
            Ok(())
        })
        .arc();
        let result = run_stage(stage, Arc::new(())).await;
        assert_eq!(result.outcome, StageOutcome::Failed);
        assert_eq!(result.error.as_deref(), Some("index out of range"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_declaration_order() {
        let group = ParallelGroup::new("g")
            .with_stage(sleeper("slow", 300, 1))
            .with_stage(sleeper("fast", 10, 2))
            .with_stage(sleeper("mid", 100, 3));
        let results = group.execute(Arc::new(10)).await;

        let names: Vec<_> = results.iter().map(|r| r.stage_name.as_str()).collect();
        assert_eq!(names, vec!["slow", "fast", "mid"]);
        let outputs: Vec<_> = results.iter().map(|r| r.output.unwrap()).collect();
        assert_eq!(outputs, vec![11, 12, 13]);
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_siblings() {
        let failing = FnStage::new("failing", |_: Arc<u32>| async {
            Err::<u32, _>(PipelineError::stage("failing", "nope"))
        })
        .arc();
        let group = ParallelGroup::new("dual")
            .with_stage(failing)
            .with_stage(sleeper("ok", 5, 1));
        let results = group.execute(Arc::new(1)).await;
        assert_eq!(results[0].outcome, StageOutcome::Failed);
        assert_eq!(results[1].outcome, StageOutcome::Completed);
        assert_eq!(results[1].output, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_finished_results() {
        let group = ParallelGroup::new("g")
            .with_stage(sleeper("quick", 10, 1))
            .with_stage(sleeper("stuck", 60_000, 2))
            .with_timeout(Duration::from_secs(1));
        let results = group.execute(Arc::new(0)).await;
        assert_eq!(results[0].outcome, StageOutcome::Completed);
        assert_eq!(results[1].outcome, StageOutcome::Skipped);
        assert!(results[1].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let stages: Vec<Arc<dyn Stage<(), ()>>> = (0..8)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                FnStage::new(format!("s{i}"), move |_: Arc<()>| {
                    let running = Arc::clone(&running);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .arc()
            })
            .collect();

        let results = ParallelGroup::new("capped")
            .with_stages(stages)
            .with_max_concurrency(2)
            .execute(Arc::new(()))
            .await;
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.is_completed()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_empty_group() {
        let group: ParallelGroup<(), ()> = ParallelGroup::new("empty");
        assert!(group.execute(Arc::new(())).await.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn prop_length_and_order_match_declaration(delays in proptest::collection::vec(0u64..30, 1..8)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let results = rt.block_on(async {
                let group = ParallelGroup::new("p").with_stages(
                    delays
                        .iter()
                        .enumerate()
                        .map(|(i, d)| sleeper(&format!("s{i}"), *d, i as u32)),
                );
                group.execute(Arc::new(0)).await
            });
            prop_assert_eq!(results.len(), delays.len());
            for (i, result) in results.iter().enumerate() {
                let expected = format!("s{i}");
                prop_assert_eq!(result.stage_name.as_str(), expected.as_str());
                prop_assert_eq!(result.output, Some(i as u32));
            }
        }
    }
}
