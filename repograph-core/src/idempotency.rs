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

//! In-flight deduplication of async operations by key.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type InFlight<T> = Shared<BoxFuture<'static, T>>;
type InFlightMap<T> = Arc<Mutex<HashMap<String, (u64, InFlight<T>)>>>;

/// Runs at most one operation per key at a time. A caller arriving while an
/// operation for its key is running awaits that operation's output instead
/// of starting a duplicate.
///
/// The key is released when the operation itself finishes or panics, not
/// when the first caller goes away. If that caller is cancelled, joiners keep
/// driving the same run; if nobody is left waiting, the run is parked and the
/// next caller for the key resumes it rather than starting over.
pub struct IdempotencyGuard<T: Clone + Send + Sync + 'static> {
    in_flight: InFlightMap<T>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> IdempotencyGuard<T> {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub async fn execute<Fut>(&self, key: &str, operation: Fut) -> T
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let shared = {
            let mut map = self.in_flight.lock();
            match map.get(key) {
                Some((_, existing)) => {
                    tracing::debug!(key, "Joining in-flight operation");
                    existing.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let release = Release {
                        key: key.to_string(),
                        id,
                        map: Arc::clone(&self.in_flight),
                    };
                    let shared = async move {
                        let output = AssertUnwindSafe(operation).catch_unwind().await;
                        drop(release);
                        output.unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                    }
                    .boxed()
                    .shared();
                    map.insert(key.to_string(), (id, shared.clone()));
                    shared
                }
            }
        };
        shared.await
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().contains_key(key)
    }
}

impl<T: Clone + Send + Sync + 'static> Default for IdempotencyGuard<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lives inside the shared future; dropping it frees the key
struct Release<T: Clone + Send + Sync + 'static> {
    key: String,
    id: u64,
    map: InFlightMap<T>,
}

impl<T: Clone + Send + Sync + 'static> Drop for Release<T> {
    fn drop(&mut self) {
        let finished = {
            let mut map = self.map.lock();
            if map.get(&self.key).map(|(id, _)| *id) == Some(self.id) {
                map.remove(&self.key)
            } else {
                None
            }
        };
        // Dropped outside the lock
        drop(finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let guard = Arc::new(IdempotencyGuard::<usize>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let make = |runs: Arc<AtomicUsize>| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            runs.fetch_add(1, Ordering::SeqCst) + 41
        };

        let (a, b) = tokio::join!(
            guard.execute("analyze:p1", make(Arc::clone(&runs))),
            guard.execute("analyze:p1", make(Arc::clone(&runs))),
        );

        assert_eq!(a, 41);
        assert_eq!(b, 41);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!guard.is_in_flight("analyze:p1"));
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let guard = IdempotencyGuard::<u8>::new();
        assert_eq!(guard.execute("k", async { 1 }).await, 1);
        assert_eq!(guard.execute("k", async { 2 }).await, 2);
    }

    #[tokio::test]
    async fn test_cancelled_owner_keeps_key_for_joiners() {
        let guard = Arc::new(IdempotencyGuard::<usize>::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let owner = {
            let guard = Arc::clone(&guard);
            let runs = Arc::clone(&runs);
            tokio::spawn(async move {
                guard
                    .execute("k", async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        let _ = release_rx.await;
                        7
                    })
                    .await
            })
        };
        while !guard.is_in_flight("k") {
            tokio::task::yield_now().await;
        }

        let joiner = {
            let guard = Arc::clone(&guard);
            let runs = Arc::clone(&runs);
            tokio::spawn(async move {
                guard
                    .execute("k", async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        99
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        owner.abort();
        assert!(owner.await.unwrap_err().is_cancelled());
        assert!(guard.is_in_flight("k"));

        // A caller arriving after the cancellation still joins the same run
        let late = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { guard.execute("k", async { 100 }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        release_tx.send(()).unwrap();
        assert_eq!(joiner.await.unwrap(), 7);
        assert_eq!(late.await.unwrap(), 7);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!guard.is_in_flight("k"));
    }

    #[tokio::test]
    async fn test_panicking_operation_releases_key() {
        let guard = Arc::new(IdempotencyGuard::<u8>::new());
        let failing = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                guard
                    .execute("k", async {
                        if true {
                            panic!("boom");
                        }
                        0
                    })
                    .await
            })
        };
        assert!(failing.await.unwrap_err().is_panic());
        assert!(!guard.is_in_flight("k"));
        assert_eq!(guard.execute("k", async { 3 }).await, 3);
    }
}
