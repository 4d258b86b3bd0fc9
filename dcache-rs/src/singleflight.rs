//! Coalesces concurrent executions of the same work into a single one.
//!
//! When many callers miss the cache for the same key at the same time, only one of them should
//! hit the backing store or a peer. A [SingleFlight](SingleFlight) keeps a call record per key
//! which is in flight. The first caller executes the work, all others which arrive in the
//! meantime simply await its outcome and receive a clone of it.
//!
//! Note that the outcome isn't cached: the record is removed as soon as the work completes, so
//! that the next call for the same key executes the work again.
//!
//! Internally each record is a [OnceCell](tokio::sync::OnceCell). The map of records is guarded
//! by a mutex which is only held to register or remove a record, never while the work runs.
//! If the executing caller is cancelled before its work completes, one of the waiting callers
//! takes over and executes its own work. If nobody is waiting, the record is dropped along with
//! the cancelled caller.
//!
//! # Example
//!
//! ```
//! # use dcache::singleflight::SingleFlight;
//! # #[tokio::main]
//! # async fn main() {
//! let flight = SingleFlight::new();
//! let value = flight.run("key", || async { "test".to_owned() }).await;
//! assert_eq!(value, "test");
//! # }
//! ```
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

/// Ensures that at most one execution per key is in flight.
pub struct SingleFlight<T> {
    calls: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    /// Creates a new instance without any calls in flight.
    pub fn new() -> Self {
        SingleFlight {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Executes the given work unless an execution for the same key is already in flight.
    ///
    /// In the latter case, this awaits the running execution and returns a clone of its
    /// outcome.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let call = self
            .calls
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let guard = CallGuard {
            calls: &self.calls,
            key,
            call,
        };

        let result = guard.call.get_or_init(work).await.clone();
        result
    }

    /// Returns the number of keys which are currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

/// Removes the record of a call once its caller is done with it.
///
/// This also runs if the caller is cancelled, so that an abandoned record doesn't stay in the
/// map. A record is kept while other callers still wait on it, one of them takes over.
struct CallGuard<'a, T> {
    calls: &'a Mutex<HashMap<String, Arc<OnceCell<T>>>>,
    key: &'a str,
    call: Arc<OnceCell<T>>,
}

impl<T> Drop for CallGuard<'_, T> {
    fn drop(&mut self) {
        if let Ok(mut calls) = self.calls.lock() {
            // A later call might already have registered a fresh record for this key...
            let is_current = calls
                .get(self.key)
                .map(|current| Arc::ptr_eq(current, &self.call))
                .unwrap_or(false);

            // One reference is held by the map and one by this guard...
            let abandoned = Arc::strong_count(&self.call) <= 2;

            if is_current && (self.call.initialized() || abandoned) {
                let _ = calls.remove(self.key);
            }
        }
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        SingleFlight::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::singleflight::SingleFlight;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn work_is_executed() {
        crate::testing::test_async(async {
            let flight = SingleFlight::new();
            let result: Result<String, String> =
                flight.run("key", || async { Ok("test".to_owned()) }).await;
            assert_eq!(result, Ok("test".to_owned()));
            assert_eq!(flight.in_flight(), 0);
        });
    }

    #[test]
    fn concurrent_calls_are_coalesced() {
        crate::testing::test_async(async {
            let flight = Arc::new(SingleFlight::new());
            let executions = Arc::new(AtomicUsize::new(0));

            let mut tasks = Vec::new();
            for _ in 0..10 {
                let flight = flight.clone();
                let executions = executions.clone();
                tasks.push(tokio::spawn(async move {
                    flight
                        .run("key", || async {
                            let count = executions.fetch_add(1, Ordering::SeqCst) + 1;
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            format!("result-{}", count)
                        })
                        .await
                }));
            }

            let results = futures::future::join_all(tasks).await;

            assert_eq!(executions.load(Ordering::SeqCst), 1);
            for result in results {
                assert_eq!(result.unwrap(), "result-1");
            }
            assert_eq!(flight.in_flight(), 0);
        });
    }

    #[test]
    fn outcomes_are_not_cached() {
        crate::testing::test_async(async {
            let flight = SingleFlight::new();
            let executions = AtomicUsize::new(0);

            for expected in 1..=3 {
                let result = flight
                    .run("key", || async {
                        executions.fetch_add(1, Ordering::SeqCst) + 1
                    })
                    .await;
                assert_eq!(result, expected);
            }
        });
    }

    #[test]
    fn different_keys_do_not_block_each_other() {
        crate::testing::test_async(async {
            let flight = Arc::new(SingleFlight::new());
            let (tx, rx) = tokio::sync::oneshot::channel::<()>();

            // Keep "slow" in flight until "fast" has completed...
            let slow_flight = flight.clone();
            let slow = tokio::spawn(async move {
                slow_flight
                    .run("slow", || async move {
                        let _ = rx.await;
                        "slow".to_owned()
                    })
                    .await
            });
            tokio::task::yield_now().await;

            let fast = flight.run("fast", || async { "fast".to_owned() }).await;
            assert_eq!(fast, "fast");
            assert_eq!(flight.in_flight(), 1);

            tx.send(()).unwrap();
            assert_eq!(slow.await.unwrap(), "slow");
            assert_eq!(flight.in_flight(), 0);
        });
    }

    #[test]
    fn cancelled_calls_leave_no_records_behind() {
        crate::testing::test_async(async {
            let flight = SingleFlight::new();

            for i in 0..100 {
                let key = format!("key-{}", i);
                let outcome = tokio::time::timeout(
                    Duration::from_millis(1),
                    flight.run(&key, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        i
                    }),
                )
                .await;
                assert_eq!(outcome.is_err(), true);
            }

            assert_eq!(flight.in_flight(), 0);
        });
    }

    #[test]
    fn waiting_callers_take_over_cancelled_calls() {
        crate::testing::test_async(async {
            let flight = Arc::new(SingleFlight::new());

            let waiting_flight = flight.clone();
            let cancelled = tokio::time::timeout(
                Duration::from_millis(10),
                flight.run("key", || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    "never".to_owned()
                }),
            );
            let waiting = tokio::spawn(async move {
                waiting_flight
                    .run("key", || async { "taken over".to_owned() })
                    .await
            });

            assert_eq!(cancelled.await.is_err(), true);
            assert_eq!(waiting.await.unwrap(), "taken over");
            assert_eq!(flight.in_flight(), 0);
        });
    }
}
