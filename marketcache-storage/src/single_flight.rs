//! Deduplication of concurrent recomputation for the same key.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

struct Call<T, E> {
    cell: OnceCell<Result<T, E>>,
}

/// Collapses concurrent calls for one key into a single execution.
///
/// Every caller that joins while the execution is running receives a clone
/// of its result, success or error. The entry is dropped once the call
/// completes or once every caller has gone away, so the next call for the
/// key runs again. If the caller driving the execution is cancelled while
/// others still wait, one of the waiters takes over and runs its own
/// closure.
pub struct SingleFlight<T, E> {
    calls: DashMap<String, Arc<Call<T, E>>>,
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// Run `f` for `key` unless a run for it is already in flight, in which
    /// case wait for that run and share its result.
    pub async fn run<F, Fut>(&self, key: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let call = self
            .calls
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Call {
                    cell: OnceCell::new(),
                })
            })
            .value()
            .clone();

        let _guard = CallGuard {
            calls: &self.calls,
            key,
            call: Arc::clone(&call),
        };

        call.cell.get_or_init(f).await.clone()
    }

    /// Number of keys with a run currently registered.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

impl<T: Clone, E: Clone> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

struct CallGuard<'a, T, E> {
    calls: &'a DashMap<String, Arc<Call<T, E>>>,
    key: &'a str,
    call: Arc<Call<T, E>>,
}

impl<T, E> Drop for CallGuard<'_, T, E> {
    fn drop(&mut self) {
        // Remaining references: the map, this guard and the caller's local.
        self.calls.remove_if(self.key, |_, current| {
            Arc::ptr_eq(current, &self.call)
                && (self.call.cell.initialized() || Arc::strong_count(&self.call) <= 3)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_execute_once() {
        let flight: Arc<SingleFlight<usize, String>> = Arc::new(SingleFlight::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flight = Arc::clone(&flight);
            let counter = Arc::clone(&counter);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                flight
                    .run("market:overview", || async {
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(1));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_completed_run_does_not_cache() {
        let flight: SingleFlight<u32, String> = SingleFlight::new();
        let counter = AtomicUsize::new(0);

        for _ in 0..3 {
            flight
                .run("k", || async {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_error_is_shared_and_not_retained() {
        let flight: SingleFlight<u32, String> = SingleFlight::new();

        let first = flight.run("k", || async { Err("boom".to_string()) }).await;
        assert_eq!(first, Err("boom".to_string()));

        let second = flight.run("k", || async { Ok(1) }).await;
        assert_eq!(second, Ok(1));
    }

    #[tokio::test]
    async fn test_abandoned_run_is_removed() {
        let flight: SingleFlight<u32, String> = SingleFlight::new();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            flight.run("k", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(flight.in_flight(), 0);

        assert_eq!(flight.run("k", || async { Ok(2) }).await, Ok(2));
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flight: SingleFlight<&'static str, String> = SingleFlight::new();
        let (a, b) = tokio::join!(
            flight.run("a", || async { Ok("a") }),
            flight.run("b", || async { Ok("b") }),
        );
        assert_eq!((a, b), (Ok("a"), Ok("b")));
    }
}
