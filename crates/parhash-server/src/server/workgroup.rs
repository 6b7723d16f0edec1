//! Bounded, cancellable task groups.
//!
//! A [`WorkGroup`] runs the tasks of one batch on the Tokio runtime while a
//! [`Semaphore`] shared by every group of the service caps how many task
//! bodies run at once. Waiting on the group drains every task and reports the
//! first error observed, so no task is ever abandoned mid-flight.
//!
//! Every group is bound to a [`CancellationToken`]. Tasks that have not
//! acquired a permit when it fires never start their body; tasks already
//! running have their future dropped, which cancels any outstanding RPC.

use core::future::Future;
use parhash_core::Error;
use std::sync::Arc;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

/// A set of concurrently running tasks sharing a concurrency ceiling and a
/// cancellation scope.
///
/// Dropping the group aborts every task still running.
pub struct WorkGroup<T> {
    permits: Arc<Semaphore>,
    token: CancellationToken,
    tasks: JoinSet<Result<T, Error>>,
}

impl<T: Send + 'static> WorkGroup<T> {
    pub fn new(permits: Arc<Semaphore>, token: CancellationToken) -> Self {
        Self {
            permits,
            token,
            tasks: JoinSet::new(),
        }
    }

    /// Spawns `task` into the group.
    ///
    /// The task first waits for a permit; it is handed a clone of the group's
    /// token once it holds one and keeps the permit until its future resolves.
    /// If the token is cancelled first, the task resolves to
    /// [`Error::Cancelled`] without running `task`. A closed semaphore resolves
    /// it to [`Error::ServiceShutdown`].
    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let token = self.token.clone();

        self.tasks.spawn(async move {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let _permit = tokio::select! {
                biased;
                () = token.cancelled() => return Err(Error::Cancelled),
                permit = permits.acquire_owned() => permit.map_err(|_| Error::ServiceShutdown)?,
            };

            // Cancellation may have raced the permit hand-off.
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let child = token.clone();
            tokio::select! {
                biased;
                () = token.cancelled() => Err(Error::Cancelled),
                res = task(child) => res,
            }
        });
    }

    /// Waits for every task to finish and returns their outputs in completion
    /// order.
    ///
    /// # Errors
    ///
    /// Returns the first error observed. Remaining tasks are still drained
    /// before returning, and their outputs and errors are discarded. A task
    /// that panicked or was aborted is reported as [`Error::TaskFailed`].
    pub async fn wait(mut self) -> Result<Vec<T>, Error> {
        let mut outputs = Vec::with_capacity(self.tasks.len());
        let mut first_err = None;

        while let Some(joined) = self.tasks.join_next().await {
            let res = joined.unwrap_or_else(|e| {
                Err(Error::TaskFailed {
                    reason: e.to_string(),
                })
            });

            match res {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    if first_err.is_none() {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Work group task failed: {e}");
                        first_err = Some(e);
                    }
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use portable_atomic::{AtomicUsize, Ordering};
    use tokio::time::{Instant, sleep};

    /// Tracks how many task bodies are running and the highest value seen.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
    }

    impl Gauge {
        async fn run(&self, hold: Duration) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(hold).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn never_exceeds_the_shared_ceiling() {
        let permits = Arc::new(Semaphore::new(3));
        let gauge = Arc::new(Gauge::default());

        // Two groups share the same semaphore, as concurrent calls do.
        let mut groups: Vec<WorkGroup<usize>> = (0..2)
            .map(|_| WorkGroup::new(Arc::clone(&permits), CancellationToken::new()))
            .collect();
        for group in &mut groups {
            for i in 0..12 {
                let gauge = Arc::clone(&gauge);
                group.spawn(move |_| async move {
                    gauge.run(Duration::from_millis(10)).await;
                    Ok(i)
                });
            }
        }

        let results = futures::future::try_join_all(groups.into_iter().map(WorkGroup::wait))
            .await
            .unwrap();

        assert!(results.iter().all(|outputs| outputs.len() == 12));
        assert_eq!(gauge.finished.load(Ordering::SeqCst), 24);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(permits.available_permits(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn reports_first_error_after_draining_siblings() {
        let permits = Arc::new(Semaphore::new(8));
        let gauge = Arc::new(Gauge::default());
        let mut group = WorkGroup::new(permits, CancellationToken::new());

        group.spawn(|_| async {
            Err::<(), _>(Error::InvalidRequest {
                reason: "first".into(),
            })
        });
        for _ in 0..5 {
            let gauge = Arc::clone(&gauge);
            group.spawn(move |_| async move {
                gauge.run(Duration::from_millis(20)).await;
                Ok(())
            });
        }

        let err = group.wait().await.unwrap_err();
        assert_eq!(
            err,
            Error::InvalidRequest {
                reason: "first".into()
            }
        );
        // Siblings were not cut short by the failure.
        assert_eq!(gauge.finished.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn cancelled_scope_never_starts_tasks() {
        let permits = Arc::new(Semaphore::new(2));
        let token = CancellationToken::new();
        token.cancel();

        let started = Arc::new(AtomicUsize::new(0));
        let mut group = WorkGroup::new(permits, token);
        for _ in 0..4 {
            let started = Arc::clone(&started);
            group.spawn(move |_| async move {
                started.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        assert_eq!(group.wait().await.unwrap_err(), Error::Cancelled);
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn cancellation_interrupts_running_and_pending_tasks() {
        // A single permit: one task runs, the rest queue behind it.
        let permits = Arc::new(Semaphore::new(1));
        let token = CancellationToken::new();
        let gauge = Arc::new(Gauge::default());
        let mut group = WorkGroup::new(Arc::clone(&permits), token.clone());

        for _ in 0..4 {
            let gauge = Arc::clone(&gauge);
            group.spawn(move |_| async move {
                gauge.run(Duration::from_secs(30)).await;
                Ok(())
            });
        }

        let canceller = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let start = Instant::now();
        assert_eq!(group.wait().await.unwrap_err(), Error::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(gauge.finished.load(Ordering::SeqCst), 0);
        assert_eq!(permits.available_permits(), 1);
        canceller.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn closed_semaphore_reports_shutdown() {
        let permits = Arc::new(Semaphore::new(1));
        permits.close();

        let mut group = WorkGroup::new(permits, CancellationToken::new());
        group.spawn(|_| async { Ok(()) });
        assert_eq!(group.wait().await.unwrap_err(), Error::ServiceShutdown);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn panicking_task_is_reported() {
        let mut group: WorkGroup<()> =
            WorkGroup::new(Arc::new(Semaphore::new(1)), CancellationToken::new());
        let explode = true;
        group.spawn(move |_| async move {
            assert!(!explode, "boom");
            Ok(())
        });
        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, Error::TaskFailed { .. }), "{err:?}");
    }
}
