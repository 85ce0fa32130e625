//! Bounded-concurrency scheduler for encode jobs
//!
//! Runs the whole job list through an [`EncoderInvoker`] while never holding
//! more than the planned number of encodes in flight. Each job owns a
//! semaphore permit for the duration of its encode; results come back in
//! submission order regardless of completion order.
//!
//! Failures are isolated: one failed encode marks its own job Failed and the
//! rest of the batch keeps running. A raised stop signal kills in-flight
//! encodes and leaves queued jobs Pending.

use crate::encode::{EncodeError, EncoderInvoker};
use crate::jobs::EncodeJob;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

/// Handle for requesting a cooperative stop of a running batch
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Raise the stop signal. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// Scheduler holding the concurrency budget for one run
#[derive(Debug)]
pub struct Scheduler {
    semaphore: Arc<Semaphore>,
    stop: Arc<watch::Sender<bool>>,
    max_concurrent: usize,
}

impl Scheduler {
    /// Create a scheduler allowing at most `max_concurrent` encodes in flight
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (stop, _) = watch::channel(false);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            stop: Arc::new(stop),
            max_concurrent,
        }
    }

    /// Maximum number of encodes in flight at once
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of free encode slots
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// True once a stop has been requested
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Handle for stopping the batch from another task
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
        }
    }

    /// Run every job to a terminal state and return the jobs in submission
    /// order.
    ///
    /// Jobs that never acquired a slot before a stop was raised come back
    /// Pending; jobs interrupted mid-encode come back Failed with their
    /// partial output removed.
    pub async fn run_all<I: EncoderInvoker>(
        &self,
        jobs: Vec<EncodeJob>,
        invoker: Arc<I>,
    ) -> Vec<EncodeJob> {
        let total = jobs.len();
        let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(total);
        for job in jobs {
            let semaphore = self.semaphore.clone();
            let invoker = invoker.clone();
            let stop_rx = self.stop.subscribe();
            let completed = completed.clone();
            handles.push(tokio::spawn(async move {
                let job = run_one(job, semaphore, invoker, stop_rx).await;
                if job.status.is_terminal() {
                    let done = completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                    let pct = done as f64 * 100.0 / total as f64;
                    info!("encode progress: {done}/{total} ({pct:.0}%)");
                }
                job
            }));
        }

        let mut finished = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(job) => finished.push(job),
                Err(e) => error!("encode task panicked: {e}"),
            }
        }
        finished
    }
}

async fn run_one<I: EncoderInvoker>(
    mut job: EncodeJob,
    semaphore: Arc<Semaphore>,
    invoker: Arc<I>,
    stop_rx: watch::Receiver<bool>,
) -> EncodeJob {
    let permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            job.fail("scheduler shut down before the job could start");
            return job;
        }
    };

    // A job that never started stays Pending under a stop request.
    if *stop_rx.borrow() {
        drop(permit);
        return job;
    }

    job.start();
    info!(job = %job.id.stem(), "encode started");
    let result = invoker.encode(&job, stop_rx).await;
    drop(permit);

    match result {
        Ok(()) => match std::fs::metadata(&job.output_path) {
            Ok(meta) if meta.len() > 0 => {
                info!(job = %job.id.stem(), bytes = meta.len(), "encode succeeded");
                job.succeed();
            }
            Ok(_) => {
                let _ = std::fs::remove_file(&job.output_path);
                warn!(job = %job.id.stem(), "encoder produced an empty container");
                job.fail("encoder produced an empty container");
            }
            Err(e) => {
                warn!(job = %job.id.stem(), "container missing after encode: {e}");
                job.fail(format!("container missing after encode: {e}"));
            }
        },
        Err(EncodeError::Cancelled) => {
            let _ = std::fs::remove_file(&job.output_path);
            warn!(job = %job.id.stem(), "encode cancelled");
            job.fail("encode cancelled");
        }
        Err(e) => {
            let _ = std::fs::remove_file(&job.output_path);
            warn!(job = %job.id.stem(), "encode failed: {e}");
            job.fail(e.to_string());
        }
    }
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{BitstreamId, JobStatus, QualityTriplet};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn make_job(tile_id: u32, out_dir: &std::path::Path) -> EncodeJob {
        let id = BitstreamId::new(tile_id, QualityTriplet::new(24, 32, 43));
        EncodeJob::new(
            id,
            PathBuf::from("/tiles/unused"),
            0,
            16,
            out_dir.join(id.container_name()),
        )
    }

    /// Invoker that writes a one-byte container after a short hold, tracking
    /// the peak number of concurrent encodes.
    struct CountingInvoker {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingInvoker {
        fn new() -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl EncoderInvoker for CountingInvoker {
        fn encode(
            &self,
            job: &EncodeJob,
            _stop: watch::Receiver<bool>,
        ) -> impl std::future::Future<Output = Result<(), EncodeError>> + Send {
            async move {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                std::fs::write(&job.output_path, b"x")?;
                Ok(())
            }
        }
    }

    /// Invoker that fails jobs for one tile and succeeds for the rest.
    struct SelectiveInvoker {
        failing_tile: u32,
    }

    impl EncoderInvoker for SelectiveInvoker {
        fn encode(
            &self,
            job: &EncodeJob,
            _stop: watch::Receiver<bool>,
        ) -> impl std::future::Future<Output = Result<(), EncodeError>> + Send {
            async move {
                if job.id.tile_id == self.failing_tile {
                    return Err(EncodeError::EncoderFailed(1));
                }
                std::fs::write(&job.output_path, b"x")?;
                Ok(())
            }
        }
    }

    /// Invoker that runs until the stop signal arrives.
    struct BlockingInvoker;

    impl EncoderInvoker for BlockingInvoker {
        fn encode(
            &self,
            _job: &EncodeJob,
            mut stop: watch::Receiver<bool>,
        ) -> impl std::future::Future<Output = Result<(), EncodeError>> + Send {
            async move {
                loop {
                    if stop.changed().await.is_err() || *stop.borrow() {
                        return Err(EncodeError::Cancelled);
                    }
                }
            }
        }
    }

    /// Invoker that claims success without writing any output.
    struct SilentInvoker;

    impl EncoderInvoker for SilentInvoker {
        fn encode(
            &self,
            _job: &EncodeJob,
            _stop: watch::Receiver<bool>,
        ) -> impl std::future::Future<Output = Result<(), EncodeError>> + Send {
            async move { Ok(()) }
        }
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_budget() {
        let out = TempDir::new().unwrap();
        let jobs: Vec<_> = (0..8).map(|i| make_job(i, out.path())).collect();
        let invoker = Arc::new(CountingInvoker::new());

        let scheduler = Scheduler::new(2);
        assert_eq!(scheduler.max_concurrent(), 2);
        assert_eq!(scheduler.available_permits(), 2);

        let finished = scheduler.run_all(jobs, invoker.clone()).await;

        assert!(invoker.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(finished.len(), 8);
        assert!(finished.iter().all(|j| j.status == JobStatus::Succeeded));
        // Every slot returns to the pool once the batch drains.
        assert_eq!(scheduler.available_permits(), 2);
    }

    #[tokio::test]
    async fn results_come_back_in_submission_order() {
        let out = TempDir::new().unwrap();
        let jobs: Vec<_> = (0..5).map(|i| make_job(i, out.path())).collect();

        let scheduler = Scheduler::new(4);
        let finished = scheduler
            .run_all(jobs, Arc::new(CountingInvoker::new()))
            .await;

        let tiles: Vec<u32> = finished.iter().map(|j| j.id.tile_id).collect();
        assert_eq!(tiles, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn one_failure_does_not_sink_the_batch() {
        let out = TempDir::new().unwrap();
        let jobs: Vec<_> = (0..4).map(|i| make_job(i, out.path())).collect();

        let scheduler = Scheduler::new(4);
        let finished = scheduler
            .run_all(jobs, Arc::new(SelectiveInvoker { failing_tile: 2 }))
            .await;

        for job in &finished {
            if job.id.tile_id == 2 {
                assert_eq!(job.status, JobStatus::Failed);
                assert!(job.error_reason.is_some());
            } else {
                assert_eq!(job.status, JobStatus::Succeeded);
                assert!(job.output_path.exists());
            }
        }
    }

    #[tokio::test]
    async fn stop_fails_running_jobs_and_leaves_queued_jobs_pending() {
        let out = TempDir::new().unwrap();
        let jobs: Vec<_> = (0..4).map(|i| make_job(i, out.path())).collect();

        let scheduler = Scheduler::new(1);
        let stop = scheduler.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            stop.stop();
        });

        let finished = scheduler.run_all(jobs, Arc::new(BlockingInvoker)).await;

        let failed = finished
            .iter()
            .filter(|j| j.status == JobStatus::Failed)
            .count();
        let pending = finished
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .count();
        assert_eq!(failed, 1);
        assert_eq!(pending, 3);
    }

    #[tokio::test]
    async fn missing_container_fails_validation() {
        let out = TempDir::new().unwrap();
        let jobs = vec![make_job(0, out.path())];

        let scheduler = Scheduler::new(1);
        let finished = scheduler.run_all(jobs, Arc::new(SilentInvoker)).await;

        assert_eq!(finished[0].status, JobStatus::Failed);
        assert!(finished[0]
            .error_reason
            .as_deref()
            .unwrap()
            .contains("missing"));
    }

    #[tokio::test]
    async fn empty_container_is_removed_and_fails() {
        let out = TempDir::new().unwrap();
        let job = make_job(0, out.path());
        let output_path = job.output_path.clone();
        std::fs::write(&output_path, b"").unwrap();

        let scheduler = Scheduler::new(1);
        let finished = scheduler.run_all(vec![job], Arc::new(SilentInvoker)).await;

        assert_eq!(finished[0].status, JobStatus::Failed);
        assert!(!output_path.exists());
    }
}
