//! Single-flight background worker for detector CPU stages.
//!
//! Each detector owns one worker thread fed through a channel; completed
//! results come back over a lock-free triple buffer, so the frame driver
//! reads the latest finished result without blocking. `try_submit`
//! refuses while a job is in flight, which is exactly the at-most-one
//! concurrent job rule the frame loop needs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use web_time::{Duration, Instant};

enum Msg<Req> {
    Job(Req),
    Shutdown,
}

/// A background thread running one detector's CPU stage.
pub struct DetectorWorker<Req, Res>
where
    Req: Send + 'static,
    Res: Clone + Send + 'static,
{
    tx: mpsc::Sender<Msg<Req>>,
    result: triple_buffer::Output<Option<Res>>,
    busy: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl<Req, Res> DetectorWorker<Req, Res>
where
    Req: Send + 'static,
    Res: Clone + Send + 'static,
{
    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`std::io::Error`] if the thread fails to spawn.
    pub fn spawn(
        name: &str,
        mut job: impl FnMut(Req) -> Res + Send + 'static,
    ) -> Result<Self, std::io::Error> {
        let (tx, rx) = mpsc::channel::<Msg<Req>>();
        let (mut input, output) = triple_buffer::triple_buffer(&None);
        let busy = Arc::new(AtomicBool::new(false));
        let busy_thread = Arc::clone(&busy);

        let thread = std::thread::Builder::new()
            .name(format!("argus-{name}"))
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        Msg::Shutdown => break,
                        Msg::Job(req) => {
                            let res = job(req);
                            input.write(Some(res));
                            busy_thread.store(false, Ordering::Release);
                        }
                    }
                }
            })?;

        Ok(Self {
            tx,
            result: output,
            busy,
            thread: Some(thread),
        })
    }

    /// Submit a job unless one is already in flight. Returns `false`
    /// when refused (single-flight).
    pub fn try_submit(&self, req: Req) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if self.tx.send(Msg::Job(req)).is_err() {
            // Worker thread is gone; clear the flag so callers do not
            // wedge.
            self.busy.store(false, Ordering::Release);
            return false;
        }
        true
    }

    /// Whether a job is currently in flight.
    #[must_use]
    pub fn busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// The most recently completed result, if any. Non-blocking; the
    /// same result is returned again until a newer job completes.
    pub fn latest(&mut self) -> Option<Res> {
        let _ = self.result.update();
        self.result.output_buffer_mut().clone()
    }

    /// Ask the thread to stop and wait up to `timeout` for it.
    ///
    /// Returns `false` when the deadline elapsed and the thread was
    /// detached instead.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        let _ = self.tx.send(Msg::Shutdown);
        let Some(handle) = self.thread.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("detector worker did not stop in {timeout:?}; detaching");
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        let _ = handle.join();
        true
    }
}

impl<Req, Res> Drop for DetectorWorker<Req, Res>
where
    Req: Send + 'static,
    Res: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.shutdown(Duration::from_millis(500));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_jobs_and_delivers_latest() {
        let mut worker =
            DetectorWorker::spawn("test", |x: u32| x * 2).unwrap();
        assert!(worker.try_submit(21));
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            if let Some(v) = worker.latest() {
                assert_eq!(v, 42);
                break;
            }
            assert!(Instant::now() < deadline, "worker never completed");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn single_flight_refuses_while_busy() {
        let mut worker = DetectorWorker::spawn("slow", |x: u32| {
            std::thread::sleep(Duration::from_millis(50));
            x
        })
        .unwrap();
        assert!(worker.try_submit(1));
        assert!(!worker.try_submit(2));
        // After completion, submission works again.
        let deadline = Instant::now() + Duration::from_secs(1);
        while worker.busy() {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(worker.try_submit(3));
        let _ = worker.latest();
    }

    #[test]
    fn latest_is_sticky_until_replaced() {
        let mut worker = DetectorWorker::spawn("sticky", |x: u32| x).unwrap();
        assert!(worker.try_submit(7));
        let deadline = Instant::now() + Duration::from_secs(1);
        while worker.latest().is_none() {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
        // Repeated reads keep returning the completed value.
        assert_eq!(worker.latest(), Some(7));
        assert_eq!(worker.latest(), Some(7));
    }

    #[test]
    fn shutdown_joins_idle_worker() {
        let mut worker = DetectorWorker::spawn("idle", |x: u32| x).unwrap();
        assert!(worker.shutdown(Duration::from_secs(1)));
    }
}
