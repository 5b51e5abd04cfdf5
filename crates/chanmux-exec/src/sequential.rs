use std::sync::Mutex;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};

enum Task {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// A single worker draining closures in strict submission order.
///
/// Used for user-visible connection callbacks: submissions from any thread are
/// executed one at a time, never concurrently, in the order they were raised.
pub struct SequentialExecutor {
    tx: Sender<Task>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SequentialExecutor {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = unbounded::<Task>();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    match task {
                        Task::Run(f) => f(),
                        Task::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn sequential executor");
        Self {
            tx,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue a closure. Submissions after [`shutdown`](Self::shutdown) are
    /// silently dropped.
    pub fn submit(&self, f: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Task::Run(Box::new(f)));
    }

    /// Graceful shutdown: every task queued before this call still runs, then
    /// the worker exits. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Task::Shutdown);
    }

    /// Wait for the worker to exit (after [`shutdown`](Self::shutdown)).
    pub fn join(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn runs_tasks_in_submission_order() {
        let executor = SequentialExecutor::new("seq-test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..32 {
            let seen = Arc::clone(&seen);
            executor.submit(move || seen.lock().unwrap().push(i));
        }
        executor.shutdown();
        executor.join();

        assert_eq!(*seen.lock().unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn tasks_queued_before_shutdown_still_run() {
        let executor = SequentialExecutor::new("seq-drain");
        let seen = Arc::new(Mutex::new(0));

        for _ in 0..8 {
            let seen = Arc::clone(&seen);
            executor.submit(move || *seen.lock().unwrap() += 1);
        }
        executor.shutdown();
        executor.join();

        assert_eq!(*seen.lock().unwrap(), 8);
    }

    #[test]
    fn cross_thread_submissions_never_overlap() {
        let executor = Arc::new(SequentialExecutor::new("seq-xthread"));
        let running = Arc::new(Mutex::new(false));
        let max_seen = Arc::new(Mutex::new(true));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let executor = Arc::clone(&executor);
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            handles.push(std::thread::spawn(move || {
                for _ in 0..16 {
                    let running = Arc::clone(&running);
                    let max_seen = Arc::clone(&max_seen);
                    executor.submit(move || {
                        {
                            let mut r = running.lock().unwrap();
                            if *r {
                                *max_seen.lock().unwrap() = false;
                            }
                            *r = true;
                        }
                        std::thread::yield_now();
                        *running.lock().unwrap() = false;
                    });
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        executor.shutdown();
        executor.join();

        assert!(*max_seen.lock().unwrap());
    }
}
