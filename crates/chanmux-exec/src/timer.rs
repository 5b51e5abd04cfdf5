use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct TimerState {
    deadline: Instant,
    cancelled: bool,
    callback: Option<Box<dyn FnOnce() + Send>>,
}

struct TimerInner {
    timeout: Duration,
    state: Mutex<TimerState>,
    cond: Condvar,
}

/// A re-armable inactivity timer.
///
/// The callback fires at most once, on a dedicated thread, when the deadline
/// passes without a [`rearm`](InactivityTimer::rearm). [`cancel`] drops the
/// callback without firing it; cancel and expiry race to take the callback,
/// so exactly one of "fired" and "cancelled" wins.
///
/// [`cancel`]: InactivityTimer::cancel
#[derive(Clone)]
pub struct InactivityTimer {
    inner: Arc<TimerInner>,
}

impl InactivityTimer {
    pub fn start(name: &str, timeout: Duration, on_timeout: impl FnOnce() + Send + 'static) -> Self {
        let inner = Arc::new(TimerInner {
            timeout,
            state: Mutex::new(TimerState {
                deadline: Instant::now() + timeout,
                cancelled: false,
                callback: Some(Box::new(on_timeout)),
            }),
            cond: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = worker_inner
                    .state
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                loop {
                    if state.cancelled {
                        return;
                    }
                    let now = Instant::now();
                    if now >= state.deadline {
                        if let Some(callback) = state.callback.take() {
                            drop(state);
                            callback();
                        }
                        return;
                    }
                    let wait = state.deadline - now;
                    state = worker_inner
                        .cond
                        .wait_timeout(state, wait)
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .0;
                }
            })
            .expect("failed to spawn inactivity timer");

        Self { inner }
    }

    /// Push the deadline out by the full timeout again.
    pub fn rearm(&self) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.deadline = Instant::now() + self.inner.timeout;
        self.inner.cond.notify_all();
    }

    /// Stop the timer without firing. Idempotent; a callback already taken by
    /// the expiry path is not affected.
    pub fn cancel(&self) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.cancelled = true;
        state.callback = None;
        self.inner.cond.notify_all();
    }
}
