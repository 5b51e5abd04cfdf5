use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::trace;

/// One result of pulling from a [`MessageSource`].
pub enum Pull<T> {
    /// An item was produced.
    Item(T),
    /// The source has permanently stopped; no more items will follow.
    Stopped,
}

/// Blocking producer side of a [`MessagePump`].
pub trait MessageSource<T>: Send {
    /// Block until the next item is available or the source stops.
    fn pull(&mut self) -> Pull<T>;
}

/// Consumer side of a [`MessagePump`].
pub trait MessageSink<T>: Send {
    /// Handle one item, synchronously on the pump worker.
    fn deliver(&mut self, item: T);

    /// Invoked once, on the pump worker, after the source reported
    /// [`Pull::Stopped`] and before the worker exits.
    fn stopped(&mut self) {}
}

struct GateState {
    paused: bool,
    stopped: bool,
}

struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    /// Block while paused. Returns `false` once the gate is stopped.
    fn wait_open(&self) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while state.paused && !state.stopped {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        !state.stopped
    }
}

/// A named worker thread pulling items from a source and delivering them to a
/// sink, one at a time.
///
/// The pump is created idle; [`start`](MessagePump::start) spawns the worker.
/// [`pause`](MessagePump::pause) stops delivery before the next item without
/// losing queued items, even when the worker is already blocked inside a
/// pull; [`resume`](MessagePump::resume) undoes it. The worker
/// exits when the source reports [`Pull::Stopped`] (or after
/// [`stop`](MessagePump::stop), once the current pull returns).
pub struct MessagePump {
    name: String,
    gate: Arc<Gate>,
    runner: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MessagePump {
    pub fn new<T, S, H>(name: &str, mut source: S, mut sink: H) -> Self
    where
        T: 'static,
        S: MessageSource<T> + 'static,
        H: MessageSink<T> + 'static,
    {
        let gate = Arc::new(Gate {
            state: Mutex::new(GateState {
                paused: false,
                stopped: false,
            }),
            cond: Condvar::new(),
        });

        let loop_gate = Arc::clone(&gate);
        let loop_name = name.to_string();
        let runner: Box<dyn FnOnce() + Send> = Box::new(move || {
            loop {
                if !loop_gate.wait_open() {
                    break;
                }
                match source.pull() {
                    Pull::Item(item) => {
                        // A pause issued while the pull was blocking holds
                        // the pulled item here until resume. An item that
                        // left the source is never dropped, so a stop at
                        // this point still delivers it before exiting.
                        let open = loop_gate.wait_open();
                        sink.deliver(item);
                        if !open {
                            break;
                        }
                    }
                    Pull::Stopped => {
                        trace!(pump = %loop_name, "source stopped");
                        sink.stopped();
                        break;
                    }
                }
            }
        });

        Self {
            name: name.to_string(),
            gate,
            runner: Mutex::new(Some(runner)),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker thread. Subsequent calls are no-ops.
    pub fn start(&self) {
        let runner = self
            .runner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(runner) = runner {
            let handle = std::thread::Builder::new()
                .name(self.name.clone())
                .spawn(runner)
                .expect("failed to spawn pump worker");
            *self
                .worker
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
        }
    }

    /// Stop delivering before the next item. Idempotent.
    pub fn pause(&self) {
        let mut state = self
            .gate
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.paused = true;
    }

    /// Resume dequeuing. Idempotent.
    pub fn resume(&self) {
        let mut state = self
            .gate
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.paused = false;
        self.gate.cond.notify_all();
    }

    /// Ask the worker to exit before its next pull.
    ///
    /// A worker blocked inside `pull` is not interrupted; sources that can
    /// block indefinitely must have a stop sentinel pushed through them.
    pub fn stop(&self) {
        let mut state = self
            .gate
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.stopped = true;
        self.gate.cond.notify_all();
    }

    /// Wait for the worker to exit. Returns immediately if never started.
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

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crossbeam_channel::{bounded, Receiver, Sender};

    use super::*;

    struct ChannelSource(Receiver<Option<u32>>);

    impl MessageSource<u32> for ChannelSource {
        fn pull(&mut self) -> Pull<u32> {
            match self.0.recv() {
                Ok(Some(v)) => Pull::Item(v),
                Ok(None) | Err(_) => Pull::Stopped,
            }
        }
    }

    struct CollectSink {
        out: Sender<u32>,
        stops: Arc<AtomicUsize>,
    }

    impl MessageSink<u32> for CollectSink {
        fn deliver(&mut self, item: u32) {
            let _ = self.out.send(item);
        }

        fn stopped(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn make_pump(cap: usize) -> (Sender<Option<u32>>, Receiver<u32>, Arc<AtomicUsize>, MessagePump) {
        let (tx, rx) = bounded(cap);
        let (out_tx, out_rx) = bounded(cap);
        let stops = Arc::new(AtomicUsize::new(0));
        let pump = MessagePump::new(
            "test-pump",
            ChannelSource(rx),
            CollectSink {
                out: out_tx,
                stops: Arc::clone(&stops),
            },
        );
        (tx, out_rx, stops, pump)
    }

    #[test]
    fn delivers_in_order_and_stops_once() {
        let (tx, out, stops, pump) = make_pump(16);
        pump.start();

        for i in 0..8 {
            tx.send(Some(i)).unwrap();
        }
        tx.send(None).unwrap();
        pump.join();

        let got: Vec<u32> = out.try_iter().collect();
        assert_eq!(got, (0..8).collect::<Vec<_>>());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pause_retains_queued_items() {
        let (tx, out, _stops, pump) = make_pump(16);
        pump.start();

        tx.send(Some(1)).unwrap();
        assert_eq!(out.recv_timeout(Duration::from_secs(1)).unwrap(), 1);

        pump.pause();
        // Give the worker a moment to park on the gate.
        std::thread::sleep(Duration::from_millis(50));
        tx.send(Some(2)).unwrap();
        tx.send(Some(3)).unwrap();
        assert!(out.recv_timeout(Duration::from_millis(100)).is_err());

        pump.resume();
        assert_eq!(out.recv_timeout(Duration::from_secs(1)).unwrap(), 2);
        assert_eq!(out.recv_timeout(Duration::from_secs(1)).unwrap(), 3);

        tx.send(None).unwrap();
        pump.join();
    }

    #[test]
    fn pause_holds_an_item_pulled_while_blocked() {
        let (tx, out, _stops, pump) = make_pump(16);
        pump.start();

        tx.send(Some(1)).unwrap();
        assert_eq!(out.recv_timeout(Duration::from_secs(1)).unwrap(), 1);

        // The worker is parked inside a blocking pull; an item arriving
        // after the pause must wait at the gate, not be delivered.
        std::thread::sleep(Duration::from_millis(50));
        pump.pause();
        tx.send(Some(2)).unwrap();
        assert!(out.recv_timeout(Duration::from_millis(100)).is_err());

        // Stop releases the gate but never drops the in-flight item.
        pump.stop();
        pump.join();
        assert_eq!(out.recv_timeout(Duration::from_secs(1)).unwrap(), 2);
    }

    #[test]
    fn start_twice_spawns_single_worker() {
        let (tx, out, _stops, pump) = make_pump(4);
        pump.start();
        pump.start();

        tx.send(Some(7)).unwrap();
        assert_eq!(out.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
        assert!(out.recv_timeout(Duration::from_millis(50)).is_err());

        tx.send(None).unwrap();
        pump.join();
    }

    #[test]
    fn stop_exits_before_next_pull() {
        let (tx, _out, stops, pump) = make_pump(4);
        pump.pause();
        pump.start();
        pump.stop();
        pump.join();

        // Worker never pulled, so the sink never saw a stop notification.
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        drop(tx);
    }
}
