use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};

use chanmux_router::{
    ChannelFsm, ChannelGroups, ChannelRouter, ConnectionEvents, ConnectionHandle, RouterError,
    Step, TimedChannelFsm,
};
use chanmux_wire::{CommError, WireConfig, WireFraming};

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
enum Ev {
    Object(u8, String),
    Data(u8, Vec<u8>),
    Freed(u8),
    Disconnected(bool),
    Error(CommError),
}

struct Recorder {
    tx: Sender<Ev>,
}

impl ConnectionEvents<String> for Recorder {
    fn object_message(&self, _handle: &ConnectionHandle<String>, channel: u8, message: String) {
        let _ = self.tx.send(Ev::Object(channel, message));
    }

    fn data_message(&self, _handle: &ConnectionHandle<String>, channel: u8, data: Bytes) {
        let _ = self.tx.send(Ev::Data(channel, data.to_vec()));
    }

    fn channel_freed(&self, _handle: &ConnectionHandle<String>, channel: u8) {
        let _ = self.tx.send(Ev::Freed(channel));
    }

    fn disconnected(&self, _handle: &ConnectionHandle<String>, expected: bool) {
        let _ = self.tx.send(Ev::Disconnected(expected));
    }

    fn error(&self, _handle: &ConnectionHandle<String>, error: CommError) {
        let _ = self.tx.send(Ev::Error(error));
    }
}

static NEXT_PAIR: AtomicU64 = AtomicU64::new(0);

/// Router on one end of a socket pair, raw framing layer on the other, plus
/// the raw remote socket for byte-level injection.
fn rigged(
    groups: &ChannelGroups,
) -> (
    ChannelRouter<String>,
    Receiver<Ev>,
    WireFraming<String>,
    UnixStream,
) {
    let n = NEXT_PAIR.fetch_add(1, Ordering::Relaxed);
    let (local, remote) = UnixStream::pair().unwrap();
    let raw_remote = remote.try_clone().unwrap();
    let framing =
        WireFraming::<String>::new(&format!("rt-{n}"), local, WireConfig::default()).unwrap();
    let remote_framing =
        WireFraming::<String>::new(&format!("rt-{n}-peer"), remote, WireConfig::default()).unwrap();
    let (tx, rx) = unbounded();
    let router = ChannelRouter::new(framing, Arc::new(Recorder { tx }), groups).unwrap();
    (router, rx, remote_framing, raw_remote)
}

#[test]
fn unrouted_frames_reach_default_callbacks_in_order() {
    let (router, events, remote, _raw) = rigged(&ChannelGroups::single());
    router.start();

    remote.write_object(3, &"ping".to_string(), true);
    remote.write_data(120, &[1, 2, 3], true);

    assert_eq!(events.recv_timeout(WAIT).unwrap(), Ev::Object(3, "ping".to_string()));
    assert_eq!(events.recv_timeout(WAIT).unwrap(), Ev::Data(120, vec![1, 2, 3]));
}

/// Collects objects until `limit` of them have been seen.
struct Collect {
    seen: Arc<Mutex<Vec<String>>>,
    limit: usize,
}

impl ChannelFsm<String> for Collect {
    type State = usize;

    fn init(&mut self, _handle: &ConnectionHandle<String>) -> usize {
        0
    }

    fn on_object(
        &mut self,
        state: usize,
        _channel: u8,
        message: String,
        _handle: &ConnectionHandle<String>,
    ) -> Step<usize> {
        self.seen.lock().unwrap().push(message);
        Step::Next(state + 1)
    }

    fn on_data(
        &mut self,
        state: usize,
        _channel: u8,
        _data: Bytes,
        _handle: &ConnectionHandle<String>,
    ) -> Step<usize> {
        Step::Next(state)
    }

    fn is_final(&self, state: &usize, _handle: &ConnectionHandle<String>) -> bool {
        *state >= self.limit
    }
}

#[test]
fn fsm_consumes_frames_then_frees_the_channel() {
    let (router, events, remote, _raw) = rigged(&ChannelGroups::single());
    let seen = Arc::new(Mutex::new(Vec::new()));
    router
        .handle()
        .register_fsm(
            5,
            Collect {
                seen: Arc::clone(&seen),
                limit: 3,
            },
        )
        .unwrap()
        .unwrap();
    router.start();

    for word in ["a", "b", "c", "d"] {
        remote.write_object(5, &word.to_string(), true);
    }

    // The machine eats the first three, detaches, and the fourth falls
    // through to the default callback.
    assert_eq!(events.recv_timeout(WAIT).unwrap(), Ev::Freed(5));
    assert_eq!(events.recv_timeout(WAIT).unwrap(), Ev::Object(5, "d".to_string()));
    assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    assert!(!router.handle().is_channel_registered(5));
}

struct AbortOnObject;

impl ChannelFsm<String> for AbortOnObject {
    type State = ();

    fn init(&mut self, _handle: &ConnectionHandle<String>) {}

    fn on_object(
        &mut self,
        _state: (),
        _channel: u8,
        message: String,
        _handle: &ConnectionHandle<String>,
    ) -> Step<()> {
        Step::Abort(format!("unexpected message: {message}"))
    }

    fn on_data(
        &mut self,
        state: (),
        _channel: u8,
        _data: Bytes,
        _handle: &ConnectionHandle<String>,
    ) -> Step<()> {
        Step::Next(state)
    }

    fn is_final(&self, _state: &(), _handle: &ConnectionHandle<String>) -> bool {
        false
    }
}

#[test]
fn aborted_transition_frees_channel_and_disconnects() {
    let (router, events, remote, _raw) = rigged(&ChannelGroups::single());
    router.handle().register_fsm(9, AbortOnObject).unwrap().unwrap();
    router.start();

    remote.write_object(9, &"boom".to_string(), true);

    assert_eq!(events.recv_timeout(WAIT).unwrap(), Ev::Freed(9));
    assert_eq!(events.recv_timeout(WAIT).unwrap(), Ev::Disconnected(true));
    router.join();
}

/// Blocks inside the transition until the gate opens.
struct Gated {
    gate: Receiver<()>,
}

impl ChannelFsm<String> for Gated {
    type State = ();

    fn init(&mut self, _handle: &ConnectionHandle<String>) {}

    fn on_object(
        &mut self,
        state: (),
        _channel: u8,
        _message: String,
        _handle: &ConnectionHandle<String>,
    ) -> Step<()> {
        let _ = self.gate.recv();
        Step::Next(state)
    }

    fn on_data(
        &mut self,
        state: (),
        _channel: u8,
        _data: Bytes,
        _handle: &ConnectionHandle<String>,
    ) -> Step<()> {
        Step::Next(state)
    }

    fn is_final(&self, _state: &(), _handle: &ConnectionHandle<String>) -> bool {
        false
    }
}

#[test]
fn blocked_channel_stalls_only_its_own_group() {
    let groups = ChannelGroups::default().with_group([1]).with_group([2]);
    let (router, events, remote, _raw) = rigged(&groups);
    let (gate_tx, gate_rx) = unbounded();
    router
        .handle()
        .register_fsm(1, Gated { gate: gate_rx })
        .unwrap()
        .unwrap();
    router.start();

    remote.write_object(1, &"stall".to_string(), true);
    remote.write_object(2, &"through".to_string(), true);

    // Channel 1's worker is parked inside the transition; channel 2 is a
    // different group and keeps flowing.
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        Ev::Object(2, "through".to_string())
    );
    drop(gate_tx);
}

#[test]
fn local_disconnect_notifies_exactly_once() {
    let (router, events, _remote, _raw) = rigged(&ChannelGroups::single());
    router.start();

    router.disconnect();
    router.disconnect();
    router.join();

    let got: Vec<Ev> = events.try_iter().collect();
    assert_eq!(got, vec![Ev::Disconnected(true)]);
}

#[test]
fn teardown_frees_channels_still_registered() {
    let (router, events, _remote, _raw) = rigged(&ChannelGroups::single());
    let seen = Arc::new(Mutex::new(Vec::new()));
    router
        .handle()
        .register_fsm(7, Collect { seen, limit: 9 })
        .unwrap()
        .unwrap();
    router.start();

    router.disconnect();
    router.join();

    // A registration alive at teardown is detached like any other, so its
    // channel-freed event still fires, before the closing disconnect.
    let got: Vec<Ev> = events.try_iter().collect();
    assert_eq!(got, vec![Ev::Freed(7), Ev::Disconnected(true)]);
    assert!(!router.handle().is_channel_registered(7));
}

#[test]
fn remote_close_is_an_unexpected_disconnect() {
    let (router, events, remote, raw) = rigged(&ChannelGroups::single());
    router.start();

    remote.disconnect();
    drop(remote);
    drop(raw);

    assert_eq!(events.recv_timeout(WAIT).unwrap(), Ev::Disconnected(false));
    router.join();
}

#[test]
fn undecodable_object_raises_error_not_disconnected() {
    use std::io::Write;

    let (router, events, _remote, mut raw) = rigged(&ChannelGroups::single());
    router.start();

    // Object frame whose payload is not a valid envelope.
    let body = b"not-json";
    let mut frame = vec![0u8];
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    raw.write_all(&frame).unwrap();
    raw.flush().unwrap();

    match events.recv_timeout(WAIT).unwrap() {
        Ev::Error(CommError::UnknownClassReceived(_)) => {}
        other => panic!("expected decode error event, got {other:?}"),
    }
    router.join();
    assert!(events.try_iter().all(|ev| !matches!(ev, Ev::Disconnected(_))));
}

struct Expiring {
    expired: Sender<String>,
}

impl ChannelFsm<String> for Expiring {
    type State = String;

    fn init(&mut self, _handle: &ConnectionHandle<String>) -> String {
        "waiting".to_string()
    }

    fn on_object(
        &mut self,
        _state: String,
        _channel: u8,
        message: String,
        _handle: &ConnectionHandle<String>,
    ) -> Step<String> {
        Step::Next(message)
    }

    fn on_data(
        &mut self,
        state: String,
        _channel: u8,
        _data: Bytes,
        _handle: &ConnectionHandle<String>,
    ) -> Step<String> {
        Step::Next(state)
    }

    fn is_final(&self, _state: &String, _handle: &ConnectionHandle<String>) -> bool {
        false
    }
}

impl TimedChannelFsm<String> for Expiring {
    fn timed_out(&mut self, state: String, _handle: &ConnectionHandle<String>) {
        let _ = self.expired.send(state);
    }
}

#[test]
fn silent_timed_fsm_expires_and_frees_the_channel() {
    let (router, events, remote, _raw) = rigged(&ChannelGroups::single());
    let (expired_tx, expired_rx) = unbounded();
    router
        .handle()
        .register_timed_fsm(7, Expiring { expired: expired_tx }, Duration::from_millis(50))
        .unwrap()
        .unwrap();
    router.start();

    // No traffic on channel 7: the deadline passes with the initial state.
    assert_eq!(expired_rx.recv_timeout(WAIT).unwrap(), "waiting");
    assert_eq!(events.recv_timeout(WAIT).unwrap(), Ev::Freed(7));

    // The channel is open again; traffic falls through to the defaults.
    remote.write_object(7, &"later".to_string(), true);
    assert_eq!(events.recv_timeout(WAIT).unwrap(), Ev::Object(7, "later".to_string()));
    assert!(expired_rx.try_recv().is_err());
}

#[test]
fn traffic_rearms_the_inactivity_deadline() {
    let (router, _events, remote, _raw) = rigged(&ChannelGroups::single());
    let (expired_tx, expired_rx) = unbounded();
    router
        .handle()
        .register_timed_fsm(7, Expiring { expired: expired_tx }, Duration::from_millis(120))
        .unwrap()
        .unwrap();
    router.start();

    for i in 0..4 {
        std::thread::sleep(Duration::from_millis(60));
        remote.write_object(7, &format!("beat-{i}"), true);
    }
    assert!(expired_rx.try_recv().is_err());

    assert_eq!(expired_rx.recv_timeout(WAIT).unwrap(), "beat-3");
}

#[test]
fn registration_rejects_bad_channels() {
    let groups = ChannelGroups::default().with_group([1, 2]);
    let (router, _events, _remote, _raw) = rigged(&groups);
    let handle = router.handle();

    let seen = Arc::new(Mutex::new(Vec::new()));
    assert_eq!(
        handle
            .register_fsm(40, Collect { seen: Arc::clone(&seen), limit: 1 })
            .unwrap_err(),
        RouterError::ChannelNotConfigured { channel: 40 }
    );

    handle
        .register_fsm(1, Collect { seen: Arc::clone(&seen), limit: 9 })
        .unwrap()
        .unwrap();
    assert_eq!(
        handle
            .register_fsm(1, Collect { seen: Arc::clone(&seen), limit: 9 })
            .unwrap_err(),
        RouterError::ChannelOccupied { channel: 1 }
    );
}

#[test]
fn registration_after_teardown_returns_none() {
    let (router, _events, _remote, _raw) = rigged(&ChannelGroups::single());
    router.start();
    router.disconnect();
    router.join();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let outcome = router
        .handle()
        .register_fsm(5, Collect { seen, limit: 1 })
        .unwrap();
    assert_eq!(outcome, None);
}

#[test]
fn paused_group_retains_frames_until_resume() {
    let (router, events, remote, _raw) = rigged(&ChannelGroups::single());
    router.start();

    router.pause(3).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    remote.write_object(3, &"held".to_string(), true);
    assert!(events.recv_timeout(Duration::from_millis(150)).is_err());

    router.resume(3).unwrap();
    assert_eq!(events.recv_timeout(WAIT).unwrap(), Ev::Object(3, "held".to_string()));
}

/// Opens the exchange from `init` and finishes on the first reply.
struct Opener {
    done: Sender<String>,
}

impl ChannelFsm<String> for Opener {
    type State = bool;

    fn init(&mut self, handle: &ConnectionHandle<String>) -> bool {
        handle.write_object(11, &"ping".to_string(), true);
        false
    }

    fn on_object(
        &mut self,
        _state: bool,
        _channel: u8,
        message: String,
        _handle: &ConnectionHandle<String>,
    ) -> Step<bool> {
        let _ = self.done.send(message);
        Step::Next(true)
    }

    fn on_data(
        &mut self,
        state: bool,
        _channel: u8,
        _data: Bytes,
        _handle: &ConnectionHandle<String>,
    ) -> Step<bool> {
        Step::Next(state)
    }

    fn is_final(&self, state: &bool, _handle: &ConnectionHandle<String>) -> bool {
        *state
    }
}

/// Replies to the opening message and finishes.
struct Responder;

impl ChannelFsm<String> for Responder {
    type State = bool;

    fn init(&mut self, _handle: &ConnectionHandle<String>) -> bool {
        false
    }

    fn on_object(
        &mut self,
        _state: bool,
        channel: u8,
        message: String,
        handle: &ConnectionHandle<String>,
    ) -> Step<bool> {
        handle.write_object(channel, &format!("{message}-pong"), true);
        Step::Next(true)
    }

    fn on_data(
        &mut self,
        state: bool,
        _channel: u8,
        _data: Bytes,
        _handle: &ConnectionHandle<String>,
    ) -> Step<bool> {
        Step::Next(state)
    }

    fn is_final(&self, state: &bool, _handle: &ConnectionHandle<String>) -> bool {
        *state
    }
}

#[test]
fn two_routers_complete_a_ping_pong_exchange() {
    let (left, right) = UnixStream::pair().unwrap();
    let left_framing =
        WireFraming::<String>::new("pp-left", left, WireConfig::default()).unwrap();
    let right_framing =
        WireFraming::<String>::new("pp-right", right, WireConfig::default()).unwrap();

    let (left_tx, left_rx) = unbounded();
    let (right_tx, right_rx) = unbounded();
    let left_router =
        ChannelRouter::new(left_framing, Arc::new(Recorder { tx: left_tx }), &ChannelGroups::single())
            .unwrap();
    let right_router = ChannelRouter::new(
        right_framing,
        Arc::new(Recorder { tx: right_tx }),
        &ChannelGroups::single(),
    )
    .unwrap();

    let (done_tx, done_rx) = unbounded();
    right_router.handle().register_fsm(11, Responder).unwrap().unwrap();
    right_router.start();
    left_router
        .handle()
        .register_fsm(11, Opener { done: done_tx })
        .unwrap()
        .unwrap();
    left_router.start();

    assert_eq!(done_rx.recv_timeout(WAIT).unwrap(), "ping-pong");
    assert_eq!(left_rx.recv_timeout(WAIT).unwrap(), Ev::Freed(11));
    assert_eq!(right_rx.recv_timeout(WAIT).unwrap(), Ev::Freed(11));
}
