use bytes::Bytes;
use chanmux_exec::{Automaton, Feed, FsmExecutor, Step};
use chanmux_wire::Frame;

use crate::handle::ConnectionHandle;

/// A per-channel protocol state machine.
///
/// The router feeds every frame addressed to the machine's channel through
/// `on_object`/`on_data`, one at a time, in arrival order. `init` runs before
/// any frame for the channel is processed. After `init` and after every
/// transition the router checks `is_final` and detaches the machine once it
/// holds, freeing the channel.
///
/// Transitions may write through the handle and may call
/// [`ConnectionHandle::disconnect`]; returning [`Step::Abort`] detaches the
/// machine and tears the connection down.
pub trait ChannelFsm<M>: Send {
    type State: Send;

    fn init(&mut self, handle: &ConnectionHandle<M>) -> Self::State;

    fn on_object(
        &mut self,
        state: Self::State,
        channel: u8,
        message: M,
        handle: &ConnectionHandle<M>,
    ) -> Step<Self::State>;

    fn on_data(
        &mut self,
        state: Self::State,
        channel: u8,
        data: Bytes,
        handle: &ConnectionHandle<M>,
    ) -> Step<Self::State>;

    fn is_final(&self, state: &Self::State, handle: &ConnectionHandle<M>) -> bool;

    /// The connection went down while this machine was still attached.
    fn on_disconnected(&mut self, _handle: &ConnectionHandle<M>) {}
}

/// A [`ChannelFsm`] with an inactivity deadline.
///
/// The deadline re-arms on every processed frame. If it passes without
/// traffic the machine is detached and `timed_out` fires with the state the
/// machine held at that moment.
pub trait TimedChannelFsm<M>: ChannelFsm<M> {
    fn timed_out(&mut self, state: Self::State, handle: &ConnectionHandle<M>);
}

/// Adapts a [`ChannelFsm`] to the generic [`Automaton`] shape.
pub(crate) struct FsmBridge<M, F: ChannelFsm<M>> {
    logic: F,
    handle: ConnectionHandle<M>,
}

impl<M, F: ChannelFsm<M>> FsmBridge<M, F> {
    pub(crate) fn new(logic: F, handle: ConnectionHandle<M>) -> Self {
        Self { logic, handle }
    }
}

impl<M, F: TimedChannelFsm<M>> FsmBridge<M, F> {
    fn fire_timed_out(&mut self, state: F::State) {
        let handle = self.handle.clone();
        self.logic.timed_out(state, &handle);
    }
}

impl<M: Send, F: ChannelFsm<M>> Automaton for FsmBridge<M, F> {
    type State = F::State;
    type Input = Frame<M>;

    fn init(&mut self) -> F::State {
        self.logic.init(&self.handle)
    }

    fn step(&mut self, state: F::State, input: Frame<M>) -> Step<F::State> {
        match input {
            Frame::Object { channel, message } => {
                self.logic.on_object(state, channel, message, &self.handle)
            }
            Frame::Data { channel, payload } => {
                self.logic.on_data(state, channel, payload, &self.handle)
            }
            // The stop sentinel is consumed by the group worker, never fed.
            Frame::Stop => Step::Next(state),
        }
    }

    fn is_final(&self, state: &F::State) -> bool {
        self.logic.is_final(state, &self.handle)
    }

    fn stopped(&mut self) {
        self.logic.on_disconnected(&self.handle);
    }
}

/// Type-erased registered machine, so the router can hold machines with
/// different state types in one table.
pub(crate) trait AnyMachine<M>: Send {
    fn id(&self) -> &str;
    fn start(&mut self) -> Feed;
    fn feed(&mut self, frame: Frame<M>) -> Feed;
    fn is_active(&self) -> bool;
    /// Latch inactive; true if this call made the transition. Exactly one
    /// termination path observes true.
    fn deactivate(&mut self) -> bool;
    fn fire_disconnected(&mut self);
    fn fire_timed_out(&mut self);
}

pub(crate) struct PlainMachine<M: Send, F: ChannelFsm<M>> {
    exec: FsmExecutor<FsmBridge<M, F>>,
}

impl<M: Send, F: ChannelFsm<M>> PlainMachine<M, F> {
    pub(crate) fn new(logic: F, handle: ConnectionHandle<M>) -> Self {
        Self {
            exec: FsmExecutor::new("fsm", FsmBridge::new(logic, handle)),
        }
    }
}

impl<M: Send, F: ChannelFsm<M>> AnyMachine<M> for PlainMachine<M, F> {
    fn id(&self) -> &str {
        self.exec.id()
    }

    fn start(&mut self) -> Feed {
        self.exec.start()
    }

    fn feed(&mut self, frame: Frame<M>) -> Feed {
        self.exec.feed(frame)
    }

    fn is_active(&self) -> bool {
        self.exec.is_active()
    }

    fn deactivate(&mut self) -> bool {
        self.exec.deactivate()
    }

    fn fire_disconnected(&mut self) {
        self.exec.fire_stopped();
    }

    fn fire_timed_out(&mut self) {}
}

pub(crate) struct TimedMachine<M: Send, F: TimedChannelFsm<M>> {
    exec: FsmExecutor<FsmBridge<M, F>>,
}

impl<M: Send, F: TimedChannelFsm<M>> TimedMachine<M, F> {
    pub(crate) fn new(logic: F, handle: ConnectionHandle<M>) -> Self {
        Self {
            exec: FsmExecutor::new("timed-fsm", FsmBridge::new(logic, handle)),
        }
    }
}

impl<M: Send, F: TimedChannelFsm<M>> AnyMachine<M> for TimedMachine<M, F> {
    fn id(&self) -> &str {
        self.exec.id()
    }

    fn start(&mut self) -> Feed {
        self.exec.start()
    }

    fn feed(&mut self, frame: Frame<M>) -> Feed {
        self.exec.feed(frame)
    }

    fn is_active(&self) -> bool {
        self.exec.is_active()
    }

    fn deactivate(&mut self) -> bool {
        self.exec.deactivate()
    }

    fn fire_disconnected(&mut self) {
        self.exec.fire_stopped();
    }

    fn fire_timed_out(&mut self) {
        if let Some(state) = self.exec.take_state() {
            self.exec.automaton_mut().fire_timed_out(state);
        }
    }
}
