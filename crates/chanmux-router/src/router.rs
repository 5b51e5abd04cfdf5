use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use chanmux_exec::{
    Feed, InactivityTimer, MessagePump, MessageSink, MessageSource, Pull, SequentialExecutor,
};
use chanmux_wire::{Frame, WireFraming};

use crate::adaptor::{AnyMachine, ChannelFsm, PlainMachine, TimedChannelFsm, TimedMachine};
use crate::error::{Result, RouterError};
use crate::events::ConnectionEvents;
use crate::groups::ChannelGroups;
use crate::handle::ConnectionHandle;

/// Per-group frame queue capacity. A full queue backpressures the reader.
const GROUP_QUEUE_CAPACITY: usize = 100;

/// Identifies one state-machine registration. A channel can be re-registered
/// after it is freed; the id tells the incarnations apart.
pub type RegistrationId = String;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Registration<M> {
    id: RegistrationId,
    machine: Arc<Mutex<Box<dyn AnyMachine<M>>>>,
    timer: Option<InactivityTimer>,
}

struct GroupRuntime<M> {
    tx: Sender<Frame<M>>,
    pump: MessagePump,
}

/// Shared state behind a [`ChannelRouter`] and its [`ConnectionHandle`]s.
pub(crate) struct RouterCore<M> {
    framing: Arc<WireFraming<M>>,
    events: Arc<dyn ConnectionEvents<M>>,
    handle_id: Arc<str>,
    channel_to_group: HashMap<u8, usize>,
    groups: Vec<GroupRuntime<M>>,
    registrations: Mutex<HashMap<u8, Registration<M>>>,
    dispatcher: SequentialExecutor,
    demux: MessagePump,
    /// Cleared once, at teardown. Gates event dispatch and new registrations.
    alive: AtomicBool,
    started: AtomicBool,
    weak_self: Weak<RouterCore<M>>,
}

/// Drives one connection: reads frames off the wire, fans them out to
/// channel groups, and feeds them to registered state machines or the
/// default callbacks.
///
/// One reader thread demultiplexes frames into per-group bounded queues;
/// one worker per group drains its queue in order. A slow or blocked channel
/// stalls only its own group. User-visible [`ConnectionEvents`] callbacks all
/// run on a single dispatcher thread, in order.
///
/// The router is created idle; [`start`](ChannelRouter::start) spawns the
/// workers. Dropping the router disconnects the underlying stream so the
/// worker threads wind down, but teardown callbacks only fire if the
/// disconnect (local or remote) happens while the router is alive.
pub struct ChannelRouter<M> {
    core: Arc<RouterCore<M>>,
}

impl<M: Send + 'static> ChannelRouter<M> {
    /// Build a router over a connected framing layer. The framing layer's
    /// name doubles as the connection id, so it should be unique per
    /// connection.
    pub fn new(
        framing: WireFraming<M>,
        events: Arc<dyn ConnectionEvents<M>>,
        groups: &ChannelGroups,
    ) -> Result<Self> {
        let partition = groups.resolve()?;
        let framing = Arc::new(framing);
        let handle_id: Arc<str> = Arc::from(framing.name());

        let core = Arc::new_cyclic(|weak: &Weak<RouterCore<M>>| {
            let mut channel_to_group = HashMap::new();
            let mut group_runtimes = Vec::new();
            for (index, channels) in partition.iter().enumerate() {
                let (tx, rx) = bounded(GROUP_QUEUE_CAPACITY);
                for &channel in channels {
                    channel_to_group.insert(channel, index);
                }
                let pump = MessagePump::new(
                    &format!("{handle_id}/group-{index}"),
                    QueueSource(rx),
                    GroupSink {
                        core: Weak::clone(weak),
                    },
                );
                group_runtimes.push(GroupRuntime { tx, pump });
            }
            let demux = MessagePump::new(
                &format!("{handle_id}/demux"),
                FramingSource {
                    framing: Arc::clone(&framing),
                },
                DemuxSink {
                    core: Weak::clone(weak),
                },
            );
            RouterCore {
                framing,
                events,
                handle_id: Arc::clone(&handle_id),
                channel_to_group,
                groups: group_runtimes,
                registrations: Mutex::new(HashMap::new()),
                dispatcher: SequentialExecutor::new(&format!("{handle_id}/events")),
                demux,
                alive: AtomicBool::new(true),
                started: AtomicBool::new(false),
                weak_self: Weak::clone(weak),
            }
        });

        Ok(Self { core })
    }

    /// Spawn the reader and group workers. Subsequent calls are no-ops.
    ///
    /// State machines that must see the very first frames on their channel
    /// should be registered before this.
    pub fn start(&self) {
        if !self.core.started.swap(true, Ordering::SeqCst) {
            for group in &self.core.groups {
                group.pump.start();
            }
            self.core.demux.start();
        }
    }

    /// A handle for this connection. Cheap; hand out as many as needed.
    pub fn handle(&self) -> ConnectionHandle<M> {
        self.core.handle()
    }

    /// Stop dequeuing frames for the group containing `channel`. Queued and
    /// newly arriving frames are retained, up to the group queue capacity.
    pub fn pause(&self, channel: u8) -> Result<()> {
        self.core.group_for(channel)?.pump.pause();
        Ok(())
    }

    /// Resume dequeuing frames for the group containing `channel`.
    pub fn resume(&self, channel: u8) -> Result<()> {
        self.core.group_for(channel)?.pump.resume();
        Ok(())
    }

    /// Close the connection from this side. Idempotent.
    pub fn disconnect(&self) {
        self.core.framing.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.core.framing.is_connected()
    }

    /// Wait until teardown has finished: all workers exited and every
    /// pending callback has run. Only meaningful after the connection has
    /// stopped.
    pub fn join(&self) {
        self.core.demux.join();
        for group in &self.core.groups {
            group.pump.join();
        }
        self.core.dispatcher.join();
    }
}

impl<M> Drop for ChannelRouter<M> {
    fn drop(&mut self) {
        self.core.framing.disconnect();
    }
}

impl<M: Send + 'static> RouterCore<M> {
    pub(crate) fn framing(&self) -> &WireFraming<M> {
        &self.framing
    }

    pub(crate) fn handle(&self) -> ConnectionHandle<M> {
        ConnectionHandle::new(Weak::clone(&self.weak_self), Arc::clone(&self.handle_id))
    }

    pub(crate) fn is_channel_registered(&self, channel: u8) -> bool {
        lock(&self.registrations).contains_key(&channel)
    }

    fn group_for(&self, channel: u8) -> Result<&GroupRuntime<M>> {
        self.channel_to_group
            .get(&channel)
            .map(|&index| &self.groups[index])
            .ok_or(RouterError::ChannelNotConfigured { channel })
    }

    /// Queue one callback for the dispatcher thread, regardless of the alive
    /// flag. Teardown uses this directly for its own closing events.
    fn submit_event(
        &self,
        f: impl FnOnce(&dyn ConnectionEvents<M>, &ConnectionHandle<M>) + Send + 'static,
    ) {
        let events = Arc::clone(&self.events);
        let handle = self.handle();
        self.dispatcher.submit(move || f(events.as_ref(), &handle));
    }

    /// Queue one callback for the dispatcher thread. Dropped once teardown
    /// has begun.
    fn dispatch(
        &self,
        f: impl FnOnce(&dyn ConnectionEvents<M>, &ConnectionHandle<M>) + Send + 'static,
    ) {
        if self.alive.load(Ordering::SeqCst) {
            self.submit_event(f);
        }
    }

    pub(crate) fn register_plain<F>(&self, channel: u8, fsm: F) -> Result<Option<RegistrationId>>
    where
        F: ChannelFsm<M> + 'static,
    {
        let machine: Box<dyn AnyMachine<M>> = Box::new(PlainMachine::new(fsm, self.handle()));
        self.install(channel, machine, None)
    }

    pub(crate) fn register_timed<F>(
        &self,
        channel: u8,
        fsm: F,
        timeout: Duration,
    ) -> Result<Option<RegistrationId>>
    where
        F: TimedChannelFsm<M> + 'static,
    {
        let machine: Box<dyn AnyMachine<M>> = Box::new(TimedMachine::new(fsm, self.handle()));
        self.install(channel, machine, Some(timeout))
    }

    /// Insert a machine into the table and run its `init`.
    ///
    /// The machine mutex is held from before the table insert until `init`
    /// has finished, so a frame that arrives concurrently blocks on the
    /// machine until the initial state exists. The table lock itself is not
    /// held across `init`.
    fn install(
        &self,
        channel: u8,
        machine: Box<dyn AnyMachine<M>>,
        timeout: Option<Duration>,
    ) -> Result<Option<RegistrationId>> {
        if !self.channel_to_group.contains_key(&channel) {
            return Err(RouterError::ChannelNotConfigured { channel });
        }
        let id = machine.id().to_string();
        let machine = Arc::new(Mutex::new(machine));
        let mut guard = lock(&machine);
        {
            let mut table = lock(&self.registrations);
            if !self.alive.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if table.contains_key(&channel) {
                return Err(RouterError::ChannelOccupied { channel });
            }
            table.insert(
                channel,
                Registration {
                    id: id.clone(),
                    machine: Arc::clone(&machine),
                    timer: None,
                },
            );
        }
        let feed = guard.start();
        drop(guard);

        match feed {
            Feed::Active => {
                if let Some(timeout) = timeout {
                    self.arm_timer(channel, &id, timeout);
                }
                debug!(conn = %self.handle_id, channel, fsm = %id, "state machine attached");
            }
            Feed::Finished => {
                debug!(conn = %self.handle_id, channel, fsm = %id, "final on init");
                self.detach_completed(channel, &id);
            }
            Feed::Aborted(reason) => {
                warn!(conn = %self.handle_id, channel, fsm = %id, %reason, "aborted on init");
                self.detach_completed(channel, &id);
                self.framing.disconnect();
            }
        }
        Ok(Some(id))
    }

    fn arm_timer(&self, channel: u8, id: &RegistrationId, timeout: Duration) {
        let weak = Weak::clone(&self.weak_self);
        let timer_id = id.clone();
        let timer = InactivityTimer::start(
            &format!("{}/timer-ch{channel}", self.handle_id),
            timeout,
            move || {
                if let Some(core) = weak.upgrade() {
                    core.timed_out(channel, &timer_id);
                }
            },
        );
        let mut table = lock(&self.registrations);
        match table.get_mut(&channel) {
            // Attach only if this registration is still the current one.
            Some(registration) if registration.id == *id => registration.timer = Some(timer),
            _ => timer.cancel(),
        }
    }

    /// Fan one decoded frame out to its group queue. Runs on the reader
    /// thread; blocks when the group queue is full.
    fn route_to_group(&self, frame: Frame<M>) {
        let Some(channel) = frame.channel() else {
            return;
        };
        match self.channel_to_group.get(&channel) {
            Some(&index) => {
                let _ = self.groups[index].tx.send(frame);
            }
            None => {
                warn!(conn = %self.handle_id, channel, "frame for unconfigured channel dropped");
            }
        }
    }

    /// Process one frame on its group worker: feed the registered machine,
    /// or raise the default callback if the channel has none.
    fn handle_incoming(&self, frame: Frame<M>) {
        let Some(channel) = frame.channel() else {
            return;
        };
        let registration = {
            let table = lock(&self.registrations);
            table.get(&channel).map(|registration| {
                (
                    registration.id.clone(),
                    Arc::clone(&registration.machine),
                    registration.timer.clone(),
                )
            })
        };
        let Some((id, machine, timer)) = registration else {
            match frame {
                Frame::Object { channel, message } => self.dispatch(move |events, handle| {
                    events.object_message(handle, channel, message);
                }),
                Frame::Data { channel, payload } => self.dispatch(move |events, handle| {
                    events.data_message(handle, channel, payload);
                }),
                Frame::Stop => {}
            }
            return;
        };

        let feed = {
            let mut machine = lock(&machine);
            if machine.is_active() {
                Some(machine.feed(frame))
            } else {
                // Lost the race against a timeout or teardown.
                None
            }
        };
        match feed {
            Some(Feed::Active) => {
                if let Some(timer) = timer {
                    timer.rearm();
                }
            }
            Some(Feed::Finished) => {
                debug!(conn = %self.handle_id, channel, fsm = %id, "reached final state");
                self.detach_completed(channel, &id);
            }
            Some(Feed::Aborted(reason)) => {
                warn!(conn = %self.handle_id, channel, fsm = %id, %reason, "transition aborted");
                self.detach_completed(channel, &id);
                self.framing.disconnect();
            }
            None => {}
        }
    }

    /// Remove a finished or aborted registration and announce the free
    /// channel. A stale id (the channel was already re-registered) is a
    /// no-op, so competing termination paths free a registration once.
    fn detach_completed(&self, channel: u8, id: &RegistrationId) {
        let mut table = lock(&self.registrations);
        let current = table
            .get(&channel)
            .is_some_and(|registration| registration.id == *id);
        if !current {
            return;
        }
        if let Some(registration) = table.remove(&channel) {
            if let Some(timer) = &registration.timer {
                timer.cancel();
            }
            self.dispatch(move |events, handle| events.channel_freed(handle, channel));
        }
    }

    /// Inactivity expiry for one registration. Detaches it, frees the
    /// channel, and fires the machine's timeout hook with its last state.
    fn timed_out(&self, channel: u8, id: &RegistrationId) {
        let expired = {
            let mut table = lock(&self.registrations);
            let current = table
                .get(&channel)
                .is_some_and(|registration| registration.id == *id);
            if !current {
                None
            } else {
                table.remove(&channel).and_then(|registration| {
                    // Latch inactive while the table lock still pins this
                    // registration, so a concurrent feed sees it dead.
                    let won = lock(&registration.machine).deactivate();
                    if let Some(timer) = &registration.timer {
                        timer.cancel();
                    }
                    self.dispatch(move |events, handle| events.channel_freed(handle, channel));
                    won.then_some(registration.machine)
                })
            }
        };
        if let Some(machine) = expired {
            debug!(conn = %self.handle_id, channel, fsm = %id, "inactivity timeout");
            lock(&machine).fire_timed_out();
        }
    }

    /// The reader saw the connection stop. Runs once, on the reader thread.
    ///
    /// Detaches every remaining machine, freeing its channel like any other
    /// detach, then raises the terminal callback (error if one latched,
    /// otherwise disconnected) as the last event before the dispatcher winds
    /// down. Queued frames still in group queues are drained but find no
    /// active machines.
    fn reader_stopped(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            let drained: Vec<(u8, Registration<M>)> = {
                let mut table = lock(&self.registrations);
                table.drain().collect()
            };
            for (channel, registration) in drained {
                if let Some(timer) = &registration.timer {
                    timer.cancel();
                }
                {
                    let mut machine = lock(&registration.machine);
                    if machine.deactivate() {
                        machine.fire_disconnected();
                    }
                }
                self.submit_event(move |events, handle| events.channel_freed(handle, channel));
            }

            if let Some(error) = self.framing.error() {
                warn!(conn = %self.handle_id, %error, "connection failed");
                self.submit_event(move |events, handle| events.error(handle, error));
            } else {
                let expected = self.framing.is_manually_disconnected();
                debug!(conn = %self.handle_id, expected, "connection closed");
                self.submit_event(move |events, handle| events.disconnected(handle, expected));
            }
            self.dispatcher.shutdown();
        }

        // Unblock paused groups and push the stop sentinel through each
        // queue so every group worker exits after draining.
        for group in &self.groups {
            group.pump.resume();
            let _ = group.tx.send(Frame::Stop);
        }
    }
}

struct FramingSource<M> {
    framing: Arc<WireFraming<M>>,
}

impl<M: Send> MessageSource<Frame<M>> for FramingSource<M> {
    fn pull(&mut self) -> Pull<Frame<M>> {
        match self.framing.read() {
            Frame::Stop => Pull::Stopped,
            frame => Pull::Item(frame),
        }
    }
}

struct DemuxSink<M> {
    core: Weak<RouterCore<M>>,
}

impl<M: Send + 'static> MessageSink<Frame<M>> for DemuxSink<M> {
    fn deliver(&mut self, frame: Frame<M>) {
        if let Some(core) = self.core.upgrade() {
            core.route_to_group(frame);
        }
    }

    fn stopped(&mut self) {
        if let Some(core) = self.core.upgrade() {
            core.reader_stopped();
        }
    }
}

struct QueueSource<M>(Receiver<Frame<M>>);

impl<M: Send> MessageSource<Frame<M>> for QueueSource<M> {
    fn pull(&mut self) -> Pull<Frame<M>> {
        match self.0.recv() {
            Ok(Frame::Stop) | Err(_) => Pull::Stopped,
            Ok(frame) => Pull::Item(frame),
        }
    }
}

struct GroupSink<M> {
    core: Weak<RouterCore<M>>,
}

impl<M: Send + 'static> MessageSink<Frame<M>> for GroupSink<M> {
    fn deliver(&mut self, frame: Frame<M>) {
        if let Some(core) = self.core.upgrade() {
            core.handle_incoming(frame);
        }
    }
}
