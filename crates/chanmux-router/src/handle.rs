use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::adaptor::{ChannelFsm, TimedChannelFsm};
use crate::error::Result;
use crate::router::{RegistrationId, RouterCore};

/// Cheap, cloneable reference to one connection.
///
/// Handles are handed to every callback and state machine, and are valid to
/// use from any thread. Operations on a connection that has already gone away
/// degrade the same way operations on a disconnected one do: writes are
/// dropped, registrations return `Ok(None)`.
///
/// Equality and hashing follow the connection id, so handles work as map keys
/// for tracking connected peers.
pub struct ConnectionHandle<M> {
    core: Weak<RouterCore<M>>,
    id: Arc<str>,
}

impl<M> ConnectionHandle<M> {
    pub(crate) fn new(core: Weak<RouterCore<M>>, id: Arc<str>) -> Self {
        Self { core, id }
    }

    /// Unique id of the underlying connection.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<M: Send + 'static> ConnectionHandle<M> {
    /// Serialize and send an object on `channel`, flushing afterwards.
    /// Returns the time spent writing; zero if the connection is down.
    pub fn write_object(&self, channel: u8, message: &M, flush: bool) -> Duration {
        match self.core.upgrade() {
            Some(core) => core.framing().write_object(channel, message, flush),
            None => Duration::ZERO,
        }
    }

    /// Send a byte array on `channel`. Same contract as
    /// [`write_object`](Self::write_object).
    pub fn write_data(&self, channel: u8, data: &[u8], flush: bool) -> Duration {
        match self.core.upgrade() {
            Some(core) => core.framing().write_data(channel, data, flush),
            None => Duration::ZERO,
        }
    }

    /// Flush buffered writes to the wire.
    pub fn flush(&self) -> Duration {
        match self.core.upgrade() {
            Some(core) => core.framing().flush(),
            None => Duration::ZERO,
        }
    }

    /// Close the connection from this side. Idempotent; safe to call from
    /// inside a state machine transition or a callback.
    pub fn disconnect(&self) {
        if let Some(core) = self.core.upgrade() {
            core.framing().disconnect();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.core
            .upgrade()
            .is_some_and(|core| core.framing().is_connected())
    }

    /// True if `channel` currently has a registered state machine.
    pub fn is_channel_registered(&self, channel: u8) -> bool {
        self.core
            .upgrade()
            .is_some_and(|core| core.is_channel_registered(channel))
    }

    /// Attach a state machine to `channel`.
    ///
    /// `init` completes before the machine sees any frame; a frame racing
    /// with the registration waits until the initial state exists. Frames
    /// already handed to the default callbacks are not replayed. Returns the
    /// registration id, or `Ok(None)` if the connection is already down.
    pub fn register_fsm<F>(&self, channel: u8, fsm: F) -> Result<Option<RegistrationId>>
    where
        F: ChannelFsm<M> + 'static,
    {
        match self.core.upgrade() {
            Some(core) => core.register_plain(channel, fsm),
            None => Ok(None),
        }
    }

    /// Attach a state machine with an inactivity deadline to `channel`.
    ///
    /// The deadline re-arms on every frame the machine processes; if it
    /// passes in silence the machine is detached and its
    /// [`timed_out`](TimedChannelFsm::timed_out) hook fires.
    pub fn register_timed_fsm<F>(
        &self,
        channel: u8,
        fsm: F,
        timeout: Duration,
    ) -> Result<Option<RegistrationId>>
    where
        F: TimedChannelFsm<M> + 'static,
    {
        match self.core.upgrade() {
            Some(core) => core.register_timed(channel, fsm, timeout),
            None => Ok(None),
        }
    }
}

impl<M> Clone for ConnectionHandle<M> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
            id: Arc::clone(&self.id),
        }
    }
}

impl<M> PartialEq for ConnectionHandle<M> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<M> Eq for ConnectionHandle<M> {}

impl<M> Hash for ConnectionHandle<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<M> std::fmt::Debug for ConnectionHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .finish()
    }
}
