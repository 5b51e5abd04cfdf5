use bytes::Bytes;
use chanmux_wire::CommError;

use crate::handle::ConnectionHandle;

/// Connection-level event callbacks.
///
/// All callbacks for one connection run on a single dispatcher thread, in the
/// order the events were raised, never concurrently with each other. Blocking
/// inside a callback delays later events on the same connection but nothing
/// else.
pub trait ConnectionEvents<M>: Send + Sync {
    /// An object arrived on a channel with no registered state machine.
    fn object_message(&self, handle: &ConnectionHandle<M>, channel: u8, message: M);

    /// A data array arrived on a channel with no registered state machine.
    fn data_message(&self, handle: &ConnectionHandle<M>, channel: u8, data: Bytes);

    /// A channel's state machine detached; the channel is open for
    /// re-registration. Fired exactly once per registration that ends while
    /// the connection is up.
    fn channel_freed(&self, _handle: &ConnectionHandle<M>, _channel: u8) {}

    /// The connection ended without a prior error. `expected` is true when
    /// the disconnect was requested locally.
    fn disconnected(&self, handle: &ConnectionHandle<M>, expected: bool);

    /// The connection ended with an error; [`disconnected`] is not also
    /// fired.
    ///
    /// [`disconnected`]: ConnectionEvents::disconnected
    fn error(&self, handle: &ConnectionHandle<M>, error: CommError);
}
