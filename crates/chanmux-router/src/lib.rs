//! Channel routing on top of the wire framing layer.
//!
//! One [`ChannelRouter`] per connection reads frames off the wire and fans
//! them out across 256 logical channels. Channels are partitioned into
//! [`ChannelGroups`]; each group gets a bounded queue and a worker thread, so
//! a busy or blocked channel only stalls its own group. A channel either has
//! a registered state machine ([`ChannelFsm`], optionally [`TimedChannelFsm`]
//! with an inactivity deadline) that consumes its frames, or its frames fall
//! through to the default [`ConnectionEvents`] callbacks.
//!
//! [`ConnectionHandle`] is the cheap cloneable facade handed to callbacks and
//! state machines: write, disconnect, register.

pub mod adaptor;
pub mod error;
pub mod events;
pub mod groups;
pub mod handle;
pub mod router;

pub use adaptor::{ChannelFsm, TimedChannelFsm};
pub use chanmux_exec::Step;
pub use error::{Result, RouterError};
pub use events::ConnectionEvents;
pub use groups::ChannelGroups;
pub use handle::ConnectionHandle;
pub use router::{ChannelRouter, RegistrationId};
