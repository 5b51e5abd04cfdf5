//! Channel-multiplexed messaging over reliable byte streams.
//!
//! One TCP (or Unix-socket) connection carries 256 logical channels. Frames
//! are either serialized objects or raw byte arrays; each channel can run a
//! registered protocol state machine or fall through to connection-level
//! callbacks. Channels are scheduled in groups, so one busy channel never
//! stalls the rest of the connection.
//!
//! # Crate Structure
//!
//! - [`exec`] — Execution primitives: message pumps, sequential dispatcher,
//!   FSM driver, inactivity timer
//! - [`wire`] — Wire framing: frame encode/decode, object codec, the
//!   connection's read/write surface
//! - [`router`] — Channel routing, channel groups, per-channel FSMs
//! - [`net`] — TCP server and client plumbing

/// Re-export execution primitives.
pub mod exec {
    pub use chanmux_exec::*;
}

/// Re-export wire framing types.
pub mod wire {
    pub use chanmux_wire::*;
}

/// Re-export channel routing types.
pub mod router {
    pub use chanmux_router::*;
}

/// Re-export TCP plumbing.
pub mod net {
    pub use chanmux_net::*;
}
