//! TCP plumbing for channel-multiplexed connections: a threaded accept loop
//! that runs one [`ChannelRouter`](chanmux_router::ChannelRouter) per client,
//! a registry of connected clients, and client-side connect helpers.

pub mod client;
pub mod clients;
pub mod error;
pub mod server;

pub use client::{connect, request};
pub use clients::ConnectedClients;
pub use error::{NetError, Result};
pub use server::{ServerHandler, TcpServer};
