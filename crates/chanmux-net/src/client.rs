use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde::de::DeserializeOwned;
use serde::Serialize;

use chanmux_router::{ChannelGroups, ChannelRouter, ConnectionEvents, ConnectionHandle};
use chanmux_wire::{CommError, WireConfig, WireFraming};

use crate::error::{NetError, Result};

/// Open a TCP connection and run a started [`ChannelRouter`] over it.
pub fn connect<M>(
    addr: impl ToSocketAddrs,
    name: &str,
    events: Arc<dyn ConnectionEvents<M>>,
    groups: &ChannelGroups,
    config: WireConfig,
) -> Result<ChannelRouter<M>>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    let framing = WireFraming::new(name, stream, config)?;
    let router = ChannelRouter::new(framing, events, groups)?;
    router.start();
    Ok(router)
}

/// Sink for [`request`]: first object back on the wire wins.
struct OneShot<M> {
    tx: Sender<std::result::Result<M, NetError>>,
}

impl<M: Send + 'static> ConnectionEvents<M> for OneShot<M> {
    fn object_message(&self, _handle: &ConnectionHandle<M>, _channel: u8, message: M) {
        let _ = self.tx.try_send(Ok(message));
    }

    fn data_message(&self, _handle: &ConnectionHandle<M>, _channel: u8, _data: Bytes) {}

    fn disconnected(&self, _handle: &ConnectionHandle<M>, _expected: bool) {
        let _ = self.tx.try_send(Err(NetError::Closed));
    }

    fn error(&self, _handle: &ConnectionHandle<M>, _error: CommError) {
        let _ = self.tx.try_send(Err(NetError::Closed));
    }
}

/// One-shot exchange: connect, send `message` on `channel`, return the first
/// object that comes back.
pub fn request<M>(
    addr: impl ToSocketAddrs,
    channel: u8,
    message: &M,
    timeout: Duration,
) -> Result<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let (tx, rx) = bounded(1);
    let router = connect(
        addr,
        "request",
        Arc::new(OneShot { tx }),
        &ChannelGroups::single(),
        WireConfig::default(),
    )?;
    router.handle().write_object(channel, message, true);

    let reply = match rx.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => Err(NetError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(NetError::Closed),
    };
    router.disconnect();
    router.join();
    reply
}
