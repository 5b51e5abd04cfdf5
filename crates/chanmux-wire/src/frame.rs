use bytes::Bytes;

/// One unit of transfer between the framing layer and the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<M> {
    /// A deserialized object, tagged with its channel.
    Object { channel: u8, message: M },
    /// A raw byte array, tagged with its channel.
    Data { channel: u8, payload: Bytes },
    /// Sentinel: the connection has stopped; no further frames will arrive.
    Stop,
}

impl<M> Frame<M> {
    /// The destination channel, if this is not the stop sentinel.
    pub fn channel(&self) -> Option<u8> {
        match self {
            Frame::Object { channel, .. } | Frame::Data { channel, .. } => Some(*channel),
            Frame::Stop => None,
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Frame::Stop)
    }
}
