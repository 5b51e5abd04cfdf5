use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CommError, Result};

/// Encodes and decodes the object-frame payload.
///
/// The payload is self-describing: it carries the destination channel along
/// with the message, so object frames route the same way data frames do.
/// Implementations that keep a type registry report unregistered types as
/// [`CommError::ClassCannotBeSerialized`].
pub trait ObjectCodec<M>: Send + Sync {
    fn encode(&self, channel: u8, message: &M) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<(u8, M)>;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, M: Serialize> {
    channel: u8,
    message: &'a M,
}

#[derive(Deserialize)]
struct Envelope<M> {
    channel: u8,
    message: M,
}

/// Default [`ObjectCodec`]: serde_json over a channel/message envelope.
pub struct JsonCodec<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M> JsonCodec<M> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M> Default for JsonCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ObjectCodec<M> for JsonCodec<M>
where
    M: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, channel: u8, message: &M) -> Result<Vec<u8>> {
        serde_json::to_vec(&EnvelopeRef { channel, message })
            .map_err(|err| CommError::WriteNonSerializableObject(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<(u8, M)> {
        let envelope: Envelope<M> = serde_json::from_slice(bytes)
            .map_err(|err| CommError::UnknownClassReceived(err.to_string()))?;
        Ok((envelope.channel, envelope.message))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
        note: String,
    }

    #[test]
    fn object_roundtrip_preserves_channel_and_value() {
        let codec = JsonCodec::<Ping>::new();
        let ping = Ping {
            seq: 7,
            note: "hello".to_string(),
        };

        let bytes = codec.encode(42, &ping).unwrap();
        let (channel, decoded) = codec.decode(&bytes).unwrap();

        assert_eq!(channel, 42);
        assert_eq!(decoded, ping);
    }

    #[test]
    fn garbage_bytes_report_unknown_class() {
        let codec = JsonCodec::<Ping>::new();
        let err = codec.decode(b"\x00\x01\x02").unwrap_err();
        assert!(matches!(err, CommError::UnknownClassReceived(_)));
    }

    #[test]
    fn mismatched_shape_reports_unknown_class() {
        let codec = JsonCodec::<Ping>::new();
        let err = codec.decode(b"{\"channel\":1,\"message\":{\"wrong\":true}}").unwrap_err();
        assert!(matches!(err, CommError::UnknownClassReceived(_)));
    }
}
