//! Wire framing for a single multiplexed point-to-point connection.
//!
//! Every message on the wire is one discriminated, length-delimited frame:
//! - discriminator `0` — an object frame: 4-byte big-endian length, then the
//!   serialized object (which carries its channel inside the envelope)
//! - discriminator `1..=254` — a short data frame: that many payload bytes,
//!   the first of which is the channel id
//! - discriminator `255` — an extended data frame: a 16-bit big-endian length,
//!   with `0` escaping to a further 32-bit length
//!
//! Short messages cost one byte of overhead; larger ones three or seven.
//!
//! [`WireFraming`] owns the connection, tracks a single sticky error (the
//! first one wins) and whether a disconnect was locally requested.

pub mod codec;
pub mod error;
pub mod frame;
pub mod framing;
pub mod serializer;
pub mod stream;

pub use codec::{decode_frame, encode_data_frame, encode_object_frame, RawFrame, DEFAULT_MAX_PAYLOAD};
pub use error::{CommError, Result};
pub use frame::Frame;
pub use framing::{WireConfig, WireFraming};
pub use serializer::{JsonCodec, ObjectCodec};
pub use stream::ByteStream;
