/// Errors raised at the framing boundary.
///
/// All of them are connection-fatal from the caller's point of view: none is
/// retried, and only the first one is retained on a connection (the sticky
/// error). Variants carry a detail string so the error stays cloneable for
/// the sticky slot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommError {
    /// An outgoing object could not be serialized.
    #[error("object cannot be serialized: {0}")]
    WriteNonSerializableObject(String),

    /// The codec refused the object's type (unregistered with the codec).
    #[error("type is not registered with the codec: {0}")]
    ClassCannotBeSerialized(String),

    /// An incoming object frame did not decode to a known type.
    #[error("unknown object received: {0}")]
    UnknownClassReceived(String),

    /// The underlying stream failed while writing.
    #[error("I/O failure while writing: {0}")]
    IoFailedWriting(String),

    /// The underlying stream failed while reading.
    #[error("I/O failure while reading: {0}")]
    IoFailedReading(String),
}

pub type Result<T> = std::result::Result<T, CommError>;
