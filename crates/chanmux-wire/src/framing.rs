use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{decode_frame, encode_data_frame, encode_object_frame, RawFrame, DEFAULT_MAX_PAYLOAD};
use crate::error::CommError;
use crate::frame::Frame;
use crate::serializer::{JsonCodec, ObjectCodec};
use crate::stream::ByteStream;

const READ_CHUNK_SIZE: usize = 8 * 1024;
const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Framing layer configuration.
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Maximum frame payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

struct ReadHalf {
    stream: Box<dyn Read + Send>,
    buf: BytesMut,
}

struct WriteHalf {
    stream: Box<dyn Write + Send>,
    buf: BytesMut,
}

struct Status {
    connected: bool,
    manually_disconnected: bool,
    error: Option<CommError>,
}

/// Owns one reliable byte-stream connection and converts it to and from
/// typed frames.
///
/// A disconnected framing layer cannot be reconnected; create a new one.
/// Writes on a disconnected connection are silently dropped. Only the first
/// error on the connection is retained.
pub struct WireFraming<M> {
    name: String,
    codec: Arc<dyn ObjectCodec<M>>,
    reader: Mutex<ReadHalf>,
    writer: Mutex<WriteHalf>,
    shutdown: Box<dyn Fn() -> std::io::Result<()> + Send + Sync>,
    status: Mutex<Status>,
    config: WireConfig,
}

impl<M> WireFraming<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Wrap a connected stream using the default JSON object codec.
    pub fn new<S: ByteStream>(name: &str, stream: S, config: WireConfig) -> std::io::Result<Self> {
        Self::with_codec(name, stream, JsonCodec::new(), config)
    }
}

impl<M> WireFraming<M> {
    /// Wrap a connected stream with an explicit object codec.
    pub fn with_codec<S: ByteStream>(
        name: &str,
        stream: S,
        codec: impl ObjectCodec<M> + 'static,
        config: WireConfig,
    ) -> std::io::Result<Self> {
        let read_stream = stream.try_clone()?;
        let shutdown_handle = stream.try_clone()?;
        Ok(Self {
            name: name.to_string(),
            codec: Arc::new(codec),
            reader: Mutex::new(ReadHalf {
                stream: Box::new(read_stream),
                buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            }),
            writer: Mutex::new(WriteHalf {
                stream: Box::new(stream),
                buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            }),
            shutdown: Box::new(move || shutdown_handle.shutdown()),
            status: Mutex::new(Status {
                connected: true,
                manually_disconnected: false,
                error: None,
            }),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialize and send one object frame. Returns the time spent writing.
    ///
    /// Dropped silently if the connection is already down; failures latch the
    /// sticky error without tearing the connection down by themselves.
    pub fn write_object(&self, channel: u8, message: &M, flush: bool) -> Duration {
        if !self.is_connected() {
            return Duration::ZERO;
        }
        let start = Instant::now();
        if let Err(err) = self.try_write_object(channel, message, flush) {
            self.latch_error(err);
        }
        start.elapsed()
    }

    /// Send one data frame on `channel`. Same contract as
    /// [`write_object`](Self::write_object).
    pub fn write_data(&self, channel: u8, data: &[u8], flush: bool) -> Duration {
        if !self.is_connected() {
            return Duration::ZERO;
        }
        let start = Instant::now();
        if let Err(err) = self.try_write_data(channel, data, flush) {
            self.latch_error(err);
        }
        start.elapsed()
    }

    /// Flush the underlying stream.
    pub fn flush(&self) -> Duration {
        if !self.is_connected() {
            return Duration::ZERO;
        }
        let start = Instant::now();
        let mut writer = self.lock_writer();
        if let Err(err) = flush_stream(&mut writer) {
            drop(writer);
            self.latch_error(err);
        }
        start.elapsed()
    }

    /// Block until the next frame arrives or the connection stops.
    ///
    /// Once the connection stops (remote close, error, or local disconnect)
    /// this returns [`Frame::Stop`], forever after.
    pub fn read(&self) -> Frame<M> {
        let mut reader = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if !self.is_connected() && reader.buf.is_empty() {
                return Frame::Stop;
            }
            match decode_frame(&mut reader.buf, self.config.max_payload_size) {
                Ok(Some(RawFrame::Object(payload))) => match self.codec.decode(&payload) {
                    Ok((channel, message)) => return Frame::Object { channel, message },
                    Err(err) => {
                        drop(reader);
                        return self.reader_failed(err);
                    }
                },
                Ok(Some(RawFrame::Data { channel, payload })) => {
                    return Frame::Data { channel, payload }
                }
                Ok(None) => {}
                Err(err) => {
                    drop(reader);
                    return self.reader_failed(err);
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            match reader.stream.read(&mut chunk) {
                Ok(0) => {
                    drop(reader);
                    return self.remote_closed();
                }
                Ok(n) => reader.buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    drop(reader);
                    if self.is_manually_disconnected() {
                        // The local disconnect closed the socket under us.
                        return self.remote_closed();
                    }
                    return self.reader_failed(CommError::IoFailedReading(err.to_string()));
                }
            }
        }
    }

    /// Close the connection from this side. Idempotent and thread-safe; safe
    /// to call from inside a state machine's transition.
    pub fn disconnect(&self) {
        let mut status = self.lock_status();
        if status.connected {
            status.connected = false;
            status.manually_disconnected = true;
            drop(status);
            debug!(conn = %self.name, "manual disconnect");
            if let Err(err) = (self.shutdown)() {
                debug!(conn = %self.name, %err, "shutdown after manual disconnect");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock_status().connected
    }

    /// True if the disconnect was requested locally.
    pub fn is_manually_disconnected(&self) -> bool {
        self.lock_status().manually_disconnected
    }

    /// The sticky error: the first error seen on this connection, if any.
    pub fn error(&self) -> Option<CommError> {
        self.lock_status().error.clone()
    }

    fn try_write_object(&self, channel: u8, message: &M, flush: bool) -> crate::error::Result<()> {
        let payload = self.codec.encode(channel, message)?;
        if payload.len() > self.config.max_payload_size {
            return Err(CommError::WriteNonSerializableObject(format!(
                "serialized object is {} bytes, max {}",
                payload.len(),
                self.config.max_payload_size
            )));
        }
        let mut writer = self.lock_writer();
        writer.buf.clear();
        let WriteHalf { buf, .. } = &mut *writer;
        encode_object_frame(&payload, buf)?;
        write_buffered(&mut writer, flush)
    }

    fn try_write_data(&self, channel: u8, data: &[u8], flush: bool) -> crate::error::Result<()> {
        if data.len() > self.config.max_payload_size {
            return Err(CommError::IoFailedWriting(format!(
                "data payload is {} bytes, max {}",
                data.len(),
                self.config.max_payload_size
            )));
        }
        let mut writer = self.lock_writer();
        writer.buf.clear();
        let WriteHalf { buf, .. } = &mut *writer;
        encode_data_frame(channel, data, buf)?;
        write_buffered(&mut writer, flush)
    }

    /// Record the first error on the connection; later ones are discarded.
    fn latch_error(&self, err: CommError) {
        let mut status = self.lock_status();
        if status.error.is_none() {
            warn!(conn = %self.name, %err, "sticky error latched");
            status.error = Some(err);
        }
    }

    fn reader_failed(&self, err: CommError) -> Frame<M> {
        self.latch_error(err);
        let mut status = self.lock_status();
        status.connected = false;
        drop(status);
        let _ = (self.shutdown)();
        Frame::Stop
    }

    fn remote_closed(&self) -> Frame<M> {
        let mut status = self.lock_status();
        if status.connected {
            status.connected = false;
            debug!(conn = %self.name, "remote end closed the connection");
        }
        Frame::Stop
    }

    fn lock_status(&self) -> MutexGuard<'_, Status> {
        self.status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_writer(&self) -> MutexGuard<'_, WriteHalf> {
        self.writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn write_buffered(writer: &mut WriteHalf, flush: bool) -> crate::error::Result<()> {
    let mut offset = 0usize;
    while offset < writer.buf.len() {
        match writer.stream.write(&writer.buf[offset..]) {
            Ok(0) => {
                return Err(CommError::IoFailedWriting(
                    "stream refused further bytes".to_string(),
                ))
            }
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(CommError::IoFailedWriting(err.to_string())),
        }
    }
    if flush {
        flush_stream(writer)?;
    }
    Ok(())
}

fn flush_stream(writer: &mut WriteHalf) -> crate::error::Result<()> {
    loop {
        match writer.stream.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(CommError::IoFailedWriting(err.to_string())),
        }
    }
}
