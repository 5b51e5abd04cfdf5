use std::io::{Read, Write};

/// An ordered, reliable, bidirectional byte channel.
///
/// `try_clone` must produce an independent handle to the same underlying
/// connection (both halves observe the same shutdown), which is how the
/// framing layer splits reading and writing across threads.
pub trait ByteStream: Read + Write + Send + Sync + 'static {
    fn try_clone(&self) -> std::io::Result<Self>
    where
        Self: Sized;

    /// Close both directions, unblocking any in-flight read.
    fn shutdown(&self) -> std::io::Result<()>;
}

impl ByteStream for std::net::TcpStream {
    fn try_clone(&self) -> std::io::Result<Self> {
        std::net::TcpStream::try_clone(self)
    }

    fn shutdown(&self) -> std::io::Result<()> {
        std::net::TcpStream::shutdown(self, std::net::Shutdown::Both)
    }
}

#[cfg(unix)]
impl ByteStream for std::os::unix::net::UnixStream {
    fn try_clone(&self) -> std::io::Result<Self> {
        std::os::unix::net::UnixStream::try_clone(self)
    }

    fn shutdown(&self) -> std::io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, std::net::Shutdown::Both)
    }
}
