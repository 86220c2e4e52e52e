use std::io::{Read, Write};
use std::os::fd::{BorrowedFd, OwnedFd};

use crate::error::Result;

/// A connected IPC stream. Implements Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// On Unix, this wraps a Unix domain socket stream, which can also carry
/// region handles as `SCM_RIGHTS` ancillary data.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

/// A byte stream that can also move file descriptors.
///
/// Descriptors attached to a write are delivered with the first byte of that
/// write on the receiving side.
pub trait HandleStream: Read + Write {
    /// Write some of `data`, attaching `handles` to the first byte written.
    ///
    /// Returns the number of data bytes written. Handles are sent exactly once
    /// per successful call; callers must not repeat them for the remainder.
    fn send_with_handles(&mut self, data: &[u8], handles: &[BorrowedFd<'_>])
        -> std::io::Result<usize>;

    /// Read some bytes into `buf`, appending any received descriptors to
    /// `handles`.
    fn recv_with_handles(
        &mut self,
        buf: &mut [u8],
        handles: &mut Vec<OwnedFd>,
    ) -> std::io::Result<usize>;
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

#[cfg(unix)]
impl HandleStream for IpcStream {
    fn send_with_handles(
        &mut self,
        data: &[u8],
        handles: &[BorrowedFd<'_>],
    ) -> std::io::Result<usize> {
        match &mut self.inner {
            IpcStreamInner::Unix(stream) => crate::ancillary::send_with_fds(stream, data, handles),
        }
    }

    fn recv_with_handles(
        &mut self,
        buf: &mut [u8],
        handles: &mut Vec<OwnedFd>,
    ) -> std::io::Result<usize> {
        match &mut self.inner {
            IpcStreamInner::Unix(stream) => crate::ancillary::recv_with_fds(stream, buf, handles),
        }
    }
}

impl IpcStream {
    /// Create an IpcStream from a Unix domain socket stream.
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Create a connected pair of streams (in-process socketpair).
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(a), Self::from_unix(b)))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => f.debug_struct("IpcStream").field("type", &"unix").finish(),
        }
    }
}
