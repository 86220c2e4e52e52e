use std::collections::VecDeque;
use std::io::ErrorKind;
use std::os::fd::OwnedFd;

use bytes::BytesMut;
use shmparcel_transport::{HandleStream, IpcStream};

use crate::error::{FrameError, Result};
use crate::packet::{decode_packet, PacketConfig};
use crate::parcel::Parcel;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete parcels, handles included, from a [`HandleStream`].
///
/// Partial reads are buffered internally; callers always get complete parcels.
pub struct PacketReader<T> {
    inner: T,
    buf: BytesMut,
    handles: VecDeque<OwnedFd>,
    config: PacketConfig,
}

impl<T: HandleStream> PacketReader<T> {
    /// Create a new packet reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    /// Create a new packet reader with explicit configuration.
    pub fn with_config(inner: T, config: PacketConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            handles: VecDeque::new(),
            config,
        }
    }

    /// Read the next complete parcel (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_parcel(&mut self) -> Result<Parcel> {
        loop {
            if let Some(parcel) = decode_packet(&mut self.buf, &mut self.handles, &self.config)? {
                return Ok(parcel);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let mut received = Vec::new();
            let read = match self.inner.recv_with_handles(&mut chunk, &mut received) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };
            self.handles.extend(received);

            if self.handles.len() > self.config.max_handles {
                return Err(FrameError::TooManyHandles {
                    count: self.handles.len(),
                    max: self.config.max_handles,
                });
            }
            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    ///
    /// Buffered bytes and unclaimed handles are dropped.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current packet reader configuration.
    pub fn config(&self) -> &PacketConfig {
        &self.config
    }
}

impl PacketReader<IpcStream> {
    /// Create a packet reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: PacketConfig) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
