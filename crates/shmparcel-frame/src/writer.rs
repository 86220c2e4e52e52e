use std::io::{ErrorKind, Write};
use std::os::fd::{AsFd, BorrowedFd};

use bytes::BytesMut;
use shmparcel_transport::{HandleStream, IpcStream};

use crate::error::{FrameError, Result};
use crate::packet::{encode_packet, PacketConfig};
use crate::parcel::Parcel;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete parcels, handles included, to a [`HandleStream`].
pub struct PacketWriter<T> {
    inner: T,
    buf: BytesMut,
    config: PacketConfig,
}

impl<T: HandleStream> PacketWriter<T> {
    /// Create a new packet writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    /// Create a new packet writer with explicit configuration.
    pub fn with_config(inner: T, config: PacketConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Send one parcel (blocking).
    ///
    /// The parcel's handles ride on the first chunk written; the remaining
    /// bytes follow as plain stream data.
    pub fn send(&mut self, parcel: &Parcel) -> Result<()> {
        if parcel.len() > self.config.max_parcel_size {
            return Err(FrameError::ParcelTooLarge {
                size: parcel.len(),
                max: self.config.max_parcel_size,
            });
        }
        if parcel.handle_count() > self.config.max_handles {
            return Err(FrameError::TooManyHandles {
                count: parcel.handle_count(),
                max: self.config.max_handles,
            });
        }

        self.buf.clear();
        encode_packet(parcel, &mut self.buf)?;

        let handles: Vec<BorrowedFd<'_>> = parcel.handles().iter().map(AsFd::as_fd).collect();
        let mut handles_sent = handles.is_empty();
        let mut offset = 0usize;
        while offset < self.buf.len() {
            let result = if handles_sent {
                self.inner.write(&self.buf[offset..])
            } else {
                self.inner.send_with_handles(&self.buf[offset..], &handles)
            };
            match result {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    offset += n;
                    handles_sent = true;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
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

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current packet writer configuration.
    pub fn config(&self) -> &PacketConfig {
        &self.config
    }
}

impl PacketWriter<IpcStream> {
    /// Create a packet writer for `IpcStream` and apply write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: PacketConfig) -> Result<Self> {
        inner.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
