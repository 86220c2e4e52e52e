//! Growable byte buffer with an out-of-band handle table.
//!
//! All integers are little-endian and fixed-width. Descriptors never appear
//! in the byte stream itself; the bytes carry an i32 index into the parcel's
//! handle table instead.

use std::os::fd::OwnedFd;

use bytes::{BufMut, BytesMut};
use shmparcel_transport::{RegionHandle, TransportError};

use crate::error::{FrameError, Result};

/// Length written in place of a byte array to mark it as null.
pub const NULL_LENGTH: i32 = -1;

/// A byte buffer plus the descriptors its bytes refer to.
#[derive(Debug, Default)]
pub struct Parcel {
    data: BytesMut,
    handles: Vec<OwnedFd>,
}

impl Parcel {
    /// Create an empty parcel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty parcel with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            handles: Vec::new(),
        }
    }

    /// Create a parcel holding a copy of `bytes` and no handles.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            handles: Vec::new(),
        }
    }

    /// Reassemble a parcel from bytes and the handles received with them.
    pub fn from_parts(data: BytesMut, handles: Vec<OwnedFd>) -> Self {
        Self { data, handles }
    }

    /// Split into bytes and handles.
    pub fn into_parts(self) -> (BytesMut, Vec<OwnedFd>) {
        (self.data, self.handles)
    }

    /// Number of bytes written so far; also the next write position.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn handles(&self) -> &[OwnedFd] {
        &self.handles
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.put_i32_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.put_i64_le(value);
    }

    /// Append bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }

    /// Append an i32 length followed by the bytes; `None` writes [`NULL_LENGTH`].
    pub fn write_byte_array(&mut self, bytes: Option<&[u8]>) -> Result<()> {
        match bytes {
            None => self.write_i32(NULL_LENGTH),
            Some(bytes) => {
                let len = i32::try_from(bytes.len()).map_err(|_| FrameError::ParcelTooLarge {
                    size: bytes.len(),
                    max: i32::MAX as usize,
                })?;
                self.data.reserve(4 + bytes.len());
                self.write_i32(len);
                self.write_raw(bytes);
            }
        }
        Ok(())
    }

    /// Append a UTF-8 string as a byte array.
    pub fn write_string(&mut self, value: Option<&str>) -> Result<()> {
        self.write_byte_array(value.map(str::as_bytes))
    }

    /// Overwrite the i32 at `offset`, which must already have been written.
    pub fn patch_i32(&mut self, offset: usize, value: i32) -> Result<()> {
        let end = offset.checked_add(4).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(FrameError::Truncated {
                offset,
                needed: 4,
                limit: self.data.len(),
            });
        };
        self.data[offset..end].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Drop every byte at or after `len`.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Close every handle at or after index `count`.
    pub fn truncate_handles(&mut self, count: usize) {
        self.handles.truncate(count);
    }

    /// Move a descriptor into the handle table, returning its index.
    pub fn push_handle(&mut self, fd: OwnedFd) -> Result<i32> {
        let index = i32::try_from(self.handles.len()).map_err(|_| FrameError::TooManyHandles {
            count: self.handles.len(),
            max: i32::MAX as usize,
        })?;
        self.handles.push(fd);
        Ok(index)
    }

    /// Write a region descriptor: i64 length, then an i32 handle index.
    pub fn write_region_descriptor(&mut self, handle: RegionHandle) -> Result<()> {
        let len = i64::try_from(handle.len()).map_err(|_| FrameError::ParcelTooLarge {
            size: handle.len(),
            max: i64::MAX as usize,
        })?;
        let index = self.push_handle(handle.into_owned_fd())?;
        self.write_i64(len);
        self.write_i32(index);
        Ok(())
    }

    /// Write an optional region handle: i32 presence flag, then the
    /// descriptor if present. The handle is duplicated into the table.
    pub fn write_region_handle(&mut self, handle: Option<&RegionHandle>) -> Result<()> {
        match handle {
            None => self.write_i32(0),
            Some(handle) => {
                let dup = handle.try_clone()?;
                self.write_i32(1);
                self.write_region_descriptor(dup)?;
            }
        }
        Ok(())
    }

    /// Borrow a reader positioned at the start of the parcel.
    pub fn reader(&self) -> ParcelReader<'_> {
        ParcelReader {
            data: &self.data,
            handles: &self.handles,
            position: 0,
            limit: self.data.len(),
        }
    }
}

/// Cursor over a parcel's bytes with a movable read limit.
#[derive(Debug)]
pub struct ParcelReader<'a> {
    data: &'a [u8],
    handles: &'a [OwnedFd],
    position: usize,
    limit: usize,
}

impl<'a> ParcelReader<'a> {
    pub fn position(&self) -> usize {
        self.position
    }

    /// Offset past which reads fail.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes left before the limit.
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Seek to `position`, which may not exceed the current limit.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.limit {
            return Err(FrameError::Truncated {
                offset: position,
                needed: 0,
                limit: self.limit,
            });
        }
        self.position = position;
        Ok(())
    }

    /// Replace the read limit, returning the previous one. The new limit is
    /// clamped to the parcel's length.
    pub fn set_limit(&mut self, limit: usize) -> usize {
        std::mem::replace(&mut self.limit, limit.min(self.data.len()))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.read_raw(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.read_raw(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(buf))
    }

    /// Read exactly `len` bytes with no length prefix.
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.limit)
            .ok_or(FrameError::Truncated {
                offset: self.position,
                needed: len,
                limit: self.limit,
            })?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a length-prefixed byte array; `None` for [`NULL_LENGTH`].
    pub fn read_byte_array(&mut self) -> Result<Option<&'a [u8]>> {
        match self.read_i32()? {
            NULL_LENGTH => Ok(None),
            len if len < 0 => Err(FrameError::MalformedPayload(format!(
                "negative byte array length {len}"
            ))),
            len => self.read_raw(len as usize).map(Some),
        }
    }

    /// Read a length-prefixed UTF-8 string; `None` for [`NULL_LENGTH`].
    pub fn read_string(&mut self) -> Result<Option<String>> {
        let Some(bytes) = self.read_byte_array()? else {
            return Ok(None);
        };
        std::str::from_utf8(bytes)
            .map(|s| Some(s.to_string()))
            .map_err(|err| FrameError::MalformedPayload(err.to_string()))
    }

    /// Duplicate the descriptor at `index` in the handle table.
    pub fn dup_handle(&self, index: i32) -> Result<OwnedFd> {
        let fd = usize::try_from(index)
            .ok()
            .and_then(|i| self.handles.get(i))
            .ok_or(FrameError::InvalidHandleIndex {
                index,
                count: self.handles.len(),
            })?;
        fd.try_clone()
            .map_err(|err| FrameError::Transport(TransportError::Duplicate(err)))
    }

    /// Read a region descriptor written by [`Parcel::write_region_descriptor`].
    pub fn read_region_descriptor(&mut self) -> Result<RegionHandle> {
        let len = self.read_i64()?;
        let len = usize::try_from(len).map_err(|_| FrameError::InvalidRegionLength(len))?;
        let index = self.read_i32()?;
        let fd = self.dup_handle(index)?;
        Ok(RegionHandle::from_owned_fd(fd, len)?)
    }

    /// Read an optional region handle written by [`Parcel::write_region_handle`].
    pub fn read_region_handle(&mut self) -> Result<Option<RegionHandle>> {
        match self.read_i32()? {
            0 => Ok(None),
            1 => self.read_region_descriptor().map(Some),
            other => Err(FrameError::InvalidRegionFlag(other)),
        }
    }
}
