//! memfd-backed shared regions.
//!
//! A region starts writable, is filled through a writable mapping, and is then
//! sealed with `F_SEAL_WRITE` (plus shrink/grow/seal) before any handle to it
//! leaves the process. The kernel enforces the seal: after it is applied no
//! process can create a writable shared mapping of the region.

use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::fs::MetadataExt;

use memmap2::{Mmap, MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, SealFlag};
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use tracing::{debug, trace};

use crate::error::{Result, TransportError};

/// Default memfd name (visible in `/proc/<pid>/fd` listings only).
pub const DEFAULT_REGION_NAME: &str = "shmparcel";

/// Seals applied when a region is downgraded to read-only, and required of
/// every region opened from a received handle.
const READ_ONLY_SEALS: SealFlag = SealFlag::F_SEAL_SHRINK
    .union(SealFlag::F_SEAL_GROW)
    .union(SealFlag::F_SEAL_WRITE)
    .union(SealFlag::F_SEAL_SEAL);

/// Identity of the memory object behind a region.
///
/// Every duplicate of one region reports the same id; two distinct regions
/// never do while both are alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId {
    pub dev: u64,
    pub ino: u64,
}

impl RegionId {
    fn of(file: &File) -> Result<Self> {
        let metadata = file.metadata()?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{}", self.dev, self.ino)
    }
}

/// A duplicated descriptor for a region plus its byte length.
///
/// Handles are what travel inside frames. Each one owns its descriptor and
/// closes it on drop, independently of the region it was duplicated from.
#[derive(Debug)]
pub struct RegionHandle {
    file: File,
    len: usize,
    id: RegionId,
}

impl RegionHandle {
    /// Wrap a descriptor received from another process.
    pub fn from_owned_fd(fd: OwnedFd, len: usize) -> Result<Self> {
        let file = File::from(fd);
        let id = RegionId::of(&file)?;
        Ok(Self { file, len, id })
    }

    /// Declared length of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the declared length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Identity of the underlying memory object.
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Duplicate this handle (new descriptor, same region).
    pub fn try_clone(&self) -> Result<Self> {
        let file = self.file.try_clone().map_err(TransportError::Duplicate)?;
        Ok(Self {
            file,
            len: self.len,
            id: self.id,
        })
    }

    /// Give up the descriptor, e.g. to place it in a handle table.
    pub fn into_owned_fd(self) -> OwnedFd {
        OwnedFd::from(self.file)
    }
}

impl PartialEq for RegionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.len == other.len
    }
}

impl Eq for RegionHandle {}

impl AsFd for RegionHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for RegionHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// An OS shared-memory block: writable until sealed, read-only afterwards.
#[derive(Debug)]
pub struct SharedRegion {
    file: Option<File>,
    len: usize,
    id: RegionId,
    sealed: bool,
}

impl SharedRegion {
    /// Create a writable, zero-filled region of `len` bytes.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(TransportError::RegionCreate {
                len,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "shared region must not be empty",
                ),
            });
        }

        let c_name = CString::new(name).map_err(|_| TransportError::RegionCreate {
            len,
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "region name contains a NUL byte",
            ),
        })?;

        let fd = memfd_create(
            &c_name,
            MemFdCreateFlag::MFD_CLOEXEC | MemFdCreateFlag::MFD_ALLOW_SEALING,
        )
        .map_err(|errno| TransportError::RegionCreate {
            len,
            source: errno.into(),
        })?;
        let file = File::from(fd);

        file.set_len(len as u64)
            .map_err(|source| TransportError::RegionCreate { len, source })?;
        let id = RegionId::of(&file)?;

        debug!(%id, len, "created shared region");
        Ok(Self {
            file: Some(file),
            len,
            id,
            sealed: false,
        })
    }

    /// Create a region holding a copy of `bytes`, already sealed.
    ///
    /// No unsealed region is ever returned: if sealing fails the region is
    /// closed and the error is propagated.
    pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Self> {
        let mut region = Self::create(name, bytes.len())?;
        {
            let mut map = region.map_write()?;
            map.copy_from_slice(bytes);
        }
        if let Err(err) = region.seal() {
            region.close();
            return Err(err);
        }
        Ok(region)
    }

    /// Open a region from a received handle, read-only.
    ///
    /// The handle must refer to a memfd carrying every read-only seal (write,
    /// grow, shrink, seal) and at least `handle.len()` bytes long. Without
    /// `F_SEAL_SHRINK` the sender could truncate the region under a live
    /// mapping, turning reads into `SIGBUS`.
    pub fn open(handle: RegionHandle) -> Result<Self> {
        let seals = match fcntl(handle.file.as_raw_fd(), FcntlArg::F_GET_SEALS) {
            Ok(bits) => SealFlag::from_bits_truncate(bits),
            Err(Errno::EINVAL) => return Err(TransportError::NotSealed),
            Err(errno) => return Err(TransportError::Seal(errno.into())),
        };
        if !seals.contains(READ_ONLY_SEALS) {
            return Err(TransportError::NotSealed);
        }

        let actual = handle.file.metadata()?.len() as usize;
        if handle.len == 0 || actual < handle.len {
            return Err(TransportError::LengthMismatch {
                declared: handle.len,
                actual,
            });
        }

        trace!(id = %handle.id, len = handle.len, "opened shared region");
        Ok(Self {
            file: Some(handle.file),
            len: handle.len,
            id: handle.id,
            sealed: true,
        })
    }

    /// Downgrade the region to read-only. Sealing twice is a no-op.
    pub fn seal(&mut self) -> Result<()> {
        if self.sealed {
            return Ok(());
        }
        let file = self.file()?;
        fcntl(file.as_raw_fd(), FcntlArg::F_ADD_SEALS(READ_ONLY_SEALS))
            .map_err(|errno| TransportError::Seal(errno.into()))?;
        self.sealed = true;
        debug!(id = %self.id, len = self.len, "sealed shared region");
        Ok(())
    }

    /// Map the region writable. Fails once the region is sealed.
    ///
    /// Dropping the returned map unmaps it.
    pub fn map_write(&mut self) -> Result<MmapMut> {
        if self.sealed {
            return Err(TransportError::Sealed);
        }
        let file = self.file()?;
        // SAFETY: the region is private to this process until sealed, so no
        // other mapping can change the bytes underneath this one.
        unsafe { MmapOptions::new().len(self.len).map_mut(file) }.map_err(TransportError::Map)
    }

    /// Map the region read-only. Dropping the returned map unmaps it.
    pub fn map_read(&self) -> Result<Mmap> {
        let file = self.file()?;
        // SAFETY: mapped regions are either private to this process or carry
        // the write and shrink seals, so the kernel keeps the mapped bytes
        // present and unchanged for the lifetime of the mapping.
        unsafe { MmapOptions::new().len(self.len).map(file) }.map_err(TransportError::Map)
    }

    /// Copy the region's bytes out through a short-lived read-only mapping.
    pub fn copy_out(&self) -> Result<Vec<u8>> {
        let map = self.map_read()?;
        Ok(map.to_vec())
    }

    /// Duplicate the region's descriptor into an independently closable handle.
    pub fn duplicate_handle(&self) -> Result<RegionHandle> {
        let file = self.file()?.try_clone().map_err(TransportError::Duplicate)?;
        Ok(RegionHandle {
            file,
            len: self.len,
            id: self.id,
        })
    }

    /// Release the region's descriptor. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            trace!(id = %self.id, "closed shared region");
        }
    }

    /// Region length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Regions are never empty; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Identity of the underlying memory object.
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Whether the region has been downgraded to read-only.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(TransportError::Closed)
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        self.close();
    }
}
