//! Shared-memory regions and the socket transport that carries their handles.
//!
//! Provides the two OS-facing pieces of shmparcel:
//! - [`SharedRegion`]: memfd-backed memory that is filled once, sealed
//!   read-only, and shared by duplicating its descriptor ([`RegionHandle`])
//! - [`UnixDomainSocket`] / [`IpcStream`]: a local stream transport that can
//!   pass region handles alongside bytes ([`HandleStream`])
//!
//! This is the lowest layer of shmparcel. Everything else builds on top of
//! the types provided here.

#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("shmparcel-transport requires memfd sealing (Linux or Android)");

pub mod ancillary;
pub mod error;
pub mod region;
pub mod traits;
pub mod uds;

pub use ancillary::MAX_FDS_PER_MESSAGE;
pub use error::{Result, TransportError};
pub use region::{RegionHandle, RegionId, SharedRegion, DEFAULT_REGION_NAME};
pub use traits::{HandleStream, IpcStream};
pub use uds::UnixDomainSocket;
