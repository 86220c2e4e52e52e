use std::path::PathBuf;

/// Errors that can occur in shared-region and socket transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The OS refused to create a shared-memory region.
    #[error("failed to create shared region of {len} bytes: {source}")]
    RegionCreate { len: usize, source: std::io::Error },

    /// The region could not be downgraded to read-only.
    #[error("failed to seal shared region: {0}")]
    Seal(std::io::Error),

    /// Mapping the region into this process failed.
    #[error("failed to map shared region: {0}")]
    Map(std::io::Error),

    /// Duplicating a region handle failed.
    #[error("failed to duplicate region handle: {0}")]
    Duplicate(std::io::Error),

    /// A writable operation was attempted on a sealed region.
    #[error("shared region is sealed")]
    Sealed,

    /// A received region is missing the write, grow, shrink or seal seal.
    #[error("shared region is not sealed read-only")]
    NotSealed,

    /// The region's backing size disagrees with its declared length.
    #[error("shared region length mismatch (declared {declared} bytes, backing {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// The region has been closed.
    #[error("shared region closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
