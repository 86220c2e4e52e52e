use shmparcel_transport::TransportError;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A read ran past the end of the buffer or the enclosing frame.
    #[error("truncated input (needed {needed} bytes at offset {offset}, limit {limit})")]
    Truncated {
        offset: usize,
        needed: usize,
        limit: usize,
    },

    /// The leading frame size is smaller than a frame header or runs past the
    /// end of the buffer.
    #[error("invalid frame size {size} at offset {offset} ({available} bytes available)")]
    InvalidFrameSize {
        offset: usize,
        size: i32,
        available: usize,
    },

    /// The region-reference flag is neither absent nor present.
    #[error("invalid region flag {0}")]
    InvalidRegionFlag(i32),

    /// The region reference carries the wrong discriminator.
    #[error("unexpected region discriminator {found:#x} (expected {expected:#x})")]
    UnexpectedDiscriminator { expected: i32, found: i32 },

    /// The region descriptor declares a negative or unrepresentable length.
    #[error("invalid region length {0}")]
    InvalidRegionLength(i64),

    /// A handle index does not name an entry in the parcel's handle table.
    #[error("handle index {index} out of range ({count} handles)")]
    InvalidHandleIndex { index: i32, count: usize },

    /// A frame carried both inline payload bytes and a region reference.
    #[error("frame carries both an inline payload and a region reference")]
    AmbiguousPayload,

    /// A frame carried neither inline payload bytes nor a region reference.
    #[error("frame carries no payload")]
    MissingPayload,

    /// A region's contents referenced another region.
    #[error("region contents contain a nested region reference")]
    NestedRegion,

    /// A payload wrote handles into bytes destined for a region.
    #[error("payload with {0} handle(s) cannot be placed in a shared region")]
    HandlesInRegion(usize),

    /// A payload's own bytes could not be interpreted.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The packet header contains an invalid magic number.
    #[error("invalid packet magic (expected 0x5350 \"SP\")")]
    InvalidMagic,

    /// The parcel exceeds the configured maximum size.
    #[error("parcel too large ({size} bytes, max {max})")]
    ParcelTooLarge { size: usize, max: usize },

    /// The parcel carries more handles than allowed.
    #[error("too many handles ({count}, max {max})")]
    TooManyHandles { count: usize, max: usize },

    /// A packet announced more handles than arrived with it.
    #[error("packet announced {expected} handle(s), received {received}")]
    MissingHandles { expected: usize, received: usize },

    /// Shared-region failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An I/O error occurred while reading or writing packets.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

impl FrameError {
    /// True for malformed-input errors, which are never worth retrying.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            FrameError::Truncated { .. }
                | FrameError::InvalidFrameSize { .. }
                | FrameError::InvalidRegionFlag(_)
                | FrameError::UnexpectedDiscriminator { .. }
                | FrameError::InvalidRegionLength(_)
                | FrameError::InvalidHandleIndex { .. }
                | FrameError::AmbiguousPayload
                | FrameError::MissingPayload
                | FrameError::NestedRegion
                | FrameError::MalformedPayload(_)
                | FrameError::InvalidMagic
                | FrameError::MissingHandles { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
