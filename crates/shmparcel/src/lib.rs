//! Parcel framing that moves large payloads through sealed shared memory.
//!
//! Small payloads travel inline in a frame. Payloads over
//! [`frame::MAX_DIRECT_PAYLOAD_SIZE`] bytes are written once into a memfd,
//! sealed read-only, and referenced from the frame by handle.
//!
//! # Crate Structure
//!
//! - [`transport`]: shared regions and the handle-passing socket transport
//! - [`frame`]: parcels, the frame codec, and socket packets
//! - [`container`]: region-caching containers and stable-schema envelopes

/// Re-export transport types.
pub mod transport {
    pub use shmparcel_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use shmparcel_frame::*;
}

/// Re-export container types.
pub mod container {
    pub use shmparcel_container::*;
}
