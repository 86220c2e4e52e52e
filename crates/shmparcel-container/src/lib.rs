//! Payload containers built on the shmparcel frame codec.
//!
//! - [`LargeContainer`]: wraps one payload and keeps the shared region it
//!   produced, so resending an unchanged large payload reuses that region
//! - [`stable`]: converts self-describing values to and from envelopes that
//!   carry only a region handle

pub mod error;
pub mod large;
pub mod stable;

pub use error::{ContainerError, Result};
pub use large::{LargeContainer, Route};
pub use stable::{
    from_envelope, from_envelope_default, to_envelope, to_envelope_default, HasSharedHandle,
    SelfDescribing,
};
