//! Stable-schema envelopes.
//!
//! Some values are handed to code that knows their schema but not the frame
//! format. For those, a large value is replaced by an *envelope*: an empty
//! instance of the same type whose only populated field is a handle to a
//! sealed region holding the value's serialized fields. Small values are
//! passed through untouched, so an envelope never carries both.

use shmparcel_frame::{Parcel, ParcelReader, MAX_DIRECT_PAYLOAD_SIZE};
use shmparcel_transport::{RegionHandle, SharedRegion, DEFAULT_REGION_NAME};
use tracing::debug;

use crate::error::{ContainerError, Result};

/// A type with an optional field dedicated to a shared-region handle.
pub trait HasSharedHandle {
    fn shared_handle(&self) -> Option<&RegionHandle>;

    fn set_shared_handle(&mut self, handle: Option<RegionHandle>);

    fn take_shared_handle(&mut self) -> Option<RegionHandle>;
}

/// A type that serializes its own fields, excluding the shared handle.
pub trait SelfDescribing {
    fn write_fields(&self, out: &mut Parcel) -> shmparcel_frame::Result<()>;

    /// Populate `self` from bytes produced by [`write_fields`](Self::write_fields).
    fn read_fields(&mut self, src: &mut ParcelReader<'_>) -> shmparcel_frame::Result<()>;
}

/// Convert `value` to its envelope form when it is too large to send directly.
///
/// Returns `value` unchanged if it already carries a handle or if its fields
/// fit within [`MAX_DIRECT_PAYLOAD_SIZE`]. Otherwise the fields are moved
/// into a sealed region and an instance built by `empty` carries the handle.
pub fn to_envelope<T, F>(value: T, empty: F) -> Result<T>
where
    T: HasSharedHandle + SelfDescribing,
    F: FnOnce() -> T,
{
    if value.shared_handle().is_some() {
        return Ok(value);
    }

    let mut fields = Parcel::new();
    value.write_fields(&mut fields)?;
    if fields.len() <= MAX_DIRECT_PAYLOAD_SIZE {
        return Ok(value);
    }
    if fields.handle_count() > 0 {
        return Err(ContainerError::Configuration(format!(
            "fields carry {} handle(s) and cannot be moved into a shared region",
            fields.handle_count()
        )));
    }

    let mut envelope = empty_instance(empty)?;
    let region = SharedRegion::from_bytes(DEFAULT_REGION_NAME, fields.as_bytes())?;
    envelope.set_shared_handle(Some(region.duplicate_handle()?));
    debug!(id = %region.id(), len = fields.len(), "moved fields into envelope");
    Ok(envelope)
}

/// [`to_envelope`] using `T::default()` as the empty instance.
pub fn to_envelope_default<T>(value: T) -> Result<T>
where
    T: HasSharedHandle + SelfDescribing + Default,
{
    to_envelope(value, T::default)
}

/// Restore the full value from an envelope.
///
/// An envelope without a handle is already the full value and is returned
/// as-is. With `keep_handle` the restored value keeps the envelope's handle,
/// so it can be forwarded again without re-serializing.
pub fn from_envelope<T, F>(mut envelope: T, keep_handle: bool, empty: F) -> Result<T>
where
    T: HasSharedHandle + SelfDescribing,
    F: FnOnce() -> T,
{
    let Some(handle) = envelope.take_shared_handle() else {
        return Ok(envelope);
    };

    let region = SharedRegion::open(handle.try_clone()?)?;
    let bytes = region.copy_out()?;
    drop(region);

    let mut value = empty_instance(empty)?;
    let fields = Parcel::from_bytes(&bytes);
    value.read_fields(&mut fields.reader())?;
    if keep_handle {
        value.set_shared_handle(Some(handle));
    }
    Ok(value)
}

/// [`from_envelope`] using `T::default()` as the empty instance.
pub fn from_envelope_default<T>(envelope: T, keep_handle: bool) -> Result<T>
where
    T: HasSharedHandle + SelfDescribing + Default,
{
    from_envelope(envelope, keep_handle, T::default)
}

fn empty_instance<T: HasSharedHandle>(empty: impl FnOnce() -> T) -> Result<T> {
    let instance = empty();
    if instance.shared_handle().is_some() {
        return Err(ContainerError::Configuration(
            "empty constructor returned an instance that already carries a shared handle"
                .to_string(),
        ));
    }
    Ok(instance)
}
