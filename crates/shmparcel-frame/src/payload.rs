use bytes::Bytes;

use crate::error::Result;
use crate::parcel::{Parcel, ParcelReader};

/// A value that knows how to marshal itself into a frame.
///
/// Implementations must be able to write a *null marker* that their own
/// `read_from` recognizes and answers with `Ok(None)`: it stands in for the
/// payload whenever the real bytes travel through a shared region.
pub trait Payload: Sized {
    /// Serialize the full value.
    fn write_to(&self, out: &mut Parcel) -> Result<()>;

    /// Serialize the stand-in written when the payload is carried elsewhere.
    fn write_null(out: &mut Parcel) -> Result<()>;

    /// Deserialize a value, or `None` when the null marker is found.
    fn read_from(src: &mut ParcelReader<'_>) -> Result<Option<Self>>;
}

impl Payload for Vec<u8> {
    fn write_to(&self, out: &mut Parcel) -> Result<()> {
        out.write_byte_array(Some(self))
    }

    fn write_null(out: &mut Parcel) -> Result<()> {
        out.write_byte_array(None)
    }

    fn read_from(src: &mut ParcelReader<'_>) -> Result<Option<Self>> {
        Ok(src.read_byte_array()?.map(<[u8]>::to_vec))
    }
}

impl Payload for Bytes {
    fn write_to(&self, out: &mut Parcel) -> Result<()> {
        out.write_byte_array(Some(self))
    }

    fn write_null(out: &mut Parcel) -> Result<()> {
        out.write_byte_array(None)
    }

    fn read_from(src: &mut ParcelReader<'_>) -> Result<Option<Self>> {
        Ok(src.read_byte_array()?.map(Bytes::copy_from_slice))
    }
}

impl Payload for String {
    fn write_to(&self, out: &mut Parcel) -> Result<()> {
        out.write_string(Some(self))
    }

    fn write_null(out: &mut Parcel) -> Result<()> {
        out.write_string(None)
    }

    fn read_from(src: &mut ParcelReader<'_>) -> Result<Option<Self>> {
        src.read_string()
    }
}
