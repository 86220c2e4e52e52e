use shmparcel_transport::{RegionHandle, RegionId, SharedRegion, DEFAULT_REGION_NAME};
use tracing::{debug, trace};

use crate::error::{FrameError, Result};
use crate::parcel::{Parcel, ParcelReader};
use crate::payload::Payload;

/// Largest payload section, in bytes, that travels inline. Anything larger is
/// moved into a shared region.
pub const MAX_DIRECT_PAYLOAD_SIZE: usize = 4096;

/// Region section flag: no region follows.
pub const REGION_ABSENT: i32 = 0;

/// Region section flag: a discriminator and region descriptor follow.
pub const REGION_PRESENT: i32 = 1;

/// Tags a region reference: "SHMR".
pub const REGION_DISCRIMINATOR: i32 = 0x5348_4D52;

/// Smallest well-formed frame: size field plus region flag.
pub const MIN_FRAME_SIZE: usize = 8;

/// How [`encode_frame`] routed the payload.
#[derive(Debug)]
pub enum Encoded {
    /// Payload bytes were written into the frame.
    Inline,
    /// The frame references the already-cached region with this id.
    Cached(RegionId),
    /// A new sealed region was created; the caller decides whether to cache it.
    Created(SharedRegion),
}

/// A decoded payload plus what the frame looked like on the wire.
#[derive(Debug)]
pub struct DecodedFrame<P> {
    pub payload: P,
    /// Bytes the outer frame occupied, including its size field.
    pub frame_size: usize,
    /// The region the payload was read from, if it did not travel inline.
    pub region: Option<RegionId>,
}

/// Encode `payload` as one frame appended to `dest`.
///
/// Wire format (all integers little-endian):
/// ```text
/// ┌────────────────┬──────────────────────────┬──────────────────────────────────┐
/// │ frame size i32 │ payload bytes | null mark │ 0 | 1, "SHMR", len i64, index i32 │
/// └────────────────┴──────────────────────────┴──────────────────────────────────┘
/// ```
///
/// With a live `cached` region the payload is not serialized at all: the frame
/// carries the null marker and a reference to that region. Otherwise a payload
/// section over [`MAX_DIRECT_PAYLOAD_SIZE`] is rewritten as a nested frame
/// into a fresh sealed region, returned as [`Encoded::Created`].
///
/// On error `dest` is restored to its length and handle count on entry.
pub fn encode_frame<P: Payload>(
    payload: &P,
    cached: Option<&SharedRegion>,
    dest: &mut Parcel,
) -> Result<Encoded> {
    let start = dest.len();
    let handles_before = dest.handle_count();

    let result = encode_into(payload, cached, dest, start, handles_before);
    if result.is_err() {
        dest.truncate(start);
        dest.truncate_handles(handles_before);
    }
    result
}

fn encode_into<P: Payload>(
    payload: &P,
    cached: Option<&SharedRegion>,
    dest: &mut Parcel,
    start: usize,
    handles_before: usize,
) -> Result<Encoded> {
    dest.write_i32(0);

    if let Some(region) = cached.filter(|region| !region.is_closed()) {
        P::write_null(dest)?;
        write_region_reference(dest, region.duplicate_handle()?)?;
        finish_frame(dest, start)?;
        debug!(id = %region.id(), "reusing cached shared region");
        return Ok(Encoded::Cached(region.id()));
    }

    let payload_start = dest.len();
    payload.write_to(dest)?;
    let payload_len = dest.len() - payload_start;

    if payload_len <= MAX_DIRECT_PAYLOAD_SIZE {
        dest.write_i32(REGION_ABSENT);
        let size = finish_frame(dest, start)?;
        trace!(size, payload_len, "encoded inline frame");
        return Ok(Encoded::Inline);
    }

    let written_handles = dest.handle_count() - handles_before;
    if written_handles > 0 {
        return Err(FrameError::HandlesInRegion(written_handles));
    }

    let nested = nested_frame(&dest.as_bytes()[payload_start..])?;
    let region = SharedRegion::from_bytes(DEFAULT_REGION_NAME, nested.as_bytes())?;

    dest.truncate(payload_start);
    P::write_null(dest)?;
    write_region_reference(dest, region.duplicate_handle()?)?;
    let size = finish_frame(dest, start)?;
    debug!(id = %region.id(), payload_len, size, "moved payload into shared region");
    Ok(Encoded::Created(region))
}

/// Wrap already-serialized payload bytes as a frame with no region reference.
fn nested_frame(payload: &[u8]) -> Result<Parcel> {
    let mut frame = Parcel::with_capacity(MIN_FRAME_SIZE + payload.len());
    frame.write_i32(0);
    frame.write_raw(payload);
    frame.write_i32(REGION_ABSENT);
    finish_frame(&mut frame, 0)?;
    Ok(frame)
}

fn write_region_reference(dest: &mut Parcel, handle: RegionHandle) -> Result<()> {
    dest.write_i32(REGION_PRESENT);
    dest.write_i32(REGION_DISCRIMINATOR);
    dest.write_region_descriptor(handle)
}

/// Patch the frame starting at `start` with its final size.
fn finish_frame(dest: &mut Parcel, start: usize) -> Result<usize> {
    let size = dest.len() - start;
    let encoded = i32::try_from(size).map_err(|_| FrameError::ParcelTooLarge {
        size,
        max: i32::MAX as usize,
    })?;
    dest.patch_i32(start, encoded)?;
    Ok(size)
}

/// Decode one frame at the reader's position.
///
/// The reader always ends up at `frame start + frame size`, however much of
/// the frame the payload consumed.
pub fn decode_frame<P: Payload>(src: &mut ParcelReader<'_>) -> Result<P> {
    decode_frame_detailed(src).map(|decoded| decoded.payload)
}

/// Like [`decode_frame`], also reporting frame size and region identity.
pub fn decode_frame_detailed<P: Payload>(src: &mut ParcelReader<'_>) -> Result<DecodedFrame<P>> {
    decode_at(src, false)
}

/// Skip one frame without interpreting it, returning its size.
pub fn skip_frame(src: &mut ParcelReader<'_>) -> Result<usize> {
    let (start, end) = read_frame_bounds(src)?;
    src.set_position(end)?;
    Ok(end - start)
}

fn read_frame_bounds(src: &mut ParcelReader<'_>) -> Result<(usize, usize)> {
    let start = src.position();
    let size = src.read_i32()?;
    let available = src.limit() - start;
    match usize::try_from(size) {
        Ok(len) if len >= MIN_FRAME_SIZE && len <= available => Ok((start, start + len)),
        _ => Err(FrameError::InvalidFrameSize {
            offset: start,
            size,
            available,
        }),
    }
}

fn decode_at<P: Payload>(src: &mut ParcelReader<'_>, nested: bool) -> Result<DecodedFrame<P>> {
    let (start, end) = read_frame_bounds(src)?;

    let outer_limit = src.set_limit(end);
    let sections = decode_sections::<P>(src, nested);
    src.set_limit(outer_limit);
    let (inline, region) = sections?;

    src.set_position(end)?;

    let (payload, region) = match (inline, region) {
        (Some(payload), None) => (payload, None),
        (None, Some((payload, id))) => (payload, Some(id)),
        (None, None) => return Err(FrameError::MissingPayload),
        (Some(_), Some(_)) => return Err(FrameError::AmbiguousPayload),
    };

    Ok(DecodedFrame {
        payload,
        frame_size: end - start,
        region,
    })
}

type Sections<P> = (Option<P>, Option<(P, RegionId)>);

fn decode_sections<P: Payload>(src: &mut ParcelReader<'_>, nested: bool) -> Result<Sections<P>> {
    let inline = P::read_from(src)?;

    match src.read_i32()? {
        REGION_ABSENT => Ok((inline, None)),
        REGION_PRESENT => {
            if nested {
                return Err(FrameError::NestedRegion);
            }
            if inline.is_some() {
                return Err(FrameError::AmbiguousPayload);
            }
            let found = src.read_i32()?;
            if found != REGION_DISCRIMINATOR {
                return Err(FrameError::UnexpectedDiscriminator {
                    expected: REGION_DISCRIMINATOR,
                    found,
                });
            }
            let handle = src.read_region_descriptor()?;
            let id = handle.id();
            let payload = decode_region::<P>(handle)?;
            Ok((None, Some((payload, id))))
        }
        other => Err(FrameError::InvalidRegionFlag(other)),
    }
}

/// Map, copy, and close the region, then decode the nested frame it holds.
fn decode_region<P: Payload>(handle: RegionHandle) -> Result<P> {
    let mut region = SharedRegion::open(handle)?;
    let copied = region.copy_out();
    region.close();
    let copied = copied?;

    trace!(id = %region.id(), len = copied.len(), "copied payload out of shared region");
    let inner = Parcel::from_bytes(&copied);
    let mut reader = inner.reader();
    decode_at(&mut reader, true).map(|decoded| decoded.payload)
}
