//! Socket-level packets: one parcel per packet, handles as ancillary data.

use std::collections::VecDeque;
use std::os::fd::OwnedFd;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::parcel::Parcel;

/// Packet header: magic (2) + length (4) + handle count (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "SP" (0x53 0x50).
pub const MAGIC: [u8; 2] = [0x53, 0x50];

/// Default maximum parcel size: 16 MiB.
pub const DEFAULT_MAX_PARCEL: usize = 16 * 1024 * 1024;

/// Default maximum handles per parcel.
pub const DEFAULT_MAX_HANDLES: usize = 16;

/// Configuration for packet readers and writers.
#[derive(Debug, Clone)]
pub struct PacketConfig {
    /// Maximum parcel size in bytes. Default: 16 MiB.
    pub max_parcel_size: usize,
    /// Maximum handles carried by one parcel. Default: 16.
    pub max_handles: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            max_parcel_size: DEFAULT_MAX_PARCEL,
            max_handles: DEFAULT_MAX_HANDLES,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Encode a parcel's bytes into the packet wire format.
///
/// The parcel's handles are not written here; the writer attaches them to
/// the first byte it sends.
///
/// ```text
/// ┌──────────────┬───────────┬──────────────┬──────────────────┐
/// │ Magic (2B)   │ Length    │ Handles      │ Parcel bytes     │
/// │ 0x53 0x50    │ (4B LE)   │ (2B LE)      │ (Length bytes)   │
/// │ "SP"         │           │              │                  │
/// └──────────────┴───────────┴──────────────┴──────────────────┘
/// ```
pub fn encode_packet(parcel: &Parcel, dst: &mut BytesMut) -> Result<()> {
    if parcel.len() > u32::MAX as usize {
        return Err(FrameError::ParcelTooLarge {
            size: parcel.len(),
            max: u32::MAX as usize,
        });
    }
    if parcel.handle_count() > u16::MAX as usize {
        return Err(FrameError::TooManyHandles {
            count: parcel.handle_count(),
            max: u16::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + parcel.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(parcel.len() as u32);
    dst.put_u16_le(parcel.handle_count() as u16);
    dst.put_slice(parcel.as_bytes());
    Ok(())
}

/// Decode a packet from a buffer, claiming its handles from `handles`.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes and handles.
pub fn decode_packet(
    src: &mut BytesMut,
    handles: &mut VecDeque<OwnedFd>,
    config: &PacketConfig,
) -> Result<Option<Parcel>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let handle_count = u16::from_le_bytes([src[6], src[7]]) as usize;

    if len > config.max_parcel_size {
        return Err(FrameError::ParcelTooLarge {
            size: len,
            max: config.max_parcel_size,
        });
    }
    if handle_count > config.max_handles {
        return Err(FrameError::TooManyHandles {
            count: handle_count,
            max: config.max_handles,
        });
    }

    if src.len() < HEADER_SIZE + len {
        return Ok(None);
    }
    if handles.len() < handle_count {
        return Err(FrameError::MissingHandles {
            expected: handle_count,
            received: handles.len(),
        });
    }

    src.advance(HEADER_SIZE);
    let data = src.split_to(len);
    let fds: Vec<OwnedFd> = handles.drain(..handle_count).collect();

    Ok(Some(Parcel::from_parts(data, fds)))
}

#[cfg(test)]
mod tests {
    use shmparcel_transport::SharedRegion;

    use super::*;

    fn parcel_with(bytes: &[u8]) -> Parcel {
        let mut parcel = Parcel::new();
        parcel.write_raw(bytes);
        parcel
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        encode_packet(&parcel_with(b"hello, shmparcel!"), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 17);

        let parcel = decode_packet(&mut buf, &mut VecDeque::new(), &PacketConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(parcel.as_bytes(), b"hello, shmparcel!");
        assert_eq!(parcel.handle_count(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_header_waits() {
        let mut buf = BytesMut::from(&[0x53, 0x50, 0x00][..]);
        let result = decode_packet(&mut buf, &mut VecDeque::new(), &PacketConfig::default());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn incomplete_body_waits() {
        let mut buf = BytesMut::new();
        encode_packet(&parcel_with(b"hello"), &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        let result = decode_packet(&mut buf, &mut VecDeque::new(), &PacketConfig::default());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0, 0, 0, 0, 0, 0][..]);
        let result = decode_packet(&mut buf, &mut VecDeque::new(), &PacketConfig::default());
        assert!(matches!(result, Err(FrameError::InvalidMagic)));
    }

    #[test]
    fn oversized_parcel_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(32 * 1024 * 1024);
        buf.put_u16_le(0);

        let result = decode_packet(&mut buf, &mut VecDeque::new(), &PacketConfig::default());
        assert!(matches!(result, Err(FrameError::ParcelTooLarge { .. })));
    }

    #[test]
    fn too_many_handles_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(0);
        buf.put_u16_le(100);

        let result = decode_packet(&mut buf, &mut VecDeque::new(), &PacketConfig::default());
        assert!(matches!(
            result,
            Err(FrameError::TooManyHandles { count: 100, .. })
        ));
    }

    #[test]
    fn handles_claimed_in_order() {
        let region = SharedRegion::from_bytes("packet-test", b"abc").unwrap();
        let mut parcel = parcel_with(b"x");
        parcel.write_region_handle(Some(&region.duplicate_handle().unwrap())).unwrap();

        let mut buf = BytesMut::new();
        encode_packet(&parcel, &mut buf).unwrap();

        let (_, fds) = parcel.into_parts();
        let mut pending: VecDeque<OwnedFd> = fds.into_iter().collect();
        let decoded = decode_packet(&mut buf, &mut pending, &PacketConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(decoded.handle_count(), 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn missing_handles_reported() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1);
        buf.put_u16_le(2);
        buf.put_u8(0);

        let result = decode_packet(&mut buf, &mut VecDeque::new(), &PacketConfig::default());
        assert!(matches!(
            result,
            Err(FrameError::MissingHandles {
                expected: 2,
                received: 0
            })
        ));
    }

    #[test]
    fn multiple_packets() {
        let mut buf = BytesMut::new();
        encode_packet(&parcel_with(b"first"), &mut buf).unwrap();
        encode_packet(&parcel_with(b"second"), &mut buf).unwrap();

        let cfg = PacketConfig::default();
        let mut pending = VecDeque::new();
        let p1 = decode_packet(&mut buf, &mut pending, &cfg).unwrap().unwrap();
        let p2 = decode_packet(&mut buf, &mut pending, &cfg).unwrap().unwrap();
        assert_eq!(p1.as_bytes(), b"first");
        assert_eq!(p2.as_bytes(), b"second");
        assert!(buf.is_empty());
    }
}
