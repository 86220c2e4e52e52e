//! Parcel framing for payloads of any size.
//!
//! A frame is a size-prefixed section of a [`Parcel`]. Payloads whose
//! serialized form fits within [`MAX_DIRECT_PAYLOAD_SIZE`] travel inline;
//! larger ones are written into a sealed shared-memory region and the frame
//! carries a reference to it instead. Every frame layout looks like:
//! - A 4-byte little-endian frame size, counting itself
//! - The payload, or the payload's null marker
//! - A region flag, followed by the region reference when set
//!
//! Parcels cross a socket as [`packet`]s with their handles attached as
//! ancillary data.

pub mod codec;
pub mod error;
pub mod packet;
pub mod parcel;
pub mod payload;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, decode_frame_detailed, encode_frame, skip_frame, DecodedFrame, Encoded,
    MAX_DIRECT_PAYLOAD_SIZE,
};
pub use error::{FrameError, Result};
pub use packet::{decode_packet, encode_packet, PacketConfig, DEFAULT_MAX_HANDLES, DEFAULT_MAX_PARCEL};
pub use parcel::{Parcel, ParcelReader};
pub use payload::Payload;
pub use reader::PacketReader;
pub use writer::PacketWriter;
