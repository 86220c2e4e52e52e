use memmap2::MmapOptions;
use shmparcel::container::{
    from_envelope_default, to_envelope_default, HasSharedHandle, LargeContainer, Route,
    SelfDescribing,
};
use shmparcel::frame::{
    decode_frame, decode_frame_detailed, skip_frame, FrameError, PacketReader, PacketWriter,
    Parcel, ParcelReader, MAX_DIRECT_PAYLOAD_SIZE,
};
use shmparcel::transport::{IpcStream, RegionHandle};

const TRAILER: i32 = 0x0bad_cafe;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn send_across(parcel: &Parcel) -> Parcel {
    let (a, b) = IpcStream::pair().expect("socket pair");
    PacketWriter::new(a).send(parcel).expect("send parcel");
    PacketReader::new(b).read_parcel().expect("read parcel")
}

#[test]
fn frame_size_covers_whole_frame() {
    for len in [0, 100, MAX_DIRECT_PAYLOAD_SIZE - 4, MAX_DIRECT_PAYLOAD_SIZE - 3, 50_000] {
        let container = LargeContainer::new(pattern(len));
        let mut parcel = Parcel::new();
        parcel.write_i32(-7);
        container.send(&mut parcel).expect("encode");
        parcel.write_i32(TRAILER);

        let bytes = parcel.as_bytes();
        let declared = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

        let mut reader = parcel.reader();
        assert_eq!(reader.read_i32().expect("prefix"), -7);
        let frame = decode_frame_detailed::<Vec<u8>>(&mut reader).expect("decode");
        assert_eq!(frame.frame_size, declared, "payload of {len} bytes");
        assert_eq!(reader.position(), 4 + declared);
        assert_eq!(reader.read_i32().expect("trailer"), TRAILER);
        assert_eq!(frame.payload.len(), len);
    }
}

#[test]
fn mixed_frames_in_one_parcel() {
    let small = LargeContainer::new(b"first".to_vec());
    let large = LargeContainer::new(pattern(20_000));
    let mut parcel = Parcel::new();
    small.send(&mut parcel).expect("encode small");
    large.send(&mut parcel).expect("encode large");
    small.send(&mut parcel).expect("encode small again");

    let received = send_across(&parcel);
    assert_eq!(received.handle_count(), 1);

    let mut reader = received.reader();
    let skipped = skip_frame(&mut reader).expect("skip first");
    assert!(skipped > 0);
    let payload: Vec<u8> = decode_frame(&mut reader).expect("decode large");
    assert_eq!(payload, pattern(20_000));
    let last: Vec<u8> = decode_frame(&mut reader).expect("decode last");
    assert_eq!(last, b"first");
    assert_eq!(reader.remaining(), 0);
}

#[test]
fn received_region_is_sealed() {
    let container = LargeContainer::new(pattern(32 * 1024));
    let parcel = container.to_parcel().expect("encode");
    let received = send_across(&parcel);
    let fd = received.reader().dup_handle(0).expect("handle 0");

    // SAFETY: the region is sealed and never resized.
    let writable = unsafe { MmapOptions::new().map_mut(&fd) };
    assert!(writable.is_err(), "sealed region mapped writable");

    // SAFETY: as above.
    let readable = unsafe { MmapOptions::new().map(&fd) }.expect("read-only map");
    let nested = i32::from_le_bytes([readable[0], readable[1], readable[2], readable[3]]);
    assert_eq!(nested as usize, readable.len());
}

#[test]
fn cached_region_crosses_socket_twice() {
    let container = LargeContainer::new(pattern(100_000));
    let first = container.to_parcel().expect("first");
    let second = container.to_parcel().expect("second");
    assert!(container.has_cached_region());

    let a = decode_frame_detailed::<Vec<u8>>(&mut send_across(&first).reader()).expect("a");
    let b = decode_frame_detailed::<Vec<u8>>(&mut send_across(&second).reader()).expect("b");
    assert_eq!(a.region, b.region);
    assert_eq!(a.payload, b.payload);
}

#[test]
fn truncated_parcel_is_a_decode_error() {
    let container = LargeContainer::new(pattern(10_000));
    let parcel = container.to_parcel().expect("encode");
    let (mut bytes, handles) = parcel.into_parts();
    bytes.truncate(bytes.len() - 2);
    let damaged = Parcel::from_parts(bytes, handles);

    let err = decode_frame::<Vec<u8>>(&mut damaged.reader()).expect_err("must fail");
    assert!(err.is_decode_error(), "{err:?}");
    assert!(matches!(err, FrameError::InvalidFrameSize { .. }));
}

#[test]
fn container_route_matches_frame() {
    let container = LargeContainer::new(pattern(10_000));
    let mut parcel = Parcel::new();
    let route = container.send(&mut parcel).expect("encode");
    let frame = decode_frame_detailed::<Vec<u8>>(&mut parcel.reader()).expect("decode");
    assert!(matches!(route, Route::Created(_)));
    assert_eq!(route.region(), frame.region);
}

#[derive(Debug, Default)]
struct Telemetry {
    source: Option<String>,
    readings: Vec<u8>,
    shared: Option<RegionHandle>,
}

impl HasSharedHandle for Telemetry {
    fn shared_handle(&self) -> Option<&RegionHandle> {
        self.shared.as_ref()
    }

    fn set_shared_handle(&mut self, handle: Option<RegionHandle>) {
        self.shared = handle;
    }

    fn take_shared_handle(&mut self) -> Option<RegionHandle> {
        self.shared.take()
    }
}

impl SelfDescribing for Telemetry {
    fn write_fields(&self, out: &mut Parcel) -> shmparcel::frame::Result<()> {
        out.write_string(self.source.as_deref())?;
        out.write_byte_array(Some(&self.readings))
    }

    fn read_fields(&mut self, src: &mut ParcelReader<'_>) -> shmparcel::frame::Result<()> {
        self.source = src.read_string()?;
        self.readings = src.read_byte_array()?.unwrap_or_default().to_vec();
        Ok(())
    }
}

#[test]
fn envelope_crosses_socket() {
    let value = Telemetry {
        source: Some("sensor-7".to_string()),
        readings: pattern(40_000),
        shared: None,
    };
    let envelope = to_envelope_default(value).expect("to envelope");
    assert!(envelope.readings.is_empty());

    let mut parcel = Parcel::new();
    parcel
        .write_region_handle(envelope.shared_handle())
        .expect("write handle");
    drop(envelope);

    let received = send_across(&parcel);
    let handle = received
        .reader()
        .read_region_handle()
        .expect("read handle");
    let envelope = Telemetry {
        shared: handle,
        ..Telemetry::default()
    };

    let restored = from_envelope_default(envelope, false).expect("from envelope");
    assert_eq!(restored.source.as_deref(), Some("sensor-7"));
    assert_eq!(restored.readings, pattern(40_000));
    assert!(restored.shared.is_none());
}
