//! Send one large payload across a socket pair and read it back.
//!
//! Run with: cargo run -p shmparcel --example large-send

use std::thread;

use shmparcel::container::LargeContainer;
use shmparcel::frame::{decode_frame_detailed, PacketReader, PacketWriter};
use shmparcel::transport::IpcStream;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (client, server) = IpcStream::pair()?;

    let receiver = thread::spawn(move || -> Result<(), shmparcel::frame::FrameError> {
        let mut reader = PacketReader::new(server);
        for _ in 0..2 {
            let parcel = reader.read_parcel()?;
            let frame = decode_frame_detailed::<Vec<u8>>(&mut parcel.reader())?;
            match frame.region {
                Some(id) => println!(
                    "received {} bytes via region {id} (frame {} bytes)",
                    frame.payload.len(),
                    frame.frame_size
                ),
                None => println!("received {} bytes inline", frame.payload.len()),
            }
        }
        Ok(())
    });

    let container = LargeContainer::new(vec![0x5a_u8; 1 << 20]);
    let mut writer = PacketWriter::new(client);
    for _ in 0..2 {
        let parcel = container.to_parcel()?;
        writer.send(&parcel)?;
    }
    container.close();

    receiver
        .join()
        .map_err(|_| "receiver thread panicked")??;
    Ok(())
}
