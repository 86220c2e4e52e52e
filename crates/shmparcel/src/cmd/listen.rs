use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shmparcel_frame::{decode_frame_detailed, FrameError, PacketReader};
use shmparcel_transport::UnixDomainSocket;
use tracing::{debug, info};

use crate::cmd::ListenArgs;
use crate::exit::{frame_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_received, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let listener =
        UnixDomainSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    info!(path = %listener.path().display(), "listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let stream = listener
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        let mut reader = PacketReader::new(stream);

        while running.load(Ordering::SeqCst) {
            let parcel = match reader.read_parcel() {
                Ok(parcel) => parcel,
                Err(FrameError::ConnectionClosed) => {
                    debug!("sender disconnected");
                    break;
                }
                Err(err) => return Err(frame_error("receive failed", err)),
            };

            let frame = decode_frame_detailed::<Vec<u8>>(&mut parcel.reader())
                .map_err(|err| frame_error("decode failed", err))?;

            printed = printed.saturating_add(1);
            print_received(printed, &frame, format);

            if let Some(count) = args.count {
                if printed >= count {
                    return Ok(SUCCESS);
                }
            }
        }
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
