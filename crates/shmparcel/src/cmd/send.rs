use std::fs;
use std::time::Duration;

use bytes::Bytes;
use shmparcel_container::LargeContainer;
use shmparcel_frame::{PacketConfig, PacketWriter, Parcel};
use shmparcel_transport::UnixDomainSocket;
use tracing::debug;

use crate::cmd::SendArgs;
use crate::exit::{container_error, frame_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_sent, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;
    let payload_size = payload.len();

    let stream = UnixDomainSocket::connect(&args.path)
        .map_err(|err| transport_error("connect failed", err))?;
    let config = PacketConfig {
        write_timeout: Some(timeout),
        ..PacketConfig::default()
    };
    let mut writer = PacketWriter::with_config_ipc(stream, config)
        .map_err(|err| frame_error("connect failed", err))?;

    let container = LargeContainer::new(payload);
    for sequence in 1..=args.repeat as usize {
        let mut parcel = Parcel::new();
        let route = container
            .send(&mut parcel)
            .map_err(|err| container_error("encode failed", err))?;
        writer
            .send(&parcel)
            .map_err(|err| frame_error("send failed", err))?;
        debug!(sequence, bytes = parcel.len(), handles = parcel.handle_count(), "sent parcel");
        print_sent(sequence, payload_size, route, format);
    }
    container.close();

    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Bytes> {
    if let Some(data) = &args.data {
        return Ok(Bytes::copy_from_slice(data.as_bytes()));
    }
    if let Some(path) = &args.file {
        return fs::read(path).map(Bytes::from).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    if let Some(size) = args.size {
        return Ok(generated_payload(size));
    }
    Ok(Bytes::new())
}

/// Deterministic filler so receivers can spot corruption.
fn generated_payload(size: usize) -> Bytes {
    (0..size).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    if millis {
        Ok(Duration::from_millis(value))
    } else {
        Ok(Duration::from_secs(value))
    }
}
