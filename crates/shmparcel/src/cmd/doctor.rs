use std::path::PathBuf;

use memmap2::MmapOptions;
use serde::Serialize;
use shmparcel_container::LargeContainer;
use shmparcel_frame::{decode_frame_detailed, PacketReader, PacketWriter};
use shmparcel_transport::{IpcStream, SharedRegion, UnixDomainSocket};

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

const CHECK_REGION_NAME: &str = "shmparcel-doctor";
const CHECK_REGION_SIZE: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn from_outcome(name: &str, outcome: Result<String, String>) -> Self {
        let (status, detail) = match outcome {
            Ok(detail) => (CheckStatus::Pass, detail),
            Err(detail) => (CheckStatus::Fail, detail),
        };
        Self {
            name: name.to_string(),
            status,
            detail,
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = vec![
        CheckResult::from_outcome("memfd_create", memfd_check()),
        CheckResult::from_outcome("seal", seal_check()),
        CheckResult::from_outcome("sealed_map_rejected", sealed_map_check()),
        CheckResult::from_outcome("handle_duplicate", duplicate_check()),
        CheckResult::from_outcome("handle_passing", handle_passing_check()),
        CheckResult::from_outcome("socket_bind", socket_bind_check()),
        threshold_info(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let overall = if has_fail { "fail" } else { "pass" };

    print_doctor(&DoctorOutput { checks, overall }, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("shmparcel doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<22} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
    }
}

fn memfd_check() -> Result<String, String> {
    let mut region = SharedRegion::create(CHECK_REGION_NAME, CHECK_REGION_SIZE).map_err(|e| e.to_string())?;
    let mut map = region.map_write().map_err(|e| e.to_string())?;
    map[0] = 0x5a;
    drop(map);
    let copy = region.copy_out().map_err(|e| e.to_string())?;
    if copy[0] != 0x5a {
        return Err("written byte not visible through a second mapping".to_string());
    }
    Ok(format!("{CHECK_REGION_SIZE} byte region {} writable", region.id()))
}

fn seal_check() -> Result<String, String> {
    let region = SharedRegion::from_bytes(CHECK_REGION_NAME, b"sealed").map_err(|e| e.to_string())?;
    let handle = region.duplicate_handle().map_err(|e| e.to_string())?;
    SharedRegion::open(handle).map_err(|e| format!("receiver rejected seals: {e}"))?;
    Ok("write, grow, shrink and seal seals applied".to_string())
}

fn sealed_map_check() -> Result<String, String> {
    let region = SharedRegion::from_bytes(CHECK_REGION_NAME, b"immutable").map_err(|e| e.to_string())?;
    let handle = region.duplicate_handle().map_err(|e| e.to_string())?;
    // SAFETY: the mapping is dropped immediately if the kernel grants it.
    match unsafe { MmapOptions::new().len(handle.len()).map_mut(&handle) } {
        Ok(_) => Err("kernel granted a writable mapping of a sealed region".to_string()),
        Err(err) => Ok(format!("writable mapping refused ({err})")),
    }
}

fn duplicate_check() -> Result<String, String> {
    let region = SharedRegion::from_bytes(CHECK_REGION_NAME, b"dup").map_err(|e| e.to_string())?;
    let handle = region.duplicate_handle().map_err(|e| e.to_string())?;
    if handle.id() != region.id() {
        return Err(format!(
            "duplicate reports {} but region is {}",
            handle.id(),
            region.id()
        ));
    }
    Ok(format!("duplicate shares region {}", region.id()))
}

fn handle_passing_check() -> Result<String, String> {
    let (a, b) = IpcStream::pair().map_err(|e| e.to_string())?;
    let payload: Vec<u8> = (0..CHECK_REGION_SIZE).map(|i| (i % 251) as u8).collect();
    let container = LargeContainer::new(payload);

    let parcel = container.to_parcel().map_err(|e| e.to_string())?;
    PacketWriter::new(a)
        .send(&parcel)
        .map_err(|e| e.to_string())?;
    let received = PacketReader::new(b)
        .read_parcel()
        .map_err(|e| e.to_string())?;
    let frame = decode_frame_detailed::<Vec<u8>>(&mut received.reader())
        .map_err(|e| e.to_string())?;

    if frame.payload != *container.payload() {
        return Err("payload changed in transit".to_string());
    }
    match frame.region {
        Some(id) => Ok(format!("{CHECK_REGION_SIZE} bytes passed via region {id}")),
        None => Err("large payload travelled inline".to_string()),
    }
}

fn socket_bind_check() -> Result<String, String> {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let dir = PathBuf::from(format!("/tmp/shmparcel-doctor-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).map_err(|e| format!("{}: {e}", dir.display()))?;
    let result = UnixDomainSocket::bind(dir.join("doctor.sock")).map(drop);
    let _ = std::fs::remove_dir_all(&dir);

    result
        .map(|()| "/tmp socket bind succeeded".to_string())
        .map_err(|e| format!("/tmp socket bind failed: {e}"))
}

fn threshold_info() -> CheckResult {
    CheckResult {
        name: "inline_threshold".to_string(),
        status: CheckStatus::Info,
        detail: format!(
            "payloads over {} bytes use shared regions",
            shmparcel_frame::MAX_DIRECT_PAYLOAD_SIZE
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput {
            checks: vec![CheckResult::from_outcome("x", Ok("ok".to_string()))],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[test]
    fn failed_outcome_is_fail_status() {
        let check = CheckResult::from_outcome("x", Err("broken".to_string()));
        assert!(matches!(check.status, CheckStatus::Fail));
        assert_eq!(check.detail, "broken");
    }

    #[test]
    fn region_checks_pass_on_linux() {
        assert!(memfd_check().is_ok());
        assert!(seal_check().is_ok());
        assert!(sealed_map_check().is_ok());
        assert!(duplicate_check().is_ok());
        assert!(handle_passing_check().is_ok());
    }
}
