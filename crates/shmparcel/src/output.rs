use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use shmparcel_container::Route;
use shmparcel_frame::DecodedFrame;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    event: &'a str,
    sequence: usize,
    route: &'a str,
    region: Option<String>,
    payload_size: usize,
    frame_size: Option<usize>,
    payload: Option<String>,
    timestamp: String,
}

impl FrameOutput<'_> {
    fn print(&self, format: OutputFormat, raw: Option<&[u8]>) {
        match format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["#", "ROUTE", "REGION", "SIZE", "PAYLOAD"])
                    .add_row(vec![
                        self.sequence.to_string(),
                        self.route.to_string(),
                        self.region.clone().unwrap_or_else(|| "-".to_string()),
                        self.payload_size.to_string(),
                        self.payload.clone().unwrap_or_default(),
                    ]);
                println!("{table}");
            }
            OutputFormat::Pretty => {
                println!(
                    "{} #{} route={} region={} size={}",
                    self.event,
                    self.sequence,
                    self.route,
                    self.region.as_deref().unwrap_or("-"),
                    self.payload_size
                );
            }
            OutputFormat::Raw => match raw {
                Some(data) => print_raw(data),
                None => println!("{}", self.route),
            },
        }
    }
}

pub fn print_sent(sequence: usize, payload_size: usize, route: Route, format: OutputFormat) {
    let route_name = match route {
        Route::Inline => "inline",
        Route::Created(_) => "shared",
        Route::Cached(_) => "cached",
    };
    FrameOutput {
        event: "sent",
        sequence,
        route: route_name,
        region: route.region().map(|id| id.to_string()),
        payload_size,
        frame_size: None,
        payload: None,
        timestamp: now_unix_seconds(),
    }
    .print(format, None);
}

pub fn print_received(sequence: usize, frame: &DecodedFrame<Vec<u8>>, format: OutputFormat) {
    FrameOutput {
        event: "received",
        sequence,
        route: if frame.region.is_some() { "shared" } else { "inline" },
        region: frame.region.map(|id| id.to_string()),
        payload_size: frame.payload.len(),
        frame_size: Some(frame.frame_size),
        payload: Some(payload_preview(&frame.payload)),
        timestamp: now_unix_seconds(),
    }
    .print(format, Some(&frame.payload));
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

const PREVIEW_LIMIT: usize = 64;

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) if text.len() <= PREVIEW_LIMIT => text.to_string(),
        Ok(text) => {
            let cut = (0..=PREVIEW_LIMIT)
                .rev()
                .find(|i| text.is_char_boundary(*i))
                .unwrap_or(0);
            format!("{}... ({} bytes)", &text[..cut], payload.len())
        }
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
