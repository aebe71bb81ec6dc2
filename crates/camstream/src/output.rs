use std::io::IsTerminal;

use camstream_pipeline::{DecodeStats, StreamStats};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
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
struct StreamReport<'a> {
    kind: &'static str,
    endpoint: &'a str,
    #[serde(flatten)]
    stats: &'a StreamStats,
}

#[derive(Serialize)]
struct ReceiveReport<'a> {
    kind: &'static str,
    endpoint: &'a str,
    bytes_written: u64,
    #[serde(flatten)]
    stats: &'a DecodeStats,
}

pub fn print_stream_stats(stats: &StreamStats, endpoint: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let report = StreamReport {
                kind: "stream-stats",
                endpoint,
                stats,
            };
            println!(
                "{}",
                serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let rows = vec![
                ("endpoint", endpoint.to_string()),
                ("frames", stats.frames.to_string()),
                ("bytes sent", stats.bytes_sent.to_string()),
                ("config headers sent", stats.config_headers_sent.to_string()),
                (
                    "config headers suppressed",
                    stats.config_headers_suppressed.to_string(),
                ),
                ("motion messages", stats.motion_messages.to_string()),
                ("max motion", stats.max_motion.to_string()),
                ("alarms", stats.alarms.to_string()),
                ("retained", stats.retention.retained.to_string()),
                ("skipped", stats.retention.skipped.to_string()),
                ("flushed", stats.retention.flushed.to_string()),
                ("discarded", stats.retention.discarded.to_string()),
                ("fps", format!("{:.1}", stats.fps)),
            ];
            println!("{}", key_value_table(rows));
        }
        OutputFormat::Pretty => {
            println!(
                "endpoint={} frames={} bytes={} headers={}/{} motion={} max_motion={} alarms={} skipped={} fps={:.1}",
                endpoint,
                stats.frames,
                stats.bytes_sent,
                stats.config_headers_sent,
                stats.config_headers_sent + stats.config_headers_suppressed,
                stats.last_motion,
                stats.max_motion,
                stats.alarms,
                stats.retention.skipped,
                stats.fps
            );
        }
        OutputFormat::Raw => {
            println!(
                "{}",
                camstream_pipeline::stats::annotation_text(
                    stats.fps,
                    stats.frames,
                    stats.last_motion,
                    stats.retention.skipped
                )
            );
        }
    }
}

pub fn print_receive_stats(
    stats: &DecodeStats,
    endpoint: &str,
    bytes_written: u64,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let report = ReceiveReport {
                kind: "receive-stats",
                endpoint,
                bytes_written,
                stats,
            };
            println!(
                "{}",
                serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let rows = vec![
                ("endpoint", endpoint.to_string()),
                ("resolution", resolution(stats)),
                ("messages", stats.messages.to_string()),
                ("frames", stats.frames.to_string()),
                ("config headers", stats.config_headers.to_string()),
                ("bytes received", stats.bytes_received.to_string()),
                ("bytes written", bytes_written.to_string()),
                ("motion messages", stats.motion_messages.to_string()),
                ("alarms", stats.alarms.to_string()),
            ];
            println!("{}", key_value_table(rows));
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "endpoint={} resolution={} frames={} headers={} bytes={} motion={} alarms={}",
                endpoint,
                resolution(stats),
                stats.frames,
                stats.config_headers,
                stats.bytes_received,
                stats.last_motion,
                stats.alarms
            );
        }
    }
}

fn resolution(stats: &DecodeStats) -> String {
    match (stats.width, stats.height) {
        (Some(width), Some(height)) => format!("{width}x{height}"),
        _ => "unknown".to_string(),
    }
}

fn key_value_table(rows: Vec<(&str, String)>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["STAT", "VALUE"]);
    for (key, value) in rows {
        table.add_row(vec![key.to_string(), value]);
    }
    table
}
