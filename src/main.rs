//! Trace replay tool for the bridge filter
//!
//! Replays a captured USB MIDI packet trace through the message filter and
//! prints what the bridge would do with each packet: forward it, rewrite
//! it, or hold it back. Handy for checking remap tables and fader pickup
//! behavior against real captures without any hardware attached.
//!
//! Trace format, one packet per line:
//! ```text
//! IN  1E E2 68 07    # from the controller
//! OUT 1E E2 00 40    # from the DAW
//! ```
//! Blank lines and `#` comments are ignored.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use midi_mc_bridge::midi::format_hex;
use midi_mc_bridge::{MidiFilter, RawPacket};

/// Replay a captured MIDI packet trace through the bridge filter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the trace file
    trace: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let trace = std::fs::read_to_string(&args.trace)
        .with_context(|| format!("reading trace {}", args.trace.display()))?;

    let filter = MidiFilter::default();
    let mut forwarded = 0usize;
    let mut dropped = 0usize;

    for (line_no, line) in trace.lines().enumerate() {
        let Some((direction, packet)) = parse_line(line)
            .with_context(|| format!("trace line {}", line_no + 1))?
        else {
            continue;
        };
        let original = packet;
        let mut packet = packet;
        let forward = match direction {
            Direction::FromController => filter.from_controller(&mut packet),
            Direction::FromHost => filter.from_host(&mut packet),
        };
        let verdict = if !forward {
            dropped += 1;
            "drop".to_string()
        } else if packet != original {
            forwarded += 1;
            format!("forward rewritten -> {}", format_hex(&packet.0))
        } else {
            forwarded += 1;
            "forward".to_string()
        };
        println!(
            "{:4} {} {} | {}",
            line_no + 1,
            direction.label(),
            format_hex(&original.0),
            verdict
        );
    }

    info!(forwarded, dropped, "replay complete");
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    FromController,
    FromHost,
}

impl Direction {
    fn label(&self) -> &'static str {
        match self {
            Direction::FromController => "IN ",
            Direction::FromHost => "OUT",
        }
    }
}

/// Parse one trace line; `None` for blanks and comments.
fn parse_line(line: &str) -> Result<Option<(Direction, RawPacket)>> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(None);
    }
    let mut fields = line.split_whitespace();
    let direction = match fields.next() {
        Some("IN") => Direction::FromController,
        Some("OUT") => Direction::FromHost,
        Some(other) => bail!("unknown direction {other:?}"),
        None => return Ok(None),
    };
    let mut bytes = [0u8; 4];
    for byte in bytes.iter_mut() {
        let field = fields.next().context("expected 4 packet bytes")?;
        let decoded = hex::decode(field).with_context(|| format!("bad hex byte {field:?}"))?;
        if decoded.len() != 1 {
            bail!("bad hex byte {field:?}");
        }
        *byte = decoded[0];
    }
    if fields.next().is_some() {
        bail!("trailing fields after packet bytes");
    }
    Ok(Some((direction, RawPacket(bytes))))
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
