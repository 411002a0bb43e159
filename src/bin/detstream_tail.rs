//! detstream_tail - print detections received from a running detstreamd

use std::io::Write;
use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;

use detection_stream::{FrameMessage, MessageReader};

#[derive(Parser, Debug)]
#[command(author, version, about = "Print detection messages from a detstreamd server")]
struct Args {
    /// Server address.
    #[arg(long, env = "DETSTREAM_TAIL_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Stop after this many messages.
    #[arg(long)]
    count: Option<u64>,

    /// Print each line exactly as received instead of a summary.
    #[arg(long)]
    raw: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut reader = MessageReader::connect(args.addr)?;
    log::info!("connected to {}", args.addr);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    while args.count.map_or(true, |count| reader.received() < count) {
        if args.raw {
            match reader.next_line()? {
                Some(line) => writeln!(out, "{}", line)?,
                None => break,
            }
        } else {
            match reader.next() {
                Some(message) => writeln!(out, "{}", summarize(reader.received(), &message?))?,
                None => break,
            }
        }
    }

    log::info!("received {} messages", reader.received());
    Ok(())
}

fn summarize(index: u64, message: &FrameMessage) -> String {
    if message.detections.is_empty() {
        return format!("#{}: no detections", index);
    }
    let boxes: Vec<String> = message
        .detections
        .iter()
        .map(|d| {
            format!(
                "{} [{}, {}, {}, {}]",
                d.class_name, d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]
            )
        })
        .collect();
    format!("#{}: {}", index, boxes.join("; "))
}
