//! detstreamd - camera object-detection streamer
//!
//! Captures frames, runs the detector on a center-cropped square and streams
//! one JSON line per frame to a single TCP client at a time.
//!
//! Settings are layered: built-in defaults, then the TOML file, then
//! `DETSTREAM_*` environment variables, then command-line flags.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use detection_stream::config::ConfigOverrides;
use detection_stream::{DetectionServer, Pipeline, StreamerConfig};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Stream camera object detections as JSON lines over TCP"
)]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "DETSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8080.
    #[arg(long)]
    addr: Option<String>,

    /// Frame source: v4l2:///dev/videoN, a device index, dir://PATH or stub://NAME.
    #[arg(long)]
    source: Option<String>,

    /// ONNX detector model, or stub:// for the no-op detector.
    #[arg(long)]
    model: Option<String>,

    /// Class name file, one name per line.
    #[arg(long)]
    classes: Option<PathBuf>,

    /// Compute device: auto, cuda, mps or cpu.
    #[arg(long)]
    device: Option<String>,

    /// Preview output: none, snapshot or snapshot:PATH.
    #[arg(long)]
    preview: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let overrides = ConfigOverrides {
        addr: args.addr,
        source: args.source,
        model: args.model,
        classes: args.classes,
        device: args.device,
        preview: args.preview,
    };
    let config = StreamerConfig::load_with(args.config.as_deref(), &overrides)?;
    let listen_addr = config.listen_addr()?;

    let mut pipeline = Pipeline::from_config(&config)?;

    ctrlc::set_handler(|| {
        log::info!("shutdown signal received, exiting");
        std::process::exit(0);
    })?;

    let server = DetectionServer::bind(listen_addr)?;
    log::info!(
        "detstreamd listening on {} (source={}, target={}px)",
        server.local_addr(),
        config.source.uri,
        config.target_size
    );

    server.serve_forever(&mut pipeline)
}
