//! Camera object-detection streamer.
//!
//! This crate captures frames from a camera, runs an object detector over each
//! frame and streams the detected boxes to a single TCP client as JSON lines.
//!
//! # Per-frame pipeline
//!
//! ```text
//! FrameSource -> prepare (center crop + resize) -> DetectorBackend
//!             -> FrameMessage -> "{...}\n" on the socket -> Preview
//! ```
//!
//! The whole pipeline is synchronous. One accepted connection is served at a
//! time; a second client waits in the listen backlog until the first session
//! ends.
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (synthetic, image directory, V4L2 camera)
//! - `process`: Center crop and resize into the square inference frame
//! - `detect`: Detector backends and compute device selection
//! - `classes`: Class name table
//! - `wire`: Line-delimited JSON message format
//! - `render`: Annotated preview output
//! - `session`, `server`: Per-connection loop and the accept loop
//! - `client`: Reader for the line protocol

pub mod classes;
pub mod client;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod process;
pub mod render;
pub mod server;
pub mod session;
pub mod wire;

pub use classes::ClassNames;
pub use client::MessageReader;
pub use config::StreamerConfig;
pub use detect::{open_backend, ComputeDevice, DetectorBackend, RawDetection, StubBackend};
pub use frame::RawFrame;
pub use ingest::{open_source, FrameSource, ImageDirSource, SourceStats, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::{v4l2::V4l2Config, V4l2Source};
pub use process::{center_crop_region, prepare, CropRegion, ProcessedFrame};
pub use render::{Headless, Preview, SnapshotPreview};
pub use server::DetectionServer;
pub use session::{Pipeline, Session, SessionEnd, SessionReport, MAX_DETECTOR_FAILURES};
pub use wire::{decode_line, encode_line, Detection, FrameMessage};

/// Side length of the square frame handed to the detector.
pub const DEFAULT_TARGET_SIZE: u32 = 1024;
