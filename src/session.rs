//! Per-connection detection loop.
//!
//! A `Session` owns one accepted stream and repeatedly pulls a frame, prepares
//! it, runs the detector and writes one JSON line. Nothing is ever read from
//! the client. The loop ends when the client goes away, the frame source
//! runs dry or the detector keeps failing; only an internal invariant
//! violation (a class index outside the class name table) escapes as an error.

use std::fmt;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::classes::ClassNames;
use crate::config::{PreviewSettings, StreamerConfig};
use crate::detect::{open_backend, ComputeDevice, DetectorBackend, DeviceCapabilities};
use crate::ingest::{open_source, FrameSource};
use crate::process::prepare;
use crate::render::{Headless, Preview, SnapshotPreview};
use crate::wire::{encode_line, FrameMessage};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive inference failures after which a session gives up.
///
/// Skipped frames write nothing, so without a limit a dead detector would
/// never notice the client leaving.
pub const MAX_DETECTOR_FAILURES: u32 = 10;

/// Why a session stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed or reset the connection.
    ClientDisconnected,
    /// A write failed for a reason other than the peer leaving.
    WriteFailed,
    /// The frame source reported end of stream.
    SourceExhausted,
    /// The frame source failed to produce a frame.
    SourceFailed,
    /// Inference failed on `MAX_DETECTOR_FAILURES` frames in a row.
    DetectorFailed,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SessionEnd::ClientDisconnected => "client disconnected",
            SessionEnd::WriteFailed => "write failed",
            SessionEnd::SourceExhausted => "frame source exhausted",
            SessionEnd::SourceFailed => "frame source failed",
            SessionEnd::DetectorFailed => "detector failed",
        };
        f.write_str(reason)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub end: SessionEnd,
    pub frames_sent: u64,
    /// Frames dropped because preprocessing or inference failed.
    pub frames_skipped: u64,
}

/// Process-wide resources shared by every session.
///
/// Built once at startup; each session borrows it mutably, so at most one
/// session can drive the frame source at a time.
pub struct Pipeline {
    source: Box<dyn FrameSource>,
    backend: Box<dyn DetectorBackend>,
    classes: ClassNames,
    target_size: u32,
    preview: Box<dyn Preview>,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        backend: Box<dyn DetectorBackend>,
        classes: ClassNames,
        target_size: u32,
    ) -> Self {
        Self {
            source,
            backend,
            classes,
            target_size,
            preview: Box::new(Headless),
        }
    }

    /// Open every startup resource named by `config`.
    ///
    /// Any failure here is fatal: a missing class table, an unreachable
    /// camera or a model the table cannot cover stops the process before the
    /// listener is bound.
    pub fn from_config(config: &StreamerConfig) -> Result<Self> {
        let classes = ClassNames::load(&config.model.classes)?;
        log::info!(
            "loaded {} class names from {}",
            classes.len(),
            config.model.classes.display()
        );

        let device = ComputeDevice::select(config.device, DeviceCapabilities::probe())?;
        log::info!("using device: {}", device);

        let mut backend = open_backend(&config.model, device)
            .with_context(|| format!("failed to load model {}", config.model.path))?;
        backend.warm_up()?;
        if let Some(count) = backend.class_count() {
            classes.check_covers(count)?;
        }
        log::info!("detector {} ready", backend.name());

        let mut source = open_source(&config.source)?;
        source
            .connect()
            .with_context(|| format!("failed to open frame source {}", config.source.uri))?;

        let preview: Box<dyn Preview> = match &config.preview {
            PreviewSettings::None => Box::new(Headless),
            PreviewSettings::Snapshot(path) => {
                log::info!("writing preview frames to {}", path.display());
                Box::new(SnapshotPreview::new(path))
            }
        };

        Ok(Self::new(source, backend, classes, config.target_size).with_preview(preview))
    }

    pub fn with_preview(mut self, preview: Box<dyn Preview>) -> Self {
        self.preview = preview;
        self
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }
}

/// One accepted connection.
pub struct Session<'p, W: Write> {
    pipeline: &'p mut Pipeline,
    stream: W,
    peer: String,
    detector_failures: u32,
}

enum Step {
    Sent,
    Skipped,
    Ended(SessionEnd),
}

impl<'p, W: Write> Session<'p, W> {
    pub fn new(pipeline: &'p mut Pipeline, stream: W, peer: impl Into<String>) -> Self {
        Self {
            pipeline,
            stream,
            peer: peer.into(),
            detector_failures: 0,
        }
    }

    /// Stream detections until the client leaves or the source ends.
    pub fn run(mut self) -> Result<SessionReport> {
        let mut frames_sent = 0u64;
        let mut frames_skipped = 0u64;
        let mut last_stats = Instant::now();

        let end = loop {
            match self.step()? {
                Step::Sent => frames_sent += 1,
                Step::Skipped => frames_skipped += 1,
                Step::Ended(end) => break end,
            }

            if last_stats.elapsed() >= STATS_INTERVAL {
                let stats = self.pipeline.source.stats();
                log::info!(
                    "session {}: frames_sent={} skipped={} captured={} source={}",
                    self.peer,
                    frames_sent,
                    frames_skipped,
                    stats.frames_captured,
                    stats.source
                );
                last_stats = Instant::now();
            }
        };

        Ok(SessionReport {
            end,
            frames_sent,
            frames_skipped,
        })
    }

    fn step(&mut self) -> Result<Step> {
        let pipeline = &mut *self.pipeline;

        let frame = match pipeline.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(Step::Ended(SessionEnd::SourceExhausted)),
            Err(err) => {
                log::warn!("frame source {} failed: {:#}", pipeline.source.name(), err);
                return Ok(Step::Ended(SessionEnd::SourceFailed));
            }
        };

        let processed = match prepare(&frame, pipeline.target_size) {
            Ok(processed) => processed,
            Err(err) => {
                log::warn!("dropping frame {}: {:#}", frame.sequence, err);
                return Ok(Step::Skipped);
            }
        };
        drop(frame);

        let raw = match pipeline.backend.detect(&processed.image) {
            Ok(raw) => {
                self.detector_failures = 0;
                raw
            }
            Err(err) => {
                self.detector_failures += 1;
                log::warn!(
                    "detector {} failed on frame {} ({} in a row): {:#}",
                    pipeline.backend.name(),
                    processed.sequence,
                    self.detector_failures,
                    err
                );
                if self.detector_failures >= MAX_DETECTOR_FAILURES {
                    return Ok(Step::Ended(SessionEnd::DetectorFailed));
                }
                return Ok(Step::Skipped);
            }
        };

        let message = FrameMessage::from_raw(&raw, &pipeline.classes, pipeline.target_size)
            .context("detector output does not match the class name table")?;
        let line = encode_line(&message)?;

        if let Err(err) = write_line(&mut self.stream, &line) {
            if is_disconnect(&err) {
                log::info!("client {} disconnected: {}", self.peer, err);
                return Ok(Step::Ended(SessionEnd::ClientDisconnected));
            }
            log::warn!("write to {} failed: {}", self.peer, err);
            return Ok(Step::Ended(SessionEnd::WriteFailed));
        }

        if let Err(err) = pipeline.preview.show(&processed.image, &message.detections) {
            log::debug!("preview failed: {:#}", err);
        }

        Ok(Step::Sent)
    }
}

fn write_line<W: Write>(stream: &mut W, line: &[u8]) -> io::Result<()> {
    stream.write_all(line)?;
    stream.flush()
}

/// Errors that mean the peer is gone rather than something local broke.
pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{RawDetection, StubBackend};
    use crate::ingest::{LatchedSource, SyntheticConfig, SyntheticSource};

    fn finite_source(frames: u64, width: u32, height: u32) -> Box<dyn FrameSource> {
        Box::new(LatchedSource::new(Box::new(SyntheticSource::new(
            SyntheticConfig {
                name: "stub://test".to_string(),
                width,
                height,
                frame_limit: Some(frames),
            },
        ))))
    }

    fn classes() -> ClassNames {
        ClassNames::from_names(["person", "bicycle", "car"])
    }

    /// Accepts `remaining` writes, then fails with `kind`.
    struct ClosingWriter {
        remaining: usize,
        kind: io::ErrorKind,
    }

    impl Write for ClosingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(self.kind, "peer went away"));
            }
            self.remaining -= 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn streams_one_line_per_frame_until_exhausted() -> Result<()> {
        let backend = StubBackend::new()
            .with_detections(vec![RawDetection::new(2, [100.0, 100.0, 300.0, 300.0], 0.9)]);
        let mut pipeline = Pipeline::new(finite_source(3, 1920, 1080), Box::new(backend), classes(), 1024);

        let mut out: Vec<u8> = Vec::new();
        let report = Session::new(&mut pipeline, &mut out, "test").run()?;

        assert_eq!(report.end, SessionEnd::SourceExhausted);
        assert_eq!(report.frames_sent, 3);
        let expected = "{\"detections\": [{\"class_name\": \"car\", \"bbox\": [100, 100, 300, 300]}]}\n";
        assert_eq!(String::from_utf8(out)?, expected.repeat(3));
        Ok(())
    }

    #[test]
    fn empty_source_sends_nothing() -> Result<()> {
        let mut pipeline = Pipeline::new(finite_source(0, 64, 48), Box::new(StubBackend::new()), classes(), 1024);
        let mut out: Vec<u8> = Vec::new();
        let report = Session::new(&mut pipeline, &mut out, "test").run()?;
        assert_eq!(report.end, SessionEnd::SourceExhausted);
        assert_eq!(report.frames_sent, 0);
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn broken_pipe_ends_session_without_error() -> Result<()> {
        let mut pipeline = Pipeline::new(finite_source(10, 64, 48), Box::new(StubBackend::new()), classes(), 32);
        let writer = ClosingWriter {
            remaining: 2,
            kind: io::ErrorKind::BrokenPipe,
        };
        let report = Session::new(&mut pipeline, writer, "test").run()?;
        assert_eq!(report.end, SessionEnd::ClientDisconnected);
        assert_eq!(report.frames_sent, 2);
        Ok(())
    }

    #[test]
    fn other_write_errors_end_session() -> Result<()> {
        let mut pipeline = Pipeline::new(finite_source(10, 64, 48), Box::new(StubBackend::new()), classes(), 32);
        let writer = ClosingWriter {
            remaining: 0,
            kind: io::ErrorKind::TimedOut,
        };
        let report = Session::new(&mut pipeline, writer, "test").run()?;
        assert_eq!(report.end, SessionEnd::WriteFailed);
        assert_eq!(report.frames_sent, 0);
        Ok(())
    }

    #[test]
    fn detector_failure_skips_the_frame() -> Result<()> {
        let backend = StubBackend::new()
            .push_failure("inference blew up")
            .push_result(vec![RawDetection::new(0, [1.0, 2.0, 3.0, 4.0], 0.7)]);
        let mut pipeline = Pipeline::new(finite_source(2, 64, 48), Box::new(backend), classes(), 32);
        let mut out: Vec<u8> = Vec::new();
        let report = Session::new(&mut pipeline, &mut out, "test").run()?;
        assert_eq!(report.frames_sent, 1);
        assert_eq!(report.frames_skipped, 1);
        assert_eq!(
            String::from_utf8(out)?,
            "{\"detections\": [{\"class_name\": \"person\", \"bbox\": [1, 2, 3, 4]}]}\n"
        );
        Ok(())
    }

    #[test]
    fn persistent_detector_failure_ends_session() -> Result<()> {
        let source = Box::new(SyntheticSource::new(SyntheticConfig::default()));
        let backend = StubBackend::new().failing("device lost");
        let mut pipeline = Pipeline::new(source, Box::new(backend), classes(), 32);
        let mut out: Vec<u8> = Vec::new();

        let report = Session::new(&mut pipeline, &mut out, "test").run()?;

        assert_eq!(report.end, SessionEnd::DetectorFailed);
        assert_eq!(report.frames_sent, 0);
        assert_eq!(report.frames_skipped, u64::from(MAX_DETECTOR_FAILURES - 1));
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn successful_frame_resets_detector_failure_count() -> Result<()> {
        let mut backend = StubBackend::new();
        for _ in 0..MAX_DETECTOR_FAILURES - 1 {
            backend = backend.push_failure("flaky");
        }
        backend = backend.push_result(Vec::new());
        for _ in 0..MAX_DETECTOR_FAILURES - 1 {
            backend = backend.push_failure("flaky");
        }
        let frames = u64::from(2 * MAX_DETECTOR_FAILURES);
        let mut pipeline = Pipeline::new(finite_source(frames, 64, 48), Box::new(backend), classes(), 32);
        let mut out: Vec<u8> = Vec::new();

        let report = Session::new(&mut pipeline, &mut out, "test").run()?;

        assert_eq!(report.end, SessionEnd::SourceExhausted);
        assert_eq!(report.frames_skipped, u64::from(2 * (MAX_DETECTOR_FAILURES - 1)));
        assert_eq!(report.frames_sent, 2);
        Ok(())
    }

    #[test]
    fn unknown_class_index_is_fatal() {
        let backend =
            StubBackend::new().with_detections(vec![RawDetection::new(80, [0.0, 0.0, 1.0, 1.0], 0.9)]);
        let mut pipeline = Pipeline::new(finite_source(5, 64, 48), Box::new(backend), classes(), 32);
        let mut out: Vec<u8> = Vec::new();
        assert!(Session::new(&mut pipeline, &mut out, "test").run().is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn exhausted_source_stays_exhausted_for_next_session() -> Result<()> {
        let mut pipeline = Pipeline::new(finite_source(1, 64, 48), Box::new(StubBackend::new()), classes(), 32);
        let first = Session::new(&mut pipeline, Vec::<u8>::new(), "first").run()?;
        assert_eq!(first.frames_sent, 1);
        let second = Session::new(&mut pipeline, Vec::<u8>::new(), "second").run()?;
        assert_eq!(second.end, SessionEnd::SourceExhausted);
        assert_eq!(second.frames_sent, 0);
        Ok(())
    }

    #[test]
    fn classifies_disconnect_errors() {
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::TimedOut)));
    }
}
