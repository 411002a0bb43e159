//! Line-delimited JSON wire format.
//!
//! Each processed frame becomes one line:
//!
//! ```text
//! {"detections": [{"class_name": "car", "bbox": [100, 100, 300, 300]}]}\n
//! ```
//!
//! The text layout is fixed: `", "` between elements, `": "` after keys and
//! every non-ASCII character escaped as `\uXXXX`, so a line never contains a
//! raw newline and stays byte-identical for existing clients.

use std::io;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::ser::{CompactFormatter, Formatter};

use crate::classes::ClassNames;
use crate::detect::RawDetection;

/// One detected object as sent to the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    /// `[x_min, y_min, x_max, y_max]` in processed-frame pixels.
    pub bbox: [i32; 4],
}

impl Detection {
    /// Convert a backend detection for a `target x target` frame.
    ///
    /// Coordinates are truncated toward zero, clamped into `[0, target)` and
    /// ordered so that `min <= max` on both axes.
    pub fn from_raw(raw: &RawDetection, classes: &ClassNames, target: u32) -> Result<Self> {
        let class_name = classes.name(raw.class_id)?.to_string();
        let limit = target.saturating_sub(1).min(i32::MAX as u32) as i32;
        let [x1, y1, x2, y2] = raw.bbox.map(|v| (v.trunc() as i32).clamp(0, limit));
        Ok(Self {
            class_name,
            bbox: [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)],
        })
    }
}

/// All detections of one frame, in detector order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMessage {
    pub detections: Vec<Detection>,
}

impl FrameMessage {
    pub fn from_raw(raw: &[RawDetection], classes: &ClassNames, target: u32) -> Result<Self> {
        let detections = raw
            .iter()
            .map(|d| Detection::from_raw(d, classes, target))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { detections })
    }
}

/// Compact separators with a space after `,` and `:`, ASCII-only output.
struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        // DEL is ASCII but still written as an escape.
        if fragment.is_ascii() && !fragment.contains('\x7f') {
            return CompactFormatter.write_string_fragment(writer, fragment);
        }
        for ch in fragment.chars() {
            if ch.is_ascii() && ch != '\x7f' {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Serialize `message` as one protocol line, including the trailing `\n`.
pub fn encode_line(message: &FrameMessage) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(32 + message.detections.len() * 48);
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedAsciiFormatter);
    message
        .serialize(&mut ser)
        .context("failed to serialize frame message")?;
    buf.push(b'\n');
    Ok(buf)
}

/// Parse one protocol line. A trailing `\n` or `\r\n` is accepted.
pub fn decode_line(line: &str) -> Result<FrameMessage> {
    let line = line.trim_end_matches(['\n', '\r']);
    serde_json::from_str(line).context("malformed frame message")
}
