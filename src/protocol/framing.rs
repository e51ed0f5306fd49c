//! Frame codec shared by client and server.
//!
//! Two framings are supported:
//!
//! - [`Framing::Lines`]: every record is terminated by `\n`. Frame boundaries
//!   do not depend on how TCP splits or coalesces bytes. This is the default.
//! - [`Framing::Legacy`]: records are unframed and reassembled per read using
//!   the `history` scanning rule of older peers. Kept for interoperability;
//!   it can split or merge records when reads do not line up with writes.
//!
//! Line contents are identical in both modes.

use bytes::{Buf, BufMut, BytesMut};
use serde::Deserialize;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use super::record::HISTORY_MARKER;

/// Maximum length of a single line in [`Framing::Lines`] mode.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Wire framing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Newline-terminated records.
    #[default]
    Lines,
    /// Read-boundary reassembly.
    Legacy,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A history line, trimmed, still starting with `history`.
    History(String),
    /// Any other record.
    Record(String),
}

/// A frame to encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A single record.
    Record(String),
    /// A batch of history lines written together.
    History(Vec<String>),
}

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec for chatterbox frames.
#[derive(Debug, Default)]
pub struct FrameCodec {
    framing: Framing,
    /// True while discarding the tail of an oversized line.
    skipping: bool,
}

impl FrameCodec {
    /// Create a codec for the given framing.
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            skipping: false,
        }
    }

    fn decode_lines(&mut self, src: &mut BytesMut) -> Option<Frame> {
        loop {
            if self.skipping {
                match src.iter().position(|b| *b == b'\n') {
                    Some(pos) => {
                        src.advance(pos + 1);
                        self.skipping = false;
                    }
                    None => {
                        src.clear();
                        return None;
                    }
                }
            }

            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_FRAME_LENGTH {
                    warn!(bytes = src.len(), "discarding oversized partial line");
                    src.clear();
                    self.skipping = true;
                }
                return None;
            };

            let line = src.split_to(pos + 1);
            if pos > MAX_FRAME_LENGTH {
                warn!(bytes = pos, "skipped oversized line");
                continue;
            }

            match line_to_frame(&line[..pos]) {
                Some(frame) => return Some(frame),
                None => continue,
            }
        }
    }

    fn decode_legacy(&mut self, src: &mut BytesMut) -> Option<Frame> {
        loop {
            let available = complete_utf8_len(src);
            if available == 0 {
                return None;
            }

            let window = &src[..available];
            if contains(window, HISTORY_MARKER.as_bytes()) {
                let end = window
                    .iter()
                    .position(|b| *b == b'\n')
                    .map(|pos| pos + 1)
                    .unwrap_or(available);
                let chunk = src.split_to(end);
                let line = String::from_utf8_lossy(&chunk).trim().to_string();
                if line.starts_with(HISTORY_MARKER) {
                    return Some(Frame::History(line));
                }
                debug!("legacy framing dropped a line ahead of a history block");
                continue;
            }

            let chunk = src.split_to(available);
            return Some(Frame::Record(
                String::from_utf8_lossy(&chunk).into_owned(),
            ));
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(match self.framing {
            Framing::Lines => self.decode_lines(src),
            Framing::Legacy => self.decode_legacy(src),
        })
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() || self.skipping {
            src.clear();
            return Ok(None);
        }
        // Unterminated tail before EOF.
        let tail = src.split_to(src.len());
        Ok(line_to_frame(&tail))
    }
}

impl Encoder<Outbound> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match (self.framing, item) {
            (Framing::Lines, Outbound::Record(record)) => put_line(dst, &record),
            (Framing::Lines, Outbound::History(lines)) => {
                for line in &lines {
                    put_line(dst, line);
                }
            }
            (Framing::Legacy, Outbound::Record(record)) => dst.put_slice(record.as_bytes()),
            (Framing::Legacy, Outbound::History(lines)) => {
                dst.put_slice(lines.join("\n").as_bytes())
            }
        }
        Ok(())
    }
}

fn put_line(dst: &mut BytesMut, line: &str) {
    dst.reserve(line.len() + 1);
    dst.put_slice(line.as_bytes());
    dst.put_u8(b'\n');
}

/// Turn one line (without its `\n`) into a frame. Empty lines and invalid
/// UTF-8 yield `None`.
fn line_to_frame(bytes: &[u8]) -> Option<Frame> {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    let line = match std::str::from_utf8(bytes) {
        Ok(line) => line,
        Err(e) => {
            warn!("dropping line with invalid UTF-8: {}", e);
            return None;
        }
    };
    if line.is_empty() {
        return None;
    }
    if line.starts_with(HISTORY_MARKER) {
        Some(Frame::History(line.trim().to_string()))
    } else {
        Some(Frame::Record(line.to_string()))
    }
}

/// Length of the buffer prefix that does not end inside a UTF-8 sequence.
fn complete_utf8_len(buf: &[u8]) -> usize {
    match std::str::from_utf8(buf) {
        Ok(_) => buf.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => buf.len(),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
