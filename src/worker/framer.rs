//! Incremental framer for a stream of concatenated JSON values.
//!
//! The worker does not promise one object per line: objects may be split
//! across arbitrarily many reads, several may arrive in one read, and other
//! top-level values (numbers, strings, arrays) may be interleaved with them.
//! [`ObjectFramer`] scans the byte stream with a small state machine that
//! tracks the shape of the current top-level value, its nesting depth and
//! whether the cursor is inside a string literal (honouring `\` escapes).
//! Each time nesting returns to zero a complete value has been seen; objects
//! are parsed with `serde_json` and yielded, everything else is dropped.
//!
//! Scanning is resumable: bytes already inspected are not revisited when more
//! data arrives, so a large value trickling in costs linear time overall.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use pdal_session::worker::framer::ObjectFramer;
//!
//! let objects = FramedRead::new(child_stdout, ObjectFramer::new(Some(1 << 20)));
//! ```

use bytes::{Buf, BytesMut};
use serde_json::Value;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::protocol::Payload;
use crate::{AppError, Result};

/// Shape of the top-level value currently being scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Object,
    Array,
    Text,
    /// Number, literal, or stray byte outside any structure.
    Bare,
}

/// Decoder yielding every top-level JSON object found in a byte stream.
///
/// # Decoder
///
/// Returns `Ok(None)` while the current value is incomplete. Completed
/// objects that fail to parse are logged at `WARN` and skipped. When the
/// bytes of a single value exceed the configured limit the decoder resets,
/// discards its buffer and returns [`AppError::Framing`].
#[derive(Debug)]
pub struct ObjectFramer {
    max_frame_bytes: Option<usize>,
    current: Option<Shape>,
    /// Bytes of the current value already inspected.
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl ObjectFramer {
    /// Create a framer; `max_frame_bytes` of `None` buffers without bound.
    #[must_use]
    pub fn new(max_frame_bytes: Option<usize>) -> Self {
        Self {
            max_frame_bytes,
            current: None,
            scanned: 0,
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// `true` while part of a value is buffered.
    #[must_use]
    pub fn is_mid_value(&self) -> bool {
        self.current.is_some()
    }

    fn reset(&mut self) {
        self.current = None;
        self.scanned = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }

    /// Skip inter-value whitespace and classify the next value, if any.
    fn begin_value(&mut self, src: &mut BytesMut) -> Option<Shape> {
        let blank = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
        src.advance(blank);

        let shape = match src.first()? {
            b'{' => Shape::Object,
            b'[' => Shape::Array,
            b'"' => Shape::Text,
            _ => Shape::Bare,
        };
        match shape {
            Shape::Object | Shape::Array => {
                self.depth = 1;
                self.scanned = 1;
            }
            Shape::Text => {
                self.in_string = true;
                self.scanned = 1;
            }
            Shape::Bare => self.scanned = 0,
        }
        self.current = Some(shape);
        Some(shape)
    }

    /// Find the end of a bare token; a delimiter in first position is a
    /// one-byte token of its own.
    fn scan_bare(&mut self, src: &BytesMut) -> Option<usize> {
        let end = src
            .iter()
            .enumerate()
            .skip(self.scanned)
            .find(|(_, b)| is_delimiter(**b))
            .map(|(i, _)| i.max(1));
        if end.is_none() {
            self.scanned = src.len();
        }
        end
    }

    /// Advance the nesting state machine; returns the exclusive end offset
    /// once the current structured value is complete.
    fn scan_structured(&mut self, src: &BytesMut) -> Option<usize> {
        for (i, &byte) in src.iter().enumerate().skip(self.scanned) {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        self.scanned = src.len();
        None
    }

    fn over_limit(&self, len: usize) -> bool {
        self.max_frame_bytes.is_some_and(|max| len > max)
    }

    fn overflow(&mut self, src: &mut BytesMut, len: usize) -> AppError {
        self.reset();
        src.clear();
        AppError::Framing(format!(
            "value of at least {len} bytes exceeds the {} byte limit",
            self.max_frame_bytes.unwrap_or_default()
        ))
    }
}

impl Default for ObjectFramer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Decoder for ObjectFramer {
    type Item = Payload;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Payload>> {
        loop {
            let shape = match self.current {
                Some(shape) => shape,
                None => match self.begin_value(src) {
                    Some(shape) => shape,
                    None => return Ok(None),
                },
            };

            let end = match shape {
                Shape::Bare => self.scan_bare(src),
                Shape::Object | Shape::Array | Shape::Text => self.scan_structured(src),
            };

            let Some(end) = end else {
                if self.over_limit(src.len()) {
                    return Err(self.overflow(src, src.len()));
                }
                return Ok(None);
            };

            if self.over_limit(end) {
                return Err(self.overflow(src, end));
            }

            let frame = src.split_to(end);
            self.reset();

            if shape != Shape::Object {
                debug!(
                    bytes = frame.len(),
                    shape = ?shape,
                    "framer: discarding non-object top-level value"
                );
                continue;
            }

            match serde_json::from_slice::<Value>(&frame) {
                Ok(Value::Object(map)) => return Ok(Some(map)),
                Ok(other) => {
                    debug!(value = %other, "framer: discarding non-object value");
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        raw = %String::from_utf8_lossy(&frame),
                        "framer: malformed object, skipping"
                    );
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Payload>> {
        if let Some(map) = self.decode(src)? {
            return Ok(Some(map));
        }
        if !src.is_empty() {
            if self.current == Some(Shape::Bare) {
                debug!(bytes = src.len(), "framer: discarding trailing scalar at eof");
            } else {
                debug!(bytes = src.len(), "framer: dropping incomplete value at eof");
            }
            src.clear();
        }
        self.reset();
        Ok(None)
    }
}

fn is_delimiter(byte: u8) -> bool {
    byte.is_ascii_whitespace() || matches!(byte, b'{' | b'}' | b'[' | b']' | b'"' | b',' | b':')
}
