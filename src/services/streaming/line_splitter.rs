//! Incremental byte-stream line splitter
//!
//! Turns arbitrarily sized byte chunks into event-stream lines terminated by
//! `\r`, `\n` or `\r\n`. Chunk boundaries need not line up with line
//! boundaries: the unterminated tail of a chunk is carried over and scanning
//! resumes where it stopped.

use bytes::{Bytes, BytesMut};

const NEW_LINE: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';
const COLON: u8 = b':';

/// Splits a byte stream into lines, one instance per stream.
///
/// Each line is handed to the sink together with the length of the field name
/// in front of its first colon (`None` when the line has no colon).
#[derive(Debug, Default)]
pub struct LineSplitter {
    /// Bytes after the last confirmed line terminator
    buffer: Bytes,

    /// Read position inside `buffer`
    position: usize,

    /// Length of the field portion of the current line
    field_length: Option<usize>,

    /// A `\r` ended the previous line; swallow a following `\n`
    discard_trailing_newline: bool,
}

impl LineSplitter {
    /// Create a new splitter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered bytes that do not form a complete line yet
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one chunk, invoking `on_line` for every line it completes
    pub fn feed<F>(&mut self, chunk: Bytes, mut on_line: F)
    where
        F: FnMut(&[u8], Option<usize>),
    {
        if self.buffer.is_empty() {
            self.buffer = chunk;
            self.position = 0;
            self.field_length = None;
        } else {
            let mut joined = BytesMut::with_capacity(self.buffer.len() + chunk.len());
            joined.extend_from_slice(&self.buffer);
            joined.extend_from_slice(&chunk);
            self.buffer = joined.freeze();
        }

        let buffer = self.buffer.clone();
        let len = buffer.len();
        let mut position = self.position;
        let mut line_start = 0;

        while position < len {
            if self.discard_trailing_newline {
                if buffer[position] == NEW_LINE {
                    position += 1;
                    line_start = position;
                }
                self.discard_trailing_newline = false;
            }

            let mut line_end = None;
            while position < len && line_end.is_none() {
                match buffer[position] {
                    COLON => {
                        if self.field_length.is_none() {
                            self.field_length = Some(position - line_start);
                        }
                    }
                    CARRIAGE_RETURN => {
                        self.discard_trailing_newline = true;
                        line_end = Some(position);
                    }
                    NEW_LINE => line_end = Some(position),
                    _ => {}
                }
                position += 1;
            }

            let Some(line_end) = line_end else {
                // line continues in the next chunk
                break;
            };

            on_line(&buffer[line_start..line_end], self.field_length.take());
            line_start = position;
        }

        if line_start == len {
            self.buffer = Bytes::new();
            self.position = 0;
        } else {
            // re-slice, no copy of the consumed prefix
            self.buffer = buffer.slice(line_start..);
            self.position = position - line_start;
        }
    }
}
