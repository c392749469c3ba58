//! Incremental line reading for files that are still being written.
//!
//! [`LineReader`] only hands out lines that have been terminated by `\n` (or
//! `\r\n`). A partially written line at the end of the stream stays buffered
//! until the writer finishes it, and the reader keeps track of the byte offset
//! where the next line starts so a later process can resume from it.

use crate::error::{Error, Result};
use std::borrow::Cow;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};

/// Default capacity of the internal read buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// A complete line together with the offset where the following line starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    content: Vec<u8>,
    next_position: u64,
}

impl Line {
    /// Line bytes without the terminator.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }

    /// Byte offset right after this line's terminator. Passing it to
    /// [`LineReader::at_position`] resumes reading with the next line.
    pub fn next_position(&self) -> u64 {
        self.next_position
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// Reads terminated lines from a stream that may be appended to concurrently.
///
/// Reaching the end of the stream is not final: [`read_line`](Self::read_line)
/// returns `Ok(None)` and the next call picks up whatever has been appended
/// since. Lines may be longer than the internal buffer.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: R,
    next_position: u64,
    pending: Vec<u8>,
    finalized: bool,
}

impl<R: Read> LineReader<BufReader<R>> {
    /// Creates a reader starting at the stream's current position, counted as offset 0.
    pub fn new(reader: R) -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE, reader)
    }

    pub fn with_capacity(capacity: usize, reader: R) -> Self {
        LineReader::from_buf_reader(BufReader::with_capacity(capacity, reader))
    }
}

impl<R: Read + Seek> LineReader<BufReader<R>> {
    /// Creates a reader that starts scanning at `position` bytes into `source`.
    pub fn at_position(mut source: R, position: u64) -> Result<Self> {
        let actual = source.seek(SeekFrom::Start(position))?;
        if actual != position {
            return Err(Error::Reposition {
                requested: position,
                actual,
            });
        }

        let mut reader = Self::new(source);
        reader.next_position = position;
        Ok(reader)
    }
}

impl<R: BufRead> LineReader<R> {
    /// Uses an already buffered reader as-is. Its buffer size bounds how much
    /// is pulled per chunk, not how long a line can be.
    pub fn from_buf_reader(reader: R) -> Self {
        Self {
            reader,
            next_position: 0,
            pending: Vec::new(),
            finalized: false,
        }
    }

    /// Reads the next terminated line.
    ///
    /// Returns `Ok(None)` when the stream has no complete line available yet.
    /// Bytes of an unfinished line are kept and completed by later calls.
    /// Once [`finalize`](Self::finalize) has been called, an unterminated
    /// remainder at the end of the stream is returned as the last line.
    pub fn read_line(&mut self) -> Result<Option<Line>> {
        if self.fill_pending()? {
            return Ok(Some(self.take_line()));
        }

        if self.finalized && !self.pending.is_empty() {
            return Ok(Some(Line {
                content: std::mem::take(&mut self.pending),
                next_position: self.next_position,
            }));
        }

        Ok(None)
    }

    /// Returns the next line even if it has not been terminated.
    ///
    /// Meant for when the caller knows the file will not grow any further.
    /// A trailing `\r` is kept on an unterminated line since it cannot be
    /// told apart from content.
    pub fn read_last_line(&mut self) -> Result<Vec<u8>> {
        if self.fill_pending()? {
            return Ok(self.take_line().into_content());
        }
        Ok(std::mem::take(&mut self.pending))
    }

    /// Declares that the underlying file will not be appended to anymore.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Offset of the first byte not yet consumed from the stream.
    pub fn position(&self) -> u64 {
        self.next_position
    }

    /// Number of buffered bytes belonging to a line that is not terminated yet.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Moves bytes from the stream into `pending` until a newline is found
    /// (returns `true`) or the stream has nothing more to give (`false`).
    fn fill_pending(&mut self) -> std::io::Result<bool> {
        loop {
            let (consumed, terminated) = {
                let chunk = self.reader.fill_buf()?;
                if chunk.is_empty() {
                    return Ok(false);
                }
                match chunk.iter().position(|&b| b == b'\n') {
                    Some(newline) => {
                        self.pending.extend_from_slice(&chunk[..=newline]);
                        (newline + 1, true)
                    }
                    None => {
                        self.pending.extend_from_slice(chunk);
                        (chunk.len(), false)
                    }
                }
            };
            self.reader.consume(consumed);
            self.next_position += consumed as u64;

            if terminated {
                return Ok(true);
            }
        }
    }

    /// Takes the newline-terminated contents of `pending` as a line.
    fn take_line(&mut self) -> Line {
        let mut content = std::mem::take(&mut self.pending);
        content.pop();
        drop_cr(&mut content);
        Line {
            content,
            next_position: self.next_position,
        }
    }
}

fn drop_cr(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
}
