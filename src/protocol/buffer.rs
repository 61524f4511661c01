//! Growable byte buffer used for command assembly and response building
//!
//! Growth doubles the capacity until the request fits. A failed growth sets
//! a sticky flag: every later write fails fast, and whoever consumes the
//! buffer checks [`Buffer::is_failed`] before trusting its contents. Only
//! [`Buffer::clear`] resets the flag.

use std::fmt;
use std::io::{self, Read};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use url::Url;

use crate::common::Error;

/// Starting capacity of a buffer, in bytes
pub const INITIAL_BUFFER_SIZE: usize = 2048;

/// Default ceiling for a single buffer (64 MB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Growth failure; the buffer is now in its failed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("buffer cannot grow to {requested} bytes")]
pub struct BufferFull {
    pub requested: usize,
}

impl From<BufferFull> for Error {
    fn from(e: BufferFull) -> Self {
        Error::BufferExhausted {
            requested: e.requested,
        }
    }
}

/// Append-only byte buffer with doubling growth and a sticky failure flag
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    initial_size: usize,
    max_size: usize,
    failed: bool,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    /// Create an empty buffer; storage is allocated on first write
    pub fn new() -> Self {
        Self::with_limits(INITIAL_BUFFER_SIZE, DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Create a buffer with a custom starting size and ceiling
    pub fn with_limits(initial_size: usize, max_size: usize) -> Self {
        Self {
            data: Vec::new(),
            initial_size: initial_size.max(1),
            max_size: max_size.max(initial_size.max(1)),
            failed: false,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Whether a growth failure happened since the last [`Buffer::clear`]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Make room for a total of `required` bytes
    pub fn ensure_capacity(&mut self, required: usize) -> Result<(), BufferFull> {
        if self.failed {
            return Err(BufferFull { requested: required });
        }
        if required <= self.data.capacity() {
            return Ok(());
        }

        let mut new_size = self.data.capacity().max(self.initial_size);
        while new_size < required {
            new_size = match new_size.checked_mul(2) {
                Some(size) => size,
                None => return self.fail(required),
            };
        }
        if new_size > self.max_size {
            if required > self.max_size {
                return self.fail(required);
            }
            new_size = self.max_size;
        }

        let additional = new_size - self.data.len();
        if self.data.try_reserve_exact(additional).is_err() {
            return self.fail(required);
        }
        Ok(())
    }

    fn fail(&mut self, requested: usize) -> Result<(), BufferFull> {
        tracing::warn!(requested, max = self.max_size, "Buffer growth failed");
        self.failed = true;
        Err(BufferFull { requested })
    }

    /// Append raw bytes
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BufferFull> {
        let required = self.data.len().saturating_add(bytes.len());
        self.ensure_capacity(required)?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_str(&mut self, text: &str) -> Result<(), BufferFull> {
        self.write(text.as_bytes())
    }

    /// Append formatted text
    pub fn write_formatted(&mut self, args: fmt::Arguments<'_>) -> Result<(), BufferFull> {
        if let Some(text) = args.as_str() {
            return self.write_str(text);
        }

        struct Adapter<'a> {
            buf: &'a mut Buffer,
            error: Option<BufferFull>,
        }

        impl fmt::Write for Adapter<'_> {
            fn write_str(&mut self, s: &str) -> fmt::Result {
                self.buf.write_str(s).map_err(|e| {
                    self.error = Some(e);
                    fmt::Error
                })
            }
        }

        let mut adapter = Adapter {
            buf: self,
            error: None,
        };
        match fmt::write(&mut adapter, args) {
            Ok(()) => Ok(()),
            Err(_) => {
                let requested = adapter.buf.len();
                Err(adapter.error.unwrap_or(BufferFull { requested }))
            }
        }
    }

    /// Lets `write!(buf, ...)` target the buffer directly
    pub fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<(), BufferFull> {
        self.write_formatted(args)
    }

    /// Append the base64 encoding of `bytes` (standard alphabet, no wrapping)
    pub fn write_base64(&mut self, bytes: &[u8]) -> Result<(), BufferFull> {
        let encoded_len = base64::encoded_len(bytes.len(), true).ok_or(BufferFull {
            requested: usize::MAX,
        })?;
        let start = self.data.len();
        self.ensure_capacity(start.saturating_add(encoded_len))?;
        self.data.resize(start + encoded_len, 0);
        match STANDARD.encode_slice(bytes, &mut self.data[start..]) {
            Ok(written) => {
                self.data.truncate(start + written);
                Ok(())
            }
            Err(_) => {
                self.data.truncate(start);
                self.fail(start + encoded_len)
            }
        }
    }

    /// Append text with XML special characters escaped
    pub fn write_escaped(&mut self, text: &str) -> Result<(), BufferFull> {
        let mut plain = 0;
        for (i, c) in text.char_indices() {
            let entity = match c {
                '&' => "&amp;",
                '<' => "&lt;",
                '>' => "&gt;",
                '"' => "&quot;",
                '\'' => "&apos;",
                _ => continue,
            };
            self.write_str(&text[plain..i])?;
            self.write_str(entity)?;
            plain = i + c.len_utf8();
        }
        self.write_str(&text[plain..])
    }

    /// Append `path` as a `file://` URI
    ///
    /// Paths the platform does not consider absolute (a Windows path on
    /// Unix, or a relative one) are rooted at `/` with backslashes turned
    /// into forward slashes.
    pub fn write_file_uri(&mut self, path: &Path) -> Result<(), BufferFull> {
        let url = Url::from_file_path(path).or_else(|()| {
            let mut rooted = path.to_string_lossy().replace('\\', "/");
            if !rooted.starts_with('/') {
                rooted.insert(0, '/');
            }
            Url::from_file_path(&rooted)
        });
        match url {
            Ok(url) => self.write_escaped(url.as_str()),
            Err(()) => {
                self.write_str("file:///")?;
                self.write_escaped(&path.to_string_lossy())
            }
        }
    }

    /// Drop the first `n` bytes (a consumed command), keeping the rest
    pub fn delete_prefix(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.drain(..n);
    }

    /// Empty the buffer and reset the failed flag; capacity is kept
    pub fn clear(&mut self) {
        self.data.clear();
        self.failed = false;
    }

    /// Position of the first occurrence of `byte`
    pub fn find(&self, byte: u8) -> Option<usize> {
        self.data.iter().position(|&b| b == byte)
    }

    /// Read up to `chunk` bytes from `reader` onto the end of the buffer
    ///
    /// Returns the number of bytes read; zero means end of stream.
    pub fn read_from<R: Read + ?Sized>(&mut self, reader: &mut R, chunk: usize) -> io::Result<usize> {
        let start = self.data.len();
        self.ensure_capacity(start.saturating_add(chunk))
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        self.data.resize(start + chunk, 0);
        let result = reader.read(&mut self.data[start..]);
        let read = *result.as_ref().unwrap_or(&0);
        self.data.truncate(start + read);
        result
    }
}
