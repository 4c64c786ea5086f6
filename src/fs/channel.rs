use std::io;
use std::sync::RwLockReadGuard;

use crate::error::Result;

use super::backing::BackingFile;
use super::scan::RawRecord;

/// A streaming view over one live record's content range. The channel owns a
/// shared lock on the backing file for its whole lifetime, so the record it
/// is pinned to cannot be tombstoned, moved, or reclaimed until the channel
/// is dropped; writers block until then.
pub struct ReadChannel<'a> {
    guard: RwLockReadGuard<'a, BackingFile>,
    name: String,
    start: u32,
    len: u32,
    pos: u64,
}

impl<'a> ReadChannel<'a> {
    pub(crate) fn new(guard: RwLockReadGuard<'a, BackingFile>, record: RawRecord) -> Self {
        ReadChannel {
            start: record.content_offset(),
            len: record.header.content_len as u32,
            name: record.name,
            guard,
            pos: 0,
        }
    }

    /// Name of the pinned record.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Content length of the pinned record.
    pub fn len(&self) -> u64 {
        self.len as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current sequential read position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Reads into `buf` at an absolute position within the content, without
    /// moving the sequential cursor. Returns the number of bytes read, which
    /// is `buf.len()` clamped to the remaining content; 0 at or past EOF.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        if pos >= self.len as u64 {
            return Ok(0);
        }
        let n = (self.len as u64 - pos).min(buf.len() as u64) as usize;
        self.guard
            .read_at(self.start + pos as u32, &mut buf[..n])?;
        Ok(n)
    }
}

impl io::Read for ReadChannel<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .read_at(self.pos, buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.pos += n as u64;
        Ok(n)
    }
}
