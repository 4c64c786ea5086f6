use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::{errdata, errinput};
#[cfg(test)]
use crate::Error;

/// Size of the container prefix: total capacity and append cursor, both
/// big-endian signed 32-bit integers.
pub const PREFIX_SIZE: u32 = 8;

/// The persisted container prefix. `cursor` is the offset of the next free
/// byte, relative to the start of the record area.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Prefix {
    capacity: i32,
    cursor: i32,
}

impl Prefix {
    fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(PREFIX_SIZE as usize);
        buf.write_i32::<BigEndian>(self.capacity)?;
        buf.write_i32::<BigEndian>(self.cursor)?;
        Ok(buf)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = bytes;
        let capacity = reader.read_i32::<BigEndian>()?;
        let cursor = reader.read_i32::<BigEndian>()?;
        if capacity <= PREFIX_SIZE as i32 {
            return errdata!("container prefix has invalid capacity {capacity}");
        }
        if cursor < 0 || cursor > capacity - PREFIX_SIZE as i32 {
            return errdata!("container prefix has out-of-range append cursor {cursor}");
        }
        Ok(Prefix { capacity, cursor })
    }
}

/// The fixed-capacity backing file. Owns the persisted prefix and exposes
/// positional primitives over the record area; all offsets taken by
/// [`read_at`](BackingFile::read_at) and [`write_at`](BackingFile::write_at)
/// are relative to the start of the record area.
#[derive(Debug)]
pub struct BackingFile {
    file: File,
    path: PathBuf,
    capacity: u32,
    cursor: u32,
}

impl BackingFile {
    /// Opens the backing file at `path`, creating it at `capacity` bytes if
    /// it does not exist. An existing file's prefix is trusted; the
    /// configured capacity applies only on creation.
    pub fn open(path: &Path, capacity: u32) -> Result<Self> {
        if capacity <= PREFIX_SIZE || capacity > i32::MAX as u32 {
            return errinput!("container capacity {capacity} is out of range");
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            let mut backing = BackingFile {
                file,
                path: path.to_path_buf(),
                capacity,
                cursor: 0,
            };
            backing.file.set_len(capacity as u64)?;
            backing.write_prefix()?;
            backing.sync()?;
            return Ok(backing);
        }

        let mut buf = [0u8; PREFIX_SIZE as usize];
        read_exact_at(&file, 0, &mut buf)?;
        let prefix = Prefix::decode(&buf)?;
        Ok(BackingFile {
            file,
            path: path.to_path_buf(),
            capacity: prefix.capacity as u32,
            cursor: prefix.cursor as u32,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total capacity of the backing file, prefix included.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Offset of the next free byte in the record area.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Free bytes remaining in the record area.
    pub fn available(&self) -> u32 {
        self.capacity - PREFIX_SIZE - self.cursor
    }

    /// Whether a record of `n` total on-disk bytes fits in the free region.
    pub fn is_enough_space(&self, n: u64) -> bool {
        n <= self.available() as u64
    }

    /// Reads `buf.len()` bytes at `offset` within the record area.
    pub fn read_at(&self, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        read_exact_at(&self.file, (PREFIX_SIZE + offset) as u64, buf)?;
        Ok(())
    }

    /// Writes `buf` at `offset` within the record area.
    pub fn write_at(&mut self, offset: u32, buf: &[u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        write_all_at(&self.file, (PREFIX_SIZE + offset) as u64, buf)?;
        Ok(())
    }

    /// Moves the append cursor and makes the move durable: the prefix is
    /// rewritten and the file synced before this returns. Record bytes must
    /// already be in place; a failure before this call leaves the previous
    /// cursor, with any partial bytes unreachable beyond it.
    pub fn commit_cursor(&mut self, cursor: u32) -> Result<()> {
        if cursor > self.capacity - PREFIX_SIZE {
            return errdata!("append cursor {cursor} exceeds the record area");
        }
        self.cursor = cursor;
        self.write_prefix()?;
        self.sync()
    }

    /// Flushes file contents and the prefix to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn write_prefix(&mut self) -> Result<()> {
        let prefix = Prefix {
            capacity: self.capacity as i32,
            cursor: self.cursor as i32,
        };
        write_all_at(&self.file, 0, &prefix.encode()?)?;
        Ok(())
    }

    fn check_range(&self, offset: u32, len: usize) -> Result<()> {
        let end = offset as u64 + len as u64;
        if end > (self.capacity - PREFIX_SIZE) as u64 {
            return errdata!("access at {offset}..{end} exceeds the record area");
        }
        Ok(())
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, offset: u64, buf: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut offset: u64, mut buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut offset: u64, mut buf: &[u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
