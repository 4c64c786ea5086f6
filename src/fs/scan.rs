use crate::error::Result;
use crate::errdata;
use crate::Error;

use super::backing::BackingFile;
use super::record::{RecordHeader, HEADER_SIZE, TOMBSTONE_OFFSET};

/// A record as seen by the forward scan: its position in the record area
/// plus the decoded header and name. Content bytes are not read.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub offset: u32,
    pub header: RecordHeader,
    pub name: String,
}

impl RawRecord {
    /// Offset of the record's content bytes within the record area.
    pub fn content_offset(&self) -> u32 {
        self.offset + HEADER_SIZE + self.header.name_len as u32
    }

    /// Offset of the record's tombstone byte within the record area.
    pub fn tombstone_offset(&self) -> u32 {
        self.offset + TOMBSTONE_OFFSET
    }

    /// Offset of the next record within the record area.
    pub fn next_offset(&self) -> u32 {
        self.offset + self.header.on_disk_size()
    }

    pub fn is_live(&self) -> bool {
        self.header.is_live()
    }
}

/// Forward iterator over all records, live and tombstoned, in
/// `[0, append_cursor)`. The record area is a concatenation of well-formed
/// records, so a record overrunning the cursor is corruption, not EOF.
pub struct RecordIter<'a> {
    file: &'a BackingFile,
    pos: u32,
}

impl<'a> RecordIter<'a> {
    pub fn new(file: &'a BackingFile) -> Self {
        RecordIter { file, pos: 0 }
    }

    fn read_one(&mut self) -> Result<Option<RawRecord>> {
        let cursor = self.file.cursor();
        if self.pos >= cursor {
            return Ok(None);
        }
        if cursor - self.pos < HEADER_SIZE {
            return errdata!("truncated record header at offset {}", self.pos);
        }

        let mut header_buf = [0u8; HEADER_SIZE as usize];
        self.file.read_at(self.pos, &mut header_buf)?;
        let header = RecordHeader::decode(&mut header_buf.as_slice())?;

        if header.on_disk_size() as u64 > (cursor - self.pos) as u64 {
            return errdata!("record at offset {} overruns the append cursor", self.pos);
        }

        let mut name = vec![0; header.name_len as usize];
        self.file.read_at(self.pos + HEADER_SIZE, &mut name)?;
        let name = String::from_utf8(name).map_err(|_| {
            Error::InvalidData(format!(
                "record name at offset {} is not valid UTF-8",
                self.pos
            ))
        })?;

        let record = RawRecord {
            offset: self.pos,
            header,
            name,
        };
        self.pos = record.next_offset();
        Ok(Some(record))
    }
}

impl Iterator for RecordIter<'_> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_one() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Resolves a name to its live record, if any. The scan returns the first
/// live match; there is at most one.
pub fn find_live(file: &BackingFile, name: &str) -> Result<Option<RawRecord>> {
    for record in RecordIter::new(file) {
        let record = record?;
        if record.is_live() && record.name == name {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

/// Names of all live records, in scan order.
pub fn live_names(file: &BackingFile) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for record in RecordIter::new(file) {
        let record = record?;
        if record.is_live() {
            names.push(record.name);
        }
    }
    Ok(names)
}
