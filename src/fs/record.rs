use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::Error;
use crate::{errdata, errinput};

/// Size of the fixed record header: name length, content length, tombstone.
pub const HEADER_SIZE: u32 = 9;

/// Offset of the tombstone byte within a record.
pub const TOMBSTONE_OFFSET: u32 = 8;

pub const TOMBSTONE_LIVE: u8 = 0x00;
pub const TOMBSTONE_REMOVED: u8 = 0x01;

/// Fixed-size header preceding every record in the record area. Lengths are
/// persisted as big-endian signed 32-bit integers; `name_len` must be
/// positive and `content_len` non-negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordHeader {
    pub name_len: i32,
    pub content_len: i32,
    pub tombstone: u8,
}

impl RecordHeader {
    /// Builds a live header, validating that both lengths fit the on-disk
    /// representation.
    pub fn new(name_len: usize, content_len: usize) -> Result<Self> {
        if name_len == 0 {
            return errinput!("file name must not be empty");
        }
        let name_len = i32::try_from(name_len)
            .map_err(|_| Error::InvalidInput(format!("file name of {name_len} bytes is too long")))?;
        let content_len = i32::try_from(content_len).map_err(|_| {
            Error::InvalidInput(format!("content of {content_len} bytes is too large"))
        })?;
        Ok(RecordHeader {
            name_len,
            content_len,
            tombstone: TOMBSTONE_LIVE,
        })
    }

    pub fn is_live(&self) -> bool {
        self.tombstone == TOMBSTONE_LIVE
    }

    /// Total on-disk size of the record this header describes.
    pub fn on_disk_size(&self) -> u32 {
        HEADER_SIZE + self.name_len as u32 + self.content_len as u32
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<BigEndian>(self.name_len)?;
        writer.write_i32::<BigEndian>(self.content_len)?;
        writer.write_u8(self.tombstone)?;
        Ok(())
    }

    pub fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let name_len = reader.read_i32::<BigEndian>()?;
        let content_len = reader.read_i32::<BigEndian>()?;
        let tombstone = reader.read_u8()?;

        if name_len <= 0 {
            return errdata!("record header has non-positive name length {name_len}");
        }
        if content_len < 0 {
            return errdata!("record header has negative content length {content_len}");
        }
        match tombstone {
            TOMBSTONE_LIVE | TOMBSTONE_REMOVED => {}
            n => return errdata!("record header has invalid tombstone byte {n:#04x}"),
        }

        Ok(RecordHeader {
            name_len,
            content_len,
            tombstone,
        })
    }
}

/// One named blob as it is marshalled into the record area.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub name: String,
    pub content: Vec<u8>,
}

impl Record {
    pub fn new(name: &str, content: &[u8]) -> Result<Self> {
        // Validates the lengths up front so callers fail before touching disk.
        RecordHeader::new(name.len(), content.len())?;
        Ok(Record {
            name: name.to_string(),
            content: content.to_vec(),
        })
    }

    pub fn header(&self) -> Result<RecordHeader> {
        RecordHeader::new(self.name.len(), self.content.len())
    }

    /// Total on-disk size: header plus name plus content.
    pub fn on_disk_size(&self) -> u64 {
        HEADER_SIZE as u64 + self.name.len() as u64 + self.content.len() as u64
    }
}

impl TryInto<Vec<u8>> for &Record {
    type Error = Error;

    fn try_into(self) -> Result<Vec<u8>> {
        let header = self.header()?;
        let mut buf = Vec::with_capacity(self.on_disk_size() as usize);
        header.encode(&mut buf)?;
        buf.write_all(self.name.as_bytes())?;
        buf.write_all(&self.content)?;
        Ok(buf)
    }
}

impl TryFrom<&[u8]> for Record {
    type Error = Error;

    fn try_from(buf: &[u8]) -> Result<Self> {
        let mut reader = std::io::Cursor::new(buf);
        let header = RecordHeader::decode(&mut reader)?;

        let mut name = vec![0; header.name_len as usize];
        reader
            .read_exact(&mut name)
            .map_err(|_| Error::InvalidData("record truncated while reading name".to_string()))?;
        let name = String::from_utf8(name)
            .map_err(|_| Error::InvalidData("record name is not valid UTF-8".to_string()))?;

        let mut content = vec![0; header.content_len as usize];
        reader
            .read_exact(&mut content)
            .map_err(|_| Error::InvalidData("record truncated while reading content".to_string()))?;

        Ok(Record { name, content })
    }
}
