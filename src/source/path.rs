use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::Result;
use crate::errinput;

use super::ByteSource;

/// A byte source over an existing file on the ambient OS filesystem. The
/// payload is stored under the file's basename; the length comes from file
/// metadata.
pub struct PathSource {
    name: String,
    len: u64,
    file: File,
}

impl PathSource {
    /// Opens the file at `path`. Fails with an input error if the path does
    /// not name a regular file or has no UTF-8 basename.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return errinput!("could not recognize file at {}", path.display()),
        };
        if !metadata.is_file() {
            return errinput!("could not recognize file at {}", path.display());
        }
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(String::from)
            .ok_or_else(|| {
                crate::Error::InvalidInput(format!("no usable file name in {}", path.display()))
            })?;

        let file = File::open(path)?;
        Ok(PathSource {
            name,
            len: metadata.len(),
            file,
        })
    }
}

impl Read for PathSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl ByteSource for PathSource {
    fn name_hint(&self) -> &str {
        &self.name
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.len)
    }
}
