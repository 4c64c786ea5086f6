use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::fs::channel::ReadChannel;
use crate::fs::FileSystem;
use crate::source::{HttpSource, PathSource};
use crate::Error;

/// Client facade for a container filesystem: the file operations plus the
/// source adapters for ingesting ambient-OS files and HTTP downloads.
pub struct Driver {
    fs: Arc<FileSystem>,
}

impl Driver {
    /// Opens the container at `path`, creating it at the configured capacity
    /// if absent.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        Ok(Driver {
            fs: FileSystem::open(path, config)?,
        })
    }

    /// The underlying container handle.
    pub fn filesystem(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    /// Creates an empty file.
    pub fn create_empty(&self, name: &str) -> Result<()> {
        self.create(name, &[])
    }

    /// Creates a file with the given content.
    pub fn create(&self, name: &str, content: &[u8]) -> Result<()> {
        log_space(self.fs.create(name, content))
    }

    /// Replaces the file if it exists, creates it otherwise.
    pub fn overwrite(&self, name: &str, content: &[u8]) -> Result<()> {
        log_space(self.fs.overwrite(name, content))
    }

    /// Copies an existing ambient-OS file into the container under its
    /// basename, replacing any file already stored under that name.
    pub fn copy_from_path(&self, path: impl AsRef<Path>) -> Result<String> {
        let mut source = PathSource::open(path)?;
        log_space(self.fs.ingest(&mut source))
    }

    /// Downloads `uri` and stores the body, replacing any file already
    /// stored under the extracted name. The connection may not advertise a
    /// length; the stream is then admitted incrementally and may still fail
    /// with an insufficient-space error mid-download.
    pub fn download_and_save(&self, uri: &str) -> Result<String> {
        let mut source = match HttpSource::get(uri) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(uri, error = %e, "download rejected");
                return Err(e);
            }
        };
        tracing::info!(uri, "started downloading file");
        let name = log_space(self.fs.ingest(&mut source))?;
        tracing::info!(uri, name = %name, "completed downloading file");
        Ok(name)
    }

    /// Reads a file's full content.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.fs.read(name)
    }

    /// Opens a streaming read channel over a file. Writers block until the
    /// channel is dropped.
    pub fn open_read_channel(&self, name: &str) -> Result<ReadChannel<'_>> {
        self.fs.open_read_channel(name)
    }

    /// Removes a file. A no-op if the name is absent.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.fs.delete(name)
    }

    /// Names of all stored files, in scan order.
    pub fn list(&self) -> Result<Vec<String>> {
        self.fs.list()
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        self.fs.exists(name)
    }

    /// Free bytes remaining in the record area.
    pub fn available_space(&self) -> Result<u64> {
        self.fs.available_space()
    }

    /// Compacts the record area, reclaiming tombstoned records.
    pub fn defragment(&self) -> Result<()> {
        self.fs.defragment()
    }

    /// Logically erases the container, preserving its capacity.
    pub fn format(&self) -> Result<()> {
        self.fs.format()
    }
}

fn log_space<T>(result: Result<T>) -> Result<T> {
    if let Err(Error::InsufficientSpace {
        required,
        available,
    }) = &result
    {
        tracing::error!(
            required = *required,
            available = *available,
            "not enough space in container"
        );
    }
    result
}
