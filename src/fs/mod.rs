pub mod backing;
pub mod channel;
pub mod record;
pub mod scan;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use byteorder::{BigEndian, ByteOrder};

use crate::config::Config;
use crate::error::Result;
use crate::errinput;
use crate::flock::FileLock;
use crate::source::ByteSource;
use crate::Error;

use backing::BackingFile;
use channel::ReadChannel;
use record::{Record, RecordHeader, HEADER_SIZE, TOMBSTONE_REMOVED};
use scan::{find_live, live_names, RecordIter};

/// A flat container filesystem over a single fixed-capacity backing file.
///
/// All operations go through one read-write lock: readers share it, every
/// mutation takes it exclusively. Admission checks run under the same
/// exclusive lock as the append they admit.
#[derive(Debug)]
pub struct FileSystem {
    state: RwLock<BackingFile>,
    copy_buffer_size: usize,
    _lock: FileLock,
}

/// Open containers, keyed by absolute backing-file path. Opening the same
/// path twice yields the same handle.
fn registry() -> &'static Mutex<HashMap<PathBuf, Weak<FileSystem>>> {
    static HANDLES: OnceLock<Mutex<HashMap<PathBuf, Weak<FileSystem>>>> = OnceLock::new();
    HANDLES.get_or_init(Default::default)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

impl FileSystem {
    /// Opens the container at `path`, creating the backing file at the
    /// configured capacity if it does not exist. Returns the existing handle
    /// if this process already has the container open; otherwise the
    /// container's lock file is taken for the lifetime of the handle.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Arc<FileSystem>> {
        let path = absolute(path.as_ref())?;
        let mut handles = registry().lock()?;
        handles.retain(|_, handle| handle.strong_count() > 0);
        if let Some(fs) = handles.get(&path).and_then(Weak::upgrade) {
            return Ok(fs);
        }

        let lock = FileLock::lock(lock_path(&path)).map_err(|e| {
            Error::IO(format!(
                "could not lock container at {}: {e}",
                path.display()
            ))
        })?;
        let backing = BackingFile::open(&path, config.capacity)?;
        let fs = Arc::new(FileSystem {
            state: RwLock::new(backing),
            copy_buffer_size: config.copy_buffer_size.max(1),
            _lock: lock,
        });
        handles.insert(path, Arc::downgrade(&fs));
        Ok(fs)
    }

    /// Creates a file. Fails if a live record with this name already exists.
    pub fn create(&self, name: &str, content: &[u8]) -> Result<()> {
        let record = Record::new(name, content)?;
        let mut file = self.state.write()?;
        if find_live(&file, name)?.is_some() {
            return errinput!("file already exists: {name}");
        }
        Self::append(&mut file, &record)
    }

    /// Replaces any existing live record with this name: the old record is
    /// tombstoned, then the new one is appended. Falls through to a plain
    /// create when the name is absent.
    pub fn overwrite(&self, name: &str, content: &[u8]) -> Result<()> {
        let record = Record::new(name, content)?;
        let mut file = self.state.write()?;

        // Admission happens before the tombstone so a record that does not
        // fit leaves the old one live.
        let required = record.on_disk_size();
        if !file.is_enough_space(required) {
            return Err(Error::InsufficientSpace {
                required,
                available: file.available() as u64,
            });
        }
        if let Some(old) = find_live(&file, name)? {
            file.write_at(old.tombstone_offset(), &[TOMBSTONE_REMOVED])?;
        }
        Self::append(&mut file, &record)
    }

    /// Streams a byte source into a new record, replacing any live record
    /// with the source's name. Admission is checked with the advertised
    /// length, falling back to the name length when the source does not
    /// advertise one, and re-checked as bytes arrive. Returns the stored
    /// name.
    ///
    /// The header is written with a provisional content length and patched
    /// once the stream ends; the cursor only moves after the record is
    /// complete, so a failed stream leaves the container unchanged.
    pub fn ingest<S: ByteSource + ?Sized>(&self, source: &mut S) -> Result<String> {
        let name = source.name_hint().to_string();
        let mut header = RecordHeader::new(name.len(), 0)?;
        let name_len = name.len() as u32;

        let mut file = self.state.write()?;
        let assumed = source.len_hint().unwrap_or(name_len as u64);
        let required = (HEADER_SIZE + name_len) as u64 + assumed;
        if !file.is_enough_space(required) {
            return Err(Error::InsufficientSpace {
                required,
                available: file.available() as u64,
            });
        }

        let start = file.cursor();
        let mut head = Vec::with_capacity((HEADER_SIZE + name_len) as usize);
        header.encode(&mut head)?;
        head.extend_from_slice(name.as_bytes());
        file.write_at(start, &head)?;

        let content_start = start + HEADER_SIZE + name_len;
        let mut count: u64 = 0;
        let mut chunk = vec![0u8; self.copy_buffer_size];
        loop {
            let n = match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let required = (HEADER_SIZE + name_len) as u64 + count + n as u64;
            if !file.is_enough_space(required) {
                return Err(Error::InsufficientSpace {
                    required,
                    available: file.available() as u64,
                });
            }
            file.write_at(content_start + count as u32, &chunk[..n])?;
            count += n as u64;
        }

        // Patch the real content length into the reserved header.
        header.content_len = count as i32;
        let mut patched = [0u8; 4];
        BigEndian::write_i32(&mut patched, header.content_len);
        file.write_at(start + 4, &patched)?;

        // The scan is bounded by the cursor, so it sees only the old record.
        if let Some(old) = find_live(&file, &name)? {
            file.write_at(old.tombstone_offset(), &[TOMBSTONE_REMOVED])?;
        }
        file.commit_cursor(content_start + count as u32)?;
        Ok(name)
    }

    fn append(file: &mut BackingFile, record: &Record) -> Result<()> {
        let required = record.on_disk_size();
        if !file.is_enough_space(required) {
            return Err(Error::InsufficientSpace {
                required,
                available: file.available() as u64,
            });
        }
        let bytes: Vec<u8> = record.try_into()?;
        let start = file.cursor();
        file.write_at(start, &bytes)?;
        file.commit_cursor(start + bytes.len() as u32)
    }

    /// Reads a file's full content.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let file = self.state.read()?;
        let record =
            find_live(&file, name)?.ok_or_else(|| Error::FileNotFound(name.to_string()))?;
        let mut content = vec![0; record.header.content_len as usize];
        file.read_at(record.content_offset(), &mut content)?;
        Ok(content)
    }

    /// Opens a streaming read channel over a file. The channel pins the
    /// record until it is dropped; see [`ReadChannel`].
    pub fn open_read_channel(&self, name: &str) -> Result<ReadChannel<'_>> {
        let guard = self.state.read()?;
        let record =
            find_live(&guard, name)?.ok_or_else(|| Error::FileNotFound(name.to_string()))?;
        Ok(ReadChannel::new(guard, record))
    }

    /// Tombstones the named record. A no-op if the name is absent; the bytes
    /// are reclaimed by the next defragment or format.
    pub fn delete(&self, name: &str) -> Result<()> {
        let mut file = self.state.write()?;
        if let Some(record) = find_live(&file, name)? {
            file.write_at(record.tombstone_offset(), &[TOMBSTONE_REMOVED])?;
            file.sync()?;
        }
        Ok(())
    }

    /// Names of all live files, in scan order.
    pub fn list(&self) -> Result<Vec<String>> {
        let file = self.state.read()?;
        live_names(&file)
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        let file = self.state.read()?;
        Ok(find_live(&file, name)?.is_some())
    }

    /// Free bytes remaining in the record area.
    pub fn available_space(&self) -> Result<u64> {
        let file = self.state.read()?;
        Ok(file.available() as u64)
    }

    /// Total capacity of the backing file, prefix included.
    pub fn capacity(&self) -> Result<u64> {
        let file = self.state.read()?;
        Ok(file.capacity() as u64)
    }

    /// Compacts the record area: live records are copied forward over
    /// tombstoned regions, preserving their order, and the cursor drops to
    /// the sum of live record sizes.
    pub fn defragment(&self) -> Result<()> {
        let mut file = self.state.write()?;
        let records = RecordIter::new(&file).collect::<Result<Vec<_>>>()?;
        let old_cursor = file.cursor();

        let mut dst = 0u32;
        let mut live = 0usize;
        let mut chunk = vec![0u8; self.copy_buffer_size];
        for record in records {
            if !record.is_live() {
                continue;
            }
            let size = record.header.on_disk_size();
            if record.offset != dst {
                if let Err(e) = Self::copy_record(&mut file, record.offset, dst, size, &mut chunk)
                {
                    // Land the cursor on the last fully copied record so the
                    // area stays a concatenation of well-formed records.
                    let _ = file.commit_cursor(dst);
                    return Err(e);
                }
            }
            dst += size;
            live += 1;
        }

        file.commit_cursor(dst)?;
        tracing::debug!(live, reclaimed = old_cursor - dst, "compacted record area");
        Ok(())
    }

    /// Forward copy of one record: the destination is always at or before
    /// the source, so each chunk is read before it can be overwritten.
    fn copy_record(
        file: &mut BackingFile,
        src: u32,
        dst: u32,
        size: u32,
        chunk: &mut [u8],
    ) -> Result<()> {
        let mut copied = 0u32;
        while copied < size {
            let n = ((size - copied) as usize).min(chunk.len());
            file.read_at(src + copied, &mut chunk[..n])?;
            file.write_at(dst + copied, &chunk[..n])?;
            copied += n as u32;
        }
        Ok(())
    }

    /// Logically erases the container: the cursor resets to 0 and the
    /// capacity is preserved. The record area is not zeroed; stale bytes
    /// beyond the cursor are unreachable.
    pub fn format(&self) -> Result<()> {
        let mut file = self.state.write()?;
        let dropped = file.cursor();
        file.commit_cursor(0)?;
        tracing::debug!(dropped, "formatted container");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    /// An in-memory byte source with a controllable length hint.
    struct TestSource {
        name: String,
        advertised: Option<u64>,
        data: std::io::Cursor<Vec<u8>>,
    }

    impl TestSource {
        fn new(name: &str, advertised: Option<u64>, data: Vec<u8>) -> Self {
            TestSource {
                name: name.to_string(),
                advertised,
                data: std::io::Cursor::new(data),
            }
        }
    }

    impl Read for TestSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.data.read(buf)
        }
    }

    impl ByteSource for TestSource {
        fn name_hint(&self) -> &str {
            &self.name
        }

        fn len_hint(&self) -> Option<u64> {
            self.advertised
        }
    }

    fn open_temp(capacity: u32) -> (tempfile::TempDir, Arc<FileSystem>) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let fs = FileSystem::open(dir.path().join("container.bin"), Config::new(capacity))
            .expect("Failed to open filesystem");
        (dir, fs)
    }

    #[test]
    fn test_create_and_read() {
        let (_dir, fs) = open_temp(1024);
        fs.create("a", &[0x01, 0x02, 0x03]).expect("Failed to create");

        assert_eq!(fs.available_space().expect("Failed to query"), 1003);
        assert_eq!(fs.read("a").expect("Failed to read"), [0x01, 0x02, 0x03]);
        assert!(fs.exists("a").expect("Failed to check"));
        assert_eq!(fs.read("missing"), Err(Error::FileNotFound("missing".to_string())));
    }

    #[test]
    fn test_overwrite_keeps_one_live_record() {
        let (_dir, fs) = open_temp(1024);
        fs.create("a", &[0x01, 0x02, 0x03]).expect("Failed to create");
        fs.overwrite("a", &[0x09]).expect("Failed to overwrite");

        assert_eq!(fs.list().expect("Failed to list"), ["a"]);
        assert_eq!(fs.read("a").expect("Failed to read"), [0x09]);
        // The old record is tombstoned, not reclaimed.
        assert_eq!(fs.available_space().expect("Failed to query"), 992);
    }

    #[test]
    fn test_overwrite_creates_when_absent() {
        let (_dir, fs) = open_temp(1024);
        fs.overwrite("fresh", b"content").expect("Failed to overwrite");
        assert_eq!(fs.read("fresh").expect("Failed to read"), b"content");
    }

    #[test]
    fn test_defragment_reclaims_tombstones() {
        let (_dir, fs) = open_temp(1024);
        fs.create("a", &[0x01, 0x02, 0x03]).expect("Failed to create");
        fs.overwrite("a", &[0x09]).expect("Failed to overwrite");
        fs.defragment().expect("Failed to defragment");

        assert_eq!(fs.available_space().expect("Failed to query"), 1005);
        assert_eq!(fs.read("a").expect("Failed to read"), [0x09]);
    }

    #[test]
    fn test_insufficient_space() {
        let (_dir, fs) = open_temp(1024);
        fs.create("a", &[0x09]).expect("Failed to create");
        fs.create("b", &[0xEE; 900]).expect("Failed to create");
        assert_eq!(fs.available_space().expect("Failed to query"), 1024 - 8 - 11 - 910);

        let result = fs.create("c", &[0xDD; 100]);
        assert_eq!(
            result,
            Err(Error::InsufficientSpace {
                required: 110,
                available: 95,
            })
        );

        // A record that exactly fills the free region still fits.
        fs.create("d", &[0xCC; 85]).expect("Failed to create exact fit");
        assert_eq!(fs.available_space().expect("Failed to query"), 0);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, fs) = open_temp(1024);
        fs.create("a", b"one").expect("Failed to create");
        fs.create("b", b"two").expect("Failed to create");
        let before = fs.available_space().expect("Failed to query");

        fs.delete("a").expect("Failed to delete");
        assert!(!fs.exists("a").expect("Failed to check"));
        assert_eq!(fs.list().expect("Failed to list"), ["b"]);
        // Tombstoning does not reclaim space.
        assert_eq!(fs.available_space().expect("Failed to query"), before);

        // Deleting again, or deleting an unknown name, is a no-op.
        fs.delete("a").expect("Failed to re-delete");
        fs.delete("never-existed").expect("Failed to delete unknown");
        assert_eq!(fs.list().expect("Failed to list"), ["b"]);

        fs.defragment().expect("Failed to defragment");
        assert_eq!(fs.read("b").expect("Failed to read"), b"two");
        assert!(fs.available_space().expect("Failed to query") > before);
    }

    #[test]
    fn test_create_duplicate_fails() {
        let (_dir, fs) = open_temp(1024);
        fs.create("a", b"one").expect("Failed to create");
        assert!(matches!(fs.create("a", b"two"), Err(Error::InvalidInput(_))));
        assert_eq!(fs.read("a").expect("Failed to read"), b"one");
    }

    #[test]
    fn test_empty_name_rejected() {
        let (_dir, fs) = open_temp(1024);
        assert!(matches!(fs.create("", b"x"), Err(Error::InvalidInput(_))));
        assert!(matches!(fs.overwrite("", b"x"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_defragment_preserves_live_order() {
        let (_dir, fs) = open_temp(4096);
        for (name, content) in [("a", "first"), ("b", "second"), ("c", "third"), ("d", "fourth")] {
            fs.create(name, content.as_bytes()).expect("Failed to create");
        }
        fs.delete("a").expect("Failed to delete");
        fs.delete("c").expect("Failed to delete");
        fs.defragment().expect("Failed to defragment");

        assert_eq!(fs.list().expect("Failed to list"), ["b", "d"]);
        assert_eq!(fs.read("b").expect("Failed to read"), b"second");
        assert_eq!(fs.read("d").expect("Failed to read"), b"fourth");

        // 16 bytes per live record: 9 + 1 + 6.
        let live_total = (9 + 1 + 6) + (9 + 1 + 6);
        assert_eq!(
            fs.available_space().expect("Failed to query"),
            4096 - 8 - live_total
        );

        // Defragmenting an already-compact area changes nothing.
        fs.defragment().expect("Failed to re-defragment");
        assert_eq!(fs.list().expect("Failed to list"), ["b", "d"]);
        assert_eq!(fs.read("b").expect("Failed to read"), b"second");
    }

    #[test]
    fn test_format_resets_cursor_and_keeps_capacity() {
        let (_dir, fs) = open_temp(1024);
        fs.create("a", b"one").expect("Failed to create");
        fs.create("b", b"two").expect("Failed to create");
        fs.format().expect("Failed to format");

        assert!(fs.list().expect("Failed to list").is_empty());
        assert_eq!(fs.available_space().expect("Failed to query"), 1024 - 8);
        assert_eq!(fs.capacity().expect("Failed to query"), 1024);

        // The container is fully usable after a format.
        fs.create("a", b"again").expect("Failed to create after format");
        assert_eq!(fs.read("a").expect("Failed to read"), b"again");
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("container.bin");
        {
            let fs = FileSystem::open(&path, Config::new(2048)).expect("Failed to open");
            fs.create("kept", b"payload").expect("Failed to create");
            fs.create("gone", b"payload").expect("Failed to create");
            fs.delete("gone").expect("Failed to delete");
        }

        // The configured capacity differs; the stored prefix wins.
        let fs = FileSystem::open(&path, Config::new(8192)).expect("Failed to reopen");
        assert_eq!(fs.capacity().expect("Failed to query"), 2048);
        assert_eq!(fs.list().expect("Failed to list"), ["kept"]);
        assert_eq!(fs.read("kept").expect("Failed to read"), b"payload");
    }

    #[test]
    fn test_one_handle_per_path() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("container.bin");

        let first = FileSystem::open(&path, Config::new(1024)).expect("Failed to open");
        let second = FileSystem::open(&path, Config::new(1024)).expect("Failed to reopen");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_ingest_without_length_hint() {
        let (_dir, fs) = open_temp(1024);
        let mut source = TestSource::new("blob.bin", None, vec![0x42; 300]);
        let name = fs.ingest(&mut source).expect("Failed to ingest");

        assert_eq!(name, "blob.bin");
        assert_eq!(fs.read("blob.bin").expect("Failed to read"), vec![0x42; 300]);
        assert_eq!(
            fs.available_space().expect("Failed to query"),
            1024 - 8 - (9 + 8 + 300)
        );
    }

    #[test]
    fn test_ingest_replaces_existing() {
        let (_dir, fs) = open_temp(1024);
        fs.create("blob.bin", b"old").expect("Failed to create");

        let mut source = TestSource::new("blob.bin", Some(3), b"new".to_vec());
        fs.ingest(&mut source).expect("Failed to ingest");

        assert_eq!(fs.list().expect("Failed to list"), ["blob.bin"]);
        assert_eq!(fs.read("blob.bin").expect("Failed to read"), b"new");
    }

    #[test]
    fn test_ingest_admission_rejects_advertised_length() {
        let (_dir, fs) = open_temp(128);
        let mut source = TestSource::new("big", Some(1000), vec![0; 1000]);
        assert!(matches!(
            fs.ingest(&mut source),
            Err(Error::InsufficientSpace { .. })
        ));
        assert!(fs.list().expect("Failed to list").is_empty());
    }

    #[test]
    fn test_ingest_mid_stream_failure_leaves_container_intact() {
        let (_dir, fs) = open_temp(128);
        fs.create("a", b"anchor").expect("Failed to create");
        let before = fs.available_space().expect("Failed to query");

        // The unadvertised stream is larger than the free region; admission
        // fails mid-stream, after some chunks were already staged.
        let mut source = TestSource::new("big", None, vec![0x55; 500]);
        assert!(matches!(
            fs.ingest(&mut source),
            Err(Error::InsufficientSpace { .. })
        ));

        // The cursor never moved: nothing leaked, nothing is half-visible.
        assert_eq!(fs.available_space().expect("Failed to query"), before);
        assert_eq!(fs.list().expect("Failed to list"), ["a"]);
        assert_eq!(fs.read("a").expect("Failed to read"), b"anchor");

        // The staged bytes are simply overwritten by the next write.
        fs.create("b", b"after").expect("Failed to create");
        assert_eq!(fs.read("b").expect("Failed to read"), b"after");
    }

    #[test]
    fn test_concurrent_creates_are_serialized() {
        let (_dir, fs) = open_temp(64 * 1024);
        let mut handles = Vec::new();
        for i in 0..8 {
            let fs = fs.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..10 {
                    let name = format!("file-{i}-{j}");
                    fs.create(&name, name.as_bytes()).expect("Failed to create");
                }
            }));
        }
        for handle in handles {
            handle.join().expect("Writer thread panicked");
        }

        let names = fs.list().expect("Failed to list");
        assert_eq!(names.len(), 80);
        for name in names {
            assert_eq!(fs.read(&name).expect("Failed to read"), name.as_bytes());
        }
    }

    #[test]
    fn test_concurrent_readers_see_consistent_names() {
        let (_dir, fs) = open_temp(64 * 1024);
        fs.create("seed", b"seed").expect("Failed to create");

        std::thread::scope(|s| {
            let writer = s.spawn(|| {
                for i in 0..50 {
                    fs.overwrite("seed", format!("value-{i}").as_bytes())
                        .expect("Failed to overwrite");
                }
            });

            // Readers must never observe two live records with one name.
            for _ in 0..3 {
                s.spawn(|| {
                    for _ in 0..100 {
                        let names = fs.list().expect("Failed to list");
                        let seeds = names.iter().filter(|n| n.as_str() == "seed").count();
                        assert_eq!(seeds, 1);
                    }
                });
            }

            writer.join().expect("Writer thread panicked");
        });
    }

    #[test]
    fn test_read_channel_pins_record_against_delete() {
        let (_dir, fs) = open_temp(4096);
        let content: Vec<u8> = (0..900u32).map(|i| i as u8).collect();
        fs.create("b", &content).expect("Failed to create");

        std::thread::scope(|s| {
            let mut channel = fs.open_read_channel("b").expect("Failed to open channel");

            let deleter = s.spawn(|| {
                fs.delete("b").expect("Failed to delete");
            });

            // The delete must block while the channel holds its pin.
            std::thread::sleep(std::time::Duration::from_millis(50));
            assert!(!deleter.is_finished());

            let mut buf = [0u8; 100];
            channel.read_exact(&mut buf).expect("Failed to read");
            assert_eq!(buf[..], content[..100]);

            drop(channel);
            deleter.join().expect("Deleter thread panicked");
        });

        assert!(!fs.exists("b").expect("Failed to check"));
    }
}
