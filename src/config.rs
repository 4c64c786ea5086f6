/// Configuration for a container filesystem.
#[derive(Debug, Clone)]
pub struct Config {
    /// Total capacity of the backing file in bytes, prefix included
    /// (default: 10MB). Fixed once the backing file has been created.
    pub capacity: u32,

    /// Buffer size for streamed copies and compaction (default: 64KB)
    pub copy_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: 10 * 1024 * 1024, // 10MB
            copy_buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl Config {
    /// Create a new config with the given capacity
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Set total capacity of the backing file
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the streamed copy buffer size
    pub fn copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size;
        self
    }
}
