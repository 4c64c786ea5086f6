pub mod config;
pub mod driver;
pub mod error;
pub mod flock;
pub mod fs;
pub mod source;

pub use config::Config;
pub use driver::Driver;
pub use error::Error;
pub use fs::channel::ReadChannel;
pub use fs::FileSystem;
