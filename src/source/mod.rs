pub mod http;
pub mod path;

use std::io::Read;

pub use http::HttpSource;
pub use path::PathSource;

/// A byte stream to be stored in the container, together with the name it
/// should be stored under and its length when the transport knows it. Keeps
/// the container core free of any transport concern.
pub trait ByteSource: Read {
    /// Name under which the payload should be stored.
    fn name_hint(&self) -> &str;

    /// Advertised payload length, if the transport advertises one.
    fn len_hint(&self) -> Option<u64>;
}
