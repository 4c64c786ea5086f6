use std::fmt::Display;

/// Container filesystem errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The admission check failed: the record does not fit in the free
    /// region of the record area.
    InsufficientSpace { required: u64, available: u64 },
    /// No live record with the given name exists.
    FileNotFound(String),
    /// Invalid user input, typically an empty name, a malformed URI, a
    /// rejected HTTP status, or a path that is not a regular file.
    InvalidInput(String),
    /// Invalid stored data, typically decoding errors or corruption in the
    /// record area.
    InvalidData(String),
    /// An IO error.
    IO(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InsufficientSpace {
                required,
                available,
            } => write!(
                f,
                "insufficient space: {required} bytes required, {available} available"
            ),
            Error::FileNotFound(name) => write!(f, "file not found: {name}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// Constructs an Error::InvalidData for the given format string.
#[macro_export]
macro_rules! errdata {
    ($($args:tt)*) => { $crate::error::Error::InvalidData(format!($($args)*)).into() };
}

/// Constructs an Error::InvalidInput for the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidInput(format!($($args)*)).into() };
}

/// A flatfs Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
