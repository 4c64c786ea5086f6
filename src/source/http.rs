use std::io::Read;

use crate::error::Result;
use crate::errinput;
use crate::Error;

use super::ByteSource;

/// A byte source over an HTTP response body. The stored name comes from the
/// `Content-Disposition` header when present, otherwise from the last
/// `/`-delimited segment of the URI; the length hint from `Content-Length`.
pub struct HttpSource {
    name: String,
    len: Option<u64>,
    reader: Box<dyn Read + Send>,
}

impl HttpSource {
    /// Issues a GET request for `uri`. Any status other than 200 is rejected
    /// as invalid input, matching how a malformed URI is rejected.
    pub fn get(uri: &str) -> Result<Self> {
        let response = match ureq::get(uri).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return errinput!("connection to {uri} returned {code}");
            }
            Err(ureq::Error::Transport(t)) if t.kind() == ureq::ErrorKind::InvalidUrl => {
                return errinput!("malformed uri {uri}");
            }
            Err(e) => return Err(Error::IO(e.to_string())),
        };
        if response.status() != 200 {
            return errinput!("connection to {uri} returned {}", response.status());
        }

        let name = match response.header("Content-Disposition") {
            Some(disposition) => filename_from_disposition(disposition)?,
            None => filename_from_uri(uri)?,
        };
        let len = response
            .header("Content-Length")
            .and_then(|value| value.parse().ok());

        Ok(HttpSource {
            name,
            len,
            reader: Box::new(response.into_reader()),
        })
    }
}

impl Read for HttpSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl ByteSource for HttpSource {
    fn name_hint(&self) -> &str {
        &self.name
    }

    fn len_hint(&self) -> Option<u64> {
        self.len
    }
}

/// Extracts the filename from a `Content-Disposition` header value. Only the
/// double-quoted `filename="NAME"` form is accepted; anything else is
/// rejected rather than guessed at.
fn filename_from_disposition(value: &str) -> Result<String> {
    let rest = match value.split_once("filename=") {
        Some((_, rest)) => rest,
        None => return errinput!("no filename in content disposition {value:?}"),
    };
    // The parameter runs to the next `;`, if any.
    let rest = rest.split(';').next().unwrap_or("").trim();
    let name = rest
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "unquoted filename in content disposition {value:?}"
            ))
        })?;
    if name.is_empty() || name.contains('"') {
        return errinput!("ambiguous filename in content disposition {value:?}");
    }
    Ok(name.to_string())
}

/// Falls back to the last `/`-delimited segment of the URI.
fn filename_from_uri(uri: &str) -> Result<String> {
    let name = uri.rsplit('/').next().unwrap_or("");
    if name.is_empty() {
        return errinput!("no filename in uri {uri}");
    }
    Ok(name.to_string())
}
