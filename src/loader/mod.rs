//! Rule text acquisition: local files and key-authenticated remote fetch.
//!
//! The registry only consumes the text these helpers return; parsing and
//! bucketing happen in the parser and registry modules.

use std::fs;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Header carrying the subscription key on remote fetches.
pub const KEY_HEADER: &str = "WAF-Key";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Rule text acquisition failure.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read rules file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch rules from {uri}: {source}")]
    Http {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("remote server returned {status} for {uri}")]
    Status { uri: String, status: u16 },
}

/// Whether a URI names a remote document rather than a local path.
pub fn is_remote(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

/// Read a local rules file.
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<String, LoadError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading rules file");
    fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Load rule text from a local path or an HTTP(S) URI.
pub fn load_uri(uri: &str) -> Result<String, LoadError> {
    if is_remote(uri) {
        fetch(None, uri)
    } else {
        read_file(uri)
    }
}

/// Fetch rule text from a remote server, sending `key` in the
/// [`KEY_HEADER`] request header.
pub fn fetch_remote(key: &str, uri: &str) -> Result<String, LoadError> {
    fetch(Some(key), uri)
}

fn fetch(key: Option<&str>, uri: &str) -> Result<String, LoadError> {
    debug!(uri, authenticated = key.is_some(), "fetching remote rules");

    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|source| LoadError::Http {
            uri: uri.to_string(),
            source,
        })?;

    let mut request = client.get(uri);
    if let Some(key) = key {
        request = request.header(KEY_HEADER, key);
    }

    let response = request.send().map_err(|source| LoadError::Http {
        uri: uri.to_string(),
        source,
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(LoadError::Status {
            uri: uri.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().map_err(|source| LoadError::Http {
        uri: uri.to_string(),
        source,
    })
}
