use std::io;
use std::path::PathBuf;

/// Errors produced while locating, decoding and extracting a PyInstaller archive.
///
/// Structural errors (see [`Error::is_structural`]) abort a run. Everything
/// else is scoped to a single TOC entry or PYZ member and is collected into
/// the extraction report instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("file is too short or truncated ({len} bytes)")]
    TooShort { len: u64 },

    #[error("missing cookie, unsupported pyinstaller version or not a pyinstaller archive")]
    CookieNotFound,

    #[error("invalid CArchive cookie: {0}")]
    InvalidCookie(String),

    #[error("invalid table of contents: {0}")]
    InvalidToc(String),

    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("failed to decompress '{name}': {source}")]
    Decompression { name: String, source: io::Error },

    #[error("'{name}' inflated to {actual} bytes, table of contents says {expected}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid PYZ archive '{path}': {reason}")]
    InvalidPyz { path: PathBuf, reason: String },

    #[error("unsupported PYZ table of contents: {0}")]
    UnsupportedTable(String),

    #[error("failed to write '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to patch bytecode header of '{path}': {source}")]
    Patch { path: PathBuf, source: io::Error },

    #[error("remote request failed: {0}")]
    Remote(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error means the container itself could not be understood.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::TooShort { .. }
                | Error::CookieNotFound
                | Error::InvalidCookie(_)
                | Error::InvalidToc(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_errors_are_classified() {
        assert!(Error::CookieNotFound.is_structural());
        assert!(Error::TooShort { len: 3 }.is_structural());
        assert!(Error::InvalidToc("x".into()).is_structural());
        assert!(
            !Error::Decompression {
                name: "a".into(),
                source: io::Error::other("bad"),
            }
            .is_structural()
        );
        assert!(!Error::UnsupportedTable("x".into()).is_structural());
    }
}
