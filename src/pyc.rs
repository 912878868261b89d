//! Bytecode (`.pyc`) file headers.
//!
//! A `.pyc` starts with a 4 byte magic followed by a version dependent amount
//! of metadata:
//!
//! | Interpreter | Header after the magic |
//! |---|---|
//! | < 3.3 | 4 byte timestamp |
//! | 3.3 - 3.6 | 4 byte timestamp, 4 byte source size |
//! | >= 3.7 | 4 byte flags, 8 bytes timestamp/size or hash (PEP 552) |
//!
//! PyInstaller strips these headers from most entries. The magic is only
//! learned while extracting (from a module with its header intact, or from a
//! PYZ header), so files written before that point get a placeholder magic and
//! are patched once extraction is done.

use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::carchive::PythonVersion;
use crate::error::{Error, Result};
use crate::output;
use crate::sanitize;

pub type Magic = [u8; 4];

/// Written in place of the magic until the real one is known.
pub const PLACEHOLDER_MAGIC: Magic = [0; 4];

/// Final-release magic numbers, used when the archive never reveals its own.
const KNOWN_MAGICS: &[(PythonVersion, u16)] = &[
    (PythonVersion::new(2, 7), 62211),
    (PythonVersion::new(3, 0), 3131),
    (PythonVersion::new(3, 1), 3151),
    (PythonVersion::new(3, 2), 3180),
    (PythonVersion::new(3, 3), 3230),
    (PythonVersion::new(3, 4), 3310),
    (PythonVersion::new(3, 5), 3351),
    (PythonVersion::new(3, 6), 3379),
    (PythonVersion::new(3, 7), 3394),
    (PythonVersion::new(3, 8), 3413),
    (PythonVersion::new(3, 9), 3425),
    (PythonVersion::new(3, 10), 3439),
    (PythonVersion::new(3, 11), 3495),
    (PythonVersion::new(3, 12), 3531),
    (PythonVersion::new(3, 13), 3571),
];

/// Magic number of the final release of `python`, if known.
pub fn known_magic(python: PythonVersion) -> Option<Magic> {
    KNOWN_MAGICS
        .iter()
        .find(|(version, _)| *version == python)
        .map(|(_, number)| {
            let [lo, hi] = number.to_le_bytes();
            [lo, hi, b'\r', b'\n']
        })
}

/// Returns the magic of `payload` if it already starts with a `.pyc` header.
///
/// Every magic ends in `\r\n`; code objects without a header never do.
pub fn intact_header_magic(payload: &[u8]) -> Option<Magic> {
    match payload {
        [a, b, b'\r', b'\n', ..] => Some([*a, *b, b'\r', b'\n']),
        _ => None,
    }
}

/// Header bytes that follow the magic for `python`.
pub fn header_tail_len(python: PythonVersion) -> usize {
    if python >= PythonVersion::new(3, 7) {
        12
    } else if python >= PythonVersion::new(3, 3) {
        8
    } else {
        4
    }
}

/// Build a complete header: `magic` followed by zeroed metadata.
pub fn build_header(magic: Magic, python: PythonVersion) -> Vec<u8> {
    let mut header = Vec::with_capacity(4 + header_tail_len(python));
    header.extend_from_slice(&magic);
    header.resize(4 + header_tail_len(python), 0);
    header
}

/// Mutable state shared by every stage of one extraction run.
#[derive(Debug)]
pub struct ExtractionContext {
    python: PythonVersion,
    magic: Option<Magic>,
    pending: Vec<PathBuf>,
    /// Every output path handed out so far.
    claimed: HashSet<PathBuf>,
}

impl ExtractionContext {
    pub fn new(python: PythonVersion) -> Self {
        Self {
            python,
            magic: None,
            pending: Vec::new(),
            claimed: HashSet::new(),
        }
    }

    pub fn python(&self) -> PythonVersion {
        self.python
    }

    pub fn magic(&self) -> Option<Magic> {
        self.magic
    }

    /// Files written with [`PLACEHOLDER_MAGIC`] that still need patching.
    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    /// Reserve `path` for one output file.
    ///
    /// Different stored names can map to the same path once they are
    /// sanitized. A path that was already handed out is replaced by a random
    /// name in the same directory, keeping the extension.
    pub fn claim_path(&mut self, path: PathBuf) -> PathBuf {
        if self.claimed.insert(path.clone()) {
            return path;
        }

        let name = match path.extension() {
            Some(ext) => format!("{}.{}", sanitize::unique_name(), ext.to_string_lossy()),
            None => sanitize::unique_name(),
        };
        let renamed = path.with_file_name(name);
        tracing::warn!(
            "{} was already extracted, writing to {} instead",
            path.display(),
            renamed.display()
        );
        self.claimed.insert(renamed.clone());
        renamed
    }

    /// Record a magic seen in the archive.
    ///
    /// The first one is adopted. A different later one replaces it, with a
    /// warning, since it means parts of the archive were built by different
    /// interpreters.
    pub fn observe_magic(&mut self, magic: Magic, source: &str) {
        match self.magic {
            None => {
                tracing::debug!("bytecode magic {:02x?} taken from {}", magic, source);
                self.magic = Some(magic);
            }
            Some(current) if current != magic => {
                tracing::warn!(
                    "bytecode magic {:02x?} in {} differs from {:02x?} seen earlier; \
                     parts of this archive were built with a different Python version",
                    magic,
                    source,
                    current
                );
                self.magic = Some(magic);
            }
            Some(_) => {}
        }
    }

    /// Write `payload` to `path` behind a reconstructed header.
    ///
    /// Without a known magic the header gets a placeholder and the path is
    /// queued for [`ExtractionContext::fix_pending`].
    pub async fn write_pyc(&mut self, path: &Path, payload: &[u8]) -> Result<()> {
        let magic = match self.magic {
            Some(magic) => magic,
            None => {
                self.pending.push(path.to_path_buf());
                PLACEHOLDER_MAGIC
            }
        };
        let header = build_header(magic, self.python);
        output::write_chunks(path, &[header.as_slice(), payload]).await
    }

    /// Overwrite the placeholder magic of every queued file.
    ///
    /// Falls back to [`known_magic`] when nothing in the archive revealed the
    /// magic. Returns the number of patched files.
    pub async fn fix_pending(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let magic = match self.magic.or_else(|| known_magic(self.python)) {
            Some(magic) => magic,
            None => {
                tracing::warn!(
                    "bytecode magic for Python {} is unknown, {} files keep a placeholder header",
                    self.python,
                    self.pending.len()
                );
                return Ok(0);
            }
        };

        if self.magic.is_none() {
            tracing::info!(
                "no bytecode magic found in archive, using the Python {} default",
                self.python
            );
        }

        let pending = std::mem::take(&mut self.pending);
        for path in &pending {
            patch_magic(path, magic).await.map_err(|source| Error::Patch {
                path: path.clone(),
                source,
            })?;
        }

        Ok(pending.len())
    }
}

async fn patch_magic(path: &Path, magic: Magic) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path).await?;
    file.seek(SeekFrom::Start(0)).await?;
    file.write_all(&magic).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC_38: Magic = [0x55, 0x0d, 0x0d, 0x0a];

    #[test]
    fn known_magic_encodes_little_endian_number() {
        assert_eq!(known_magic(PythonVersion::new(3, 8)), Some(MAGIC_38));
        assert_eq!(
            known_magic(PythonVersion::new(2, 7)),
            Some([0x03, 0xf3, 0x0d, 0x0a])
        );
        assert_eq!(known_magic(PythonVersion::new(4, 0)), None);
    }

    #[test]
    fn intact_header_needs_line_ending_marker() {
        assert_eq!(intact_header_magic(&[0x55, 0x0d, 0x0d, 0x0a, 0]), Some(MAGIC_38));
        assert_eq!(intact_header_magic(&[0xe3, 0, 0, 0, 0]), None);
        assert_eq!(intact_header_magic(&[0x55, 0x0d]), None);
    }

    #[tokio::test]
    async fn header_layout_depends_on_version() {
        let dir = tempfile::tempdir().unwrap();

        let mut ctx = ExtractionContext::new(PythonVersion::new(3, 8));
        ctx.observe_magic(MAGIC_38, "test");
        let path = dir.path().join("a.pyc");
        ctx.write_pyc(&path, b"CODE").await.unwrap();
        let mut expected = MAGIC_38.to_vec();
        expected.extend_from_slice(&[0; 12]);
        expected.extend_from_slice(b"CODE");
        assert_eq!(std::fs::read(&path).unwrap(), expected);

        let magic_32 = [0x6c, 0x0c, 0x0d, 0x0a];
        let mut ctx = ExtractionContext::new(PythonVersion::new(3, 2));
        ctx.observe_magic(magic_32, "test");
        let path = dir.path().join("nested/b.pyc");
        ctx.write_pyc(&path, b"CODE").await.unwrap();
        let mut expected = magic_32.to_vec();
        expected.extend_from_slice(&[0; 4]);
        expected.extend_from_slice(b"CODE");
        assert_eq!(std::fs::read(&path).unwrap(), expected);

        assert_eq!(header_tail_len(PythonVersion::new(3, 5)), 8);
        assert!(ctx.pending().is_empty());
    }

    #[tokio::test]
    async fn pending_files_are_patched_with_later_magic() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ExtractionContext::new(PythonVersion::new(3, 8));

        let path = dir.path().join("early.pyc");
        ctx.write_pyc(&path, b"PAYLOAD").await.unwrap();
        assert_eq!(&std::fs::read(&path).unwrap()[..4], &PLACEHOLDER_MAGIC);
        assert_eq!(ctx.pending().len(), 1);

        let magic = [0x61, 0x0d, 0x0d, 0x0a];
        ctx.observe_magic(magic, "test");
        assert_eq!(ctx.fix_pending().await.unwrap(), 1);

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[..4], &magic);
        assert_eq!(&data[16..], b"PAYLOAD");
        assert!(ctx.pending().is_empty());
    }

    #[tokio::test]
    async fn fix_pending_falls_back_to_known_magic() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ExtractionContext::new(PythonVersion::new(3, 8));
        let path = dir.path().join("main.pyc");
        ctx.write_pyc(&path, b"X").await.unwrap();

        assert_eq!(ctx.fix_pending().await.unwrap(), 1);
        assert_eq!(&std::fs::read(&path).unwrap()[..4], &MAGIC_38);
    }

    #[tokio::test]
    async fn missing_pending_file_is_a_patch_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ExtractionContext::new(PythonVersion::new(3, 8));
        let path = dir.path().join("gone.pyc");
        ctx.write_pyc(&path, b"X").await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            ctx.fix_pending().await,
            Err(Error::Patch { .. })
        ));
    }

    #[test]
    fn repeated_paths_are_renamed() {
        let mut ctx = ExtractionContext::new(PythonVersion::new(3, 8));
        let path = PathBuf::from("out/foo.pyc");

        assert_eq!(ctx.claim_path(path.clone()), path);
        let second = ctx.claim_path(path.clone());
        let third = ctx.claim_path(path.clone());

        assert_ne!(second, path);
        assert_ne!(second, third);
        assert_eq!(second.parent(), path.parent());
        assert_eq!(second.extension(), path.extension());
        assert_eq!(ctx.claim_path(PathBuf::from("out/bar")), PathBuf::from("out/bar"));
    }

    #[test]
    fn later_magic_replaces_earlier_one() {
        let mut ctx = ExtractionContext::new(PythonVersion::new(3, 8));
        ctx.observe_magic([1, 2, b'\r', b'\n'], "first");
        ctx.observe_magic([3, 4, b'\r', b'\n'], "second");
        assert_eq!(ctx.magic(), Some([3, 4, b'\r', b'\n']));
    }
}
