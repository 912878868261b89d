//! Low-level CArchive parser.
//!
//! This module handles the binary parsing of the archive PyInstaller appends
//! to its bootloader, reading from any source that implements [`ReadAt`].
//!
//! ## Parsing Strategy
//!
//! Like a ZIP file, a CArchive is read from the end:
//! 1. Search backwards from the end of the file for the cookie magic
//! 2. Decode the cookie (two layouts exist) to find the overlay and TOC
//! 3. Read the table of contents in one request and decode every record
//!
//! Only the tail of the file is touched until entry data is extracted, which
//! keeps HTTP Range sources cheap.

use byteorder::{BigEndian, ReadBytesExt};
use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::ReadAt;
use crate::sanitize;

use super::structures::*;

/// Default window for the backwards magic search.
pub const DEFAULT_SEARCH_CHUNK_SIZE: usize = 8192;

/// Low-level CArchive parser.
///
/// Typically used through [`CArchiveExtractor`](super::CArchiveExtractor)
/// rather than directly.
///
/// ## Example
///
/// ```ignore
/// let parser = CArchiveParser::new(reader);
/// let cookie = parser.read_cookie().await?;
/// for entry in parser.read_toc(&cookie).await? {
///     let data = parser.reader().read_vec_at(entry.position, entry.compressed_size as usize).await?;
/// }
/// ```
pub struct CArchiveParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the file in bytes
    size: u64,
    search_chunk_size: usize,
}

impl<R: ReadAt> CArchiveParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self {
            reader,
            size,
            search_chunk_size: DEFAULT_SEARCH_CHUNK_SIZE,
        }
    }

    /// Use a different window for the backwards magic search.
    ///
    /// Windows smaller than twice the magic are widened to that size so the
    /// overlapping scan keeps making progress.
    pub fn with_search_chunk_size(mut self, size: usize) -> Self {
        self.search_chunk_size = size.max(MAGIC.len() * 2);
        self
    }

    /// Find the offset of the last cookie magic in the file.
    ///
    /// The file is scanned backwards in windows that overlap by
    /// `MAGIC.len() - 1` bytes, so a magic straddling two windows is still
    /// seen. Within a window the rightmost match wins; the magic can appear
    /// earlier in the executable, but only the one closest to the end belongs
    /// to the cookie.
    ///
    /// # Errors
    ///
    /// [`Error::TooShort`] if the file is shorter than the magic,
    /// [`Error::CookieNotFound`] if no magic is present.
    pub async fn find_cookie(&self) -> Result<u64> {
        let magic_len = MAGIC.len() as u64;
        if self.size < magic_len {
            return Err(Error::TooShort { len: self.size });
        }

        let chunk_size = self.search_chunk_size as u64;
        let mut end = self.size;
        let mut buf = vec![0u8; self.search_chunk_size];

        loop {
            let start = end.saturating_sub(chunk_size);
            let len = (end - start) as usize;
            if len < MAGIC.len() {
                break;
            }

            let window = &mut buf[..len];
            self.reader.read_exact_at(start, window).await?;

            if let Some(i) = window.windows(MAGIC.len()).rposition(|w| w == MAGIC) {
                return Ok(start + i as u64);
            }

            if start == 0 {
                break;
            }
            end = start + magic_len - 1;
        }

        Err(Error::CookieNotFound)
    }

    /// Decode the cookie at `position`.
    ///
    /// The 64 bytes after a legacy-sized cookie are probed for the Python
    /// library name (`python38.dll`, `libpython3.10.so`, ...) that only the
    /// newer layout carries.
    pub async fn read_cookie_at(&self, position: u64) -> Result<Cookie> {
        let mut probe = [0u8; CookieVersion::PROBE_SIZE];
        let probe_pos = position + CookieVersion::LEGACY_SIZE as u64;
        let mut probed = 0;
        while probed < probe.len() {
            let n = self
                .reader
                .read_at(probe_pos + probed as u64, &mut probe[probed..])
                .await?;
            if n == 0 {
                break;
            }
            probed += n;
        }
        let version = CookieVersion::detect(&probe[..probed]);
        tracing::info!("PyInstaller version: {}", version);

        let mut data = vec![0u8; version.size()];
        self.reader
            .read_exact_at(position, &mut data)
            .await
            .map_err(|e| match e {
                Error::ShortRead { .. } => Error::InvalidCookie(e.to_string()),
                other => other,
            })?;

        let raw = RawCookie::from_bytes(&data, version)?;
        let cookie = Cookie::resolve(raw, position, self.size)?;

        tracing::info!("Python version: {}", cookie.python);
        tracing::info!("Length of package: {} bytes", cookie.package_length);
        Ok(cookie)
    }

    /// Locate and decode the cookie.
    pub async fn read_cookie(&self) -> Result<Cookie> {
        let position = self.find_cookie().await?;
        tracing::debug!("cookie found at offset {}", position);
        self.read_cookie_at(position).await
    }

    /// Read and decode the whole table of contents described by `cookie`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidToc`] if a record length is too small for the fixed
    /// fields or runs past the end of the table.
    pub async fn read_toc(&self, cookie: &Cookie) -> Result<Vec<TocEntry>> {
        let toc = self
            .reader
            .read_vec_at(cookie.toc_pos, cookie.toc_length as usize)
            .await
            .map_err(|e| match e {
                Error::ShortRead { .. } => Error::InvalidToc(e.to_string()),
                other => other,
            })?;

        let entries = parse_toc(&toc, cookie.overlay_pos)?;
        tracing::info!("Found {} files in CArchive", entries.len());
        Ok(entries)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

/// Decode consecutive TOC records from `toc`.
///
/// Entry offsets are stored relative to the overlay; `overlay_pos` turns them
/// into file offsets.
pub fn parse_toc(toc: &[u8], overlay_pos: u64) -> Result<Vec<TocEntry>> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = Cursor::new(toc);
    let total = toc.len() as u64;

    while cursor.position() < total {
        let record_start = cursor.position();
        let remaining = total - record_start;
        if remaining < 4 {
            return Err(Error::InvalidToc(format!(
                "{remaining} trailing bytes at offset {record_start}"
            )));
        }

        let entry_size = cursor.read_i32::<BigEndian>()?;
        let name_len = usize::try_from(entry_size)
            .ok()
            .and_then(|size| size.checked_sub(TOC_ENTRY_FIXED_SIZE))
            .ok_or_else(|| {
                Error::InvalidToc(format!(
                    "record at offset {record_start} has invalid size {entry_size}"
                ))
            })?;
        if entry_size as u64 > remaining {
            return Err(Error::InvalidToc(format!(
                "record at offset {record_start} ({entry_size} bytes) runs past the end of the table"
            )));
        }

        let entry_offset = cursor.read_u32::<BigEndian>()? as u64;
        let compressed_size = cursor.read_u32::<BigEndian>()? as u64;
        let uncompressed_size = cursor.read_u32::<BigEndian>()? as u64;
        let compression_flag = cursor.read_u8()?;
        let type_tag = TypeTag::from_u8(cursor.read_u8()?);

        let mut raw_name = vec![0u8; name_len];
        cursor.read_exact(&mut raw_name)?;

        let mut name = sanitize::decode_toc_name(&raw_name);
        if !seen.insert(name.clone()) {
            let replacement = sanitize::unique_name();
            tracing::warn!(
                "duplicate name {} in CArchive, using random name {}",
                name,
                replacement
            );
            name = replacement;
            seen.insert(name.clone());
        }

        entries.push(TocEntry {
            position: overlay_pos + entry_offset,
            compressed_size,
            uncompressed_size,
            is_compressed: compression_flag == 1,
            type_tag,
            name,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(offset: u32, size: u32, tag: u8, name: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((TOC_ENTRY_FIXED_SIZE + name.len()) as i32).to_be_bytes());
        out.extend_from_slice(&offset.to_be_bytes());
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(&(size * 2).to_be_bytes());
        out.push(1);
        out.push(tag);
        out.extend_from_slice(name);
        out
    }

    #[test]
    fn parses_records_relative_to_overlay() {
        let mut toc = record(0, 10, b's', b"main\0\0\0\0");
        toc.extend(record(10, 5, b'b', b"lib/a.so\0\0\0\0\0\0\0\0"));

        let entries = parse_toc(&toc, 1000).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "main");
        assert_eq!(entries[0].position, 1000);
        assert_eq!(entries[0].type_tag, TypeTag::PySource);
        assert!(entries[0].is_compressed);
        assert_eq!(entries[1].name, "lib/a.so");
        assert_eq!(entries[1].position, 1010);
        assert_eq!(entries[1].uncompressed_size, 10);
    }

    #[test]
    fn rejects_record_smaller_than_fixed_fields() {
        let mut toc = Vec::new();
        toc.extend_from_slice(&10i32.to_be_bytes());
        toc.extend_from_slice(&[0u8; 14]);
        assert!(matches!(parse_toc(&toc, 0), Err(Error::InvalidToc(_))));
    }

    #[test]
    fn rejects_record_running_past_table() {
        let mut toc = record(0, 1, b'x', b"data");
        toc.truncate(toc.len() - 2);
        assert!(matches!(parse_toc(&toc, 0), Err(Error::InvalidToc(_))));
    }

    #[test]
    fn rejects_trailing_garbage() {
        let mut toc = record(0, 1, b'x', b"data");
        toc.extend_from_slice(&[0, 0]);
        assert!(matches!(parse_toc(&toc, 0), Err(Error::InvalidToc(_))));
    }

    #[test]
    fn duplicate_names_are_renamed() {
        let mut toc = record(0, 1, b'x', b"same");
        toc.extend(record(1, 1, b'x', b"same"));
        let entries = parse_toc(&toc, 0).unwrap();
        assert_eq!(entries[0].name, "same");
        assert_ne!(entries[1].name, "same");
    }
}
