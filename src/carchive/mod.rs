//! CArchive parsing and extraction.
//!
//! PyInstaller appends a CArchive to its bootloader executable. This module
//! finds it, decodes its table of contents and writes every entry to disk.
//!
//! ## Architecture
//!
//! - [`structures`]: cookie, TOC records and type tags
//! - [`parser`]: locating the cookie and decoding the cookie and TOC
//! - [`extractor`]: per-entry extraction and the overall run
//!
//! ## CArchive Format Overview
//!
//! ```text
//! | bootloader | entry data ... | TOC records | cookie | (trailing bytes) |
//!              ^ overlay start                 ^ magic "MEI\014\013\012\013\016"
//! ```
//!
//! The cookie stores the package length, the TOC offset (relative to the
//! overlay start) and TOC length, and the Python version. Each TOC record
//! stores its own length, the entry offset and sizes, a compression flag, a
//! type tag and a NUL-padded name. All integers are big-endian.

mod extractor;
mod parser;
mod structures;

pub use extractor::{CArchiveExtractor, EntryOutcome, ExtractionReport, SkipReason};
pub use parser::{CArchiveParser, DEFAULT_SEARCH_CHUNK_SIZE, parse_toc};
pub use structures::*;
