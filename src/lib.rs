//! # pyiunpack
//!
//! Extract the contents of executables built with PyInstaller.
//!
//! PyInstaller appends a CArchive to its bootloader. The archive holds the
//! startup scripts, shared libraries, data files and a PYZ archive with the
//! compiled modules. This library locates the archive, decodes its table of
//! contents and writes every entry to disk, turning header-less code objects
//! back into loadable `.pyc` files.
//!
//! ## Features
//!
//! - Both cookie layouts (PyInstaller 2.0 and 2.1+)
//! - Python 2.7 through 3.13 bytecode headers, with the magic recovered from
//!   the archive itself and patched in after the fact when found late
//! - PYZ extraction, keeping encrypted members as `.encrypted` files
//! - Local files, or remote files over HTTP Range requests
//! - Best effort: a bad entry is reported and skipped, not fatal
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use pyiunpack::{CArchiveExtractor, ExtractOptions, LocalFileReader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(LocalFileReader::new(Path::new("app.exe"))?);
//!     let extractor = CArchiveExtractor::new(reader, ExtractOptions::default());
//!
//!     let report = extractor.extract_to(Path::new("app.exe_extracted")).await?;
//!     for entry_point in &report.entry_points {
//!         println!("{}", entry_point.display());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod carchive;
pub mod cli;
pub mod error;
pub mod io;
pub mod options;
pub mod pyc;
pub mod pyz;
pub mod sanitize;

mod inflate;
mod output;

pub use carchive::{CArchiveExtractor, Cookie, ExtractionReport, PythonVersion, TocEntry, TypeTag};
pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use options::ExtractOptions;
pub use pyc::ExtractionContext;
