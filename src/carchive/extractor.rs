use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::inflate::inflate;
use crate::io::ReadAt;
use crate::options::ExtractOptions;
use crate::output;
use crate::pyc::{self, ExtractionContext};
use crate::pyz::{PyzExtractor, PyzHeader, PyzReport};
use crate::sanitize;

use super::parser::CArchiveParser;
use super::structures::{Cookie, TocEntry, TypeTag};

/// Progress of an extraction run. Each stage only starts once the previous
/// one succeeded; a structural failure jumps straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Init,
    Located,
    CookieParsed,
    TocParsed,
    Extracted,
    HeadersFixed,
    Closed,
}

/// Why an entry produced no file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Dependencies and runtime options are not file content.
    NotAFile,
    /// Filtered out by [`ExtractOptions::entry_points_only`].
    NotAnEntryPoint,
}

/// Result of extracting one TOC entry.
#[derive(Debug)]
pub enum EntryOutcome {
    Written(PathBuf),
    /// A PYZ archive was written and then extracted (or failed to be).
    Nested {
        path: PathBuf,
        result: Result<PyzReport>,
    },
    Skipped(SkipReason),
    Failed(Error),
}

/// Summary of an extraction run.
#[derive(Debug)]
pub struct ExtractionReport {
    pub cookie: Cookie,
    pub destination: PathBuf,
    pub total_entries: usize,
    pub written: Vec<PathBuf>,
    pub skipped: usize,
    /// Entries (and PYZ archives) that failed, by TOC name.
    pub failures: Vec<(String, Error)>,
    /// Startup scripts, excluding PyInstaller's own bootstrap scripts.
    pub entry_points: Vec<PathBuf>,
    pub pyz: Vec<PyzReport>,
    /// Files whose placeholder magic was patched after extraction.
    pub patched_headers: usize,
}

/// High level CArchive extractor.
pub struct CArchiveExtractor<R: ReadAt> {
    parser: CArchiveParser<R>,
    options: ExtractOptions,
}

impl<R: ReadAt> CArchiveExtractor<R> {
    pub fn new(reader: Arc<R>, options: ExtractOptions) -> Self {
        Self {
            parser: CArchiveParser::new(reader).with_search_chunk_size(options.search_chunk_size),
            options,
        }
    }

    /// Decode the cookie and table of contents without extracting anything.
    pub async fn list_entries(&self) -> Result<(Cookie, Vec<TocEntry>)> {
        let cookie = self.parser.read_cookie().await?;
        let entries = self.parser.read_toc(&cookie).await?;
        Ok((cookie, entries))
    }

    /// Read an entry's data, inflating it if needed.
    pub async fn read_entry(&self, entry: &TocEntry) -> Result<Vec<u8>> {
        let data = self
            .parser
            .reader()
            .read_vec_at(entry.position, entry.compressed_size as usize)
            .await?;

        if !entry.is_compressed {
            return Ok(data);
        }

        let data = inflate(&data, entry.uncompressed_size).map_err(|source| {
            Error::Decompression {
                name: entry.name.clone(),
                source,
            }
        })?;

        if data.len() as u64 != entry.uncompressed_size {
            let mismatch = Error::SizeMismatch {
                name: entry.name.clone(),
                expected: entry.uncompressed_size,
                actual: data.len() as u64,
            };
            if self.options.strict_sizes {
                return Err(mismatch);
            }
            tracing::warn!("{}", mismatch);
        }

        Ok(data)
    }

    /// Extract every entry into `destination`.
    ///
    /// Only structural problems (no cookie, undecodable cookie or TOC) and a
    /// failure to patch deferred headers abort the run. Files written before
    /// an abort are left in place.
    pub async fn extract_to(&self, destination: &Path) -> Result<ExtractionReport> {
        let mut stage = Stage::Init;

        let position = match self.parser.find_cookie().await {
            Ok(position) => position,
            Err(e) => {
                advance(&mut stage, Stage::Closed);
                return Err(e);
            }
        };
        advance(&mut stage, Stage::Located);

        let cookie = self.parser.read_cookie_at(position).await?;
        advance(&mut stage, Stage::CookieParsed);

        let entries = self.parser.read_toc(&cookie).await?;
        advance(&mut stage, Stage::TocParsed);

        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|source| Error::Write {
                path: destination.to_path_buf(),
                source,
            })?;
        tracing::info!("Beginning extraction into {}", destination.display());

        let mut ctx = ExtractionContext::new(cookie.python);
        let mut report = ExtractionReport {
            cookie,
            destination: destination.to_path_buf(),
            total_entries: entries.len(),
            written: Vec::new(),
            skipped: 0,
            failures: Vec::new(),
            entry_points: Vec::new(),
            pyz: Vec::new(),
            patched_headers: 0,
        };

        for entry in &entries {
            match self.extract_entry(&mut ctx, destination, entry).await {
                EntryOutcome::Written(path) => {
                    if entry.type_tag == TypeTag::PySource {
                        tracing::info!("Possible entry point: {}.pyc", entry.name);
                        if !is_bootstrap_script(&entry.name) {
                            report.entry_points.push(path.clone());
                        }
                    }
                    report.written.push(path);
                }
                EntryOutcome::Nested { path, result } => {
                    report.written.push(path);
                    match result {
                        Ok(pyz) => report.pyz.push(pyz),
                        Err(e) => {
                            tracing::warn!(
                                "cannot extract {}: {}; extracting remaining files",
                                entry.name,
                                e
                            );
                            report.failures.push((entry.name.clone(), e));
                        }
                    }
                }
                EntryOutcome::Skipped(reason) => {
                    tracing::debug!("skipping {} ({:?})", entry.name, reason);
                    report.skipped += 1;
                }
                EntryOutcome::Failed(e) => {
                    tracing::warn!("failed to extract {}: {}", entry.name, e);
                    report.failures.push((entry.name.clone(), e));
                }
            }
        }
        advance(&mut stage, Stage::Extracted);

        report.patched_headers = ctx.fix_pending().await?;
        advance(&mut stage, Stage::HeadersFixed);

        tracing::info!(
            "Successfully extracted pyinstaller archive: {} files written, {} failed",
            report.written.len(),
            report.failures.len()
        );
        advance(&mut stage, Stage::Closed);

        Ok(report)
    }

    /// Extract a single entry. Never fails; problems end up in the outcome.
    pub async fn extract_entry(
        &self,
        ctx: &mut ExtractionContext,
        destination: &Path,
        entry: &TocEntry,
    ) -> EntryOutcome {
        let data = match self.read_entry(entry).await {
            Ok(data) => data,
            Err(e) => return EntryOutcome::Failed(e),
        };

        let entry_points_only = self.options.entry_points_only;
        let written = match entry.type_tag {
            TypeTag::Dependency | TypeTag::RuntimeOption => {
                return EntryOutcome::Skipped(SkipReason::NotAFile);
            }

            TypeTag::PySource => {
                let path = ctx.claim_path(pyc_path(destination, &entry.name));
                let write = ctx.write_pyc(&path, &data).await;
                write.map(|()| path)
            }

            TypeTag::PyPackage | TypeTag::PyModule => {
                let intact = pyc::intact_header_magic(&data);
                if let Some(magic) = intact {
                    ctx.observe_magic(magic, &entry.name);
                }
                if entry_points_only {
                    return EntryOutcome::Skipped(SkipReason::NotAnEntryPoint);
                }

                let path = ctx.claim_path(pyc_path(destination, &entry.name));
                let write = if intact.is_some() {
                    output::write_file(&path, &data).await
                } else {
                    ctx.write_pyc(&path, &data).await
                };
                write.map(|()| path)
            }

            TypeTag::Pyz | TypeTag::ZipFile => {
                if entry_points_only {
                    // Still worth a look: the PYZ header carries the magic.
                    if let Ok(header) = PyzHeader::from_bytes(&data, Path::new(&entry.name)) {
                        ctx.observe_magic(header.pyc_magic, &entry.name);
                    }
                    return EntryOutcome::Skipped(SkipReason::NotAnEntryPoint);
                }

                let path = ctx.claim_path(sanitize::entry_path(destination, &entry.name));
                if let Err(e) = output::write_file(&path, &data).await {
                    return EntryOutcome::Failed(e);
                }
                let result = PyzExtractor::new(ctx).extract(&path).await;
                return EntryOutcome::Nested { path, result };
            }

            TypeTag::Binary
            | TypeTag::Data
            | TypeTag::Splash
            | TypeTag::Symlink
            | TypeTag::Unknown(_) => {
                if let TypeTag::Unknown(tag) = entry.type_tag {
                    tracing::warn!(
                        "unknown type tag 0x{:02x} for {}, extracting as a plain file",
                        tag,
                        entry.name
                    );
                }
                if entry_points_only {
                    return EntryOutcome::Skipped(SkipReason::NotAnEntryPoint);
                }

                let path = ctx.claim_path(sanitize::entry_path(destination, &entry.name));
                let write = output::write_file(&path, &data).await;
                write.map(|()| path)
            }
        };

        match written {
            Ok(path) => EntryOutcome::Written(path),
            Err(e) => EntryOutcome::Failed(e),
        }
    }

    /// Get a reference to the underlying parser.
    pub fn parser(&self) -> &CArchiveParser<R> {
        &self.parser
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    tracing::debug!("extraction stage {:?} -> {:?}", stage, next);
    *stage = next;
}

fn pyc_path(destination: &Path, name: &str) -> PathBuf {
    sanitize::append_extension(&sanitize::entry_path(destination, name), "pyc")
}

/// Scripts PyInstaller adds to every build to set up its runtime.
fn is_bootstrap_script(name: &str) -> bool {
    name.starts_with("pyiboot") || name.starts_with("pyi_rth_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_scripts_are_recognized() {
        assert!(is_bootstrap_script("pyiboot01_bootstrap"));
        assert!(is_bootstrap_script("pyi_rth_pkgutil"));
        assert!(!is_bootstrap_script("main"));
    }

    #[test]
    fn stage_moves_forward() {
        let mut stage = Stage::Init;
        advance(&mut stage, Stage::Located);
        assert_eq!(stage, Stage::Located);
        advance(&mut stage, Stage::Closed);
        assert_eq!(stage, Stage::Closed);
    }

    #[test]
    fn pyc_paths_keep_dotted_names() {
        let root = Path::new("out");
        assert_eq!(
            pyc_path(root, "pyimod01_os.path"),
            root.join("pyimod01_os.path.pyc")
        );
    }
}
