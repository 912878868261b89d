use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::inflate::inflate;
use crate::io::{LocalFileReader, ReadAt};
use crate::output;
use crate::pyc::ExtractionContext;
use crate::sanitize;

use super::header::PyzHeader;
use super::table::{self, PyzMember};

/// Summary of one PYZ extraction.
#[derive(Debug, Default)]
pub struct PyzReport {
    /// The PYZ file that was read.
    pub archive: PathBuf,
    /// Directory the members were written to.
    pub output_dir: PathBuf,
    pub members: usize,
    pub written: usize,
    /// Members written verbatim because they did not inflate.
    pub encrypted: Vec<PathBuf>,
    pub failures: Vec<(String, Error)>,
    /// Set when the whole archive was skipped.
    pub skipped: Option<String>,
}

/// Extracts the members of a PYZ file that is already on disk.
pub struct PyzExtractor<'a> {
    ctx: &'a mut ExtractionContext,
}

impl<'a> PyzExtractor<'a> {
    pub fn new(ctx: &'a mut ExtractionContext) -> Self {
        Self { ctx }
    }

    /// Extract `archive` into `<archive>_extracted`.
    ///
    /// Member failures are collected in the report. Errors are returned only
    /// when the archive itself cannot be read or its table cannot be decoded.
    pub async fn extract(&mut self, archive: &Path) -> Result<PyzReport> {
        let reader = LocalFileReader::new(archive)?;
        let header_bytes = reader
            .read_vec_at(0, PyzHeader::SIZE)
            .await
            .map_err(|e| Error::InvalidPyz {
                path: archive.to_path_buf(),
                reason: e.to_string(),
            })?;
        let header = PyzHeader::from_bytes(&header_bytes, archive)?;

        self.ctx
            .observe_magic(header.pyc_magic, &archive.display().to_string());

        let mut report = PyzReport {
            archive: archive.to_path_buf(),
            output_dir: archive.with_file_name(extracted_dir_name(archive)),
            ..Default::default()
        };

        let python = self.ctx.python();
        if !table::supports(python) {
            let reason = format!(
                "member table of Python {python} cannot be decoded (supported: {} to {})",
                table::MIN_SUPPORTED,
                table::MAX_SUPPORTED
            );
            tracing::warn!("skipping PYZ extraction of {}: {}", archive.display(), reason);
            report.skipped = Some(reason);
            return Ok(report);
        }

        if header.toc_offset > reader.size() {
            return Err(Error::InvalidPyz {
                path: archive.to_path_buf(),
                reason: format!(
                    "table offset {} is past the end of the file ({} bytes)",
                    header.toc_offset,
                    reader.size()
                ),
            });
        }
        let table_bytes = reader
            .read_vec_at(header.toc_offset, (reader.size() - header.toc_offset) as usize)
            .await?;
        let members = table::parse_table(&table_bytes)?;

        tracing::info!("Found {} files in PYZ archive", members.len());
        report.members = members.len();

        tokio::fs::create_dir_all(&report.output_dir)
            .await
            .map_err(|source| Error::Write {
                path: report.output_dir.clone(),
                source,
            })?;

        for member in &members {
            let name = member.name.to_module_name();
            match self.extract_member(&reader, &report.output_dir, member).await {
                Ok(MemberOutcome::Written) => report.written += 1,
                Ok(MemberOutcome::Encrypted(path)) => report.encrypted.push(path),
                Err(e) => {
                    tracing::warn!("failed to extract PYZ member {}: {}", name, e);
                    report.failures.push((name, e));
                }
            }
        }

        Ok(report)
    }

    async fn extract_member(
        &mut self,
        reader: &LocalFileReader,
        output_dir: &Path,
        member: &PyzMember,
    ) -> Result<MemberOutcome> {
        let module = member.name.to_module_name();
        let path = match member.name.as_text() {
            Some(text) => sanitize::module_path(output_dir, text, member.is_package),
            None => {
                tracing::warn!(
                    "PYZ member name {:?} is not valid UTF-8, using its raw bytes",
                    module
                );
                sanitize::raw_module_path(output_dir, member.name.as_bytes(), member.is_package)
            }
        };

        let data = reader
            .read_vec_at(member.offset, member.length as usize)
            .await?;

        match inflate(&data, 0) {
            Ok(code) => {
                let path = self.ctx.claim_path(path);
                tracing::debug!("extracting {}", path.display());
                self.ctx.write_pyc(&path, &code).await?;
                Ok(MemberOutcome::Written)
            }
            Err(e) => {
                let path = self
                    .ctx
                    .claim_path(sanitize::append_extension(&path, "encrypted"));
                tracing::warn!(
                    "failed to decompress {} ({}), probably encrypted; extracting as is",
                    module,
                    e
                );
                output::write_file(&path, &data).await?;
                Ok(MemberOutcome::Encrypted(path))
            }
        }
    }
}

enum MemberOutcome {
    Written,
    Encrypted(PathBuf),
}

fn extracted_dir_name(archive: &Path) -> String {
    let base = archive
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{base}_extracted")
}
