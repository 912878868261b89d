//! Main entry point for the pyiunpack CLI application.
//!
//! This binary provides a command-line interface for extracting PyInstaller
//! executables from both the local filesystem and remote HTTP URLs.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use pyiunpack::{CArchiveExtractor, Cli, HttpRangeReader, LocalFileReader, ReadAt};

/// Application entry point.
///
/// Parses command-line arguments and dispatches to the appropriate handler
/// based on whether the input is a local file or HTTP URL.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Processing {}", cli.file);

    if cli.is_http_url() {
        let reader = Arc::new(HttpRangeReader::new(cli.file.clone()).await?);
        let transferred_before = reader.transferred_bytes();

        process_archive(reader.clone(), &cli).await?;

        if !cli.is_quiet() {
            let transferred = reader.transferred_bytes() - transferred_before;
            eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
        }
    } else {
        let reader = Arc::new(LocalFileReader::new(Path::new(&cli.file))?);
        process_archive(reader, &cli).await?;
    }

    Ok(())
}

/// List or extract the archive, depending on the CLI options.
async fn process_archive<R: ReadAt + 'static>(reader: Arc<R>, cli: &Cli) -> Result<()> {
    let extractor = CArchiveExtractor::new(reader, cli.options());

    if cli.list || cli.verbose {
        return list_entries(&extractor, cli.verbose).await;
    }

    let report = extractor.extract_to(&cli.destination()).await?;

    if !cli.is_very_quiet() {
        println!(
            "Extracted {} of {} entries into {}",
            report.written.len(),
            report.total_entries,
            report.destination.display()
        );
        for pyz in &report.pyz {
            if let Some(reason) = &pyz.skipped {
                println!("  skipped {}: {}", pyz.archive.display(), reason);
            } else {
                println!(
                    "  {}: {} of {} modules, {} encrypted",
                    pyz.output_dir.display(),
                    pyz.written,
                    pyz.members,
                    pyz.encrypted.len()
                );
            }
        }
        if !report.failures.is_empty() {
            println!("{} entries could not be extracted:", report.failures.len());
            for (name, error) in &report.failures {
                println!("  {}: {}", name, error);
            }
        }
        if !report.entry_points.is_empty() {
            println!("Possible entry points:");
            for path in &report.entry_points {
                println!("  {}", path.display());
            }
        }
        println!();
        println!("You can now use a python decompiler on the pyc files within the extracted directory");
    }

    Ok(())
}

/// List the entries of the archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just entry names, one per line
/// - Verbose format (`-v`): Table with sizes, compression ratio and entry type
async fn list_entries<R: ReadAt + 'static>(
    extractor: &CArchiveExtractor<R>,
    verbose: bool,
) -> Result<()> {
    let (cookie, entries) = extractor.list_entries().await?;

    if verbose {
        println!(
            "Python {}, package of {} at offset {}",
            cookie.python,
            format_size(cookie.package_length),
            cookie.overlay_pos
        );
        println!(
            "{:>10}  {:>10}  {:>5}  {:<10}  Name",
            "Length", "Size", "Cmpr", "Type"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;

    for entry in &entries {
        if verbose {
            println!(
                "{:>10}  {:>10}  {}  {:<10}  {}",
                entry.uncompressed_size,
                entry.compressed_size,
                ratio(entry.compressed_size, entry.uncompressed_size),
                entry.type_tag.label(),
                entry.name
            );
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
        } else {
            println!("{}", entry.name);
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:<10}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            entries.len()
        );
    }

    Ok(())
}

/// Space saved by compression, as a right-aligned percentage.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Format a byte size into a human-readable string.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
