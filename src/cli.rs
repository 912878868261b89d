use clap::Parser;
use std::path::{Path, PathBuf};

use crate::options::ExtractOptions;

#[derive(Parser, Debug)]
#[command(name = "pyiunpack")]
#[command(version)]
#[command(about = "Extract the contents of PyInstaller-built executables", long_about = None)]
#[command(after_help = "Examples:\n  \
  pyiunpack app.exe                   extract into ./app.exe_extracted\n  \
  pyiunpack -e -d out app.exe         only write the entry point scripts into out/\n  \
  pyiunpack -v https://example.com/app.exe   list the archive of a remote executable")]
pub struct Cli {
    /// Executable path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Extract files into exdir (default: <FILE>_extracted)
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<PathBuf>,

    /// Only extract the scripts run at startup
    #[arg(short = 'e', long = "entry-points")]
    pub entry_points_only: bool,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Fail entries whose decompressed size differs from the table of contents
    #[arg(long)]
    pub strict_sizes: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Default log filter for the chosen verbosity.
    pub fn log_level(&self) -> &'static str {
        if self.is_very_quiet() {
            "error"
        } else if self.is_quiet() {
            "warn"
        } else {
            "info"
        }
    }

    pub fn options(&self) -> ExtractOptions {
        ExtractOptions {
            entry_points_only: self.entry_points_only,
            strict_sizes: self.strict_sizes,
            ..ExtractOptions::default()
        }
    }

    /// Where to extract to: `-d`, or `<file name>_extracted` in the current
    /// directory.
    pub fn destination(&self) -> PathBuf {
        if let Some(dir) = &self.extract_dir {
            return dir.clone();
        }

        let base = if self.is_http_url() {
            self.file
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .and_then(|s| s.split(['?', '#']).next())
                .filter(|s| !s.is_empty())
                .unwrap_or("download")
                .to_string()
        } else {
            Path::new(&self.file)
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "archive".to_string())
        };
        PathBuf::from(format!("{base}_extracted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_destination_follows_file_name() {
        let cli = Cli::parse_from(["pyiunpack", "dist/app.exe"]);
        assert_eq!(cli.destination(), PathBuf::from("app.exe_extracted"));

        let cli = Cli::parse_from(["pyiunpack", "https://example.com/bin/tool?x=1"]);
        assert_eq!(cli.destination(), PathBuf::from("tool_extracted"));

        let cli = Cli::parse_from(["pyiunpack", "-d", "out", "app.exe"]);
        assert_eq!(cli.destination(), PathBuf::from("out"));
    }

    #[test]
    fn flags_map_to_options() {
        let cli = Cli::parse_from(["pyiunpack", "-e", "--strict-sizes", "-qq", "app"]);
        let options = cli.options();
        assert!(options.entry_points_only);
        assert!(options.strict_sizes);
        assert_eq!(cli.log_level(), "error");
    }
}
