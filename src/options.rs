use crate::carchive::DEFAULT_SEARCH_CHUNK_SIZE;

/// Knobs for one extraction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Write only the scripts PyInstaller runs at startup.
    pub entry_points_only: bool,
    /// Treat a decompressed size that differs from the TOC as an entry failure
    /// instead of a warning. Tampered executables often lie about sizes.
    pub strict_sizes: bool,
    /// Window size for the backwards cookie search.
    pub search_chunk_size: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            entry_points_only: false,
            strict_sizes: false,
            search_chunk_size: DEFAULT_SEARCH_CHUNK_SIZE,
        }
    }
}
