use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Write `data` to `path`, creating parent directories as needed.
pub(crate) async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    write_chunks(path, &[data]).await
}

/// Write the concatenation of `chunks` to `path`, creating parent directories
/// as needed.
pub(crate) async fn write_chunks(path: &Path, chunks: &[&[u8]]) -> Result<()> {
    let wrap = |source| Error::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.map_err(wrap)?;
        }
    }

    let mut file = fs::File::create(path).await.map_err(wrap)?;
    for chunk in chunks {
        file.write_all(chunk).await.map_err(wrap)?;
    }
    file.flush().await.map_err(wrap)?;

    Ok(())
}
