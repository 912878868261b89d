mod http;
mod local;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// May return fewer bytes than requested; returns 0 at end of data.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill `buf` completely from `offset`, failing with [`Error::ShortRead`]
    /// if the source ends first.
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .read_at(offset + filled as u64, &mut buf[filled..])
                .await?;
            if n == 0 {
                return Err(Error::ShortRead {
                    offset,
                    expected: buf.len(),
                    actual: filled,
                });
            }
            filled += n;
        }
        Ok(())
    }

    /// Read exactly `len` bytes at `offset` into a new buffer.
    ///
    /// The range is checked against [`ReadAt::size`] before allocating, so a
    /// corrupted length field cannot trigger a huge allocation.
    async fn read_vec_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let available = self.size().saturating_sub(offset);
        if len as u64 > available {
            return Err(Error::ShortRead {
                offset,
                expected: len,
                actual: available as usize,
            });
        }
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf).await?;
        Ok(buf)
    }
}
