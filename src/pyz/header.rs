use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;
use std::path::Path;

use crate::error::{Error, Result};
use crate::pyc::Magic;

/// Tag at the start of every PYZ archive.
pub const PYZ_MAGIC: &[u8; 4] = b"PYZ\0";

/// Fixed PYZ header: tag, bytecode magic, offset of the member table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyzHeader {
    pub pyc_magic: Magic,
    pub toc_offset: u64,
}

impl PyzHeader {
    pub const SIZE: usize = 12;

    pub fn from_bytes(data: &[u8], source: &Path) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidPyz {
            path: source.to_path_buf(),
            reason,
        };

        if data.len() < Self::SIZE {
            return Err(invalid(format!(
                "header needs {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        if &data[0..4] != PYZ_MAGIC {
            return Err(invalid(format!("bad tag {:02x?}", &data[0..4])));
        }

        let mut pyc_magic = [0u8; 4];
        pyc_magic.copy_from_slice(&data[4..8]);

        let toc_offset = Cursor::new(&data[8..12]).read_i32::<BigEndian>()?;
        let toc_offset = u64::try_from(toc_offset)
            .map_err(|_| invalid(format!("negative table offset {toc_offset}")))?;

        Ok(Self {
            pyc_magic,
            toc_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_fields() {
        let data = b"PYZ\0\x55\x0d\x0d\x0a\x00\x00\x01\x00rest";
        let header = PyzHeader::from_bytes(data, Path::new("x.pyz")).unwrap();
        assert_eq!(header.pyc_magic, [0x55, 0x0d, 0x0d, 0x0a]);
        assert_eq!(header.toc_offset, 256);
    }

    #[test]
    fn rejects_bad_tag_and_short_data() {
        let path = Path::new("x.pyz");
        assert!(matches!(
            PyzHeader::from_bytes(b"PYZ!\0\0\0\0\0\0\0\0", path),
            Err(Error::InvalidPyz { .. })
        ));
        assert!(matches!(
            PyzHeader::from_bytes(b"PYZ\0", path),
            Err(Error::InvalidPyz { .. })
        ));
        assert!(matches!(
            PyzHeader::from_bytes(b"PYZ\0\0\0\0\0\xff\xff\xff\xff", path),
            Err(Error::InvalidPyz { .. })
        ));
    }
}
