use byteorder::{BigEndian, ReadBytesExt};
use std::fmt;
use std::io::{Cursor, Read};

use crate::error::{Error, Result};

/// Magic number which identifies a PyInstaller CArchive cookie.
pub const MAGIC: &[u8; 8] = b"MEI\x0c\x0b\x0a\x0b\x0e";

/// Size of the fixed fields that precede the name in a TOC record.
pub const TOC_ENTRY_FIXED_SIZE: usize = 18;

/// Cookie layouts, distinguished by the library name that newer packagers append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieVersion {
    /// PyInstaller 2.0: magic, four i32 fields.
    Legacy,
    /// PyInstaller 2.1+: the legacy layout plus a 64 byte Python library name.
    Modern,
}

impl CookieVersion {
    pub const LEGACY_SIZE: usize = 24;
    pub const MODERN_SIZE: usize = 24 + 64;
    /// Bytes probed after the legacy cookie to look for a library name.
    pub const PROBE_SIZE: usize = 64;

    pub fn size(&self) -> usize {
        match self {
            CookieVersion::Legacy => Self::LEGACY_SIZE,
            CookieVersion::Modern => Self::MODERN_SIZE,
        }
    }

    /// Pick the layout from the bytes following the legacy-sized cookie.
    pub fn detect(probe: &[u8]) -> Self {
        if probe.to_ascii_lowercase().windows(6).any(|w| w == b"python") {
            CookieVersion::Modern
        } else {
            CookieVersion::Legacy
        }
    }
}

impl fmt::Display for CookieVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CookieVersion::Legacy => write!(f, "2.0"),
            CookieVersion::Modern => write!(f, "2.1+"),
        }
    }
}

/// Interpreter version the archive was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PythonVersion {
    pub major: u8,
    pub minor: u8,
}

impl PythonVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Decode the cookie's version field. Older packagers store `27`, newer
    /// ones `308` or `310`.
    pub fn from_encoded(value: i32) -> Result<Self> {
        if value < 0 {
            return Err(Error::InvalidCookie(format!(
                "negative python version {value}"
            )));
        }
        let (major, minor) = if value >= 100 {
            (value / 100, value % 100)
        } else {
            (value / 10, value % 10)
        };
        let major = u8::try_from(major)
            .map_err(|_| Error::InvalidCookie(format!("python version {value} out of range")))?;
        Ok(Self::new(major, minor as u8))
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Raw cookie fields as stored on disk.
#[derive(Debug, Clone)]
pub struct RawCookie {
    pub version: CookieVersion,
    pub package_length: u64,
    pub toc_offset: u64,
    pub toc_length: u64,
    pub python_version: i32,
    pub python_library: Option<String>,
}

impl RawCookie {
    pub fn from_bytes(data: &[u8], version: CookieVersion) -> Result<Self> {
        if data.len() < version.size() {
            return Err(Error::InvalidCookie(format!(
                "expected {} bytes, got {}",
                version.size(),
                data.len()
            )));
        }
        if &data[0..8] != MAGIC {
            return Err(Error::InvalidCookie("bad magic".to_string()));
        }

        let mut cursor = Cursor::new(&data[8..version.size()]);
        let (package_length, toc_offset) = match version {
            CookieVersion::Legacy => (
                non_negative(cursor.read_i32::<BigEndian>()?, "package length")?,
                non_negative(cursor.read_i32::<BigEndian>()?, "toc offset")?,
            ),
            CookieVersion::Modern => (
                cursor.read_u32::<BigEndian>()? as u64,
                cursor.read_u32::<BigEndian>()? as u64,
            ),
        };
        let toc_length = non_negative(cursor.read_i32::<BigEndian>()?, "toc length")?;
        let python_version = cursor.read_i32::<BigEndian>()?;

        let python_library = match version {
            CookieVersion::Legacy => None,
            CookieVersion::Modern => {
                let mut name = [0u8; 64];
                cursor.read_exact(&mut name)?;
                let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
                Some(String::from_utf8_lossy(&name[..end]).into_owned())
            }
        };

        Ok(Self {
            version,
            package_length,
            toc_offset,
            toc_length,
            python_version,
            python_library,
        })
    }
}

fn non_negative(value: i32, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::InvalidCookie(format!("negative {field}: {value}")))
}

/// Decoded cookie with the overlay geometry resolved against the file size.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub version: CookieVersion,
    /// Offset of the magic in the file.
    pub position: u64,
    pub package_length: u64,
    pub python: PythonVersion,
    pub python_library: Option<String>,
    /// Start of the appended data (the CArchive package).
    pub overlay_pos: u64,
    pub overlay_size: u64,
    pub toc_pos: u64,
    pub toc_length: u64,
}

impl Cookie {
    /// Resolve a raw cookie found at `position` in a file of `file_size` bytes.
    pub fn resolve(raw: RawCookie, position: u64, file_size: u64) -> Result<Self> {
        let python = PythonVersion::from_encoded(raw.python_version)?;

        let tail_bytes = file_size
            .checked_sub(position)
            .and_then(|n| n.checked_sub(raw.version.size() as u64))
            .ok_or_else(|| Error::InvalidCookie("cookie extends past end of file".to_string()))?;

        let overlay_size = raw.package_length + tail_bytes;
        let overlay_pos = file_size.checked_sub(overlay_size).ok_or_else(|| {
            Error::InvalidCookie(format!(
                "package length {} exceeds file size {}",
                raw.package_length, file_size
            ))
        })?;

        let toc_pos = overlay_pos + raw.toc_offset;
        if toc_pos
            .checked_add(raw.toc_length)
            .is_none_or(|end| end > file_size)
        {
            return Err(Error::InvalidCookie(format!(
                "table of contents at {toc_pos} (+{}) is outside the file",
                raw.toc_length
            )));
        }

        Ok(Self {
            version: raw.version,
            position,
            package_length: raw.package_length,
            python,
            python_library: raw.python_library,
            overlay_pos,
            overlay_size,
            toc_pos,
            toc_length: raw.toc_length,
        })
    }
}

/// Kind of data a TOC entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    /// `d`: reference to a dependency in another archive
    Dependency,
    /// `o`: interpreter runtime option
    RuntimeOption,
    /// `s`: script run at startup
    PySource,
    /// `M`: package `__init__`
    PyPackage,
    /// `m`: module
    PyModule,
    /// `z`: zlib PYZ archive
    Pyz,
    /// `Z`: uncompressed zipfile of modules
    ZipFile,
    /// `b`: shared library or other binary
    Binary,
    /// `x`: data file
    Data,
    /// `l`: splash screen resources
    Splash,
    /// `n`: symbolic link
    Symlink,
    Unknown(u8),
}

impl TypeTag {
    pub fn from_u8(value: u8) -> Self {
        match value {
            b'd' => TypeTag::Dependency,
            b'o' => TypeTag::RuntimeOption,
            b's' => TypeTag::PySource,
            b'M' => TypeTag::PyPackage,
            b'm' => TypeTag::PyModule,
            b'z' => TypeTag::Pyz,
            b'Z' => TypeTag::ZipFile,
            b'b' => TypeTag::Binary,
            b'x' => TypeTag::Data,
            b'l' => TypeTag::Splash,
            b'n' => TypeTag::Symlink,
            other => TypeTag::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            TypeTag::Dependency => b'd',
            TypeTag::RuntimeOption => b'o',
            TypeTag::PySource => b's',
            TypeTag::PyPackage => b'M',
            TypeTag::PyModule => b'm',
            TypeTag::Pyz => b'z',
            TypeTag::ZipFile => b'Z',
            TypeTag::Binary => b'b',
            TypeTag::Data => b'x',
            TypeTag::Splash => b'l',
            TypeTag::Symlink => b'n',
            TypeTag::Unknown(v) => *v,
        }
    }

    /// Human readable label used by the verbose listing.
    pub fn label(&self) -> &'static str {
        match self {
            TypeTag::Dependency => "dependency",
            TypeTag::RuntimeOption => "option",
            TypeTag::PySource => "script",
            TypeTag::PyPackage => "package",
            TypeTag::PyModule => "module",
            TypeTag::Pyz => "pyz",
            TypeTag::ZipFile => "zipfile",
            TypeTag::Binary => "binary",
            TypeTag::Data => "data",
            TypeTag::Splash => "splash",
            TypeTag::Symlink => "symlink",
            TypeTag::Unknown(_) => "unknown",
        }
    }
}

/// One decoded table of contents record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    /// Absolute offset of the entry data in the file.
    pub position: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub is_compressed: bool,
    pub type_tag: TypeTag,
    /// Sanitized relative name.
    pub name: String,
}
