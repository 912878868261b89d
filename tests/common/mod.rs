//! Builders for synthetic PyInstaller images.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MAGIC: &[u8; 8] = b"MEI\x0c\x0b\x0a\x0b\x0e";
pub const PYC_MAGIC_38: [u8; 4] = [0x55, 0x0d, 0x0d, 0x0a];

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// One TOC entry to put into a synthetic CArchive.
pub struct Entry {
    pub name: Vec<u8>,
    pub tag: u8,
    pub data: Vec<u8>,
    pub compress: bool,
    /// Overrides what gets stored (e.g. a corrupt zlib stream).
    pub stored: Option<Vec<u8>>,
    pub uncompressed_size: Option<u32>,
}

impl Entry {
    pub fn new(name: &str, tag: u8, data: &[u8]) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
            tag,
            data: data.to_vec(),
            compress: true,
            stored: None,
            uncompressed_size: None,
        }
    }

    pub fn raw_name(mut self, name: &[u8]) -> Self {
        self.name = name.to_vec();
        self
    }

    pub fn uncompressed(mut self) -> Self {
        self.compress = false;
        self
    }

    pub fn corrupt(mut self) -> Self {
        self.stored = Some(b"this is not a zlib stream".to_vec());
        self
    }

    pub fn claimed_size(mut self, size: u32) -> Self {
        self.uncompressed_size = Some(size);
        self
    }
}

/// Builds `prefix | entries | TOC | cookie | trailer`.
pub struct ArchiveBuilder {
    pub prefix: Vec<u8>,
    pub trailer: Vec<u8>,
    pub python: i32,
    pub modern: bool,
    pub entries: Vec<Entry>,
}

impl ArchiveBuilder {
    pub fn new(python: i32) -> Self {
        Self {
            prefix: b"MZ fake bootloader \x00\x01\x02".repeat(40),
            trailer: Vec::new(),
            python,
            modern: true,
            entries: Vec::new(),
        }
    }

    pub fn legacy(mut self) -> Self {
        self.modern = false;
        self
    }

    pub fn prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    pub fn trailer(mut self, trailer: &[u8]) -> Self {
        self.trailer = trailer.to_vec();
        self
    }

    pub fn entry(mut self, entry: Entry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut package = Vec::new();
        let mut records = Vec::new();

        for entry in &self.entries {
            let stored = match (&entry.stored, entry.compress) {
                (Some(stored), _) => stored.clone(),
                (None, true) => zlib(&entry.data),
                (None, false) => entry.data.clone(),
            };
            let offset = package.len() as u32;
            package.extend_from_slice(&stored);

            // names are NUL-padded to a multiple of 16
            let mut name = entry.name.clone();
            name.push(0);
            while name.len() % 16 != 0 {
                name.push(0);
            }

            let mut record = Vec::new();
            record.extend_from_slice(&((18 + name.len()) as i32).to_be_bytes());
            record.extend_from_slice(&offset.to_be_bytes());
            record.extend_from_slice(&(stored.len() as u32).to_be_bytes());
            let size = entry.uncompressed_size.unwrap_or(entry.data.len() as u32);
            record.extend_from_slice(&size.to_be_bytes());
            record.push(entry.compress as u8);
            record.push(entry.tag);
            record.extend_from_slice(&name);
            records.push(record);
        }

        let toc_offset = package.len() as u32;
        for record in &records {
            package.extend_from_slice(record);
        }
        let toc_length = package.len() as u32 - toc_offset;

        let cookie_size = if self.modern { 88 } else { 24 };
        let package_length = (package.len() + cookie_size) as u32;

        let mut file = self.prefix.clone();
        file.extend_from_slice(&package);
        file.extend_from_slice(MAGIC);
        file.extend_from_slice(&package_length.to_be_bytes());
        file.extend_from_slice(&toc_offset.to_be_bytes());
        file.extend_from_slice(&(toc_length as i32).to_be_bytes());
        file.extend_from_slice(&self.python.to_be_bytes());
        if self.modern {
            let mut lib = [0u8; 64];
            let name = format!("python{}.dll", self.python);
            lib[..name.len()].copy_from_slice(name.as_bytes());
            file.extend_from_slice(&lib);
        }
        file.extend_from_slice(&self.trailer);
        file
    }

    pub fn write_to(&self, dir: &Path) -> PathBuf {
        let path = dir.join("app.exe");
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}

/// One member of a synthetic PYZ archive.
pub struct Member {
    pub name: String,
    pub is_package: bool,
    pub data: Vec<u8>,
    pub encrypted: bool,
}

impl Member {
    pub fn module(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            is_package: false,
            data: data.to_vec(),
            encrypted: false,
        }
    }

    pub fn package(name: &str, data: &[u8]) -> Self {
        Self {
            is_package: true,
            ..Self::module(name, data)
        }
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }
}

/// Builds a PYZ archive with a marshal list-of-tuples member table.
pub fn build_pyz(pyc_magic: [u8; 4], members: &[Member]) -> Vec<u8> {
    let mut body = Vec::new();
    let mut rows = Vec::new();
    for member in members {
        let stored = if member.encrypted {
            // an AES-looking blob that is not a zlib stream
            member.data.iter().map(|b| b ^ 0xa5).collect::<Vec<_>>()
        } else {
            zlib(&member.data)
        };
        let offset = 12 + body.len() as i32;
        rows.push((member, offset, stored.len() as i32));
        body.extend_from_slice(&stored);
    }

    let toc_offset = 12 + body.len() as i32;
    let mut table = vec![b'[' | 0x80];
    table.extend_from_slice(&(rows.len() as i32).to_le_bytes());
    for (member, offset, length) in rows {
        table.extend_from_slice(&[b')', 2]);
        table.push(b'u');
        table.extend_from_slice(&(member.name.len() as i32).to_le_bytes());
        table.extend_from_slice(member.name.as_bytes());
        table.extend_from_slice(&[b')', 3]);
        for value in [member.is_package as i32, offset, length] {
            table.push(b'i');
            table.extend_from_slice(&value.to_le_bytes());
        }
    }

    let mut pyz = b"PYZ\0".to_vec();
    pyz.extend_from_slice(&pyc_magic);
    pyz.extend_from_slice(&toc_offset.to_be_bytes());
    pyz.extend_from_slice(&body);
    pyz.extend_from_slice(&table);
    pyz
}

/// A module payload that still carries its `.pyc` header.
pub fn module_with_header(magic: [u8; 4], code: &[u8]) -> Vec<u8> {
    let mut data = magic.to_vec();
    data.extend_from_slice(&[0; 12]);
    data.extend_from_slice(code);
    data
}
