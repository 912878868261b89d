//! Name handling for archive entries.
//!
//! Names stored in a CArchive or PYZ are attacker controlled. They are cleaned
//! twice: once when the table of contents is decoded and again when a name is
//! turned into a filesystem path, so a path never leaves the extraction root.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// A fresh name for an entry whose stored name is unusable.
pub fn unique_name() -> String {
    Uuid::new_v4().to_string()
}

/// Decode a NUL-padded TOC name.
///
/// Invalid UTF-8 and names that are empty after stripping padding and leading
/// separators are replaced with a [`unique_name`].
pub fn decode_toc_name(raw: &[u8]) -> String {
    let decoded = match std::str::from_utf8(raw) {
        Ok(name) => name,
        Err(e) => {
            let name = unique_name();
            tracing::warn!(
                "undecodable name in CArchive ({}), using random name {}",
                e,
                name
            );
            return name;
        }
    };

    let name = decoded
        .trim_end_matches('\0')
        .trim_start_matches(['/', '\\']);

    if name.is_empty() {
        let name = unique_name();
        tracing::warn!("found an unnamed file in CArchive, using random name {}", name);
        return name;
    }

    name.to_string()
}

/// Map a stored entry name to a path under `root`.
///
/// Both slash styles are treated as separators and every `..` is rewritten to
/// `__`. Empty and `.` segments are dropped, so the result is always relative
/// to `root`.
pub fn entry_path(root: &Path, name: &str) -> PathBuf {
    let cleaned = name.replace("..", "__");
    let mut path = root.to_path_buf();
    for segment in cleaned.split(['/', '\\']) {
        if segment.is_empty() || segment == "." || (cfg!(windows) && segment.contains(':')) {
            continue;
        }
        path.push(segment);
    }
    path
}

/// Map a dotted module name from a PYZ table to a path under `root`.
///
/// Packages land in `<pkg>/__init__.pyc`, plain modules in `<pkg>/<mod>.pyc`.
pub fn module_path(root: &Path, module: &str, is_package: bool) -> PathBuf {
    let relative = module.replace("..", "__").replace('.', "/");
    let base = entry_path(root, &relative);
    if is_package {
        base.join("__init__.pyc")
    } else {
        append_extension(&base, "pyc")
    }
}

/// [`module_path`] for a module name that is not valid UTF-8.
///
/// On Unix the raw bytes become the path as they are. Elsewhere paths must be
/// Unicode, so invalid sequences are replaced.
pub fn raw_module_path(root: &Path, module: &[u8], is_package: bool) -> PathBuf {
    #[cfg(unix)]
    {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let cleaned = replace_parent_refs(module);
        let mut base = root.to_path_buf();
        for segment in cleaned.split(|b| matches!(*b, b'.' | b'/' | b'\\')) {
            if !segment.is_empty() {
                base.push(OsStr::from_bytes(segment));
            }
        }
        if is_package {
            base.join("__init__.pyc")
        } else {
            append_extension(&base, "pyc")
        }
    }

    #[cfg(not(unix))]
    {
        module_path(root, &String::from_utf8_lossy(module), is_package)
    }
}

/// Byte-level `..` to `__` rewrite, scanning left to right like `str::replace`.
#[cfg(unix)]
fn replace_parent_refs(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut rest = raw;
    while !rest.is_empty() {
        if rest.starts_with(b"..") {
            out.extend_from_slice(b"__");
            rest = &rest[2..];
        } else {
            out.push(rest[0]);
            rest = &rest[1..];
        }
    }
    out
}

/// Append `.ext` to a path without replacing an existing extension.
pub fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Component;

    fn root() -> &'static Path {
        Path::new("/tmp/out")
    }

    #[test]
    fn traversal_is_confined_to_root() {
        let path = entry_path(root(), "../../etc/passwd");
        assert!(path.starts_with(root()));
        assert!(!path.components().any(|c| c == Component::ParentDir));
        assert_eq!(path, root().join("__").join("__").join("etc").join("passwd"));
    }

    #[test]
    fn absolute_and_backslash_names_are_relative() {
        assert_eq!(
            entry_path(root(), "/abs/file.txt"),
            root().join("abs").join("file.txt")
        );
        assert_eq!(
            entry_path(root(), "dir\\sub\\lib.dll"),
            root().join("dir").join("sub").join("lib.dll")
        );
        assert_eq!(entry_path(root(), "./a//b"), root().join("a").join("b"));
    }

    #[test]
    fn toc_names_strip_padding_and_leading_separator() {
        assert_eq!(decode_toc_name(b"/main\0\0\0"), "main");
        assert_eq!(decode_toc_name(b"lib/x.so\0"), "lib/x.so");
    }

    #[test]
    fn unusable_toc_names_get_distinct_random_names() {
        let a = decode_toc_name(b"\0\0\0\0");
        let b = decode_toc_name(b"\0\0\0\0");
        let c = decode_toc_name(&[0xff, 0xfe, 0x00]);
        let d = decode_toc_name(&[0xff, 0xfe, 0x00]);
        assert!(!a.is_empty());
        assert_ne!(a, b);
        assert_ne!(c, d);
        assert!(Uuid::parse_str(&c).is_ok());
    }

    #[test]
    fn module_paths_follow_package_layout() {
        assert_eq!(
            module_path(root(), "pkg.sub", true),
            root().join("pkg").join("sub").join("__init__.pyc")
        );
        assert_eq!(
            module_path(root(), "pkg.sub", false),
            root().join("pkg").join("sub.pyc")
        );
        let sneaky = module_path(root(), "..evil", false);
        assert!(sneaky.starts_with(root()));
        assert!(!sneaky.components().any(|c| c == Component::ParentDir));
    }

    #[cfg(unix)]
    #[test]
    fn undecodable_module_names_keep_their_bytes() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        assert_eq!(
            raw_module_path(root(), b"pkg.caf\xe9", false),
            root().join("pkg").join(OsStr::from_bytes(b"caf\xe9.pyc"))
        );
        assert_eq!(
            raw_module_path(root(), b"pkg.\xff", true),
            root()
                .join("pkg")
                .join(OsStr::from_bytes(b"\xff"))
                .join("__init__.pyc")
        );

        let sneaky = raw_module_path(root(), b"..\xff/../x", false);
        assert!(sneaky.starts_with(root()));
        assert!(!sneaky.components().any(|c| c == Component::ParentDir));
        assert_eq!(sneaky, root().join(OsStr::from_bytes(b"__\xff")).join("__").join("x.pyc"));
    }
}
