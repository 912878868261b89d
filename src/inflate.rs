use flate2::read::ZlibDecoder;
use std::io::{self, Read};

const MAX_PREALLOC: u64 = 64 * 1024 * 1024;
/// How far past its recorded size an entry may inflate.
const MAX_RATIO: u64 = 4;
const MIN_LIMIT: u64 = 1024 * 1024;
/// Ceiling for streams without a recorded size (PYZ members).
const UNSIZED_LIMIT: u64 = 256 * 1024 * 1024;

/// Inflate a zlib stream.
///
/// `size_hint` is the size recorded in the archive, or 0 when there is none.
/// It pre-sizes the output buffer and bounds how much output is accepted;
/// a stream producing more than that fails with `InvalidData`.
pub(crate) fn inflate(data: &[u8], size_hint: u64) -> io::Result<Vec<u8>> {
    inflate_bounded(data, size_hint, output_limit(size_hint))
}

fn output_limit(size_hint: u64) -> u64 {
    if size_hint == 0 {
        UNSIZED_LIMIT
    } else {
        size_hint.saturating_mul(MAX_RATIO).max(MIN_LIMIT)
    }
}

fn inflate_bounded(data: &[u8], size_hint: u64, limit: u64) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size_hint.min(MAX_PREALLOC).min(limit) as usize);
    ZlibDecoder::new(data)
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)?;

    if out.len() as u64 > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("stream inflates past {limit} bytes"),
        ));
    }
    Ok(out)
}
