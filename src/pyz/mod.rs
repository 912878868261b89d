//! PYZ archives: the zlib-compressed module store embedded in a CArchive.
//!
//! ## Layout
//!
//! ```text
//! +--------+-------------+--------------+------------------+--------------+
//! | PYZ\0  | pyc magic   | table offset | zlib'd members   | member table |
//! | 4      | 4           | 4 (BE i32)   | ...              | marshal      |
//! +--------+-------------+--------------+------------------+--------------+
//! ```
//!
//! Members are header-less code objects; each is inflated and written as a
//! `.pyc` with a reconstructed header. Members that do not inflate are usually
//! encrypted and are written as-is with an `.encrypted` suffix.

mod extractor;
mod header;
mod table;

pub use extractor::{PyzExtractor, PyzReport};
pub use header::{PYZ_MAGIC, PyzHeader};
pub use table::{MAX_SUPPORTED, MIN_SUPPORTED, MemberName, PyzMember, parse_table, supports};
