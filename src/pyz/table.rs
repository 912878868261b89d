//! PYZ member table decoding.
//!
//! PyInstaller stores the member table with Python's `marshal` module. Only
//! the shapes PyInstaller itself writes are accepted:
//!
//! - a list of `(name, (ispkg, offset, length))` tuples (PyInstaller 3.1+)
//! - a dict `{name: (ispkg, offset, length)}` (older releases)
//!
//! where `name` is a `str` or `bytes` and the three values are integers. The
//! decoder understands just the marshal types needed for that (ints, longs,
//! strings, bytes, tuples, lists, dicts, `None`, booleans and back references)
//! and rejects everything else with [`Error::UnsupportedTable`]. Code objects,
//! floats, sets and other marshal types are never expected here.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::carchive::PythonVersion;
use crate::error::{Error, Result};

/// Oldest interpreter whose member table this decoder understands.
pub const MIN_SUPPORTED: PythonVersion = PythonVersion::new(2, 7);
/// Newest interpreter whose member table this decoder understands.
pub const MAX_SUPPORTED: PythonVersion = PythonVersion::new(3, 13);

const FLAG_REF: u8 = 0x80;
const MAX_DEPTH: usize = 16;
/// 15-bit digits of a marshal long; four of them fit an i64.
const MAX_LONG_DIGITS: usize = 4;
/// Decoded size allowed per input byte. Back references can repeat a large
/// object many times, so the decoded table is bounded by its input length.
const MAX_EXPANSION: usize = 8;
const MIN_BUDGET: usize = 1024;

/// Whether tables written by `python` can be decoded.
pub fn supports(python: PythonVersion) -> bool {
    (MIN_SUPPORTED..=MAX_SUPPORTED).contains(&python)
}

/// Name of a PYZ member as stored in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberName {
    Text(String),
    Bytes(Vec<u8>),
}

impl MemberName {
    /// Dotted module name for display. Undecodable bytes are replaced.
    pub fn to_module_name(&self) -> String {
        match self {
            MemberName::Text(name) => name.clone(),
            MemberName::Bytes(raw) => String::from_utf8_lossy(raw).into_owned(),
        }
    }

    /// The name as text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MemberName::Text(name) => Some(name),
            MemberName::Bytes(raw) => std::str::from_utf8(raw).ok(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MemberName::Text(name) => name.as_bytes(),
            MemberName::Bytes(raw) => raw,
        }
    }
}

/// One row of the member table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyzMember {
    pub name: MemberName,
    pub is_package: bool,
    /// Offset of the compressed member within the PYZ file.
    pub offset: u64,
    pub length: u64,
}

/// Decode the member table starting at the beginning of `data`.
pub fn parse_table(data: &[u8]) -> Result<Vec<PyzMember>> {
    let value = Decoder::new(data).read_object()?;

    let rows = match value {
        Value::Seq(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Seq(pair) => match <[Value; 2]>::try_from(pair) {
                    Ok([key, entry]) => Ok((key, entry)),
                    Err(pair) => Err(unsupported(format!(
                        "table row with {} fields",
                        pair.len()
                    ))),
                },
                other => Err(unsupported(format!("table row of type {}", other.kind()))),
            })
            .collect::<Result<Vec<_>>>()?,
        Value::Dict(pairs) => pairs,
        other => return Err(unsupported(format!("table of type {}", other.kind()))),
    };

    rows.into_iter()
        .map(|(key, entry)| member_from(key, entry))
        .collect()
}

fn member_from(key: Value, entry: Value) -> Result<PyzMember> {
    let name = match key {
        Value::Text(name) => MemberName::Text(name),
        Value::Bytes(raw) => MemberName::Bytes(raw),
        other => return Err(unsupported(format!("member name of type {}", other.kind()))),
    };

    let fields = match entry {
        Value::Seq(fields) if fields.len() == 3 => fields,
        other => {
            return Err(unsupported(format!(
                "member entry for {:?} of type {}",
                name.to_module_name(),
                other.kind()
            )));
        }
    };

    let [is_package, offset, length] = [&fields[0], &fields[1], &fields[2]].map(Value::as_int);
    let (Some(is_package), Some(offset), Some(length)) = (is_package, offset, length) else {
        return Err(unsupported(format!(
            "non-integer fields for member {:?}",
            name.to_module_name()
        )));
    };

    let non_negative = |value: i64, field: &str| {
        u64::try_from(value).map_err(|_| {
            unsupported(format!(
                "negative {field} {value} for member {:?}",
                name.to_module_name()
            ))
        })
    };

    Ok(PyzMember {
        is_package: is_package == 1,
        offset: non_negative(offset, "offset")?,
        length: non_negative(length, "length")?,
        name,
    })
}

fn unsupported(reason: String) -> Error {
    Error::UnsupportedTable(reason)
}

#[derive(Debug, Clone)]
enum Value {
    None,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    /// Tuple or list
    Seq(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

impl Value {
    fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Weight of this node alone, without its children.
    fn own_weight(&self) -> usize {
        match self {
            Value::Text(text) => text.len() + 1,
            Value::Bytes(raw) => raw.len() + 1,
            _ => 1,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Text(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Seq(_) => "sequence",
            Value::Dict(_) => "dict",
        }
    }
}

/// A decoded object and its weight: one per node plus the length of every
/// string, counting the copies that back references produce.
type Weighted = (Value, usize);

struct Decoder<'a> {
    cursor: Cursor<&'a [u8]>,
    /// Objects flagged with `FLAG_REF`, addressed by `r`.
    refs: Vec<Weighted>,
    /// Python 2 interned strings, addressed by `R`.
    interned: Vec<Weighted>,
    depth: usize,
    weight: usize,
    budget: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            refs: Vec::new(),
            interned: Vec::new(),
            depth: 0,
            weight: 0,
            budget: data.len().saturating_mul(MAX_EXPANSION).max(MIN_BUDGET),
        }
    }

    fn charge(&mut self, weight: usize) -> Result<()> {
        self.weight = self.weight.saturating_add(weight);
        if self.weight > self.budget {
            return Err(unsupported(format!(
                "table expands past {} decoded values",
                self.budget
            )));
        }
        Ok(())
    }

    fn remaining(&self) -> usize {
        let data = self.cursor.get_ref();
        data.len().saturating_sub(self.cursor.position() as usize)
    }

    fn read_object(&mut self) -> Result<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(unsupported("table nested too deeply".to_string()));
        }
        self.depth += 1;
        let value = self.read_object_inner();
        self.depth -= 1;
        value
    }

    fn read_object_inner(&mut self) -> Result<Value> {
        let code = self.read_u8()?;
        let kind = code & !FLAG_REF;
        let start = self.weight;

        // References are numbered in the order objects start, so containers
        // take their slot before their children do.
        let slot = if code & FLAG_REF != 0 {
            self.refs.push((Value::None, 0));
            Some(self.refs.len() - 1)
        } else {
            None
        };

        let value = match kind {
            b'N' => Value::None,
            b'T' => Value::Bool(true),
            b'F' => Value::Bool(false),
            b'i' => Value::Int(self.read_i32()? as i64),
            b'I' => Value::Int(self.cursor.read_i64::<LittleEndian>().map_err(truncated)?),
            b'l' => Value::Int(self.read_long()?),
            b's' => Value::Bytes(self.read_sized(false)?),
            b't' => {
                let value = text_or_bytes(self.read_sized(false)?);
                self.interned.push((value.clone(), value.own_weight()));
                value
            }
            b'u' | b'a' | b'A' => Value::Text(self.read_text(false)?),
            b'z' | b'Z' => Value::Text(self.read_text(true)?),
            b'R' => {
                let index = self.read_index()?;
                let (value, weight) = self
                    .interned
                    .get(index)
                    .cloned()
                    .ok_or_else(|| unsupported(format!("bad string reference {index}")))?;
                self.charge(weight)?;
                value
            }
            b'r' => {
                let index = self.read_index()?;
                let weight = self
                    .refs
                    .get(index)
                    .map(|(_, weight)| *weight)
                    .ok_or_else(|| unsupported(format!("bad object reference {index}")))?;
                self.charge(weight)?;
                self.refs[index].0.clone()
            }
            b'(' | b'[' => {
                let len = self.read_count()?;
                Value::Seq(self.read_items(len)?)
            }
            b')' => {
                let len = self.read_u8()? as usize;
                Value::Seq(self.read_items(len)?)
            }
            b'{' => Value::Dict(self.read_dict()?),
            b'0' => return Err(unsupported("unexpected NULL object".to_string())),
            other => {
                return Err(unsupported(format!(
                    "marshal type {:?} (0x{:02x})",
                    other as char, other
                )));
            }
        };

        // Resolved references were charged in full above.
        if !matches!(kind, b'R' | b'r') {
            self.charge(value.own_weight())?;
        }

        if let Some(slot) = slot {
            self.refs[slot] = (value.clone(), self.weight - start);
        }
        Ok(value)
    }

    fn read_items(&mut self, len: usize) -> Result<Vec<Value>> {
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_object()?);
        }
        Ok(items)
    }

    fn read_dict(&mut self) -> Result<Vec<(Value, Value)>> {
        let mut pairs = Vec::new();
        loop {
            let position = self.cursor.position();
            if self.read_u8()? == b'0' {
                return Ok(pairs);
            }
            self.cursor.set_position(position);
            let key = self.read_object()?;
            let value = self.read_object()?;
            pairs.push((key, value));
        }
    }

    fn read_long(&mut self) -> Result<i64> {
        let n = self.read_i32()?;
        let digits = n.unsigned_abs() as usize;
        if digits > MAX_LONG_DIGITS {
            return Err(unsupported(format!("integer with {digits} digits")));
        }
        let mut value: i64 = 0;
        for i in 0..digits {
            let digit = self.cursor.read_u16::<LittleEndian>().map_err(truncated)?;
            if digit >= 1 << 15 {
                return Err(unsupported(format!("bad long digit {digit}")));
            }
            value |= (digit as i64) << (15 * i);
        }
        Ok(if n < 0 { -value } else { value })
    }

    fn read_text(&mut self, short: bool) -> Result<String> {
        let raw = self.read_sized(short)?;
        String::from_utf8(raw).map_err(|e| unsupported(format!("invalid string: {e}")))
    }

    fn read_sized(&mut self, short: bool) -> Result<Vec<u8>> {
        let len = if short {
            self.read_u8()? as usize
        } else {
            self.read_count()?
        };
        let mut buf = vec![0u8; len];
        self.cursor.read_exact(&mut buf).map_err(truncated)?;
        Ok(buf)
    }

    /// A length prefix, bounded by the bytes left so corrupt input cannot
    /// request huge allocations.
    fn read_count(&mut self) -> Result<usize> {
        let n = self.read_i32()?;
        let n = usize::try_from(n).map_err(|_| unsupported(format!("negative length {n}")))?;
        if n > self.remaining() {
            return Err(unsupported(format!(
                "length {n} exceeds the {} bytes left",
                self.remaining()
            )));
        }
        Ok(n)
    }

    fn read_index(&mut self) -> Result<usize> {
        let n = self.read_i32()?;
        usize::try_from(n).map_err(|_| unsupported(format!("negative reference {n}")))
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.cursor.read_i32::<LittleEndian>().map_err(truncated)
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(truncated)
    }
}

fn text_or_bytes(raw: Vec<u8>) -> Value {
    match String::from_utf8(raw) {
        Ok(text) => Value::Text(text),
        Err(e) => Value::Bytes(e.into_bytes()),
    }
}

fn truncated(_: std::io::Error) -> Error {
    unsupported("table is truncated".to_string())
}
