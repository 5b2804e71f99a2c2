//! Exception table: offset ranges mapped to handlers.
//!
//! Each entry is four varints: range start, range length, handler target and
//! `depth << 1 | lasti`. Offsets are counted in jump units. A varint is a
//! big-endian sequence of 6-bit groups; every byte but the last carries
//! `0x40`, and the first byte of an entry carries `0x80`.
//!
//! ```text
//!   1 s s s s s s       start byte (0x80 marker)
//!   0 1 v v v v v v     continued group
//!   0 0 v v v v v v     last group
//! ```

use smallvec::SmallVec;

use crate::errors::{Error, Result};
use crate::{Vec, format};

const START_MARKER: u8 = 0x80;
const CONTINUE: u8 = 0x40;
const GROUP_MASK: u8 = 0x3f;

/// One protected range. Offsets are in bytes; `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionTableEntry {
    pub start: usize,
    pub end: usize,
    pub target: usize,
    pub depth: u32,
    pub lasti: bool,
}

fn write_varint(out: &mut Vec<u8>, mut value: u32, start: bool) {
    let mut groups: SmallVec<[u8; 6]> = SmallVec::new();
    loop {
        groups.push(value as u8 & GROUP_MASK);
        value >>= 6;
        if value == 0 {
            break;
        }
    }
    let last = groups.len() - 1;
    for (i, group) in groups.iter().rev().enumerate() {
        let mut byte = *group;
        if i != last {
            byte |= CONTINUE;
        }
        if i == 0 && start {
            byte |= START_MARKER;
        }
        out.push(byte);
    }
}

fn units(offset: usize, unit: u32, what: &str) -> Result<u32> {
    let unit = unit as usize;
    if offset % unit != 0 {
        return Err(Error::malformed(
            offset,
            format!("exception {what} is not aligned to the jump unit"),
        ));
    }
    u32::try_from(offset / unit)
        .map_err(|_| Error::malformed(offset, format!("exception {what} is too large")))
}

/// Encodes `entries`; offsets must be multiples of `unit`.
pub fn encode_exception_table(entries: &[ExceptionTableEntry], unit: u32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for entry in entries {
        if entry.end <= entry.start {
            return Err(Error::malformed(entry.start, "empty exception range"));
        }
        write_varint(&mut out, units(entry.start, unit, "start")?, true);
        write_varint(&mut out, units(entry.end - entry.start, unit, "length")?, false);
        write_varint(&mut out, units(entry.target, unit, "target")?, false);
        write_varint(&mut out, entry.depth << 1 | entry.lasti as u32, false);
    }
    tracing::trace!(entries = entries.len(), "encoded exception table");
    Ok(out)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn varint(&mut self, start: bool) -> Result<u32> {
        let mut value: u32 = 0;
        let mut first = true;
        loop {
            let Some(&byte) = self.bytes.get(self.pos) else {
                return Err(Error::malformed(self.pos, "truncated exception table entry"));
            };
            if first && start && byte & START_MARKER == 0 {
                return Err(Error::malformed(
                    self.pos,
                    "exception table entry lacks its start marker",
                ));
            }
            if !first && byte & START_MARKER != 0 {
                return Err(Error::malformed(
                    self.pos,
                    "start marker inside an exception table varint",
                ));
            }
            self.pos += 1;
            value = value
                .checked_mul(64)
                .map(|v| v | (byte & GROUP_MASK) as u32)
                .ok_or_else(|| Error::malformed(self.pos, "exception table varint overflows"))?;
            if byte & CONTINUE == 0 {
                return Ok(value);
            }
            first = false;
        }
    }
}

/// Decodes an exception table, converting offsets back to bytes.
pub fn decode_exception_table(table: &[u8], unit: u32) -> Result<Vec<ExceptionTableEntry>> {
    let unit = unit as usize;
    let mut reader = Reader {
        bytes: table,
        pos: 0,
    };
    let mut entries = Vec::new();
    while reader.pos < table.len() {
        let start = reader.varint(true)? as usize * unit;
        let length = reader.varint(false)? as usize * unit;
        let target = reader.varint(false)? as usize * unit;
        let depth_lasti = reader.varint(false)?;
        entries.push(ExceptionTableEntry {
            start,
            end: start + length,
            target,
            depth: depth_lasti >> 1,
            lasti: depth_lasti & 1 != 0,
        });
    }
    Ok(entries)
}
