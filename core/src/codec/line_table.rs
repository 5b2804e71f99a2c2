//! Delta-encoded line table.
//!
//! Each entry is two bytes: an unsigned offset increment and a signed line
//! increment.
//!
//! ```text
//! ┌──────────────┬──────────────┐
//! │ Δoffset (u8) │  Δline (i8)  │
//! └──────────────┴──────────────┘
//! ```
//!
//! Increments that do not fit are spread over several entries. Offset
//! increments above 255 are emitted first as `(255, 0)` entries; line
//! increments outside `-128..=127` put the first chunk in the entry carrying
//! the remaining offset increment, followed by `(0, chunk)` entries.

use crate::errors::{Error, Result};
use crate::{Vec, format};

const MAX_OFFSET_DELTA: usize = u8::MAX as usize;

/// Encodes the line changes in `starts`.
///
/// `starts` holds `(offset, line)` pairs in increasing offset order. Pairs
/// that do not change the current line are skipped, so passing the line of
/// every instruction is fine.
pub fn encode_line_table(first_line: u32, starts: &[(usize, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut last_offset = 0usize;
    let mut last_line = first_line as i64;

    for &(offset, line) in starts {
        let line = line as i64;
        if line == last_line {
            continue;
        }

        let mut offset_delta = offset.saturating_sub(last_offset);
        let mut line_delta = line - last_line;
        last_offset = offset;
        last_line = line;

        while offset_delta > MAX_OFFSET_DELTA {
            out.extend_from_slice(&[MAX_OFFSET_DELTA as u8, 0]);
            offset_delta -= MAX_OFFSET_DELTA;
        }

        let chunk = line_delta.clamp(i8::MIN as i64, i8::MAX as i64);
        out.extend_from_slice(&[offset_delta as u8, chunk as i8 as u8]);
        line_delta -= chunk;

        while line_delta != 0 {
            let chunk = line_delta.clamp(i8::MIN as i64, i8::MAX as i64);
            out.extend_from_slice(&[0, chunk as i8 as u8]);
            line_delta -= chunk;
        }
    }

    tracing::trace!(entries = out.len() / 2, "encoded line table");
    out
}

/// Decodes a line table into `(offset, line)` pairs where a new line starts.
///
/// A line is reported once the offset advances past it, so filler entries
/// never produce a visible line change.
pub fn decode_line_table(first_line: u32, table: &[u8]) -> Result<Vec<(usize, u32)>> {
    if table.len() % 2 != 0 {
        return Err(Error::malformed(
            table.len(),
            "line table has an odd number of bytes",
        ));
    }

    let mut out: Vec<(usize, u32)> = Vec::new();
    let mut last_line: Option<i64> = None;
    let mut line = first_line as i64;
    let mut offset = 0usize;

    let mut push = |offset: usize, line: i64, last_line: &mut Option<i64>| -> Result<()> {
        if *last_line != Some(line) {
            let value = u32::try_from(line).map_err(|_| {
                Error::malformed(offset, format!("line table yields line {line}"))
            })?;
            out.push((offset, value));
            *last_line = Some(line);
        }
        Ok(())
    };

    for entry in table.chunks_exact(2) {
        let offset_delta = entry[0] as usize;
        let line_delta = entry[1] as i8 as i64;
        if offset_delta != 0 {
            push(offset, line, &mut last_line)?;
            offset += offset_delta;
        }
        line += line_delta;
    }
    push(offset, line, &mut last_line)?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_round_trip() {
        let starts = [(0, 1), (6, 2), (10, 4), (20, 3)];
        let table = encode_line_table(1, &starts);
        assert_eq!(table, vec![6, 1, 4, 2, 10, 0xff]);
        assert_eq!(decode_line_table(1, &table).unwrap(), starts.to_vec());
    }

    #[test]
    fn test_unchanged_lines_are_skipped() {
        let starts = [(0, 5), (3, 5), (6, 5), (9, 6)];
        let table = encode_line_table(5, &starts);
        assert_eq!(table, vec![9, 1]);
        assert_eq!(decode_line_table(5, &table).unwrap(), vec![(0, 5), (9, 6)]);
    }

    #[test]
    fn test_large_offset_uses_fillers() {
        let starts = [(0, 1), (600, 2)];
        let table = encode_line_table(1, &starts);
        assert_eq!(table, vec![255, 0, 255, 0, 90, 1]);
        assert_eq!(decode_line_table(1, &table).unwrap(), starts.to_vec());
    }

    #[test]
    fn test_large_line_delta_uses_fillers() {
        let starts = [(0, 1), (4, 301), (8, 2)];
        let table = encode_line_table(1, &starts);
        assert_eq!(
            table,
            vec![4, 127, 0, 127, 0, 46, 4, 0x80, 0, 0x80, 0, 0xd5]
        );
        assert_eq!(decode_line_table(1, &table).unwrap(), starts.to_vec());
    }

    #[test]
    fn test_first_instruction_on_a_later_line() {
        let starts = [(0, 7), (2, 8)];
        let table = encode_line_table(3, &starts);
        assert_eq!(table, vec![0, 4, 2, 1]);
        assert_eq!(decode_line_table(3, &table).unwrap(), starts.to_vec());
    }

    #[test]
    fn test_odd_length_is_malformed() {
        assert!(matches!(
            decode_line_table(1, &[1, 2, 3]),
            Err(Error::MalformedEncoding { .. })
        ));
    }

    #[test]
    fn test_negative_line_is_malformed() {
        assert!(matches!(
            decode_line_table(1, &[0, 0xfe, 2, 0]),
            Err(Error::MalformedEncoding { .. })
        ));
    }
}
