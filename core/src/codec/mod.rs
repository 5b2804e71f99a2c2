//! Flat code units and their side tables.
//!
//! A [`CodeUnit`] is what the VM loader consumes: the instruction bytes, the
//! metadata tables operands index into, a delta-encoded line table and, for
//! instruction sets that use one, an exception table.

pub mod exception_table;
pub mod line_table;

use ecow::EcoString;

use crate::errors::Result;
use crate::isa::InstructionSet;
use crate::operand::Literal;
use crate::Vec;

pub use exception_table::{ExceptionTableEntry, decode_exception_table, encode_exception_table};
pub use line_table::{decode_line_table, encode_line_table};

/// Everything about a code unit except the instruction bytes and side tables.
///
/// The assembler passes these fields through, only appending to the pools
/// when the graph references values they do not contain yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeMeta {
    pub argcount: u32,
    pub kwonlyargcount: u32,
    pub nlocals: u32,
    pub stacksize: u32,
    pub flags: u32,
    /// Literal pool (`co_consts`).
    pub literals: Vec<Literal>,
    /// Global and attribute names.
    pub names: Vec<EcoString>,
    /// Local variable names.
    pub varnames: Vec<EcoString>,
    pub cellvars: Vec<EcoString>,
    pub freevars: Vec<EcoString>,
    pub filename: EcoString,
    pub name: EcoString,
    pub first_line: u32,
}

/// An assembled code unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeUnit {
    pub meta: CodeMeta,
    pub code: Vec<u8>,
    pub line_table: Vec<u8>,
    pub exception_table: Vec<u8>,
}

impl CodeUnit {
    /// Decoded `(offset, line)` pairs where a new line starts.
    pub fn line_starts(&self) -> Result<Vec<(usize, u32)>> {
        decode_line_table(self.meta.first_line, &self.line_table)
    }

    /// Decoded exception table; offsets are in bytes.
    pub fn exception_entries(&self, isa: &InstructionSet) -> Result<Vec<ExceptionTableEntry>> {
        decode_exception_table(&self.exception_table, isa.format().jump_unit)
    }
}
