#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]
//! Bytegraph core: disassembler, control-flow graph editor and assembler for
//! stack-based VM bytecode.
//!
//! The flow is:
//!
//! ```text
//! CodeUnit ──Disassembler──▶ Graph ──(edits)──▶ Assembler ──▶ CodeUnit
//! ```
//!
//! - [`isa`] describes the target VM: opcodes, operand categories, stack
//!   effects and the byte layout of an instruction.
//! - [`Instruction`] is one validated operation with an [`Operand`].
//! - [`Graph`] holds [`Block`]s addressed by [`Label`]s.
//! - [`Disassembler`] and [`Assembler`] convert between the two forms.

extern crate alloc;

// Re-export for convenience so other modules don't need alloc:: prefix
#[allow(unused_imports)]
pub(crate) use alloc::{boxed::Box, format, string::String, string::ToString, vec, vec::Vec};

pub mod asm;
pub mod codec;
pub mod disasm;
pub mod dump;
pub mod errors;
pub mod graph;
pub mod instruction;
pub mod isa;
pub mod operand;

pub use asm::{Assembler, AssemblerOptions};
pub use codec::{CodeMeta, CodeUnit, ExceptionTableEntry};
pub use disasm::{Disassembler, Disassembly};
pub use dump::GraphDump;
pub use errors::{Error, Result};
pub use graph::{Block, BlockItem, BlockRef, Graph, Label, TryBegin, TryEnd, TryId};
pub use instruction::{Instruction, Location};
pub use isa::{
    CodeFormat, InstructionSet, OpcodeDescriptor, OpcodeFlags, OperandCategory, PrePostEffect,
    StackEffect,
};
pub use operand::{Compare, Literal, Operand, VarKind, VariableRef};
