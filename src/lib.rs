//! Bytegraph - assembler, disassembler and control-flow graph editor for
//! stack-VM bytecode
//!
//! # Overview
//!
//! Bytegraph turns the flat instruction bytes of a stack-based VM into a graph
//! of basic blocks, lets you edit that graph, and lowers it back into bytes.
//! Typical uses:
//!
//! - Peephole optimizers and code rewriters
//! - Instrumentation (inserting calls before selected instructions)
//! - Inspecting what a compiler emitted
//!
//! # Quick Start
//!
//! ```
//! use bytegraph::{Assembler, Disassembler, InstructionSet};
//! use bytegraph::{CodeMeta, Graph, Instruction, Literal, Operand};
//!
//! let isa = InstructionSet::cpython35();
//!
//! let mut graph = Graph::new();
//! graph.add_block(vec![
//!     Instruction::new(&isa, "LOAD_CONST", Literal::Int(42)).unwrap().into(),
//!     Instruction::new(&isa, "RETURN_VALUE", Operand::None).unwrap().into(),
//! ]);
//!
//! let unit = Assembler::new(&isa).assemble(&graph, &CodeMeta::default()).unwrap();
//! assert_eq!(unit.code, vec![100, 0, 0, 83]);
//!
//! let decoded = Disassembler::new(&isa).disassemble(&unit).unwrap();
//! assert_eq!(decoded.graph.len(), 1);
//! ```
//!
//! # Instruction sets
//!
//! Two descriptions ship with the crate:
//!
//! 1. [`InstructionSet::cpython35`]: variable-width instructions, 16-bit
//!    operands, absolute and byte-relative jumps.
//! 2. [`InstructionSet::wordcode`]: fixed two-byte instructions, relative
//!    jumps counted in instructions, and an exception table.
//!
//! Custom sets are built with [`InstructionSet::builder`].

// Re-export public API from bytegraph_core
pub use bytegraph_core::{
    Assembler, AssemblerOptions, Disassembler, Disassembly, Error, GraphDump, Result,
};

// Re-export the data model
pub use bytegraph_core::{
    Block, BlockItem, BlockRef, CodeFormat, CodeMeta, CodeUnit, Compare, ExceptionTableEntry,
    Graph, Instruction, InstructionSet, Label, Literal, Location, OpcodeDescriptor, OpcodeFlags,
    Operand, OperandCategory, PrePostEffect, StackEffect, TryBegin, TryEnd, TryId, VarKind,
    VariableRef,
};

// Re-export modules for lower-level access
pub use bytegraph_core::{codec, graph, isa};
