//! Error type shared by every bytegraph operation.
//!
//! All errors are reported synchronously to the caller. None of them are
//! transient: they describe invalid input data or API misuse, so there is no
//! retry story.
//!
//! # Error Categories
//!
//! - **Construction errors** ([`Error::InvalidOperand`], [`Error::OperandArity`],
//!   [`Error::InvalidLocation`]): an instruction was built with bad data.
//! - **Editing errors** ([`Error::InvalidSplitPoint`]): misuse of the graph API.
//! - **Disassembly errors** ([`Error::MalformedEncoding`]): the flat encoding
//!   is not something the VM loader would accept.
//! - **Assembly errors** ([`Error::UnresolvableJump`], [`Error::LayoutDivergence`],
//!   [`Error::UnmatchedTryRegion`]): the graph cannot be lowered.
//! - **Analysis errors** ([`Error::AmbiguousStackEffect`], [`Error::StackUnderflow`],
//!   [`Error::UnboundedStack`]).

use ecow::EcoString;

use crate::String;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The operand does not match the opcode's declared category, or an
    /// integer operand is out of range.
    #[error("invalid operand for {name}: {reason}")]
    InvalidOperand { name: EcoString, reason: String },

    /// The operation name is not part of the instruction set.
    #[error("unknown operation name {0:?}")]
    UnknownOpcode(EcoString),

    /// An operand was given to an opcode that takes none, or omitted for one
    /// that requires it.
    #[error("{name} {}", if *requires { "requires an operand" } else { "takes no operand" })]
    OperandArity { name: EcoString, requires: bool },

    /// Inconsistent source location (end before start, columns without lines, ...).
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    /// `stack_effect(None)` on an instruction whose effect depends on the
    /// branch direction.
    #[error("stack effect of {name} depends on whether the jump is taken")]
    AmbiguousStackEffect { name: EcoString },

    /// `split_block` was called with an index outside `0..len` or on a block
    /// that is not part of the graph.
    #[error("invalid split point: {0}")]
    InvalidSplitPoint(String),

    /// The flat encoding cannot be decoded.
    #[error("malformed encoding at offset {offset}: {reason}")]
    MalformedEncoding { offset: usize, reason: String },

    /// A jump operand cannot be expressed in the target encoding.
    #[error("cannot resolve jump of {name}: {reason}")]
    UnresolvableJump { name: EcoString, reason: String },

    /// The layout loop did not reach a fixed point.
    #[error("layout did not converge after {rounds} rounds")]
    LayoutDivergence { rounds: usize },

    /// A try region marker has no matching partner, or its handler is not in
    /// the graph.
    #[error("unmatched try region: {0}")]
    UnmatchedTryRegion(String),

    /// An instruction would pop more values than the stack holds.
    #[error("stack underflow at {name} in block #{block}: depth {depth}, pops {pops}")]
    StackUnderflow {
        name: EcoString,
        block: usize,
        depth: i64,
        pops: i64,
    },

    /// The stack depth at a block entry keeps growing around a loop.
    #[error("stack depth of block #{block} grows without bound")]
    UnboundedStack { block: usize },

    /// The instruction-set description itself is inconsistent.
    #[error("invalid instruction set description: {0}")]
    InvalidDescription(String),
}

impl Error {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Error::MalformedEncoding {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_operand(name: &EcoString, reason: impl Into<String>) -> Self {
        Error::InvalidOperand {
            name: name.clone(),
            reason: reason.into(),
        }
    }
}
