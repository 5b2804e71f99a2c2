//! Instruction-set descriptions.
//!
//! An [`InstructionSet`] is the external contract with the consuming VM: it
//! maps operation names to numeric codes, declares which operand category each
//! opcode takes, classifies jumps explicitly through [`OpcodeFlags`], and
//! carries the stack-effect formulas used by the analysis passes.
//!
//! # Instruction Layout
//!
//! The byte layout of one instruction is described by [`CodeFormat`]:
//!
//! ```text
//! classic:   ┌────────┬──────────────────┐      wordcode: ┌────────┬────────┐
//!            │ opcode │ operand (2, LE)  │                │ opcode │ operand│
//!            └────────┴──────────────────┘                └────────┴────────┘
//!            operand only when the opcode takes one      always 2 bytes
//! ```
//!
//! # Extended Operands
//!
//! Operands wider than one field are split across prefix instructions:
//! ```ignore
//! EXTENDED_ARG(high)   // Supplies the high bits for the next instruction
//! LOAD_CONST(low)      // Combined: (high << operand_bits) | low
//! ```
//!
//! The table is built once and then only read, so it can be shared freely by
//! every graph and instruction that borrows it.

mod cpython35;
mod wordcode;

use core::fmt;

use bitflags::bitflags;
use ecow::EcoString;
use hashbrown::HashMap;

use crate::errors::{Error, Result};
use crate::{Vec, format};

/// The category of operand an opcode accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandCategory {
    /// No operand.
    None,
    /// Raw integer in `0..=2_147_483_647`.
    Int,
    /// Jump whose argument is relative to the end of the instruction.
    JumpRelative,
    /// Jump whose argument is an absolute code position.
    JumpAbsolute,
    /// Index into the literal pool.
    Literal,
    /// Index into the global/attribute name table.
    Name,
    /// `(flag, name)` pair, encoded as `name_index << 1 | flag`.
    FlaggedName,
    /// Index into the local variable table.
    Local,
    /// Index into the cell variables followed by the free variables.
    Free,
    /// Comparison kind.
    Compare,
}

impl OperandCategory {
    pub const fn is_jump(self) -> bool {
        matches!(self, Self::JumpRelative | Self::JumpAbsolute)
    }
}

bitflags! {
    /// Explicit control-flow classification of an opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpcodeFlags: u8 {
        /// Jump taken only under some runtime condition.
        const CONDITIONAL = 1 << 0;
        /// Jump always taken.
        const UNCONDITIONAL = 1 << 1;
        /// Relative jump counting towards lower offsets.
        const BACKWARD = 1 << 2;
        /// Ends normal control flow of a block (return, raise, ...).
        const TERMINAL = 1 << 3;
        /// The extended-operand prefix.
        const EXTENDED_ARG = 1 << 4;
    }
}

/// Net stack effect of an opcode, as a function of its integer argument.
///
/// Stack effect notation in the doc comments: `arg` is the instruction's
/// integer argument (0 for operands that are not plain integers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackEffect {
    /// Same effect regardless of argument or branch.
    Fixed(i32),
    /// Jump whose effect differs between the taken and fall-through paths.
    Branch { taken: i32, not_taken: i32 },
    /// `base + scale * arg`
    Linear { base: i32, scale: i32 },
    /// `base - (arg & 0xff) - 2 * ((arg >> 8) & 0xff)`: positional and keyword counts.
    CallArgs { base: i32 },
    /// `base - (arg & 0xff) - 2 * ((arg >> 8) & 0xff) - ((arg >> 16) & 0x7fff)`
    MakeFunction { base: i32 },
    /// `base - popcount(arg & 0x0f)`: one extra pop per flag bit.
    MakeFunctionFlags { base: i32 },
    /// `base - (arg & 0xff)`
    LowByteCount { base: i32 },
    /// `(arg & 0xff) + (arg >> 8)`
    UnpackEx,
    /// `-2` for a three-item slice, `-1` otherwise.
    BuildSlice,
    /// `-1` when a format spec is present (`arg & 0x04`), `0` otherwise.
    FormatValue,
}

impl StackEffect {
    /// Returns `(taken, not_taken)` effects for `arg`.
    pub fn eval(&self, arg: u32) -> (i64, i64) {
        let a = arg as i64;
        let effect = match *self {
            StackEffect::Fixed(n) => n as i64,
            StackEffect::Branch { taken, not_taken } => return (taken as i64, not_taken as i64),
            StackEffect::Linear { base, scale } => base as i64 + scale as i64 * a,
            StackEffect::CallArgs { base } => base as i64 - (a & 0xff) - 2 * ((a >> 8) & 0xff),
            StackEffect::MakeFunction { base } => {
                base as i64 - (a & 0xff) - 2 * ((a >> 8) & 0xff) - ((a >> 16) & 0x7fff)
            }
            StackEffect::MakeFunctionFlags { base } => {
                base as i64 - (arg & 0x0f).count_ones() as i64
            }
            StackEffect::LowByteCount { base } => base as i64 - (a & 0xff),
            StackEffect::UnpackEx => (a & 0xff) + (a >> 8),
            StackEffect::BuildSlice => {
                if arg == 3 {
                    -2
                } else {
                    -1
                }
            }
            StackEffect::FormatValue => {
                if arg & 0x04 != 0 {
                    -1
                } else {
                    0
                }
            }
        };
        (effect, effect)
    }
}

/// How an opcode splits its net effect into values consumed before execution
/// and values pushed after it.
///
/// `effect` below is the net [`StackEffect`] for the same argument and branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrePostEffect {
    /// Fixed `(pre, post)` pair.
    Static(i32, i32),
    /// `(-arg, arg)`: reorders the top `arg` values.
    Reorder,
    /// `(-arg, arg + effect)`: needs `arg` values present, pushes a copy.
    Copy,
    /// `(-arg, arg + remaining)`: reaches `arg` deep and consumes the top.
    Collect { remaining: i32 },
    /// `(effect - 1, 1)`: pops its inputs and pushes one result.
    Produce,
    /// `(-1, effect + 1)`: pops one sequence and pushes its items.
    Unpack,
    /// Taken: `(effect, 0)`; not taken: `(-1, 2)` (an iterator must be present).
    Iterate,
}

impl PrePostEffect {
    pub fn eval(&self, effect: i64, arg: u32, jump: bool) -> (i64, i64) {
        let a = arg as i64;
        match *self {
            PrePostEffect::Static(pre, post) => (pre as i64, post as i64),
            PrePostEffect::Reorder => (-a, a),
            PrePostEffect::Copy => (-a, a + effect),
            PrePostEffect::Collect { remaining } => (-a, a + remaining as i64),
            PrePostEffect::Produce => (effect - 1, 1),
            PrePostEffect::Unpack => (-1, effect + 1),
            PrePostEffect::Iterate => {
                if jump {
                    (effect, 0)
                } else {
                    (-1, 2)
                }
            }
        }
    }
}

/// Static description of one opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeDescriptor {
    name: EcoString,
    code: u8,
    category: OperandCategory,
    flags: OpcodeFlags,
    effect: StackEffect,
    pre_post: Option<PrePostEffect>,
}

impl OpcodeDescriptor {
    /// Creates a descriptor with no flags and a zero stack effect.
    pub fn new(name: impl Into<EcoString>, code: u8, category: OperandCategory) -> Self {
        Self {
            name: name.into(),
            code,
            category,
            flags: OpcodeFlags::empty(),
            effect: StackEffect::Fixed(0),
            pre_post: None,
        }
    }

    pub fn with_flags(mut self, flags: OpcodeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_effect(mut self, effect: StackEffect) -> Self {
        self.effect = effect;
        self
    }

    pub fn with_pre_post(mut self, pre_post: PrePostEffect) -> Self {
        self.pre_post = Some(pre_post);
        self
    }

    pub fn name(&self) -> &EcoString {
        &self.name
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn category(&self) -> OperandCategory {
        self.category
    }

    pub fn flags(&self) -> OpcodeFlags {
        self.flags
    }

    pub fn effect(&self) -> StackEffect {
        self.effect
    }

    pub fn pre_post(&self) -> Option<PrePostEffect> {
        self.pre_post
    }

    /// Does the opcode take an operand?
    pub fn has_operand(&self) -> bool {
        self.category != OperandCategory::None
    }

    pub fn is_jump(&self) -> bool {
        self.category.is_jump()
    }

    pub fn is_extended_arg(&self) -> bool {
        self.flags.contains(OpcodeFlags::EXTENDED_ARG)
    }
}

impl fmt::Display for OpcodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Byte layout of the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeFormat {
    /// Bytes of operand stored after the opcode byte.
    pub operand_bytes: u8,
    /// Every instruction carries an operand field, even without an operand.
    pub fixed_width: bool,
    /// Size in bytes of the unit jump arguments and exception ranges count in.
    pub jump_unit: u32,
}

impl CodeFormat {
    /// One opcode byte, plus a little-endian 16-bit operand when the opcode
    /// takes one. Jumps count bytes.
    pub const fn classic() -> Self {
        Self {
            operand_bytes: 2,
            fixed_width: false,
            jump_unit: 1,
        }
    }

    /// Two bytes per instruction, 8-bit operand. Jumps count instructions.
    pub const fn wordcode() -> Self {
        Self {
            operand_bytes: 1,
            fixed_width: true,
            jump_unit: 2,
        }
    }

    pub fn operand_bits(&self) -> u32 {
        8 * self.operand_bytes as u32
    }

    /// Largest argument that fits without a prefix.
    pub fn max_operand(&self) -> u32 {
        if self.operand_bits() >= 32 {
            u32::MAX
        } else {
            (1u32 << self.operand_bits()) - 1
        }
    }

    /// Size of one code unit (prefix or instruction).
    pub fn unit_size(&self, has_operand: bool) -> usize {
        if has_operand || self.fixed_width {
            1 + self.operand_bytes as usize
        } else {
            1
        }
    }

    /// Number of extended-operand prefixes needed to encode `arg`.
    pub fn prefixes_for(&self, arg: u32) -> u8 {
        let bits = self.operand_bits();
        let mut count = 0u8;
        while bits * (count as u32 + 1) < 32 && (arg >> (bits * (count as u32 + 1))) != 0 {
            count += 1;
        }
        count
    }

    /// Total encoded size of an instruction with `prefixes` prefixes.
    pub fn instruction_size(&self, has_operand: bool, prefixes: u8) -> usize {
        self.unit_size(has_operand) + prefixes as usize * self.unit_size(true)
    }
}

/// An immutable, indexed instruction-set description.
#[derive(Debug, Clone)]
pub struct InstructionSet {
    name: EcoString,
    format: CodeFormat,
    opcodes: Vec<OpcodeDescriptor>,
    by_name: HashMap<EcoString, usize>,
    by_code: HashMap<u8, usize>,
    extended_arg: Option<usize>,
    exception_table: bool,
}

impl InstructionSet {
    pub fn builder(name: impl Into<EcoString>, format: CodeFormat) -> InstructionSetBuilder {
        InstructionSetBuilder {
            name: name.into(),
            format,
            opcodes: Vec::new(),
            extended_arg: None,
            exception_table: false,
        }
    }

    /// The CPython 3.5 instruction set: classic 1/3-byte layout, absolute and
    /// forward-relative jumps only, block-based exception handling.
    pub fn cpython35() -> Self {
        cpython35::build()
    }

    /// A wordcode instruction set in the style of CPython 3.11 (without inline
    /// caches): 2-byte instructions, jumps counted in instructions, a
    /// backward-jump family and an exception table.
    pub fn wordcode() -> Self {
        wordcode::build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> &CodeFormat {
        &self.format
    }

    pub fn get(&self, name: &str) -> Option<&OpcodeDescriptor> {
        self.by_name.get(name).map(|&i| &self.opcodes[i])
    }

    /// Looks up an opcode by name, failing with [`Error::UnknownOpcode`].
    pub fn lookup(&self, name: &str) -> Result<&OpcodeDescriptor> {
        self.get(name)
            .ok_or_else(|| Error::UnknownOpcode(EcoString::from(name)))
    }

    pub fn by_code(&self, code: u8) -> Option<&OpcodeDescriptor> {
        self.by_code.get(&code).map(|&i| &self.opcodes[i])
    }

    pub fn extended_arg(&self) -> Option<&OpcodeDescriptor> {
        self.extended_arg.map(|i| &self.opcodes[i])
    }

    /// Does the VM describe exception handling with an offset-range table?
    pub fn has_exception_table(&self) -> bool {
        self.exception_table
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpcodeDescriptor> {
        self.opcodes.iter()
    }

    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }
}

/// Builder validating an [`InstructionSet`] before it is frozen.
#[derive(Debug, Clone)]
pub struct InstructionSetBuilder {
    name: EcoString,
    format: CodeFormat,
    opcodes: Vec<OpcodeDescriptor>,
    extended_arg: Option<u8>,
    exception_table: bool,
}

impl InstructionSetBuilder {
    pub fn opcode(mut self, descriptor: OpcodeDescriptor) -> Self {
        self.opcodes.push(descriptor);
        self
    }

    pub fn opcodes(mut self, descriptors: impl IntoIterator<Item = OpcodeDescriptor>) -> Self {
        self.opcodes.extend(descriptors);
        self
    }

    /// Declares which opcode is the extended-operand prefix.
    pub fn extended_arg(mut self, code: u8) -> Self {
        self.extended_arg = Some(code);
        self
    }

    pub fn exception_table(mut self, enabled: bool) -> Self {
        self.exception_table = enabled;
        self
    }

    pub fn build(mut self) -> Result<InstructionSet> {
        if self.format.operand_bytes == 0 || self.format.operand_bytes > 4 {
            return Err(Error::InvalidDescription(format!(
                "operand width must be 1..=4 bytes, got {}",
                self.format.operand_bytes
            )));
        }
        if self.format.jump_unit == 0 {
            return Err(Error::InvalidDescription("jump unit must be non-zero".into()));
        }

        let mut by_name = HashMap::with_capacity(self.opcodes.len());
        let mut by_code = HashMap::with_capacity(self.opcodes.len());
        for (index, op) in self.opcodes.iter().enumerate() {
            if by_name.insert(op.name.clone(), index).is_some() {
                return Err(Error::InvalidDescription(format!(
                    "duplicate operation name {}",
                    op.name
                )));
            }
            if by_code.insert(op.code, index).is_some() {
                return Err(Error::InvalidDescription(format!(
                    "duplicate opcode {} ({})",
                    op.code, op.name
                )));
            }
            check_flags(op)?;
        }

        let extended_arg = match self.extended_arg {
            Some(code) => {
                let index = *by_code.get(&code).ok_or_else(|| {
                    Error::InvalidDescription(format!("extended-operand opcode {code} is not defined"))
                })?;
                let op = &mut self.opcodes[index];
                if op.category != OperandCategory::Int {
                    return Err(Error::InvalidDescription(format!(
                        "extended-operand opcode {} must take an integer operand",
                        op.name
                    )));
                }
                op.flags |= OpcodeFlags::EXTENDED_ARG;
                Some(index)
            }
            None => None,
        };

        tracing::debug!(
            name = %self.name,
            opcodes = self.opcodes.len(),
            "built instruction set"
        );

        Ok(InstructionSet {
            name: self.name,
            format: self.format,
            opcodes: self.opcodes,
            by_name,
            by_code,
            extended_arg,
            exception_table: self.exception_table,
        })
    }
}

fn check_flags(op: &OpcodeDescriptor) -> Result<()> {
    let flags = op.flags;
    if flags.contains(OpcodeFlags::CONDITIONAL | OpcodeFlags::UNCONDITIONAL) {
        return Err(Error::InvalidDescription(format!(
            "{} cannot be both a conditional and an unconditional jump",
            op.name
        )));
    }
    if flags.intersects(OpcodeFlags::CONDITIONAL | OpcodeFlags::UNCONDITIONAL) && !op.is_jump() {
        return Err(Error::InvalidDescription(format!(
            "{} is classified as a jump but takes no jump operand",
            op.name
        )));
    }
    if flags.contains(OpcodeFlags::BACKWARD) && op.category != OperandCategory::JumpRelative {
        return Err(Error::InvalidDescription(format!(
            "{} is a backward jump but not relative",
            op.name
        )));
    }
    Ok(())
}
