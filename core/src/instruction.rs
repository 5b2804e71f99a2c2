//! Instructions and source locations.

use core::fmt;

use crate::errors::{Error, Result};
use crate::graph::Label;
use crate::isa::{InstructionSet, OpcodeDescriptor, OpcodeFlags, OperandCategory};
use crate::operand::Operand;
use crate::format;

/// Source span of an instruction.
///
/// Only `line` is meaningful for the classic line table; the other fields are
/// carried through for callers that track full spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub line: Option<u32>,
    pub end_line: Option<u32>,
    pub column: Option<u32>,
    pub end_column: Option<u32>,
}

impl Location {
    pub fn new(
        line: Option<u32>,
        end_line: Option<u32>,
        column: Option<u32>,
        end_column: Option<u32>,
    ) -> Result<Self> {
        if let Some(end_line) = end_line {
            match line {
                None => {
                    return Err(Error::InvalidLocation(
                        "end line specified without a line".into(),
                    ));
                }
                Some(line) if line > end_line => {
                    return Err(Error::InvalidLocation(format!(
                        "end line {end_line} is before line {line}"
                    )));
                }
                Some(_) => {}
            }
        }

        if column.is_some() || end_column.is_some() {
            if line.is_none() || end_line.is_none() {
                return Err(Error::InvalidLocation(format!(
                    "columns given with incomplete lines (line {line:?}, end line {end_line:?})"
                )));
            }
            match (column, end_column) {
                (Some(column), Some(end_column)) if column > end_column => {
                    return Err(Error::InvalidLocation(format!(
                        "end column {end_column} is before column {column}"
                    )));
                }
                (None, Some(_)) => {
                    return Err(Error::InvalidLocation(
                        "end column specified without a column".into(),
                    ));
                }
                (Some(_), None) => {
                    return Err(Error::InvalidLocation(
                        "column specified without an end column".into(),
                    ));
                }
                _ => {}
            }
        }

        Ok(Self {
            line,
            end_line,
            column,
            end_column,
        })
    }

    /// Location carrying only a line number.
    pub fn line(line: u32) -> Self {
        Self {
            line: Some(line),
            ..Self::default()
        }
    }
}

/// One operation with a validated operand.
///
/// The opcode is borrowed from the [`InstructionSet`] the instruction was built
/// against, so an instruction can never name an operation its VM lacks.
#[derive(Clone)]
pub struct Instruction<'isa> {
    op: &'isa OpcodeDescriptor,
    operand: Operand,
    location: Option<Location>,
}

impl<'isa> Instruction<'isa> {
    /// Looks up `name` in `isa` and validates `operand` against it.
    pub fn new(
        isa: &'isa InstructionSet,
        name: &str,
        operand: impl Into<Operand>,
    ) -> Result<Self> {
        Self::from_descriptor(isa.lookup(name)?, operand.into())
    }

    pub fn from_descriptor(op: &'isa OpcodeDescriptor, operand: Operand) -> Result<Self> {
        operand.check(op)?;
        Ok(Self {
            op,
            operand,
            location: None,
        })
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_line(self, line: u32) -> Self {
        self.with_location(Location::line(line))
    }

    pub fn descriptor(&self) -> &'isa OpcodeDescriptor {
        self.op
    }

    pub fn name(&self) -> &str {
        self.op.name()
    }

    pub fn code(&self) -> u8 {
        self.op.code()
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn line(&self) -> Option<u32> {
        self.location.and_then(|loc| loc.line)
    }

    pub fn set_location(&mut self, location: Option<Location>) {
        self.location = location;
    }

    /// Replaces the operand, keeping the opcode and location.
    pub fn set_operand(&mut self, operand: impl Into<Operand>) -> Result<()> {
        let operand = operand.into();
        operand.check(self.op)?;
        self.operand = operand;
        Ok(())
    }

    /// Does the opcode take an operand?
    pub fn require_operand(&self) -> bool {
        self.op.has_operand()
    }

    /// Builds a new instruction from this one with the operation, operand or
    /// location swapped out.
    ///
    /// Arguments left as `None` are taken from `self`. `location: Some(None)`
    /// clears the location.
    pub fn replace(
        &self,
        isa: &'isa InstructionSet,
        name: Option<&str>,
        operand: Option<Operand>,
        location: Option<Option<Location>>,
    ) -> Result<Self> {
        let op = match name {
            Some(name) => isa.lookup(name)?,
            None => self.op,
        };
        let operand = operand.unwrap_or_else(|| self.operand.clone());
        operand.check(op)?;
        Ok(Self {
            op,
            operand,
            location: location.unwrap_or(self.location),
        })
    }

    /// Changes the operation and/or operand in place, keeping the location.
    ///
    /// Nothing is modified when the new combination does not validate.
    pub fn set(
        &mut self,
        isa: &'isa InstructionSet,
        name: Option<&str>,
        operand: Option<Operand>,
    ) -> Result<()> {
        *self = self.replace(isa, name, operand, None)?;
        Ok(())
    }

    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Net stack effect.
    ///
    /// `jump` selects the branch-taken (`Some(true)`) or fall-through
    /// (`Some(false)`) effect. With `None`, the effect must not depend on the
    /// branch.
    pub fn stack_effect(&self, jump: Option<bool>) -> Result<i64> {
        let (taken, not_taken) = self.op.effect().eval(self.operand.effect_arg());
        match jump {
            Some(true) => Ok(taken),
            Some(false) => Ok(not_taken),
            None if taken == not_taken => Ok(taken),
            None => Err(Error::AmbiguousStackEffect {
                name: self.op.name().clone(),
            }),
        }
    }

    /// Values the instruction needs on the stack (`pre`, negative) and pushes
    /// back (`post`). `pre + post` equals [`Instruction::stack_effect`].
    pub fn pre_and_post_effect(&self, jump: Option<bool>) -> Result<(i64, i64)> {
        let effect = self.stack_effect(jump)?;
        Ok(match self.op.pre_post() {
            Some(pre_post) => {
                pre_post.eval(effect, self.operand.effect_arg(), jump.unwrap_or(false))
            }
            None => (effect, 0),
        })
    }

    pub fn is_jump(&self) -> bool {
        self.op.is_jump()
    }

    pub fn is_conditional_jump(&self) -> bool {
        self.op.flags().contains(OpcodeFlags::CONDITIONAL)
    }

    pub fn is_unconditional_jump(&self) -> bool {
        self.op.flags().contains(OpcodeFlags::UNCONDITIONAL)
    }

    pub fn is_absolute_jump(&self) -> bool {
        self.op.category() == OperandCategory::JumpAbsolute
    }

    pub fn is_forward_relative_jump(&self) -> bool {
        self.op.category() == OperandCategory::JumpRelative
            && !self.op.flags().contains(OpcodeFlags::BACKWARD)
    }

    pub fn is_backward_relative_jump(&self) -> bool {
        self.op.category() == OperandCategory::JumpRelative
            && self.op.flags().contains(OpcodeFlags::BACKWARD)
    }

    /// Does control never fall through to the next instruction?
    pub fn is_terminal(&self) -> bool {
        self.op
            .flags()
            .intersects(OpcodeFlags::TERMINAL | OpcodeFlags::UNCONDITIONAL)
    }

    pub fn jump_target(&self) -> Option<Label> {
        if self.is_jump() {
            self.operand.label()
        } else {
            None
        }
    }
}

impl PartialEq for Instruction<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
            && self.op.code() == other.op.code()
            && self.op.name() == other.op.name()
            && self.operand == other.operand
    }
}

impl Eq for Instruction<'_> {}

impl fmt::Debug for Instruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.name())?;
        if !self.operand.is_none() {
            write!(f, "({})", self.operand)?;
        }
        if let Some(line) = self.line() {
            write!(f, " @{line}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Instruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.name())?;
        if !self.operand.is_none() {
            write!(f, " {}", self.operand)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "instruction_test.rs"]
mod instruction_test;
