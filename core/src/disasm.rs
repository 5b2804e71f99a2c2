//! Disassembler: flat code unit to control-flow graph.
//!
//! Decoding happens in three passes:
//!
//! 1. Decode every instruction, folding extended-operand prefixes into the
//!    operand of the instruction that follows them.
//! 2. Collect block starts: offset 0, jump targets, exception range edges and
//!    handlers, and the instruction after every jump or terminal.
//! 3. Fill one block per start, replacing offsets with labels and table
//!    indices with operand values, then place try-region markers.

use alloc::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;

use crate::codec::{CodeMeta, CodeUnit, ExceptionTableEntry};
use crate::errors::{Error, Result};
use crate::graph::{Graph, Label};
use crate::instruction::{Instruction, Location};
use crate::isa::{InstructionSet, OpcodeDescriptor, OpcodeFlags, OperandCategory};
use crate::operand::{Compare, MAX_INT_OPERAND, Operand, VariableRef};
use crate::{Vec, format};

/// A disassembled code unit: the graph plus the metadata it was decoded with.
#[derive(Debug, Clone)]
pub struct Disassembly<'isa> {
    pub graph: Graph<'isa>,
    pub meta: CodeMeta,
}

/// One decoded instruction, still in numeric form.
#[derive(Debug, Clone, Copy)]
struct Decoded<'isa> {
    /// Offset of the first prefix, or of the instruction itself.
    offset: usize,
    /// Offset just past the instruction.
    end: usize,
    op: &'isa OpcodeDescriptor,
    arg: u32,
}

impl Decoded<'_> {
    fn is_terminal_or_jump(&self) -> bool {
        self.op.is_jump()
            || self
                .op
                .flags()
                .intersects(OpcodeFlags::TERMINAL | OpcodeFlags::UNCONDITIONAL)
    }
}

pub struct Disassembler<'isa> {
    isa: &'isa InstructionSet,
}

impl<'isa> Disassembler<'isa> {
    pub fn new(isa: &'isa InstructionSet) -> Self {
        Self { isa }
    }

    /// Disassembles a code unit, decoding its line and exception tables.
    pub fn disassemble(&self, unit: &CodeUnit) -> Result<Disassembly<'isa>> {
        let lines: BTreeMap<usize, u32> = unit.line_starts()?.into_iter().collect();
        let exceptions = if self.isa.has_exception_table() {
            unit.exception_entries(self.isa)?
        } else if unit.exception_table.is_empty() {
            Vec::new()
        } else {
            return Err(Error::malformed(
                0,
                format!("{} has no exception table", self.isa.name()),
            ));
        };
        self.disassemble_raw(&unit.code, &lines, &unit.meta, &exceptions)
    }

    /// Disassembles raw instruction bytes.
    ///
    /// `lines` maps offsets to the line that starts there; instructions before
    /// the first entry get `meta.first_line`. Exception entries use byte
    /// offsets.
    pub fn disassemble_raw(
        &self,
        code: &[u8],
        lines: &BTreeMap<usize, u32>,
        meta: &CodeMeta,
        exceptions: &[ExceptionTableEntry],
    ) -> Result<Disassembly<'isa>> {
        let decoded = self.decode(code)?;
        // The end of the code is a valid target; it becomes an empty last
        // block.
        let boundaries: BTreeSet<usize> = decoded
            .iter()
            .map(|d| d.offset)
            .chain(core::iter::once(code.len()))
            .collect();
        let check_target = |from: usize, target: usize, what: &str| -> Result<usize> {
            if !boundaries.contains(&target) {
                return Err(Error::malformed(
                    from,
                    format!("{what} {target} is not the start of an instruction"),
                ));
            }
            Ok(target)
        };

        // Block starts
        let mut starts: BTreeSet<usize> = BTreeSet::new();
        let mut jump_targets: HashMap<usize, usize> = HashMap::new();
        if !decoded.is_empty() {
            starts.insert(0);
        }
        for d in &decoded {
            if d.op.is_jump() {
                let target = check_target(d.offset, self.jump_target(d)?, "jump target")?;
                jump_targets.insert(d.offset, target);
                starts.insert(target);
            }
            if d.is_terminal_or_jump() && d.end < code.len() {
                starts.insert(d.end);
            }
        }
        for entry in exceptions {
            if entry.end <= entry.start {
                return Err(Error::malformed(entry.start, "empty exception range"));
            }
            check_target(entry.start, entry.start, "exception range start")?;
            check_target(entry.start, entry.end, "exception range end")?;
            check_target(entry.start, entry.target, "exception handler")?;
            if entry.end != code.len() {
                starts.insert(entry.end);
            }
            starts.insert(entry.start);
            starts.insert(entry.target);
        }

        let mut graph = Graph::new();
        let labels: BTreeMap<usize, Label> = starts
            .iter()
            .map(|&offset| (offset, graph.add_block(Vec::new())))
            .collect();

        // Fill blocks
        let mut current: Option<Label> = None;
        let mut line = meta.first_line;
        let mut line_starts = lines.iter().peekable();
        for d in &decoded {
            if let Some(&label) = labels.get(&d.offset) {
                current = Some(label);
            }
            while let Some((_, &start)) =
                line_starts.next_if(|&(&offset, _)| offset <= d.offset)
            {
                line = start;
            }
            let operand = match jump_targets.get(&d.offset) {
                Some(target) => Operand::Label(labels[target]),
                None => self.operand(d, meta)?,
            };
            let instr = Instruction::from_descriptor(d.op, operand)?
                .with_location(Location::line(line));
            // Offset 0 always opens a block, so `current` is set here.
            if let Some(block) = current.and_then(|label| graph.block_mut(label)) {
                block.push(instr);
            }
        }

        // Try regions
        for entry in exceptions {
            let mut region = graph.new_try(labels[&entry.target], entry.lasti);
            region.stack_depth = Some(entry.depth);
            let end = region.end();

            let first = labels[&entry.start];
            if let Some(block) = graph.block_mut(first) {
                block.insert(0, region);
            }
            let last = labels
                .range(..entry.end)
                .next_back()
                .map(|(_, &label)| label)
                .unwrap_or(first);
            if let Some(block) = graph.block_mut(last) {
                block.push(end);
            }
        }

        tracing::debug!(
            instructions = decoded.len(),
            blocks = graph.len(),
            regions = exceptions.len(),
            "disassembled code"
        );

        Ok(Disassembly {
            graph,
            meta: meta.clone(),
        })
    }

    fn decode(&self, code: &[u8]) -> Result<Vec<Decoded<'isa>>> {
        let format = self.isa.format();
        let bits = format.operand_bits();
        let mut out = Vec::new();
        let mut offset = 0usize;

        while offset < code.len() {
            let start = offset;
            let mut prefix: Option<u64> = None;
            loop {
                let Some(&byte) = code.get(offset) else {
                    return Err(Error::malformed(
                        start,
                        "extended-operand prefix at the end of the code",
                    ));
                };
                let op = self
                    .isa
                    .by_code(byte)
                    .ok_or_else(|| Error::malformed(offset, format!("unknown opcode {byte}")))?;
                let size = format.unit_size(op.has_operand());
                if offset + size > code.len() {
                    return Err(Error::malformed(offset, format!("truncated {}", op.name())));
                }
                let raw = if op.has_operand() {
                    code[offset + 1..offset + size]
                        .iter()
                        .rev()
                        .fold(0u64, |acc, &b| acc << 8 | b as u64)
                } else {
                    0
                };
                offset += size;

                let arg = match prefix {
                    Some(high) => (high << bits) | raw,
                    None => raw,
                };
                if arg > MAX_INT_OPERAND as u64 {
                    return Err(Error::malformed(start, "operand exceeds 2147483647"));
                }
                if op.is_extended_arg() {
                    prefix = Some(arg);
                    continue;
                }
                if prefix.is_some() && !op.has_operand() {
                    return Err(Error::malformed(
                        start,
                        format!("extended-operand prefix before {}, which takes no operand", op.name()),
                    ));
                }
                out.push(Decoded {
                    offset: start,
                    end: offset,
                    op,
                    arg: arg as u32,
                });
                break;
            }
        }

        tracing::trace!(count = out.len(), "decoded instructions");
        Ok(out)
    }

    fn jump_target(&self, d: &Decoded<'_>) -> Result<usize> {
        let unit = self.isa.format().jump_unit as usize;
        let distance = d.arg as usize * unit;
        let target = match d.op.category() {
            OperandCategory::JumpAbsolute => Some(distance),
            _ if d.op.flags().contains(OpcodeFlags::BACKWARD) => {
                d.end.checked_sub(distance)
            }
            _ => d.end.checked_add(distance),
        };
        target.ok_or_else(|| {
            Error::malformed(d.offset, format!("{} jumps before the code", d.op.name()))
        })
    }

    fn operand(&self, d: &Decoded<'_>, meta: &CodeMeta) -> Result<Operand> {
        let index = d.arg as usize;
        let missing = |table: &str| {
            Error::malformed(
                d.offset,
                format!("{} refers to {table} index {index}, which does not exist", d.op.name()),
            )
        };
        Ok(match d.op.category() {
            OperandCategory::None => Operand::None,
            OperandCategory::Int => Operand::Int(d.arg),
            OperandCategory::Literal => Operand::Literal(
                meta.literals.get(index).cloned().ok_or_else(|| missing("literal"))?,
            ),
            OperandCategory::Name => Operand::Var(VariableRef::name(
                meta.names.get(index).cloned().ok_or_else(|| missing("name"))?,
            )),
            OperandCategory::FlaggedName => Operand::Flagged(
                d.arg & 1 != 0,
                meta.names.get(index >> 1).cloned().ok_or_else(|| missing("name"))?,
            ),
            OperandCategory::Local => Operand::Var(VariableRef::local(
                meta.varnames.get(index).cloned().ok_or_else(|| missing("local"))?,
            )),
            OperandCategory::Free => {
                let cells = meta.cellvars.len();
                if index < cells {
                    Operand::Var(VariableRef::cell(meta.cellvars[index].clone()))
                } else {
                    Operand::Var(VariableRef::free(
                        meta.freevars
                            .get(index - cells)
                            .cloned()
                            .ok_or_else(|| missing("free variable"))?,
                    ))
                }
            }
            OperandCategory::Compare => Operand::Compare(
                Compare::from_arg(d.arg).ok_or_else(|| missing("comparison"))?,
            ),
            OperandCategory::JumpRelative | OperandCategory::JumpAbsolute => {
                return Err(Error::malformed(d.offset, "unresolved jump"));
            }
        })
    }
}

#[cfg(test)]
#[path = "disasm_test.rs"]
mod disasm_test;
