//! Assembler: control-flow graph to flat code unit.
//!
//! Assembly runs in four steps:
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────┐   ┌──────────────────────┐
//! │ flatten  │──▶│ lower pools  │──▶│ layout │──▶│ emit code and tables │
//! └──────────┘   └──────────────┘   └────────┘   └──────────────────────┘
//! ```
//!
//! Layout is a fixed-point loop. Every jump starts without prefixes; each
//! round computes offsets from the current prefix counts, resolves jump
//! arguments and grows the prefix count of any jump whose argument no longer
//! fits. Counts never shrink, so offsets only move forward and the loop
//! settles on the smallest layout that satisfies every jump.

use ecow::EcoString;
use hashbrown::HashMap;

use crate::codec::{
    CodeMeta, CodeUnit, ExceptionTableEntry, encode_exception_table, encode_line_table,
};
use crate::errors::{Error, Result};
use crate::graph::{BlockItem, Graph, Label, StackInfo, TryBegin, TryId};
use crate::instruction::Instruction;
use crate::isa::{CodeFormat, InstructionSet};
use crate::operand::{Literal, MAX_INT_OPERAND, Operand, VarKind, VariableRef};
use crate::{String, Vec, format};

/// Knobs for [`Assembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerOptions {
    /// Layout rounds before giving up with [`Error::LayoutDivergence`].
    pub max_layout_rounds: usize,
    /// Recompute `stacksize` from the graph instead of passing the input
    /// value through.
    pub compute_stack_size: bool,
    /// Check that every label used by the graph belongs to it before lowering.
    pub check_references: bool,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            max_layout_rounds: 16,
            compute_stack_size: true,
            check_references: true,
        }
    }
}

/// One instruction in layout order.
#[derive(Debug)]
struct Slot<'g, 'isa> {
    instr: &'g Instruction<'isa>,
    /// Slot index the jump lands on; `slots.len()` for the end of the code.
    target: Option<usize>,
    arg: u32,
    prefixes: u8,
}

/// Layout-ordered view of the graph with try markers kept in place.
#[derive(Debug)]
enum Event<'g> {
    Instr(usize),
    Begin(&'g TryBegin),
    End(TryId),
}

pub struct Assembler<'isa> {
    isa: &'isa InstructionSet,
    options: AssemblerOptions,
}

impl<'isa> Assembler<'isa> {
    pub fn new(isa: &'isa InstructionSet) -> Self {
        Self::with_options(isa, AssemblerOptions::default())
    }

    pub fn with_options(isa: &'isa InstructionSet, options: AssemblerOptions) -> Self {
        Self { isa, options }
    }

    pub fn options(&self) -> &AssemblerOptions {
        &self.options
    }

    /// Lowers `graph` into a code unit.
    ///
    /// `meta` is passed through, except that referenced values missing from
    /// its pools are appended and `stacksize` is recomputed when enabled.
    pub fn assemble(&self, graph: &Graph<'isa>, meta: &CodeMeta) -> Result<CodeUnit> {
        if self.options.check_references {
            graph.check_references()?;
        }

        let mut meta = meta.clone();
        let (mut slots, events, block_starts) = flatten(graph)?;
        tracing::debug!(
            blocks = graph.len(),
            instructions = slots.len(),
            "assembling graph"
        );

        let format = *self.isa.format();
        let mut pools = Pools::new(&mut meta);
        for slot in &mut slots {
            if slot.target.is_none() {
                slot.arg = pools.lower(slot.instr)?;
                slot.prefixes = format.prefixes_for(slot.arg);
            }
        }

        let offsets = self.layout(&mut slots)?;
        if self.isa.extended_arg().is_none() {
            if let Some(slot) = slots.iter().find(|slot| slot.prefixes > 0) {
                return Err(Error::invalid_operand(
                    slot.instr.descriptor().name(),
                    format!(
                        "argument {} needs an extended-operand prefix, which {} lacks",
                        slot.arg,
                        self.isa.name()
                    ),
                ));
            }
        }

        let code = self.emit(&slots, &format);

        let mut starts = Vec::with_capacity(slots.len());
        let mut line = meta.first_line;
        for (index, slot) in slots.iter().enumerate() {
            if let Some(current) = slot.instr.line() {
                line = current;
            }
            starts.push((offsets[index], line));
        }
        let line_table = encode_line_table(meta.first_line, &starts);

        let needs_depths = events
            .iter()
            .any(|event| matches!(event, Event::Begin(entry) if entry.stack_depth.is_none()));
        let stack = if self.options.compute_stack_size || needs_depths {
            Some(graph.compute_stack_size()?)
        } else {
            None
        };
        if self.options.compute_stack_size {
            if let Some(stack) = &stack {
                meta.stacksize = stack.max;
            }
        }

        let entries = self.exception_entries(&events, &offsets, &block_starts, stack.as_ref())?;
        let exception_table = if entries.is_empty() {
            Vec::new()
        } else {
            encode_exception_table(&entries, format.jump_unit)?
        };

        tracing::debug!(
            bytes = code.len(),
            line_entries = line_table.len() / 2,
            regions = entries.len(),
            stacksize = meta.stacksize,
            "assembled code unit"
        );

        Ok(CodeUnit {
            meta,
            code,
            line_table,
            exception_table,
        })
    }

    /// Runs layout rounds until no prefix count changes. Returns the offset of
    /// every slot plus the end offset.
    fn layout(&self, slots: &mut [Slot<'_, 'isa>]) -> Result<Vec<usize>> {
        let format = self.isa.format();
        let rounds = self.options.max_layout_rounds;

        for round in 1..=rounds {
            let offsets = offsets(slots, format);
            let mut grew = 0usize;

            for index in 0..slots.len() {
                let Some(target) = slots[index].target else {
                    continue;
                };
                let arg = jump_arg(slots[index].instr, offsets[index + 1], offsets[target], format)?;
                let needed = format.prefixes_for(arg);
                slots[index].arg = arg;
                if needed > slots[index].prefixes {
                    slots[index].prefixes = needed;
                    grew += 1;
                }
            }

            tracing::trace!(round, grew, size = offsets[slots.len()], "layout round");
            if grew == 0 {
                return Ok(offsets);
            }
        }

        Err(Error::LayoutDivergence { rounds })
    }

    fn emit(&self, slots: &[Slot<'_, 'isa>], format: &CodeFormat) -> Vec<u8> {
        let bits = format.operand_bits();
        let mask = format.max_operand();
        let mut out = Vec::new();

        for slot in slots {
            if let Some(prefix) = self.isa.extended_arg() {
                for k in (1..=slot.prefixes as u32).rev() {
                    write_unit(&mut out, format, prefix.code(), Some((slot.arg >> (bits * k)) & mask));
                }
            }
            let operand = if slot.instr.require_operand() {
                Some(slot.arg & mask)
            } else {
                None
            };
            write_unit(&mut out, format, slot.instr.code(), operand);
        }
        out
    }

    fn exception_entries(
        &self,
        events: &[Event<'_>],
        offsets: &[usize],
        block_starts: &HashMap<Label, usize>,
        stack: Option<&StackInfo>,
    ) -> Result<Vec<ExceptionTableEntry>> {
        let has_regions = events.iter().any(|event| matches!(event, Event::Begin(_)));
        if has_regions && !self.isa.has_exception_table() {
            return Err(Error::UnmatchedTryRegion(format!(
                "{} has no exception table",
                self.isa.name()
            )));
        }

        let mut open: Vec<&TryBegin> = Vec::new();
        let mut entries = Vec::new();
        // (region, start offset, end offset) of the run being extended
        let mut run: Option<(&TryBegin, usize, usize)> = None;

        for event in events {
            match event {
                Event::Begin(entry) => open.push(entry),
                Event::End(id) => {
                    let Some(position) = open.iter().rposition(|entry| entry.id == *id) else {
                        return Err(Error::UnmatchedTryRegion(format!(
                            "end of region {id:?} without an open region"
                        )));
                    };
                    open.remove(position);
                }
                Event::Instr(index) => {
                    let (start, end) = (offsets[*index], offsets[*index + 1]);
                    let covering = open.last().copied();
                    let extends = matches!(
                        (&run, covering),
                        (Some((region, ..)), Some(entry)) if region.id == entry.id
                    );
                    if extends {
                        if let Some((_, _, run_end)) = run.as_mut() {
                            *run_end = end;
                        }
                    } else {
                        if let Some(done) = run.take() {
                            entries.push(self.entry(done, offsets, block_starts, stack)?);
                        }
                        run = covering.map(|entry| (entry, start, end));
                    }
                }
            }
        }

        if let Some(entry) = open.first() {
            return Err(Error::UnmatchedTryRegion(format!(
                "region {:?} is never closed",
                entry.id
            )));
        }
        if let Some(done) = run.take() {
            entries.push(self.entry(done, offsets, block_starts, stack)?);
        }

        tracing::trace!(entries = entries.len(), "collected exception entries");
        Ok(entries)
    }

    fn entry(
        &self,
        (region, start, end): (&TryBegin, usize, usize),
        offsets: &[usize],
        block_starts: &HashMap<Label, usize>,
        stack: Option<&StackInfo>,
    ) -> Result<ExceptionTableEntry> {
        let target = block_starts.get(&region.target).ok_or_else(|| {
            Error::UnmatchedTryRegion(format!(
                "handler {} is not a block of this graph",
                region.target
            ))
        })?;
        // Unreachable regions never get a computed depth; nothing unwinds to
        // them at run time.
        let depth = region
            .stack_depth
            .or_else(|| stack.and_then(|info| info.try_depths.get(&region.id).copied()))
            .unwrap_or(0);
        Ok(ExceptionTableEntry {
            start,
            end,
            target: offsets[*target],
            depth,
            lasti: region.push_lasti,
        })
    }
}

type Flattened<'g, 'isa> = (Vec<Slot<'g, 'isa>>, Vec<Event<'g>>, HashMap<Label, usize>);

/// Lays the graph out in block order. Empty blocks start where the next
/// instruction does.
fn flatten<'g, 'isa>(graph: &'g Graph<'isa>) -> Result<Flattened<'g, 'isa>> {
    let mut block_starts: HashMap<Label, usize> = HashMap::with_capacity(graph.len());
    let mut count = 0usize;
    for block in graph.iter() {
        block_starts.insert(block.label(), count);
        count += block.instructions().count();
    }

    let mut slots = Vec::with_capacity(count);
    let mut events = Vec::with_capacity(count);
    for block in graph.iter() {
        for item in block.items() {
            match item {
                BlockItem::Instr(instr) => {
                    let target = match instr.jump_target() {
                        Some(label) => Some(*block_starts.get(&label).ok_or_else(|| {
                            Error::UnresolvableJump {
                                name: instr.descriptor().name().clone(),
                                reason: format!("{label} is not a block of this graph"),
                            }
                        })?),
                        None => None,
                    };
                    events.push(Event::Instr(slots.len()));
                    slots.push(Slot {
                        instr,
                        target,
                        arg: 0,
                        prefixes: 0,
                    });
                }
                BlockItem::TryBegin(entry) => events.push(Event::Begin(entry)),
                BlockItem::TryEnd(end) => events.push(Event::End(end.entry)),
            }
        }
    }

    Ok((slots, events, block_starts))
}

fn offsets(slots: &[Slot<'_, '_>], format: &CodeFormat) -> Vec<usize> {
    let mut out = Vec::with_capacity(slots.len() + 1);
    let mut offset = 0usize;
    for slot in slots {
        out.push(offset);
        offset += format.instruction_size(slot.instr.require_operand(), slot.prefixes);
    }
    out.push(offset);
    out
}

/// Argument of a jump ending at `end` and landing on `target`.
fn jump_arg(instr: &Instruction<'_>, end: usize, target: usize, format: &CodeFormat) -> Result<u32> {
    let unresolvable = |reason: String| Error::UnresolvableJump {
        name: instr.descriptor().name().clone(),
        reason,
    };

    let distance = if instr.is_absolute_jump() {
        Some(target)
    } else if instr.is_backward_relative_jump() {
        end.checked_sub(target)
    } else {
        target.checked_sub(end)
    };
    let Some(distance) = distance else {
        let direction = if instr.is_backward_relative_jump() { "after" } else { "before" };
        return Err(unresolvable(format!(
            "target offset {target} lies {direction} the instruction end {end}"
        )));
    };

    let unit = format.jump_unit as usize;
    if distance % unit != 0 {
        return Err(unresolvable(format!(
            "distance {distance} is not a multiple of the jump unit {unit}"
        )));
    }
    u32::try_from(distance / unit)
        .ok()
        .filter(|&arg| arg <= MAX_INT_OPERAND)
        .ok_or_else(|| unresolvable(format!("distance {distance} is too large")))
}

fn write_unit(out: &mut Vec<u8>, format: &CodeFormat, code: u8, operand: Option<u32>) {
    out.push(code);
    match operand {
        Some(value) => {
            for byte in 0..format.operand_bytes as u32 {
                out.push((value >> (8 * byte)) as u8);
            }
        }
        None if format.fixed_width => {
            out.resize(out.len() + format.operand_bytes as usize, 0);
        }
        None => {}
    }
}

/// Index lookups over the metadata pools, appending values they lack.
struct Pools<'m> {
    meta: &'m mut CodeMeta,
    literals: HashMap<Vec<u8>, u32>,
    names: HashMap<EcoString, u32>,
    varnames: HashMap<EcoString, u32>,
}

impl<'m> Pools<'m> {
    fn new(meta: &'m mut CodeMeta) -> Self {
        let mut literals = HashMap::with_capacity(meta.literals.len());
        for (index, literal) in meta.literals.iter().enumerate() {
            literals.entry(literal.content_key()).or_insert(index as u32);
        }
        Self {
            literals,
            names: first_indices(&meta.names),
            varnames: first_indices(&meta.varnames),
            meta,
        }
    }

    /// Table index (or raw value) encoding the operand of a non-jump.
    fn lower(&mut self, instr: &Instruction<'_>) -> Result<u32> {
        let arg = match instr.operand() {
            Operand::None | Operand::Label(_) => 0,
            Operand::Int(value) => *value,
            Operand::Compare(cmp) => cmp.arg(),
            Operand::Literal(literal) => self.literal(literal),
            Operand::Var(var) => match var.kind {
                VarKind::Name => intern(&mut self.meta.names, &mut self.names, &var.name),
                VarKind::Local => {
                    let index = intern(&mut self.meta.varnames, &mut self.varnames, &var.name);
                    self.meta.nlocals = self.meta.nlocals.max(self.meta.varnames.len() as u32);
                    index
                }
                VarKind::Cell | VarKind::Free => self.closure(instr, var)?,
            },
            Operand::Flagged(flag, name) => {
                let index = intern(&mut self.meta.names, &mut self.names, name);
                index.checked_mul(2).map_or(u32::MAX, |shifted| shifted | *flag as u32)
            }
        };
        if arg > MAX_INT_OPERAND {
            return Err(Error::invalid_operand(
                instr.descriptor().name(),
                format!("encoded argument {arg} is outside 0..=2147483647"),
            ));
        }
        Ok(arg)
    }

    fn literal(&mut self, literal: &Literal) -> u32 {
        let key = literal.content_key();
        if let Some(&index) = self.literals.get(&key) {
            return index;
        }
        let index = self.meta.literals.len() as u32;
        self.meta.literals.push(literal.clone());
        self.literals.insert(key, index);
        index
    }

    fn closure(&self, instr: &Instruction<'_>, var: &VariableRef) -> Result<u32> {
        let (table, base, what) = match var.kind {
            VarKind::Cell => (&self.meta.cellvars, 0, "cellvars"),
            _ => (&self.meta.freevars, self.meta.cellvars.len(), "freevars"),
        };
        table
            .iter()
            .position(|name| *name == var.name)
            .map(|index| (base + index) as u32)
            .ok_or_else(|| {
                Error::invalid_operand(
                    instr.descriptor().name(),
                    format!("{} is not in {what}", var.name),
                )
            })
    }
}

fn first_indices(names: &[EcoString]) -> HashMap<EcoString, u32> {
    let mut out = HashMap::with_capacity(names.len());
    for (index, name) in names.iter().enumerate() {
        out.entry(name.clone()).or_insert(index as u32);
    }
    out
}

fn intern(table: &mut Vec<EcoString>, index: &mut HashMap<EcoString, u32>, name: &EcoString) -> u32 {
    if let Some(&found) = index.get(name) {
        return found;
    }
    let position = table.len() as u32;
    table.push(name.clone());
    index.insert(name.clone(), position);
    position
}

#[cfg(test)]
#[path = "asm_test.rs"]
mod asm_test;
