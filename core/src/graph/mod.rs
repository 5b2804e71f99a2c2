//! Labels, basic blocks and the control-flow graph.
//!
//! A [`Graph`] owns its blocks in an arena indexed by [`Label`]. Jump operands
//! and try-region markers hold labels, never references, so blocks can be
//! split and reordered without dangling pointers. A label is only meaningful
//! for the graph that created it.

mod stack_depth;

use core::fmt;

use smallvec::SmallVec;
use static_assertions::assert_eq_size;

use crate::errors::{Error, Result};
use crate::instruction::Instruction;
use crate::{Vec, format};

pub use stack_depth::StackInfo;

/// Arena key naming one block of a [`Graph`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

assert_eq_size!(Label, u32);

impl Label {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Identifies a try region so that its [`TryEnd`] can refer back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TryId(u32);

/// Opens a try region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryBegin {
    pub id: TryId,
    /// Block the VM jumps to when an exception is raised inside the region.
    pub target: Label,
    /// Does the VM push the offset of the raising instruction before the
    /// exception?
    pub push_lasti: bool,
    /// Stack depth to unwind to. Computed during assembly when absent.
    pub stack_depth: Option<u32>,
}

/// Closes the try region opened by the [`TryBegin`] with id `entry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryEnd {
    pub entry: TryId,
}

impl TryBegin {
    pub fn end(&self) -> TryEnd {
        TryEnd { entry: self.id }
    }
}

/// One element of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockItem<'isa> {
    Instr(Instruction<'isa>),
    TryBegin(TryBegin),
    TryEnd(TryEnd),
}

impl<'isa> BlockItem<'isa> {
    pub fn as_instruction(&self) -> Option<&Instruction<'isa>> {
        match self {
            BlockItem::Instr(instr) => Some(instr),
            _ => None,
        }
    }
}

impl<'isa> From<Instruction<'isa>> for BlockItem<'isa> {
    fn from(instr: Instruction<'isa>) -> Self {
        BlockItem::Instr(instr)
    }
}

impl From<TryBegin> for BlockItem<'_> {
    fn from(entry: TryBegin) -> Self {
        BlockItem::TryBegin(entry)
    }
}

impl From<TryEnd> for BlockItem<'_> {
    fn from(end: TryEnd) -> Self {
        BlockItem::TryEnd(end)
    }
}

/// A basic block: control enters at the top and leaves at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block<'isa> {
    label: Label,
    items: Vec<BlockItem<'isa>>,
}

impl<'isa> Block<'isa> {
    pub fn label(&self) -> Label {
        self.label
    }

    pub fn items(&self) -> &[BlockItem<'isa>] {
        &self.items
    }

    pub fn push(&mut self, item: impl Into<BlockItem<'isa>>) {
        self.items.push(item.into());
    }

    /// Inserts `item` before position `index`. Panics if `index > len`,
    /// like [`Vec::insert`].
    pub fn insert(&mut self, index: usize, item: impl Into<BlockItem<'isa>>) {
        self.items.insert(index, item.into());
    }

    pub fn remove(&mut self, index: usize) -> Option<BlockItem<'isa>> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut BlockItem<'isa>> {
        self.items.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction<'isa>> {
        self.items.iter().filter_map(BlockItem::as_instruction)
    }

    pub fn last_instruction(&self) -> Option<&Instruction<'isa>> {
        self.items.iter().rev().find_map(BlockItem::as_instruction)
    }

    /// Labels referenced by jump instructions of this block.
    pub fn jump_targets(&self) -> SmallVec<[Label; 2]> {
        self.instructions()
            .filter_map(Instruction::jump_target)
            .collect()
    }

    /// Does control reach the next block after the last item?
    pub fn falls_through(&self) -> bool {
        self.last_instruction().is_none_or(|instr| !instr.is_terminal())
    }
}

/// Position of a block, either by index in iteration order or by label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Index(usize),
    Label(Label),
}

impl From<usize> for BlockRef {
    fn from(index: usize) -> Self {
        BlockRef::Index(index)
    }
}

impl From<Label> for BlockRef {
    fn from(label: Label) -> Self {
        BlockRef::Label(label)
    }
}

/// Ordered basic blocks addressed by label.
///
/// Two graphs are equal when their blocks are equal one by one in iteration
/// order.
#[derive(Debug, Clone, Default)]
pub struct Graph<'isa> {
    /// Arena indexed by `Label`.
    blocks: Vec<Block<'isa>>,
    /// Iteration (layout) order.
    order: Vec<Label>,
    /// Position of each block in `order`, indexed by `Label`.
    positions: Vec<usize>,
    next_try: u32,
}

impl PartialEq for Graph<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for Graph<'_> {}

impl<'isa> Graph<'isa> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new block and returns its label.
    pub fn add_block(&mut self, items: Vec<BlockItem<'isa>>) -> Label {
        let label = self.alloc(items);
        self.positions.push(self.order.len());
        self.order.push(label);
        label
    }

    fn alloc(&mut self, items: Vec<BlockItem<'isa>>) -> Label {
        let label = Label(self.blocks.len() as u32);
        self.blocks.push(Block { label, items });
        label
    }

    /// Creates a marker opening a new try region that lands on `target`.
    pub fn new_try(&mut self, target: Label, push_lasti: bool) -> TryBegin {
        let id = TryId(self.next_try);
        self.next_try += 1;
        TryBegin {
            id,
            target,
            push_lasti,
            stack_depth: None,
        }
    }

    pub fn contains(&self, label: Label) -> bool {
        label.index() < self.blocks.len()
    }

    pub fn block(&self, label: Label) -> Option<&Block<'isa>> {
        self.blocks.get(label.index())
    }

    pub fn block_mut(&mut self, label: Label) -> Option<&mut Block<'isa>> {
        self.blocks.get_mut(label.index())
    }

    /// Block at position `index` in iteration order.
    pub fn get(&self, index: usize) -> Option<&Block<'isa>> {
        self.label_at(index).and_then(|label| self.block(label))
    }

    pub fn label_at(&self, index: usize) -> Option<Label> {
        self.order.get(index).copied()
    }

    /// Position of `label` in iteration order.
    pub fn position(&self, label: Label) -> Option<usize> {
        self.positions.get(label.index()).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.order.iter().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block<'isa>> {
        self.order.iter().map(|label| &self.blocks[label.index()])
    }

    fn resolve(&self, block: BlockRef) -> Result<usize> {
        match block {
            BlockRef::Index(index) if index < self.order.len() => Ok(index),
            BlockRef::Index(index) => Err(Error::InvalidSplitPoint(format!(
                "block index {index} is out of range ({} blocks)",
                self.order.len()
            ))),
            BlockRef::Label(label) => self.position(label).ok_or_else(|| {
                Error::InvalidSplitPoint(format!("{label} is not a block of this graph"))
            }),
        }
    }

    /// Splits a block so that its item at `index` starts a new block, and
    /// returns the label of that item's block.
    ///
    /// With `index == 0` the existing label is returned and nothing changes.
    /// The original label always stays on the first half.
    pub fn split_block(&mut self, block: impl Into<BlockRef>, index: usize) -> Result<Label> {
        let position = self.resolve(block.into())?;
        let label = self.order[position];
        if index == 0 {
            return Ok(label);
        }

        let len = self.blocks[label.index()].items.len();
        if index >= len {
            return Err(Error::InvalidSplitPoint(format!(
                "index {index} leaves nothing to split in {label} ({len} items)"
            )));
        }

        let tail = self.blocks[label.index()].items.split_off(index);
        let new_label = self.alloc(tail);
        self.positions.push(position + 1);
        self.order.insert(position + 1, new_label);
        for (shifted, label) in self.order.iter().enumerate().skip(position + 2) {
            self.positions[label.index()] = shifted;
        }
        tracing::trace!(from = %label, to = %new_label, index, "split block");
        Ok(new_label)
    }

    /// Blocks control can reach directly from `label`: fall-through, jump
    /// targets and exception handlers of regions opened in the block.
    pub fn successors(&self, label: Label) -> SmallVec<[Label; 4]> {
        let mut out = SmallVec::new();
        let Some(block) = self.block(label) else {
            return out;
        };
        for item in block.items() {
            match item {
                BlockItem::Instr(instr) => {
                    if let Some(target) = instr.jump_target() {
                        out.push(target);
                    }
                }
                BlockItem::TryBegin(entry) => out.push(entry.target),
                BlockItem::TryEnd(_) => {}
            }
        }
        if block.falls_through() {
            let next = self
                .position(label)
                .and_then(|position| self.label_at(position + 1));
            out.extend(next);
        }
        out
    }

    /// Checks that every label used by a jump or a try region names a block
    /// of this graph.
    pub fn check_references(&self) -> Result<()> {
        for block in self.iter() {
            for item in block.items() {
                match item {
                    BlockItem::Instr(instr) => {
                        match instr.jump_target() {
                            Some(target) if !self.contains(target) => {
                                return Err(Error::UnresolvableJump {
                                    name: instr.descriptor().name().clone(),
                                    reason: format!("{target} is not a block of this graph"),
                                });
                            }
                            _ => {}
                        }
                    }
                    BlockItem::TryBegin(entry) => {
                        if !self.contains(entry.target) {
                            return Err(Error::UnmatchedTryRegion(format!(
                                "handler {} is not a block of this graph",
                                entry.target
                            )));
                        }
                    }
                    BlockItem::TryEnd(_) => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod graph_test;
