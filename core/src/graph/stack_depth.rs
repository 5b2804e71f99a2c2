//! Maximum stack depth over the control-flow graph.

use hashbrown::HashMap;

use super::{BlockItem, Graph, Label, TryId};
use crate::errors::{Error, Result};
use crate::instruction::Instruction;
use crate::{Vec, vec};

/// Result of [`Graph::compute_stack_size`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackInfo {
    /// Deepest stack reached on any path.
    pub max: u32,
    /// Stack depth at each reachable `TryBegin`, i.e. the depth the VM unwinds
    /// to before entering the handler.
    pub try_depths: HashMap<TryId, u32>,
}

impl Graph<'_> {
    /// Walks every path from the first block and returns the deepest stack
    /// reached.
    ///
    /// Jumps are followed with their branch-taken effect and the following
    /// instruction with the fall-through effect. Exception handlers are entered
    /// with the depth at their `TryBegin`, plus one for the exception and one
    /// more when the VM pushes the last instruction offset.
    pub fn compute_stack_size(&self) -> Result<StackInfo> {
        let mut info = StackInfo::default();
        let Some(first) = self.label_at(0) else {
            return Ok(info);
        };

        // A depth above the sum of every push in the graph can only come from
        // a loop that grows the stack on each iteration.
        let bound = self.depth_bound()?;
        let mut entry_depth: Vec<Option<i64>> = vec![None; self.blocks.len()];
        let mut worklist: Vec<(Label, i64)> = vec![(first, 0)];
        let mut max: i64 = 0;

        while let Some((label, depth)) = worklist.pop() {
            if !self.contains(label) {
                continue;
            }
            match entry_depth[label.index()] {
                Some(seen) if seen >= depth => continue,
                _ => {}
            }
            if depth > bound {
                return Err(Error::UnboundedStack {
                    block: self.position(label).unwrap_or(label.index()),
                });
            }
            entry_depth[label.index()] = Some(depth);
            max = max.max(depth);

            let mut depth = depth;
            let mut falls_through = true;
            for item in self.blocks[label.index()].items() {
                let instr = match item {
                    BlockItem::Instr(instr) => instr,
                    BlockItem::TryBegin(entry) => {
                        let recorded = info.try_depths.entry(entry.id).or_insert(0);
                        *recorded = (*recorded).max(depth as u32);
                        let handler = depth + 1 + entry.push_lasti as i64;
                        max = max.max(handler);
                        worklist.push((entry.target, handler));
                        continue;
                    }
                    BlockItem::TryEnd(_) => continue,
                };

                if let Some(target) = instr.jump_target() {
                    let taken = self.apply(instr, label, depth, Some(true))?;
                    max = max.max(taken);
                    worklist.push((target, taken));
                    if instr.is_terminal() {
                        falls_through = false;
                        break;
                    }
                    depth = self.apply(instr, label, depth, Some(false))?;
                } else {
                    depth = self.apply(instr, label, depth, None)?;
                    if instr.is_terminal() {
                        falls_through = false;
                        break;
                    }
                }
                max = max.max(depth);
            }

            if falls_through {
                let next = self
                    .position(label)
                    .and_then(|position| self.label_at(position + 1));
                if let Some(next) = next {
                    worklist.push((next, depth));
                }
            }
        }

        info.max = u32::try_from(max).unwrap_or(u32::MAX);
        tracing::debug!(max = info.max, regions = info.try_depths.len(), "computed stack size");
        Ok(info)
    }

    /// Depth after `instr`, checking that its inputs are present.
    fn apply(
        &self,
        instr: &Instruction<'_>,
        label: Label,
        depth: i64,
        jump: Option<bool>,
    ) -> Result<i64> {
        let (pre, post) = instr.pre_and_post_effect(jump)?;
        if depth + pre < 0 {
            return Err(Error::StackUnderflow {
                name: instr.descriptor().name().clone(),
                block: self.position(label).unwrap_or(label.index()),
                depth,
                pops: -pre,
            });
        }
        Ok(depth + pre + post)
    }

    fn depth_bound(&self) -> Result<i64> {
        let mut bound: i64 = 0;
        for block in self.iter() {
            for item in block.items() {
                match item {
                    BlockItem::Instr(instr) => {
                        let (taken, not_taken) = if instr.is_jump() {
                            (instr.stack_effect(Some(true))?, instr.stack_effect(Some(false))?)
                        } else {
                            let effect = instr.stack_effect(None)?;
                            (effect, effect)
                        };
                        let (_, post) = instr.pre_and_post_effect(if instr.is_jump() {
                            Some(false)
                        } else {
                            None
                        })?;
                        bound += taken.max(not_taken).max(post).max(0);
                    }
                    BlockItem::TryBegin(_) => bound += 2,
                    BlockItem::TryEnd(_) => {}
                }
            }
        }
        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::errors::Error;
    use crate::graph::{BlockItem, Graph};
    use crate::instruction::Instruction;
    use crate::isa::InstructionSet;
    use crate::operand::{Literal, Operand, VariableRef};

    #[test]
    fn test_straight_line() {
        let isa = InstructionSet::cpython35();
        let mut graph = Graph::new();
        graph.add_block(vec![
            Instruction::new(&isa, "LOAD_CONST", Literal::Int(1)).unwrap().into(),
            Instruction::new(&isa, "LOAD_CONST", Literal::Int(2)).unwrap().into(),
            Instruction::new(&isa, "LOAD_CONST", Literal::Int(3)).unwrap().into(),
            Instruction::new(&isa, "BUILD_TUPLE", 3u32).unwrap().into(),
            Instruction::new(&isa, "RETURN_VALUE", Operand::None).unwrap().into(),
        ]);
        assert_eq!(graph.compute_stack_size().unwrap().max, 3);
    }

    #[test]
    fn test_empty_graph() {
        let graph = Graph::new();
        assert_eq!(graph.compute_stack_size().unwrap().max, 0);
    }

    #[test]
    fn test_underflow_is_reported() {
        let isa = InstructionSet::cpython35();
        let mut graph = Graph::new();
        graph.add_block(vec![
            Instruction::new(&isa, "POP_TOP", Operand::None).unwrap().into(),
        ]);
        assert!(matches!(
            graph.compute_stack_size(),
            Err(Error::StackUnderflow { block: 0, depth: 0, pops: 1, .. })
        ));
    }

    #[test]
    fn test_list_extend_needs_list_and_iterable() {
        let isa = InstructionSet::wordcode();
        let mut graph = Graph::new();
        graph.add_block(vec![
            Instruction::new(&isa, "BUILD_LIST", 0u32).unwrap().into(),
            Instruction::new(&isa, "LIST_EXTEND", 1u32).unwrap().into(),
            Instruction::new(&isa, "RETURN_VALUE", Operand::None).unwrap().into(),
        ]);
        assert!(matches!(
            graph.compute_stack_size(),
            Err(Error::StackUnderflow { block: 0, depth: 1, pops: 2, .. })
        ));

        let mut graph = Graph::new();
        graph.add_block(vec![
            Instruction::new(&isa, "BUILD_LIST", 0u32).unwrap().into(),
            Instruction::new(&isa, "LOAD_NAME", VariableRef::name("xs")).unwrap().into(),
            Instruction::new(&isa, "LIST_EXTEND", 1u32).unwrap().into(),
            Instruction::new(&isa, "RETURN_VALUE", Operand::None).unwrap().into(),
        ]);
        assert_eq!(graph.compute_stack_size().unwrap().max, 2);
    }

    #[test]
    fn test_loop_with_for_iter() {
        let isa = InstructionSet::cpython35();
        let mut graph = Graph::new();
        let setup = graph.add_block(vec![]);
        let head = graph.add_block(vec![]);
        let body = graph.add_block(vec![]);
        let exit = graph.add_block(vec![]);

        let block = graph.block_mut(setup).unwrap();
        block.push(Instruction::new(&isa, "LOAD_NAME", VariableRef::name("xs")).unwrap());
        block.push(Instruction::new(&isa, "GET_ITER", Operand::None).unwrap());

        graph
            .block_mut(head)
            .unwrap()
            .push(Instruction::new(&isa, "FOR_ITER", exit).unwrap());

        let block = graph.block_mut(body).unwrap();
        block.push(Instruction::new(&isa, "STORE_NAME", VariableRef::name("x")).unwrap());
        block.push(Instruction::new(&isa, "JUMP_ABSOLUTE", head).unwrap());

        let block = graph.block_mut(exit).unwrap();
        block.push(Instruction::new(&isa, "LOAD_CONST", Literal::None).unwrap());
        block.push(Instruction::new(&isa, "RETURN_VALUE", Operand::None).unwrap());

        assert_eq!(graph.compute_stack_size().unwrap().max, 2);
    }

    #[test]
    fn test_growing_loop_is_unbounded() {
        let isa = InstructionSet::cpython35();
        let mut graph = Graph::new();
        let head = graph.add_block(vec![]);
        let block = graph.block_mut(head).unwrap();
        block.push(Instruction::new(&isa, "LOAD_CONST", Literal::None).unwrap());
        block.push(Instruction::new(&isa, "JUMP_ABSOLUTE", head).unwrap());
        assert!(matches!(
            graph.compute_stack_size(),
            Err(Error::UnboundedStack { block: 0 })
        ));
    }

    #[test]
    fn test_handler_depth() {
        let isa = InstructionSet::wordcode();
        let mut graph = Graph::new();
        let body = graph.add_block(vec![]);
        let handler = graph.add_block(vec![]);
        let entry = graph.new_try(handler, true);
        let id = entry.id;

        let block = graph.block_mut(body).unwrap();
        block.push(Instruction::new(&isa, "LOAD_CONST", Literal::Int(1)).unwrap());
        block.push(BlockItem::TryBegin(entry.clone()));
        block.push(Instruction::new(&isa, "LOAD_CONST", Literal::Int(2)).unwrap());
        block.push(Instruction::new(&isa, "BINARY_OP", 0u32).unwrap());
        block.push(entry.end());
        block.push(Instruction::new(&isa, "RETURN_VALUE", Operand::None).unwrap());

        let block = graph.block_mut(handler).unwrap();
        block.push(Instruction::new(&isa, "POP_TOP", Operand::None).unwrap());
        block.push(Instruction::new(&isa, "POP_TOP", Operand::None).unwrap());
        block.push(Instruction::new(&isa, "RETURN_VALUE", Operand::None).unwrap());

        let info = graph.compute_stack_size().unwrap();
        assert_eq!(info.try_depths.get(&id), Some(&1));
        // handler entry: 1 + exception + lasti
        assert_eq!(info.max, 3);
    }
}
