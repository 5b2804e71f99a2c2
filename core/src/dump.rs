//! Human-readable listing of a graph.
//!
//! Blocks are numbered from 1 in iteration order and jump targets print as
//! `<Block #N>`. Line numbers appear in the left column when they change.
//!
//! ```text
//! Block #1
//!      1  LOAD_NAME x
//!         POP_JUMP_IF_FALSE <Block #3>
//!
//! Block #2
//!      2  LOAD_CONST 1
//!         RETURN_VALUE
//! ```

use core::fmt;

use hashbrown::HashMap;

use crate::String;
use crate::graph::{BlockItem, Graph, Label};
use crate::instruction::Instruction;
use crate::operand::Operand;

/// [`fmt::Display`] adapter returned by [`Graph::dump`].
pub struct GraphDump<'g, 'isa> {
    graph: &'g Graph<'isa>,
}

impl<'isa> Graph<'isa> {
    /// Listing of every block, for debugging.
    pub fn dump(&self) -> GraphDump<'_, 'isa> {
        GraphDump { graph: self }
    }

    /// The listing rendered into a string.
    pub fn dump_string(&self) -> String {
        use crate::ToString;
        self.dump().to_string()
    }
}

impl GraphDump<'_, '_> {
    fn write_instr(
        &self,
        f: &mut fmt::Formatter<'_>,
        numbers: &HashMap<Label, usize>,
        instr: &Instruction<'_>,
    ) -> fmt::Result {
        write!(f, "{}", instr.name())?;
        match instr.operand() {
            Operand::None => Ok(()),
            Operand::Label(label) => {
                write!(f, " ")?;
                write_label(f, numbers, *label)
            }
            operand => write!(f, " {operand}"),
        }
    }
}

fn write_label(f: &mut fmt::Formatter<'_>, numbers: &HashMap<Label, usize>, label: Label) -> fmt::Result {
    match numbers.get(&label) {
        Some(number) => write!(f, "<Block #{number}>"),
        None => write!(f, "<{label}>"),
    }
}

impl fmt::Display for GraphDump<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numbers: HashMap<Label, usize> = self
            .graph
            .labels()
            .enumerate()
            .map(|(index, label)| (label, index + 1))
            .collect();

        let mut line: Option<u32> = None;
        for (index, block) in self.graph.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "Block #{}", index + 1)?;
            for item in block.items() {
                match item {
                    BlockItem::Instr(instr) => {
                        match instr.line() {
                            Some(current) if line != Some(current) => {
                                line = Some(current);
                                write!(f, "  {current:>4}  ")?;
                            }
                            _ => write!(f, "        ")?,
                        }
                        self.write_instr(f, &numbers, instr)?;
                        writeln!(f)?;
                    }
                    BlockItem::TryBegin(entry) => {
                        write!(f, "        TryBegin ")?;
                        write_label(f, &numbers, entry.target)?;
                        if let Some(depth) = entry.stack_depth {
                            write!(f, " depth={depth}")?;
                        }
                        if entry.push_lasti {
                            write!(f, " lasti")?;
                        }
                        writeln!(f)?;
                    }
                    BlockItem::TryEnd(_) => writeln!(f, "        TryEnd")?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use crate::graph::Graph;
    use crate::instruction::Instruction;
    use crate::isa::InstructionSet;
    use crate::operand::{Literal, Operand, VariableRef};
    use crate::vec;

    #[test]
    fn test_dump_numbers_blocks_from_one() {
        let isa = InstructionSet::cpython35();
        let mut graph = Graph::new();
        let entry = graph.add_block(vec![]);
        graph.add_block(vec![
            Instruction::new(&isa, "LOAD_CONST", Literal::Int(1))
                .unwrap()
                .with_line(2)
                .into(),
            Instruction::new(&isa, "RETURN_VALUE", Operand::None)
                .unwrap()
                .with_line(2)
                .into(),
        ]);
        let exit = graph.add_block(vec![
            Instruction::new(&isa, "LOAD_CONST", Literal::None)
                .unwrap()
                .with_line(3)
                .into(),
            Instruction::new(&isa, "RETURN_VALUE", Operand::None)
                .unwrap()
                .into(),
        ]);
        let block = graph.block_mut(entry).unwrap();
        block.push(
            Instruction::new(&isa, "LOAD_NAME", VariableRef::name("x"))
                .unwrap()
                .with_line(1),
        );
        block.push(Instruction::new(&isa, "POP_JUMP_IF_FALSE", exit).unwrap());

        let expected = indoc! {"
            Block #1
                 1  LOAD_NAME x
                    POP_JUMP_IF_FALSE <Block #3>

            Block #2
                 2  LOAD_CONST 1
                    RETURN_VALUE

            Block #3
                 3  LOAD_CONST None
                    RETURN_VALUE
        "};
        assert_eq!(graph.dump_string(), expected);
    }

    #[test]
    fn test_dump_try_markers() {
        let isa = InstructionSet::wordcode();
        let mut graph = Graph::new();
        let body = graph.add_block(vec![]);
        let handler = graph.add_block(vec![
            Instruction::new(&isa, "RERAISE", 0u32).unwrap().into(),
        ]);
        let mut region = graph.new_try(handler, true);
        region.stack_depth = Some(1);
        let block = graph.block_mut(body).unwrap();
        block.push(region.clone());
        block.push(Instruction::new(&isa, "NOP", Operand::None).unwrap());
        block.push(region.end());

        let expected = indoc! {"
            Block #1
                    TryBegin <Block #2> depth=1 lasti
                    NOP
                    TryEnd

            Block #2
                    RERAISE 0
        "};
        assert_eq!(graph.dump_string(), expected);
    }
}
