//! Tests for graph editing: splitting, successors and reference checks.

use pretty_assertions::assert_eq;

use crate::{
    errors::Error,
    graph::{BlockItem, BlockRef, Graph, Label},
    instruction::Instruction,
    isa::InstructionSet,
    operand::{Literal, Operand, VariableRef},
};

fn load(isa: &InstructionSet, value: i64) -> BlockItem<'_> {
    Instruction::new(isa, "LOAD_CONST", Literal::Int(value))
        .unwrap()
        .into()
}

fn items_of<'a, 'isa>(graph: &'a Graph<'isa>, label: Label) -> &'a [BlockItem<'isa>] {
    graph.block(label).unwrap().items()
}

#[test]
fn test_split_at_zero_is_a_no_op() {
    let isa = InstructionSet::cpython35();
    let mut graph = Graph::new();
    let label = graph.add_block(vec![load(&isa, 1), load(&isa, 2)]);
    let before = items_of(&graph, label).to_vec();

    assert_eq!(graph.split_block(label, 0).unwrap(), label);
    assert_eq!(graph.split_block(0usize, 0).unwrap(), label);
    assert_eq!(graph.len(), 1);
    assert_eq!(items_of(&graph, label), before.as_slice());
}

#[test]
fn test_split_keeps_label_on_first_half() {
    let isa = InstructionSet::cpython35();
    let mut graph = Graph::new();
    let first = graph.add_block(vec![load(&isa, 1), load(&isa, 2), load(&isa, 3)]);
    let last = graph.add_block(vec![
        Instruction::new(&isa, "RETURN_VALUE", Operand::None)
            .unwrap()
            .into(),
    ]);
    let original = items_of(&graph, first).to_vec();

    let second = graph.split_block(first, 1).unwrap();
    assert_ne!(second, first);
    assert_eq!(graph.labels().collect::<Vec<_>>(), vec![first, second, last]);
    assert_eq!(graph.position(second), Some(1));
    assert_eq!(graph.label_at(2), Some(last));

    let mut joined = items_of(&graph, first).to_vec();
    joined.extend_from_slice(items_of(&graph, second));
    assert_eq!(joined, original);
    assert_eq!(items_of(&graph, first).len(), 1);
}

#[test]
fn test_split_rejects_out_of_range() {
    let isa = InstructionSet::cpython35();
    let mut graph = Graph::new();
    let label = graph.add_block(vec![load(&isa, 1), load(&isa, 2)]);

    assert!(matches!(
        graph.split_block(label, 2),
        Err(Error::InvalidSplitPoint(_))
    ));
    assert!(matches!(
        graph.split_block(BlockRef::Index(3), 1),
        Err(Error::InvalidSplitPoint(_))
    ));

    let mut other = Graph::new();
    other.add_block(vec![]);
    let foreign = other.add_block(vec![]);
    assert!(matches!(
        graph.split_block(foreign, 1),
        Err(Error::InvalidSplitPoint(_))
    ));
    assert_eq!(graph.len(), 1);
}

#[test]
fn test_return_only_block_has_no_jump_targets() {
    let isa = InstructionSet::cpython35();
    let mut graph = Graph::new();
    let label = graph.add_block(vec![
        Instruction::new(&isa, "RETURN_VALUE", Operand::None)
            .unwrap()
            .into(),
    ]);
    graph.add_block(vec![load(&isa, 1)]);

    let block = graph.block(label).unwrap();
    assert!(block.jump_targets().is_empty());
    assert!(!block.falls_through());
    assert!(graph.successors(label).is_empty());
}

#[test]
fn test_successors() {
    let isa = InstructionSet::cpython35();
    let mut graph = Graph::new();
    let entry = graph.add_block(vec![]);
    let middle = graph.add_block(vec![load(&isa, 1)]);
    let exit = graph.add_block(vec![]);
    let handler = graph.add_block(vec![]);

    let region = graph.new_try(handler, false);
    let block = graph.block_mut(entry).unwrap();
    block.push(region.clone());
    block.push(Instruction::new(&isa, "LOAD_NAME", VariableRef::name("x")).unwrap());
    block.push(region.end());
    block.push(Instruction::new(&isa, "POP_JUMP_IF_TRUE", exit).unwrap());

    assert_eq!(graph.successors(entry).as_slice(), &[handler, exit, middle]);
    assert_eq!(graph.successors(middle).as_slice(), &[exit]);
}

#[test]
fn test_check_references() {
    let isa = InstructionSet::cpython35();
    let mut graph = Graph::new();
    let exit = graph.add_block(vec![]);
    graph.add_block(vec![
        Instruction::new(&isa, "JUMP_ABSOLUTE", exit).unwrap().into(),
    ]);
    assert!(graph.check_references().is_ok());

    let mut bigger = Graph::new();
    for _ in 0..4 {
        bigger.add_block(vec![]);
    }
    let foreign = bigger.label_at(3).unwrap();
    graph.add_block(vec![
        Instruction::new(&isa, "JUMP_ABSOLUTE", foreign).unwrap().into(),
    ]);
    assert!(matches!(
        graph.check_references(),
        Err(Error::UnresolvableJump { .. })
    ));
}

#[test]
fn test_block_editing() {
    let isa = InstructionSet::cpython35();
    let mut graph = Graph::new();
    let label = graph.add_block(vec![load(&isa, 1)]);

    let block = graph.block_mut(label).unwrap();
    block.insert(0, Instruction::new(&isa, "NOP", Operand::None).unwrap());
    block.push(Instruction::new(&isa, "RETURN_VALUE", Operand::None).unwrap());
    assert_eq!(block.len(), 3);
    assert!(block.remove(0).is_some());
    assert!(block.remove(5).is_none());

    let names: Vec<&str> = graph
        .block(label)
        .unwrap()
        .instructions()
        .map(Instruction::name)
        .collect();
    assert_eq!(names, vec!["LOAD_CONST", "RETURN_VALUE"]);
    assert_eq!(
        graph.block(label).unwrap().last_instruction().map(Instruction::name),
        Some("RETURN_VALUE")
    );
}

#[test]
fn test_positions_follow_splits() {
    let isa = InstructionSet::cpython35();
    let mut graph = Graph::new();
    let first = graph.add_block(vec![load(&isa, 1), load(&isa, 2), load(&isa, 3)]);
    let middle = graph.add_block(vec![load(&isa, 4), load(&isa, 5)]);
    let last = graph.add_block(vec![load(&isa, 6)]);

    let a = graph.split_block(first, 1).unwrap();
    let b = graph.split_block(a, 1).unwrap();
    let c = graph.split_block(middle, 1).unwrap();

    let order: Vec<Label> = graph.labels().collect();
    assert_eq!(order, vec![first, a, b, middle, c, last]);
    for (index, label) in order.iter().enumerate() {
        assert_eq!(graph.position(*label), Some(index));
        assert_eq!(graph.label_at(index), Some(*label));
    }
    assert_eq!(graph.successors(b).as_slice(), &[middle]);
}

#[test]
fn test_graphs_compare_block_by_block() {
    let isa = InstructionSet::cpython35();
    let build = |value: i64| {
        let mut graph = Graph::new();
        graph.add_block(vec![load(&isa, 1)]);
        graph.add_block(vec![load(&isa, value)]);
        graph
    };

    assert_eq!(build(2), build(2));
    assert_ne!(build(2), build(3));

    let mut split = Graph::new();
    split.add_block(vec![load(&isa, 1), load(&isa, 2)]);
    assert_ne!(split, build(2));
    split.split_block(0usize, 1).unwrap();
    assert_eq!(split, build(2));
}
