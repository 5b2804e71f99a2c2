//! Tests for the disassembler: block discovery, operand rebuilding and the
//! errors raised on malformed input.

use alloc::collections::BTreeMap;

use pretty_assertions::assert_eq;

use crate::{
    asm::Assembler,
    codec::{CodeMeta, CodeUnit},
    disasm::Disassembler,
    errors::Error,
    graph::{BlockItem, Graph},
    instruction::Instruction,
    isa::InstructionSet,
    operand::{Compare, Literal, Operand, VariableRef},
    vec,
};

fn raw<'isa>(isa: &'isa InstructionSet, code: &[u8], meta: &CodeMeta) -> crate::Result<Graph<'isa>> {
    Disassembler::new(isa)
        .disassemble_raw(code, &BTreeMap::new(), meta, &[])
        .map(|disassembly| disassembly.graph)
}

fn names(graph: &Graph<'_>, index: usize) -> Vec<String> {
    graph
        .get(index)
        .unwrap()
        .instructions()
        .map(|instr| instr.to_string())
        .collect()
}

#[test]
fn test_blocks_split_at_targets_and_after_jumps() {
    let isa = InstructionSet::cpython35();
    let meta = CodeMeta {
        literals: vec![Literal::Int(1), Literal::Int(2), Literal::None],
        ..CodeMeta::default()
    };
    let code = [100, 0, 0, 114, 10, 0, 100, 1, 0, 83, 100, 2, 0, 83];
    let graph = raw(&isa, &code, &meta).unwrap();

    assert_eq!(graph.len(), 3);
    assert_eq!(names(&graph, 0), vec!["LOAD_CONST 1", "POP_JUMP_IF_FALSE L2"]);
    assert_eq!(names(&graph, 1), vec!["LOAD_CONST 2", "RETURN_VALUE"]);
    assert_eq!(names(&graph, 2), vec!["LOAD_CONST None", "RETURN_VALUE"]);

    let jump = graph.get(0).unwrap().last_instruction().unwrap();
    assert_eq!(jump.jump_target(), graph.label_at(2));
}

#[test]
fn test_code_after_return_starts_a_block() {
    let isa = InstructionSet::wordcode();
    let meta = CodeMeta {
        literals: vec![Literal::None],
        ..CodeMeta::default()
    };
    let graph = raw(&isa, &[100, 0, 83, 0, 9, 0, 100, 0, 83, 0], &meta).unwrap();
    assert_eq!(graph.len(), 2);
    assert_eq!(names(&graph, 1), vec!["NOP", "LOAD_CONST None", "RETURN_VALUE"]);
}

#[test]
fn test_extended_arg_is_folded_into_the_operand() {
    let isa = InstructionSet::cpython35();
    // 70000 = 0x1_1170
    let graph = raw(&isa, &[144, 1, 0, 102, 0x70, 0x11], &CodeMeta::default()).unwrap();
    let instrs: Vec<&Instruction<'_>> = graph.get(0).unwrap().instructions().collect();
    assert_eq!(instrs.len(), 1);
    assert_eq!(instrs[0].name(), "BUILD_TUPLE");
    assert_eq!(instrs[0].operand(), &Operand::Int(70_000));
}

#[test]
fn test_wordcode_prefix_chain() {
    let isa = InstructionSet::wordcode();
    // 0x01_0203 through two prefixes
    let graph = raw(&isa, &[144, 1, 144, 2, 102, 3], &CodeMeta::default()).unwrap();
    let instr = graph.get(0).unwrap().last_instruction().unwrap();
    assert_eq!(instr.operand(), &Operand::Int(0x01_0203));
}

#[test]
fn test_operands_are_rebuilt_from_tables() {
    let isa = InstructionSet::wordcode();
    let meta = CodeMeta {
        names: vec!["print".into()],
        varnames: vec!["x".into()],
        cellvars: vec!["c".into()],
        freevars: vec!["f".into()],
        ..CodeMeta::default()
    };
    let code = [116, 1, 124, 0, 137, 0, 137, 1, 107, 2];
    let graph = raw(&isa, &code, &meta).unwrap();
    let operands: Vec<Operand> = graph
        .get(0)
        .unwrap()
        .instructions()
        .map(|instr| instr.operand().clone())
        .collect();
    assert_eq!(
        operands,
        vec![
            Operand::Flagged(true, "print".into()),
            VariableRef::local("x").into(),
            VariableRef::cell("c").into(),
            VariableRef::free("f").into(),
            Compare::Eq.into(),
        ]
    );
}

#[test]
fn test_malformed_encodings() {
    let isa = InstructionSet::cpython35();
    let meta = CodeMeta::default();
    let cases: [&[u8]; 7] = [
        // trailing prefix
        &[144, 0, 0],
        // truncated operand
        &[100, 0],
        // undefined opcode
        &[0],
        // prefix before an opcode without operand
        &[144, 1, 0, 9],
        // jump into the middle of an instruction
        &[113, 1, 0, 9],
        // jump past the end
        &[113, 10, 0],
        // literal index outside the pool
        &[100, 0, 0],
    ];
    for code in cases {
        assert!(
            matches!(raw(&isa, code, &meta), Err(Error::MalformedEncoding { .. })),
            "{code:?} should be rejected"
        );
    }
}

#[test]
fn test_exception_table_without_support_is_malformed() {
    let isa = InstructionSet::cpython35();
    let unit = CodeUnit {
        code: vec![9],
        exception_table: vec![0x80, 1, 0, 0],
        ..CodeUnit::default()
    };
    assert!(matches!(
        Disassembler::new(&isa).disassemble(&unit),
        Err(Error::MalformedEncoding { .. })
    ));
}

#[test]
fn test_lines_follow_the_line_table() {
    let isa = InstructionSet::cpython35();
    let meta = CodeMeta {
        literals: vec![Literal::Int(1), Literal::None],
        first_line: 1,
        ..CodeMeta::default()
    };
    let unit = CodeUnit {
        meta,
        code: vec![100, 0, 0, 1, 9, 100, 1, 0, 83],
        line_table: vec![3, 1, 2, 2],
        exception_table: vec![],
    };
    let disassembly = Disassembler::new(&isa).disassemble(&unit).unwrap();
    let lines: Vec<Option<u32>> = disassembly
        .graph
        .iter()
        .flat_map(|block| block.instructions())
        .map(Instruction::line)
        .collect();
    assert_eq!(lines, vec![Some(1), Some(2), Some(2), Some(4), Some(4)]);
    assert_eq!(disassembly.meta, unit.meta);
}

#[test]
fn test_try_region_markers_sit_at_block_edges() {
    let isa = InstructionSet::wordcode();
    let mut graph = Graph::new();
    let body = graph.add_block(vec![]);
    let handler = graph.add_block(vec![
        Instruction::new(&isa, "POP_TOP", Operand::None).unwrap().into(),
        Instruction::new(&isa, "LOAD_CONST", Literal::None).unwrap().into(),
        Instruction::new(&isa, "RETURN_VALUE", Operand::None).unwrap().into(),
    ]);
    let region = graph.new_try(handler, true);
    let block = graph.block_mut(body).unwrap();
    block.push(region.clone());
    block.push(Instruction::new(&isa, "NOP", Operand::None).unwrap());
    block.push(Instruction::new(&isa, "LOAD_CONST", Literal::Int(1)).unwrap());
    block.push(Instruction::new(&isa, "POP_TOP", Operand::None).unwrap());
    block.push(region.end());
    block.push(Instruction::new(&isa, "LOAD_CONST", Literal::None).unwrap());
    block.push(Instruction::new(&isa, "RETURN_VALUE", Operand::None).unwrap());

    let unit = Assembler::new(&isa).assemble(&graph, &CodeMeta::default()).unwrap();
    let disassembly = Disassembler::new(&isa).disassemble(&unit).unwrap();
    let decoded = &disassembly.graph;
    assert_eq!(decoded.len(), 3);

    let first = decoded.get(0).unwrap().items();
    let BlockItem::TryBegin(entry) = &first[0] else {
        panic!("expected a try marker first, got {:?}", first[0]);
    };
    assert_eq!(entry.target, decoded.label_at(2).unwrap());
    assert_eq!(entry.stack_depth, Some(0));
    assert!(entry.push_lasti);
    assert_eq!(first.last(), Some(&BlockItem::TryEnd(entry.end())));
    assert_eq!(names(decoded, 1), vec!["LOAD_CONST None", "RETURN_VALUE"]);

    let again = Assembler::new(&isa).assemble(decoded, &disassembly.meta).unwrap();
    assert_eq!(again, unit);
}

#[test]
fn test_jump_to_the_end_opens_an_empty_block() {
    let isa = InstructionSet::cpython35();
    let meta = CodeMeta {
        literals: vec![Literal::Int(1)],
        ..CodeMeta::default()
    };
    let graph = raw(&isa, &[100, 0, 0, 114, 6, 0], &meta).unwrap();
    assert_eq!(graph.len(), 2);
    assert_eq!(names(&graph, 0), vec!["LOAD_CONST 1", "POP_JUMP_IF_FALSE L1"]);
    assert!(graph.get(1).unwrap().is_empty());

    // One unit past the end is still rejected.
    assert!(matches!(
        raw(&isa, &[100, 0, 0, 114, 7, 0], &meta),
        Err(Error::MalformedEncoding { .. })
    ));
}

#[test]
fn test_empty_code() {
    let isa = InstructionSet::wordcode();
    let graph = raw(&isa, &[], &CodeMeta::default()).unwrap();
    assert!(graph.is_empty());
}
