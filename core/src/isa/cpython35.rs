//! CPython 3.5 opcode table.

use super::{
    CodeFormat, InstructionSet, OpcodeDescriptor, OpcodeFlags, OperandCategory as C,
    PrePostEffect as P, StackEffect as E,
};

const EXTENDED_ARG: u8 = 144;

fn op(name: &'static str, code: u8, category: C, effect: i32) -> OpcodeDescriptor {
    OpcodeDescriptor::new(name, code, category).with_effect(E::Fixed(effect))
}

/// Unary operator: pops one operand, pushes one result.
fn unary(name: &'static str, code: u8) -> OpcodeDescriptor {
    op(name, code, C::None, 0).with_pre_post(P::Static(-1, 1))
}

/// Binary or in-place operator: pops two operands, pushes one result.
fn binary(name: &'static str, code: u8) -> OpcodeDescriptor {
    op(name, code, C::None, -1).with_pre_post(P::Static(-2, 1))
}

fn builder(name: &'static str, code: u8, effect: E) -> OpcodeDescriptor {
    OpcodeDescriptor::new(name, code, C::Int)
        .with_effect(effect)
        .with_pre_post(P::Produce)
}

pub(super) fn build() -> InstructionSet {
    let collection = E::Linear { base: 1, scale: -1 };
    let setup_try = E::Branch {
        taken: 6,
        not_taken: 0,
    };

    let opcodes = [
        op("POP_TOP", 1, C::None, -1),
        op("ROT_TWO", 2, C::None, 0).with_pre_post(P::Static(-2, 2)),
        op("ROT_THREE", 3, C::None, 0).with_pre_post(P::Static(-3, 3)),
        op("DUP_TOP", 4, C::None, 1).with_pre_post(P::Static(-1, 2)),
        op("DUP_TOP_TWO", 5, C::None, 2).with_pre_post(P::Static(-2, 4)),
        op("NOP", 9, C::None, 0),
        unary("UNARY_POSITIVE", 10),
        unary("UNARY_NEGATIVE", 11),
        unary("UNARY_NOT", 12),
        unary("UNARY_INVERT", 15),
        binary("BINARY_MATRIX_MULTIPLY", 16),
        binary("INPLACE_MATRIX_MULTIPLY", 17),
        binary("BINARY_POWER", 19),
        binary("BINARY_MULTIPLY", 20),
        binary("BINARY_MODULO", 22),
        binary("BINARY_ADD", 23),
        binary("BINARY_SUBTRACT", 24),
        binary("BINARY_SUBSCR", 25),
        binary("BINARY_FLOOR_DIVIDE", 26),
        binary("BINARY_TRUE_DIVIDE", 27),
        binary("INPLACE_FLOOR_DIVIDE", 28),
        binary("INPLACE_TRUE_DIVIDE", 29),
        unary("GET_AITER", 50),
        op("GET_ANEXT", 51, C::None, 1).with_pre_post(P::Static(-1, 2)),
        op("BEFORE_ASYNC_WITH", 52, C::None, 1).with_pre_post(P::Static(-1, 2)),
        binary("INPLACE_ADD", 55),
        binary("INPLACE_SUBTRACT", 56),
        binary("INPLACE_MULTIPLY", 57),
        binary("INPLACE_MODULO", 59),
        op("STORE_SUBSCR", 60, C::None, -3),
        op("DELETE_SUBSCR", 61, C::None, -2),
        binary("BINARY_LSHIFT", 62),
        binary("BINARY_RSHIFT", 63),
        binary("BINARY_AND", 64),
        binary("BINARY_XOR", 65),
        binary("BINARY_OR", 66),
        binary("INPLACE_POWER", 67),
        unary("GET_ITER", 68),
        unary("GET_YIELD_FROM_ITER", 69),
        op("PRINT_EXPR", 70, C::None, -1),
        op("LOAD_BUILD_CLASS", 71, C::None, 1),
        op("YIELD_FROM", 72, C::None, -1).with_pre_post(P::Static(-2, 1)),
        unary("GET_AWAITABLE", 73),
        binary("INPLACE_LSHIFT", 75),
        binary("INPLACE_RSHIFT", 76),
        binary("INPLACE_AND", 77),
        binary("INPLACE_XOR", 78),
        binary("INPLACE_OR", 79),
        op("BREAK_LOOP", 80, C::None, 0).with_flags(OpcodeFlags::TERMINAL),
        op("WITH_CLEANUP_START", 81, C::None, 1),
        op("WITH_CLEANUP_FINISH", 82, C::None, -1),
        op("RETURN_VALUE", 83, C::None, -1).with_flags(OpcodeFlags::TERMINAL),
        op("IMPORT_STAR", 84, C::None, -1),
        unary("YIELD_VALUE", 86),
        op("POP_BLOCK", 87, C::None, 0),
        op("END_FINALLY", 88, C::None, -1),
        op("POP_EXCEPT", 89, C::None, 0),
        op("STORE_NAME", 90, C::Name, -1),
        op("DELETE_NAME", 91, C::Name, 0),
        OpcodeDescriptor::new("UNPACK_SEQUENCE", 92, C::Int)
            .with_effect(E::Linear { base: -1, scale: 1 })
            .with_pre_post(P::Unpack),
        OpcodeDescriptor::new("FOR_ITER", 93, C::JumpRelative)
            .with_flags(OpcodeFlags::CONDITIONAL)
            .with_effect(E::Branch {
                taken: -1,
                not_taken: 1,
            })
            .with_pre_post(P::Iterate),
        OpcodeDescriptor::new("UNPACK_EX", 94, C::Int)
            .with_effect(E::UnpackEx)
            .with_pre_post(P::Unpack),
        op("STORE_ATTR", 95, C::Name, -2),
        op("DELETE_ATTR", 96, C::Name, -1),
        op("STORE_GLOBAL", 97, C::Name, -1),
        op("DELETE_GLOBAL", 98, C::Name, 0),
        op("LOAD_CONST", 100, C::Literal, 1),
        op("LOAD_NAME", 101, C::Name, 1),
        builder("BUILD_TUPLE", 102, collection),
        builder("BUILD_LIST", 103, collection),
        builder("BUILD_SET", 104, collection),
        builder("BUILD_MAP", 105, E::Linear { base: 1, scale: -2 }),
        op("LOAD_ATTR", 106, C::Name, 0).with_pre_post(P::Static(-1, 1)),
        op("COMPARE_OP", 107, C::Compare, -1).with_pre_post(P::Static(-2, 1)),
        op("IMPORT_NAME", 108, C::Name, -1).with_pre_post(P::Static(-2, 1)),
        op("IMPORT_FROM", 109, C::Name, 1).with_pre_post(P::Static(-1, 2)),
        op("JUMP_FORWARD", 110, C::JumpRelative, 0).with_flags(OpcodeFlags::UNCONDITIONAL),
        OpcodeDescriptor::new("JUMP_IF_FALSE_OR_POP", 111, C::JumpAbsolute)
            .with_flags(OpcodeFlags::CONDITIONAL)
            .with_effect(E::Branch {
                taken: 0,
                not_taken: -1,
            }),
        OpcodeDescriptor::new("JUMP_IF_TRUE_OR_POP", 112, C::JumpAbsolute)
            .with_flags(OpcodeFlags::CONDITIONAL)
            .with_effect(E::Branch {
                taken: 0,
                not_taken: -1,
            }),
        op("JUMP_ABSOLUTE", 113, C::JumpAbsolute, 0).with_flags(OpcodeFlags::UNCONDITIONAL),
        op("POP_JUMP_IF_FALSE", 114, C::JumpAbsolute, -1).with_flags(OpcodeFlags::CONDITIONAL),
        op("POP_JUMP_IF_TRUE", 115, C::JumpAbsolute, -1).with_flags(OpcodeFlags::CONDITIONAL),
        op("LOAD_GLOBAL", 116, C::Name, 1),
        op("CONTINUE_LOOP", 119, C::JumpAbsolute, 0).with_flags(OpcodeFlags::TERMINAL),
        op("SETUP_LOOP", 120, C::JumpRelative, 0),
        OpcodeDescriptor::new("SETUP_EXCEPT", 121, C::JumpRelative).with_effect(setup_try),
        OpcodeDescriptor::new("SETUP_FINALLY", 122, C::JumpRelative).with_effect(setup_try),
        op("LOAD_FAST", 124, C::Local, 1),
        op("STORE_FAST", 125, C::Local, -1),
        op("DELETE_FAST", 126, C::Local, 0),
        OpcodeDescriptor::new("RAISE_VARARGS", 130, C::Int)
            .with_flags(OpcodeFlags::TERMINAL)
            .with_effect(E::Linear { base: 0, scale: -1 }),
        builder("CALL_FUNCTION", 131, E::CallArgs { base: 0 }),
        builder("MAKE_FUNCTION", 132, E::MakeFunction { base: -1 }),
        builder("BUILD_SLICE", 133, E::BuildSlice),
        builder("MAKE_CLOSURE", 134, E::MakeFunction { base: -2 }),
        op("LOAD_CLOSURE", 135, C::Free, 1),
        op("LOAD_DEREF", 136, C::Free, 1),
        op("STORE_DEREF", 137, C::Free, -1),
        op("DELETE_DEREF", 138, C::Free, 0),
        builder("CALL_FUNCTION_VAR", 140, E::CallArgs { base: -1 }),
        builder("CALL_FUNCTION_KW", 141, E::CallArgs { base: -1 }),
        builder("CALL_FUNCTION_VAR_KW", 142, E::CallArgs { base: -2 }),
        OpcodeDescriptor::new("SETUP_WITH", 143, C::JumpRelative).with_effect(E::Branch {
            taken: 6,
            not_taken: 1,
        }),
        op("EXTENDED_ARG", EXTENDED_ARG, C::Int, 0),
        op("LIST_APPEND", 145, C::Int, -1).with_pre_post(P::Collect { remaining: -1 }),
        op("SET_ADD", 146, C::Int, -1).with_pre_post(P::Collect { remaining: -1 }),
        op("MAP_ADD", 147, C::Int, -2).with_pre_post(P::Collect { remaining: -2 }),
        op("LOAD_CLASSDEREF", 148, C::Free, 1),
        builder("BUILD_LIST_UNPACK", 149, collection),
        builder("BUILD_MAP_UNPACK", 150, collection),
        builder("BUILD_MAP_UNPACK_WITH_CALL", 151, E::LowByteCount { base: 1 }),
        builder("BUILD_TUPLE_UNPACK", 152, collection),
        builder("BUILD_SET_UNPACK", 153, collection),
        OpcodeDescriptor::new("SETUP_ASYNC_WITH", 154, C::JumpRelative).with_effect(E::Branch {
            taken: 5,
            not_taken: 0,
        }),
    ];

    // The table above is fixed, so a failure here is a bug in the table itself.
    match InstructionSet::builder("cpython35", CodeFormat::classic())
        .opcodes(opcodes)
        .extended_arg(EXTENDED_ARG)
        .exception_table(false)
        .build()
    {
        Ok(isa) => isa,
        Err(err) => panic!("built-in cpython35 table is inconsistent: {err}"),
    }
}
