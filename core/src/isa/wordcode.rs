//! Wordcode opcode table, modelled on CPython 3.11 without inline caches.
//!
//! Every jump is relative. Forward jumps count from the end of the jump
//! instruction, backward jumps count back from the same point. Exception
//! handling is described by an offset-range table instead of setup opcodes.

use super::{
    CodeFormat, InstructionSet, OpcodeDescriptor, OpcodeFlags as F, OperandCategory as C,
    PrePostEffect as P, StackEffect as E,
};

const EXTENDED_ARG: u8 = 144;

fn op(name: &'static str, code: u8, category: C, effect: i32) -> OpcodeDescriptor {
    OpcodeDescriptor::new(name, code, category).with_effect(E::Fixed(effect))
}

fn op_with(name: &'static str, code: u8, category: C, effect: E) -> OpcodeDescriptor {
    OpcodeDescriptor::new(name, code, category).with_effect(effect)
}

fn forward(name: &'static str, code: u8, flags: F, effect: E) -> OpcodeDescriptor {
    op_with(name, code, C::JumpRelative, effect).with_flags(flags)
}

fn backward(name: &'static str, code: u8, flags: F, effect: i32) -> OpcodeDescriptor {
    op(name, code, C::JumpRelative, effect).with_flags(flags | F::BACKWARD)
}

pub(super) fn build() -> InstructionSet {
    let collection = E::Linear { base: 1, scale: -1 };
    let or_pop = E::Branch {
        taken: 0,
        not_taken: -1,
    };

    let opcodes = [
        op("POP_TOP", 1, C::None, -1),
        op("PUSH_NULL", 2, C::None, 1),
        op("NOP", 9, C::None, 0),
        op("UNARY_POSITIVE", 10, C::None, 0).with_pre_post(P::Static(-1, 1)),
        op("UNARY_NEGATIVE", 11, C::None, 0).with_pre_post(P::Static(-1, 1)),
        op("UNARY_NOT", 12, C::None, 0).with_pre_post(P::Static(-1, 1)),
        op("UNARY_INVERT", 15, C::None, 0).with_pre_post(P::Static(-1, 1)),
        op("BINARY_SUBSCR", 25, C::None, -1).with_pre_post(P::Static(-2, 1)),
        op("GET_LEN", 30, C::None, 1).with_pre_post(P::Static(-1, 2)),
        op("MATCH_MAPPING", 31, C::None, 1).with_pre_post(P::Static(-1, 2)),
        op("MATCH_SEQUENCE", 32, C::None, 1).with_pre_post(P::Static(-1, 2)),
        op("MATCH_KEYS", 33, C::None, 1).with_pre_post(P::Static(-2, 3)),
        op("PUSH_EXC_INFO", 35, C::None, 1).with_pre_post(P::Static(-1, 2)),
        op("CHECK_EXC_MATCH", 36, C::None, 0).with_pre_post(P::Static(-2, 2)),
        op("CHECK_EG_MATCH", 37, C::None, 0).with_pre_post(P::Static(-2, 2)),
        op("WITH_EXCEPT_START", 49, C::None, 1).with_pre_post(P::Static(-4, 5)),
        op("GET_AITER", 50, C::None, 0).with_pre_post(P::Static(-1, 1)),
        op("GET_ANEXT", 51, C::None, 1).with_pre_post(P::Static(-1, 2)),
        op("BEFORE_ASYNC_WITH", 52, C::None, 1).with_pre_post(P::Static(-1, 2)),
        op("BEFORE_WITH", 53, C::None, 1).with_pre_post(P::Static(-1, 2)),
        op("END_ASYNC_FOR", 54, C::None, -2),
        op("STORE_SUBSCR", 60, C::None, -3),
        op("DELETE_SUBSCR", 61, C::None, -2),
        op("GET_ITER", 68, C::None, 0).with_pre_post(P::Static(-1, 1)),
        op("GET_YIELD_FROM_ITER", 69, C::None, 0).with_pre_post(P::Static(-1, 1)),
        op("PRINT_EXPR", 70, C::None, -1),
        op("LOAD_BUILD_CLASS", 71, C::None, 1),
        op("LOAD_ASSERTION_ERROR", 74, C::None, 1),
        op("RETURN_GENERATOR", 75, C::None, 0),
        op("LIST_TO_TUPLE", 82, C::None, 0).with_pre_post(P::Static(-1, 1)),
        op("RETURN_VALUE", 83, C::None, -1).with_flags(F::TERMINAL),
        op("IMPORT_STAR", 84, C::None, -1),
        op("SETUP_ANNOTATIONS", 85, C::None, 0),
        op("YIELD_VALUE", 86, C::None, 0).with_pre_post(P::Static(-1, 1)),
        op("ASYNC_GEN_WRAP", 87, C::None, 0).with_pre_post(P::Static(-1, 1)),
        op("PREP_RERAISE_STAR", 88, C::None, -1).with_pre_post(P::Static(-2, 1)),
        op("POP_EXCEPT", 89, C::None, -1),
        op("STORE_NAME", 90, C::Name, -1),
        op("DELETE_NAME", 91, C::Name, 0),
        op_with("UNPACK_SEQUENCE", 92, C::Int, E::Linear { base: -1, scale: 1 })
            .with_pre_post(P::Unpack),
        forward(
            "FOR_ITER",
            93,
            F::CONDITIONAL,
            E::Branch {
                taken: -1,
                not_taken: 1,
            },
        )
        .with_pre_post(P::Iterate),
        op_with("UNPACK_EX", 94, C::Int, E::UnpackEx).with_pre_post(P::Unpack),
        op("STORE_ATTR", 95, C::Name, -2),
        op("DELETE_ATTR", 96, C::Name, -1),
        op("STORE_GLOBAL", 97, C::Name, -1),
        op("DELETE_GLOBAL", 98, C::Name, 0),
        op("SWAP", 99, C::Int, 0).with_pre_post(P::Reorder),
        op("LOAD_CONST", 100, C::Literal, 1),
        op("LOAD_NAME", 101, C::Name, 1),
        op_with("BUILD_TUPLE", 102, C::Int, collection).with_pre_post(P::Produce),
        op_with("BUILD_LIST", 103, C::Int, collection).with_pre_post(P::Produce),
        op_with("BUILD_SET", 104, C::Int, collection).with_pre_post(P::Produce),
        op_with("BUILD_MAP", 105, C::Int, E::Linear { base: 1, scale: -2 })
            .with_pre_post(P::Produce),
        op("LOAD_ATTR", 106, C::Name, 0).with_pre_post(P::Static(-1, 1)),
        op("COMPARE_OP", 107, C::Compare, -1).with_pre_post(P::Static(-2, 1)),
        op("IMPORT_NAME", 108, C::Name, -1).with_pre_post(P::Static(-2, 1)),
        op("IMPORT_FROM", 109, C::Name, 1).with_pre_post(P::Static(-1, 2)),
        forward("JUMP_FORWARD", 110, F::UNCONDITIONAL, E::Fixed(0)),
        forward("JUMP_IF_FALSE_OR_POP", 111, F::CONDITIONAL, or_pop),
        forward("JUMP_IF_TRUE_OR_POP", 112, F::CONDITIONAL, or_pop),
        forward("POP_JUMP_FORWARD_IF_FALSE", 114, F::CONDITIONAL, E::Fixed(-1)),
        forward("POP_JUMP_FORWARD_IF_TRUE", 115, F::CONDITIONAL, E::Fixed(-1)),
        op_with("LOAD_GLOBAL", 116, C::FlaggedName, E::Linear { base: 1, scale: 1 }),
        op("IS_OP", 117, C::Int, -1).with_pre_post(P::Static(-2, 1)),
        op("CONTAINS_OP", 118, C::Int, -1).with_pre_post(P::Static(-2, 1)),
        op("RERAISE", 119, C::Int, -1).with_flags(F::TERMINAL),
        op("COPY", 120, C::Int, 1).with_pre_post(P::Copy),
        op("BINARY_OP", 122, C::Int, -1).with_pre_post(P::Static(-2, 1)),
        forward(
            "SEND",
            123,
            F::CONDITIONAL,
            E::Branch {
                taken: -1,
                not_taken: 0,
            },
        ),
        op("LOAD_FAST", 124, C::Local, 1),
        op("STORE_FAST", 125, C::Local, -1),
        op("DELETE_FAST", 126, C::Local, 0),
        forward("POP_JUMP_FORWARD_IF_NOT_NONE", 128, F::CONDITIONAL, E::Fixed(-1)),
        forward("POP_JUMP_FORWARD_IF_NONE", 129, F::CONDITIONAL, E::Fixed(-1)),
        op_with("RAISE_VARARGS", 130, C::Int, E::Linear { base: 0, scale: -1 })
            .with_flags(F::TERMINAL),
        op("GET_AWAITABLE", 131, C::Int, 0).with_pre_post(P::Static(-1, 1)),
        op_with("MAKE_FUNCTION", 132, C::Int, E::MakeFunctionFlags { base: 0 })
            .with_pre_post(P::Produce),
        op_with("BUILD_SLICE", 133, C::Int, E::BuildSlice).with_pre_post(P::Produce),
        backward("JUMP_BACKWARD_NO_INTERRUPT", 134, F::UNCONDITIONAL, 0),
        op("MAKE_CELL", 135, C::Free, 0),
        op("LOAD_CLOSURE", 136, C::Free, 1),
        op("LOAD_DEREF", 137, C::Free, 1),
        op("STORE_DEREF", 138, C::Free, -1),
        op("DELETE_DEREF", 139, C::Free, 0),
        backward("JUMP_BACKWARD", 140, F::UNCONDITIONAL, 0),
        op_with("CALL_FUNCTION_EX", 142, C::Int, E::Linear { base: -2, scale: -1 })
            .with_pre_post(P::Produce),
        op("EXTENDED_ARG", EXTENDED_ARG, C::Int, 0),
        op("LIST_APPEND", 145, C::Int, -1).with_pre_post(P::Collect { remaining: -1 }),
        op("SET_ADD", 146, C::Int, -1).with_pre_post(P::Collect { remaining: -1 }),
        op("MAP_ADD", 147, C::Int, -2).with_pre_post(P::Collect { remaining: -2 }),
        op("LOAD_CLASSDEREF", 148, C::Free, 1),
        op("COPY_FREE_VARS", 149, C::Int, 0),
        op("RESUME", 151, C::Int, 0),
        op("MATCH_CLASS", 152, C::Int, -2).with_pre_post(P::Static(-3, 1)),
        op_with("FORMAT_VALUE", 155, C::Int, E::FormatValue).with_pre_post(P::Produce),
        op_with("BUILD_CONST_KEY_MAP", 156, C::Int, E::Linear { base: 0, scale: -1 })
            .with_pre_post(P::Produce),
        op_with("BUILD_STRING", 157, C::Int, collection).with_pre_post(P::Produce),
        op("LOAD_METHOD", 160, C::Name, 1).with_pre_post(P::Static(-1, 2)),
        op("LIST_EXTEND", 162, C::Int, -1).with_pre_post(P::Static(-2, 1)),
        op("SET_UPDATE", 163, C::Int, -1).with_pre_post(P::Static(-2, 1)),
        op("DICT_MERGE", 164, C::Int, -1).with_pre_post(P::Static(-2, 1)),
        op("DICT_UPDATE", 165, C::Int, -1).with_pre_post(P::Static(-2, 1)),
        op_with("PRECALL", 166, C::Int, E::Linear { base: 0, scale: -1 }),
        op("CALL", 171, C::Int, -1).with_pre_post(P::Produce),
        op("KW_NAMES", 172, C::Literal, 0),
        backward("POP_JUMP_BACKWARD_IF_NOT_NONE", 173, F::CONDITIONAL, -1),
        backward("POP_JUMP_BACKWARD_IF_NONE", 174, F::CONDITIONAL, -1),
        backward("POP_JUMP_BACKWARD_IF_FALSE", 175, F::CONDITIONAL, -1),
        backward("POP_JUMP_BACKWARD_IF_TRUE", 176, F::CONDITIONAL, -1),
    ];

    match InstructionSet::builder("wordcode", CodeFormat::wordcode())
        .opcodes(opcodes)
        .extended_arg(EXTENDED_ARG)
        .exception_table(true)
        .build()
    {
        Ok(isa) => isa,
        Err(err) => panic!("built-in wordcode table is inconsistent: {err}"),
    }
}
