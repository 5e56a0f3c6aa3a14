//! Integration tests over type-checking and control-flow validation: the
//! stage after resolution, where most of the language's static guarantees
//! actually get enforced.

use indoc::indoc;
use pretty_assertions::assert_eq;

use stackc_compiler::ast::Meta;
use stackc_compiler::{parse, CompileError};

#[test]
fn a_well_typed_function_validates() {
    let source = indoc! {"
        clamp: fn (x: i32, lo: i32, hi: i32) i32 {
            if x < lo { lo } else { if x > hi { hi } else { x } }
        }
        export clamp
    "};
    parse(source).unwrap();
}

#[test]
fn mismatched_binary_operand_types_are_undefined() {
    let err = parse("main: fn () i32 { 1 + 2.0 }\n");
    assert!(matches!(err, Err(CompileError::UndefinedOperator { .. })));
}

#[test]
fn a_return_type_mismatch_is_rejected() {
    let err = parse("main: fn () i32 { return }\n");
    assert!(matches!(err, Err(CompileError::ReturnTypeMismatch { .. })));
}

#[test]
fn break_outside_a_loop_is_rejected() {
    let err = parse("main: fn () void { break }\n");
    assert!(matches!(err, Err(CompileError::MisplacedBreakYieldContinue { .. })));
}

#[test]
fn a_short_circuit_and_requires_matching_operand_types() {
    let err = parse("main: fn () i32 { (1 and 2.0) }\n");
    assert!(matches!(err, Err(CompileError::InconsistentBooleanType { .. })));
}

#[test]
fn code_after_a_return_is_unreachable() {
    let source = indoc! {"
        main: fn () i32 {
            return 1
            2
        }
    "};
    let err = parse(source);
    assert!(matches!(err, Err(CompileError::UnreachableCode { .. })));
}

#[test]
fn an_out_of_range_i32_literal_is_rejected() {
    let err = parse("main: fn () i64 { 99999999999x32 }\n");
    assert!(matches!(err, Err(CompileError::IntegerLiteralOutOfRange { .. })));
}

#[test]
fn a_loop_whose_yields_disagree_in_type_is_rejected() {
    let source = indoc! {"
        main: fn () i32 {
            n: i32 = 0
            loop {
                if n > 0 { yield 1 }
                n = n + 1
                yield 2.0
            }
        }
    "};
    let err = parse(source);
    assert!(matches!(err, Err(CompileError::InconsistentLoopYieldType { .. })));
}

#[test]
fn the_alignment_of_a_memory_access_matches_its_storage_size() {
    let source = indoc! {"
        memory 1
        p: ptr i64 = 0
        main: fn () i64 { p[0] }
    "};
    let ast = parse(source).unwrap();
    let root = ast.node(ast.root.unwrap());
    // root children: DefaultMemory, Definition(p), Definition(main)
    let main_def = ast.node(root.children[2]);
    let fn_lit = ast.node(main_def.children[0]);
    let block = ast.node(fn_lit.children[1]);
    let access = ast.node(block.children[0]);
    match access.meta {
        Meta::MemoryOp { align, .. } => assert_eq!(align, 3),
        _ => panic!("expected MemoryOp meta"),
    }
}
