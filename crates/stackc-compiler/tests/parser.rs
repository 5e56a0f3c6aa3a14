//! Integration tests over the parsing stage: source text in, AST shape out,
//! with no resolver/validator pass run yet.

use indoc::indoc;
use pretty_assertions::assert_eq;

use stackc_compiler::{parse, CompileError};

#[test]
fn parses_a_function_with_an_if_else_expression() {
    let source = indoc! {"
        max: fn (a: i32, b: i32) i32 {
            if a > b { a } else { b }
        }
        export max
    "};
    let ast = parse(source).unwrap();
    assert_eq!(ast.global_scope().functions.len(), 1);
    assert_eq!(ast.global_scope().exports.len(), 1);
}

#[test]
fn parses_a_loop_with_break_and_yield() {
    let source = indoc! {"
        count_to: fn (n: i32) i32 {
            total: i32 = 0
            loop {
                if total >= n { break }
                total = total + 1
                yield total
            }
        }
    "};
    let ast = parse(source).unwrap();
    assert_eq!(ast.global_scope().functions.len(), 1);
}

#[test]
fn mismatched_braces_are_a_parse_error() {
    let err = parse("main: fn () void { \n");
    assert!(err.is_err());
}

#[test]
fn a_stray_symbol_is_a_mysterious_symbol_error() {
    let err = parse("main: fn () void { 1 @ 2 }\n");
    assert!(matches!(err, Err(CompileError::MysteriousSymbol { .. })));
}

#[test]
fn pointer_and_memory_declarations_parse() {
    let source = indoc! {"
        memory 1
        data: ptr i32 = 0
        read_first: fn () i32 {
            data[0]
        }
    "};
    let ast = parse(source).unwrap();
    assert_eq!(ast.global_scope().functions.len(), 1);
}
