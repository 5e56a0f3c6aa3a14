//! Integration tests over name resolution: every reference binds to
//! exactly one definition, or the pipeline reports why it couldn't.

use indoc::indoc;
use pretty_assertions::assert_eq;

use stackc_compiler::{parse, CompileError};

#[test]
fn a_function_can_call_one_defined_earlier() {
    let source = indoc! {"
        double: fn (x: i32) i32 { x * 2 }
        quadruple: fn (x: i32) i32 { double(double(x)) }
        export quadruple
    "};
    let ast = parse(source).unwrap();
    assert_eq!(ast.global_scope().functions.len(), 2);
}

#[test]
fn a_function_can_call_one_defined_later() {
    let source = indoc! {"
        main: fn () i32 { helper() }
        helper: fn () i32 { 42 }
    "};
    let ast = parse(source).unwrap();
    assert_eq!(ast.global_scope().functions.len(), 2);
}

#[test]
fn referencing_an_undeclared_name_is_unresolvable() {
    let err = parse("main: fn () i32 { nope }\n");
    assert!(matches!(err, Err(CompileError::UnresolvableReference { .. })));
}

#[test]
fn a_second_definition_of_the_same_name_is_a_duplicate() {
    let source = indoc! {"
        x: i32 = 1
        x: i32 = 2
    "};
    let err = parse(source);
    assert!(matches!(err, Err(CompileError::DuplicateDefinition { .. })));
}

#[test]
fn calling_a_global_variable_is_a_bad_reference_kind() {
    let err = parse("x: i32 = 0\nmain: fn () i32 { x() }\n");
    assert!(matches!(err, Err(CompileError::BadReferenceKind { .. })));
}

#[test]
fn exporting_an_undefined_name_is_rejected() {
    let err = parse("export nope\n");
    assert!(matches!(err, Err(CompileError::NonExistentExport { .. })));
}

#[test]
fn exporting_a_mutable_global_is_rejected() {
    let err = parse("counter: i32 = 0\nexport counter\n");
    assert!(matches!(err, Err(CompileError::MutableExport { .. })));
}

#[test]
fn an_immutable_exported_function_pointer_resolves() {
    let source = indoc! {"
        table 1
        helper: fn () i32 { 1 }
        h: fn_ptr () i32 = helper
        main: fn () i32 { h() }
    "};
    let ast = parse(source).unwrap();
    assert_eq!(ast.global_scope().functions.len(), 2);
}
