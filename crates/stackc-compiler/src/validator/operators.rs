//! The operator table: a static mapping from source operator (keyed by the
//! node kind it lowers from, which already encodes the token the parser
//! saw) plus operand type signature to target opcode and result type.
//!
//! Keying this table by `NodeKind`/operand type directly, rather than by
//! raw token text, rules out a whole class of copy/paste mistake: there's
//! no text string to typo, and the match below is exhaustive over the
//! finite (opcode-kind, operand-type) product. In particular `to_i32` on
//! an f64 operand truncates from f64 (not f32), `to_i64` on an i32 operand
//! extends from i32 via the real `i64.extend_s/i32` opcode, and
//! `leading_zeros` pairs with count-leading-zeros, not popcount.

use crate::ast::RunType;
use crate::emit::opcode::Opcode;
use crate::syntax::NodeKind;

/// Binary operator dispatch for the arithmetic/bitwise/compare node kinds.
/// Returns `None` when no entry exists for this (kind, left, right) triple —
/// the caller raises `UndefinedOperator`.
///
/// The source language exposes no separate signed/unsigned integer types,
/// so every signed/unsigned choice (division, remainder, shift, ordered
/// compare) consistently picks the signed opcode.
pub fn binary_opcode(kind: NodeKind, left: RunType, right: RunType) -> Option<(Opcode, RunType)> {
    use RunType::*;
    if left != right {
        return None;
    }
    let ty = left;
    match kind {
        NodeKind::Add => arith(ty, Opcode::I32Add, Opcode::I64Add, Opcode::F32Add, Opcode::F64Add),
        NodeKind::Sub => arith(ty, Opcode::I32Sub, Opcode::I64Sub, Opcode::F32Sub, Opcode::F64Sub),
        NodeKind::Mul => arith(ty, Opcode::I32Mul, Opcode::I64Mul, Opcode::F32Mul, Opcode::F64Mul),
        NodeKind::Div => arith(ty, Opcode::I32DivS, Opcode::I64DivS, Opcode::F32Div, Opcode::F64Div),
        NodeKind::Rem => match ty {
            I32 => Some((Opcode::I32RemS, I32)),
            I64 => Some((Opcode::I64RemS, I64)),
            _ => None,
        },
        NodeKind::BitAnd => int_only(ty, Opcode::I32And, Opcode::I64And),
        NodeKind::BitOr => int_only(ty, Opcode::I32Or, Opcode::I64Or),
        NodeKind::BitXor => int_only(ty, Opcode::I32Xor, Opcode::I64Xor),
        NodeKind::Shl => int_only(ty, Opcode::I32Shl, Opcode::I64Shl),
        NodeKind::Shr => int_only(ty, Opcode::I32ShrS, Opcode::I64ShrS),
        NodeKind::Lt => compare(ty, Opcode::I32LtS, Opcode::I64LtS, Opcode::F32Lt, Opcode::F64Lt),
        NodeKind::Le => compare(ty, Opcode::I32LeS, Opcode::I64LeS, Opcode::F32Le, Opcode::F64Le),
        NodeKind::Gt => compare(ty, Opcode::I32GtS, Opcode::I64GtS, Opcode::F32Gt, Opcode::F64Gt),
        NodeKind::Ge => compare(ty, Opcode::I32GeS, Opcode::I64GeS, Opcode::F32Ge, Opcode::F64Ge),
        NodeKind::Eq => compare(ty, Opcode::I32Eq, Opcode::I64Eq, Opcode::F32Eq, Opcode::F64Eq),
        NodeKind::Ne => compare(ty, Opcode::I32Ne, Opcode::I64Ne, Opcode::F32Ne, Opcode::F64Ne),
        _ => None,
    }
}

fn arith(ty: RunType, i32_op: Opcode, i64_op: Opcode, f32_op: Opcode, f64_op: Opcode) -> Option<(Opcode, RunType)> {
    use RunType::*;
    match ty {
        I32 => Some((i32_op, I32)),
        I64 => Some((i64_op, I64)),
        F32 => Some((f32_op, F32)),
        F64 => Some((f64_op, F64)),
        Void => None,
    }
}

fn int_only(ty: RunType, i32_op: Opcode, i64_op: Opcode) -> Option<(Opcode, RunType)> {
    use RunType::*;
    match ty {
        I32 => Some((i32_op, I32)),
        I64 => Some((i64_op, I64)),
        _ => None,
    }
}

fn compare(ty: RunType, i32_op: Opcode, i64_op: Opcode, f32_op: Opcode, f64_op: Opcode) -> Option<(Opcode, RunType)> {
    use RunType::*;
    match ty {
        I32 => Some((i32_op, I32)),
        I64 => Some((i64_op, I32)),
        F32 => Some((f32_op, I32)),
        F64 => Some((f64_op, I32)),
        Void => None,
    }
}

/// Dispatch for the builtin unary math/conversion operators, which the
/// parser recognizes by callee name (see `parser::grammar::builtin_unary_op`)
/// and lowers to `NodeKind::UnaryMath` rather than a user `Call`.
pub fn unary_math_opcode(name: &str, operand: RunType) -> Option<(Opcode, RunType)> {
    use RunType::*;
    match (name, operand) {
        ("to_i32", F32) => Some((Opcode::I32TruncF32S, I32)),
        ("to_i32", F64) => Some((Opcode::I32TruncF64S, I32)),
        ("to_i64", F32) => Some((Opcode::I64TruncF32S, I64)),
        ("to_i64", F64) => Some((Opcode::I64TruncF64S, I64)),
        ("to_i64", I32) => Some((Opcode::I64ExtendI32S, I64)),
        ("to_f32", I32) => Some((Opcode::F32ConvertI32S, F32)),
        ("to_f32", I64) => Some((Opcode::F32ConvertI64S, F32)),
        ("to_f32", F64) => Some((Opcode::F32DemoteF64, F32)),
        ("to_f64", I32) => Some((Opcode::F64ConvertI32S, F64)),
        ("to_f64", I64) => Some((Opcode::F64ConvertI64S, F64)),
        ("to_f64", F32) => Some((Opcode::F64PromoteF32, F64)),
        ("leading_zeros", I32) => Some((Opcode::I32Clz, I32)),
        ("leading_zeros", I64) => Some((Opcode::I64Clz, I64)),
        ("trailing_zeros", I32) => Some((Opcode::I32Ctz, I32)),
        ("trailing_zeros", I64) => Some((Opcode::I64Ctz, I64)),
        ("pop_count", I32) => Some((Opcode::I32Popcnt, I32)),
        ("pop_count", I64) => Some((Opcode::I64Popcnt, I64)),
        ("sqrt", F32) => Some((Opcode::F32Sqrt, F32)),
        ("sqrt", F64) => Some((Opcode::F64Sqrt, F64)),
        ("abs", F32) => Some((Opcode::F32Abs, F32)),
        ("abs", F64) => Some((Opcode::F64Abs, F64)),
        ("ceil", F32) => Some((Opcode::F32Ceil, F32)),
        ("ceil", F64) => Some((Opcode::F64Ceil, F64)),
        ("floor", F32) => Some((Opcode::F32Floor, F32)),
        ("floor", F64) => Some((Opcode::F64Floor, F64)),
        ("trunc", F32) => Some((Opcode::F32Trunc, F32)),
        ("trunc", F64) => Some((Opcode::F64Trunc, F64)),
        ("nearest", F32) => Some((Opcode::F32Nearest, F32)),
        ("nearest", F64) => Some((Opcode::F64Nearest, F64)),
        _ => None,
    }
}

/// Every name the parser treats as a builtin unary operator rather than a
/// user-defined call target.
pub const BUILTIN_UNARY_NAMES: &[&str] = &[
    "to_i32",
    "to_i64",
    "to_f32",
    "to_f64",
    "leading_zeros",
    "trailing_zeros",
    "pop_count",
    "sqrt",
    "abs",
    "ceil",
    "floor",
    "trunc",
    "nearest",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_i32_on_f64_truncates_from_f64_not_f32() {
        let (op, ty) = unary_math_opcode("to_i32", RunType::F64).unwrap();
        assert_eq!(op, Opcode::I32TruncF64S);
        assert_eq!(ty, RunType::I32);
    }

    #[test]
    fn to_i64_on_i32_extends_from_i32() {
        let (op, _) = unary_math_opcode("to_i64", RunType::I32).unwrap();
        assert_eq!(op, Opcode::I64ExtendI32S);
    }

    #[test]
    fn leading_zeros_uses_clz_not_popcount() {
        let (op, _) = unary_math_opcode("leading_zeros", RunType::I32).unwrap();
        assert_eq!(op, Opcode::I32Clz);
    }

    #[test]
    fn mismatched_binary_operand_types_are_undefined() {
        assert!(binary_opcode(NodeKind::Add, RunType::I32, RunType::I64).is_none());
    }

    #[test]
    fn bitwise_rejects_floats() {
        assert!(binary_opcode(NodeKind::BitAnd, RunType::F32, RunType::F32).is_none());
    }
}
