//! Function body emission.
//!
//! A recursive walk over one function's body, mirroring the validator's own
//! recursive walk node-for-node: [`emit_value`] is the counterpart of
//! `validator::validate_value` (it inserts a `drop` after any node whose
//! `drop_value` the validator set, exactly as the validator decided it),
//! and [`emit_node`] is the counterpart of `validator::validate_node`. The
//! validator already resolved every ambiguity this pass would otherwise
//! have to rediscover — operator opcodes, temp locals, loop targets, memory
//! alignment — so this walk never inspects types or raises `CompileError`
//! of its own; it only transcribes `meta` into bytes.
//!
//! Block/function/loop/if bodies are "implicit": a `Block` reached as the
//! body of one of those constructs is emitted as a bare sequence (no
//! wrapping `block`), because the owning construct's own opcode (`if`,
//! `loop`, or the function itself) already supplies the label. [`Emitter`]
//! exists only to track the state that requires: the current nesting depth
//! (for `br`'s relative target) and, per loop, the depth its outer `block`
//! was entered at (for `break`/`yield`/`continue`'s distance calculation) —
//! see `emit::mod`'s doc comment for why this can't live in node `meta`.

use std::collections::HashMap;

use crate::ast::{Ast, Binding, DefinitionKind, LocalId, Meta, NodeId, PointerStorage, RunType};
use crate::emit::module::Indices;
use crate::emit::opcode::Opcode;
use crate::emit::sink::ByteSink;
use crate::error::CompileResult;
use crate::syntax::NodeKind;

/// Mutable emission state threaded through the recursive walk. Never
/// touches the AST — every fact it records is purely about the bytecode
/// written so far, not about the source program.
struct Emitter {
    /// Number of enclosing label-bearing constructs (`block`/`loop`/`if`)
    /// at the current point in the walk.
    depth: u32,
    /// For each `Loop` node, the depth recorded right after its outer
    /// `block` was entered — the reference point `break`/`yield`/`continue`
    /// subtract from.
    loop_outer_depth: HashMap<NodeId, u32>,
}

impl Emitter {
    fn new() -> Self {
        Self {
            depth: 0,
            loop_outer_depth: HashMap::new(),
        }
    }
}

pub fn emit_function(
    out: &mut ByteSink,
    ast: &Ast,
    body_node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let mut em = Emitter::new();
    emit_body(out, ast, &mut em, body_node, indices, local_index)
}

/// Emits a `Block`'s children as a bare sequence, relying on an already-open
/// enclosing label (function/`if`/`loop`) rather than opening one of its
/// own. Used at exactly the implicit-block positions: a function body, an
/// `if`/`else` branch, and a loop body.
fn emit_body(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    for child in children {
        emit_value(out, ast, em, child, indices, local_index)?;
    }
    Ok(())
}

/// An `else`-branch position accepts either a plain `Block` (implicit, no
/// wrapping) or another `If`/`Else` node (an "else if" chain, which is a
/// complete nested construct and goes through the ordinary dispatch).
fn emit_else_branch(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    if ast.node(node).kind == NodeKind::Block {
        emit_body(out, ast, em, node, indices, local_index)
    } else {
        emit_value(out, ast, em, node, indices, local_index)
    }
}

/// Emits the node, then inserts a `drop` whenever `drop_value` is set.
/// `Block`/`Paren` are exempt: a
/// block's own `drop_value` is always a duplicate of its last child's
/// (`validator::validate_block` gives the last child the very
/// `value_required` the block itself received), and that child already drops
/// itself — applying both would drop a value twice.
fn emit_value(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    emit_node(out, ast, em, node, indices, local_index)?;
    let n = ast.node(node);
    if matches!(n.kind, NodeKind::Block | NodeKind::Paren) {
        return Ok(());
    }
    if n.drop_value && !n.always_escapes {
        out.push_opcode(Opcode::Drop);
    }
    Ok(())
}

fn emit_node(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    use NodeKind::*;
    match ast.node(node).kind {
        IntLiteral => emit_int_literal(out, ast, node),
        FloatLiteral => emit_float_literal(out, ast, node),
        StringLiteral => Ok(()),
        VariableReference => {
            emit_load_binding(out, ast, node, indices, local_index);
            Ok(())
        }
        Add | Sub | Mul | Div | Rem | BitAnd | BitOr | BitXor | Shl | Shr | Lt | Le | Gt | Ge | Eq | Ne => {
            emit_binary(out, ast, em, node, indices, local_index)
        }
        And => emit_and(out, ast, em, node, indices, local_index),
        Or => emit_or(out, ast, em, node, indices, local_index),
        Assign | InitExpr => emit_assign(out, ast, em, node, indices, local_index),
        UnaryNeg => emit_unary_neg(out, ast, node),
        UnaryMath => emit_unary_math(out, ast, em, node, indices, local_index),
        SuffixIncrement | SuffixDecrement => emit_suffix(out, ast, em, node, indices, local_index),
        If => emit_if_standalone(out, ast, em, node, indices, local_index),
        Else => emit_else(out, ast, em, node, indices, local_index),
        Loop => emit_loop(out, ast, em, node, indices, local_index),
        Break => emit_break_or_yield(out, ast, em, node, indices, local_index, false),
        Yield => emit_break_or_yield(out, ast, em, node, indices, local_index, true),
        Continue => emit_continue(out, ast, em, node, indices, local_index),
        Return => emit_return(out, ast, em, node, indices, local_index),
        Call => emit_call(out, ast, em, node, indices, local_index),
        Block | Paren => emit_block_or_paren(out, ast, em, node, indices, local_index),
        MemoryAccess => emit_memory_access(out, ast, em, node, indices, local_index),
        AllocatePages => emit_allocate_pages(out, ast, em, node, indices, local_index),
        // Any `Definition` the emitter sees is a local `name: type = value`
        // statement — the validator never nests a module-scope `Definition`
        // inside a function body (see `validator::validate_node`'s doc).
        Definition => emit_local_declaration(out, ast, em, node, indices, local_index),
        _ => Ok(()),
    }
}

// ---- literals --------------------------------------------------------

fn emit_int_literal(out: &mut ByteSink, ast: &Ast, node: NodeId) -> CompileResult<()> {
    let value = match ast.node(node).meta {
        Meta::IntValue(v) => v,
        _ => unreachable!("IntLiteral always carries Meta::IntValue"),
    };
    match ast.node(node).run_type {
        RunType::I32 => {
            out.push_opcode(Opcode::I32Const);
            out.push_sleb128((value as u32) as i32 as i64);
        }
        RunType::I64 => {
            out.push_opcode(Opcode::I64Const);
            out.push_sleb128(value as i64);
        }
        _ => unreachable!("an int literal is always typed i32 or i64"),
    }
    Ok(())
}

fn emit_float_literal(out: &mut ByteSink, ast: &Ast, node: NodeId) -> CompileResult<()> {
    let value = match ast.node(node).meta {
        Meta::FloatValue(v) => v.into_inner(),
        _ => unreachable!("FloatLiteral always carries Meta::FloatValue"),
    };
    match ast.node(node).run_type {
        RunType::F32 => {
            out.push_opcode(Opcode::F32Const);
            out.push_f32(value as f32);
        }
        RunType::F64 => {
            out.push_opcode(Opcode::F64Const);
            out.push_f64(value);
        }
        _ => unreachable!("a float literal is always typed f32 or f64"),
    }
    Ok(())
}

/// Only a literal child is possible here (the parser restricts unary negate
/// to one — see `parser::grammar::parse_unary_neg`), so this folds the
/// negation at compile time rather than emitting a separate negate opcode.
fn emit_unary_neg(out: &mut ByteSink, ast: &Ast, node: NodeId) -> CompileResult<()> {
    let child = ast.node(node).children[0];
    let ty = ast.node(node).run_type;
    match ast.node(child).kind {
        NodeKind::IntLiteral => {
            let value = match ast.node(child).meta {
                Meta::IntValue(v) => v,
                _ => unreachable!(),
            };
            match ty {
                RunType::I32 => {
                    out.push_opcode(Opcode::I32Const);
                    out.push_sleb128((value as u32).wrapping_neg() as i32 as i64);
                }
                RunType::I64 => {
                    out.push_opcode(Opcode::I64Const);
                    out.push_sleb128(value.wrapping_neg() as i64);
                }
                _ => unreachable!(),
            }
        }
        NodeKind::FloatLiteral => {
            let value = match ast.node(child).meta {
                Meta::FloatValue(v) => v.into_inner(),
                _ => unreachable!(),
            };
            match ty {
                RunType::F32 => {
                    out.push_opcode(Opcode::F32Const);
                    out.push_f32(-(value as f32));
                }
                RunType::F64 => {
                    out.push_opcode(Opcode::F64Const);
                    out.push_f64(-value);
                }
                _ => unreachable!(),
            }
        }
        _ => unreachable!("parser restricts unary negate to literal children"),
    }
    Ok(())
}

// ---- variables, operators ----------------------------------------------

fn emit_load_binding(out: &mut ByteSink, ast: &Ast, node: NodeId, indices: &Indices, local_index: &HashMap<LocalId, u32>) {
    match ast.node(node).meta {
        Meta::Bound(Binding::Local(id)) => {
            out.push_opcode(Opcode::LocalGet);
            out.push_uleb128_u32(local_index[&id]);
        }
        Meta::Bound(Binding::Definition(id)) => {
            out.push_opcode(Opcode::GlobalGet);
            out.push_uleb128_u32(indices.global(id));
        }
        _ => unreachable!("a VariableReference/Assign/Suffix target always carries a Bound binding"),
    }
}

fn emit_store_binding(out: &mut ByteSink, ast: &Ast, node: NodeId, indices: &Indices, local_index: &HashMap<LocalId, u32>) {
    match ast.node(node).meta {
        Meta::Bound(Binding::Local(id)) => {
            out.push_opcode(Opcode::LocalSet);
            out.push_uleb128_u32(local_index[&id]);
        }
        Meta::Bound(Binding::Definition(id)) => {
            out.push_opcode(Opcode::GlobalSet);
            out.push_uleb128_u32(indices.global(id));
        }
        _ => unreachable!("a VariableReference/Assign/Suffix target always carries a Bound binding"),
    }
}

fn emit_binary(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    emit_value(out, ast, em, children[0], indices, local_index)?;
    emit_value(out, ast, em, children[1], indices, local_index)?;
    match ast.node(node).meta {
        Meta::Operator { opcode, .. } => out.push_opcode(opcode),
        _ => unreachable!("validator attaches Meta::Operator to every binary node"),
    }
    Ok(())
}

fn emit_unary_math(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let child = ast.node(node).children[0];
    emit_value(out, ast, em, child, indices, local_index)?;
    match ast.node(node).meta {
        Meta::Operator { opcode, .. } => out.push_opcode(opcode),
        _ => unreachable!("validator attaches Meta::Operator to every UnaryMath node"),
    }
    Ok(())
}

/// Short-circuit `and`: left, then a truthiness test negated to "is zero",
/// then an `if` of the shared operand type whose then-branch short-circuits
/// to zero and whose else-branch evaluates (and keeps) the right operand.
fn emit_and(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    let (left, right) = (children[0], children[1]);
    let ty = ast.node(left).run_type;

    emit_value(out, ast, em, left, indices, local_index)?;
    push_is_zero(out, ty);
    out.push_opcode(Opcode::If);
    out.push_byte(value_type_byte(ty));
    em.depth += 1;
    push_zero(out, ty);
    out.push_opcode(Opcode::Else);
    emit_value(out, ast, em, right, indices, local_index)?;
    em.depth -= 1;
    out.push_opcode(Opcode::End);
    Ok(())
}

/// Short-circuit `or`: left is tee'd into the anonymous temp
/// the validator allocated. For an `i32` operand the tee'd value already
/// doubles as the `if` condition (WASM's `if` treats any nonzero `i32` as
/// true, which is exactly "left was truthy"); any other operand type needs
/// the same not-equal-zero coercion `emit_if_standalone`/`emit_else` use for
/// a non-`i32` condition.
fn emit_or(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    let (left, right) = (children[0], children[1]);
    let ty = ast.node(left).run_type;
    let temp = match ast.node(node).meta {
        Meta::Temp(id) => id,
        _ => unreachable!("validator allocates a temp for every `or`"),
    };

    emit_value(out, ast, em, left, indices, local_index)?;
    out.push_opcode(Opcode::LocalTee);
    out.push_uleb128_u32(local_index[&temp]);
    coerce_condition(out, ty);
    out.push_opcode(Opcode::If);
    out.push_byte(value_type_byte(ty));
    em.depth += 1;
    out.push_opcode(Opcode::LocalGet);
    out.push_uleb128_u32(local_index[&temp]);
    out.push_opcode(Opcode::Else);
    emit_value(out, ast, em, right, indices, local_index)?;
    em.depth -= 1;
    out.push_opcode(Opcode::End);
    Ok(())
}

// ---- assignment / suffix --------------------------------------------------

/// Unifies assignment to a variable and to a memory cell: a
/// memory target additionally needs its address computed *before* the
/// right-hand side (a store consumes `[address, value]`), but both targets
/// otherwise share the tee-into-temp-and-reload shape.
fn emit_assign(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    let (target, value) = (children[0], children[1]);
    let temp = match ast.node(node).meta {
        Meta::Temp(id) => Some(id),
        _ => None,
    };

    if ast.node(target).kind == NodeKind::MemoryAccess {
        emit_memory_address(out, ast, em, target, indices, local_index)?;
        emit_value(out, ast, em, value, indices, local_index)?;
        if let Some(temp) = temp {
            out.push_opcode(Opcode::LocalTee);
            out.push_uleb128_u32(local_index[&temp]);
        }
        let storage = memory_op_storage(ast, target);
        let align = memory_op_align(ast, target);
        out.push_opcode(store_opcode(storage));
        out.push_uleb128_u32(align);
        out.push_uleb128_u32(0);
        if let Some(temp) = temp {
            out.push_opcode(Opcode::LocalGet);
            out.push_uleb128_u32(local_index[&temp]);
        }
    } else {
        emit_value(out, ast, em, value, indices, local_index)?;
        if let Some(temp) = temp {
            out.push_opcode(Opcode::LocalTee);
            out.push_uleb128_u32(local_index[&temp]);
        }
        emit_store_binding(out, ast, target, indices, local_index);
        if let Some(temp) = temp {
            out.push_opcode(Opcode::LocalGet);
            out.push_uleb128_u32(local_index[&temp]);
        }
    }
    Ok(())
}

/// Suffix increment/decrement: a first load only when the
/// expression's own value is needed (saved before the mutation, giving
/// post-value semantics), then an ordinary load/add-or-sub/store.
fn emit_suffix(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let target = ast.node(node).children[0];
    let (opcode, result_type, temp) = match ast.node(node).meta {
        Meta::Suffix { opcode, result_type, temp } => (opcode, result_type, temp),
        _ => unreachable!("validator attaches Meta::Suffix to every suffix node"),
    };

    if let Some(temp) = temp {
        emit_load_binding(out, ast, target, indices, local_index);
        out.push_opcode(Opcode::LocalSet);
        out.push_uleb128_u32(local_index[&temp]);
    }
    emit_load_binding(out, ast, target, indices, local_index);
    push_one(out, result_type);
    out.push_opcode(opcode);
    emit_store_binding(out, ast, target, indices, local_index);
    if let Some(temp) = temp {
        out.push_opcode(Opcode::LocalGet);
        out.push_uleb128_u32(local_index[&temp]);
    }
    Ok(())
}

// ---- memory access ---------------------------------------------------

fn memory_op_storage(ast: &Ast, node: NodeId) -> PointerStorage {
    match ast.node(node).meta {
        Meta::MemoryOp { storage, .. } => storage,
        _ => unreachable!("validator attaches Meta::MemoryOp to every MemoryAccess node"),
    }
}

fn memory_op_align(ast: &Ast, node: NodeId) -> u32 {
    match ast.node(node).meta {
        Meta::MemoryOp { align, .. } => align,
        _ => unreachable!(),
    }
}

/// The address arithmetic shared by memory reads and memory-target
/// assigns: the index expression, plus the pointer's own
/// (module-scope) address, times the element's storage size in bytes.
fn emit_memory_address(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let index = ast.node(node).children[0];
    let base = match ast.node(node).meta {
        Meta::MemoryOp { base, .. } => base,
        _ => unreachable!(),
    };
    let storage = memory_op_storage(ast, node);

    emit_value(out, ast, em, index, indices, local_index)?;
    out.push_opcode(Opcode::GlobalGet);
    out.push_uleb128_u32(indices.global(base));
    out.push_opcode(Opcode::I32Add);
    out.push_opcode(Opcode::I32Const);
    out.push_sleb128(storage.storage_bytes as i64);
    out.push_opcode(Opcode::I32Mul);
    Ok(())
}

fn emit_memory_access(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    emit_memory_address(out, ast, em, node, indices, local_index)?;
    let storage = memory_op_storage(ast, node);
    let align = memory_op_align(ast, node);
    out.push_opcode(load_opcode(storage));
    out.push_uleb128_u32(align);
    out.push_uleb128_u32(0);
    Ok(())
}

fn emit_allocate_pages(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let count = ast.node(node).children[0];
    emit_value(out, ast, em, count, indices, local_index)?;
    out.push_opcode(Opcode::MemoryGrow);
    out.push_byte(0);
    Ok(())
}

/// Chooses the load opcode for a pointer's storage shape: the plain typed
/// load when the storage matches the element's natural size, otherwise the
/// narrow sign/zero-extending load the storage's `signed` flag selects: a
/// typed load's signedness suffix is present only when the storage size is
/// narrower than the element type.
fn load_opcode(storage: PointerStorage) -> Opcode {
    if !storage.extended {
        return match storage.element_type {
            RunType::I32 => Opcode::I32Load,
            RunType::I64 => Opcode::I64Load,
            RunType::F32 => Opcode::F32Load,
            RunType::F64 => Opcode::F64Load,
            RunType::Void => unreachable!(),
        };
    }
    match (storage.element_type, storage.storage_bytes, storage.signed) {
        (RunType::I32, 1, true) => Opcode::I32Load8S,
        (RunType::I32, 1, false) => Opcode::I32Load8U,
        (RunType::I32, 2, true) => Opcode::I32Load16S,
        (RunType::I32, 2, false) => Opcode::I32Load16U,
        (RunType::I64, 1, true) => Opcode::I64Load8S,
        (RunType::I64, 1, false) => Opcode::I64Load8U,
        (RunType::I64, 2, true) => Opcode::I64Load16S,
        (RunType::I64, 2, false) => Opcode::I64Load16U,
        (RunType::I64, 4, true) => Opcode::I64Load32S,
        (RunType::I64, 4, false) => Opcode::I64Load32U,
        _ => unreachable!("parser rejects narrow storage on non-integer element types"),
    }
}

fn store_opcode(storage: PointerStorage) -> Opcode {
    if !storage.extended {
        return match storage.element_type {
            RunType::I32 => Opcode::I32Store,
            RunType::I64 => Opcode::I64Store,
            RunType::F32 => Opcode::F32Store,
            RunType::F64 => Opcode::F64Store,
            RunType::Void => unreachable!(),
        };
    }
    match (storage.element_type, storage.storage_bytes) {
        (RunType::I32, 1) => Opcode::I32Store8,
        (RunType::I32, 2) => Opcode::I32Store16,
        (RunType::I64, 1) => Opcode::I64Store8,
        (RunType::I64, 2) => Opcode::I64Store16,
        (RunType::I64, 4) => Opcode::I64Store32,
        _ => unreachable!("parser rejects narrow storage on non-integer element types"),
    }
}

// ---- calls -------------------------------------------------------------

/// Arguments in order, then either a direct `call` or, for a function-
/// pointer global, the pointer's table index followed by `call_indirect`.
fn emit_call(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let args_node = ast.node(node).children[0];
    let arg_children = ast.node(args_node).children.clone();
    let def_id = match ast.node(node).meta {
        Meta::Bound(Binding::Definition(id)) => id,
        _ => unreachable!("resolver guarantees a Call resolves to a callable definition"),
    };
    for arg in arg_children {
        emit_value(out, ast, em, arg, indices, local_index)?;
    }

    let def = ast.definition(def_id);
    if def.kind == DefinitionKind::Function {
        out.push_opcode(Opcode::Call);
        out.push_uleb128_u32(indices.function(def_id));
    } else {
        out.push_opcode(Opcode::GlobalGet);
        out.push_uleb128_u32(indices.global(def_id));
        out.push_opcode(Opcode::CallIndirect);
        out.push_uleb128_u32(
            def.signature_index
                .expect("a function-pointer global always carries a signature index"),
        );
        out.push_byte(0);
    }
    Ok(())
}

// ---- control flow ------------------------------------------------------

/// A bare `if` (no `else`) is always void.
fn emit_if_standalone(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    let (cond, body) = (children[0], children[1]);
    let cond_type = ast.node(cond).run_type;

    emit_value(out, ast, em, cond, indices, local_index)?;
    coerce_condition(out, cond_type);
    out.push_opcode(Opcode::If);
    out.push_byte(value_type_byte(RunType::Void));
    em.depth += 1;
    emit_body(out, ast, em, body, indices, local_index)?;
    em.depth -= 1;
    out.push_opcode(Opcode::End);
    Ok(())
}

/// `node` is the `Else` node; its first child is the paired `If`, read
/// apart rather than dispatched through `emit_if_standalone` since the
/// paired form shares one `if`/`else`/`end` with this node, typed by the
/// combined result rather than forced void.
fn emit_else(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    let (if_node, else_value) = (children[0], children[1]);
    let if_children = ast.node(if_node).children.clone();
    let (cond, body) = (if_children[0], if_children[1]);
    let cond_type = ast.node(cond).run_type;
    let blocktype = value_type_byte(ast.node(node).run_type);

    emit_value(out, ast, em, cond, indices, local_index)?;
    coerce_condition(out, cond_type);
    out.push_opcode(Opcode::If);
    out.push_byte(blocktype);
    em.depth += 1;
    emit_body(out, ast, em, body, indices, local_index)?;
    out.push_opcode(Opcode::Else);
    emit_else_branch(out, ast, em, else_value, indices, local_index)?;
    em.depth -= 1;
    out.push_opcode(Opcode::End);
    Ok(())
}

/// An outer `block` (the `break`/`yield` target) wrapping an inner `loop`
/// (the `continue` target, and the unconditional branch back to its own
/// header that makes the loop actually loop).
fn emit_loop(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let body = ast.node(node).children[0];
    let blocktype = value_type_byte(ast.node(node).run_type);

    out.push_opcode(Opcode::Block);
    out.push_byte(blocktype);
    em.depth += 1;
    em.loop_outer_depth.insert(node, em.depth);

    out.push_opcode(Opcode::Loop);
    out.push_byte(blocktype);
    em.depth += 1;
    emit_body(out, ast, em, body, indices, local_index)?;
    out.push_opcode(Opcode::Br);
    out.push_uleb128_u32(0);
    em.depth -= 1;
    out.push_opcode(Opcode::End);

    em.depth -= 1;
    out.push_opcode(Opcode::End);
    Ok(())
}

/// `break`/`yield`: relative depth counts out from the current position
/// to the target loop's outer `block`.
fn emit_break_or_yield(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
    _is_yield: bool,
) -> CompileResult<()> {
    if let Some(&value) = ast.node(node).children.first() {
        emit_value(out, ast, em, value, indices, local_index)?;
    }
    let loop_node = match ast.node(node).meta {
        Meta::LoopTarget { loop_node } => loop_node,
        _ => unreachable!("validator attaches Meta::LoopTarget to every break/yield/continue"),
    };
    let target_depth = em.loop_outer_depth[&loop_node];
    out.push_opcode(Opcode::Br);
    out.push_uleb128_u32(em.depth - target_depth);
    Ok(())
}

/// `continue`: one deeper than `break`/`yield` — the target is the loop's
/// inner `loop` header, not its outer `block`.
fn emit_continue(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    if let Some(&value) = ast.node(node).children.first() {
        emit_value(out, ast, em, value, indices, local_index)?;
    }
    let loop_node = match ast.node(node).meta {
        Meta::LoopTarget { loop_node } => loop_node,
        _ => unreachable!(),
    };
    let target_depth = em.loop_outer_depth[&loop_node];
    out.push_opcode(Opcode::Br);
    out.push_uleb128_u32(em.depth - target_depth - 1);
    Ok(())
}

/// `return`: the `drop` that `drop_value` would otherwise trigger is
/// suppressed by `emit_value`'s own `always_escapes` check, not by
/// anything here.
fn emit_return(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    if let Some(&value) = ast.node(node).children.first() {
        emit_value(out, ast, em, value, indices, local_index)?;
    }
    out.push_opcode(Opcode::Return);
    Ok(())
}

fn emit_local_declaration(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let local_id = match ast.node(node).meta {
        Meta::Bound(Binding::Local(id)) => id,
        _ => unreachable!("a nested Definition node is always bound by declare_local_binding"),
    };
    let only_child = ast.node(node).children.first().copied();
    let init = match only_child {
        Some(child) if matches!(ast.node(child).kind, NodeKind::PointerLiteral | NodeKind::FunctionPointer) => {
            ast.node(child).children.first().copied()
        }
        other => other,
    };
    if let Some(init) = init {
        emit_value(out, ast, em, init, indices, local_index)?;
        out.push_opcode(Opcode::LocalSet);
        out.push_uleb128_u32(local_index[&local_id]);
    }
    Ok(())
}

/// A `Block`/`Paren`: a singleton passes its one child
/// through untouched (no wrapping, same effect as iterating one child);
/// anything with more than one child gets a typed `block`/`end`, solely so
/// nested `break`/`continue` keep counting nesting depth correctly — the
/// block contributes nothing else, since every non-last child already
/// drops its own value.
fn emit_block_or_paren(
    out: &mut ByteSink,
    ast: &Ast,
    em: &mut Emitter,
    node: NodeId,
    indices: &Indices,
    local_index: &HashMap<LocalId, u32>,
) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    if children.len() <= 1 {
        if let Some(&only) = children.first() {
            emit_value(out, ast, em, only, indices, local_index)?;
        }
        return Ok(());
    }
    let blocktype = value_type_byte(ast.node(node).run_type);
    out.push_opcode(Opcode::Block);
    out.push_byte(blocktype);
    em.depth += 1;
    for child in children {
        emit_value(out, ast, em, child, indices, local_index)?;
    }
    em.depth -= 1;
    out.push_opcode(Opcode::End);
    Ok(())
}

// ---- shared helpers ------------------------------------------------------

/// Matches `module::value_type_byte`; duplicated here isn't an option since
/// the binary module format and the binary function body share this
/// encoding, so `body` reuses `module`'s copy instead (see the `use` above).
use crate::emit::module::value_type_byte;

fn push_zero(out: &mut ByteSink, ty: RunType) {
    match ty {
        RunType::I32 => {
            out.push_opcode(Opcode::I32Const);
            out.push_sleb128(0);
        }
        RunType::I64 => {
            out.push_opcode(Opcode::I64Const);
            out.push_sleb128(0);
        }
        RunType::F32 => {
            out.push_opcode(Opcode::F32Const);
            out.push_f32(0.0);
        }
        RunType::F64 => {
            out.push_opcode(Opcode::F64Const);
            out.push_f64(0.0);
        }
        RunType::Void => unreachable!("and/or operands are always numeric"),
    }
}

fn push_one(out: &mut ByteSink, ty: RunType) {
    match ty {
        RunType::I32 => {
            out.push_opcode(Opcode::I32Const);
            out.push_sleb128(1);
        }
        RunType::I64 => {
            out.push_opcode(Opcode::I64Const);
            out.push_sleb128(1);
        }
        RunType::F32 => {
            out.push_opcode(Opcode::F32Const);
            out.push_f32(1.0);
        }
        RunType::F64 => {
            out.push_opcode(Opcode::F64Const);
            out.push_f64(1.0);
        }
        RunType::Void => unreachable!("suffix increment/decrement operands are always numeric"),
    }
}

/// "Is this zero" — the polarity `and`'s short-circuit test needs.
fn push_is_zero(out: &mut ByteSink, ty: RunType) {
    match ty {
        RunType::I32 => out.push_opcode(Opcode::I32Eqz),
        RunType::I64 => out.push_opcode(Opcode::I64Eqz),
        RunType::F32 => {
            out.push_opcode(Opcode::F32Const);
            out.push_f32(0.0);
            out.push_opcode(Opcode::F32Eq);
        }
        RunType::F64 => {
            out.push_opcode(Opcode::F64Const);
            out.push_f64(0.0);
            out.push_opcode(Opcode::F64Eq);
        }
        RunType::Void => unreachable!("and/or operands are always numeric"),
    }
}

/// Coerces a value already on the stack into the `i32` an `if`/`or` needs
/// as its condition. A no-op for `i32` (already a valid condition, and
/// already the right truthy/falsy polarity); every other type gets a
/// "compare-not-equal to zero" coercion.
fn coerce_condition(out: &mut ByteSink, ty: RunType) {
    match ty {
        RunType::I32 => {}
        RunType::I64 => {
            out.push_opcode(Opcode::I64Const);
            out.push_sleb128(0);
            out.push_opcode(Opcode::I64Ne);
        }
        RunType::F32 => {
            out.push_opcode(Opcode::F32Const);
            out.push_f32(0.0);
            out.push_opcode(Opcode::F32Ne);
        }
        RunType::F64 => {
            out.push_opcode(Opcode::F64Const);
            out.push_f64(0.0);
            out.push_opcode(Opcode::F64Ne);
        }
        RunType::Void => unreachable!("a condition is always numeric"),
    }
}

#[cfg(test)]
mod tests {
    use crate::emit::sink::decode_uleb128;

    fn compile(source: &str) -> Vec<u8> {
        crate::compile(source).unwrap()
    }

    fn code_section_payload(bytes: &[u8]) -> &[u8] {
        let mut pos = 8; // magic + version
        loop {
            let id = bytes[pos];
            let (len, consumed) = decode_uleb128(&bytes[pos + 1..]);
            let payload_start = pos + 1 + consumed;
            let payload_end = payload_start + len as usize;
            if id == 10 {
                return &bytes[payload_start..payload_end];
            }
            pos = payload_end;
        }
    }

    #[test]
    fn returns_the_sum_of_its_two_parameters() {
        let bytes = compile("add: fn (a: i32, b: i32) i32 { a + b }\nexport add\n");
        let code = code_section_payload(&bytes);
        // function count, body size, 0 extra locals, local.get 0, local.get 1, i32.add, end(body), end(fn)
        assert_eq!(code[0], 1);
        let body = &code[2..];
        assert_eq!(body[1], 0); // no declared locals beyond the two params
        assert_eq!(&body[2..], &[0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B, 0x0B]);
    }

    #[test]
    fn loop_with_break_emits_a_wrapping_block_and_loop() {
        let bytes = compile("main: fn () void { loop { break } }\n");
        let code = code_section_payload(&bytes);
        // block void, loop void, br 1 (break's target is the outer block), end, br 0 (loop back-edge), end, end(fn)
        assert!(code.windows(2).any(|w| w == [0x02, 0x40])); // block void
        assert!(code.windows(2).any(|w| w == [0x03, 0x40])); // loop void
    }

    #[test]
    fn short_circuit_or_lowers_to_tee_and_if() {
        let bytes = compile("main: fn () i32 { a: i32 = 1\n b: i32 = 0\n a or b }\n");
        let code = code_section_payload(&bytes);
        assert!(code.contains(&Opcode::LocalTee.byte()));
        assert!(code.contains(&Opcode::If.byte()));
    }

    use crate::emit::opcode::Opcode;

    #[test]
    fn memory_store_then_load_round_trips_through_the_typed_opcodes() {
        let bytes = compile("memory 1\np: ptr i32 = 0\nmain: fn () i32 { p[0] = 7\n p[0] }\n");
        let code = code_section_payload(&bytes);
        assert!(code.contains(&Opcode::I32Store.byte()));
        assert!(code.contains(&Opcode::I32Load.byte()));
    }

    #[test]
    fn suffix_increment_emits_load_add_store() {
        let bytes = compile("main: fn () void { a: i32 = 0\n a++ }\n");
        let code = code_section_payload(&bytes);
        assert!(code.contains(&Opcode::I32Add.byte()));
        assert!(code.contains(&Opcode::LocalSet.byte()));
    }

    #[test]
    fn return_suppresses_the_trailing_drop() {
        let bytes = compile("main: fn () i32 { return 1\n }\n");
        let code = code_section_payload(&bytes);
        assert!(code.contains(&Opcode::Return.byte()));
    }
}
