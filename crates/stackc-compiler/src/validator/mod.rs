//! The validator.
//!
//! A single recursive walk over the AST computes each node's `run_type`,
//! dispatches operators through the [`operators`] table, allocates
//! anonymous temp locals for short-circuit `or` and value-producing
//! `Assign`/memory-store, and records `always_escapes`/`drop_value` so the
//! emitter never has to re-derive control flow itself. Name resolution has
//! already run (`resolver::resolve`), so every reference's `meta` already
//! holds a [`Binding`]; this pass is the only one that *overwrites* that
//! `meta` for operator/memory-access nodes once their dispatch is known
//! (see `Meta::Operator`/`Meta::MemoryOp`/`Meta::Suffix` doc comments on
//! `ast::Meta`).
//!
//! Every recursive entry point threads a `value_required: bool` — does the
//! node's *caller* need the value this node leaves on the stack — starting
//! from `value_required=false` at the function body root. [`validate_value`]
//! is the one place that turns `value_required == false` plus a non-void,
//! non-escaping result into `drop_value = true`; every recursive call site
//! goes through it rather than the raw [`validate_node`] dispatcher, so
//! "block marks non-last, non-void children for drop" and "if-without-
//! else's body must not produce a value" fall out of one mechanism instead
//! of being special-cased per node kind.

pub mod operators;

use crate::ast::{
    Ast, Binding, DefinitionKind, LocalVar, Meta, NodeId, RunType, ScopeId,
};
use crate::error::{CompileError, CompileResult, Span};
use crate::syntax::NodeKind;

/// Recursion-depth guard, mirroring [`crate::Limits::default`]'s
/// `recursion_limit` — the validator doesn't thread a caller-supplied
/// [`crate::Limits`] (it is constructed from an already-fully-parsed
/// `Ast`, with no `Limits` value attached to it), so this independent,
/// identically-sized constant is the validator's half of the "both walks
/// in this crate... naturally recursive on nesting depth" guard `lib.rs`
/// documents.
const VALIDATOR_RECURSION_LIMIT: usize = 512;

/// Per-function validation context: which scope owns this function's flat
/// local list (for anonymous-temp allocation) and what its declared return
/// type is (for `return`/loop-with-return typing). `Copy` so every
/// recursive call just threads it by value.
#[derive(Debug, Clone, Copy)]
struct FnCtx {
    fn_scope: ScopeId,
    return_type: RunType,
}

pub fn validate(ast: &mut Ast) -> CompileResult<()> {
    let root = ast.root.expect("parser always sets root");
    let children = ast.node(root).children.clone();
    for node in children {
        validate_top_level(ast, node)?;
    }
    Ok(())
}

fn validate_top_level(ast: &mut Ast, node: NodeId) -> CompileResult<()> {
    match ast.node(node).kind {
        NodeKind::Definition => {
            let def_id = bound_definition(ast, node);
            if ast.definition(def_id).kind == DefinitionKind::Function {
                validate_function(ast, node, def_id)
            } else {
                validate_global(ast, node, def_id)
            }
        }
        // Imports carry no initializer to check; a bare top-level
        // `memory`/`table` statement was already range-checked by the
        // parser's `parse_default_slot`; exports were already checked for
        // existence/mutability by the resolver.
        NodeKind::Import | NodeKind::Export | NodeKind::DefaultMemory | NodeKind::DefaultTable => {
            Ok(())
        }
        _ => Ok(()),
    }
}

fn bound_definition(ast: &Ast, node: NodeId) -> crate::ast::DefinitionId {
    match ast.node(node).meta {
        Meta::Bound(Binding::Definition(id)) => id,
        _ => unreachable!("every top-level Definition is bound by declare_global at parse time"),
    }
}

// ---- globals (scalars, pointers, function pointers) --------------------

/// `name: type = initializer` / `name: ptr elem = addr` / `name: fn_ptr
/// (...) ret [= target]` at module scope: checks the size/range of a
/// default-memory-or-table definition, validates the initializer
/// expression, and enforces that a pointer needs a default memory and a
/// function pointer needs a default table.
fn validate_global(ast: &mut Ast, def_node: NodeId, def_id: crate::ast::DefinitionId) -> CompileResult<()> {
    let name = ast.definition(def_id).name.clone();
    let def_span = ast.definition(def_id).def_span;
    let declared_type = ast.definition(def_id).return_type;
    let pointer_storage = ast.definition(def_id).pointer_storage;
    let signature_index = ast.definition(def_id).signature_index;

    if let Some(_storage) = pointer_storage {
        if ast.global_scope().default_memory.is_none() {
            return Err(CompileError::NoMemoryDefinedForPointer { name, span: def_span });
        }
        let ptr_node = ast.node(def_node).children[0];
        match ast.node(ptr_node).children.first().copied() {
            Some(addr) => validate_global_initializer(ast, addr, RunType::I32)?,
            None => {
                return Err(CompileError::BadInitializer {
                    reason: "a pointer binding requires an address initializer",
                    span: def_span,
                })
            }
        }
    } else if signature_index.is_some() {
        if ast.global_scope().default_table.is_none() {
            return Err(CompileError::NoTableDefinedForFunctionPointer { name, span: def_span });
        }
        let fp_node = ast.node(def_node).children[0];
        if let Some(&target_ref) = ast.node(fp_node).children.get(1) {
            let target_def = bound_definition(ast, target_ref);
            if ast.definition(target_def).signature_index != signature_index {
                return Err(CompileError::FunctionSignatureMismatch { name, span: def_span });
            }
        }
    } else {
        match ast.node(def_node).children.first().copied() {
            Some(init) => validate_global_initializer(ast, init, declared_type)?,
            None => {
                return Err(CompileError::BadInitializer {
                    reason: "a global binding requires an initializer",
                    span: def_span,
                })
            }
        }
    }
    Ok(())
}

/// The right-hand side of a global/pointer-address initializer must be a
/// numeric literal or a reference to an imported immutable global, with a
/// type matching the left-hand declared type exactly. Unlike ordinary
/// expression validation
/// this never recurses into operators/calls/etc — the grammar restricts a
/// top-level initializer to exactly these two shapes — so it is written
/// standalone rather than through [`validate_node`].
fn validate_global_initializer(ast: &mut Ast, node: NodeId, expected: RunType) -> CompileResult<()> {
    match ast.node(node).kind {
        NodeKind::IntLiteral => {
            validate_int_literal(ast, node)?;
            check_initializer_type(ast, node, expected)
        }
        NodeKind::FloatLiteral => check_initializer_type(ast, node, expected),
        NodeKind::VariableReference => {
            let def_id = match ast.node(node).meta {
                Meta::Bound(Binding::Definition(id)) => id,
                _ => {
                    return Err(CompileError::BadInitializer {
                        reason: "initializer must reference an imported immutable global",
                        span: ast.node(node).span,
                    })
                }
            };
            let target = ast.definition(def_id);
            if target.kind != DefinitionKind::Global || target.mutable || target.import_source.is_none() {
                return Err(CompileError::BadInitializer {
                    reason: "initializer must reference an imported immutable global",
                    span: ast.node(node).span,
                });
            }
            ast.node_mut(node).run_type = target.run_type;
            check_initializer_type(ast, node, expected)
        }
        _ => Err(CompileError::BadInitializer {
            reason: "initializer must be a numeric literal or a reference to an imported immutable global",
            span: ast.node(node).span,
        }),
    }
}

fn check_initializer_type(ast: &Ast, node: NodeId, expected: RunType) -> CompileResult<()> {
    let found = ast.node(node).run_type;
    if found != expected {
        return Err(CompileError::AssignmentTypeMismatch {
            target: expected,
            value: found,
            span: ast.node(node).span,
        });
    }
    Ok(())
}

// ---- functions -----------------------------------------------------------

fn validate_function(ast: &mut Ast, def_node: NodeId, def_id: crate::ast::DefinitionId) -> CompileResult<()> {
    let fn_lit = ast.node(def_node).children[0];
    let fn_scope = ast.node(fn_lit).scope;
    let body = ast.node(fn_lit).children[1];
    let return_type = ast.definition(def_id).return_type;
    let ctx = FnCtx { fn_scope, return_type };

    let value_required = return_type != RunType::Void;
    validate_value(ast, body, value_required, ctx, 0)?;

    if !ast.node(body).always_escapes && ast.node(body).run_type != return_type {
        return Err(CompileError::ReturnTypeMismatch {
            declared: return_type,
            found: ast.node(body).run_type,
            span: ast.node(body).span,
        });
    }
    Ok(())
}

/// A local `name: type = value` statement. Shaped exactly like a module-
/// scope binding (`declare_local_binding` reuses `parse_binding`'s grammar),
/// but unlike `validate_global_initializer` the right-hand side is a full
/// expression, not a constant-only clause.
fn validate_local_declaration(ast: &mut Ast, node: NodeId, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let local_id = match ast.node(node).meta {
        Meta::Bound(Binding::Local(id)) => id,
        _ => unreachable!("a nested Definition node is always bound by declare_local_binding"),
    };
    let declared_type = ast.local(local_id).run_type;
    let only_child = ast.node(node).children.first().copied();
    let init = match only_child {
        // A local pointer/function-pointer binding wraps its address/target
        // expression one level deeper, inside the `PointerLiteral`/
        // `FunctionPointer` node — same shape `validate_global` unwraps.
        Some(child) if matches!(ast.node(child).kind, NodeKind::PointerLiteral | NodeKind::FunctionPointer) => {
            ast.node(child).children.first().copied()
        }
        other => other,
    };
    let Some(init) = init else {
        // A function-pointer local declared with no initial target.
        ast.node_mut(node).run_type = RunType::Void;
        return Ok(());
    };
    validate_value(ast, init, true, ctx, depth + 1)?;
    reject_escape(ast, init, ast.node(node).span)?;
    if ast.node(init).run_type != declared_type {
        return Err(CompileError::AssignmentTypeMismatch {
            target: declared_type,
            value: ast.node(init).run_type,
            span: ast.node(node).span,
        });
    }
    ast.node_mut(node).run_type = RunType::Void;
    Ok(())
}

// ---- the generic expression walk -----------------------------------------

/// Validates `node`, then — if the caller doesn't need its value and it
/// produced one anyway — marks it `drop_value` for the emitter. This is the
/// one mechanism behind "non-void children that aren't the block's last
/// child get dropped" (Block/Paren just call this for every non-last child
/// with `value_required=false`) and "an `if` without an `else` must not
/// produce a value" (it validates its body the same way).
fn validate_value(ast: &mut Ast, node: NodeId, value_required: bool, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    validate_node(ast, node, value_required, ctx, depth)?;
    if !value_required && !ast.node(node).always_escapes && ast.node(node).run_type != RunType::Void {
        ast.node_mut(node).drop_value = true;
    }
    Ok(())
}

fn validate_node(ast: &mut Ast, node: NodeId, value_required: bool, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    if depth > VALIDATOR_RECURSION_LIMIT {
        return Err(CompileError::LimitExceeded {
            what: "recursion",
            limit: VALIDATOR_RECURSION_LIMIT,
            span: ast.node(node).span,
        });
    }
    use NodeKind::*;
    match ast.node(node).kind {
        IntLiteral => validate_int_literal(ast, node),
        FloatLiteral | StringLiteral => Ok(()),
        VariableReference => validate_variable_reference(ast, node),
        Add | Sub | Mul | Div | Rem | BitAnd | BitOr | BitXor | Shl | Shr | Lt | Le | Gt | Ge | Eq | Ne => {
            validate_binary(ast, node, ctx, depth)
        }
        And => validate_and_or(ast, node, false, ctx, depth),
        Or => validate_and_or(ast, node, true, ctx, depth),
        Assign | InitExpr => validate_assign(ast, node, value_required, ctx, depth),
        UnaryNeg => validate_unary_neg(ast, node, ctx, depth),
        UnaryMath => validate_unary_math(ast, node, ctx, depth),
        SuffixIncrement | SuffixDecrement => validate_suffix(ast, node, value_required, ctx, depth),
        If => validate_if(ast, node, value_required, ctx, depth),
        Else => validate_else(ast, node, value_required, ctx, depth),
        Loop => validate_loop(ast, node, ctx, depth),
        Break => validate_break_or_yield(ast, node, false, ctx, depth),
        Yield => validate_break_or_yield(ast, node, true, ctx, depth),
        Continue => validate_continue(ast, node, ctx, depth),
        Return => validate_return(ast, node, ctx, depth),
        Call => validate_call(ast, node, ctx, depth),
        Block | Paren => validate_block(ast, node, value_required, ctx, depth),
        MemoryAccess => validate_memory_access(ast, node, ctx, depth),
        AllocatePages => validate_allocate_pages(ast, node, ctx, depth),
        // A `Definition` reaching the generic walk is always a local
        // `name: type = value` statement inside a function body — a
        // module-scope `Definition` is validated directly by
        // `validate_top_level`/`validate_global` and never nested inside a
        // `Block`, so it never takes this path.
        Definition => validate_local_declaration(ast, node, ctx, depth),
        // ArgumentList/ParameterList/TypeList/Declaration/Import/Export/
        // ExportType/AsRename/FunctionLiteral/FunctionSignature/
        // FunctionPointer/PointerLiteral/DefaultMemory/DefaultTable never
        // reach the generic expression walk — each is either handled
        // structurally by its owning construct (parameter lists by
        // `validate_function`'s signature, argument lists by
        // `validate_call`, ...) or is a statement-only top-level form
        // already dispatched by `validate_top_level`.
        _ => Ok(()),
    }
}

fn reject_escape(ast: &Ast, operand: NodeId, unreachable_span: Span) -> CompileResult<()> {
    if ast.node(operand).always_escapes {
        return Err(CompileError::UnreachableCode {
            escape_span: ast.node(operand).span,
            unreachable_span,
        });
    }
    Ok(())
}

fn alloc_temp(ast: &mut Ast, fn_scope: ScopeId, ty: RunType) -> crate::ast::LocalId {
    let id = ast.alloc_local(LocalVar {
        name: None,
        run_type: ty,
        mutable: true,
        is_param: false,
        index: None,
    });
    ast.scope_mut(fn_scope).function_locals.push(id);
    id
}

fn find_enclosing_loop(ast: &Ast, mut scope: ScopeId) -> Option<ScopeId> {
    loop {
        if ast.scope(scope).is_loop {
            return Some(scope);
        }
        scope = ast.scope(scope).parent?;
    }
}

fn mark_loops_have_return(ast: &mut Ast, mut scope: ScopeId, fn_scope: ScopeId) {
    while scope != fn_scope {
        if ast.scope(scope).is_loop {
            ast.scope_mut(scope).loop_has_return = true;
        }
        match ast.scope(scope).parent {
            Some(p) => scope = p,
            None => break,
        }
    }
}

/// The source operator symbol a node kind lowers from, for
/// `UndefinedOperator`'s `op` field. `operators::binary_opcode` is keyed by
/// `NodeKind` rather than by token text (see its module doc), so this is
/// the inverse lookup needed purely for error reporting.
fn operator_symbol(kind: NodeKind) -> &'static str {
    use NodeKind::*;
    match kind {
        Add => "+",
        Sub => "-",
        Mul => "*",
        Div => "/",
        Rem => "%",
        BitAnd => "&",
        BitOr => "|",
        BitXor => "^",
        Shl => "<<",
        Shr => ">>",
        Lt => "<",
        Le => "<=",
        Gt => ">",
        Ge => ">=",
        Eq => "==",
        Ne => "!=",
        SuffixIncrement => "++",
        SuffixDecrement => "--",
        And => "and",
        Or => "or",
        _ => "?",
    }
}

// ---- literals --------------------------------------------------------

/// An i32 literal is unsigned-decimal unless its parent is a unary negate,
/// in which case the signed-i32 minimum (`2^31`) is also accepted; i64 is
/// bounded by the actual 64-bit range.
fn validate_int_literal(ast: &Ast, node: NodeId) -> CompileResult<()> {
    let value = match ast.node(node).meta {
        Meta::IntValue(v) => v,
        _ => return Ok(()),
    };
    let run_type = ast.node(node).run_type;
    let is_negated = matches!(
        ast.node(node).parent.map(|p| ast.node(p).kind),
        Some(NodeKind::UnaryNeg)
    );
    let max = match run_type {
        RunType::I32 => {
            if is_negated {
                1u64 << 31
            } else {
                u32::MAX as u64
            }
        }
        RunType::I64 => {
            if is_negated {
                1u64 << 63
            } else {
                u64::MAX
            }
        }
        _ => return Ok(()),
    };
    if value > max {
        return Err(CompileError::IntegerLiteralOutOfRange {
            ty: run_type,
            span: ast.node(node).span,
        });
    }
    Ok(())
}

fn validate_variable_reference(ast: &mut Ast, node: NodeId) -> CompileResult<()> {
    let ty = match ast.node(node).meta {
        Meta::Bound(Binding::Definition(id)) => ast.definition(id).run_type,
        Meta::Bound(Binding::Local(id)) => ast.local(id).run_type,
        _ => unreachable!("resolver binds every VariableReference"),
    };
    ast.node_mut(node).run_type = ty;
    Ok(())
}

// ---- operators -----------------------------------------------------------

/// Validates both operands, rejects escaping operands, then dispatches the
/// operator through `operators::binary_opcode`.
fn validate_binary(ast: &mut Ast, node: NodeId, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let kind = ast.node(node).kind;
    let children = ast.node(node).children.clone();
    let (left, right) = (children[0], children[1]);

    validate_value(ast, left, true, ctx, depth + 1)?;
    reject_escape(ast, left, ast.node(right).span)?;
    validate_value(ast, right, true, ctx, depth + 1)?;
    reject_escape(ast, right, ast.node(node).span)?;

    let (lt, rt) = (ast.node(left).run_type, ast.node(right).run_type);
    let (opcode, result_type) = operators::binary_opcode(kind, lt, rt).ok_or_else(|| CompileError::UndefinedOperator {
        op: operator_symbol(kind).to_string(),
        signature: format!("{lt:?},{rt:?}"),
        span: ast.node(node).span,
    })?;
    ast.node_mut(node).meta = Meta::Operator { opcode, result_type };
    ast.node_mut(node).run_type = result_type;
    Ok(())
}

/// `UnaryMath` is keyed by the builtin callee name the parser already
/// recognized (see `parser::grammar::parse_call_or_unary_math`) plus the
/// child's run type.
fn validate_unary_math(ast: &mut Ast, node: NodeId, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let child = ast.node(node).children[0];
    validate_value(ast, child, true, ctx, depth + 1)?;
    reject_escape(ast, child, ast.node(node).span)?;

    let name = ast.node_text(node).to_string();
    let operand = ast.node(child).run_type;
    let (opcode, result_type) = operators::unary_math_opcode(&name, operand).ok_or_else(|| CompileError::UndefinedOperator {
        op: name.clone(),
        signature: format!("{operand:?}"),
        span: ast.node(node).span,
    })?;
    ast.node_mut(node).meta = Meta::Operator { opcode, result_type };
    ast.node_mut(node).run_type = result_type;
    Ok(())
}

fn validate_unary_neg(ast: &mut Ast, node: NodeId, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let child = ast.node(node).children[0];
    validate_value(ast, child, true, ctx, depth + 1)?;
    ast.node_mut(node).run_type = ast.node(child).run_type;
    Ok(())
}

/// Both operands of a short-circuit `and`/`or` must share one non-void
/// numeric run type; `or` additionally allocates the anonymous temp its
/// lowering needs to restore the tested value — the target VM's `select`
/// opcode can't stand in for this, since it evaluates both arms.
fn validate_and_or(ast: &mut Ast, node: NodeId, is_or: bool, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    let (left, right) = (children[0], children[1]);
    let op_name = if is_or { "or" } else { "and" };

    validate_value(ast, left, true, ctx, depth + 1)?;
    reject_escape(ast, left, ast.node(right).span)?;
    validate_value(ast, right, true, ctx, depth + 1)?;
    reject_escape(ast, right, ast.node(node).span)?;

    let (lt, rt) = (ast.node(left).run_type, ast.node(right).run_type);
    if lt == RunType::Void || rt == RunType::Void {
        return Err(CompileError::NonNumericBooleanOperand {
            op: op_name,
            span: ast.node(node).span,
        });
    }
    if lt != rt {
        return Err(CompileError::InconsistentBooleanType {
            op: op_name,
            left: lt,
            right: rt,
            span: ast.node(node).span,
        });
    }
    if is_or {
        let temp = alloc_temp(ast, ctx.fn_scope, lt);
        ast.node_mut(node).meta = Meta::Temp(temp);
    }
    ast.node_mut(node).run_type = lt;
    Ok(())
}

// ---- assignment / suffix --------------------------------------------------

/// The target subtree is validated first (for a memory-access target this
/// also computes its addressing metadata); the target's element/variable
/// type then bounds the right-hand side.
fn validate_assign(ast: &mut Ast, node: NodeId, value_required: bool, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    let (target, value) = (children[0], children[1]);

    validate_value(ast, target, true, ctx, depth + 1)?;
    let target_kind = ast.node(target).kind;
    let target_type = ast.node(target).run_type;

    if target_kind == NodeKind::VariableReference {
        let mutable = binding_mutable(ast, target);
        if !mutable {
            let name = ast.node_text(target).to_string();
            return Err(CompileError::AssignmentToImmutable {
                name,
                span: ast.node(node).span,
            });
        }
    }
    // A memory-access target carries no mutability gate of its own: the
    // pointer it addresses through may itself be an `immutable` binding
    // (its *address* never changes), but the memory cell it writes is not
    // a definition with a `mutable` flag at all.

    validate_value(ast, value, true, ctx, depth + 1)?;
    reject_escape(ast, value, ast.node(node).span)?;
    let value_type = ast.node(value).run_type;
    if value_type != target_type {
        return Err(CompileError::AssignmentTypeMismatch {
            target: target_type,
            value: value_type,
            span: ast.node(node).span,
        });
    }

    if value_required {
        let temp = alloc_temp(ast, ctx.fn_scope, target_type);
        ast.node_mut(node).meta = Meta::Temp(temp);
        ast.node_mut(node).run_type = target_type;
    } else {
        ast.node_mut(node).run_type = RunType::Void;
    }
    Ok(())
}

fn binding_mutable(ast: &Ast, node: NodeId) -> bool {
    match ast.node(node).meta {
        Meta::Bound(Binding::Definition(id)) => ast.definition(id).mutable,
        Meta::Bound(Binding::Local(id)) => ast.local(id).mutable,
        _ => true,
    }
}

/// Lowers to `load, push 1, add or sub, store`, with the pre-increment
/// value saved to a temp only when the expression's value is actually
/// needed (post-value semantics).
fn validate_suffix(ast: &mut Ast, node: NodeId, value_required: bool, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let kind = ast.node(node).kind;
    let target = ast.node(node).children[0];
    validate_value(ast, target, true, ctx, depth + 1)?;

    if ast.node(target).kind != NodeKind::VariableReference {
        return Err(CompileError::AssignmentTypeMismatch {
            target: ast.node(target).run_type,
            value: ast.node(target).run_type,
            span: ast.node(node).span,
        });
    }
    if !binding_mutable(ast, target) {
        let name = ast.node_text(target).to_string();
        return Err(CompileError::AssignmentToImmutable {
            name,
            span: ast.node(node).span,
        });
    }

    let ty = ast.node(target).run_type;
    let op_kind = if kind == NodeKind::SuffixIncrement {
        NodeKind::Add
    } else {
        NodeKind::Sub
    };
    let (opcode, result_type) = operators::binary_opcode(op_kind, ty, ty).ok_or_else(|| CompileError::UndefinedOperator {
        op: operator_symbol(kind).to_string(),
        signature: format!("{ty:?}"),
        span: ast.node(node).span,
    })?;
    let temp = if value_required {
        Some(alloc_temp(ast, ctx.fn_scope, ty))
    } else {
        None
    };
    ast.node_mut(node).meta = Meta::Suffix {
        opcode,
        result_type,
        temp,
    };
    ast.node_mut(node).run_type = if value_required { ty } else { RunType::Void };
    Ok(())
}

// ---- memory access ---------------------------------------------------

/// The address this node lowers to is always `(index + base) *
/// storage_bytes` (see `emit::body`), which is a multiple of
/// `storage_bytes` by construction regardless of the index expression —
/// so the largest power of two dividing the byte offset, bounded above by
/// the storage size, is always exactly `storage_bytes` itself.
fn validate_memory_access(ast: &mut Ast, node: NodeId, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let idx = ast.node(node).children[0];
    validate_value(ast, idx, true, ctx, depth + 1)?;
    reject_escape(ast, idx, ast.node(node).span)?;
    if ast.node(idx).run_type != RunType::I32 {
        return Err(CompileError::AddressMustBe32Bit {
            found: ast.node(idx).run_type,
            span: ast.node(idx).span,
        });
    }

    let def_id = match ast.node(node).meta {
        Meta::Bound(Binding::Definition(id)) => id,
        _ => unreachable!("resolver guarantees a MemoryAccess resolves to a pointer definition"),
    };
    let storage = ast
        .definition(def_id)
        .pointer_storage
        .expect("resolver guarantees the referent carries pointer_storage");
    let align = storage.storage_bytes.trailing_zeros();
    ast.node_mut(node).meta = Meta::MemoryOp {
        base: def_id,
        storage,
        align,
    };
    ast.node_mut(node).run_type = storage.element_type;
    Ok(())
}

fn validate_allocate_pages(ast: &mut Ast, node: NodeId, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let child = ast.node(node).children[0];
    validate_value(ast, child, true, ctx, depth + 1)?;
    reject_escape(ast, child, ast.node(node).span)?;
    if ast.node(child).run_type != RunType::I32 {
        return Err(CompileError::AddressMustBe32Bit {
            found: ast.node(child).run_type,
            span: ast.node(child).span,
        });
    }
    if ast.global_scope().default_memory.is_none() {
        return Err(CompileError::NoMemoryDefinedForPointer {
            name: "allocate_pages".to_string(),
            span: ast.node(node).span,
        });
    }
    ast.node_mut(node).run_type = RunType::I32;
    Ok(())
}

// ---- calls -----------------------------------------------------------

/// Arity and per-argument type must match the callee's signature; no
/// argument may escape.
fn validate_call(ast: &mut Ast, node: NodeId, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let args_node = ast.node(node).children[0];
    let arg_children = ast.node(args_node).children.clone();
    let def_id = match ast.node(node).meta {
        Meta::Bound(Binding::Definition(id)) => id,
        _ => unreachable!("resolver guarantees a Call resolves to a callable definition"),
    };
    let params = ast.definition(def_id).param_types.clone();
    let ret = ast.definition(def_id).return_type;

    if arg_children.len() != params.len() {
        return Err(CompileError::WrongArgumentCount {
            expected: params.len(),
            found: arg_children.len(),
            span: ast.node(node).span,
        });
    }
    for (&arg, &expected) in arg_children.iter().zip(params.iter()) {
        validate_value(ast, arg, true, ctx, depth + 1)?;
        reject_escape(ast, arg, ast.node(node).span)?;
        if ast.node(arg).run_type != expected {
            let name = ast.node_text(node).to_string();
            return Err(CompileError::FunctionSignatureMismatch {
                name,
                span: ast.node(arg).span,
            });
        }
    }
    ast.node_mut(node).run_type = ret;
    Ok(())
}

// ---- control flow ------------------------------------------------------

/// A bare `if` and the condition half of an `if`/`else` pair both dispatch
/// through this one function — reached either directly (a bare
/// `if` with no `else`) or as `Else`'s first child (a paired `if`/`else`,
/// where the body's `value_required` is the outer context's rather than
/// hardwired `false`) — distinguished by checking the node's own parent.
fn validate_if(ast: &mut Ast, node: NodeId, value_required: bool, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    let (cond, body) = (children[0], children[1]);

    validate_value(ast, cond, true, ctx, depth + 1)?;
    reject_escape(ast, cond, ast.node(body).span)?;
    if !ast.node(cond).run_type.is_numeric() {
        return Err(CompileError::BadCondition {
            found: ast.node(cond).run_type,
            span: ast.node(cond).span,
        });
    }

    let paired_with_else = matches!(
        ast.node(node).parent.map(|p| ast.node(p).kind),
        Some(NodeKind::Else)
    );
    let body_value_required = if paired_with_else { value_required } else { false };
    validate_value(ast, body, body_value_required, ctx, depth + 1)?;

    ast.node_mut(node).run_type = ast.node(body).run_type;
    ast.node_mut(node).always_escapes = ast.node(body).always_escapes;
    if !paired_with_else {
        // A bare `if`'s body must not produce a value: it can fall
        // through (the condition might be false), so it never escapes,
        // and its own run type is void regardless of what its body
        // computed — any non-void trailing value in the body was already
        // marked `drop_value` by `validate_value` above.
        ast.node_mut(node).run_type = RunType::Void;
        ast.node_mut(node).always_escapes = false;
    }
    Ok(())
}

fn validate_else(ast: &mut Ast, node: NodeId, value_required: bool, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    let (if_node, else_value) = (children[0], children[1]);

    validate_value(ast, if_node, value_required, ctx, depth + 1)?;
    validate_value(ast, else_value, value_required, ctx, depth + 1)?;

    let (then_escapes, then_type) = (ast.node(if_node).always_escapes, ast.node(if_node).run_type);
    let (else_escapes, else_type) = (ast.node(else_value).always_escapes, ast.node(else_value).run_type);

    let combined_type = if then_escapes && else_escapes {
        RunType::Void
    } else if then_escapes {
        else_type
    } else if else_escapes {
        then_type
    } else if then_type != else_type {
        return Err(CompileError::InconsistentIfElseType {
            then_type,
            else_type,
            span: ast.node(node).span,
        });
    } else {
        then_type
    };

    ast.node_mut(node).always_escapes = then_escapes && else_escapes;
    // Both branches were just validated with this same `value_required`.
    // When it's false, each branch already dropped its own trailing value
    // internally (the bare-`if` path above does the same) — the
    // `if`/`else` itself leaves nothing on the stack regardless of
    // `combined_type`, so it must be typed void or the emitter would open
    // a non-void `if` whose branches push nothing and then drop on an
    // empty stack.
    ast.node_mut(node).run_type = if value_required { combined_type } else { RunType::Void };
    Ok(())
}

fn validate_block(ast: &mut Ast, node: NodeId, value_required: bool, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let children = ast.node(node).children.clone();
    if children.is_empty() {
        ast.node_mut(node).run_type = RunType::Void;
        ast.node_mut(node).always_escapes = false;
        return Ok(());
    }
    let last_index = children.len() - 1;
    let mut escaped_at: Option<Span> = None;
    for (i, &child) in children.iter().enumerate() {
        if let Some(escape_span) = escaped_at {
            return Err(CompileError::UnreachableCode {
                escape_span,
                unreachable_span: ast.node(child).span,
            });
        }
        let required = if i == last_index { value_required } else { false };
        validate_value(ast, child, required, ctx, depth + 1)?;
        if ast.node(child).always_escapes {
            escaped_at = Some(ast.node(child).span);
        }
    }
    let last = children[last_index];
    ast.node_mut(node).run_type = ast.node(last).run_type;
    ast.node_mut(node).always_escapes = ast.node(last).always_escapes;
    Ok(())
}

/// `node.scope` is the scope the loop itself creates (the same convention
/// every scope-creating node follows — see `Block`'s parser, which
/// allocates itself *into* the scope it creates rather than the outer
/// one), so it doubles as the lookup key for this loop's recorded yield
/// points and return-reachability flag.
fn validate_loop(ast: &mut Ast, node: NodeId, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let body = ast.node(node).children[0];
    let loop_scope = ast.node(node).scope;

    validate_value(ast, body, false, ctx, depth + 1)?;

    let has_exit = !ast.scope(loop_scope).loop_yields.is_empty();
    let has_return = ast.scope(loop_scope).loop_has_return;
    if !has_exit && !has_return {
        return Err(CompileError::InfiniteLoop {
            span: ast.node(node).span,
        });
    }

    if has_return && !has_exit {
        ast.node_mut(node).always_escapes = true;
        ast.node_mut(node).run_type = ctx.return_type;
        return Ok(());
    }

    // `break` is fixed void — it evaluates and drops any trailing
    // expression rather than contributing to the loop's type (see
    // `validate_break_or_yield`) — so only `yield` entries participate in
    // type unification here.
    let yield_nodes: Vec<NodeId> = ast
        .scope(loop_scope)
        .loop_yields
        .iter()
        .copied()
        .filter(|&id| ast.node(id).kind == NodeKind::Yield)
        .collect();
    let mut loop_type = RunType::Void;
    for (i, &yield_node) in yield_nodes.iter().enumerate() {
        let ty = ast.node(yield_node).run_type;
        if i == 0 {
            loop_type = ty;
        } else if ty != loop_type {
            return Err(CompileError::InconsistentLoopYieldType {
                first: loop_type,
                second: ty,
                span: ast.node(yield_node).span,
            });
        }
    }
    ast.node_mut(node).run_type = loop_type;
    ast.node_mut(node).always_escapes = false;
    Ok(())
}

fn validate_break_or_yield(ast: &mut Ast, node: NodeId, is_yield: bool, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let value_child = ast.node(node).children.first().copied();
    let ty = match value_child {
        Some(val) => {
            validate_value(ast, val, true, ctx, depth + 1)?;
            reject_escape(ast, val, ast.node(node).span)?;
            let t = ast.node(val).run_type;
            if is_yield {
                t
            } else {
                // `break`'s optional value is evaluated purely for side
                // effect — `Break`'s run type is fixed at void — so mark
                // it dropped if it left a value.
                if t != RunType::Void {
                    ast.node_mut(val).drop_value = true;
                }
                RunType::Void
            }
        }
        None => RunType::Void,
    };

    let keyword = if is_yield { "yield" } else { "break" };
    let loop_scope = find_enclosing_loop(ast, ast.node(node).scope).ok_or(CompileError::MisplacedBreakYieldContinue {
        keyword,
        span: ast.node(node).span,
    })?;
    let loop_node = ast
        .scope(loop_scope)
        .loop_node
        .expect("a scope with is_loop set always has loop_node");
    ast.scope_mut(loop_scope).loop_yields.push(node);
    ast.node_mut(node).meta = Meta::LoopTarget { loop_node };
    ast.node_mut(node).always_escapes = true;
    ast.node_mut(node).run_type = ty;
    Ok(())
}

fn validate_continue(ast: &mut Ast, node: NodeId, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    if let Some(val) = ast.node(node).children.first().copied() {
        validate_value(ast, val, false, ctx, depth + 1)?;
    }
    let loop_scope = find_enclosing_loop(ast, ast.node(node).scope).ok_or(CompileError::MisplacedBreakYieldContinue {
        keyword: "continue",
        span: ast.node(node).span,
    })?;
    let loop_node = ast
        .scope(loop_scope)
        .loop_node
        .expect("a scope with is_loop set always has loop_node");
    ast.node_mut(node).meta = Meta::LoopTarget { loop_node };
    ast.node_mut(node).always_escapes = true;
    ast.node_mut(node).run_type = RunType::Void;
    Ok(())
}

fn validate_return(ast: &mut Ast, node: NodeId, ctx: FnCtx, depth: usize) -> CompileResult<()> {
    let value_child = ast.node(node).children.first().copied();
    let value_type = match value_child {
        Some(val) => {
            validate_value(ast, val, true, ctx, depth + 1)?;
            reject_escape(ast, val, ast.node(node).span)?;
            ast.node(val).run_type
        }
        None => RunType::Void,
    };
    if value_type != ctx.return_type {
        return Err(CompileError::ReturnTypeMismatch {
            declared: ctx.return_type,
            found: value_type,
            span: ast.node(node).span,
        });
    }
    mark_loops_have_return(ast, ast.node(node).scope, ctx.fn_scope);
    ast.node_mut(node).always_escapes = true;
    ast.node_mut(node).run_type = value_type;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::error::CompileError;

    #[test]
    fn accepts_a_simple_exported_function() {
        let ast = crate::parse("add: fn (a: i32, b: i32) i32 { a + b }\nexport add\n").unwrap();
        let root = ast.node(ast.root.unwrap());
        let def = ast.node(root.children[0]);
        assert_eq!(def.run_type, crate::ast::RunType::I32);
    }

    #[test]
    fn infinite_loop_with_no_exit_is_rejected() {
        let err = crate::parse("main: fn () void { loop { i: i32 = 0\n i++ } }\n");
        assert!(matches!(err, Err(CompileError::InfiniteLoop { .. })));
    }

    #[test]
    fn loop_with_break_is_not_infinite() {
        let ast = crate::parse("main: fn () void { loop { break } }\n").unwrap();
        let _ = ast;
    }

    #[test]
    fn assigning_to_immutable_local_is_rejected() {
        let err = crate::parse("main: fn () void { a: immutable i32 = 5\n a = 6 }\n");
        assert!(matches!(err, Err(CompileError::AssignmentToImmutable { .. })));
    }

    #[test]
    fn mismatched_if_else_types_are_rejected() {
        let err = crate::parse("main: fn () i32 { x: i32 = if (1) { 1 } else { 2.0 }\n x }\n");
        assert!(matches!(err, Err(CompileError::InconsistentIfElseType { .. })));
    }

    #[test]
    fn wrong_argument_count_is_rejected() {
        let err = crate::parse("add: fn (a: i32, b: i32) i32 { a + b }\nmain: fn () i32 { add(1) }\n");
        assert!(matches!(err, Err(CompileError::WrongArgumentCount { .. })));
    }

    #[test]
    fn memory_access_without_a_default_memory_is_rejected() {
        let err = crate::parse("p: ptr i32 = 0\nmain: fn () i32 { p[0] }\n");
        assert!(matches!(
            err,
            Err(CompileError::NoMemoryDefinedForPointer { .. })
        ));
    }

    #[test]
    fn memory_access_alignment_matches_storage_size() {
        let ast = crate::parse("memory 1\np: ptr i32 = 0\nmain: fn () i32 { p[1] }\n").unwrap();
        let root = ast.node(ast.root.unwrap());
        // root children: DefaultMemory, Definition(p), Definition(main)
        let main_def = ast.node(root.children[2]);
        let fn_lit = ast.node(main_def.children[0]);
        let block = ast.node(fn_lit.children[1]);
        let access = ast.node(block.children[0]);
        match access.meta {
            crate::ast::Meta::MemoryOp { align, .. } => assert_eq!(align, 2),
            _ => panic!("expected MemoryOp meta"),
        }
    }

    #[test]
    fn short_circuit_or_allocates_a_temp() {
        let ast = crate::parse("main: fn () i32 { a: i32 = 1\n b: i32 = 0\n if (a or b) { 1 } else { 0 } }\n").unwrap();
        let root = ast.node(ast.root.unwrap());
        // root children: Definition(main)
        let main_def = ast.node(root.children[0]);
        let fn_lit = ast.node(main_def.children[0]);
        let block = ast.node(fn_lit.children[1]);
        // block children: Definition(a), Definition(b), Else(If(cond, body), else_value)
        let else_node = ast.node(block.children[2]);
        let if_node = ast.node(else_node.children[0]);
        let cond_paren = ast.node(if_node.children[0]);
        let or_node = ast.node(cond_paren.children[0]);
        assert!(matches!(or_node.meta, crate::ast::Meta::Temp(_)));
    }

    #[test]
    fn unreachable_code_after_return_is_rejected() {
        let err = crate::parse("main: fn () i32 { return 1\n 2 }\n");
        assert!(matches!(err, Err(CompileError::UnreachableCode { .. })));
    }

    #[test]
    fn return_type_mismatch_is_rejected() {
        let err = crate::parse("main: fn () i32 { return 1.0 }\n");
        assert!(matches!(err, Err(CompileError::ReturnTypeMismatch { .. })));
    }
}
