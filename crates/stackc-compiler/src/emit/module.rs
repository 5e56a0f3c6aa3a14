//! Module/section-level emission.
//!
//! Index spaces (functions, globals) are computed once up front — imports
//! first, then module-defined entries, exactly mirroring how the WASM
//! binary format itself numbers them — and threaded through every section
//! that needs to reference an entry by index (export, start, call, global
//! initializer). Memory and table each have at most one slot, imported xor
//! defined, so they need no index map at all: their index is always 0.

use std::collections::HashMap;

use crate::ast::{Ast, Definition, DefinitionId, DefinitionKind, RunType};
use crate::emit::body;
use crate::emit::sink::ByteSink;
use crate::error::{CompileError, CompileResult, Span};

const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];
const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

const SECTION_TYPE: u8 = 1;
const SECTION_IMPORT: u8 = 2;
const SECTION_FUNCTION: u8 = 3;
const SECTION_TABLE: u8 = 4;
const SECTION_MEMORY: u8 = 5;
const SECTION_GLOBAL: u8 = 6;
const SECTION_EXPORT: u8 = 7;
const SECTION_START: u8 = 8;
const SECTION_ELEMENT: u8 = 9;
const SECTION_CODE: u8 = 10;

const EXTERNAL_KIND_FUNCTION: u8 = 0;
const EXTERNAL_KIND_TABLE: u8 = 1;
const EXTERNAL_KIND_MEMORY: u8 = 2;
const EXTERNAL_KIND_GLOBAL: u8 = 3;

const ELEMENT_TYPE_ANYFUNC: u8 = 0x70;

pub(crate) fn value_type_byte(ty: RunType) -> u8 {
    match ty {
        RunType::I32 => 0x7F,
        RunType::I64 => 0x7E,
        RunType::F32 => 0x7D,
        RunType::F64 => 0x7C,
        RunType::Void => 0x40,
    }
}

/// The function- and global-index spaces, assigned once before any section
/// is written: imports occupy the low indices, module-defined entries
/// follow, in the declaration order the parser recorded them.
pub(crate) struct Indices {
    functions: HashMap<DefinitionId, u32>,
    globals: HashMap<DefinitionId, u32>,
}

impl Indices {
    fn build(ast: &Ast) -> Self {
        let gs = ast.global_scope();
        let mut functions = HashMap::new();
        let mut next = 0u32;
        for &id in gs.imported_functions.iter().chain(gs.functions.iter()) {
            functions.insert(id, next);
            next += 1;
        }
        let mut globals = HashMap::new();
        let mut next = 0u32;
        for &id in gs.imported_globals.iter().chain(gs.variables.iter()) {
            globals.insert(id, next);
            next += 1;
        }
        Self { functions, globals }
    }

    pub(crate) fn function(&self, id: DefinitionId) -> u32 {
        self.functions[&id]
    }

    pub(crate) fn global(&self, id: DefinitionId) -> u32 {
        self.globals[&id]
    }
}

pub fn emit(ast: &Ast) -> CompileResult<Vec<u8>> {
    let indices = Indices::build(ast);
    let gs = ast.global_scope();

    let mut out = ByteSink::new();
    out.push_bytes(&MAGIC);
    out.push_bytes(&VERSION);

    emit_type_section(&mut out, ast)?;
    emit_import_section(&mut out, ast)?;
    emit_function_section(&mut out, ast, &indices)?;
    emit_table_section(&mut out, ast)?;
    emit_memory_section(&mut out, ast)?;
    emit_global_section(&mut out, ast, &indices)?;
    emit_export_section(&mut out, ast, &indices)?;
    emit_start_section(&mut out, ast, &indices)?;
    emit_element_section(&mut out, ast, &indices)?;
    emit_code_section(&mut out, ast, &indices)?;

    let _ = gs;
    Ok(out.into_bytes())
}

fn no_span() -> Span {
    Span::new(0, 0)
}

/// One entry per unique signature interned during parsing (function/
/// function-pointer signature interning): function-type tag `0x60`, param
/// count + types, return count (0 or 1) + type.
fn emit_type_section(out: &mut ByteSink, ast: &Ast) -> CompileResult<()> {
    let signatures = &ast.global_scope().signatures;
    if signatures.is_empty() {
        return Ok(());
    }
    out.push_byte(SECTION_TYPE);
    let placeholder = out.reserve_size();
    out.push_uleb128_u32(signatures.len() as u32);
    for (ret, params) in signatures {
        out.push_byte(0x60);
        out.push_uleb128_u32(params.len() as u32);
        for &p in params {
            out.push_byte(value_type_byte(p));
        }
        if *ret == RunType::Void {
            out.push_uleb128_u32(0);
        } else {
            out.push_uleb128_u32(1);
            out.push_byte(value_type_byte(*ret));
        }
    }
    out.backpatch_size(placeholder);
    Ok(())
}

fn import_module_and_field(def: &Definition) -> (&str, &str) {
    def.import_source
        .as_deref()
        .and_then(|s| s.split_once('/'))
        .expect("every imported Definition carries a validated module/field import_source")
}

/// Imported functions, then imported globals, then the imported memory or
/// table if either is present — the source-text order among imports within
/// each kind is preserved (it is exactly the order `declare_global` pushed
/// them onto `imported_functions`/`imported_globals`), only the grouping by
/// kind is imposed.
fn emit_import_section(out: &mut ByteSink, ast: &Ast) -> CompileResult<()> {
    let gs = ast.global_scope();
    let imported_memory = gs.default_memory.filter(|&id| ast.definition(id).import_source.is_some());
    let imported_table = gs.default_table.filter(|&id| ast.definition(id).import_source.is_some());

    let count = gs.imported_functions.len()
        + gs.imported_globals.len()
        + imported_memory.is_some() as usize
        + imported_table.is_some() as usize;
    if count == 0 {
        return Ok(());
    }

    out.push_byte(SECTION_IMPORT);
    let placeholder = out.reserve_size();
    out.push_uleb128_u32(count as u32);

    for &id in &gs.imported_functions {
        let def = ast.definition(id);
        let (module, field) = import_module_and_field(def);
        out.push_string(module);
        out.push_string(field);
        out.push_byte(EXTERNAL_KIND_FUNCTION);
        out.push_uleb128_u32(def.signature_index.expect("an imported function always has a signature"));
    }
    for &id in &gs.imported_globals {
        let def = ast.definition(id);
        let (module, field) = import_module_and_field(def);
        out.push_string(module);
        out.push_string(field);
        out.push_byte(EXTERNAL_KIND_GLOBAL);
        out.push_byte(value_type_byte(def.run_type));
        out.push_byte(def.mutable as u8);
    }
    if let Some(id) = imported_memory {
        let def = ast.definition(id);
        let (module, field) = import_module_and_field(def);
        out.push_string(module);
        out.push_string(field);
        out.push_byte(EXTERNAL_KIND_MEMORY);
        emit_limits(out, def.limits.expect("a memory Definition always carries limits"))?;
    }
    if let Some(id) = imported_table {
        let def = ast.definition(id);
        let (module, field) = import_module_and_field(def);
        out.push_string(module);
        out.push_string(field);
        out.push_byte(EXTERNAL_KIND_TABLE);
        out.push_byte(ELEMENT_TYPE_ANYFUNC);
        emit_limits(out, def.limits.expect("a table Definition always carries limits"))?;
    }

    out.backpatch_size(placeholder);
    Ok(())
}

fn emit_limits(out: &mut ByteSink, (initial, maximum): (u32, Option<u32>)) -> CompileResult<()> {
    match maximum {
        Some(max) => {
            out.push_byte(1);
            out.push_uleb128_u32(initial);
            out.push_uleb128_u32(max);
        }
        None => {
            out.push_byte(0);
            out.push_uleb128_u32(initial);
        }
    }
    Ok(())
}

/// One signature index per module-defined (non-imported) function, in the
/// same order the function section's indices occupy `[M..M+N)`.
fn emit_function_section(out: &mut ByteSink, ast: &Ast, indices: &Indices) -> CompileResult<()> {
    let gs = ast.global_scope();
    if gs.functions.is_empty() {
        return Ok(());
    }
    out.push_byte(SECTION_FUNCTION);
    let placeholder = out.reserve_size();
    out.push_uleb128_u32(gs.functions.len() as u32);
    for &id in &gs.functions {
        let _ = indices.function(id);
        let sig = ast.definition(id).signature_index.expect("every function carries a signature");
        out.push_uleb128_u32(sig);
    }
    out.backpatch_size(placeholder);
    Ok(())
}

fn emit_table_section(out: &mut ByteSink, ast: &Ast) -> CompileResult<()> {
    let gs = ast.global_scope();
    let Some(id) = gs.default_table else { return Ok(()) };
    if ast.definition(id).import_source.is_some() {
        return Ok(());
    }
    out.push_byte(SECTION_TABLE);
    let placeholder = out.reserve_size();
    out.push_uleb128_u32(1);
    out.push_byte(ELEMENT_TYPE_ANYFUNC);
    emit_limits(out, ast.definition(id).limits.expect("a table Definition always carries limits"))?;
    out.backpatch_size(placeholder);
    Ok(())
}

fn emit_memory_section(out: &mut ByteSink, ast: &Ast) -> CompileResult<()> {
    let gs = ast.global_scope();
    let Some(id) = gs.default_memory else { return Ok(()) };
    if ast.definition(id).import_source.is_some() {
        return Ok(());
    }
    out.push_byte(SECTION_MEMORY);
    let placeholder = out.reserve_size();
    out.push_uleb128_u32(1);
    emit_limits(out, ast.definition(id).limits.expect("a memory Definition always carries limits"))?;
    out.backpatch_size(placeholder);
    Ok(())
}

/// One entry per module-defined (non-imported) global: content type,
/// mutability flag, then an initializer expression terminated by `end`.
/// A plain scalar's initializer is a typed constant; a pointer's is its
/// address expression (also a constant or an imported-immutable-global
/// reference); a function pointer's is the target function's own index in
/// the function index space — it's recorded as mutable-global-like (i32
/// with a signature index); see [`Indices`]'s doc comment.
fn emit_global_section(out: &mut ByteSink, ast: &Ast, indices: &Indices) -> CompileResult<()> {
    let gs = ast.global_scope();
    if gs.variables.is_empty() {
        return Ok(());
    }
    out.push_byte(SECTION_GLOBAL);
    let placeholder = out.reserve_size();
    out.push_uleb128_u32(gs.variables.len() as u32);
    for &id in &gs.variables {
        let def = ast.definition(id);
        out.push_byte(value_type_byte(def.run_type));
        out.push_byte(def.mutable as u8);
        emit_global_initializer(out, ast, id, indices)?;
        out.push_opcode(crate::emit::opcode::Opcode::End);
    }
    out.backpatch_size(placeholder);
    Ok(())
}

fn emit_global_initializer(out: &mut ByteSink, ast: &Ast, id: DefinitionId, indices: &Indices) -> CompileResult<()> {
    use crate::emit::opcode::Opcode;
    let def = ast.definition(id);

    if def.signature_index.is_some() {
        // Function pointer: its declared initializer node (when present)
        // is a `VariableReference` naming the target function.
        let target_index = def
            .initializer
            .and_then(|init| match ast.node(init).meta {
                crate::ast::Meta::Bound(crate::ast::Binding::Definition(target)) => Some(indices.function(target)),
                _ => None,
            })
            .unwrap_or(0);
        out.push_opcode(Opcode::I32Const);
        out.push_sleb128(target_index as i64);
        return Ok(());
    }

    let init = def.initializer.expect("validator rejects a global with no initializer");
    if def.pointer_storage.is_some() {
        // Pointer: its one child is the `PointerLiteral`, whose own child
        // is the address expression.
        let ptr_node = init;
        let addr = *ast
            .node(ptr_node)
            .children
            .first()
            .expect("validator rejects a pointer binding with no address initializer");
        emit_constant_initializer(out, ast, addr, indices)
    } else {
        emit_constant_initializer(out, ast, init, indices)
    }
}

/// A global initializer is always exactly a numeric literal or a reference
/// to an already-emitted imported immutable global — never a full
/// expression — so this is a small standalone lowering rather than a call
/// into [`body`].
fn emit_constant_initializer(out: &mut ByteSink, ast: &Ast, node: crate::ast::NodeId, indices: &Indices) -> CompileResult<()> {
    use crate::ast::Meta;
    use crate::emit::opcode::Opcode;
    match ast.node(node).meta {
        Meta::IntValue(v) => {
            match ast.node(node).run_type {
                RunType::I32 => {
                    out.push_opcode(Opcode::I32Const);
                    out.push_sleb128(v as i32 as i64);
                }
                RunType::I64 => {
                    out.push_opcode(Opcode::I64Const);
                    out.push_sleb128(v as i64);
                }
                _ => unreachable!("an int literal's run_type is always I32 or I64"),
            }
            Ok(())
        }
        Meta::FloatValue(v) => {
            match ast.node(node).run_type {
                RunType::F32 => {
                    out.push_opcode(Opcode::F32Const);
                    out.push_f32(v.0 as f32);
                }
                RunType::F64 => {
                    out.push_opcode(Opcode::F64Const);
                    out.push_f64(v.0);
                }
                _ => unreachable!("a float literal's run_type is always F32 or F64"),
            }
            Ok(())
        }
        Meta::Bound(crate::ast::Binding::Definition(target)) => {
            out.push_opcode(Opcode::GlobalGet);
            out.push_uleb128_u32(indices.global(target));
            Ok(())
        }
        _ => Err(CompileError::IntegerOutOfRangeInCodeGen { span: ast.node(node).span }),
    }
}

/// Exports carry a uniform `(name, kind, index)` shape regardless of what
/// they name, dispatched here on the exported definition's own `kind`/
/// `pointer_storage`/`signature_index`.
fn emit_export_section(out: &mut ByteSink, ast: &Ast, indices: &Indices) -> CompileResult<()> {
    let gs = ast.global_scope();
    if gs.exports.is_empty() {
        return Ok(());
    }
    out.push_byte(SECTION_EXPORT);
    let placeholder = out.reserve_size();
    out.push_uleb128_u32(gs.exports.len() as u32);
    for &id in &gs.exports {
        let def = ast.definition(id);
        let name = def.export_name.as_deref().expect("collect_exports always sets export_name");
        out.push_string(name);
        match def.kind {
            DefinitionKind::Function => {
                out.push_byte(EXTERNAL_KIND_FUNCTION);
                out.push_uleb128_u32(indices.function(id));
            }
            DefinitionKind::Memory => {
                out.push_byte(EXTERNAL_KIND_MEMORY);
                out.push_uleb128_u32(0);
            }
            DefinitionKind::Table => {
                out.push_byte(EXTERNAL_KIND_TABLE);
                out.push_uleb128_u32(0);
            }
            DefinitionKind::Global => {
                out.push_byte(EXTERNAL_KIND_GLOBAL);
                out.push_uleb128_u32(indices.global(id));
            }
        }
    }
    out.backpatch_size(placeholder);
    Ok(())
}

/// A nullary `main` returning void in the global scope becomes the
/// module's start function, if one exists.
fn emit_start_section(out: &mut ByteSink, ast: &Ast, indices: &Indices) -> CompileResult<()> {
    let gs = ast.global_scope();
    let main = gs
        .functions
        .iter()
        .find(|&&id| {
            let def = ast.definition(id);
            def.name == "main" && def.return_type == RunType::Void && def.param_types.is_empty()
        });
    let Some(&id) = main else { return Ok(()) };
    out.push_byte(SECTION_START);
    let placeholder = out.reserve_size();
    out.push_uleb128_u32(indices.function(id));
    out.backpatch_size(placeholder);
    Ok(())
}

/// Populates the default table with an identity mapping from table slot to
/// function index, over the whole function index space — the only way a
/// `call_indirect` through a function-pointer global (whose value is
/// exactly that same function index, see [`emit_global_initializer`]) ever
/// resolves to the right function. Grounded on the element-section pattern
/// `wasm_encoder`-based compilers use to back `call_indirect`/lambda
/// dispatch (see DESIGN.md).
fn emit_element_section(out: &mut ByteSink, ast: &Ast, indices: &Indices) -> CompileResult<()> {
    let gs = ast.global_scope();
    let Some(_) = gs.default_table else { return Ok(()) };
    let total_functions = gs.imported_functions.len() + gs.functions.len();
    if total_functions == 0 {
        return Ok(());
    }
    out.push_byte(SECTION_ELEMENT);
    let placeholder = out.reserve_size();
    out.push_uleb128_u32(1);
    out.push_uleb128_u32(0); // table index 0
    out.push_opcode(crate::emit::opcode::Opcode::I32Const);
    out.push_sleb128(0);
    out.push_opcode(crate::emit::opcode::Opcode::End);
    out.push_uleb128_u32(total_functions as u32);
    for i in 0..total_functions as u32 {
        let _ = indices;
        out.push_uleb128_u32(i);
    }
    out.backpatch_size(placeholder);
    Ok(())
}

/// One entry per module-defined function: body-size placeholder,
/// local-declarations (beyond parameters), bytecode, `end`. Local indices
/// are assigned here and nowhere else: parameters occupy `[0..P)` (already
/// indexed implicitly by parameter position), ordinary locals follow, then
/// anonymous temps the validator allocated, in the order `function_locals`
/// recorded them.
fn emit_code_section(out: &mut ByteSink, ast: &Ast, indices: &Indices) -> CompileResult<()> {
    let gs = ast.global_scope();
    if gs.functions.is_empty() {
        return Ok(());
    }
    out.push_byte(SECTION_CODE);
    let placeholder = out.reserve_size();
    out.push_uleb128_u32(gs.functions.len() as u32);
    for &id in &gs.functions {
        emit_function_body(out, ast, id, indices)?;
    }
    out.backpatch_size(placeholder);
    Ok(())
}

fn emit_function_body(out: &mut ByteSink, ast: &Ast, def_id: DefinitionId, indices: &Indices) -> CompileResult<()> {
    let def = ast.definition(def_id);
    let def_node = locate_def_node(ast, def_id);
    let fn_lit = ast.node(def_node).children[0];
    let fn_scope = ast.node(fn_lit).scope;
    let local_ids = &ast.scope(fn_scope).function_locals;
    let param_count = def.param_types.len();

    let mut local_index: HashMap<crate::ast::LocalId, u32> = HashMap::new();
    for (i, &local_id) in local_ids.iter().enumerate() {
        local_index.insert(local_id, i as u32);
    }

    let body_sink_placeholder_host = out.reserve_size();

    // Run-length-encode the non-parameter locals by consecutive run type,
    // the way the binary format wants them declared: count-then-type for
    // each declared local beyond parameters.
    let extra_locals = &local_ids[param_count..];
    let mut runs: Vec<(u32, RunType)> = Vec::new();
    for &local_id in extra_locals {
        let ty = ast.local(local_id).run_type;
        match runs.last_mut() {
            Some((count, last_ty)) if *last_ty == ty => *count += 1,
            _ => runs.push((1, ty)),
        }
    }
    out.push_uleb128_u32(runs.len() as u32);
    for (count, ty) in &runs {
        out.push_uleb128_u32(*count);
        out.push_byte(value_type_byte(*ty));
    }

    let body_node = ast.node(fn_lit).children[1];
    body::emit_function(out, ast, body_node, indices, &local_index)?;

    out.push_opcode(crate::emit::opcode::Opcode::End);
    out.backpatch_size(body_sink_placeholder_host);
    Ok(())
}

/// Finds the top-level `Definition` node bound to `def_id`, needed because
/// `Definition` (the data record) doesn't itself carry a back-reference to
/// its declaring node.
fn locate_def_node(ast: &Ast, def_id: DefinitionId) -> crate::ast::NodeId {
    let root = ast.node(ast.root.expect("parser always sets root"));
    for &node in &root.children {
        if let crate::ast::Meta::Bound(crate::ast::Binding::Definition(id)) = ast.node(node).meta {
            if id == def_id {
                return node;
            }
        }
    }
    unreachable!("every module-defined function has a top-level Definition node")
}

#[cfg(test)]
mod tests {
    use crate::emit::sink::decode_uleb128;
    use std::collections::HashMap;

    fn compile(source: &str) -> Vec<u8> {
        crate::compile(source).unwrap()
    }

    /// Walks the section id/length-prefixed entries following the 8-byte
    /// header, returning each section id mapped to its payload bytes.
    fn sections(bytes: &[u8]) -> HashMap<u8, &[u8]> {
        let mut out = HashMap::new();
        let mut pos = 8;
        while pos < bytes.len() {
            let id = bytes[pos];
            pos += 1;
            let (len, consumed) = decode_uleb128(&bytes[pos..]);
            pos += consumed;
            let payload = &bytes[pos..pos + len as usize];
            out.insert(id, payload);
            pos += len as usize;
        }
        out
    }

    #[test]
    fn header_is_the_target_vm_magic_and_version() {
        let bytes = compile("main: fn () void { }\n");
        assert_eq!(&bytes[0..4], &[0x00, 0x61, 0x73, 0x6D]);
        assert_eq!(&bytes[4..8], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn exported_function_produces_an_export_section() {
        let bytes = compile("add: fn (a: i32, b: i32) i32 { a + b }\nexport add\n");
        let sections = sections(&bytes);
        let export = sections.get(&7).expect("export section present");
        assert!(export.windows(3).any(|w| w == b"add"));
    }

    #[test]
    fn nullary_void_main_gets_a_start_section() {
        let bytes = compile("main: fn () void { }\n");
        let sections = sections(&bytes);
        assert!(sections.contains_key(&8));
    }

    #[test]
    fn function_taking_args_gets_no_start_section() {
        let bytes = compile("add: fn (a: i32, b: i32) i32 { a + b }\nexport add\n");
        let sections = sections(&bytes);
        assert!(!sections.contains_key(&8));
    }

    #[test]
    fn default_memory_produces_a_memory_section() {
        let bytes = compile("memory 1\nmain: fn () void { }\n");
        let sections = sections(&bytes);
        assert!(sections.contains_key(&5));
    }

    #[test]
    fn function_pointer_global_gets_a_table_and_element_section() {
        let bytes = compile(
            "table 1\nadd: fn (a: i32, b: i32) i32 { a + b }\nfp: fn_ptr (i32, i32) i32 = add\nmain: fn () void { }\n",
        );
        let sections = sections(&bytes);
        assert!(sections.contains_key(&4));
        assert!(sections.contains_key(&9));
        assert!(sections.contains_key(&6));
    }

    #[test]
    fn module_with_no_signatures_has_no_type_section() {
        let sections = sections(&compile("x: i32 = 0\n"));
        assert!(!sections.contains_key(&1));
    }
}
