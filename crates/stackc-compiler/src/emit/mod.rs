//! The emitter, lowering a validated [`crate::ast::Ast`] to the target VM's
//! binary module format.
//!
//! `lib.rs` documents emission as read-only over the AST — [`emit_module`]
//! takes `&Ast`, never `&mut Ast` — so anything the body emitter needs to
//! track across its recursive descent (current block-nesting depth, a
//! loop's outer-block depth for `break`/`yield`/`continue` targets) lives in
//! a local [`body::Emitter`], not in node `meta`.

pub mod body;
pub mod module;
pub mod opcode;
pub mod sink;

use crate::ast::Ast;
use crate::error::CompileResult;

/// Compile a validated AST down to a complete module byte array: header,
/// then the eleven standard sections in canonical order, each populated
/// only when this module actually has content for it.
pub fn emit_module(ast: &Ast) -> CompileResult<Vec<u8>> {
    module::emit(ast)
}
