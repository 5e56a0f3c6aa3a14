//! Context-sensitive kind overrides: a handful of node kinds are not
//! decided purely by the token that introduces them but by the parent
//! they are about to be placed under. A recursive-descent parser already
//! knows that parent from which subroutine is calling — these functions
//! exist anyway, as a named, single-purpose table, so the override rules
//! read as a lookup rather than being scattered as inline `if`s at each
//! call site.

use crate::syntax::NodeKind;

/// A parenthesized group (`( ... )`) is one lexical shape; which concrete
/// kind it becomes depends on what constitutes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParenRole {
    /// A plain grouping expression: `(a + b)`.
    Group,
    /// A call's argument list: `f(a, b)`.
    ArgumentList,
    /// A function literal's parameter list: `fn (a: i32, b: i32) i32 { .. }`.
    ParameterList,
    /// An unnamed type list, for `fn_ptr`/imported-function signatures:
    /// `fn_ptr (i32, i32) i32`.
    TypeList,
}

impl ParenRole {
    pub fn node_kind(self) -> NodeKind {
        match self {
            ParenRole::Group => NodeKind::Paren,
            ParenRole::ArgumentList => NodeKind::ArgumentList,
            ParenRole::ParameterList => NodeKind::ParameterList,
            ParenRole::TypeList => NodeKind::TypeList,
        }
    }
}

/// `Definition` becomes `Declaration` inside an import or a parameter list:
/// both are named-and-typed slots with no initializer expression.
pub fn definition_or_declaration(inside_param_list_or_import: bool) -> NodeKind {
    if inside_param_list_or_import {
        NodeKind::Declaration
    } else {
        NodeKind::Definition
    }
}

/// `FunctionLiteral` becomes `FunctionSignature` inside a `Declaration`
/// (an imported function's type clause — body forbidden there).
pub fn function_literal_or_signature(inside_declaration: bool) -> NodeKind {
    if inside_declaration {
        NodeKind::FunctionSignature
    } else {
        NodeKind::FunctionLiteral
    }
}

/// `DefaultMemory`/`DefaultTable` become `ExportType` inside an `Export`
/// (`export memory`, `export table`): the export names the module's
/// singleton default slot itself rather than a user definition.
pub fn default_slot_or_export_type(inside_export: bool, slot: NodeKind) -> NodeKind {
    debug_assert!(matches!(slot, NodeKind::DefaultMemory | NodeKind::DefaultTable));
    if inside_export {
        NodeKind::ExportType
    } else {
        slot
    }
}
