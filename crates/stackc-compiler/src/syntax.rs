//! The syntax table: a catalog of AST node kinds and their static grammar
//! properties, reified as a field-less enum plus a const lookup table
//! rather than mutable singleton descriptor objects.

use crate::ast::RunType;

/// Every AST node kind the parser can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Block,
    Paren,

    // literals
    IntLiteral,
    FloatLiteral,
    StringLiteral,

    // names
    VariableReference,
    Definition,
    Declaration,

    // operators
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Assign,
    InitExpr,
    UnaryNeg,
    UnaryMath,
    SuffixIncrement,
    SuffixDecrement,

    // control flow
    If,
    Else,
    Loop,
    Break,
    Yield,
    Continue,
    Return,

    // calls / functions
    Call,
    ArgumentList,
    FunctionLiteral,
    FunctionSignature,
    FunctionPointer,
    ParameterList,
    TypeList,

    // memory
    MemoryAccess,
    PointerLiteral,
    DefaultMemory,
    DefaultTable,
    AllocatePages,

    // module-level
    Import,
    Export,
    AsRename,
    ExportType,
}

/// Precedence tiers, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Precedence(pub u8);

pub const PREC_DEFINITION: Precedence = Precedence(27);
pub const PREC_CALL_ETC: Precedence = Precedence(26);
pub const PREC_ELSE: Precedence = Precedence(25);
pub const PREC_SUFFIX: Precedence = Precedence(24);
pub const PREC_UNARY: Precedence = Precedence(23);
pub const PREC_MUL: Precedence = Precedence(22);
pub const PREC_ADD: Precedence = Precedence(21);
pub const PREC_MISC_INFIX: Precedence = Precedence(20);
pub const PREC_SHIFT: Precedence = Precedence(19);
pub const PREC_ORDER_COMPARE: Precedence = Precedence(18);
pub const PREC_EQUALITY: Precedence = Precedence(17);
pub const PREC_BIT_AND: Precedence = Precedence(16);
pub const PREC_BIT_XOR: Precedence = Precedence(15);
pub const PREC_BIT_OR: Precedence = Precedence(14);
pub const PREC_AND: Precedence = Precedence(13);
pub const PREC_OR: Precedence = Precedence(12);
pub const PREC_ASSIGN: Precedence = Precedence(11);
pub const PREC_RETURN_ETC: Precedence = Precedence(10);
pub const PREC_NONE: Precedence = Precedence(0);

/// Whether, and how, a node's children are bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildArity {
    /// Exactly this many children once `complete`.
    Fixed(usize),
    /// Zero up to and including this many children (e.g. an optional
    /// initializer on a `Definition`/`Declaration`).
    UpTo(usize),
    /// Unbounded ("open") until a terminator token closes it.
    Open,
}

/// Static properties attached to a `NodeKind`, looked up from a const table
/// rather than stored on the node itself.
#[derive(Debug, Clone, Copy)]
pub struct NodeProperties {
    pub left_operands: u8,
    pub right_operands: u8,
    pub arity: ChildArity,
    pub precedence: Precedence,
    pub right_associative: bool,
    pub is_terminator: bool,
    /// The terminator token kind that completes this node, if it is open.
    pub requires_terminator: Option<crate::lexer::TokenKind>,
    /// A terminator token kind that is swallowed as a separator, not a close.
    pub ignores_terminator: Option<crate::lexer::TokenKind>,
    pub creates_new_scope: bool,
    pub creates_name: bool,
    pub is_reference: bool,
}

impl NodeKind {
    /// Does this kind accept a left operand when it appears infix/postfix?
    pub fn takes_left_operand(self) -> bool {
        self.properties().left_operands > 0
    }

    pub const fn properties(self) -> NodeProperties {
        use crate::lexer::TokenKind as Tk;
        use ChildArity::*;
        const fn p(
            left: u8,
            right: u8,
            arity: ChildArity,
            prec: Precedence,
            right_assoc: bool,
        ) -> NodeProperties {
            NodeProperties {
                left_operands: left,
                right_operands: right,
                arity,
                precedence: prec,
                right_associative: right_assoc,
                is_terminator: false,
                requires_terminator: None,
                ignores_terminator: None,
                creates_new_scope: false,
                creates_name: false,
                is_reference: false,
            }
        }
        match self {
            NodeKind::Root => NodeProperties {
                creates_new_scope: true,
                ..p(0, 0, Open, PREC_NONE, false)
            },
            NodeKind::Block => NodeProperties {
                creates_new_scope: true,
                requires_terminator: Some(Tk::RCurly),
                ..p(0, 0, Open, PREC_NONE, false)
            },
            NodeKind::Paren => NodeProperties {
                requires_terminator: Some(Tk::RParen),
                ..p(0, 0, Open, PREC_NONE, false)
            },
            NodeKind::ArgumentList | NodeKind::ParameterList | NodeKind::TypeList => {
                NodeProperties {
                    requires_terminator: Some(Tk::RParen),
                    ignores_terminator: Some(Tk::Comma),
                    ..p(0, 0, Open, PREC_NONE, false)
                }
            }
            NodeKind::IntLiteral
            | NodeKind::FloatLiteral
            | NodeKind::StringLiteral
            | NodeKind::VariableReference => NodeProperties {
                is_reference: matches!(self, NodeKind::VariableReference),
                ..p(0, 0, Fixed(0), PREC_NONE, false)
            },
            NodeKind::Definition => NodeProperties {
                creates_name: true,
                ..p(0, 1, Fixed(1), PREC_DEFINITION, false)
            },
            // A `Declaration` (the parser's context override of
            // `Definition` inside a parameter list, type list, or import)
            // never carries an initializer expression. A plain scalar type
            // clause is metadata (`Meta::TypeAnnotation`) and leaves it
            // childless; a structured type clause (`ptr ...`, `fn_ptr
            // (...) ...`, an imported function's `fn (...) ...`) attaches
            // its one `PointerLiteral`/`FunctionPointer`/`FunctionSignature`
            // node as a single child instead, hence `UpTo(1)`.
            NodeKind::Declaration => NodeProperties {
                creates_name: true,
                ..p(0, 0, UpTo(1), PREC_DEFINITION, false)
            },
            NodeKind::Add | NodeKind::Sub => p(1, 1, Fixed(2), PREC_ADD, false),
            NodeKind::Mul | NodeKind::Div | NodeKind::Rem => p(1, 1, Fixed(2), PREC_MUL, false),
            NodeKind::BitAnd => p(1, 1, Fixed(2), PREC_BIT_AND, false),
            NodeKind::BitXor => p(1, 1, Fixed(2), PREC_BIT_XOR, false),
            NodeKind::BitOr => p(1, 1, Fixed(2), PREC_BIT_OR, false),
            NodeKind::Shl | NodeKind::Shr => p(1, 1, Fixed(2), PREC_SHIFT, false),
            NodeKind::Lt | NodeKind::Le | NodeKind::Gt | NodeKind::Ge => {
                p(1, 1, Fixed(2), PREC_ORDER_COMPARE, false)
            }
            NodeKind::Eq | NodeKind::Ne => p(1, 1, Fixed(2), PREC_EQUALITY, false),
            NodeKind::And => p(1, 1, Fixed(2), PREC_AND, false),
            NodeKind::Or => p(1, 1, Fixed(2), PREC_OR, false),
            NodeKind::Assign => p(1, 1, Fixed(2), PREC_ASSIGN, true),
            NodeKind::InitExpr => p(1, 1, Fixed(2), PREC_ASSIGN, true),
            NodeKind::UnaryNeg | NodeKind::UnaryMath => p(0, 1, Fixed(1), PREC_UNARY, false),
            NodeKind::SuffixIncrement | NodeKind::SuffixDecrement => {
                p(1, 0, Fixed(1), PREC_SUFFIX, false)
            }
            NodeKind::If => NodeProperties {
                creates_new_scope: true,
                ..p(0, 2, Fixed(2), PREC_CALL_ETC, false)
            },
            NodeKind::Else => NodeProperties {
                creates_new_scope: true,
                ..p(1, 1, Fixed(2), PREC_ELSE, true)
            },
            NodeKind::Loop => NodeProperties {
                creates_new_scope: true,
                ..p(0, 1, Fixed(1), PREC_UNARY, false)
            },
            // All four may be childless (`break`/`continue`/bare `return`)
            // or carry a single value expression.
            NodeKind::Break | NodeKind::Yield | NodeKind::Continue => {
                p(0, 1, UpTo(1), PREC_RETURN_ETC, false)
            }
            NodeKind::Return => p(0, 1, UpTo(1), PREC_RETURN_ETC, false),
            // Triggered directly off a `CallName` token (an identifier
            // lexed together with its immediately-following `(`), the same
            // way `MemoryAccess` is triggered off `MemoryAccessName` — not
            // an infix operator over an arbitrary left expression, since
            // the source language only calls through a bare name (direct
            // or, for an indirect call, a function-pointer variable's
            // name). `[ArgumentList]`.
            NodeKind::Call => NodeProperties {
                is_reference: true,
                ..p(0, 1, Fixed(1), PREC_CALL_ETC, false)
            },
            // `[ParameterList, Block]`; the declared return type is
            // `Meta::TypeAnnotation` on the `FunctionLiteral` node itself.
            NodeKind::FunctionLiteral => NodeProperties {
                creates_new_scope: true,
                ..p(0, 0, Fixed(2), PREC_CALL_ETC, false)
            },
            // The context override of `FunctionLiteral` inside a
            // `Declaration` (an imported function's signature; body
            // forbidden): `[TypeList]`, return type as metadata.
            NodeKind::FunctionSignature => p(0, 0, Fixed(1), PREC_CALL_ETC, false),
            // `name: fn_ptr (i32, i32) i32` — `[TypeList]`, return type as
            // metadata, exactly like `FunctionSignature`. A top-level
            // binding may additionally carry `= some_function` as a second
            // child, the function the pointer is initialized to.
            NodeKind::FunctionPointer => p(0, 0, UpTo(2), PREC_CALL_ETC, false),
            NodeKind::MemoryAccess => NodeProperties {
                is_reference: true,
                ..p(0, 1, Fixed(1), PREC_CALL_ETC, false)
            },
            // An address initializer is present on a top-level/local
            // `ptr` binding but absent when the same node shapes a
            // parameter or import's declared type.
            NodeKind::PointerLiteral => p(0, 1, UpTo(1), PREC_CALL_ETC, false),
            // `memory 1`/`memory 1 10`: initial size required, max
            // optional — hence `UpTo(2)` rather than a fixed pair.
            NodeKind::DefaultMemory | NodeKind::DefaultTable => {
                p(0, 0, UpTo(2), PREC_CALL_ETC, false)
            }
            NodeKind::AllocatePages => p(0, 1, Fixed(1), PREC_RETURN_ETC, false),
            NodeKind::Import => p(0, 0, Fixed(2), PREC_CALL_ETC, false),
            NodeKind::Export => p(0, 1, Fixed(1), PREC_CALL_ETC, false),
            NodeKind::AsRename => p(1, 1, Fixed(2), PREC_CALL_ETC, false),
            // The context override of `DefaultMemory`/`DefaultTable` inside
            // an `Export` (`export memory` / `export table`): which kind is
            // metadata, not a child.
            NodeKind::ExportType => p(0, 0, Fixed(0), PREC_CALL_ETC, false),
        }
    }

    /// Child-type constraint: `None` means "no constraint beyond arity".
    ///
    /// Returns the accepted kind set for a given operand position, or
    /// `None` when there is no further constraint (numeric/run-type
    /// checking happens later, in the validator, not here).
    pub fn child_type_constraint(self, _position: usize, _child: NodeKind) -> Option<&'static str> {
        // Deliberately permissive at the syntax layer: most of this
        // source language's child-type rules are really run-type rules,
        // which the validator enforces once types are known. The
        // syntax-level constraint exists mainly to keep statement-only
        // nodes (Import, Export, Definition, Declaration) out of
        // expression position, which the parser's grammar shape already
        // guarantees structurally.
        None
    }

    /// Parent-type constraint: does `self` accept appearing under `parent`
    /// (optionally only at a specific position)?
    pub fn parent_type_constraint(self, parent: NodeKind) -> bool {
        match self {
            NodeKind::Break | NodeKind::Yield | NodeKind::Continue => {
                // Checked structurally by the validator walk (must have a
                // loop ancestor), not by immediate parent shape.
                true
            }
            NodeKind::Definition => !matches!(parent, NodeKind::Paren | NodeKind::ArgumentList),
            _ => true,
        }
    }

    /// The run type this kind is fixed at before the validator runs, if any
    /// (e.g. `Continue` and other void-only nodes); `None` means the run
    /// type is computed by the validator from its children/context.
    pub fn fixed_run_type(self) -> Option<RunType> {
        match self {
            NodeKind::Break | NodeKind::Continue | NodeKind::Import | NodeKind::Export => {
                Some(RunType::Void)
            }
            _ => None,
        }
    }
}
