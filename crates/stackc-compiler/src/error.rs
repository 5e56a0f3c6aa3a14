//! Structured compile errors.
//!
//! Every fallible stage of the pipeline returns `Result<T, CompileError>`.
//! `CompileError` never renders a human-facing message beyond what
//! `#[error("...")]` gives `Display` for free; formatting source snippets is
//! left to whatever tool consumes the compiler (an editor, a CLI, a test
//! harness).

use thiserror::Error;

/// A byte range into the source text that produced a `CompileError`.
///
/// Spans are derived from the offset/length already carried by `Token` and
/// `Node`; there is no separate position-tracking system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub offset: u32,
    pub length: u32,
}

impl Span {
    pub fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> u32 {
        self.offset + self.length
    }
}

/// The full taxonomy of user-visible compiler failures.
///
/// The pipeline never recovers locally: the first error aborts it, which is
/// why every variant carries exactly the spans needed to point at the
/// offending construct and nothing more.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompileError {
    #[error("mysterious symbol at {span:?}")]
    MysteriousSymbol { span: Span },

    #[error("misplaced terminator or unfinished expression at {span:?}")]
    MisplacedTerminatorOrUnfinishedExpression { span: Span },

    #[error("child `{child_index}` of `{parent:?}` violates its child-type constraint")]
    ChildTypeConstraintViolation {
        parent: crate::syntax::NodeKind,
        child_index: usize,
        span: Span,
    },

    #[error("`{kind:?}` cannot appear as a child of `{parent:?}`")]
    ParentTypeConstraintViolation {
        kind: crate::syntax::NodeKind,
        parent: crate::syntax::NodeKind,
        span: Span,
    },

    #[error("unresolvable reference `{name}`")]
    UnresolvableReference { name: String, span: Span },

    #[error("duplicate definition `{name}`")]
    DuplicateDefinition {
        name: String,
        first_span: Span,
        second_span: Span,
    },

    #[error("duplicate default {kind}")]
    DuplicateDefaultMemoryOrTable { kind: &'static str, span: Span },

    #[error("`{name}` is a {found:?}, which cannot be used as a {expected}")]
    BadReferenceKind {
        name: String,
        found: crate::ast::DefinitionKind,
        expected: &'static str,
        span: Span,
    },

    #[error("assignment to immutable `{name}`")]
    AssignmentToImmutable { name: String, span: Span },

    #[error("assignment type mismatch: target is {target:?}, value is {value:?}")]
    AssignmentTypeMismatch {
        target: crate::ast::RunType,
        value: crate::ast::RunType,
        span: Span,
    },

    #[error("a 32-bit address is required here, found {found:?}")]
    AddressMustBe32Bit { found: crate::ast::RunType, span: Span },

    #[error("condition must be numeric, found {found:?}")]
    BadCondition { found: crate::ast::RunType, span: Span },

    #[error("if/else branches disagree: {then_type:?} vs {else_type:?}")]
    InconsistentIfElseType {
        then_type: crate::ast::RunType,
        else_type: crate::ast::RunType,
        span: Span,
    },

    #[error("operands of `{op}` disagree: {left:?} vs {right:?}")]
    InconsistentBooleanType {
        op: &'static str,
        left: crate::ast::RunType,
        right: crate::ast::RunType,
        span: Span,
    },

    #[error("loop yields disagree: {first:?} vs {second:?}")]
    InconsistentLoopYieldType {
        first: crate::ast::RunType,
        second: crate::ast::RunType,
        span: Span,
    },

    #[error("operand of `{op}` must be numeric, found void")]
    NonNumericBooleanOperand { op: &'static str, span: Span },

    #[error("no operator `{op}` for operand type(s) `{signature}`")]
    UndefinedOperator {
        op: String,
        signature: String,
        span: Span,
    },

    #[error("wrong argument count: expected {expected}, found {found}")]
    WrongArgumentCount {
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("function signature mismatch for `{name}`")]
    FunctionSignatureMismatch { name: String, span: Span },

    #[error("return type mismatch: declared {declared:?}, found {found:?}")]
    ReturnTypeMismatch {
        declared: crate::ast::RunType,
        found: crate::ast::RunType,
        span: Span,
    },

    #[error("infinite loop: no break, yield, or return reachable")]
    InfiniteLoop { span: Span },

    #[error("`{keyword}` outside of a loop")]
    MisplacedBreakYieldContinue { keyword: &'static str, span: Span },

    #[error("integer literal out of range for {ty:?}")]
    IntegerLiteralOutOfRange { ty: crate::ast::RunType, span: Span },

    #[error("bad initializer: {reason}")]
    BadInitializer { reason: &'static str, span: Span },

    #[error("bad import source `{text}`, expected `module/field`")]
    BadImportSource { text: String, span: Span },

    #[error("unintelligible size `{text}`")]
    UnintelligibleSize { text: String, span: Span },

    #[error("export name `{name}` does not refer to any definition")]
    NonExistentExport { name: String, span: Span },

    #[error("`{name}` is mutable and cannot be exported")]
    MutableExport { name: String, span: Span },

    #[error("unreachable code after an escaping expression")]
    UnreachableCode {
        escape_span: Span,
        unreachable_span: Span,
    },

    #[error("a function definition cannot appear here")]
    BadPlacementForFunctionDefinition { span: Span },

    #[error("no default memory defined for pointer `{name}`")]
    NoMemoryDefinedForPointer { name: String, span: Span },

    #[error("no default table defined for function pointer `{name}`")]
    NoTableDefinedForFunctionPointer { name: String, span: Span },

    #[error("integer out of range during code generation")]
    IntegerOutOfRangeInCodeGen { span: Span },

    /// A [`crate::Limits`] guard: raised when parsing or validating would
    /// recurse, or consume tokens, past the configured bound.
    #[error("exceeded {what} limit of {limit}")]
    LimitExceeded {
        what: &'static str,
        limit: usize,
        span: Span,
    },
}

impl CompileError {
    /// The primary span to point a caret at, for tooling that only wants one.
    pub fn primary_span(&self) -> Span {
        match self {
            CompileError::MysteriousSymbol { span }
            | CompileError::MisplacedTerminatorOrUnfinishedExpression { span }
            | CompileError::ChildTypeConstraintViolation { span, .. }
            | CompileError::ParentTypeConstraintViolation { span, .. }
            | CompileError::UnresolvableReference { span, .. }
            | CompileError::DuplicateDefaultMemoryOrTable { span, .. }
            | CompileError::BadReferenceKind { span, .. }
            | CompileError::AssignmentToImmutable { span, .. }
            | CompileError::AssignmentTypeMismatch { span, .. }
            | CompileError::AddressMustBe32Bit { span, .. }
            | CompileError::BadCondition { span, .. }
            | CompileError::InconsistentIfElseType { span, .. }
            | CompileError::InconsistentBooleanType { span, .. }
            | CompileError::InconsistentLoopYieldType { span, .. }
            | CompileError::NonNumericBooleanOperand { span, .. }
            | CompileError::UndefinedOperator { span, .. }
            | CompileError::WrongArgumentCount { span, .. }
            | CompileError::FunctionSignatureMismatch { span, .. }
            | CompileError::ReturnTypeMismatch { span, .. }
            | CompileError::InfiniteLoop { span }
            | CompileError::MisplacedBreakYieldContinue { span, .. }
            | CompileError::IntegerLiteralOutOfRange { span, .. }
            | CompileError::BadInitializer { span, .. }
            | CompileError::BadImportSource { span, .. }
            | CompileError::UnintelligibleSize { span, .. }
            | CompileError::NonExistentExport { span, .. }
            | CompileError::MutableExport { span, .. }
            | CompileError::BadPlacementForFunctionDefinition { span }
            | CompileError::NoMemoryDefinedForPointer { span, .. }
            | CompileError::NoTableDefinedForFunctionPointer { span, .. }
            | CompileError::IntegerOutOfRangeInCodeGen { span }
            | CompileError::LimitExceeded { span, .. } => *span,
            CompileError::DuplicateDefinition { second_span, .. } => *second_span,
            CompileError::UnreachableCode {
                unreachable_span, ..
            } => *unreachable_span,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
