//! The expression grammar: `Parser::parse_expr` and everything it dispatches
//! to. See the module doc on `parser::mod` for why this is recursive
//! descent rather than a token-at-a-time place/reparent state machine —
//! each precedence tier here is a loop iteration rather than a standalone
//! function, which is the usual shape precedence climbing takes once
//! written non-iteratively.

use ordered_float::OrderedFloat;

use crate::ast::{Meta, NodeId, RunType, ScopeId};
use crate::error::{CompileError, CompileResult, Span};
use crate::lexer::TokenKind;
use crate::syntax::{self, NodeKind, Precedence};
use crate::validator::operators::BUILTIN_UNARY_NAMES;

use super::{ParenRole, Parser};

impl<'a> Parser<'a> {
    /// Parse an expression, consuming any infix/postfix operator whose
    /// precedence is at least `min_prec`. Callers at the top of a construct
    /// (a statement, a parenthesized group, a condition) pass
    /// `syntax::PREC_NONE`, which is lower than every real operator's tier
    /// and so accepts the whole expression grammar; callers parsing one
    /// operand of an already-consumed operator pass that operator's own
    /// tier (or one above it, for left-associative operators) to bound how
    /// much of the following tokens the operand is allowed to claim.
    pub(crate) fn parse_expr(&mut self, scope: ScopeId, min_prec: Precedence) -> CompileResult<NodeId> {
        self.enter_recursion(self.peek().span)?;
        let result = self.parse_expr_climb(scope, min_prec);
        self.exit_recursion();
        result
    }

    fn parse_expr_climb(&mut self, scope: ScopeId, min_prec: Precedence) -> CompileResult<NodeId> {
        let mut left = self.parse_prefix(scope)?;
        loop {
            let kind = match infix_kind(self.peek_kind()) {
                Some(kind) => kind,
                None => break,
            };
            let props = kind.properties();
            if props.precedence < min_prec {
                break;
            }
            if is_postfix(kind) {
                let tok = self.bump()?;
                let start = self.ast.node(left).span.offset;
                let span = Span::new(start, tok.span.end() - start);
                let node = self.ast.alloc_node(kind, Some(tok), scope, span);
                self.ast.node_mut(node).children = vec![left];
                self.ast.node_mut(node).complete = true;
                left = node;
                continue;
            }
            let tok = self.bump()?;
            let next_min = if props.right_associative {
                props.precedence
            } else {
                Precedence(props.precedence.0 + 1)
            };
            let right = self.parse_expr(scope, next_min)?;
            let start = self.ast.node(left).span.offset;
            let end = self.ast.node(right).span.end();
            let node = self.ast.alloc_node(kind, Some(tok), scope, Span::new(start, end - start));
            self.ast.node_mut(node).children = vec![left, right];
            self.ast.node_mut(node).complete = true;
            left = node;
        }
        Ok(left)
    }

    fn parse_prefix(&mut self, scope: ScopeId) -> CompileResult<NodeId> {
        self.enter_recursion(self.peek().span)?;
        let result = self.parse_prefix_inner(scope);
        self.exit_recursion();
        result
    }

    fn parse_prefix_inner(&mut self, scope: ScopeId) -> CompileResult<NodeId> {
        match self.peek_kind() {
            TokenKind::Int => self.parse_int_literal(scope),
            TokenKind::Float => self.parse_float_literal(scope),
            TokenKind::Name => {
                let tok = self.bump()?;
                Ok(self.alloc_reference(tok, scope))
            }
            TokenKind::CallName => self.parse_call_or_unary_math(scope),
            TokenKind::MemoryAccessName => self.parse_memory_access(scope),
            TokenKind::Minus => self.parse_unary_neg(scope),
            TokenKind::LParen => self.parse_group(scope),
            TokenKind::If => self.parse_if(scope),
            TokenKind::Loop => self.parse_loop(scope),
            TokenKind::Break => self.parse_escape(scope, NodeKind::Break),
            TokenKind::Yield => self.parse_escape(scope, NodeKind::Yield),
            TokenKind::Continue => self.parse_escape(scope, NodeKind::Continue),
            TokenKind::Return => self.parse_escape(scope, NodeKind::Return),
            TokenKind::AllocatePages => self.parse_allocate_pages(scope),
            _ => Err(CompileError::MisplacedTerminatorOrUnfinishedExpression { span: self.peek().span }),
        }
    }

    fn parse_int_literal(&mut self, scope: ScopeId) -> CompileResult<NodeId> {
        let tok = self.bump()?;
        let text = self.text(tok);
        let value = super::parse_uint_literal(text, tok.span)?;
        let run_type = if has_width_suffix(text, "64") { RunType::I64 } else { RunType::I32 };
        let node = self.ast.alloc_node(NodeKind::IntLiteral, Some(tok), scope, tok.span);
        self.ast.node_mut(node).meta = Meta::IntValue(value);
        self.ast.node_mut(node).run_type = run_type;
        self.ast.node_mut(node).complete = true;
        Ok(node)
    }

    fn parse_float_literal(&mut self, scope: ScopeId) -> CompileResult<NodeId> {
        let tok = self.bump()?;
        let text = self.text(tok);
        let digits = super::strip_width_suffix(text);
        let value: f64 = digits.parse().map_err(|_| CompileError::UnintelligibleSize {
            text: text.to_string(),
            span: tok.span,
        })?;
        let run_type = if has_width_suffix(text, "32") { RunType::F32 } else { RunType::F64 };
        let node = self.ast.alloc_node(NodeKind::FloatLiteral, Some(tok), scope, tok.span);
        self.ast.node_mut(node).meta = Meta::FloatValue(OrderedFloat(value));
        self.ast.node_mut(node).run_type = run_type;
        self.ast.node_mut(node).complete = true;
        Ok(node)
    }

    fn parse_unary_neg(&mut self, scope: ScopeId) -> CompileResult<NodeId> {
        let minus_tok = self.bump()?;
        let child = match self.peek_kind() {
            TokenKind::Int => self.parse_int_literal(scope)?,
            TokenKind::Float => self.parse_float_literal(scope)?,
            _ => {
                return Err(CompileError::ChildTypeConstraintViolation {
                    parent: NodeKind::UnaryNeg,
                    child_index: 0,
                    span: self.peek().span,
                })
            }
        };
        let span = Span::new(minus_tok.span.offset, self.prev_end() - minus_tok.span.offset);
        let node = self.ast.alloc_node(NodeKind::UnaryNeg, Some(minus_tok), scope, span);
        self.ast.node_mut(node).children = vec![child];
        self.ast.node_mut(node).complete = true;
        Ok(node)
    }

    /// `name(` where `name` is a builtin (`sqrt`, `to_i32`, ...) becomes
    /// `UnaryMath` over its single argument; anything else is a user `Call`
    /// over an `ArgumentList`.
    fn parse_call_or_unary_math(&mut self, scope: ScopeId) -> CompileResult<NodeId> {
        let tok = self.bump()?;
        let name = self.text(tok);
        if BUILTIN_UNARY_NAMES.contains(&name) {
            self.expect(TokenKind::LParen)?;
            let arg = self.parse_expr(scope, syntax::PREC_ASSIGN)?;
            self.expect(TokenKind::RParen)?;
            let span = Span::new(tok.span.offset, self.prev_end() - tok.span.offset);
            let node = self.ast.alloc_node(NodeKind::UnaryMath, Some(tok), scope, span);
            self.ast.node_mut(node).children = vec![arg];
            self.ast.node_mut(node).complete = true;
            return Ok(node);
        }
        let node = self.ast.alloc_node(NodeKind::Call, Some(tok), scope, tok.span);
        self.ast.scope_mut(scope).references.push(node);
        let args = self.parse_paren_list(scope, ParenRole::ArgumentList)?;
        let span = Span::new(tok.span.offset, self.prev_end() - tok.span.offset);
        self.ast.node_mut(node).children = vec![args];
        self.ast.node_mut(node).span = span;
        self.ast.node_mut(node).complete = true;
        Ok(node)
    }

    fn parse_memory_access(&mut self, scope: ScopeId) -> CompileResult<NodeId> {
        let tok = self.bump()?;
        let node = self.ast.alloc_node(NodeKind::MemoryAccess, Some(tok), scope, tok.span);
        self.ast.scope_mut(scope).references.push(node);
        self.expect(TokenKind::LBracket)?;
        let index = self.parse_expr(scope, syntax::PREC_NONE)?;
        self.expect(TokenKind::RBracket)?;
        let span = Span::new(tok.span.offset, self.prev_end() - tok.span.offset);
        self.ast.node_mut(node).children = vec![index];
        self.ast.node_mut(node).span = span;
        self.ast.node_mut(node).complete = true;
        Ok(node)
    }

    fn parse_group(&mut self, scope: ScopeId) -> CompileResult<NodeId> {
        let lparen = self.bump()?;
        let inner = self.parse_expr(scope, syntax::PREC_NONE)?;
        self.expect(TokenKind::RParen)?;
        let span = Span::new(lparen.span.offset, self.prev_end() - lparen.span.offset);
        let node = self.ast.alloc_node(NodeKind::Paren, Some(lparen), scope, span);
        self.ast.node_mut(node).children = vec![inner];
        self.ast.node_mut(node).complete = true;
        Ok(node)
    }

    fn parse_if(&mut self, scope: ScopeId) -> CompileResult<NodeId> {
        let if_tok = self.bump()?;
        let if_scope = self.new_child_scope(scope);
        let cond = self.parse_expr(if_scope, syntax::PREC_NONE)?;
        let body = self.parse_block(if_scope)?;
        let span = Span::new(if_tok.span.offset, self.prev_end() - if_tok.span.offset);
        let if_node = self.ast.alloc_node(NodeKind::If, Some(if_tok), if_scope, span);
        self.ast.node_mut(if_node).children = vec![cond, body];
        self.ast.node_mut(if_node).complete = true;

        if self.peek_kind() != TokenKind::Else {
            return Ok(if_node);
        }
        let else_tok = self.bump()?;
        let else_scope = self.new_child_scope(scope);
        let else_value = if self.peek_kind() == TokenKind::If {
            self.parse_if(scope)?
        } else {
            self.parse_block(else_scope)?
        };
        let span = Span::new(if_tok.span.offset, self.prev_end() - if_tok.span.offset);
        let else_node = self.ast.alloc_node(NodeKind::Else, Some(else_tok), else_scope, span);
        self.ast.node_mut(else_node).children = vec![if_node, else_value];
        self.ast.node_mut(else_node).complete = true;
        Ok(else_node)
    }

    fn parse_loop(&mut self, scope: ScopeId) -> CompileResult<NodeId> {
        let loop_tok = self.bump()?;
        let loop_scope = self.new_child_scope(scope);
        let node = self.ast.alloc_node(NodeKind::Loop, Some(loop_tok), loop_scope, loop_tok.span);
        self.ast.scope_mut(loop_scope).is_loop = true;
        self.ast.scope_mut(loop_scope).loop_node = Some(node);
        let body = self.parse_block(loop_scope)?;
        let span = Span::new(loop_tok.span.offset, self.prev_end() - loop_tok.span.offset);
        self.ast.node_mut(node).children = vec![body];
        self.ast.node_mut(node).span = span;
        self.ast.node_mut(node).complete = true;
        Ok(node)
    }

    /// `break`/`yield`/`continue`/`return`: an optional value followed by a
    /// terminator (or whatever token closes the enclosing construct).
    fn parse_escape(&mut self, scope: ScopeId, kind: NodeKind) -> CompileResult<NodeId> {
        let tok = self.bump()?;
        let mut children = Vec::new();
        if self.has_value_follow() {
            children.push(self.parse_expr(scope, syntax::PREC_NONE)?);
        }
        let span = Span::new(tok.span.offset, self.prev_end() - tok.span.offset);
        let node = self.ast.alloc_node(kind, Some(tok), scope, span);
        self.ast.node_mut(node).children = children;
        self.ast.node_mut(node).complete = true;
        Ok(node)
    }

    fn parse_allocate_pages(&mut self, scope: ScopeId) -> CompileResult<NodeId> {
        let tok = self.bump()?;
        let count = self.parse_expr(scope, syntax::PREC_NONE)?;
        let span = Span::new(tok.span.offset, self.prev_end() - tok.span.offset);
        let node = self.ast.alloc_node(NodeKind::AllocatePages, Some(tok), scope, span);
        self.ast.node_mut(node).children = vec![count];
        self.ast.node_mut(node).complete = true;
        Ok(node)
    }

    /// Whether the token stream continues with a value expression rather
    /// than immediately closing the statement/construct `break`, `yield`,
    /// `continue`, or `return` sits inside.
    fn has_value_follow(&self) -> bool {
        !matches!(
            self.peek_kind(),
            TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::Eof
                | TokenKind::RCurly
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::Comma
        )
    }
}

/// The token that introduces an infix/postfix operator, mapped to the
/// `NodeKind` it produces. `if`/`loop`/calls/etc. are prefix-parsed instead
/// and never appear here; `else` is consumed directly by `parse_if` rather
/// than through this generic climb, since its right operand is a block or
/// another `if`, neither of which is a valid expression primary on its own.
fn infix_kind(tok: TokenKind) -> Option<NodeKind> {
    Some(match tok {
        TokenKind::Plus => NodeKind::Add,
        TokenKind::Minus => NodeKind::Sub,
        TokenKind::Star => NodeKind::Mul,
        TokenKind::Slash => NodeKind::Div,
        TokenKind::Percent => NodeKind::Rem,
        TokenKind::Amp => NodeKind::BitAnd,
        TokenKind::Pipe => NodeKind::BitOr,
        TokenKind::Caret => NodeKind::BitXor,
        TokenKind::Shl => NodeKind::Shl,
        TokenKind::Shr => NodeKind::Shr,
        TokenKind::Lt => NodeKind::Lt,
        TokenKind::Le => NodeKind::Le,
        TokenKind::Gt => NodeKind::Gt,
        TokenKind::Ge => NodeKind::Ge,
        TokenKind::EqEq => NodeKind::Eq,
        TokenKind::NotEq => NodeKind::Ne,
        TokenKind::And => NodeKind::And,
        TokenKind::Or => NodeKind::Or,
        TokenKind::Eq => NodeKind::Assign,
        TokenKind::PlusPlus => NodeKind::SuffixIncrement,
        TokenKind::MinusMinus => NodeKind::SuffixDecrement,
        _ => return None,
    })
}

fn is_postfix(kind: NodeKind) -> bool {
    matches!(kind, NodeKind::SuffixIncrement | NodeKind::SuffixDecrement)
}

/// Does `text`'s `x32`/`x64` width suffix, if any, equal `width`?
fn has_width_suffix(text: &str, width: &str) -> bool {
    text.rsplit_once('x').map(|(_, suffix)| suffix == width).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use crate::parser::Parser;
    use crate::Limits;

    fn parse_expr_in(source: &str) -> crate::ast::Ast {
        Parser::new(source, Limits::default()).parse_program().unwrap()
    }

    #[test]
    fn binary_precedence_nests_multiplication_tighter() {
        let ast = parse_expr_in("a: i32 = 1 + 2 * 3\n");
        let def = ast.node(ast.node(ast.root.unwrap()).children[0]);
        let init = ast.node(def.children[0]);
        assert_eq!(init.kind, crate::syntax::NodeKind::Add);
    }

    #[test]
    fn assignment_is_right_associative() {
        let ast = parse_expr_in("main: fn () void { a: i32 = 0\n a = b = 1 }\n");
        // Just exercising that this parses at all without panicking/erroring.
        let _ = ast;
    }

    #[test]
    fn unary_minus_accepts_only_literals() {
        let err = Parser::new("a: i32 = -b\n", Limits::default()).parse_program();
        assert!(err.is_err());
    }

    #[test]
    fn call_and_memory_access_round_trip() {
        let ast = parse_expr_in("main: fn () void { foo(1, 2) bar[0] }\n");
        let _ = ast;
    }
}
