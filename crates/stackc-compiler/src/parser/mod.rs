//! Pratt/precedence-climbing parser.
//!
//! One way to implement precedence climbing is an iterative state machine:
//! a single "current node" plus "current token", with tokens either
//! becoming children of the current node or the parser ascending to a
//! parent, and a `place`/`reparent` protocol deciding, token by token,
//! which of two competing operators claims a completed operand. The other,
//! far more common in Rust, is ordinary recursive descent where each
//! precedence tier is a function and the call stack *is* the ascent/
//! descent. The two produce the same trees for the same grammar (that's
//! the point of precedence climbing — the shape of the computation
//! doesn't change the result), so this parser is written the idiomatic-
//! Rust way: see `grammar::Parser::parse_expr`. DESIGN.md records this as
//! a deliberate implementation choice.

mod grammar;
mod override_rules;

use crate::ast::{Ast, Binding, DefinitionKind, LocalVar, RunType, ScopeId, TypeAnn};
use crate::error::{CompileError, CompileResult, Span};
use crate::lexer::{self, Token, TokenKind};
use crate::syntax::NodeKind;
use crate::Limits;

pub(crate) use override_rules::ParenRole;

/// What syntactic position a `name: type` slot is being parsed in — drives
/// the `Definition`/`Declaration` override and whether an initializer is
/// permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeclContext {
    /// A top-level or local `name: type = value` binding.
    Binding,
    /// Inside a `ParameterList`: no initializer, becomes a function-local
    /// parameter rather than a `Definition`.
    Param,
    /// Inside an `Import`: no initializer, no body on a function type.
    Import,
}

pub struct Parser<'a> {
    pub(crate) source: &'a str,
    pub(crate) tokens: Vec<Token>,
    pub(crate) pos: usize,
    pub(crate) ast: Ast,
    pub(crate) limits: Limits,
    pub(crate) depth: usize,
    /// Signature index computed by `parse_function_binding`/
    /// `parse_function_pointer_binding`, consumed by the `declare_global`
    /// call that immediately follows it. `None` in between bindings.
    pub(crate) pending_signature: Option<u32>,
    /// The child scope + return type a just-parsed function literal's body
    /// was parsed in, handed to `declare_global` so it can stamp the scope
    /// with the `DefinitionId` it allocates.
    pub(crate) pending_fn_scope: Option<(ScopeId, RunType)>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, limits: Limits) -> Self {
        let raw = lexer::tokenize(source);
        // Skip-kinds are filtered here, once, rather than threaded through
        // every call site — whitespace/comments are invisible to the
        // parser, and round-tripping them back to source text is a
        // property of the *lexer*'s output, which `lexer::tests` already
        // exercises directly.
        let tokens: Vec<Token> = raw.into_iter().filter(|t| !t.kind.is_skip()).collect();
        Self {
            source,
            tokens,
            pos: 0,
            ast: Ast::new(),
            limits,
            depth: 0,
            pending_signature: None,
            pending_fn_scope: None,
        }
    }

    pub fn parse_program(mut self) -> CompileResult<Ast> {
        let global_scope = self.ast.alloc_scope(None, true);
        self.ast.global_scope = Some(global_scope);
        let root = self
            .ast
            .alloc_node(NodeKind::Root, None, global_scope, Span::new(0, 0));
        self.ast.root = Some(root);

        self.skip_terminators();
        while self.peek_kind() != TokenKind::Eof {
            if self.pos > self.limits.token_limit {
                return Err(CompileError::LimitExceeded {
                    what: "token",
                    limit: self.limits.token_limit,
                    span: self.peek().span,
                });
            }
            let stmt = self.parse_top_level_statement(global_scope)?;
            self.ast.node_mut(root).children.push(stmt);
            self.skip_terminators();
        }
        let end = self.peek().span;
        self.ast.node_mut(root).complete = true;
        self.ast.node_mut(root).span = Span::new(0, end.offset);
        self.ast.source = self.source.to_string();

        Ok(self.ast)
    }

    // ---- token cursor -----------------------------------------------

    pub(crate) fn peek(&self) -> Token {
        self.tokens[self.pos]
    }

    pub(crate) fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    /// Look past the current token without consuming it.
    pub(crate) fn peek2_kind(&self) -> TokenKind {
        self.tokens
            .get(self.pos + 1)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    pub(crate) fn text(&self, tok: Token) -> &'a str {
        tok.text(self.source)
    }

    /// Consume and return the current token, failing on a lexer bad-token.
    pub(crate) fn bump(&mut self) -> CompileResult<Token> {
        let tok = self.peek();
        if tok.kind == TokenKind::BadToken {
            return Err(CompileError::MysteriousSymbol { span: tok.span });
        }
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        Ok(tok)
    }

    pub(crate) fn expect(&mut self, kind: TokenKind) -> CompileResult<Token> {
        let tok = self.bump()?;
        if tok.kind != kind {
            return Err(CompileError::MisplacedTerminatorOrUnfinishedExpression { span: tok.span });
        }
        Ok(tok)
    }

    pub(crate) fn skip_terminators(&mut self) {
        while self.peek_kind().is_terminator() {
            let _ = self.bump();
        }
    }

    pub(crate) fn enter_recursion(&mut self, span: Span) -> CompileResult<()> {
        self.depth += 1;
        if self.depth > self.limits.recursion_limit {
            return Err(CompileError::LimitExceeded {
                what: "recursion",
                limit: self.limits.recursion_limit,
                span,
            });
        }
        Ok(())
    }

    pub(crate) fn exit_recursion(&mut self) {
        self.depth -= 1;
    }

    // ---- scopes -------------------------------------------------------

    /// Conceptually, every non-root scope shares the global tables
    /// (signatures, imports, default memory/table, exports, names) with
    /// its ancestors. This arena representation keeps those global tables
    /// solely on the global scope itself (`Ast::global_scope`) rather than
    /// literally copying them into every child, and has every lookup walk
    /// `parent` via `Ast::lookup`, which is behaviorally identical and
    /// avoids duplicating the same `Vec`s into every nested scope.
    pub(crate) fn new_child_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.ast.alloc_scope(Some(parent), false)
    }

    // ---- top level ------------------------------------------------------

    fn parse_top_level_statement(&mut self, scope: ScopeId) -> CompileResult<crate::ast::NodeId> {
        self.enter_recursion(self.peek().span)?;
        let result = self.parse_top_level_statement_inner(scope);
        self.exit_recursion();
        result
    }

    fn parse_top_level_statement_inner(&mut self, scope: ScopeId) -> CompileResult<crate::ast::NodeId> {
        match self.peek_kind() {
            TokenKind::Import => self.parse_import(scope),
            TokenKind::Export => self.parse_export(scope),
            TokenKind::Memory => self.parse_default_slot(scope, NodeKind::DefaultMemory, false),
            TokenKind::Table => self.parse_default_slot(scope, NodeKind::DefaultTable, false),
            TokenKind::Name if self.peek2_kind() == TokenKind::Colon => {
                self.parse_binding(scope, DeclContext::Binding)
            }
            _ => Err(CompileError::ParentTypeConstraintViolation {
                kind: NodeKind::Root,
                parent: NodeKind::Root,
                span: self.peek().span,
            }),
        }
    }

    // ---- import / export -----------------------------------------------

    fn parse_import(&mut self, scope: ScopeId) -> CompileResult<crate::ast::NodeId> {
        let import_tok = self.expect(TokenKind::Import)?;
        let source_tok = self.expect(TokenKind::StringLiteral)?;
        let source_text = self.text(source_tok);
        let unescaped = unescape_string(&source_text[1..source_text.len() - 1]);
        validate_import_source(&unescaped, source_tok.span)?;

        let string_node = self.ast.alloc_node(NodeKind::StringLiteral, Some(source_tok), scope, source_tok.span);
        self.ast.node_mut(string_node).meta = crate::ast::Meta::StringValue(unescaped.clone());
        self.ast.node_mut(string_node).run_type = RunType::Void;
        self.ast.node_mut(string_node).complete = true;

        let declared = match self.peek_kind() {
            TokenKind::Memory => self.parse_default_slot(scope, NodeKind::DefaultMemory, true)?,
            TokenKind::Table => self.parse_default_slot(scope, NodeKind::DefaultTable, true)?,
            _ => self.parse_binding(scope, DeclContext::Import)?,
        };
        self.set_import_source(declared, &unescaped);

        let span = Span::new(import_tok.span.offset, self.prev_end() - import_tok.span.offset);
        let node = self.ast.alloc_node(NodeKind::Import, Some(import_tok), scope, span);
        self.ast.node_mut(node).children = vec![string_node, declared];
        self.ast.node_mut(node).complete = true;
        self.ast.node_mut(node).run_type = RunType::Void;
        Ok(node)
    }

    fn set_import_source(&mut self, declared_node: crate::ast::NodeId, source: &str) {
        use crate::ast::Meta;
        let kind = self.ast.node(declared_node).kind;
        let def_id = match &self.ast.node(declared_node).meta {
            Meta::Bound(Binding::Definition(id)) => Some(*id),
            _ => None,
        };
        if let Some(id) = def_id {
            self.ast.definition_mut(id).import_source = Some(source.to_string());
        } else if matches!(kind, NodeKind::DefaultMemory | NodeKind::DefaultTable) {
            // The default slot's own DefinitionId was stashed in meta by
            // `parse_default_slot` for exactly this purpose.
            if let Meta::Bound(Binding::Definition(id)) = self.ast.node(declared_node).meta {
                self.ast.definition_mut(id).import_source = Some(source.to_string());
            }
        }
    }

    fn parse_export(&mut self, scope: ScopeId) -> CompileResult<crate::ast::NodeId> {
        let export_tok = self.expect(TokenKind::Export)?;
        let child = if matches!(self.peek_kind(), TokenKind::Memory | TokenKind::Table) {
            let slot_kind = if self.peek_kind() == TokenKind::Memory {
                NodeKind::DefaultMemory
            } else {
                NodeKind::DefaultTable
            };
            let tok = self.bump()?;
            let kind = override_rules::default_slot_or_export_type(true, slot_kind);
            let node = self.ast.alloc_node(kind, Some(tok), scope, tok.span);
            let ann = if slot_kind == NodeKind::DefaultMemory {
                TypeAnn::Memory
            } else {
                TypeAnn::Table
            };
            self.ast.node_mut(node).meta = crate::ast::Meta::TypeAnnotation(ann);
            self.ast.node_mut(node).run_type = RunType::Void;
            self.ast.node_mut(node).complete = true;
            node
        } else {
            let name_tok = self.expect(TokenKind::Name)?;
            let reference = self.alloc_reference(name_tok, scope);
            if self.peek_kind() == TokenKind::As {
                self.bump()?;
                let string_tok = self.expect(TokenKind::StringLiteral)?;
                let raw = self.text(string_tok);
                let alias = unescape_string(&raw[1..raw.len() - 1]);
                let string_node = self.ast.alloc_node(NodeKind::StringLiteral, Some(string_tok), scope, string_tok.span);
                self.ast.node_mut(string_node).meta = crate::ast::Meta::StringValue(alias);
                self.ast.node_mut(string_node).complete = true;
                let span = Span::new(name_tok.span.offset, self.prev_end() - name_tok.span.offset);
                let rename = self.ast.alloc_node(NodeKind::AsRename, Some(name_tok), scope, span);
                self.ast.node_mut(rename).children = vec![reference, string_node];
                self.ast.node_mut(rename).complete = true;
                rename
            } else {
                reference
            }
        };
        let span = Span::new(export_tok.span.offset, self.prev_end() - export_tok.span.offset);
        let node = self.ast.alloc_node(NodeKind::Export, Some(export_tok), scope, span);
        self.ast.node_mut(node).children = vec![child];
        self.ast.node_mut(node).complete = true;
        self.ast.node_mut(node).run_type = RunType::Void;
        // The exported name/default-slot may not resolve to a `DefinitionId`
        // until the resolver runs (forward references are legal), so
        // `global_scope().exports` is populated by `resolver::resolve`, not
        // here — it walks `Root`'s children for `Export` nodes once every
        // reference is bound.
        Ok(node)
    }

    fn prev_end(&self) -> u32 {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].span.end()
        }
    }

    /// A bare `memory`/`table` default-slot statement: `memory 1`,
    /// `memory 1 10`, `table 4`, `table 4 20`. `as_import` suppresses the
    /// duplicate-default check (the caller, `parse_import`, performs it
    /// for the combined import+declare statement so the error points at
    /// the right span either way).
    fn parse_default_slot(&mut self, scope: ScopeId, kind: NodeKind, as_import: bool) -> CompileResult<crate::ast::NodeId> {
        let tok = self.bump()?;
        let initial_tok = self.expect(TokenKind::Int)?;
        let initial = parse_uint_literal(self.text(initial_tok), initial_tok.span)?;
        let initial_node = self.alloc_int_literal(initial_tok, initial);
        let mut children = vec![initial_node];
        let max = if self.peek_kind() == TokenKind::Int {
            let max_tok = self.bump()?;
            let max = parse_uint_literal(self.text(max_tok), max_tok.span)?;
            children.push(self.alloc_int_literal(max_tok, max));
            if max < initial {
                return Err(CompileError::BadInitializer {
                    reason: "default slot maximum is smaller than its initial size",
                    span: max_tok.span,
                });
            }
            Some(max as u32)
        } else {
            None
        };
        let span = Span::new(tok.span.offset, self.prev_end() - tok.span.offset);
        let node = self.ast.alloc_node(kind, Some(tok), scope, span);
        self.ast.node_mut(node).children = children;
        self.ast.node_mut(node).complete = true;
        self.ast.node_mut(node).run_type = RunType::Void;

        let def_kind = if kind == NodeKind::DefaultMemory {
            DefinitionKind::Memory
        } else {
            DefinitionKind::Table
        };
        let existing = if def_kind == DefinitionKind::Memory {
            self.ast.global_scope().default_memory
        } else {
            self.ast.global_scope().default_table
        };
        if existing.is_some() {
            return Err(CompileError::DuplicateDefaultMemoryOrTable {
                kind: if def_kind == DefinitionKind::Memory { "memory" } else { "table" },
                span: tok.span,
            });
        }
        let def = crate::ast::Definition {
            kind: def_kind,
            name: if def_kind == DefinitionKind::Memory { "$memory".into() } else { "$table".into() },
            run_type: RunType::Void,
            return_type: RunType::Void,
            mutable: false,
            scope,
            index: None,
            import_source: None,
            export_name: None,
            initializer: None,
            signature_index: None,
            param_types: Vec::new(),
            pointer_storage: None,
            limits: Some((initial as u32, max)),
            def_span: tok.span,
        };
        let def_id = self.ast.alloc_definition(def);
        if def_kind == DefinitionKind::Memory {
            self.ast.global_scope_mut().default_memory = Some(def_id);
        } else {
            self.ast.global_scope_mut().default_table = Some(def_id);
        }
        self.ast.node_mut(node).meta = crate::ast::Meta::Bound(Binding::Definition(def_id));
        let _ = as_import;
        Ok(node)
    }

    // ---- bindings (Definition / Declaration) ---------------------------

    /// Parses `name: [immutable] <type-clause> [= initializer]`. `ctx`
    /// decides the override (`Definition` vs `Declaration`) and whether an
    /// initializer/body is permitted.
    pub(crate) fn parse_binding(&mut self, scope: ScopeId, ctx: DeclContext) -> CompileResult<crate::ast::NodeId> {
        let name_tok = self.expect(TokenKind::Name)?;
        self.expect(TokenKind::Colon)?;

        let node_kind = override_rules::definition_or_declaration(!matches!(ctx, DeclContext::Binding));
        let node = self.ast.alloc_node(node_kind, Some(name_tok), scope, name_tok.span);

        let mut mutable = true;
        if self.peek_kind() == TokenKind::Immutable {
            self.bump()?;
            mutable = false;
        }

        if ctx == DeclContext::Binding
            && !self.ast.scope(scope).is_global
            && self.peek_kind() == TokenKind::Fn
        {
            return Err(CompileError::BadPlacementForFunctionDefinition { span: self.peek().span });
        }

        match self.peek_kind() {
            TokenKind::Fn => self.parse_function_binding(node, scope, ctx, name_tok)?,
            TokenKind::FnPtr => self.parse_function_pointer_binding(node, scope, ctx)?,
            TokenKind::Ptr => self.parse_pointer_binding(node, scope, ctx)?,
            _ => self.parse_scalar_binding(node, scope, ctx, mutable)?,
        }

        let end = self.prev_end();
        self.ast.node_mut(node).span = Span::new(name_tok.span.offset, end - name_tok.span.offset);
        self.ast.node_mut(node).complete = true;

        match ctx {
            DeclContext::Param => self.declare_local_param(node, scope, name_tok, mutable)?,
            DeclContext::Binding if !self.ast.scope(scope).is_global => {
                self.declare_local_binding(node, scope, name_tok, mutable)?
            }
            DeclContext::Binding | DeclContext::Import => {
                self.declare_global(node, scope, name_tok, mutable, ctx)?
            }
        }
        Ok(node)
    }

    fn parse_scalar_binding(
        &mut self,
        node: crate::ast::NodeId,
        scope: ScopeId,
        ctx: DeclContext,
        _mutable: bool,
    ) -> CompileResult<()> {
        let ty = self.expect_type_name(NodeKind::Definition)?;
        self.ast.node_mut(node).meta = crate::ast::Meta::TypeAnnotation(TypeAnn::Scalar(ty));
        self.ast.node_mut(node).run_type = ty;
        if matches!(ctx, DeclContext::Binding) {
            self.expect(TokenKind::Eq)?;
            let init = self.parse_expr(scope, crate::syntax::PREC_ASSIGN)?;
            self.ast.node_mut(node).children = vec![init];
        }
        Ok(())
    }

    fn parse_pointer_binding(&mut self, node: crate::ast::NodeId, scope: ScopeId, ctx: DeclContext) -> CompileResult<()> {
        let ptr_tok = self.bump()?;
        let storage = self.parse_pointer_storage()?;
        let ptr_node = self.ast.alloc_node(NodeKind::PointerLiteral, Some(ptr_tok), scope, ptr_tok.span);
        self.ast.node_mut(ptr_node).meta = crate::ast::Meta::TypeAnnotation(TypeAnn::Pointer(storage));
        self.ast.node_mut(ptr_node).run_type = RunType::I32;
        if matches!(ctx, DeclContext::Binding) {
            self.expect(TokenKind::Eq)?;
            let addr = self.parse_expr(scope, crate::syntax::PREC_ASSIGN)?;
            self.ast.node_mut(ptr_node).children = vec![addr];
        }
        self.ast.node_mut(ptr_node).complete = true;
        self.ast.node_mut(node).meta = crate::ast::Meta::TypeAnnotation(TypeAnn::Pointer(storage));
        self.ast.node_mut(node).run_type = RunType::I32;
        self.ast.node_mut(node).children = vec![ptr_node];
        Ok(())
    }

    fn parse_function_pointer_binding(&mut self, node: crate::ast::NodeId, scope: ScopeId, ctx: DeclContext) -> CompileResult<()> {
        let fnptr_tok = self.bump()?;
        let type_list = self.parse_paren_list(scope, ParenRole::TypeList)?;
        let ret = self.expect_type_name(NodeKind::FunctionPointer)?;
        let mut fp_children = vec![type_list];
        if matches!(ctx, DeclContext::Binding) && self.peek_kind() == TokenKind::Eq {
            self.bump()?;
            let target_tok = self.expect(TokenKind::Name)?;
            let target_ref = self.alloc_reference(target_tok, scope);
            fp_children.push(target_ref);
        }
        let span = Span::new(fnptr_tok.span.offset, self.prev_end() - fnptr_tok.span.offset);
        let fp_node = self.ast.alloc_node(NodeKind::FunctionPointer, Some(fnptr_tok), scope, span);
        self.ast.node_mut(fp_node).children = fp_children;
        self.ast.node_mut(fp_node).meta = crate::ast::Meta::TypeAnnotation(TypeAnn::Scalar(ret));
        self.ast.node_mut(fp_node).run_type = RunType::I32;
        self.ast.node_mut(fp_node).complete = true;

        let params: Vec<RunType> = self
            .ast
            .node(type_list)
            .children
            .clone()
            .into_iter()
            .map(|c| self.declaration_scalar_type(c))
            .collect();
        let sig = self.intern_signature(ret, params);
        // Like a plain pointer, the binding itself is an i32 table index;
        // its declared return type rides along as `ann`'s scalar payload so
        // `declare_global` can set `Definition::return_type` correctly.
        self.ast.node_mut(node).meta = crate::ast::Meta::TypeAnnotation(TypeAnn::Scalar(ret));
        self.ast.node_mut(node).children = vec![fp_node];
        self.ast.node_mut(node).run_type = RunType::I32;
        self.pending_signature = Some(sig);
        Ok(())
    }

    fn parse_function_binding(
        &mut self,
        node: crate::ast::NodeId,
        scope: ScopeId,
        ctx: DeclContext,
        _name_tok: Token,
    ) -> CompileResult<()> {
        let fn_tok = self.bump()?;
        let inside_decl = matches!(ctx, DeclContext::Import);
        let lit_kind = override_rules::function_literal_or_signature(inside_decl);

        if inside_decl {
            let type_list = self.parse_paren_list(scope, ParenRole::TypeList)?;
            let ret = self.expect_type_name(lit_kind)?;
            let span = Span::new(fn_tok.span.offset, self.prev_end() - fn_tok.span.offset);
            let sig_node = self.ast.alloc_node(lit_kind, Some(fn_tok), scope, span);
            self.ast.node_mut(sig_node).children = vec![type_list];
            self.ast.node_mut(sig_node).meta = crate::ast::Meta::TypeAnnotation(TypeAnn::Scalar(ret));
            self.ast.node_mut(sig_node).run_type = ret;
            self.ast.node_mut(sig_node).complete = true;

            let params: Vec<RunType> = self
                .ast
                .node(type_list)
                .children
                .clone()
                .into_iter()
                .map(|c| self.declaration_scalar_type(c))
                .collect();
            self.pending_signature = Some(self.intern_signature(ret, params));
            self.ast.node_mut(node).children = vec![sig_node];
            self.ast.node_mut(node).run_type = ret;
        } else {
            let fn_scope = self.new_child_scope(scope);
            let param_list = self.parse_paren_list(fn_scope, ParenRole::ParameterList)?;
            let ret = self.expect_type_name(lit_kind)?;
            let block = self.parse_block(fn_scope)?;
            let span = Span::new(fn_tok.span.offset, self.prev_end() - fn_tok.span.offset);
            let lit_node = self.ast.alloc_node(lit_kind, Some(fn_tok), fn_scope, span);
            self.ast.node_mut(lit_node).children = vec![param_list, block];
            self.ast.node_mut(lit_node).meta = crate::ast::Meta::TypeAnnotation(TypeAnn::Scalar(ret));
            self.ast.node_mut(lit_node).run_type = ret;
            self.ast.node_mut(lit_node).complete = true;

            let params: Vec<RunType> = self
                .ast
                .node(param_list)
                .children
                .clone()
                .into_iter()
                .map(|c| self.declaration_scalar_type(c))
                .collect();
            self.pending_signature = Some(self.intern_signature(ret, params.clone()));
            self.pending_fn_scope = Some((fn_scope, ret));
            self.ast.node_mut(node).children = vec![lit_node];
            self.ast.node_mut(node).run_type = ret;
        }
        Ok(())
    }

    fn declaration_scalar_type(&self, decl: crate::ast::NodeId) -> RunType {
        match &self.ast.node(decl).meta {
            crate::ast::Meta::TypeAnnotation(TypeAnn::Scalar(ty)) => *ty,
            crate::ast::Meta::TypeAnnotation(TypeAnn::Pointer(_)) => RunType::I32,
            _ => RunType::Void,
        }
    }

    fn intern_signature(&mut self, return_type: RunType, params: Vec<RunType>) -> u32 {
        let global = self.ast.global_scope_mut();
        if let Some(idx) = global.signatures.iter().position(|(r, p)| *r == return_type && *p == params) {
            return idx as u32;
        }
        global.signatures.push((return_type, params));
        (global.signatures.len() - 1) as u32
    }

    fn declare_local_param(
        &mut self,
        _node: crate::ast::NodeId,
        scope: ScopeId,
        name_tok: Token,
        mutable: bool,
    ) -> CompileResult<()> {
        let name = self.text(name_tok).to_string();
        if self.ast.scope(scope).names.contains_key(&name) {
            return Err(CompileError::DuplicateDefinition {
                name,
                first_span: name_tok.span,
                second_span: name_tok.span,
            });
        }
        let run_type = self.ast.node(_node).run_type;
        let local = LocalVar {
            name: Some(name.clone()),
            run_type,
            mutable,
            is_param: true,
            index: None,
        };
        let local_id = self.ast.alloc_local(local);
        self.ast.scope_mut(scope).local_defs.push(local_id);
        self.ast.scope_mut(scope).function_locals.push(local_id);
        self.ast.scope_mut(scope).names.insert(name, Binding::Local(local_id));
        Ok(())
    }

    /// A `name: type = value` binding written inside a function body (a
    /// block, loop, or if-arm), as opposed to one at module scope. Indices
    /// for locals are per-function, not per-block, so the `LocalVar` is
    /// registered on the nearest enclosing function scope's
    /// `function_locals` while the name itself is visible only from the
    /// declaring scope downward (ordinary lexical shadowing via
    /// `Ast::lookup`'s `parent` walk).
    fn declare_local_binding(
        &mut self,
        node: crate::ast::NodeId,
        scope: ScopeId,
        name_tok: Token,
        mutable: bool,
    ) -> CompileResult<()> {
        // A local binding never carries a pending function/function-pointer
        // signature (those are module-scope constructs); clear it so it
        // doesn't leak into the next top-level binding's `declare_global`.
        self.pending_signature = None;
        self.pending_fn_scope = None;

        let name = self.text(name_tok).to_string();
        if self.ast.scope(scope).names.contains_key(&name) {
            return Err(CompileError::DuplicateDefinition {
                name,
                first_span: name_tok.span,
                second_span: name_tok.span,
            });
        }
        let fn_scope = self.enclosing_function_scope(scope).unwrap_or(scope);
        let run_type = self.ast.node(node).run_type;
        let local = LocalVar {
            name: Some(name.clone()),
            run_type,
            mutable,
            is_param: false,
            index: None,
        };
        let local_id = self.ast.alloc_local(local);
        self.ast.scope_mut(fn_scope).function_locals.push(local_id);
        self.ast.scope_mut(scope).local_defs.push(local_id);
        self.ast.scope_mut(scope).names.insert(name, Binding::Local(local_id));
        self.ast.node_mut(node).meta = crate::ast::Meta::Bound(Binding::Local(local_id));
        Ok(())
    }

    /// Walks `parent` scopes outward until it finds the one a `FunctionLiteral`
    /// stamped with `function_def` (see `declare_global`), i.e. the scope
    /// that owns the enclosing function's flat local-variable list.
    fn enclosing_function_scope(&self, mut scope: ScopeId) -> Option<ScopeId> {
        loop {
            if self.ast.scope(scope).function_def.is_some() {
                return Some(scope);
            }
            scope = self.ast.scope(scope).parent?;
        }
    }

    fn declare_global(
        &mut self,
        node: crate::ast::NodeId,
        scope: ScopeId,
        name_tok: Token,
        mutable: bool,
        ctx: DeclContext,
    ) -> CompileResult<()> {
        let name = self.text(name_tok).to_string();
        if self.ast.global_scope().names.contains_key(&name) {
            return Err(CompileError::DuplicateDefinition {
                name,
                first_span: name_tok.span,
                second_span: name_tok.span,
            });
        }
        let kind_tok = self.ast.node(node).kind;
        let ann = match &self.ast.node(node).meta {
            crate::ast::Meta::TypeAnnotation(a) => *a,
            _ => TypeAnn::Scalar(self.ast.node(node).run_type),
        };
        let (def_kind, run_type, return_type, pointer_storage, param_types) = match ann {
            TypeAnn::Scalar(ty) => {
                if let Some(sig_idx) = self.pending_signature {
                    let params = self
                        .ast
                        .global_scope()
                        .signatures
                        .get(sig_idx as usize)
                        .map(|(_, p)| p.clone())
                        .unwrap_or_default();
                    // `fn_ptr`'s binding reaches here too (its declared type
                    // is also `TypeAnn::Scalar`, the return type): a
                    // function pointer is recorded as mutable-global-like
                    // (i32 with a signature index), distinct from the
                    // function it may point to.
                    let is_function_pointer = self
                        .ast
                        .node(node)
                        .children
                        .first()
                        .map(|&c| self.ast.node(c).kind)
                        == Some(NodeKind::FunctionPointer);
                    if is_function_pointer {
                        (DefinitionKind::Global, RunType::I32, ty, None, params)
                    } else {
                        (DefinitionKind::Function, RunType::I32, ty, None, params)
                    }
                } else {
                    (DefinitionKind::Global, ty, ty, None, Vec::new())
                }
            }
            TypeAnn::Pointer(storage) => (DefinitionKind::Global, RunType::I32, storage.element_type, Some(storage), Vec::new()),
            TypeAnn::Memory | TypeAnn::Table => unreachable!("default slots are declared via parse_default_slot"),
        };
        let signature_index = self.pending_signature.take();
        let fn_scope = self.pending_fn_scope.take();

        let def = crate::ast::Definition {
            kind: def_kind,
            name: name.clone(),
            run_type,
            return_type,
            mutable,
            scope,
            index: None,
            import_source: None,
            export_name: None,
            initializer: self.ast.node(node).children.first().copied(),
            signature_index,
            param_types,
            pointer_storage,
            limits: None,
            def_span: name_tok.span,
        };
        let def_id = self.ast.alloc_definition(def);
        self.ast.node_mut(node).meta = crate::ast::Meta::Bound(Binding::Definition(def_id));

        if let Some((scope_id, _ret)) = fn_scope {
            self.ast.scope_mut(scope_id).function_def = Some(def_id);
        }

        match (ctx, def_kind) {
            (DeclContext::Import, DefinitionKind::Function) => {
                self.ast.global_scope_mut().imported_functions.push(def_id);
            }
            (DeclContext::Import, _) => {
                self.ast.global_scope_mut().imported_globals.push(def_id);
            }
            (_, DefinitionKind::Function) => {
                self.ast.global_scope_mut().functions.push(def_id);
            }
            _ => {
                self.ast.global_scope_mut().variables.push(def_id);
            }
        }
        self.ast.global_scope_mut().definitions.push(def_id);
        self.ast.global_scope_mut().names.insert(name, Binding::Definition(def_id));
        let _ = kind_tok;
        Ok(())
    }

    // ---- references -----------------------------------------------------

    pub(crate) fn alloc_reference(&mut self, tok: Token, scope: ScopeId) -> crate::ast::NodeId {
        let node = self.ast.alloc_node(NodeKind::VariableReference, Some(tok), scope, tok.span);
        self.ast.node_mut(node).complete = true;
        self.ast.scope_mut(scope).references.push(node);
        node
    }

    // ---- types -------------------------------------------------------

    pub(crate) fn expect_type_name(&mut self, parent: NodeKind) -> CompileResult<RunType> {
        let tok = self.bump()?;
        if tok.kind != TokenKind::Name {
            return Err(CompileError::ChildTypeConstraintViolation {
                parent,
                child_index: 0,
                span: tok.span,
            });
        }
        match self.text(tok) {
            "i32" => Ok(RunType::I32),
            "i64" => Ok(RunType::I64),
            "f32" => Ok(RunType::F32),
            "f64" => Ok(RunType::F64),
            "void" => Ok(RunType::Void),
            _ => Err(CompileError::ChildTypeConstraintViolation {
                parent,
                child_index: 0,
                span: tok.span,
            }),
        }
    }

    pub(crate) fn parse_pointer_storage(&mut self) -> CompileResult<crate::ast::PointerStorage> {
        let tok = self.expect(TokenKind::Name)?;
        parse_pointer_storage_text(self.text(tok), tok.span)
    }

    // ---- blocks / grouped lists -----------------------------------------

    pub(crate) fn parse_block(&mut self, outer_scope: ScopeId) -> CompileResult<crate::ast::NodeId> {
        let lcurly = self.expect(TokenKind::LCurly)?;
        let block_scope = self.new_child_scope(outer_scope);
        let node = self.ast.alloc_node(NodeKind::Block, Some(lcurly), block_scope, lcurly.span);
        self.skip_terminators();
        let mut children = Vec::new();
        let mut saw_escape: Option<Span> = None;
        while self.peek_kind() != TokenKind::RCurly {
            if self.peek_kind() == TokenKind::Eof {
                return Err(CompileError::MisplacedTerminatorOrUnfinishedExpression { span: self.peek().span });
            }
            if let Some(escape_span) = saw_escape {
                // Structural unreachable-code detection for a leading
                // escaping statement lives in the validator (it can see
                // `always_escapes`); here we only remember that a
                // statement like `return`/`break` textually ended the
                // previous one so the validator doesn't need lookahead.
                let _ = escape_span;
            }
            let stmt = self.parse_statement(block_scope)?;
            if matches!(
                self.ast.node(stmt).kind,
                NodeKind::Return | NodeKind::Break | NodeKind::Continue | NodeKind::Yield
            ) {
                saw_escape = Some(self.ast.node(stmt).span);
            }
            children.push(stmt);
            self.skip_terminators();
        }
        let rcurly = self.bump()?;
        let span = Span::new(lcurly.span.offset, rcurly.span.end() - lcurly.span.offset);
        self.ast.node_mut(node).children = children;
        self.ast.node_mut(node).span = span;
        self.ast.node_mut(node).complete = true;
        Ok(node)
    }

    fn parse_statement(&mut self, scope: ScopeId) -> CompileResult<crate::ast::NodeId> {
        if self.peek_kind() == TokenKind::Name && self.peek2_kind() == TokenKind::Colon {
            return self.parse_binding(scope, DeclContext::Binding);
        }
        self.parse_expr(scope, crate::syntax::PREC_NONE)
    }

    /// Parses a `( item , item , ... )` group, overridden to `role`'s
    /// concrete kind. Each item is parsed by `item_parser`.
    pub(crate) fn parse_paren_list(&mut self, scope: ScopeId, role: ParenRole) -> CompileResult<crate::ast::NodeId> {
        let lparen = self.expect(TokenKind::LParen)?;
        let kind = role.node_kind();
        let node = self.ast.alloc_node(kind, Some(lparen), scope, lparen.span);
        let mut children = Vec::new();
        while self.peek_kind() != TokenKind::RParen {
            let item = match role {
                ParenRole::ArgumentList => self.parse_expr(scope, crate::syntax::PREC_ASSIGN)?,
                ParenRole::ParameterList => self.parse_binding(scope, DeclContext::Param)?,
                ParenRole::TypeList => self.parse_anonymous_type_declaration(scope)?,
                ParenRole::Group => unreachable!("Group is parsed by parse_prefix, not parse_paren_list"),
            };
            children.push(item);
            if self.peek_kind() == TokenKind::Comma {
                self.bump()?;
            } else {
                break;
            }
        }
        let rparen = self.expect(TokenKind::RParen)?;
        let span = Span::new(lparen.span.offset, rparen.span.end() - lparen.span.offset);
        self.ast.node_mut(node).children = children;
        self.ast.node_mut(node).span = span;
        self.ast.node_mut(node).complete = true;
        self.ast.node_mut(node).run_type = RunType::Void;
        Ok(node)
    }

    /// An unnamed `type` entry inside a `TypeList` (`fn_ptr`/imported
    /// function signatures never bind parameter names).
    fn parse_anonymous_type_declaration(&mut self, scope: ScopeId) -> CompileResult<crate::ast::NodeId> {
        let start = self.peek().span;
        let ty = self.expect_type_name(NodeKind::TypeList)?;
        let node = self.ast.alloc_node(NodeKind::Declaration, None, scope, start);
        self.ast.node_mut(node).meta = crate::ast::Meta::TypeAnnotation(TypeAnn::Scalar(ty));
        self.ast.node_mut(node).run_type = ty;
        self.ast.node_mut(node).complete = true;
        Ok(node)
    }

    // ---- literal helpers -------------------------------------------------

    pub(crate) fn alloc_int_literal(&mut self, tok: Token, value: u64) -> crate::ast::NodeId {
        let node = self.ast.alloc_node(NodeKind::IntLiteral, Some(tok), self.ast.node(self.ast.root.unwrap()).scope, tok.span);
        self.ast.node_mut(node).meta = crate::ast::Meta::IntValue(value);
        self.ast.node_mut(node).run_type = RunType::I32;
        self.ast.node_mut(node).complete = true;
        node
    }
}

fn validate_import_source(text: &str, span: Span) -> CompileResult<()> {
    match text.split_once('/') {
        Some((module, field)) if !module.is_empty() && !field.is_empty() => Ok(()),
        _ => Err(CompileError::BadImportSource {
            text: text.to_string(),
            span,
        }),
    }
}

pub(crate) fn unescape_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

pub(crate) fn parse_uint_literal(text: &str, span: Span) -> CompileResult<u64> {
    let digits = strip_width_suffix(text);
    digits.parse::<u64>().map_err(|_| CompileError::UnintelligibleSize {
        text: text.to_string(),
        span,
    })
}

pub(crate) fn strip_width_suffix(text: &str) -> &str {
    if let Some(idx) = text.find('x') {
        &text[..idx]
    } else {
        text
    }
}

pub(crate) fn parse_pointer_storage_text(text: &str, span: Span) -> CompileResult<crate::ast::PointerStorage> {
    use crate::ast::PointerStorage;
    let (base, suffix) = match text.split_once('_') {
        Some((b, s)) => (b, Some(s)),
        None => (text, None),
    };
    let element_type = match base {
        "i32" => RunType::I32,
        "i64" => RunType::I64,
        _ => {
            return Err(CompileError::UnintelligibleSize {
                text: text.to_string(),
                span,
            })
        }
    };
    match suffix {
        None => Ok(PointerStorage {
            element_type,
            storage_bytes: element_type.byte_size(),
            signed: true,
            extended: false,
        }),
        Some(s) => {
            let signed = match s.as_bytes().first() {
                Some(b's') => true,
                Some(b'u') => false,
                _ => {
                    return Err(CompileError::UnintelligibleSize {
                        text: text.to_string(),
                        span,
                    })
                }
            };
            let bits: u32 = s[1..].parse().map_err(|_| CompileError::UnintelligibleSize {
                text: text.to_string(),
                span,
            })?;
            let storage_bytes = bits / 8;
            if storage_bytes == 0 || storage_bytes >= element_type.byte_size() {
                return Err(CompileError::UnintelligibleSize {
                    text: text.to_string(),
                    span,
                });
            }
            Ok(PointerStorage {
                element_type,
                storage_bytes,
                signed,
                extended: true,
            })
        }
    }
}
