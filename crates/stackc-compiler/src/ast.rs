//! The AST arena, scopes, and definitions.
//!
//! Nodes and scopes are not a garbage-collected graph with live parent
//! back-references; they live in flat arenas owned by `Ast` and are
//! addressed by small `Id` newtypes. `parent` is a plain, rewritable index
//! rather than a strong reference, which keeps node reparenting during
//! parsing a matter of overwriting an index instead of fighting the
//! borrow checker.

use indexmap::IndexMap;
use ordered_float::OrderedFloat;

use crate::error::Span;
use crate::lexer::Token;
use crate::syntax::NodeKind;

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(NodeId);
arena_id!(ScopeId);
arena_id!(DefinitionId);
arena_id!(LocalId);

/// The type of value a subexpression leaves on the operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunType {
    I32,
    I64,
    F32,
    F64,
    Void,
}

impl RunType {
    pub fn is_numeric(self) -> bool {
        !matches!(self, RunType::Void)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, RunType::I32 | RunType::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, RunType::F32 | RunType::F64)
    }

    pub fn byte_size(self) -> u32 {
        match self {
            RunType::I32 | RunType::F32 => 4,
            RunType::I64 | RunType::F64 => 8,
            RunType::Void => 0,
        }
    }
}

/// What an identifier in a `names` map actually refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Definition(DefinitionId),
    Local(LocalId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Function,
    Global,
    Memory,
    Table,
}

/// A sub-word load/store shape parsed from a pointer's storage-type
/// grammar `i{32|64}[_{s|u}{8|16|32}]?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerStorage {
    /// The type a load leaves on the stack / a store consumes.
    pub element_type: RunType,
    pub storage_bytes: u32,
    pub signed: bool,
    /// True when `storage_bytes < element_type.byte_size()`, i.e. this is
    /// a sign/zero-extending narrow load or truncating narrow store.
    pub extended: bool,
}

/// A parsed type clause, attached as `Meta::TypeAnnotation` rather than
/// modeled as further AST children — grammar-wise a type is just one or two
/// keyword tokens, never an expression, so giving it node/child status
/// would only multiply arities without adding anything the validator reads
/// back out differently than a plain enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeAnn {
    Scalar(RunType),
    Pointer(PointerStorage),
    /// `memory`/`table` mentioned in an `import`/`export` declaration
    /// position, where no scalar run type applies.
    Memory,
    Table,
}

/// A uniform record for a named, module-level entity.
#[derive(Debug, Clone)]
pub struct Definition {
    pub kind: DefinitionKind,
    pub name: String,
    /// For `Global`: the global's own type (the pointer's *address* type,
    /// i.e. always i32, when this global is a pointer). For `Function`:
    /// unused (see `return_type`/`param_types`).
    pub run_type: RunType,
    pub return_type: RunType,
    pub mutable: bool,
    pub scope: ScopeId,
    /// Assigned late, during emission, to position this entity within its
    /// index space.
    pub index: Option<u32>,
    pub import_source: Option<String>,
    pub export_name: Option<String>,
    pub initializer: Option<NodeId>,
    pub signature_index: Option<u32>,
    pub param_types: Vec<RunType>,
    pub pointer_storage: Option<PointerStorage>,
    /// Size-limit pair for `Memory`/`Table`: `(initial, maximum)`.
    pub limits: Option<(u32, Option<u32>)>,
    pub def_span: Span,
}

/// A local variable or parameter inside a function scope, or an anonymous
/// temp the validator allocates for short-circuit/tee lowering. Indices are
/// assigned only at emission time.
#[derive(Debug, Clone)]
pub struct LocalVar {
    /// `None` for validator-synthesized temps (their name uses a character
    /// illegal in source identifiers, so we just leave it unset
    /// rather than fabricate one).
    pub name: Option<String>,
    pub run_type: RunType,
    pub mutable: bool,
    pub is_param: bool,
    pub index: Option<u32>,
}

/// A lexical scope: block, function, loop, or the implicit root.
#[derive(Debug, Clone)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub is_global: bool,
    pub names: IndexMap<String, Binding>,
    pub definitions: Vec<DefinitionId>,
    /// Locals (including params and validator-synthesized temps) declared
    /// directly in this scope, tracked separately from `definitions` since
    /// they are addressed by `LocalId`, not `DefinitionId` — the resolver
    /// binds both kinds into the same `names` map via `Binding`.
    pub local_defs: Vec<LocalId>,
    pub references: Vec<NodeId>,
    pub children: Vec<ScopeId>,

    // Global-scope-only bookkeeping (shallow-copied into child scopes'
    // `names`, but these lists live only on the global scope itself).
    pub signatures: Vec<(RunType, Vec<RunType>)>,
    pub functions: Vec<DefinitionId>,
    pub imported_functions: Vec<DefinitionId>,
    pub imported_globals: Vec<DefinitionId>,
    pub variables: Vec<DefinitionId>,
    pub default_memory: Option<DefinitionId>,
    pub default_table: Option<DefinitionId>,
    pub exports: Vec<DefinitionId>,

    // Function-scope-only: the locals/params/temps belonging to this
    // function, and the function's own `DefinitionId` so the validator and
    // emitter can look up its declared return type.
    pub function_def: Option<DefinitionId>,
    pub function_locals: Vec<LocalId>,

    // Loop-scope-only: yield points (break/yield nodes) recorded here so
    // the validator can check they agree on a type, and the emitter can
    // compute branch depths.
    pub loop_yields: Vec<NodeId>,
    pub loop_has_return: bool,
    /// True for the scope a `Loop` node creates — lets the validator find
    /// the nearest enclosing loop by walking `parent` without re-deriving
    /// it from node structure.
    pub is_loop: bool,
    /// The `Loop` node that owns this scope, when `is_loop`.
    pub loop_node: Option<NodeId>,
}

impl Scope {
    fn new(parent: Option<ScopeId>, is_global: bool) -> Self {
        Self {
            parent,
            is_global,
            names: IndexMap::new(),
            definitions: Vec::new(),
            local_defs: Vec::new(),
            references: Vec::new(),
            children: Vec::new(),
            signatures: Vec::new(),
            functions: Vec::new(),
            imported_functions: Vec::new(),
            imported_globals: Vec::new(),
            variables: Vec::new(),
            default_memory: None,
            default_table: None,
            exports: Vec::new(),
            function_def: None,
            function_locals: Vec::new(),
            loop_yields: Vec::new(),
            loop_has_return: false,
            is_loop: false,
            loop_node: None,
        }
    }
}

/// Kind-specific data attached by the parser/resolver/validator.
#[derive(Debug, Clone, PartialEq)]
pub enum Meta {
    IntValue(u64),
    FloatValue(OrderedFloat<f64>),
    StringValue(String),
    /// Resolved binding for a `VariableReference`, `Call`, `MemoryAccess`,
    /// `PointerLiteral`/`FunctionPointer` name, `Export`, or `AsRename`.
    Bound(Binding),
    /// Operator dispatch result attached to a binary/unary operator node.
    Operator {
        opcode: crate::emit::opcode::Opcode,
        result_type: RunType,
    },
    /// Anonymous temp local allocated for `or`, value-producing `Assign`
    /// (for the tee-and-reload pattern, over either a variable or a memory
    /// target).
    Temp(LocalId),
    /// A parsed type clause: attached to `Declaration`, `FunctionLiteral`,
    /// `FunctionSignature`, `FunctionPointer`, `PointerLiteral`.
    TypeAnnotation(TypeAnn),
    /// The loop this `break`/`yield`/`continue` targets, plus the outer
    /// block's nesting depth recorded by the emitter.
    LoopTarget { loop_node: NodeId },
    /// Recorded by the emitter once it knows how deep the loop's outer
    /// `block` sits, so `break`/`yield`/`continue` can compute a relative
    /// branch distance.
    BlockDepth(u32),
    /// Attached to a `MemoryAccess` node (both load and store contexts),
    /// replacing the `Bound` this node carried right after resolution: the
    /// pointer definition itself (the emitter still needs it, to load the
    /// base address), its storage shape, and the load/store alignment
    /// computed from that shape.
    MemoryOp {
        base: DefinitionId,
        storage: PointerStorage,
        align: u32,
    },
    /// Attached to `SuffixIncrement`/`SuffixDecrement`: which add/sub
    /// opcode to run, and the anonymous temp that saves the pre-increment
    /// value when the expression's value is needed (post-value semantics).
    Suffix {
        opcode: crate::emit::opcode::Opcode,
        result_type: RunType,
        temp: Option<LocalId>,
    },
    None,
}

impl Default for Meta {
    fn default() -> Self {
        Meta::None
    }
}

/// One AST node.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub token: Option<Token>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub scope: ScopeId,
    pub complete: bool,
    pub run_type: RunType,
    pub always_escapes: bool,
    pub drop_value: bool,
    pub meta: Meta,
    pub span: Span,
}

impl Node {
    fn new(kind: NodeKind, token: Option<Token>, scope: ScopeId, span: Span) -> Self {
        Self {
            kind,
            token,
            children: Vec::new(),
            parent: None,
            scope,
            complete: false,
            run_type: RunType::Void,
            always_escapes: false,
            drop_value: false,
            meta: Meta::None,
            span,
        }
    }
}

/// The arena backing an entire compilation: every `Node`, `Scope`, and
/// `Definition` allocated while compiling one `source_text`. Dropped whole
/// when the caller drops the pipeline's output.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
    scopes: Vec<Scope>,
    definitions: Vec<Definition>,
    locals: Vec<LocalVar>,
    pub root: Option<NodeId>,
    pub global_scope: Option<ScopeId>,
    /// The full source text, kept around so the resolver and validator can
    /// recover a reference's name from its token's span without the parser
    /// having to copy every identifier into an owned `String` up front.
    pub source: String,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_node(&mut self, kind: NodeKind, token: Option<Token>, scope: ScopeId, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind, token, scope, span));
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn alloc_scope(&mut self, parent: Option<ScopeId>, is_global: bool) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope::new(parent, is_global));
        if let Some(p) = parent {
            self.scopes[p.index()].children.push(id);
        }
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    pub fn alloc_definition(&mut self, def: Definition) -> DefinitionId {
        let id = DefinitionId(self.definitions.len() as u32);
        self.definitions.push(def);
        id
    }

    pub fn definition(&self, id: DefinitionId) -> &Definition {
        &self.definitions[id.index()]
    }

    pub fn definition_mut(&mut self, id: DefinitionId) -> &mut Definition {
        &mut self.definitions[id.index()]
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    pub fn alloc_local(&mut self, local: LocalVar) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(local);
        id
    }

    pub fn local(&self, id: LocalId) -> &LocalVar {
        &self.locals[id.index()]
    }

    pub fn local_mut(&mut self, id: LocalId) -> &mut LocalVar {
        &mut self.locals[id.index()]
    }

    /// The root scope, which alone owns the module-level bookkeeping
    /// (signatures, import/export lists, default memory/table). Other
    /// scopes leave those fields at their defaults; code that needs them
    /// goes through this accessor rather than a caller-supplied scope.
    pub fn global_scope(&self) -> &Scope {
        self.scope(self.global_scope.expect("global scope not yet created"))
    }

    pub fn global_scope_mut(&mut self) -> &mut Scope {
        let id = self.global_scope.expect("global scope not yet created");
        self.scope_mut(id)
    }

    /// Look up `name` starting at `scope`, walking up through parents —
    /// the lookup a resolved `names` map already captures after scope
    /// construction copies parent bindings downward,
    /// but also usable mid-parse before that copy has happened.
    /// The source text of a node's token, e.g. an identifier's spelling.
    /// Panics if the node has no token — callers only use this for nodes
    /// the parser always gives one (references, literals).
    pub fn node_text(&self, id: NodeId) -> &str {
        self.node(id)
            .token
            .expect("node_text called on a token-less node")
            .text(&self.source)
    }

    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<Binding> {
        let mut current = Some(scope);
        while let Some(s) = current {
            if let Some(binding) = self.scope(s).names.get(name) {
                return Some(*binding);
            }
            current = self.scope(s).parent;
        }
        None
    }
}
