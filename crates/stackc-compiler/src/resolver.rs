//! Name resolution.
//!
//! Definitions are already inserted into `scope.names` by the parser (with
//! the duplicate check raised right there, at the point of declaration), so
//! this pass only has to bind references and enforce referent-kind rules. A
//! scope's `names` is never physically copied into its children — `Ast::lookup`
//! walks `parent` instead, which is behaviorally the same as carrying
//! `scope.names` downward, just without the copy.

use crate::ast::{Ast, Binding, DefinitionKind, NodeId, ScopeId};
use crate::error::{CompileError, CompileResult};
use crate::syntax::NodeKind;

pub fn resolve(ast: &mut Ast) -> CompileResult<()> {
    let root = ast.root.expect("parser always sets root");
    set_parents(ast, root, None);

    let global = ast.global_scope.expect("parser always sets global_scope");
    resolve_scope(ast, global)?;

    collect_exports(ast)?;
    Ok(())
}

/// One-time pass stamping every node's `parent`, used afterward to tell an
/// export's reference target apart from an ordinary variable reference
/// (export/as-rename bypass the referent-kind check; nothing else does).
fn set_parents(ast: &mut Ast, node: NodeId, parent: Option<NodeId>) {
    ast.node_mut(node).parent = parent;
    let children = ast.node(node).children.clone();
    for child in children {
        set_parents(ast, child, Some(node));
    }
}

fn resolve_scope(ast: &mut Ast, scope: ScopeId) -> CompileResult<()> {
    let refs = ast.scope(scope).references.clone();
    for node_id in refs {
        bind_reference(ast, node_id)?;
    }
    let children = ast.scope(scope).children.clone();
    for child in children {
        resolve_scope(ast, child)?;
    }
    Ok(())
}

fn bind_reference(ast: &mut Ast, node_id: NodeId) -> CompileResult<()> {
    let node = ast.node(node_id);
    let scope = node.scope;
    let span = node.span;
    let name = ast.node_text(node_id).to_string();

    let binding = ast.lookup(scope, &name).ok_or_else(|| CompileError::UnresolvableReference {
        name: name.clone(),
        span,
    })?;

    ast.node_mut(node_id).meta = crate::ast::Meta::Bound(binding);

    if bypasses_referent_check(ast, node_id) {
        return Ok(());
    }

    let kind = ast.node(node_id).kind;
    match kind {
        NodeKind::VariableReference => {
            if let Binding::Definition(def_id) = binding {
                if ast.definition(def_id).kind == DefinitionKind::Function {
                    return Err(CompileError::BadReferenceKind {
                        name,
                        found: DefinitionKind::Function,
                        expected: "variable",
                        span,
                    });
                }
            }
        }
        NodeKind::Call => {
            // A call target is either a plain/imported function, or a
            // function-pointer global (an indirect call through a table
            // index) — both carry a `signature_index`.
            let ok = matches!(binding, Binding::Definition(def_id) if ast.definition(def_id).signature_index.is_some());
            if !ok {
                let found = match binding {
                    Binding::Definition(def_id) => ast.definition(def_id).kind,
                    Binding::Local(_) => DefinitionKind::Global,
                };
                return Err(CompileError::BadReferenceKind {
                    name,
                    found,
                    expected: "function, function signature, or function pointer",
                    span,
                });
            }
        }
        NodeKind::MemoryAccess => {
            let ok = matches!(binding, Binding::Definition(def_id) if ast.definition(def_id).pointer_storage.is_some());
            if !ok {
                let found = match binding {
                    Binding::Definition(def_id) => ast.definition(def_id).kind,
                    Binding::Local(_) => DefinitionKind::Global,
                };
                return Err(CompileError::BadReferenceKind {
                    name,
                    found,
                    expected: "pointer",
                    span,
                });
            }
        }
        _ => {}
    }
    Ok(())
}

/// A reference is exempt from the referent-kind check when it names an
/// export target, directly (`export add`) or through an `as`-rename
/// (`export add as "plus"`), or when it is a function-pointer binding's
/// initializer (`ptr: fn_ptr (i32) i32 = add`) — the ordinary
/// `VariableReference` check would otherwise reject `add` for naming a
/// function instead of a variable, which is exactly what this reference is
/// supposed to name. The validator checks the target's signature matches
/// separately.
fn bypasses_referent_check(ast: &Ast, node_id: NodeId) -> bool {
    match ast.node(node_id).parent {
        Some(parent) => matches!(
            ast.node(parent).kind,
            NodeKind::Export | NodeKind::AsRename | NodeKind::FunctionPointer
        ),
        None => false,
    }
}

/// Walks the `Export` nodes directly under `Root` and populates
/// `global_scope.exports`, applying the mutable-export and
/// non-existent-export checks. Run after every reference is bound, since an
/// export may forward-reference a definition declared later in the file.
fn collect_exports(ast: &mut Ast) -> CompileResult<()> {
    let root = ast.root.expect("parser always sets root");
    let top_level = ast.node(root).children.clone();
    for node_id in top_level {
        if ast.node(node_id).kind != NodeKind::Export {
            continue;
        }
        let export_span = ast.node(node_id).span;
        let child = ast.node(node_id).children[0];
        let def_id = match ast.node(child).kind {
            NodeKind::ExportType => match ast.node(child).meta {
                // `export memory` / `export table`: the parser records
                // which slot kind this is as a `TypeAnnotation`, not a
                // `Bound` — the default slot's own `DefinitionId` lives on
                // `global_scope().default_memory`/`default_table`.
                crate::ast::Meta::TypeAnnotation(crate::ast::TypeAnn::Memory) => {
                    match ast.global_scope().default_memory {
                        Some(id) => id,
                        None => {
                            return Err(CompileError::NonExistentExport {
                                name: "memory".to_string(),
                                span: export_span,
                            })
                        }
                    }
                }
                crate::ast::Meta::TypeAnnotation(crate::ast::TypeAnn::Table) => {
                    match ast.global_scope().default_table {
                        Some(id) => id,
                        None => {
                            return Err(CompileError::NonExistentExport {
                                name: "table".to_string(),
                                span: export_span,
                            })
                        }
                    }
                }
                _ => continue,
            },
            NodeKind::AsRename => {
                let reference = ast.node(child).children[0];
                definition_of(ast, reference, export_span)?
            }
            NodeKind::VariableReference => definition_of(ast, child, export_span)?,
            _ => continue,
        };
        if ast.definition(def_id).mutable {
            return Err(CompileError::MutableExport {
                name: ast.definition(def_id).name.clone(),
                span: export_span,
            });
        }
        let export_name = export_name(ast, node_id, def_id);
        ast.definition_mut(def_id).export_name = Some(export_name);
        ast.global_scope_mut().exports.push(def_id);
    }
    Ok(())
}

fn definition_of(ast: &Ast, reference_node: NodeId, span: crate::error::Span) -> CompileResult<crate::ast::DefinitionId> {
    match ast.node(reference_node).meta {
        crate::ast::Meta::Bound(Binding::Definition(id)) => Ok(id),
        _ => Err(CompileError::NonExistentExport {
            name: ast.node_text(reference_node).to_string(),
            span,
        }),
    }
}

fn export_name(ast: &Ast, export_node: NodeId, def_id: crate::ast::DefinitionId) -> String {
    let child = ast.node(export_node).children[0];
    if ast.node(child).kind == NodeKind::AsRename {
        let alias_node = ast.node(child).children[1];
        if let crate::ast::Meta::StringValue(s) = &ast.node(alias_node).meta {
            return s.clone();
        }
    }
    ast.definition(def_id).name.clone()
}

#[cfg(test)]
mod tests {
    use crate::parser::Parser;
    use crate::Limits;

    fn compile(source: &str) -> crate::error::CompileResult<crate::ast::Ast> {
        let mut ast = Parser::new(source, Limits::default()).parse_program()?;
        super::resolve(&mut ast)?;
        Ok(ast)
    }

    #[test]
    fn exported_function_is_recorded() {
        let ast = compile("add: fn (a: i32, b: i32) i32 { a + b }\nexport add\n").unwrap();
        assert_eq!(ast.global_scope().exports.len(), 1);
    }

    #[test]
    fn unresolvable_reference_is_an_error() {
        let err = compile("add: fn () i32 { missing }\n");
        assert!(err.is_err());
    }

    #[test]
    fn exporting_a_mutable_global_is_rejected() {
        let err = compile("counter: i32 = 0\nexport counter\n");
        assert!(matches!(
            err,
            Err(crate::error::CompileError::MutableExport { .. })
        ));
    }

    #[test]
    fn calling_a_non_function_is_rejected() {
        let err = compile("x: i32 = 0\nmain: fn () i32 { x() }\n");
        assert!(matches!(
            err,
            Err(crate::error::CompileError::BadReferenceKind { .. })
        ));
    }
}
