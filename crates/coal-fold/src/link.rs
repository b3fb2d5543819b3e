//! Top-level fold linker.
//!
//! Resolves every `fold_name(@p)` pattern against the module's named folds
//! and records the result as a [`FoldCallGraph`]. Resolution ignores
//! declaration order, so mutually recursive folds link in any order.

use std::collections::{BTreeMap, BTreeSet};

use coal_ast::{DeclKind, Module, Span};
use coal_types::{ParamScope, Type, TypeRegistry, TypeResolver, match_type};

use crate::FoldConfig;
use crate::check::{Checker, ValidatedFold};
use crate::error::FoldError;
use crate::trace::{FoldAction, Phase, Tracer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Fold,
    AccumulatorFold,
    Unfold,
}

/// A named top-level fold or unfold.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldNode {
    pub name: String,
    pub kind: NodeKind,
    /// Consumed type for folds, seed type for unfolds, when it resolves.
    pub domain: Option<Type>,
    pub span: Span,
}

/// A resolved `to(@p)` pattern inside `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldEdge {
    pub from: String,
    pub to: String,
    pub span: Span,
}

/// Named folds and unfolds, with an edge per resolved link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoldCallGraph {
    nodes: BTreeMap<String, FoldNode>,
    edges: Vec<FoldEdge>,
}

impl FoldCallGraph {
    pub fn node(&self, name: &str) -> Option<&FoldNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FoldNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[FoldEdge] {
        &self.edges
    }

    pub fn edges_from<'g>(&'g self, name: &'g str) -> impl Iterator<Item = &'g FoldEdge> + 'g {
        self.edges.iter().filter(move |edge| edge.from == name)
    }

    /// Names of the folds whose patterns link to `name`.
    pub fn callers_of(&self, name: &str) -> BTreeSet<&str> {
        self.edges
            .iter()
            .filter(|edge| edge.to == name)
            .map(|edge| edge.from.as_str())
            .collect()
    }

    fn adjacency(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut graph: BTreeMap<String, BTreeSet<String>> = self
            .nodes
            .keys()
            .map(|name| (name.clone(), BTreeSet::new()))
            .collect();
        for edge in &self.edges {
            graph
                .entry(edge.from.clone())
                .or_default()
                .insert(edge.to.clone());
        }
        graph
    }

    /// Strongly connected components, each sorted by name, ordered so that
    /// a group comes after every group it links to.
    pub fn strongly_connected_groups(&self) -> Vec<Vec<String>> {
        fn dfs(
            node: &str,
            graph: &BTreeMap<String, BTreeSet<String>>,
            visited: &mut BTreeSet<String>,
            order: &mut Vec<String>,
        ) {
            if !visited.insert(node.to_string()) {
                return;
            }
            if let Some(neighbors) = graph.get(node) {
                for next in neighbors {
                    dfs(next, graph, visited, order);
                }
            }
            order.push(node.to_string());
        }

        fn dfs_rev(
            node: &str,
            reverse: &BTreeMap<String, BTreeSet<String>>,
            visited: &mut BTreeSet<String>,
            component: &mut BTreeSet<String>,
        ) {
            if !visited.insert(node.to_string()) {
                return;
            }
            component.insert(node.to_string());
            if let Some(neighbors) = reverse.get(node) {
                for next in neighbors {
                    dfs_rev(next, reverse, visited, component);
                }
            }
        }

        let graph = self.adjacency();
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        for node in graph.keys() {
            dfs(node, &graph, &mut visited, &mut order);
        }

        // Components of the reversed graph, taken in reverse finishing
        // order, come out sources first.
        let mut reverse: BTreeMap<String, BTreeSet<String>> = graph
            .keys()
            .map(|node| (node.clone(), BTreeSet::new()))
            .collect();
        for (from, tos) in &graph {
            for to in tos {
                reverse.entry(to.clone()).or_default().insert(from.clone());
            }
        }

        let mut rev_visited = BTreeSet::new();
        let mut groups = Vec::new();
        while let Some(node) = order.pop() {
            if rev_visited.contains(&node) {
                continue;
            }
            let mut component = BTreeSet::new();
            dfs_rev(&node, &reverse, &mut rev_visited, &mut component);
            groups.push(component.into_iter().collect());
        }
        groups.reverse();
        groups
    }

    /// Groups of two or more folds that link to each other.
    pub fn mutually_recursive_groups(&self) -> Vec<Vec<String>> {
        self.strongly_connected_groups()
            .into_iter()
            .filter(|group| group.len() > 1)
            .collect()
    }
}

/// What a top-level name refers to, for link resolution.
enum TopLevel {
    Fold {
        domain: Option<Type>,
        accumulator: bool,
    },
    Unfold,
    Let,
}

fn top_level(module: &Module, registry: &TypeRegistry) -> BTreeMap<String, TopLevel> {
    let mut table = BTreeMap::new();
    for decl in &module.declarations {
        let entry = match &decl.node {
            DeclKind::Fold(fold) => {
                let resolved = registry
                    .resolve(&fold.domain.node, ParamScope::Implicit)
                    .ok();
                let domain = match (fold.is_accumulator(), resolved) {
                    (true, Some(Type::Tuple(items))) => items.into_iter().next(),
                    (_, resolved) => resolved,
                };
                TopLevel::Fold {
                    domain,
                    accumulator: fold.is_accumulator(),
                }
            }
            DeclKind::Unfold(_) => TopLevel::Unfold,
            DeclKind::Let(_) => TopLevel::Let,
            DeclKind::TypeDef(_) | DeclKind::CodataDef(_) => continue,
        };
        // The first definition wins; duplicates are reported by the scope pass.
        table.entry(decl.node.name().node.clone()).or_insert(entry);
    }
    table
}

fn nodes(module: &Module, registry: &TypeRegistry) -> BTreeMap<String, FoldNode> {
    let mut nodes = BTreeMap::new();
    for decl in &module.declarations {
        let (kind, annotation) = match &decl.node {
            DeclKind::Fold(fold) if fold.is_accumulator() => {
                (NodeKind::AccumulatorFold, &fold.domain)
            }
            DeclKind::Fold(fold) => (NodeKind::Fold, &fold.domain),
            DeclKind::Unfold(unfold) => (NodeKind::Unfold, &unfold.domain),
            _ => continue,
        };
        let name = decl.node.name().node.clone();
        nodes.entry(name.clone()).or_insert(FoldNode {
            name,
            kind,
            domain: registry
                .resolve(&annotation.node, ParamScope::Implicit)
                .ok(),
            span: decl.span,
        });
    }
    nodes
}

/// The top-level declaration whose span contains `span`.
fn enclosing_declaration(module: &Module, span: Span) -> Option<&str> {
    module
        .declarations
        .iter()
        .find(|decl| decl.span.start <= span.start && span.end <= decl.span.end)
        .map(|decl| decl.node.name().node.as_str())
}

/// Link already-validated folds. Returns the graph of every link that
/// resolved, plus one error per link that did not.
pub fn link_folds(
    module: &Module,
    registry: &TypeRegistry,
    folds: &[&ValidatedFold],
    tracer: &mut Tracer,
) -> (FoldCallGraph, Vec<FoldError>) {
    let table = top_level(module, registry);
    let mut graph = FoldCallGraph {
        nodes: nodes(module, registry),
        edges: Vec::new(),
    };
    let mut errors = Vec::new();

    for fold in folds {
        let owner = if fold.named {
            fold.name.as_str()
        } else {
            enclosing_declaration(module, fold.span).unwrap_or(fold.name.as_str())
        };
        for link in &fold.links {
            let name = link.fold.node.as_str();
            let unresolved = |reason: String| FoldError::UnresolvedFoldReference {
                name: name.to_string(),
                reason,
                span: link.span,
            };
            let problem = match table.get(name) {
                None => Some(unresolved(format!("no top-level fold is named `{name}`"))),
                Some(TopLevel::Unfold) => Some(unresolved(format!(
                    "`{name}` is an unfold; only a fold can consume a component"
                ))),
                Some(TopLevel::Let) => Some(unresolved(format!("`{name}` is a `let`, not a fold"))),
                Some(TopLevel::Fold {
                    accumulator: true, ..
                }) => Some(unresolved(format!(
                    "`{name}` is an accumulator fold and needs a seed; link a one-argument fold instead"
                ))),
                Some(TopLevel::Fold {
                    domain: Some(domain),
                    ..
                }) => link.component.as_ref().and_then(|component| {
                    (!match_type(domain, component, &mut BTreeMap::new())).then(|| {
                        unresolved(format!(
                            "`{name}` consumes `{domain}`, but the component has type `{component}`"
                        ))
                    })
                }),
                Some(TopLevel::Fold { domain: None, .. }) => None,
            };
            match problem {
                Some(err) => {
                    tracer.record(
                        Phase::Link,
                        FoldAction::RejectName,
                        name,
                        err.to_string(),
                        Some(link.span),
                    );
                    errors.push(err);
                }
                None => {
                    tracer.record(
                        Phase::Link,
                        FoldAction::LinkEdge,
                        owner,
                        format!("-> {name}"),
                        Some(link.span),
                    );
                    graph.edges.push(FoldEdge {
                        from: owner.to_string(),
                        to: name.to_string(),
                        span: link.span,
                    });
                }
            }
        }
    }
    (graph, errors)
}

/// Check every fold of `module` and link the ones that pass.
///
/// Errors from checking the folds, unfolds and `let` bodies are returned
/// together with the unresolved references, so `Ok` means the whole module
/// checked and linked.
pub fn link(module: &Module, registry: &TypeRegistry) -> Result<FoldCallGraph, Vec<FoldError>> {
    let mut checker = Checker::new(registry, FoldConfig::default());
    let mut validated = Vec::new();
    let mut errors = Vec::new();
    for decl in &module.declarations {
        match &decl.node {
            DeclKind::Fold(fold) => match checker.check_fold_decl(fold) {
                Ok(fold) => validated.push(fold),
                Err(more) => errors.extend(more),
            },
            DeclKind::Unfold(unfold) => {
                if let Err(more) = checker.check_unfold_decl(unfold) {
                    errors.extend(more);
                }
            }
            DeclKind::Let(decl) => checker.check_expr(&decl.value, &mut errors),
            DeclKind::TypeDef(_) | DeclKind::CodataDef(_) => {}
        }
    }
    let mut folds: Vec<&ValidatedFold> = validated.iter().collect();
    folds.extend(checker.expression_folds());
    let (graph, link_errors) = link_folds(module, registry, &folds, &mut Tracer::new(false));
    errors.extend(link_errors);
    if errors.is_empty() {
        Ok(graph)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use coal_ast::FileId;
    use coal_syntax::parse_module_source;

    use super::*;
    use crate::{FoldErrorKind, register_types};

    const JSON: &str = r#"
type Json = Null | Num(int) | Array(List<Json>) | Object(List<(string, Json)>)

fold encode_json_value : Json -> string {
  | Null => "null"
  | Num(_) => "0"
  | Array(encode_json_array(@items)) => "[" ++ items ++ "]"
  | Object(encode_json_object(@fields)) => "{" ++ fields ++ "}"
}

fold encode_json_array : List<Json> -> string {
  | Nil => ""
  | Cons(encode_json_value(@v), @rest) => v ++ "," ++ rest
}

fold encode_json_object : List<(string, Json)> -> string {
  | Nil => ""
  | Cons((k, encode_json_value(@v)), @rest) => k ++ ":" ++ v ++ "," ++ rest
}
"#;

    fn link_source(source: &str) -> Result<FoldCallGraph, Vec<FoldError>> {
        let module = parse_module_source(source, FileId(0)).unwrap();
        let (registry, errors) = register_types(&module);
        assert!(errors.is_empty(), "{errors:?}");
        link(&module, &registry)
    }

    #[test]
    fn mutually_recursive_json_encoders_link() {
        let graph = link_source(JSON).unwrap();
        assert_eq!(graph.edges().len(), 4);
        assert_eq!(
            graph.callers_of("encode_json_value"),
            BTreeSet::from(["encode_json_array", "encode_json_object"])
        );
        assert_eq!(
            graph.mutually_recursive_groups(),
            vec![vec![
                "encode_json_array".to_string(),
                "encode_json_object".to_string(),
                "encode_json_value".to_string(),
            ]]
        );
    }

    #[test]
    fn forward_references_resolve() {
        let graph = link_source(JSON).unwrap();
        let targets: Vec<&str> = graph
            .edges_from("encode_json_value")
            .map(|edge| edge.to.as_str())
            .collect();
        assert_eq!(targets, vec!["encode_json_array", "encode_json_object"]);
    }

    #[test]
    fn unknown_fold_is_unresolved() {
        let source = JSON.replace("encode_json_array(@items)", "encode_items(@items)");
        let errors = link_source(&source).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), FoldErrorKind::UnresolvedFoldReference);
        assert!(errors[0].to_string().contains("no top-level fold"));
    }

    #[test]
    fn domain_mismatch_is_unresolved() {
        let source = JSON.replace(
            "Array(encode_json_array(@items))",
            "Array(encode_json_object(@items))",
        );
        let errors = link_source(&source).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("consumes `List<(string, Json)>`"));
    }

    #[test]
    fn generic_fold_links_against_an_instance() {
        let graph = link_source(
            "type Bag = Empty | Items(List<int>)\n\
             fold length : List<a> -> int { | Nil => 0 | Cons(_, @n) => n + 1 }\n\
             fold size : Bag -> int { | Empty => 0 | Items(length(@n)) => n }",
        )
        .unwrap();
        assert_eq!(graph.callers_of("length"), BTreeSet::from(["size"]));
        assert!(graph.mutually_recursive_groups().is_empty());
    }

    #[test]
    fn unfolds_cannot_be_linked() {
        let errors = link_source(
            "codata Stream<T> = { head: T, tail: Stream<T> }\n\
             type Bag = Empty | Items(List<int>)\n\
             unfold count : List<int> -> Stream<int> { xs => head = 0, @tail = xs }\n\
             fold size : Bag -> int { | Empty => 0 | Items(count(@n)) => 0 }",
        )
        .unwrap_err();
        assert!(errors[0].to_string().contains("is an unfold"));
    }

    #[test]
    fn check_errors_are_returned_with_the_graph_withheld() {
        let errors = link_source(
            "fold pred : nat -> nat { | Succ(@p) => p }\n\
             let bad = fold(Zero) { | Succ(@p) => p }",
        )
        .unwrap_err();
        let kinds: Vec<FoldErrorKind> = errors.iter().map(FoldError::kind).collect();
        assert_eq!(
            kinds,
            vec![
                FoldErrorKind::NonExhaustiveFoldPatterns,
                FoldErrorKind::NonExhaustiveFoldPatterns
            ]
        );
    }

    #[test]
    fn groups_are_ordered_callees_first() {
        let graph = link_source(
            "type Bag = Empty | Items(List<int>)\n\
             fold size : Bag -> int { | Empty => 0 | Items(length(@n)) => n }\n\
             fold length : List<int> -> int { | Nil => 0 | Cons(_, @n) => n + 1 }",
        )
        .unwrap();
        assert_eq!(
            graph.strongly_connected_groups(),
            vec![vec!["length".to_string()], vec!["size".to_string()]]
        );
    }
}
