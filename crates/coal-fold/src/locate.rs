//! Recursive-position locator.
//!
//! For every constructor component of a data type, and every field of a
//! codata type, decide whether it is the type itself ([`PositionKind::SelfRef`]),
//! mentions the type under another type constructor
//! ([`PositionKind::SelfWrapped`]), or does neither ([`PositionKind::Other`]).
//! Results are memoised per type name.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use coal_types::{DefinitionKind, ParamScope, Type, TypeDefinition, TypeResolver};
use serde::Serialize;

use crate::error::FoldError;
use crate::trace::{FoldAction, Phase, Tracer};

/// Container name used for tuple types.
pub const TUPLE_CONTAINER: &str = "(,)";
/// Container name used for function types.
pub const FUNCTION_CONTAINER: &str = "->";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PositionKind {
    /// Exactly the enclosing type applied to its own parameters.
    SelfRef,
    /// The enclosing type nested inside `container`.
    SelfWrapped { container: String },
    Other,
}

/// One classified component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub kind: PositionKind,
    /// The component type, in terms of the definition's own parameters.
    pub ty: Type,
}

/// Classification of every component of one type, keyed by
/// `(constructor or field, index)`. Codata fields use index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecursiveSlots {
    type_name: String,
    slots: BTreeMap<(String, usize), Slot>,
}

impl RecursiveSlots {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, label: &str, index: usize) -> Option<&PositionKind> {
        self.slot(label, index).map(|slot| &slot.kind)
    }

    pub fn slot(&self, label: &str, index: usize) -> Option<&Slot> {
        self.slots.get(&(label.to_string(), index))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize, &Slot)> {
        self.slots
            .iter()
            .map(|((label, index), slot)| (label.as_str(), *index, slot))
    }

    /// Whether any component refers back to the type.
    pub fn is_recursive(&self) -> bool {
        self.slots.values().any(|slot| slot.kind != PositionKind::Other)
    }
}

/// Classify every component of `def`, resolving component types through `resolver`.
pub fn locate<R: TypeResolver + ?Sized>(
    def: &TypeDefinition,
    resolver: &R,
) -> Result<RecursiveSlots, FoldError> {
    let mut slots = BTreeMap::new();
    let scope = ParamScope::Declared(&def.params);
    let malformed = |reason: String, span| FoldError::MalformedTypeDefinition {
        type_name: def.name.clone(),
        reason,
        span,
    };

    match &def.kind {
        DefinitionKind::Data(variants) => {
            for variant in variants {
                for (index, component) in variant.components.iter().enumerate() {
                    let ty = resolver.resolve(&component.node, scope).map_err(|err| {
                        malformed(
                            format!("component {} of `{}`: {err}", index + 1, variant.name),
                            component.span,
                        )
                    })?;
                    let kind = classify(&ty, def);
                    slots.insert((variant.name.clone(), index), Slot { kind, ty });
                }
            }
        }
        DefinitionKind::Codata(fields) => {
            let mut seen = BTreeSet::new();
            for field in fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(malformed(
                        format!("field `{}` is declared more than once", field.name),
                        field.span,
                    ));
                }
                let ty = resolver
                    .resolve(&field.annotation.node, scope)
                    .map_err(|err| {
                        malformed(format!("field `{}`: {err}", field.name), field.annotation.span)
                    })?;
                let kind = classify(&ty, def);
                slots.insert((field.name.clone(), 0), Slot { kind, ty });
            }
        }
    }

    Ok(RecursiveSlots {
        type_name: def.name.clone(),
        slots,
    })
}

fn classify(ty: &Type, def: &TypeDefinition) -> PositionKind {
    if *ty == def.self_type() {
        return PositionKind::SelfRef;
    }
    match ty {
        // Non-uniform recursion: only a named fold with a matching domain
        // can recurse into it.
        Type::Named { name, .. } if *name == def.name => PositionKind::SelfWrapped {
            container: def.name.clone(),
        },
        Type::Named { name, args } if args.iter().any(|a| a.mentions(&def.name)) => {
            PositionKind::SelfWrapped {
                container: name.clone(),
            }
        }
        Type::Tuple(items) if items.iter().any(|t| t.mentions(&def.name)) => {
            PositionKind::SelfWrapped {
                container: TUPLE_CONTAINER.to_string(),
            }
        }
        Type::Function(..) if ty.mentions(&def.name) => PositionKind::SelfWrapped {
            container: FUNCTION_CONTAINER.to_string(),
        },
        _ => PositionKind::Other,
    }
}

/// Per-compilation-unit locator with a read-after-write cache.
pub struct Locator<'r, R: TypeResolver + ?Sized> {
    resolver: &'r R,
    cache: BTreeMap<String, Arc<RecursiveSlots>>,
}

impl<'r, R: TypeResolver + ?Sized> Locator<'r, R> {
    pub fn new(resolver: &'r R) -> Self {
        Self {
            resolver,
            cache: BTreeMap::new(),
        }
    }

    pub fn resolver(&self) -> &'r R {
        self.resolver
    }

    /// Slots of `def`, computed on first request.
    pub fn slots(
        &mut self,
        def: &TypeDefinition,
        tracer: &mut Tracer,
    ) -> Result<Arc<RecursiveSlots>, FoldError> {
        if let Some(cached) = self.cache.get(&def.name) {
            tracer.record(Phase::Locate, FoldAction::CacheHit, &def.name, "", None);
            return Ok(Arc::clone(cached));
        }
        let slots = Arc::new(locate(def, self.resolver)?);
        if tracer.is_enabled() {
            for (label, index, slot) in slots.iter() {
                tracer.record(
                    Phase::Locate,
                    FoldAction::ClassifySlot,
                    format!("{}.{label}[{index}]", def.name),
                    format!("{}: {:?}", slot.ty, slot.kind),
                    Some(def.span),
                );
            }
        }
        self.cache.insert(def.name.clone(), Arc::clone(&slots));
        Ok(slots)
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Insert-once slot cache shared between concurrently compiled modules,
/// keyed by fully-qualified type name.
#[derive(Debug, Default)]
pub struct SharedLocatorCache {
    inner: RwLock<BTreeMap<String, Arc<RecursiveSlots>>>,
}

impl SharedLocatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, qualified_name: &str) -> Option<Arc<RecursiveSlots>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(qualified_name)
            .cloned()
    }

    /// Return the cached slots for `qualified_name`, locating `def` if absent.
    ///
    /// When two threads race, the first insert wins and both observe it.
    pub fn get_or_locate<R: TypeResolver + ?Sized>(
        &self,
        qualified_name: &str,
        def: &TypeDefinition,
        resolver: &R,
    ) -> Result<Arc<RecursiveSlots>, FoldError> {
        if let Some(slots) = self.get(qualified_name) {
            return Ok(slots);
        }
        let located = Arc::new(locate(def, resolver)?);
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(
            map.entry(qualified_name.to_string()).or_insert(located),
        ))
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use coal_ast::FileId;
    use coal_syntax::parse_module_source;
    use coal_types::TypeRegistry;

    use super::*;
    use crate::register_types;

    fn registry(source: &str) -> TypeRegistry {
        let module = parse_module_source(source, FileId(0)).unwrap();
        let (registry, errors) = register_types(&module);
        assert!(errors.is_empty(), "{errors:?}");
        registry
    }

    fn slots_of(registry: &TypeRegistry, name: &str) -> RecursiveSlots {
        locate(registry.get(name).unwrap(), registry).unwrap()
    }

    #[test]
    fn nat_successor_is_self_ref() {
        let registry = TypeRegistry::with_builtins();
        let slots = slots_of(&registry, "nat");
        assert_eq!(slots.get("Succ", 0), Some(&PositionKind::SelfRef));
        assert_eq!(slots.get("Zero", 0), None);
    }

    #[test]
    fn list_tail_is_self_ref_and_head_other() {
        let registry = TypeRegistry::with_builtins();
        let slots = slots_of(&registry, "List");
        assert_eq!(slots.get("Cons", 0), Some(&PositionKind::Other));
        assert_eq!(slots.get("Cons", 1), Some(&PositionKind::SelfRef));
    }

    #[test]
    fn json_array_is_wrapped_in_list() {
        let registry = registry(
            "type Json = Null | Num(int) | Array(List<Json>) | Object(List<(string, Json)>)",
        );
        let slots = slots_of(&registry, "Json");
        assert_eq!(slots.get("Num", 0), Some(&PositionKind::Other));
        assert_eq!(
            slots.get("Array", 0),
            Some(&PositionKind::SelfWrapped {
                container: "List".into()
            })
        );
        assert_eq!(
            slots.get("Object", 0),
            Some(&PositionKind::SelfWrapped {
                container: "List".into()
            })
        );
    }

    #[test]
    fn tuples_and_functions_are_containers() {
        let registry = registry("type Tree = Leaf | Node((Tree, Tree)) | Lazy((unit) -> Tree)");
        let slots = slots_of(&registry, "Tree");
        assert_eq!(
            slots.get("Node", 0),
            Some(&PositionKind::SelfWrapped {
                container: TUPLE_CONTAINER.into()
            })
        );
        assert_eq!(
            slots.get("Lazy", 0),
            Some(&PositionKind::SelfWrapped {
                container: FUNCTION_CONTAINER.into()
            })
        );
    }

    #[test]
    fn non_uniform_recursion_is_wrapped_in_itself() {
        let registry = registry("type Nest<a> = Flat | Nested(a, Nest<(a, a)>)");
        let slots = slots_of(&registry, "Nest");
        assert_eq!(
            slots.get("Nested", 1),
            Some(&PositionKind::SelfWrapped {
                container: "Nest".into()
            })
        );
    }

    #[test]
    fn codata_fields_are_classified() {
        let registry = registry("codata Stream<T> = { head: T, tail: Stream<T> }");
        let slots = slots_of(&registry, "Stream");
        assert_eq!(slots.get("head", 0), Some(&PositionKind::Other));
        assert_eq!(slots.get("tail", 0), Some(&PositionKind::SelfRef));
    }

    #[test]
    fn unknown_component_type_is_malformed() {
        let registry = registry("type Bad = Wrap(Missing)");
        let err = locate(registry.get("Bad").unwrap(), &registry).unwrap_err();
        assert_eq!(err.kind(), crate::FoldErrorKind::MalformedTypeDefinition);
        assert!(err.to_string().contains("Missing"), "{err}");
    }

    #[test]
    fn wrong_arity_is_malformed() {
        let registry = registry("type Bad = Wrap(List<int, int>)");
        let err = locate(registry.get("Bad").unwrap(), &registry).unwrap_err();
        assert_eq!(err.kind(), crate::FoldErrorKind::MalformedTypeDefinition);
    }

    #[test]
    fn locator_caches_per_type() {
        let registry = TypeRegistry::with_builtins();
        let mut locator = Locator::new(&registry);
        let mut tracer = Tracer::new(true);
        let def = registry.get("List").unwrap();
        let first = locator.slots(def, &mut tracer).unwrap();
        let second = locator.slots(def, &mut tracer).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(locator.cached(), 1);
        assert!(
            tracer
                .steps()
                .iter()
                .any(|s| s.action == FoldAction::CacheHit)
        );
    }

    #[test]
    fn shared_cache_inserts_once_across_threads() {
        let registry = TypeRegistry::with_builtins();
        let cache = SharedLocatorCache::new();
        let def = registry.get("List").unwrap();
        let (cache_ref, registry_ref) = (&cache, &registry);
        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(move || cache_ref.get_or_locate("prelude.List", def, registry_ref))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap().unwrap())
                .collect()
        });
        assert_eq!(cache.len(), 1);
        let winner = cache.get("prelude.List").unwrap();
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &winner)));
    }
}
