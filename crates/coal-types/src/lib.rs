//! Type representations for Coal.
//!
//! This crate defines the semantic types consulted by the fold/unfold
//! passes, the registry of declared data and codata types, and the
//! [`TypeResolver`] service that turns syntactic annotations (which live in
//! `coal-ast`) into [`Type`]s.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use coal_ast::{CodataDef, Span, Spanned, TypeAnnotation, TypeDef};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A resolved Coal type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Int,
    Float,
    String,
    Bool,
    Unit,
    /// A type parameter, either declared (`T` in `List<T>`) or implicit in a
    /// fold signature (`a` in `List<a> -> int`).
    Param(String),
    /// A declared data or codata type applied to arguments: `List<int>`, `nat`.
    Named { name: String, args: Vec<Type> },
    Tuple(Vec<Type>),
    Function(Vec<Type>, Box<Type>),
}

impl Type {
    pub fn named(name: impl Into<String>, args: Vec<Type>) -> Self {
        Type::Named {
            name: name.into(),
            args,
        }
    }

    /// The head type constructor name, for named types.
    pub fn head_name(&self) -> Option<&str> {
        match self {
            Type::Named { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    /// Replace type parameters according to `subst`. Unmapped parameters stay.
    pub fn substitute(&self, subst: &BTreeMap<String, Type>) -> Type {
        match self {
            Type::Param(name) => subst.get(name).cloned().unwrap_or_else(|| self.clone()),
            Type::Named { name, args } => Type::Named {
                name: name.clone(),
                args: args.iter().map(|a| a.substitute(subst)).collect(),
            },
            Type::Tuple(items) => Type::Tuple(items.iter().map(|t| t.substitute(subst)).collect()),
            Type::Function(params, ret) => Type::Function(
                params.iter().map(|t| t.substitute(subst)).collect(),
                Box::new(ret.substitute(subst)),
            ),
            Type::Int | Type::Float | Type::String | Type::Bool | Type::Unit => self.clone(),
        }
    }

    /// Whether the named type `name` occurs anywhere inside this type.
    pub fn mentions(&self, name: &str) -> bool {
        match self {
            Type::Named { name: n, args } => n == name || args.iter().any(|a| a.mentions(name)),
            Type::Tuple(items) => items.iter().any(|t| t.mentions(name)),
            Type::Function(params, ret) => {
                params.iter().any(|t| t.mentions(name)) || ret.mentions(name)
            }
            _ => false,
        }
    }

    /// Collect the parameter names occurring in this type.
    pub fn params(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_params(&mut out);
        out
    }

    fn collect_params(&self, out: &mut BTreeSet<String>) {
        match self {
            Type::Param(name) => {
                out.insert(name.clone());
            }
            Type::Named { args, .. } => args.iter().for_each(|a| a.collect_params(out)),
            Type::Tuple(items) => items.iter().for_each(|t| t.collect_params(out)),
            Type::Function(params, ret) => {
                params.iter().for_each(|t| t.collect_params(out));
                ret.collect_params(out);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Bool => write!(f, "bool"),
            Type::Unit => write!(f, "unit"),
            Type::Param(name) => write!(f, "{name}"),
            Type::Named { name, args } => {
                write!(f, "{name}")?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    write_types(f, args)?;
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::Tuple(items) => {
                write!(f, "(")?;
                write_types(f, items)?;
                write!(f, ")")
            }
            Type::Function(params, ret) => {
                write!(f, "(")?;
                write_types(f, params)?;
                write!(f, ") -> {ret}")
            }
        }
    }
}

fn write_types(f: &mut fmt::Formatter<'_>, types: &[Type]) -> fmt::Result {
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{ty}")?;
    }
    Ok(())
}

/// One-way matching: can `pattern` be instantiated to `target`?
///
/// Parameters in `pattern` bind (consistently) in `subst`. Parameters in
/// `target` are rigid and only match an identical parameter or a pattern
/// parameter.
pub fn match_type(pattern: &Type, target: &Type, subst: &mut BTreeMap<String, Type>) -> bool {
    match (pattern, target) {
        (Type::Param(name), _) => match subst.get(name) {
            Some(bound) => bound == target,
            None => {
                subst.insert(name.clone(), target.clone());
                true
            }
        },
        (
            Type::Named { name: a, args: a_args },
            Type::Named { name: b, args: b_args },
        ) => {
            a == b
                && a_args.len() == b_args.len()
                && a_args
                    .iter()
                    .zip(b_args)
                    .all(|(p, t)| match_type(p, t, subst))
        }
        (Type::Tuple(a), Type::Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(p, t)| match_type(p, t, subst))
        }
        (Type::Function(a_params, a_ret), Type::Function(b_params, b_ret)) => {
            a_params.len() == b_params.len()
                && a_params
                    .iter()
                    .zip(b_params)
                    .all(|(p, t)| match_type(p, t, subst))
                && match_type(a_ret, b_ret, subst)
        }
        _ => pattern == target,
    }
}

// ---------------------------------------------------------------------------
// Type definitions
// ---------------------------------------------------------------------------

/// A data constructor: a labeled sequence of component type references.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub name: String,
    pub components: Vec<Spanned<TypeAnnotation>>,
    pub span: Span,
}

/// A codata field (observation).
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub annotation: Spanned<TypeAnnotation>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionKind {
    /// Finite data, introduced by `type`.
    Data(Vec<Variant>),
    /// Possibly infinite codata, introduced by `codata`.
    Codata(Vec<Field>),
}

/// A declared data or codata type. Immutable once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub name: String,
    pub params: Vec<String>,
    pub kind: DefinitionKind,
    pub span: Span,
    pub builtin: bool,
}

impl TypeDefinition {
    /// The type applied to its own parameters: `List<T>` for `List`.
    pub fn self_type(&self) -> Type {
        Type::named(
            self.name.clone(),
            self.params.iter().cloned().map(Type::Param).collect(),
        )
    }

    pub fn is_codata(&self) -> bool {
        matches!(self.kind, DefinitionKind::Codata(_))
    }

    pub fn variants(&self) -> &[Variant] {
        match &self.kind {
            DefinitionKind::Data(variants) => variants,
            DefinitionKind::Codata(_) => &[],
        }
    }

    pub fn fields(&self) -> &[Field] {
        match &self.kind {
            DefinitionKind::Codata(fields) => fields,
            DefinitionKind::Data(_) => &[],
        }
    }

    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants().iter().find(|v| v.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Map each declared parameter to the corresponding argument of `ty`.
    ///
    /// Returns an empty map when `ty` is not an application of this type.
    pub fn instantiate(&self, ty: &Type) -> BTreeMap<String, Type> {
        match ty {
            Type::Named { name, args } if *name == self.name && args.len() == self.params.len() => {
                self.params.iter().cloned().zip(args.iter().cloned()).collect()
            }
            _ => BTreeMap::new(),
        }
    }

    pub fn from_type_def(def: &TypeDef) -> Self {
        Self {
            name: def.name.node.clone(),
            params: def.params.iter().map(|p| p.node.clone()).collect(),
            kind: DefinitionKind::Data(
                def.variants
                    .iter()
                    .map(|v| Variant {
                        name: v.name.node.clone(),
                        components: v.fields.clone(),
                        span: v.name.span,
                    })
                    .collect(),
            ),
            span: def.name.span,
            builtin: false,
        }
    }

    pub fn from_codata_def(def: &CodataDef) -> Self {
        Self {
            name: def.name.node.clone(),
            params: def.params.iter().map(|p| p.node.clone()).collect(),
            kind: DefinitionKind::Codata(
                def.fields
                    .iter()
                    .map(|f| Field {
                        name: f.name.node.clone(),
                        annotation: f.annotation.clone(),
                        span: f.name.span,
                    })
                    .collect(),
            ),
            span: def.name.span,
            builtin: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown type `{name}`")]
    UnknownType { name: String },
    #[error("type `{name}` expects {expected} type argument(s), found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("type `{name}` is already defined")]
    DuplicateType { name: String },
    #[error("builtin type `{name}` cannot be redefined")]
    BuiltinRedefinition { name: String },
    #[error("constructor `{name}` is already defined by type `{existing}`")]
    DuplicateConstructor { name: String, existing: String },
}

/// Which bare lowercase names may be treated as type parameters.
#[derive(Debug, Clone, Copy)]
pub enum ParamScope<'a> {
    /// Only the listed names (type definitions).
    Declared(&'a [String]),
    /// Any unknown lowercase name (fold/unfold signatures).
    Implicit,
}

fn primitive(name: &str) -> Option<Type> {
    match name {
        "int" => Some(Type::Int),
        "float" => Some(Type::Float),
        "string" => Some(Type::String),
        "bool" => Some(Type::Bool),
        "unit" => Some(Type::Unit),
        _ => None,
    }
}

/// Type-resolution service consulted by the locator, checker and linker.
pub trait TypeResolver {
    fn lookup(&self, name: &str) -> Option<&TypeDefinition>;

    /// Resolve a syntactic annotation to a semantic type.
    fn resolve(&self, annotation: &TypeAnnotation, scope: ParamScope<'_>) -> Result<Type, ResolveError> {
        match annotation {
            TypeAnnotation::Named(name) => {
                if let ParamScope::Declared(params) = scope
                    && params.iter().any(|p| p == name)
                {
                    return Ok(Type::Param(name.clone()));
                }
                if let Some(prim) = primitive(name) {
                    return Ok(prim);
                }
                match self.lookup(name) {
                    Some(def) if def.params.is_empty() => Ok(Type::named(name.clone(), vec![])),
                    Some(def) => Err(ResolveError::ArityMismatch {
                        name: name.clone(),
                        expected: def.params.len(),
                        found: 0,
                    }),
                    None if matches!(scope, ParamScope::Implicit)
                        && name.starts_with(|c: char| c.is_ascii_lowercase()) =>
                    {
                        Ok(Type::Param(name.clone()))
                    }
                    None => Err(ResolveError::UnknownType { name: name.clone() }),
                }
            }
            TypeAnnotation::Applied(name, args) => {
                let def = self
                    .lookup(name)
                    .ok_or_else(|| ResolveError::UnknownType { name: name.clone() })?;
                if def.params.len() != args.len() {
                    return Err(ResolveError::ArityMismatch {
                        name: name.clone(),
                        expected: def.params.len(),
                        found: args.len(),
                    });
                }
                let args = args
                    .iter()
                    .map(|a| self.resolve(a, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Type::named(name.clone(), args))
            }
            TypeAnnotation::Tuple(items) => Ok(Type::Tuple(
                items
                    .iter()
                    .map(|t| self.resolve(t, scope))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            TypeAnnotation::Function(params, ret) => Ok(Type::Function(
                params
                    .iter()
                    .map(|t| self.resolve(t, scope))
                    .collect::<Result<Vec<_>, _>>()?,
                Box::new(self.resolve(ret, scope)?),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// All data and codata types visible to one compilation unit.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeDefinition>,
    constructors: BTreeMap<String, String>,
    fields: BTreeMap<String, BTreeSet<String>>,
}

impl TypeResolver for TypeRegistry {
    fn lookup(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }
}

fn named(name: &str) -> Spanned<TypeAnnotation> {
    Spanned::new(TypeAnnotation::Named(name.to_string()), Span::synthetic())
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the builtin `nat` and `List<T>` data types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins = [
            TypeDefinition {
                name: "nat".into(),
                params: vec![],
                kind: DefinitionKind::Data(vec![
                    Variant {
                        name: "Zero".into(),
                        components: vec![],
                        span: Span::synthetic(),
                    },
                    Variant {
                        name: "Succ".into(),
                        components: vec![named("nat")],
                        span: Span::synthetic(),
                    },
                ]),
                span: Span::synthetic(),
                builtin: true,
            },
            TypeDefinition {
                name: "List".into(),
                params: vec!["T".into()],
                kind: DefinitionKind::Data(vec![
                    Variant {
                        name: "Nil".into(),
                        components: vec![],
                        span: Span::synthetic(),
                    },
                    Variant {
                        name: "Cons".into(),
                        components: vec![
                            named("T"),
                            Spanned::new(
                                TypeAnnotation::Applied(
                                    "List".into(),
                                    vec![TypeAnnotation::Named("T".into())],
                                ),
                                Span::synthetic(),
                            ),
                        ],
                        span: Span::synthetic(),
                    },
                ]),
                span: Span::synthetic(),
                builtin: true,
            },
        ];
        for def in builtins {
            registry.insert(def);
        }
        registry
    }

    /// Register a new type definition.
    pub fn register(&mut self, def: TypeDefinition) -> Result<(), RegistryError> {
        if let Some(existing) = self.types.get(&def.name) {
            return Err(if existing.builtin {
                RegistryError::BuiltinRedefinition { name: def.name }
            } else {
                RegistryError::DuplicateType { name: def.name }
            });
        }
        for variant in def.variants() {
            if let Some(existing) = self.constructors.get(&variant.name) {
                return Err(RegistryError::DuplicateConstructor {
                    name: variant.name.clone(),
                    existing: existing.clone(),
                });
            }
        }
        self.insert(def);
        Ok(())
    }

    fn insert(&mut self, def: TypeDefinition) {
        for variant in def.variants() {
            self.constructors
                .insert(variant.name.clone(), def.name.clone());
        }
        for field in def.fields() {
            self.fields
                .entry(field.name.clone())
                .or_default()
                .insert(def.name.clone());
        }
        self.types.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }

    /// The data type declaring constructor `ctor`.
    pub fn type_of_constructor(&self, ctor: &str) -> Option<&TypeDefinition> {
        self.constructors.get(ctor).and_then(|t| self.types.get(t))
    }

    /// The data type and variant for constructor `ctor`.
    pub fn constructor(&self, ctor: &str) -> Option<(&TypeDefinition, &Variant)> {
        let def = self.type_of_constructor(ctor)?;
        Some((def, def.variant(ctor)?))
    }

    /// The unique codata type whose field set is exactly `names`.
    pub fn codata_with_fields<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Option<&TypeDefinition> {
        let wanted: BTreeSet<&str> = names.into_iter().collect();
        let mut candidates = self.types.values().filter(|def| {
            def.is_codata() && def.fields().iter().map(|f| f.name.as_str()).collect::<BTreeSet<_>>() == wanted
        });
        let first = candidates.next()?;
        candidates.next().is_none().then_some(first)
    }

    /// Codata types declaring a field called `field`.
    pub fn codata_with_field(&self, field: &str) -> impl Iterator<Item = &TypeDefinition> {
        self.fields
            .get(field)
            .into_iter()
            .flatten()
            .filter_map(|t| self.types.get(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn list(t: Type) -> Type {
        Type::named("List", vec![t])
    }

    #[test]
    fn builtins_are_registered() {
        let registry = TypeRegistry::with_builtins();
        let nat = registry.get("nat").unwrap();
        assert_eq!(nat.variants().len(), 2);
        assert_eq!(registry.type_of_constructor("Cons").unwrap().name, "List");
        assert_eq!(registry.get("List").unwrap().self_type().to_string(), "List<T>");
    }

    #[test]
    fn builtins_cannot_be_redefined() {
        let mut registry = TypeRegistry::with_builtins();
        let err = registry
            .register(TypeDefinition {
                name: "nat".into(),
                params: vec![],
                kind: DefinitionKind::Data(vec![]),
                span: Span::synthetic(),
                builtin: false,
            })
            .unwrap_err();
        assert_eq!(err, RegistryError::BuiltinRedefinition { name: "nat".into() });
    }

    #[test]
    fn duplicate_constructor_rejected() {
        let mut registry = TypeRegistry::with_builtins();
        let err = registry
            .register(TypeDefinition {
                name: "Peano".into(),
                params: vec![],
                kind: DefinitionKind::Data(vec![Variant {
                    name: "Zero".into(),
                    components: vec![],
                    span: Span::synthetic(),
                }]),
                span: Span::synthetic(),
                builtin: false,
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateConstructor { existing, .. } if existing == "nat"));
    }

    #[test]
    fn resolve_reports_unknown_and_arity() {
        let registry = TypeRegistry::with_builtins();
        let unknown = registry.resolve(
            &TypeAnnotation::Named("Widget".into()),
            ParamScope::Declared(&[]),
        );
        assert_eq!(unknown, Err(ResolveError::UnknownType { name: "Widget".into() }));

        let arity = registry.resolve(&TypeAnnotation::Named("List".into()), ParamScope::Implicit);
        assert!(matches!(arity, Err(ResolveError::ArityMismatch { expected: 1, found: 0, .. })));
    }

    #[test]
    fn implicit_params_in_signatures() {
        let registry = TypeRegistry::with_builtins();
        let ann = TypeAnnotation::Applied("List".into(), vec![TypeAnnotation::Named("a".into())]);
        assert_eq!(
            registry.resolve(&ann, ParamScope::Implicit),
            Ok(list(Type::Param("a".into())))
        );
        assert!(registry.resolve(&ann, ParamScope::Declared(&[])).is_err());
    }

    #[test]
    fn one_way_matching_binds_pattern_params() {
        let mut subst = BTreeMap::new();
        let json = Type::named("JsonValue", vec![]);
        assert!(match_type(&list(Type::Param("a".into())), &list(json.clone()), &mut subst));
        assert_eq!(subst.get("a"), Some(&json));

        let mut subst = BTreeMap::new();
        assert!(!match_type(&list(Type::Int), &list(Type::Param("T".into())), &mut subst));
    }

    #[test]
    fn inconsistent_param_binding_fails() {
        let mut subst = BTreeMap::new();
        let pattern = Type::Tuple(vec![Type::Param("a".into()), Type::Param("a".into())]);
        assert!(!match_type(&pattern, &Type::Tuple(vec![Type::Int, Type::Bool]), &mut subst));
    }

    #[test]
    fn instantiate_maps_params_to_args() {
        let registry = TypeRegistry::with_builtins();
        let def = registry.get("List").unwrap();
        let subst = def.instantiate(&list(Type::Int));
        let cons_tail = Type::named("List", vec![Type::Param("T".into())]).substitute(&subst);
        assert_eq!(cons_tail, list(Type::Int));
    }

    fn arb_type() -> impl Strategy<Value = Type> {
        let leaf = prop_oneof![
            Just(Type::Int),
            Just(Type::Bool),
            Just(Type::String),
            Just(Type::named("nat", vec![])),
        ];
        leaf.prop_recursive(3, 16, 3, |inner| {
            prop_oneof![
                inner.clone().prop_map(list),
                prop::collection::vec(inner.clone(), 2..4).prop_map(Type::Tuple),
                (prop::collection::vec(inner.clone(), 1..3), inner)
                    .prop_map(|(ps, r)| Type::Function(ps, Box::new(r))),
            ]
        })
    }

    proptest! {
        #[test]
        fn ground_types_match_themselves(ty in arb_type()) {
            let mut subst = BTreeMap::new();
            prop_assert!(match_type(&ty, &ty, &mut subst));
            prop_assert!(subst.is_empty());
        }

        #[test]
        fn substitution_without_params_is_identity(ty in arb_type()) {
            let mut subst = BTreeMap::new();
            subst.insert("T".to_string(), Type::Unit);
            prop_assert_eq!(ty.substitute(&subst), ty);
        }
    }
}
