//! Error reporting and diagnostics for Coal.
//!
//! This crate provides structured diagnostics with source location tracking.
//! Diagnostics are created by other crates (for example, `coal-syntax` and
//! `coal-fold`) and rendered here for display.

use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Diagnostic severity and categories
// ---------------------------------------------------------------------------

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Broad category for diagnostics. Used for filtering and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Syntax error.
    Syntax,
    /// Undefined variable or name.
    UndefinedName,
    /// Type mismatch: expected X, got Y.
    TypeMismatch,
    /// A name is declared more than once in a module.
    DuplicateDefinition,
    /// A constructor or field component type cannot be resolved.
    MalformedTypeDefinition,
    /// `@` used outside a recursive position.
    IllegalAtPattern,
    /// Fold clauses do not cover every constructor.
    NonExhaustive,
    /// A named fold referenced from a pattern is missing or mistyped.
    UnresolvedFoldReference,
    /// An unfold does not supply exactly one clause per codata field.
    CodataField,
    /// A binding refers to itself outside of a fold/unfold.
    IllegalSelfReference,
    /// The type a fold consumes or an unfold produces cannot be determined.
    UndeterminedDomain,
    /// Accumulator fold clause is not a `(data, seed)` pair.
    AccumulatorClause,
    /// Or-pattern alternatives bind different names.
    OrPatternBindings,
    /// Accumulator recursion result used other than as a function.
    AccumulatorThreading,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::Syntax,
        Category::UndefinedName,
        Category::TypeMismatch,
        Category::DuplicateDefinition,
        Category::MalformedTypeDefinition,
        Category::IllegalAtPattern,
        Category::NonExhaustive,
        Category::UnresolvedFoldReference,
        Category::CodataField,
        Category::IllegalSelfReference,
        Category::UndeterminedDomain,
        Category::AccumulatorClause,
        Category::OrPatternBindings,
        Category::AccumulatorThreading,
    ];

    pub fn all() -> &'static [Category] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Syntax => "syntax",
            Category::UndefinedName => "undefined_name",
            Category::TypeMismatch => "type_mismatch",
            Category::DuplicateDefinition => "duplicate_definition",
            Category::MalformedTypeDefinition => "malformed_type_definition",
            Category::IllegalAtPattern => "illegal_at_pattern",
            Category::NonExhaustive => "non_exhaustive",
            Category::UnresolvedFoldReference => "unresolved_fold_reference",
            Category::CodataField => "codata_field",
            Category::IllegalSelfReference => "illegal_self_reference",
            Category::UndeterminedDomain => "undetermined_domain",
            Category::AccumulatorClause => "accumulator_clause",
            Category::OrPatternBindings => "or_pattern_bindings",
            Category::AccumulatorThreading => "accumulator_threading",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::Syntax => "E0001",
            Category::UndefinedName => "E0002",
            Category::TypeMismatch => "E0003",
            Category::DuplicateDefinition => "E0004",
            Category::MalformedTypeDefinition => "E0101",
            Category::IllegalAtPattern => "E0102",
            Category::NonExhaustive => "E0103",
            Category::UnresolvedFoldReference => "E0104",
            Category::CodataField => "E0105",
            Category::IllegalSelfReference => "E0106",
            Category::UndeterminedDomain => "E0107",
            Category::AccumulatorClause => "E0108",
            Category::OrPatternBindings => "E0109",
            Category::AccumulatorThreading => "W0101",
        }
    }

    pub fn example_fix(self) -> &'static str {
        match self {
            Category::Syntax => "Fix parser-reported syntax near the highlighted span.",
            Category::UndefinedName => {
                "Define the missing name before this point or fix the spelling."
            }
            Category::TypeMismatch => "Adjust the expression to produce the expected type.",
            Category::DuplicateDefinition => "Rename or remove one of the declarations.",
            Category::MalformedTypeDefinition => {
                "Declare the referenced type or fix its name and arity."
            }
            Category::IllegalAtPattern => {
                "Move `@` under a constructor, or route it through a named fold: `Array(encode(@xs))`."
            }
            Category::NonExhaustive => "Add the missing constructor clauses or a wildcard.",
            Category::UnresolvedFoldReference => {
                "Declare a top-level fold whose domain matches the wrapped component type."
            }
            Category::CodataField => "Provide exactly one clause for every field of the codata type.",
            Category::IllegalSelfReference => {
                "Express the recursion as a fold over data or an unfold producing codata."
            }
            Category::UndeterminedDomain => "Ascribe the type: `fold(e : T) { ... }`.",
            Category::AccumulatorClause => "Write each clause as `| (pattern, seed) => body`.",
            Category::OrPatternBindings => "Bind the same names in every alternative.",
            Category::AccumulatorThreading => {
                "Apply the recursive result to the next seed: `rest(acc + x)`."
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Source locations (independent of coal-ast's Span)
// ---------------------------------------------------------------------------

/// A source location for diagnostics.
///
/// Uses byte offsets. Callers convert from `coal-ast` spans to this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

impl SourceLocation {
    /// Resolve the 1-based line and column of `start` within `source`.
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let offset = (self.start as usize).min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let col = before.rfind('\n').map_or(offset, |nl| offset - nl - 1) + 1;
        (line, col)
    }
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic message.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// Stable diagnostic code (e.g. E0102).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub severity: Severity,
    pub category: Category,
    /// Primary message: what went wrong.
    pub message: String,
    /// Where it went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Additional labeled spans (e.g., "fold declared here").
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<DiagLabel>,
    /// Suggested fix, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

/// A labeled source span within a diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct DiagLabel {
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity: Severity::Error,
            category,
            message: message.into(),
            location: None,
            labels: Vec::new(),
            help: None,
        }
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity: Severity::Warning,
            category,
            message: message.into(),
            location: None,
            labels: Vec::new(),
            help: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_label(mut self, location: SourceLocation, message: impl Into<String>) -> Self {
        self.labels.push(DiagLabel {
            location,
            message: message.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{prefix}[{code}]: {}", self.message)?;
        } else {
            write!(f, "{prefix}: {}", self.message)?;
        }
        for label in &self.labels {
            write!(
                f,
                "\n  note: {} (bytes {}..{})",
                label.message, label.location.start, label.location.end
            )?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

/// Whether any diagnostic in the slice is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
