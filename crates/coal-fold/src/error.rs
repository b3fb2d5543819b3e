//! Structured errors and warnings of the fold/unfold pass.

use std::fmt;

use coal_ast::Span;
use coal_diag::{Category, Diagnostic, SourceLocation};

/// Convert an AST span into a diagnostic location.
pub fn location(span: Span) -> SourceLocation {
    SourceLocation {
        file_id: span.file.0,
        start: span.start,
        end: span.end,
    }
}

/// Error taxonomy, independent of the data carried by each error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FoldErrorKind {
    MalformedTypeDefinition,
    IllegalAtPatternPlacement,
    NonExhaustiveFoldPatterns,
    UnresolvedFoldReference,
    MissingOrDuplicateCodataField,
    IllegalSelfReference,
    UndeterminedFoldDomain,
    SeedTypeMismatch,
    MalformedAccumulatorClause,
    InconsistentOrBindings,
    PatternTypeMismatch,
    ConstructorArity,
    UnboundName,
    DuplicateDefinition,
}

/// What is wrong with an unfold's field clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldProblem {
    Missing,
    Duplicate,
    Unknown,
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldProblem::Missing => write!(f, "missing"),
            FieldProblem::Duplicate => write!(f, "defined more than once"),
            FieldProblem::Unknown => write!(f, "not declared"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FoldError {
    #[error("malformed type definition `{type_name}`: {reason}")]
    MalformedTypeDefinition {
        type_name: String,
        reason: String,
        span: Span,
    },
    #[error("illegal `@` pattern `{pattern}`: {reason}")]
    IllegalAtPatternPlacement {
        pattern: String,
        reason: String,
        span: Span,
    },
    #[error("clauses of `{fold}` are not exhaustive: missing {}", .missing.join(", "))]
    NonExhaustiveFoldPatterns {
        fold: String,
        missing: Vec<String>,
        span: Span,
    },
    #[error("cannot link `{name}`: {reason}")]
    UnresolvedFoldReference {
        name: String,
        reason: String,
        span: Span,
    },
    #[error("field `{field}` of `{codata}` is {problem}")]
    MissingOrDuplicateCodataField {
        codata: String,
        field: String,
        problem: FieldProblem,
        span: Span,
    },
    #[error("`{name}` refers to itself; recursion is only available through `fold` and `unfold`")]
    IllegalSelfReference { name: String, span: Span },
    #[error("cannot determine the domain of `{subject}`: {reason}")]
    UndeterminedFoldDomain {
        subject: String,
        reason: String,
        span: Span,
    },
    #[error("seed of `@{field}` has type `{found}`, but the generator takes `{expected}`")]
    SeedTypeMismatch {
        field: String,
        expected: String,
        found: String,
        span: Span,
    },
    #[error("malformed accumulator clause: {reason}")]
    MalformedAccumulatorClause { reason: String, span: Span },
    #[error("alternatives of an or-pattern bind different names or bind them differently: {{{}}} vs {{{}}}", .expected.join(", "), .found.join(", "))]
    InconsistentOrBindings {
        expected: Vec<String>,
        found: Vec<String>,
        span: Span,
    },
    #[error("pattern `{pattern}` cannot match a value of type `{expected}`")]
    PatternTypeMismatch {
        pattern: String,
        expected: String,
        span: Span,
    },
    #[error("constructor `{constructor}` takes {expected} argument(s), but the pattern has {found}")]
    ConstructorArity {
        constructor: String,
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("unknown {what} `{name}`")]
    UnboundName {
        what: &'static str,
        name: String,
        defined_later: bool,
        span: Span,
    },
    #[error("`{name}` is defined more than once")]
    DuplicateDefinition {
        name: String,
        span: Span,
        previous: Span,
    },
}

impl FoldError {
    pub fn kind(&self) -> FoldErrorKind {
        match self {
            FoldError::MalformedTypeDefinition { .. } => FoldErrorKind::MalformedTypeDefinition,
            FoldError::IllegalAtPatternPlacement { .. } => FoldErrorKind::IllegalAtPatternPlacement,
            FoldError::NonExhaustiveFoldPatterns { .. } => FoldErrorKind::NonExhaustiveFoldPatterns,
            FoldError::UnresolvedFoldReference { .. } => FoldErrorKind::UnresolvedFoldReference,
            FoldError::MissingOrDuplicateCodataField { .. } => {
                FoldErrorKind::MissingOrDuplicateCodataField
            }
            FoldError::IllegalSelfReference { .. } => FoldErrorKind::IllegalSelfReference,
            FoldError::UndeterminedFoldDomain { .. } => FoldErrorKind::UndeterminedFoldDomain,
            FoldError::SeedTypeMismatch { .. } => FoldErrorKind::SeedTypeMismatch,
            FoldError::MalformedAccumulatorClause { .. } => FoldErrorKind::MalformedAccumulatorClause,
            FoldError::InconsistentOrBindings { .. } => FoldErrorKind::InconsistentOrBindings,
            FoldError::PatternTypeMismatch { .. } => FoldErrorKind::PatternTypeMismatch,
            FoldError::ConstructorArity { .. } => FoldErrorKind::ConstructorArity,
            FoldError::UnboundName { .. } => FoldErrorKind::UnboundName,
            FoldError::DuplicateDefinition { .. } => FoldErrorKind::DuplicateDefinition,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            FoldError::MalformedTypeDefinition { span, .. }
            | FoldError::IllegalAtPatternPlacement { span, .. }
            | FoldError::NonExhaustiveFoldPatterns { span, .. }
            | FoldError::UnresolvedFoldReference { span, .. }
            | FoldError::MissingOrDuplicateCodataField { span, .. }
            | FoldError::IllegalSelfReference { span, .. }
            | FoldError::UndeterminedFoldDomain { span, .. }
            | FoldError::SeedTypeMismatch { span, .. }
            | FoldError::MalformedAccumulatorClause { span, .. }
            | FoldError::InconsistentOrBindings { span, .. }
            | FoldError::PatternTypeMismatch { span, .. }
            | FoldError::ConstructorArity { span, .. }
            | FoldError::UnboundName { span, .. }
            | FoldError::DuplicateDefinition { span, .. } => *span,
        }
    }

    fn category(&self) -> Category {
        match self.kind() {
            FoldErrorKind::MalformedTypeDefinition => Category::MalformedTypeDefinition,
            FoldErrorKind::IllegalAtPatternPlacement => Category::IllegalAtPattern,
            FoldErrorKind::NonExhaustiveFoldPatterns => Category::NonExhaustive,
            FoldErrorKind::UnresolvedFoldReference => Category::UnresolvedFoldReference,
            FoldErrorKind::MissingOrDuplicateCodataField => Category::CodataField,
            FoldErrorKind::IllegalSelfReference => Category::IllegalSelfReference,
            FoldErrorKind::UndeterminedFoldDomain => Category::UndeterminedDomain,
            FoldErrorKind::SeedTypeMismatch
            | FoldErrorKind::PatternTypeMismatch
            | FoldErrorKind::ConstructorArity => Category::TypeMismatch,
            FoldErrorKind::MalformedAccumulatorClause => Category::AccumulatorClause,
            FoldErrorKind::InconsistentOrBindings => Category::OrPatternBindings,
            FoldErrorKind::UnboundName => Category::UndefinedName,
            FoldErrorKind::DuplicateDefinition => Category::DuplicateDefinition,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.category(), self.to_string()).at(location(self.span()));
        match self {
            FoldError::IllegalAtPatternPlacement { .. } => {
                diag.with_help(self.category().example_fix())
            }
            FoldError::IllegalSelfReference { name, .. } => diag.with_help(format!(
                "`{name}` is not in scope in its own definition; express the recursion with `fold` or `unfold`"
            )),
            FoldError::UnboundName {
                name,
                defined_later: true,
                ..
            } => diag.with_help(format!(
                "`{name}` is defined later in the module; move its definition above this use"
            )),
            FoldError::DuplicateDefinition { previous, .. } => {
                diag.with_label(location(*previous), "first defined here")
            }
            FoldError::NonExhaustiveFoldPatterns { missing, .. } => {
                diag.with_help(format!("add a clause for `{}`", missing.join("`, `")))
            }
            _ => diag,
        }
    }
}

/// Non-fatal findings of the fold/unfold pass.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FoldWarning {
    #[error(
        "`@{binder}` in accumulator fold `{fold}` is used as a value; it is a function of the next accumulator"
    )]
    AccumulatorThreading {
        fold: String,
        binder: String,
        span: Span,
    },
}

impl FoldWarning {
    pub fn span(&self) -> Span {
        match self {
            FoldWarning::AccumulatorThreading { span, .. } => *span,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            FoldWarning::AccumulatorThreading { binder, .. } => {
                Diagnostic::warning(Category::AccumulatorThreading, self.to_string())
                    .at(location(self.span()))
                    .with_help(format!("call it with the next accumulator, e.g. `{binder}(acc)`"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_reference_diagnostic_has_stable_code() {
        let err = FoldError::IllegalSelfReference {
            name: "x".into(),
            span: Span::synthetic(),
        };
        let diag = err.to_diagnostic();
        assert_eq!(diag.code.as_deref(), Some("E0106"));
        assert!(diag.is_error());
        assert!(diag.help.is_some());
    }

    #[test]
    fn non_exhaustive_message_lists_witnesses() {
        let err = FoldError::NonExhaustiveFoldPatterns {
            fold: "f".into(),
            missing: vec!["Zero".into(), "Succ(Zero)".into()],
            span: Span::synthetic(),
        };
        assert_eq!(
            err.to_string(),
            "clauses of `f` are not exhaustive: missing Zero, Succ(Zero)"
        );
    }

    #[test]
    fn accumulator_warning_is_not_an_error() {
        let warning = FoldWarning::AccumulatorThreading {
            fold: "sum".into(),
            binder: "rest".into(),
            span: Span::synthetic(),
        };
        let diag = warning.to_diagnostic();
        assert!(!diag.is_error());
        assert_eq!(diag.code.as_deref(), Some("W0101"));
    }
}
