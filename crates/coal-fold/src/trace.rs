//! Tracing types for fold/unfold observability.
//!
//! A trace is a flat list of [`FoldStep`]s describing what each phase
//! decided and why. Tracing is opt-in through [`crate::FoldConfig::trace`];
//! a disabled [`Tracer`] records nothing.

use coal_ast::Span;
use serde::Serialize;

/// A single step in a fold/unfold trace.
#[derive(Debug, Clone, Serialize)]
pub struct FoldStep {
    pub step: usize,
    pub phase: Phase,
    pub action: FoldAction,
    /// The type, definition or pattern the step is about.
    pub subject: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Locate,
    Check,
    Link,
    Scope,
    Lower,
}

/// What happened during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldAction {
    /// A constructor component or codata field was classified.
    ClassifySlot,
    /// Slots were served from the per-unit cache.
    CacheHit,
    /// The domain (or produced codata type) of a fold/unfold was fixed.
    ResolveDomain,
    AcceptClause,
    RejectClause,
    /// Exhaustiveness of the non-`@` portion of the clauses was checked.
    CheckExhaustive,
    /// A `fold_name(@p)` pattern was linked to a top-level fold.
    LinkEdge,
    /// A name reference was rejected by the binding-scope rule.
    RejectName,
    /// `@p` became a `SelfCall` binding.
    LowerSelfCall,
    /// `fold_name(@p)` became a call to the named fold.
    LowerNamedCall,
    /// An unfold field became a suspension.
    LowerThunk,
    /// A core function was produced.
    EmitFunction,
}

/// Collects [`FoldStep`]s when enabled.
#[derive(Debug, Clone, Default)]
pub struct Tracer {
    enabled: bool,
    steps: Vec<FoldStep>,
}

impl Tracer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            steps: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(
        &mut self,
        phase: Phase,
        action: FoldAction,
        subject: impl Into<String>,
        detail: impl Into<String>,
        span: Option<Span>,
    ) {
        if !self.enabled {
            return;
        }
        self.steps.push(FoldStep {
            step: self.steps.len(),
            phase,
            action,
            subject: subject.into(),
            detail: detail.into(),
            span: span.map(|s| (s.start, s.end)),
        });
    }

    pub fn steps(&self) -> &[FoldStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<FoldStep> {
        self.steps
    }
}
