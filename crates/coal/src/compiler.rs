use std::fs;
use std::path::Path;

use coal_ast::{FileId, Module};
use coal_core::{EvalConfig, EvalError, Evaluator, with_eval_stack};
use coal_diag::Diagnostic;
use coal_fold::{FoldAnalysis, FoldConfig, analyze_module};
use coal_syntax::parse_module_source;

/// Options shared by every driver entry point.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub fold: FoldConfig,
    pub eval: EvalConfig,
    pub file_id: FileId,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            fold: FoldConfig::default(),
            eval: EvalConfig::default(),
            file_id: FileId(0),
        }
    }
}

#[derive(Debug)]
pub struct CompilationContext {
    pub source: String,
    pub module: Module,
    pub analysis: FoldAnalysis,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompilationContext {
    pub fn has_errors(&self) -> bool {
        coal_diag::has_errors(&self.diagnostics)
    }

    /// Lowered core module, one item per paragraph.
    pub fn render_core(&self) -> String {
        self.analysis.core.to_string()
    }

    pub fn trace_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(&self.analysis.trace)
            .map_err(|err| format!("failed to serialize trace: {err}"))
    }
}

#[derive(Debug)]
pub struct RunResult {
    /// Rendered value of `main`.
    pub value: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse and run the fold/unfold pass over `source`.
///
/// Parse failures are returned as `Err`; checking errors are reported in
/// [`CompilationContext::diagnostics`].
pub fn compile_source(source: &str, config: &CompilerConfig) -> Result<CompilationContext, String> {
    let module = parse_module_source(source, config.file_id)
        .map_err(|diags| format_diagnostics("parsing failed", &diags))?;
    let analysis = analyze_module(&module, &config.fold);
    let diagnostics = analysis.diagnostics();
    Ok(CompilationContext {
        source: source.to_string(),
        module,
        analysis,
        diagnostics,
    })
}

pub fn compile_file(input: &Path, config: &CompilerConfig) -> Result<CompilationContext, String> {
    compile_source(&read_source(input)?, config)
}

/// Compile `source`, evaluate its bindings and render the value of `main`.
pub fn run_source(source: &str, config: &CompilerConfig) -> Result<RunResult, String> {
    let context = compile_source(source, config)?;
    run_context(&context, config)
}

pub fn run_file(input: &Path, config: &CompilerConfig) -> Result<RunResult, String> {
    run_source(&read_source(input)?, config)
}

/// Evaluate an already checked module on a thread sized by
/// [`EvalConfig::stack_size`].
pub fn run_context(context: &CompilationContext, config: &CompilerConfig) -> Result<RunResult, String> {
    if context.has_errors() {
        let errors: Vec<Diagnostic> = context
            .diagnostics
            .iter()
            .filter(|diag| diag.is_error())
            .cloned()
            .collect();
        return Err(format_diagnostics("fold checking failed", &errors));
    }
    let core = &context.analysis.core;
    let value = with_eval_stack(&config.eval, || -> Result<String, EvalError> {
        let mut evaluator = Evaluator::new(core, config.eval.clone());
        evaluator.run_bindings()?;
        Ok(evaluator.global("main")?.to_string())
    })
    .and_then(|result| result)
    .map_err(|err| format!("evaluation failed: {err}"))?;
    Ok(RunResult {
        value,
        diagnostics: context.diagnostics.clone(),
    })
}

/// `origin:line:col: message`, or `origin: message` without a location.
pub fn render_diagnostic(diag: &Diagnostic, source: &str, origin: &str) -> String {
    match diag.location {
        Some(location) => {
            let (line, col) = location.line_col(source);
            format!("{origin}:{line}:{col}: {diag}")
        }
        None => format!("{origin}: {diag}"),
    }
}

pub fn emit_diagnostics(diags: &[Diagnostic], source: &str, origin: &str) {
    for diag in diags {
        eprintln!("{}", render_diagnostic(diag, source, origin));
    }
}

fn read_source(input: &Path) -> Result<String, String> {
    fs::read_to_string(input).map_err(|err| format!("failed to read `{}`: {err}", input.display()))
}

fn format_diagnostics(prefix: &str, diagnostics: &[Diagnostic]) -> String {
    if diagnostics.is_empty() {
        return prefix.to_string();
    }

    let rendered = diagnostics
        .iter()
        .map(|d| format!("  - {d}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{prefix}:\n{rendered}")
}
