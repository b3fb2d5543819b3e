mod compiler;

pub use compiler::{
    CompilationContext, CompilerConfig, RunResult, compile_file, compile_source, emit_diagnostics,
    render_diagnostic, run_context, run_file, run_source,
};
