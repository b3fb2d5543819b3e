use std::hint::black_box;

use coal::{CompilerConfig, compile_source, run_source};
use coal_ast::FileId;
use coal_bench::{deep_stream_program, json_encoders_source, nat_folds_source, stream_source};
use coal_fold::{FoldConfig, analyze_module, check_scopes, link, register_types};
use coal_syntax::parse_module_source;
use divan::{AllocProfiler, Bencher};

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

fn parse(source: &str) -> coal_ast::Module {
    parse_module_source(source, FileId(0))
        .unwrap_or_else(|diags| panic!("parsing failed in benchmark setup: {diags:?}"))
}

#[divan::bench(args = [16, 64, 256])]
fn analyze_nat_folds(bencher: Bencher, count: usize) {
    let module = parse(&nat_folds_source(count));
    let config = FoldConfig::default();
    bencher.bench(|| {
        let analysis = analyze_module(black_box(&module), &config);
        assert!(!analysis.has_errors());
        black_box(analysis.core.items.len())
    });
}

#[divan::bench(args = [8, 32, 128])]
fn link_json_encoders(bencher: Bencher, count: usize) {
    let module = parse(&json_encoders_source(count));
    let (registry, errors) = register_types(&module);
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    bencher.bench(|| {
        let graph = link(black_box(&module), &registry)
            .unwrap_or_else(|errors| panic!("linking failed in benchmark: {errors:?}"));
        black_box(graph.mutually_recursive_groups().len())
    });
}

#[divan::bench(args = [16, 64, 256])]
fn scope_check_streams(bencher: Bencher, count: usize) {
    let module = parse(&stream_source(count));
    let (registry, _) = register_types(&module);
    bencher.bench(|| black_box(check_scopes(black_box(&module), &registry).len()));
}

#[divan::bench(args = [16, 64, 256])]
fn compile_with_trace(bencher: Bencher, count: usize) {
    let source = stream_source(count);
    let config = CompilerConfig {
        fold: FoldConfig {
            trace: true,
            ..FoldConfig::default()
        },
        ..CompilerConfig::default()
    };
    bencher.bench(|| {
        let context = compile_source(black_box(&source), &config)
            .unwrap_or_else(|err| panic!("compilation failed in benchmark: {err}"));
        black_box(context.analysis.trace.len())
    });
}

#[divan::bench(args = [50, 200])]
fn observe_deep_stream(bencher: Bencher, depth: usize) {
    let source = deep_stream_program(depth);
    let config = CompilerConfig::default();
    bencher.bench(|| {
        let result = run_source(black_box(&source), &config)
            .unwrap_or_else(|err| panic!("run failed in benchmark: {err}"));
        black_box(result.value)
    });
}
