use std::path::PathBuf;

use coal::{CompilerConfig, compile_file, emit_diagnostics, run_context};

fn main() {
    if let Err(message) = run() {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = std::env::args().collect::<Vec<_>>();
    let cli = parse_cli(&args)?;
    let context = compile_file(&cli.input, &cli.config)?;
    let origin = cli.input.display().to_string();
    let emit = |diags: &[coal_diag::Diagnostic]| emit_diagnostics(diags, &context.source, &origin);

    if cli.trace {
        println!("{}", context.trace_json()?);
    }

    match cli.command {
        Command::Check => {
            emit(&context.diagnostics);
            if context.has_errors() {
                std::process::exit(1);
            }
            println!(
                "ok: {} definition(s) checked",
                context.analysis.core.items.len()
            );
            Ok(())
        }
        Command::Lower => {
            emit(&context.diagnostics);
            if context.has_errors() {
                std::process::exit(1);
            }
            println!("{}", context.render_core());
            Ok(())
        }
        Command::Run => {
            let result = run_context(&context, &cli.config)?;
            emit(&result.diagnostics);
            println!("{}", result.value);
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Check,
    Lower,
    Run,
}

#[derive(Debug)]
struct Cli {
    command: Command,
    input: PathBuf,
    trace: bool,
    config: CompilerConfig,
}

fn parse_cli(args: &[String]) -> Result<Cli, String> {
    if args.len() < 3 {
        return Err(usage());
    }

    let command = match args[1].as_str() {
        "check" => Command::Check,
        "lower" => Command::Lower,
        "run" => Command::Run,
        _ => return Err(usage()),
    };
    let mut cli = Cli {
        command,
        input: PathBuf::from(&args[2]),
        trace: false,
        config: CompilerConfig::default(),
    };

    let mut idx = 3;
    while idx < args.len() {
        match args[idx].as_str() {
            "--trace" => {
                cli.trace = true;
                cli.config.fold.trace = true;
                idx += 1;
            }
            "--no-accumulator-warnings" => {
                cli.config.fold.accumulator_warnings = false;
                idx += 1;
            }
            "--max-errors" => {
                let value = args
                    .get(idx + 1)
                    .ok_or_else(|| "missing value for --max-errors".to_string())?;
                cli.config.fold.max_errors_per_definition = value
                    .parse()
                    .map_err(|_| format!("invalid value for --max-errors: `{value}`"))?;
                idx += 2;
            }
            unknown => {
                return Err(format!("unknown argument `{unknown}`\n{}", usage()));
            }
        }
    }

    Ok(cli)
}

fn usage() -> String {
    "usage:\n  coal check <file.coal> [options]\n  coal lower <file.coal> [options]\n  coal run <file.coal> [options]\n\noptions:\n  --trace                      print the fold/unfold trace as JSON\n  --no-accumulator-warnings    silence accumulator threading warnings\n  --max-errors <n>             errors reported per definition (default 8)"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        std::iter::once("coal")
            .chain(items.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parses_commands_and_flags() {
        let cli = parse_cli(&args(&[
            "lower",
            "main.coal",
            "--trace",
            "--no-accumulator-warnings",
            "--max-errors",
            "3",
        ]))
        .unwrap();
        assert_eq!(cli.command, Command::Lower);
        assert_eq!(cli.input, PathBuf::from("main.coal"));
        assert!(cli.trace);
        assert!(cli.config.fold.trace);
        assert!(!cli.config.fold.accumulator_warnings);
        assert_eq!(cli.config.fold.max_errors_per_definition, 3);
    }

    #[test]
    fn rejects_unknown_input() {
        assert!(parse_cli(&args(&["build", "main.coal"])).is_err());
        assert!(parse_cli(&args(&["run"])).is_err());
        let err = parse_cli(&args(&["run", "main.coal", "--fast"])).unwrap_err();
        assert!(err.starts_with("unknown argument `--fast`"), "{err}");
        assert!(parse_cli(&args(&["run", "main.coal", "--max-errors"])).is_err());
        assert!(parse_cli(&args(&["run", "main.coal", "--max-errors", "many"])).is_err());
    }
}
