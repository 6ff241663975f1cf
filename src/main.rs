#![warn(clippy::all)]

use std::process::ExitCode;

use tiny_lang::diagnostic::{ansi::AnsiRenderer, json, Diagnostic};
use tiny_lang::Machine;

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Ansi,
    Text,
    Json,
}

/// Scan args for --json/-j, --text/-t, --ansi/-a; return (mode, rest).
/// Mixing format flags is an error.
fn detect_output_mode(args: Vec<String>) -> Result<(OutputMode, Vec<String>), String> {
    let mut mode: Option<OutputMode> = None;
    let mut rest = Vec::with_capacity(args.len());

    for arg in args {
        let picked = match arg.as_str() {
            "--json" | "-j" => Some(OutputMode::Json),
            "--text" | "-t" => Some(OutputMode::Text),
            "--ansi" | "-a" => Some(OutputMode::Ansi),
            _ => {
                rest.push(arg);
                None
            }
        };
        if let Some(picked) = picked {
            if mode.is_some() {
                return Err("--json, --text, and --ansi are mutually exclusive".to_string());
            }
            mode = Some(picked);
        }
    }

    let resolved = mode.unwrap_or_else(|| {
        // TTY on stderr without NO_COLOR → ANSI; TTY with NO_COLOR →
        // plain text; piped → JSON.
        // SAFETY: isatty is safe for any fd; it returns 0 on error.
        let is_tty = unsafe { libc::isatty(libc::STDERR_FILENO) } != 0;
        let no_color = std::env::var("NO_COLOR").is_ok();
        match (is_tty, no_color) {
            (true, false) => OutputMode::Ansi,
            (true, true) => OutputMode::Text,
            (false, _) => OutputMode::Json,
        }
    });

    Ok((resolved, rest))
}

fn report(d: &Diagnostic, mode: OutputMode) {
    match mode {
        OutputMode::Ansi => eprint!("{}", AnsiRenderer { use_color: true }.render(d)),
        OutputMode::Text => eprint!("{}", AnsiRenderer { use_color: false }.render(d)),
        OutputMode::Json => eprintln!("{}", json::render(d)),
    }
}

fn usage() {
    eprintln!("Usage: tiny <file.tiny>        Compile and run a source file");
    eprintln!("       tiny -e <code>          Compile and run inline code");
    eprintln!("       tiny --ast <file|-e c>  Print the parsed program as JSON");
    eprintln!();
    eprintln!("Diagnostic format: --ansi/-a, --text/-t, --json/-j (default: auto)");
}

fn main() -> ExitCode {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let (mode, mut args) = match detect_output_mode(raw_args) {
        Ok(pair) => pair,
        Err(msg) => {
            eprintln!("error: {msg}");
            return ExitCode::FAILURE;
        }
    };

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("tiny {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let dump_ast = if let Some(at) = args.iter().position(|a| a == "--ast") {
        args.remove(at);
        true
    } else {
        false
    };

    let source = match args.first().map(String::as_str) {
        Some("-e") => match args.get(1) {
            Some(code) => code.clone(),
            None => {
                eprintln!("error: -e needs a code argument");
                return ExitCode::FAILURE;
            }
        },
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("error: cannot read '{path}': {e}");
                return ExitCode::FAILURE;
            }
        },
        None => {
            usage();
            return ExitCode::FAILURE;
        }
    };

    let mut machine = Machine::new();

    if dump_ast {
        return match machine.parse_only(&source) {
            Ok(program) => {
                match serde_json::to_string_pretty(&program) {
                    Ok(out) => println!("{out}"),
                    Err(e) => {
                        eprintln!("error: cannot serialize program: {e}");
                        return ExitCode::FAILURE;
                    }
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                report(&Diagnostic::from(&e).with_source(source.clone()), mode);
                ExitCode::FAILURE
            }
        };
    }

    if let Err(e) = machine.compile(&source) {
        report(&Diagnostic::from(&e).with_source(source.clone()), mode);
        return ExitCode::FAILURE;
    }

    if let Err(e) = machine.run() {
        report(&Diagnostic::from(&e), mode);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
