//! Lark command-line entry point.
//!
//! - With no arguments, start an interactive REPL on a persistent VM.
//! - With one argument, interpret that file.
//! - Anything else prints usage and exits 64.
//!
//! Exit codes follow the sysexits convention: 0 success, 64 usage error,
//! 65 compile error, 70 runtime error, 74 unreadable file. Diagnostics and
//! log output go to stderr; program output stays on stdout.

use std::env;
use std::fs;
use std::process::ExitCode;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use lark::{Error, Vm};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => repl(),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("Usage: lark [path]");
            ExitCode::from(64)
        }
    }
}

fn run_file(path: &str) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(_) => {
            eprintln!("Could not open file \"{path}\".");
            return ExitCode::from(74);
        }
    };

    let mut vm = Vm::new();
    match vm.interpret(&source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ Error::Compile(_)) => {
            eprintln!("{err}");
            ExitCode::from(65)
        }
        Err(err @ Error::Runtime { .. }) => {
            eprintln!("{err}");
            ExitCode::from(70)
        }
    }
}

/// Read-eval-print loop. Errors are reported and the loop continues; the VM
/// persists so definitions from earlier lines stay visible.
fn repl() -> ExitCode {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Could not start line editor: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::new();
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                if let Err(err) = vm.interpret(&line) {
                    eprintln!("{err}");
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("Read error: {err}");
                return ExitCode::FAILURE;
            }
        }
    }
}
