use thiserror::Error;

/// Errors produced by compiling or running Lark source.
///
/// The two variants mirror the two failure modes of the pipeline: a compile
/// error means no bytecode was executed; a runtime error means execution
/// halted and the VM's stacks were reset.
#[derive(Debug, Error)]
pub enum Error {
    /// One rendered report per diagnostic, in source order. Panic-mode
    /// recovery in the compiler suppresses cascades, so each statement
    /// contributes at most one report.
    #[error("{}", .0.join("\n"))]
    Compile(Vec<String>),

    /// The error message followed by one stack-trace line per active frame,
    /// innermost first.
    #[error("{}", render_runtime(.message, .trace))]
    Runtime { message: String, trace: Vec<String> },
}

fn render_runtime(message: &str, trace: &[String]) -> String {
    let mut out = message.to_string();
    for line in trace {
        out.push('\n');
        out.push_str(line);
    }
    out
}

pub type Result<T> = std::result::Result<T, Error>;
