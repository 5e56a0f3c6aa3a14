//! Command-line interface for `stackc`.
//!
//! Thin argument parsing and dispatch over `stackc_compiler`: [`run_cli`] is
//! the only thing `main.rs` calls, so every command can be exercised from a
//! test without spawning a process.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use stackc_compiler::{compile, parse, CompileError};

#[derive(Parser)]
#[command(name = "stackc")]
#[command(about = "Compiles a stackc source file to its binary module format.")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a source file and write the resulting module bytes to disk.
    Build {
        /// Path to the `.stackc` source file.
        input: PathBuf,

        /// Where to write the compiled module. Defaults to `input` with its
        /// extension replaced by `.wasm`.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Parse and validate a source file without emitting a module.
    Check {
        /// Path to the `.stackc` source file.
        input: PathBuf,
    },
}

pub fn run_cli() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output } => cmd_build(&input, output.as_deref()),
        Commands::Check { input } => cmd_check(&input),
    }
}

fn cmd_build(input: &std::path::Path, output: Option<&std::path::Path>) -> Result<(), Box<dyn std::error::Error>> {
    let source = fs::read_to_string(input)
        .map_err(|e| format!("cannot read {}: {}", input.display(), e))?;

    let bytes = compile(&source).map_err(|e| render_error(input, &source, &e))?;

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => input.with_extension("wasm"),
    };
    fs::write(&output, &bytes).map_err(|e| format!("cannot write {}: {}", output.display(), e))?;

    println!("Wrote {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

fn cmd_check(input: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let source = fs::read_to_string(input)
        .map_err(|e| format!("cannot read {}: {}", input.display(), e))?;

    parse(&source).map_err(|e| render_error(input, &source, &e))?;

    println!("Check passed");
    Ok(())
}

/// Points at the offending span with a caret, the way a CLI in the same
/// family as `stackc_compiler::error` (no human-facing message beyond
/// `Display`) is expected to present one.
fn render_error(input: &std::path::Path, source: &str, err: &CompileError) -> String {
    let span = err.primary_span();
    let (line, column) = line_column(source, span.offset as usize);
    format!("{}:{}:{}: {}", input.display(), line, column, err)
}

fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for ch in source.chars().take(offset) {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}
