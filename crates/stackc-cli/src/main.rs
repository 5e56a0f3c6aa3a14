//! `stackc` - standalone binary entry point.
//!
//! A thin wrapper around [`stackc_cli::run_cli`]; all command logic lives in
//! the library crate so it stays testable without spawning a process.
//!
//! Exit codes: `0` on success, `1` on error (message printed to stderr).

fn main() {
    if let Err(e) = stackc_cli::run_cli() {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
