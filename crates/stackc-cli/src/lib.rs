//! Library half of the `stackc` binary: all command logic lives here so it
//! can be called from tests without going through `main`.

pub mod cli;

pub use cli::run_cli;
