//! aerolog CLI entry point
//!
//! Parses arguments and dispatches to `cli::run`. The command has already
//! printed a JSON error; the exit code reports the failure.

use aerolog::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}: {}", e.code(), e);
        std::process::exit(1);
    }
}
