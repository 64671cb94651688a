//! Binary entrypoint for the DocEase chat console.

use std::process::ExitCode;

use docease_chat::console;

/// Start the console chat client for the persisted session.
fn main() -> ExitCode {
    console::run()
}
