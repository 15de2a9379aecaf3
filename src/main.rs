//! Binary entrypoint for the chat server.

use std::process::ExitCode;

use ollama_chat::start_chat_server;

/// Serve the chat front-end until interrupted.
fn main() -> ExitCode {
    start_chat_server::run()
}
