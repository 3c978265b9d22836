//! weighin CLI - Weight Log Import
//!
//! A command-line tool for importing body weight exports into a local database.

mod handlers;
mod state;

use handlers::{detect, formats, import, list, undo};
use sen::Router;
use state::AppState;

#[tokio::main]
async fn main() {
    // Sandbox worker for generated parsers; stdout carries the reply
    if std::env::args().nth(1).as_deref() == Some(weighin_core::SANDBOX_WORKER_ARG) {
        std::process::exit(weighin_core::serve_sandbox_worker());
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Initialize application state
    let state = match AppState::new().await {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Failed to initialize weighin: {}", e);
            std::process::exit(1);
        }
    };

    // Build router
    let router = Router::new()
        // Import commands
        .route("import", import::import())
        .route("undo", undo::undo())

        // Inspection commands
        .route("detect", detect::detect())
        .route("formats", formats::formats)
        .route("list", list::list())

        .with_state(state)
        .with_agent_mode(); // JSON output for LLM integration

    // Execute
    let response = router.execute().await;

    // Output
    if response.agent_mode {
        println!("{}", response.to_agent_json());
    } else if !response.output.is_empty() {
        println!("{}", response.output);
    }

    std::process::exit(response.exit_code);
}
