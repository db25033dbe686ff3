//! docchat — chat with LLM providers, optionally grounded in a document.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use docchat_core::AppConfig;
use docchat_server::state::spawn_session_sweeper;
use docchat_server::{build_router, repl, AppState};
use docchat_session::Orchestrator;

fn print_help() {
    println!("docchat — document-grounded LLM chat");
    println!();
    println!("Usage: docchat [command]");
    println!();
    println!("Commands:");
    println!("  serve        Start the HTTP server (default)");
    println!("  repl         Chat in the terminal");
    println!("  help         Show this help message");
    println!();
    println!("Environment:");
    println!("  PORT, OPENAI_API_KEY, ANTHROPIC_API_KEY, AZURE_OPENAI_*,");
    println!("  LANGCHAIN_API_KEY, LANGCHAIN_PROJECT, LANGCHAIN_ENDPOINT, DEFAULT_*,");
    println!("  SESSION_IDLE_MINUTES (0 keeps idle sessions)");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("serve");

    let config = Arc::new(AppConfig::from_env());
    let client = reqwest::Client::builder()
        .user_agent(concat!("docchat/", env!("CARGO_PKG_VERSION")))
        .build()?;

    match command {
        "serve" | "--serve" => {}
        "repl" | "--repl" => {
            let orchestrator = Orchestrator::new(config, client);
            return repl::run(orchestrator).await;
        }
        "--help" | "-h" | "help" => {
            print_help();
            return Ok(());
        }
        other => {
            eprintln!("Unknown command: {}. Use 'docchat help' for usage.", other);
            std::process::exit(1);
        }
    }

    let port = config.port;
    let idle = Duration::from_secs(config.session_idle_minutes * 60);
    let orchestrator = Orchestrator::new(config.clone(), client);
    let state = Arc::new(AppState::new(config, orchestrator));
    spawn_session_sweeper(state.clone(), idle);
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("docchat server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
