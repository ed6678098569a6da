//! # Axiom - Semantic Physics Runner
//!
//! The main binary for the Axiom engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  apps/axiom (THE BINARY)                 │
//! │                                                          │
//! │  ┌─────────────┐   ┌────────────────┐   ┌─────────────┐  │
//! │  │    CLI      │   │ Tick scheduler │   │   Journal   │  │
//! │  │   (clap)    │   │    (tokio)     │   │   writer    │  │
//! │  └──────┬──────┘   └───────┬────────┘   └──────┬──────┘  │
//! │         └──────────────────┼───────────────────┘         │
//! │                            ▼                             │
//! │                    ┌───────────────┐                     │
//! │                    │  axiom-core   │                     │
//! │                    │  (THE LOGIC)  │                     │
//! │                    └───────────────┘                     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! axiom run -s script.json --ticks 50 --journal events.jsonl
//! axiom run -s script.json --realtime
//! axiom -c axiom.toml validate
//! axiom checksum -s script.json
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // AXIOM_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("AXIOM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "axiom=info,axiom_core=info".into());

    // Logs go to stderr so stdout stays clean for --json-mode.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = axiom::cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = axiom::cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Axiom startup banner.
fn print_banner() {
    println!(
        r#"
   █████╗ ██╗  ██╗██╗ ██████╗ ███╗   ███╗
  ██╔══██╗╚██╗██╔╝██║██╔═══██╗████╗ ████║
  ███████║ ╚███╔╝ ██║██║   ██║██╔████╔██║
  ██╔══██║ ██╔██╗ ██║██║   ██║██║╚██╔╝██║
  ██║  ██║██╔╝ ██╗██║╚██████╔╝██║ ╚═╝ ██║
  ╚═╝  ╚═╝╚═╝  ╚═╝╚═╝ ╚═════╝ ╚═╝     ╚═╝

  Semantic Physics Engine v{}

  Deterministic • Local forces • Replayable
"#,
        env!("CARGO_PKG_VERSION")
    );
}
