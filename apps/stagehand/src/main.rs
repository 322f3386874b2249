//! # Stagehand - Bundle Conflict Report
//!
//! Registers bundle packages and reports which of them would collide once
//! loaded side by side.
//!
//! ## Usage
//!
//! ```bash
//! # Text report
//! stagehand -f bundles/a bundles/b bundles/c
//!
//! # JSON report with host exports
//! stagehand -f bundles/* -d org.slf4j --json
//! ```

use clap::Parser;
use stagehand::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // Initialize tracing. STAGEHAND_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("STAGEHAND_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stagehand=info".into());

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

    // Parse CLI arguments; help and version are not failures.
    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = i32::from(e.use_stderr());
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if !cli.quiet && !cli.json {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!("stagehand v{} - bundle conflict report", env!("CARGO_PKG_VERSION"));
    println!();
}
