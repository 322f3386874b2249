//! # Stagehand CLI Module
//!
//! Argument parsing for the conflict report tool.
//!
//! ```bash
//! stagehand -f bundles/a bundles/b -d org.slf4j --json
//! ```

mod commands;

use crate::CliError;
use clap::Parser;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Stagehand - bundle conflict report
///
/// Registers every package and lists bundles that share a symbolic name or
/// define the same class with different content.
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Package directories to register
    #[arg(short, long, required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Host packages the bundles depend on
    #[arg(short, long, num_args = 1..)]
    pub dependencies: Vec<String>,

    /// TOML file with engine settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long)]
    pub json: bool,

    /// Suppress banner output
    #[arg(short, long)]
    pub quiet: bool,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments and print the report.
pub fn execute(cli: Cli) -> Result<(), CliError> {
    let config = crate::config::resolve_from_env(cli.config.as_deref(), &cli.dependencies)?;
    let report = cmd_report(&cli.files, &config)?;

    if cli.json {
        println!("{}", report.render_json()?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn files_are_required() {
        let err = Cli::try_parse_from(["stagehand"]).expect_err("missing files");
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn multiple_values_per_flag() {
        let cli = Cli::try_parse_from([
            "stagehand", "-f", "a", "b", "-d", "org.x", "org.y", "--json", "-q",
        ])
        .expect("parse");
        assert_eq!(cli.files, [PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(cli.dependencies, ["org.x", "org.y"]);
        assert!(cli.json && cli.quiet);
        assert!(cli.config.is_none());
    }

    #[test]
    fn help_is_not_an_error_stream() {
        let err = Cli::try_parse_from(["stagehand", "--help"]).expect_err("help");
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert!(!err.use_stderr());
    }
}
