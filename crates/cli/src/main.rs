//! Agentry CLI: the main entry point.
//!
//! Commands:
//! - `soak`: Drive many agents from many producers and verify the totals
//! - `config`: Print the effective (or default) runtime configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "agentry",
    about = "Agentry: agents, a dispatcher and a worker pool",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load-test the runtime and check that no action is lost or repeated
    Soak(commands::soak::SoakArgs),

    /// Show the runtime configuration as TOML
    Config {
        /// Print built-in defaults instead of the loaded configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Soak(args) => commands::soak::run(args).await?,
        Commands::Config { default } => commands::config_cmd::run(default)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_soak_with_defaults() {
        let cli = Cli::try_parse_from(["agentry", "soak"]).unwrap();
        match cli.command {
            Commands::Soak(args) => {
                assert_eq!(args.agents, 1_000);
                assert_eq!(args.solo_every, 0);
                assert!(!args.json);
            }
            _ => panic!("Expected soak command"),
        }
    }

    #[test]
    fn parses_soak_overrides() {
        let cli = Cli::try_parse_from([
            "agentry", "-v", "soak", "--agents", "10", "--sends", "5", "--solo-every", "2",
            "--lanes", "3", "--json",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Soak(args) => {
                assert_eq!(args.agents, 10);
                assert_eq!(args.sends, 5);
                assert_eq!(args.solo_every, 2);
                assert_eq!(args.lanes, Some(3));
                assert!(args.json);
            }
            _ => panic!("Expected soak command"),
        }
    }

    #[test]
    fn parses_config_default_flag() {
        let cli = Cli::try_parse_from(["agentry", "config", "--default"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { default: true }));
    }
}
