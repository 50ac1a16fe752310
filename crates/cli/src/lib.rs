pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use supportflow_core::config::{AppConfig, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "supportflow",
    about = "SupportFlow ticket pipeline CLI",
    long_about = "Run support tickets through the staged resolution pipeline and inspect its configuration.",
    after_help = "Examples:\n  supportflow run --name \"Alice Smith\" --query \"I want a refund\" --ticket-id TCK-1001\n  supportflow batch --file tickets.json --seed 7\n  supportflow stages\n  supportflow config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a supportflow.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Process one ticket and print the final payload as JSON")]
    Run(commands::run::RunArgs),
    #[command(about = "Process a JSON array of tickets in parallel")]
    Batch(commands::batch::BatchArgs),
    #[command(about = "Print the effective stage registry")]
    Stages,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run(args) => commands::run::run(cli.config, args),
        Command::Batch(args) => commands::batch::run(cli.config, args),
        Command::Stages => commands::stages::run(cli.config),
        Command::Config => commands::CommandResult {
            exit_code: 0,
            output: commands::config::run(cli.config.as_deref()),
        },
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Installs the global subscriber. Logs go to stderr so stdout stays machine readable.
///
/// Repeated calls keep the first subscriber.
pub fn init_logging(config: &AppConfig) {
    use tracing::Level;
    use LogFormat::*;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}
