pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use keyturn_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "keyturn",
    about = "Keyturn operator CLI",
    long_about = "Operate Keyturn migrations, demo fixtures, readiness checks, \
                  config inspection, and the approval-request expiry sweep.",
    after_help = "Examples:\n  keyturn doctor --json\n  keyturn smoke\n  keyturn expire"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load deterministic demo fixtures (roles, properties, workflow templates)")]
    Seed,
    #[command(about = "Run an end-to-end release approval against an isolated in-memory database")]
    Smoke,
    #[command(about = "Inspect effective configuration values")]
    Config,
    #[command(about = "Validate config, DB connectivity, and workflow configuration")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Expire open approval requests older than the configured TTL")]
    Expire,
}

fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    let builder = tracing_subscriber::fmt().with_target(false).with_max_level(log_level);
    let init_result = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    // A second init (tests, embedding) is harmless.
    let _ = init_result;
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Expire => commands::expire::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
