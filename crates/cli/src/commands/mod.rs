pub mod config;
pub mod doctor;
pub mod expire;
pub mod migrate;
pub mod seed;
pub mod smoke;

use std::future::Future;

use serde::Serialize;

use keyturn_core::config::{AppConfig, LoadOptions};
use keyturn_db::{connect_with_settings, DbPool};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(command: &str, failure: CommandFailure) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(failure.error_class.to_string()),
            message: failure.message,
        };
        Self { exit_code: failure.exit_code, output: serialize_payload(payload) }
    }
}

/// One failed step of a command, with the exit code the process should carry.
#[derive(Debug)]
pub struct CommandFailure {
    pub error_class: &'static str,
    pub message: String,
    pub exit_code: u8,
}

impl CommandFailure {
    pub fn new(error_class: &'static str, error: impl ToString, exit_code: u8) -> Self {
        Self { error_class, message: error.to_string(), exit_code }
    }
}

/// Shared plumbing for commands that operate on the configured database:
/// load and validate config, stand up a current-thread runtime, connect, run
/// the command body, and close the pool.
pub(crate) fn with_database<T, F, Fut>(run: F) -> Result<T, CommandFailure>
where
    F: FnOnce(AppConfig, DbPool) -> Fut,
    Fut: Future<Output = Result<T, CommandFailure>>,
{
    let config = AppConfig::load(LoadOptions::default())
        .map_err(|error| CommandFailure::new("config_validation", format!("configuration issue: {error}"), 2))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            CommandFailure::new("runtime_init", format!("failed to initialize async runtime: {error}"), 3)
        })?;

    runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| CommandFailure::new("db_connectivity", error, 4))?;

        let result = run(config.clone(), pool.clone()).await;
        pool.close().await;
        result
    })
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
