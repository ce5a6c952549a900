use keyturn_core::config::{AppConfig, LoadOptions, LogFormat};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct EffectiveConfig {
    database_url: String,
    database_max_connections: u32,
    database_timeout_secs: u64,
    workflow_administrator_role: String,
    workflow_request_ttl_hours: u32,
    logging_level: String,
    logging_format: &'static str,
}

pub fn run() -> String {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let effective = EffectiveConfig {
                database_url: config.database.url,
                database_max_connections: config.database.max_connections,
                database_timeout_secs: config.database.timeout_secs,
                workflow_administrator_role: config.workflow.administrator_role,
                workflow_request_ttl_hours: config.workflow.request_ttl_hours,
                logging_level: config.logging.level,
                logging_format: match config.logging.format {
                    LogFormat::Compact => "compact",
                    LogFormat::Pretty => "pretty",
                    LogFormat::Json => "json",
                },
            };
            serde_json::to_string_pretty(&effective)
                .unwrap_or_else(|error| format!("config serialization failed: {error}"))
        }
        Err(error) => format!("configuration issue: {error}"),
    }
}
