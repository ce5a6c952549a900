use chrono::{Duration, Utc};

use crate::commands::{with_database, CommandFailure, CommandResult};
use keyturn_db::{SqlAuditSink, WorkflowService};

/// External time-based trigger for the Expired status: sweep open requests
/// older than the configured TTL. Run from cron or an operator shell.
pub fn run() -> CommandResult {
    let result = with_database(|config, pool| async move {
        let ttl_hours = i64::from(config.workflow.request_ttl_hours);
        let cutoff = Utc::now() - Duration::hours(ttl_hours);

        let service = WorkflowService::new(pool.clone(), SqlAuditSink::new(pool.clone()));
        let expired = service
            .expire_stale(cutoff, "expire-sweep")
            .await
            .map_err(|error| CommandFailure::new("expiry_sweep", error, 5))?;

        Ok((expired, ttl_hours))
    });

    match result {
        Ok((expired, ttl_hours)) => CommandResult::success(
            "expire",
            format!("expired {expired} stale approval request(s) older than {ttl_hours}h"),
        ),
        Err(failure) => CommandResult::failure("expire", failure),
    }
}
