use crate::commands::{with_database, CommandFailure, CommandResult};
use keyturn_db::migrations;

pub fn run() -> CommandResult {
    let result = with_database(|_config, pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| CommandFailure::new("migration", error, 5))
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(failure) => CommandResult::failure("migrate", failure),
    }
}
