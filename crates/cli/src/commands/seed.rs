use crate::commands::{with_database, CommandFailure, CommandResult};
use keyturn_db::{migrations, SeedDataset};

pub fn run() -> CommandResult {
    let result = with_database(|_config, pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| CommandFailure::new("migration", error, 5))?;

        let seeded = SeedDataset::load(&pool)
            .await
            .map_err(|error| CommandFailure::new("seed_execution", error, 5))?;

        let verification = SeedDataset::verify(&pool)
            .await
            .map_err(|error| CommandFailure::new("seed_verification", error, 6))?;

        if verification.passed() {
            Ok(seeded)
        } else {
            let failed_checks: Vec<&str> = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                .collect();
            let message = if failed_checks.is_empty() {
                "Some seed data failed to load".to_string()
            } else {
                format!("Seed verification failed for checks: {}", failed_checks.join(", "))
            };
            Err(CommandFailure::new("seed_verification", message, 6))
        }
    });

    match result {
        Ok(seeded) => {
            let templates: Vec<String> =
                seeded.templates_seeded.iter().map(|name| format!("  - {name}")).collect();
            let message = format!(
                "demo fixtures loaded: {} properties, {} workflow templates:\n{}",
                seeded.properties_seeded.len(),
                seeded.templates_seeded.len(),
                templates.join("\n")
            );
            CommandResult::success("seed", message)
        }
        Err(failure) => CommandResult::failure("seed", failure),
    }
}
