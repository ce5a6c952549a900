use crate::repositories::RepositoryError;
use crate::DbPool;

/// Seed contract: one active workflow template per movement type, with its
/// expected step count, plus the demo properties the smoke flow drives.
const SEED_TEMPLATES: &[SeedTemplateContract] = &[
    SeedTemplateContract {
        template_id: "wf-release-v1",
        entity_type: "property_release",
        step_count: 2,
        description: "Two-stage release sign-off",
    },
    SeedTemplateContract {
        template_id: "wf-turnover-v1",
        entity_type: "property_turnover",
        step_count: 2,
        description: "Custodian hand-over sign-off",
    },
    SeedTemplateContract {
        template_id: "wf-return-v1",
        entity_type: "property_return",
        step_count: 1,
        description: "Single-stage return acknowledgement",
    },
];

const SEED_PROPERTY_IDS: &[&str] = &["prop-0001", "prop-0002", "prop-0003"];

const SEED_ROLE_IDS: &[&str] =
    &["role-custodian", "role-supervisor", "role-manager", "role-gso-director", "role-admin"];

struct SeedTemplateContract {
    template_id: &'static str,
    entity_type: &'static str,
    step_count: i64,
    description: &'static str,
}

#[derive(Debug)]
pub struct SeedResult {
    pub templates_seeded: Vec<&'static str>,
    pub properties_seeded: Vec<&'static str>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub checks: Vec<(String, bool)>,
}

impl VerificationResult {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|(_, ok)| *ok)
    }
}

/// Deterministic demo fixtures for the property approval flows.
pub struct SeedDataset;

impl SeedDataset {
    pub const SQL: &'static str = include_str!("../../../config/fixtures/seed_data.sql");

    /// Load the seed dataset in one transaction.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(Self::SQL).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(SeedResult {
            templates_seeded: SEED_TEMPLATES.iter().map(|t| t.description).collect(),
            properties_seeded: SEED_PROPERTY_IDS.to_vec(),
        })
    }

    /// Verify the seed data exists and matches the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for role_id in SEED_ROLE_IDS {
            let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM role WHERE id = ?)")
                .bind(role_id)
                .fetch_one(pool)
                .await?;
            checks.push((format!("role:{role_id}"), exists == 1));
        }

        for property_id in SEED_PROPERTY_IDS {
            let active: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM property WHERE id = ? AND status = 'active')",
            )
            .bind(property_id)
            .fetch_one(pool)
            .await?;
            checks.push((format!("property:{property_id}"), active == 1));
        }

        for template in SEED_TEMPLATES {
            let active_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM workflow_template WHERE entity_type = ? AND is_active = 1",
            )
            .bind(template.entity_type)
            .fetch_one(pool)
            .await?;
            checks.push((format!("active-template:{}", template.entity_type), active_count == 1));

            let step_count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM approval_step WHERE template_id = ?")
                    .bind(template.template_id)
                    .fetch_one(pool)
                    .await?;
            checks.push((
                format!("steps:{}", template.template_id),
                step_count == template.step_count,
            ));

            // Step orders must be the dense sequence 1..N.
            let max_order: Option<i64> = sqlx::query_scalar(
                "SELECT MAX(step_order) FROM approval_step WHERE template_id = ?",
            )
            .bind(template.template_id)
            .fetch_one(pool)
            .await?;
            checks.push((
                format!("step-contiguity:{}", template.template_id),
                max_order == Some(template.step_count),
            ));
        }

        Ok(VerificationResult { checks })
    }
}

#[cfg(test)]
mod tests {
    use super::SeedDataset;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seed_loads_and_verifies_on_a_fresh_database() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let result = SeedDataset::load(&pool).await.expect("load seed");
        assert_eq!(result.templates_seeded.len(), 3);
        assert_eq!(result.properties_seeded.len(), 3);

        let verification = SeedDataset::verify(&pool).await.expect("verify seed");
        assert!(verification.passed(), "failed checks: {:?}", verification.checks);
    }
}
