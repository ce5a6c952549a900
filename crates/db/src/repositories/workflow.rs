use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use keyturn_core::domain::workflow::{
    normalize_step_orders, ApprovalStep, EntityType, RoleId, TemplateId, WorkflowTemplate,
};

use super::{RepositoryError, WorkflowTemplateRepository};
use crate::workflow::parse_timestamp;
use crate::DbPool;

pub struct SqlWorkflowTemplateRepository {
    pool: DbPool,
}

impl SqlWorkflowTemplateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_steps(&self, template_id: &str) -> Result<Vec<ApprovalStep>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT s.step_order, s.step_name, s.role_id, r.name AS role_name,
                    s.is_required, s.can_override, s.override_min_level
             FROM approval_step s
             JOIN role r ON r.id = s.role_id
             WHERE s.template_id = ?
             ORDER BY s.step_order ASC",
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_step).collect()
    }

    async fn load_template(&self, row: SqliteRow) -> Result<WorkflowTemplate, RepositoryError> {
        let id: String = row.try_get("id").map_err(decode)?;
        let entity_type_raw: String = row.try_get("entity_type").map_err(decode)?;
        let entity_type = EntityType::parse(&entity_type_raw).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown entity type `{entity_type_raw}`"))
        })?;
        let name: String = row.try_get("name").map_err(decode)?;
        let description: String = row.try_get("description").map_err(decode)?;
        let is_active = row.try_get::<i64, _>("is_active").map_err(decode)? != 0;
        let created_at = parse_timestamp(&row.try_get::<String, _>("created_at").map_err(decode)?);
        let updated_at = parse_timestamp(&row.try_get::<String, _>("updated_at").map_err(decode)?);

        let steps = self.load_steps(&id).await?;

        Ok(WorkflowTemplate {
            id: TemplateId(id),
            name,
            description,
            entity_type,
            is_active,
            steps,
            created_at,
            updated_at,
        })
    }
}

fn decode(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn row_to_step(row: &SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    Ok(ApprovalStep {
        step_order: row.try_get::<i64, _>("step_order").map_err(decode)? as u32,
        step_name: row.try_get("step_name").map_err(decode)?,
        role_id: RoleId(row.try_get("role_id").map_err(decode)?),
        role_name: row.try_get("role_name").map_err(decode)?,
        is_required: row.try_get::<i64, _>("is_required").map_err(decode)? != 0,
        can_override: row.try_get::<i64, _>("can_override").map_err(decode)? != 0,
        override_min_level: row
            .try_get::<Option<i64>, _>("override_min_level")
            .map_err(decode)?
            .map(|level| level as u8),
    })
}

#[async_trait::async_trait]
impl WorkflowTemplateRepository for SqlWorkflowTemplateRepository {
    async fn find_active_by_entity_type(
        &self,
        entity_type: EntityType,
    ) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, description, entity_type, is_active, created_at, updated_at
             FROM workflow_template
             WHERE entity_type = ? AND is_active = 1",
        )
        .bind(entity_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_template(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_id(
        &self,
        id: &TemplateId,
    ) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, description, entity_type, is_active, created_at, updated_at
             FROM workflow_template
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_template(row).await?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        mut template: WorkflowTemplate,
    ) -> Result<WorkflowTemplate, RepositoryError> {
        normalize_step_orders(&mut template.steps);
        template.updated_at = Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflow_template (id, name, description, entity_type, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 entity_type = excluded.entity_type,
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
        )
        .bind(&template.id.0)
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.entity_type.as_str())
        .bind(i64::from(template.is_active))
        .bind(template.created_at.to_rfc3339())
        .bind(template.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if template.is_active {
            sqlx::query(
                "UPDATE workflow_template
                 SET is_active = 0, updated_at = ?
                 WHERE entity_type = ? AND id <> ? AND is_active = 1",
            )
            .bind(template.updated_at.to_rfc3339())
            .bind(template.entity_type.as_str())
            .bind(&template.id.0)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM approval_step WHERE template_id = ?")
            .bind(&template.id.0)
            .execute(&mut *tx)
            .await?;

        for step in &template.steps {
            sqlx::query(
                "INSERT INTO approval_step
                     (id, template_id, step_order, step_name, role_id, is_required, can_override, override_min_level)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&template.id.0)
            .bind(i64::from(step.step_order))
            .bind(&step.step_name)
            .bind(&step.role_id.0)
            .bind(i64::from(step.is_required))
            .bind(i64::from(step.can_override))
            .bind(step.override_min_level.map(i64::from))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use keyturn_core::domain::workflow::{
        ApprovalStep, EntityType, RoleId, TemplateId, WorkflowTemplate,
    };

    use super::SqlWorkflowTemplateRepository;
    use crate::repositories::WorkflowTemplateRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        seed_roles(&pool).await;
        pool
    }

    async fn seed_roles(pool: &sqlx::SqlitePool) {
        for (id, name, level) in
            [("role-supervisor", "Supervisor", 2), ("role-manager", "Manager", 3)]
        {
            sqlx::query(
                "INSERT INTO role (id, name, level, is_administrator, created_at)
                 VALUES (?, ?, ?, 0, '2026-01-01T00:00:00Z')",
            )
            .bind(id)
            .bind(name)
            .bind(level)
            .execute(pool)
            .await
            .expect("insert role");
        }
    }

    fn step(order: u32, role_id: &str, role_name: &str) -> ApprovalStep {
        ApprovalStep {
            step_order: order,
            step_name: format!("{role_name} review"),
            role_id: RoleId(role_id.to_string()),
            role_name: role_name.to_string(),
            is_required: true,
            can_override: false,
            override_min_level: None,
        }
    }

    fn template(id: &str, entity_type: EntityType, steps: Vec<ApprovalStep>) -> WorkflowTemplate {
        let now = Utc::now();
        WorkflowTemplate {
            id: TemplateId(id.to_string()),
            name: "Property Release".to_string(),
            description: "Release chain".to_string(),
            entity_type,
            is_active: true,
            steps,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_and_find_active_round_trips_steps_in_order() {
        let pool = setup().await;
        let repo = SqlWorkflowTemplateRepository::new(pool);

        let saved = repo
            .save(template(
                "wf-1",
                EntityType::PropertyRelease,
                vec![
                    step(2, "role-manager", "Manager"),
                    step(1, "role-supervisor", "Supervisor"),
                ],
            ))
            .await
            .expect("save template");

        // Steps were renumbered densely, preserving relative order.
        let orders: Vec<u32> = saved.steps.iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![1, 2]);

        let found = repo
            .find_active_by_entity_type(EntityType::PropertyRelease)
            .await
            .expect("find active")
            .expect("template exists");
        assert_eq!(found.id.0, "wf-1");
        assert_eq!(found.steps.len(), 2);
        assert_eq!(found.steps[0].role_name, "Supervisor");
        assert_eq!(found.steps[1].role_name, "Manager");
        assert!(found.validate_steps().is_ok());
    }

    #[tokio::test]
    async fn saving_an_active_template_deactivates_the_previous_one() {
        let pool = setup().await;
        let repo = SqlWorkflowTemplateRepository::new(pool);

        repo.save(template(
            "wf-old",
            EntityType::PropertyRelease,
            vec![step(1, "role-supervisor", "Supervisor")],
        ))
        .await
        .expect("save first");

        repo.save(template(
            "wf-new",
            EntityType::PropertyRelease,
            vec![step(1, "role-manager", "Manager")],
        ))
        .await
        .expect("save second");

        let active = repo
            .find_active_by_entity_type(EntityType::PropertyRelease)
            .await
            .expect("find active")
            .expect("one active template");
        assert_eq!(active.id.0, "wf-new");

        let old = repo
            .find_by_id(&TemplateId("wf-old".to_string()))
            .await
            .expect("find old")
            .expect("old template still exists");
        assert!(!old.is_active);
    }

    #[tokio::test]
    async fn sparse_step_orders_are_renumbered_on_save() {
        let pool = setup().await;
        let repo = SqlWorkflowTemplateRepository::new(pool);

        let saved = repo
            .save(template(
                "wf-sparse",
                EntityType::PropertyTurnover,
                vec![
                    step(10, "role-supervisor", "Supervisor"),
                    step(20, "role-manager", "Manager"),
                ],
            ))
            .await
            .expect("save template");

        assert!(saved.validate_steps().is_ok());

        let found = repo
            .find_by_id(&saved.id)
            .await
            .expect("find")
            .expect("exists");
        let orders: Vec<u32> = found.steps.iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![1, 2]);
    }
}
