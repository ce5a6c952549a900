use keyturn_core::audit::{AuditEvent, AuditSink};

use crate::DbPool;

/// Audit sink backed by the `audit_event` table. Writes happen off the
/// caller's transaction: the audit trail records what the workflow core
/// decided, it does not gate it.
#[derive(Clone)]
pub struct SqlAuditSink {
    pool: DbPool,
}

impl SqlAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn write(pool: &DbPool, event: &AuditEvent) -> Result<(), sqlx::Error> {
        let metadata_json =
            serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".to_string());

        sqlx::query(
            "INSERT INTO audit_event
                 (id, entity_type, entity_id, request_id, correlation_id, event_type,
                  category, actor, outcome, metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(event.entity_type.map(|entity_type| entity_type.as_str()))
        .bind(event.entity_id.as_deref())
        .bind(event.request_id.as_ref().map(|id| id.0.as_str()))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(event.category.as_str())
        .bind(&event.actor)
        .bind(event.outcome.as_str())
        .bind(metadata_json)
        .bind(event.occurred_at.to_rfc3339())
        .execute(pool)
        .await?;

        Ok(())
    }
}

impl AuditSink for SqlAuditSink {
    fn emit(&self, event: AuditEvent) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(error) = Self::write(&pool, &event).await {
                tracing::warn!(
                    event_name = "audit.write_failed",
                    event_type = %event.event_type,
                    error = %error,
                    "failed to persist audit event"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use keyturn_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
    use keyturn_core::domain::request::RequestId;
    use keyturn_core::domain::workflow::EntityType;
    use sqlx::Row;

    use super::SqlAuditSink;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn write_persists_the_full_audit_record() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let context = AuditContext::new(
            Some(RequestId("req-1".to_string())),
            Some(EntityType::PropertyRelease),
            Some("mov-1".to_string()),
            "corr-9",
            "u-supervisor",
        );
        let event = AuditEvent::new(
            &context,
            "request.step_approved",
            AuditCategory::Workflow,
            AuditOutcome::Success,
        )
        .with_metadata("step_order", "1");

        SqlAuditSink::write(&pool, &event).await.expect("write audit event");

        let row = sqlx::query(
            "SELECT request_id, entity_type, event_type, category, outcome, metadata_json
             FROM audit_event WHERE id = ?",
        )
        .bind(&event.event_id)
        .fetch_one(&pool)
        .await
        .expect("read back");

        assert_eq!(row.get::<String, _>("request_id"), "req-1");
        assert_eq!(row.get::<String, _>("entity_type"), "property_release");
        assert_eq!(row.get::<String, _>("event_type"), "request.step_approved");
        assert_eq!(row.get::<String, _>("category"), "workflow");
        assert_eq!(row.get::<String, _>("outcome"), "success");
        assert!(row.get::<String, _>("metadata_json").contains("step_order"));
    }
}
