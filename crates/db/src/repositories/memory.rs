use std::collections::HashMap;

use tokio::sync::RwLock;

use keyturn_core::domain::workflow::{
    normalize_step_orders, EntityType, TemplateId, WorkflowTemplate,
};

use super::{RepositoryError, WorkflowTemplateRepository};

/// Test double mirroring the SQL template repository's contract, including
/// step renumbering and single-active-per-entity-type on save.
#[derive(Default)]
pub struct InMemoryWorkflowTemplateRepository {
    templates: RwLock<HashMap<String, WorkflowTemplate>>,
}

#[async_trait::async_trait]
impl WorkflowTemplateRepository for InMemoryWorkflowTemplateRepository {
    async fn find_active_by_entity_type(
        &self,
        entity_type: EntityType,
    ) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        let templates = self.templates.read().await;
        Ok(templates
            .values()
            .find(|template| template.entity_type == entity_type && template.is_active)
            .cloned())
    }

    async fn find_by_id(
        &self,
        id: &TemplateId,
    ) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        let templates = self.templates.read().await;
        Ok(templates.get(&id.0).cloned())
    }

    async fn save(
        &self,
        mut template: WorkflowTemplate,
    ) -> Result<WorkflowTemplate, RepositoryError> {
        normalize_step_orders(&mut template.steps);

        let mut templates = self.templates.write().await;
        if template.is_active {
            for other in templates.values_mut() {
                if other.entity_type == template.entity_type && other.id != template.id {
                    other.is_active = false;
                }
            }
        }
        templates.insert(template.id.0.clone(), template.clone());
        Ok(template)
    }
}
