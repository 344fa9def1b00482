use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{CommandData, CommandError, CommandOutcome, CommandScope, CommandStrategy};
use crate::application::events::EventAction;
use crate::domain::{
    entities::{
        EntityRecord, FIELD_CREATED_AT, FIELD_ID, FIELD_IS_ACTIVE, FIELD_OWNER, FIELD_TENANT,
        FIELD_UPDATED_AT, now_rfc3339,
    },
    types::CrudType,
    validation::validate_data,
};

pub(super) struct CreateStrategy;

#[async_trait]
impl CommandStrategy for CreateStrategy {
    fn crud(&self) -> CrudType {
        CrudType::Create
    }

    fn build_command_clauses(&self, scope: &mut CommandScope<'_>) -> Result<(), CommandError> {
        scope.retain_writable();
        validate_data(scope.kind(), &scope.data_clause, true)?;
        Ok(())
    }

    async fn run_db_command(
        &self,
        scope: &CommandScope<'_>,
    ) -> Result<CommandOutcome, CommandError> {
        let mut record = EntityRecord::new(scope.data_clause.clone());
        if record.id().is_none() {
            record.set(FIELD_ID, Value::String(Uuid::new_v4().to_string()));
        }
        if let Some(user) = scope.request.user_id() {
            record.set(FIELD_OWNER, Value::String(user.to_string()));
        }
        if let Some(tenant) = scope.session().and_then(|s| s.tenant_id.clone()) {
            record.set(FIELD_TENANT, Value::String(tenant));
        }
        if record.get(FIELD_IS_ACTIVE).is_none() {
            record.set(FIELD_IS_ACTIVE, Value::Bool(true));
        }
        let now = now_rfc3339();
        record.set(FIELD_CREATED_AT, Value::String(now.clone()));
        record.set(FIELD_UPDATED_AT, Value::String(now));

        let created = scope.store().create(scope.kind(), record).await?;
        Ok(CommandOutcome::from_db(CommandData::Record(created)))
    }

    async fn post_command(&self, scope: &CommandScope<'_>, outcome: &CommandOutcome) {
        let CommandData::Record(record) = &outcome.data else {
            return;
        };
        let kind = scope.kind();
        let caches = &scope.services.caches;
        caches.entities.save(kind, record).await;
        caches.invalidator.invalidate_namespace(kind).await;
        scope.services.search.index_record(kind, record).await;
    }

    async fn raise_db_event(&self, scope: &CommandScope<'_>, outcome: &CommandOutcome) {
        let CommandData::Record(record) = &outcome.data else {
            return;
        };
        scope
            .services
            .publisher
            .publish(
                scope.kind(),
                EventAction::Created,
                &record.to_value(),
                scope.session(),
                &scope.request.request_id,
            )
            .await;
    }
}
