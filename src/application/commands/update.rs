use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::warn;

use super::{
    CommandData, CommandError, CommandOutcome, CommandScope, CommandStrategy, EMPTY_BULK_UPDATE,
    EMPTY_BULK_WHERE, RECORD_NOT_FOUND_TO_UPDATE,
};
use crate::application::{
    error::ServiceError, events::EventAction, repos::WhereClause, routes::BulkMode,
};
use crate::domain::{
    entities::{EntityRecord, FIELD_ID, FIELD_UPDATED_AT, diff_records, now_rfc3339},
    types::CrudType,
    validation::validate_data,
};

pub(super) struct UpdateStrategy;

struct UpdatedPair {
    previous: EntityRecord,
    current: EntityRecord,
}

fn stamped(changes: &Map<String, Value>) -> Map<String, Value> {
    let mut changes = changes.clone();
    changes.remove(FIELD_ID);
    changes.insert(FIELD_UPDATED_AT.to_string(), Value::String(now_rfc3339()));
    changes
}

/// Write `changes` to one active record and return both states.
async fn update_one(
    scope: &CommandScope<'_>,
    filter: &WhereClause,
    known: Option<EntityRecord>,
    changes: &Map<String, Value>,
) -> Result<UpdatedPair, CommandError> {
    let kind = scope.kind();
    let filter = filter.clone().active_only();
    let previous = match known {
        Some(previous) => previous,
        None => scope
            .store()
            .find_one(kind, &filter)
            .await?
            .ok_or_else(|| ServiceError::not_found(RECORD_NOT_FOUND_TO_UPDATE))?,
    };
    let current = scope
        .store()
        .update(kind, &filter, &stamped(changes))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::not_found(RECORD_NOT_FOUND_TO_UPDATE))?;
    Ok(UpdatedPair { previous, current })
}

/// Both the old and the new state may sit in cached pages.
async fn refresh_caches(scope: &CommandScope<'_>, pair: &UpdatedPair) {
    let kind = scope.kind();
    let caches = &scope.services.caches;
    caches
        .invalidator
        .invalidate_records(kind, &[&pair.previous, &pair.current])
        .await;
    if let Some(id) = pair.current.id() {
        caches.entities.delete(kind, id).await;
    }
    caches.entities.save(kind, &pair.current).await;
    scope.services.search.index_record(kind, &pair.current).await;
}

fn single_event(scope: &CommandScope<'_>, pair: &UpdatedPair) -> Value {
    let name = scope.kind().name();
    let (old_values, new_values) = diff_records(&pair.previous, &pair.current);
    let mut payload = Map::new();
    payload.insert(format!("old_{name}"), pair.previous.to_value());
    payload.insert(name.to_string(), pair.current.to_value());
    payload.insert("oldDataValues".to_string(), Value::Object(old_values));
    payload.insert("newDataValues".to_string(), Value::Object(new_values));
    Value::Object(payload)
}

async fn publish_updated(scope: &CommandScope<'_>, payload: &Value) {
    scope
        .services
        .publisher
        .publish(
            scope.kind(),
            EventAction::Updated,
            payload,
            scope.session(),
            &scope.request.request_id,
        )
        .await;
}

impl UpdateStrategy {
    async fn update_single(
        &self,
        scope: &CommandScope<'_>,
    ) -> Result<CommandOutcome, CommandError> {
        let pair = update_one(
            scope,
            &scope.where_clause,
            scope.request.instance.clone(),
            &scope.data_clause,
        )
        .await?;
        let (old_values, new_values) = diff_records(&pair.previous, &pair.current);
        let mut outcome = CommandOutcome::from_db(CommandData::Record(pair.current));
        outcome.previous = Some(pair.previous);
        outcome.old_values = Some(old_values);
        outcome.new_values = Some(new_values);
        Ok(outcome)
    }

    async fn update_batch(
        &self,
        scope: &CommandScope<'_>,
    ) -> Result<CommandOutcome, CommandError> {
        let filter = scope.where_clause.clone().active_only();
        let rows = scope
            .store()
            .update(scope.kind(), &filter, &stamped(&scope.data_clause))
            .await?;
        let affected = rows.len() as u64;
        let mut outcome = CommandOutcome::from_db(CommandData::Records(rows));
        outcome.affected_rows = Some(affected);
        Ok(outcome)
    }

    /// Items run sequentially; each carries its own cache and event side
    /// effects. Silent mode drops failed items from the result.
    async fn update_each(
        &self,
        scope: &CommandScope<'_>,
        silent: bool,
    ) -> Result<CommandOutcome, CommandError> {
        let mut updated = Vec::with_capacity(scope.request.items.len());
        for item in &scope.request.items {
            match self.update_item(scope, item).await {
                Ok(pair) => {
                    refresh_caches(scope, &pair).await;
                    publish_updated(scope, &single_event(scope, &pair)).await;
                    updated.push(pair.current);
                }
                Err(err) if silent => {
                    let item_id = item
                        .get(FIELD_ID)
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("");
                    warn!(
                        target = "review_engagement::commands",
                        request_id = %scope.request.request_id,
                        route = scope.request.route.name,
                        item = item_id,
                        error = %err,
                        "Dropped failed bulk update item"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        let affected = updated.len() as u64;
        let mut outcome = CommandOutcome::from_db(CommandData::Records(updated));
        outcome.affected_rows = Some(affected);
        Ok(outcome)
    }

    async fn update_item(
        &self,
        scope: &CommandScope<'_>,
        item: &Map<String, Value>,
    ) -> Result<UpdatedPair, CommandError> {
        let id = item
            .get(FIELD_ID)
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::validation("every bulk item needs an `id`"))?;

        // Shared changes first, the item's own fields on top.
        let writable = scope.kind().writable_fields();
        let mut changes = scope.data_clause.clone();
        for (field, value) in item {
            if writable.contains(&field.as_str()) {
                changes.insert(field.clone(), value.clone());
            }
        }
        if changes.is_empty() {
            return Err(ServiceError::bad_request(EMPTY_BULK_UPDATE).into());
        }
        validate_data(scope.kind(), &changes, false)?;

        update_one(scope, &WhereClause::by_id(id), None, &changes).await
    }
}

#[async_trait]
impl CommandStrategy for UpdateStrategy {
    fn crud(&self) -> CrudType {
        CrudType::Update
    }

    fn build_command_clauses(&self, scope: &mut CommandScope<'_>) -> Result<(), CommandError> {
        scope.retain_writable();
        scope.data_clause.remove(FIELD_ID);
        match scope.request.route.bulk {
            BulkMode::Single => {
                if scope.data_clause.is_empty() {
                    return Err(ServiceError::not_found(RECORD_NOT_FOUND_TO_UPDATE).into());
                }
            }
            BulkMode::Batch => {
                if scope.data_clause.is_empty() {
                    return Err(ServiceError::bad_request(EMPTY_BULK_UPDATE).into());
                }
                if scope.where_clause.is_empty() {
                    return Err(ServiceError::bad_request(EMPTY_BULK_WHERE).into());
                }
            }
            BulkMode::Each { .. } => {
                if scope.request.items.is_empty() && scope.data_clause.is_empty() {
                    return Err(ServiceError::bad_request(EMPTY_BULK_UPDATE).into());
                }
            }
        }
        validate_data(scope.kind(), &scope.data_clause, false)?;
        Ok(())
    }

    async fn run_db_command(
        &self,
        scope: &CommandScope<'_>,
    ) -> Result<CommandOutcome, CommandError> {
        match scope.request.route.bulk {
            BulkMode::Single => self.update_single(scope).await,
            BulkMode::Batch => self.update_batch(scope).await,
            BulkMode::Each { silent } => self.update_each(scope, silent).await,
        }
    }

    async fn post_command(&self, scope: &CommandScope<'_>, outcome: &CommandOutcome) {
        let kind = scope.kind();
        let caches = &scope.services.caches;
        match (scope.request.route.bulk, &outcome.data, &outcome.previous) {
            (BulkMode::Single, CommandData::Record(current), Some(previous)) => {
                let pair = UpdatedPair {
                    previous: previous.clone(),
                    current: current.clone(),
                };
                refresh_caches(scope, &pair).await;
            }
            (BulkMode::Batch, CommandData::Records(rows), _) => {
                caches.invalidator.invalidate_namespace(kind).await;
                for row in rows {
                    if let Some(id) = row.id() {
                        caches.entities.delete(kind, id).await;
                    }
                    caches.entities.save(kind, row).await;
                    scope.services.search.index_record(kind, row).await;
                }
            }
            _ => {}
        }
    }

    async fn raise_db_event(&self, scope: &CommandScope<'_>, outcome: &CommandOutcome) {
        let payload = match (scope.request.route.bulk, &outcome.data, &outcome.previous) {
            (BulkMode::Single, CommandData::Record(current), Some(previous)) => single_event(
                scope,
                &UpdatedPair {
                    previous: previous.clone(),
                    current: current.clone(),
                },
            ),
            (BulkMode::Batch, _, _) => json!({
                "affectedRows": outcome.affected_rows.unwrap_or(0),
                "whereClause": scope.where_clause.to_json(),
                "dataClause": Value::Object(scope.data_clause.clone()),
            }),
            _ => return,
        };
        publish_updated(scope, &payload).await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::DbCommand;
    use super::super::test_support::{Harness, harness, object, request};
    use super::*;
    use crate::application::error::ServiceErrorKind;
    use crate::application::repos::Condition;
    use crate::domain::entities::EntityKind;

    fn seed(h: &Harness, id: &str, status: &str) {
        h.store.seed(
            EntityKind::Review,
            EntityRecord::from_value(json!({
                "id": id, "_owner": "u1", "bookId": "b1", "rating": 4,
                "status": status, "isActive": true
            }))
            .expect("record"),
        );
    }

    #[tokio::test]
    async fn single_update_reports_diffs_and_publishes() {
        let h = harness();
        seed(&h, "r1", "PENDING");
        let mut ctx = request("updateReview", "u1");
        ctx.id = Some("r1".into());
        ctx.where_clause = WhereClause::by_id("r1");
        ctx.data_clause = object(json!({"status": "APPROVED"}));

        let outcome = DbCommand::new(&h.services, CrudType::Update)
            .execute(&ctx)
            .await
            .expect("update");
        assert_eq!(outcome.old_values, Some(object(json!({"status": "PENDING"}))));
        assert_eq!(outcome.new_values, Some(object(json!({"status": "APPROVED"}))));

        let events = h.bus.published_json("ReviewUpdatedTopic");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["data"]["old_review"]["status"], "PENDING");
        assert_eq!(events[0]["data"]["newDataValues"]["status"], "APPROVED");
    }

    #[tokio::test]
    async fn empty_single_update_is_not_found() {
        let h = harness();
        seed(&h, "r1", "PENDING");
        let mut ctx = request("updateReview", "u1");
        ctx.id = Some("r1".into());
        ctx.where_clause = WhereClause::by_id("r1");
        ctx.data_clause = object(json!({"unknownField": 1}));

        let err = DbCommand::new(&h.services, CrudType::Update)
            .execute(&ctx)
            .await
            .expect_err("empty update");
        assert_eq!(err.kind(), ServiceErrorKind::NotFound);
        assert_eq!(err.error_code(), RECORD_NOT_FOUND_TO_UPDATE);
    }

    #[tokio::test]
    async fn empty_update_each_is_bad_request() {
        let h = harness();
        let ctx = request("moderateReviews", "u1");
        let err = DbCommand::new(&h.services, CrudType::Update)
            .execute(&ctx)
            .await
            .expect_err("empty bulk");
        assert_eq!(err.kind(), ServiceErrorKind::BadRequest);
        assert_eq!(err.error_code(), EMPTY_BULK_UPDATE);
    }

    #[tokio::test]
    async fn loud_update_each_raises_item_failures() {
        let h = harness();
        seed(&h, "r1", "PENDING");
        let mut ctx = request("moderateReviews", "u1");
        ctx.items = vec![
            object(json!({"id": "r1", "status": "APPROVED"})),
            object(json!({"id": "missing", "status": "APPROVED"})),
        ];
        let err = DbCommand::new(&h.services, CrudType::Update)
            .execute(&ctx)
            .await
            .expect_err("missing item");
        assert_eq!(err.kind(), ServiceErrorKind::NotFound);
        // The first item already committed and announced itself.
        assert_eq!(h.bus.published("ReviewUpdatedTopic").len(), 1);
    }

    #[tokio::test]
    async fn silent_update_each_drops_failed_items() {
        let h = harness();
        h.store.seed(
            EntityKind::Recommendation,
            EntityRecord::from_value(json!({
                "id": "rec1", "userId": "u1", "bookIds": ["b1"], "isActive": true
            }))
            .expect("record"),
        );
        let mut ctx = request("refreshRecommendations", "u1");
        ctx.items = vec![
            object(json!({"id": "rec1", "bookIds": ["b2"]})),
            object(json!({"id": "gone", "bookIds": ["b3"]})),
            object(json!({"id": "rec1", "bookIds": "not-a-list"})),
        ];
        let outcome = DbCommand::new(&h.services, CrudType::Update)
            .execute(&ctx)
            .await
            .expect("silent bulk");
        assert_eq!(outcome.row_count(), 1);
        assert_eq!(outcome.data.to_value()[0]["bookIds"], json!(["b2"]));
    }

    #[tokio::test]
    async fn batch_update_flushes_and_reports_affected_rows() {
        let h = harness();
        seed(&h, "r1", "PENDING");
        seed(&h, "r2", "PENDING");
        seed(&h, "r3", "APPROVED");
        let mut ctx = request("updateReviewsBulk", "u1");
        ctx.where_clause = WhereClause::new().with("status", Condition::Eq(json!("PENDING")));
        ctx.data_clause = object(json!({"status": "REJECTED"}));

        let outcome = DbCommand::new(&h.services, CrudType::Update)
            .execute(&ctx)
            .await
            .expect("batch");
        assert_eq!(outcome.affected_rows, Some(2));
        let events = h.bus.published_json("ReviewUpdatedTopic");
        assert_eq!(events[0]["data"]["affectedRows"], 2);
        assert_eq!(events[0]["data"]["dataClause"]["status"], "REJECTED");
    }

    #[tokio::test]
    async fn empty_batch_update_is_bad_request() {
        let h = harness();
        let mut ctx = request("updateReviewsBulk", "u1");
        ctx.where_clause = WhereClause::new().with("status", Condition::Eq(json!("PENDING")));
        let err = DbCommand::new(&h.services, CrudType::Update)
            .execute(&ctx)
            .await
            .expect_err("empty data");
        assert_eq!(err.error_code(), EMPTY_BULK_UPDATE);
    }
}
