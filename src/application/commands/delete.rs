use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{
    CommandData, CommandError, CommandOutcome, CommandScope, CommandStrategy, EMPTY_BULK_WHERE,
    RECORD_NOT_FOUND_TO_DELETE,
};
use crate::application::{error::ServiceError, events::EventAction, routes::BulkMode};
use crate::domain::{
    entities::{FIELD_IS_ACTIVE, FIELD_UPDATED_AT, now_rfc3339},
    types::CrudType,
};

pub(super) struct DeleteStrategy;

#[async_trait]
impl CommandStrategy for DeleteStrategy {
    fn crud(&self) -> CrudType {
        CrudType::Delete
    }

    fn build_command_clauses(&self, scope: &mut CommandScope<'_>) -> Result<(), CommandError> {
        if scope.where_clause.is_empty() {
            return Err(match scope.request.route.bulk {
                BulkMode::Single => ServiceError::not_found(RECORD_NOT_FOUND_TO_DELETE),
                _ => ServiceError::bad_request(EMPTY_BULK_WHERE),
            }
            .into());
        }
        scope.where_clause = std::mem::take(&mut scope.where_clause).active_only();
        Ok(())
    }

    async fn run_db_command(
        &self,
        scope: &CommandScope<'_>,
    ) -> Result<CommandOutcome, CommandError> {
        let kind = scope.kind();
        let removed = if scope.request.route.soft_delete {
            let mut changes = Map::new();
            changes.insert(FIELD_IS_ACTIVE.to_string(), Value::Bool(false));
            changes.insert(FIELD_UPDATED_AT.to_string(), Value::String(now_rfc3339()));
            scope
                .store()
                .update(kind, &scope.where_clause, &changes)
                .await?
        } else {
            scope.store().destroy(kind, &scope.where_clause).await?
        };
        if removed.is_empty() {
            return Err(ServiceError::not_found(RECORD_NOT_FOUND_TO_DELETE).into());
        }

        let affected = removed.len() as u64;
        let data = match scope.request.route.bulk {
            BulkMode::Single => removed
                .into_iter()
                .next()
                .map(CommandData::Record)
                .unwrap_or(CommandData::Null),
            _ => CommandData::Records(removed),
        };
        let mut outcome = CommandOutcome::from_db(data);
        outcome.previous = scope.request.instance.clone();
        outcome.affected_rows = Some(affected);
        Ok(outcome)
    }

    /// Exact invalidation when the prior state is known, otherwise the whole
    /// table namespace goes.
    async fn post_command(&self, scope: &CommandScope<'_>, outcome: &CommandOutcome) {
        let kind = scope.kind();
        let caches = &scope.services.caches;
        let removed = outcome.data.records();

        for record in &removed {
            if let Some(id) = record.id() {
                caches.entities.delete(kind, id).await;
                scope.services.search.remove_record(kind, id).await;
            }
        }
        match &outcome.previous {
            Some(previous) => {
                caches.invalidator.invalidate_records(kind, &[previous]).await;
            }
            None => {
                caches.invalidator.invalidate_namespace(kind).await;
            }
        }
    }

    async fn raise_db_event(&self, scope: &CommandScope<'_>, outcome: &CommandOutcome) {
        let payload = match (&outcome.data, scope.request.route.bulk) {
            (CommandData::Record(record), BulkMode::Single) => record.to_value(),
            _ => json!({
                "affectedRows": outcome.row_count(),
                "whereClause": scope.where_clause.to_json(),
            }),
        };
        scope
            .services
            .publisher
            .publish(
                scope.kind(),
                EventAction::Deleted,
                &payload,
                scope.session(),
                &scope.request.request_id,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::DbCommand;
    use super::super::test_support::{Harness, harness, request};
    use super::*;
    use crate::application::error::ServiceErrorKind;
    use crate::application::pagination::PageRequest;
    use crate::application::repos::{Condition, WhereClause};
    use crate::cache::{CachedPage, query_key};
    use crate::domain::entities::{EntityKind, EntityRecord};

    fn event(id: &str, user: &str) -> EntityRecord {
        EntityRecord::from_value(json!({
            "id": id, "_owner": user, "userId": user, "eventType": "view", "isActive": true
        }))
        .expect("record")
    }

    async fn cache_page(h: &Harness, filter: WhereClause, rows: Vec<EntityRecord>) -> String {
        let key = query_key(
            EntityKind::EngagementEvent,
            &filter,
            Some(&PageRequest::new(1, 10)),
            "",
        );
        let page = CachedPage {
            filter: filter.to_json(),
            total_row_count: rows.len() as u64,
            rows,
            paging: None,
            filters: None,
            ui_permissions: None,
        };
        h.services
            .caches
            .queries
            .write(EntityKind::EngagementEvent, &key, &page)
            .await;
        key
    }

    #[tokio::test]
    async fn missing_target_is_not_found_for_soft_and_hard_delete() {
        let h = harness();
        for route in ["deleteEngagementEvent", "deleteRecommendation"] {
            let mut ctx = request(route, "u1");
            ctx.id = Some("missing".into());
            ctx.where_clause = WhereClause::by_id("missing");
            let err = DbCommand::new(&h.services, CrudType::Delete)
                .execute(&ctx)
                .await
                .expect_err("nothing to delete");
            assert_eq!(err.kind(), ServiceErrorKind::NotFound);
            assert_eq!(err.error_code(), RECORD_NOT_FOUND_TO_DELETE);
        }
    }

    #[tokio::test]
    async fn known_prior_state_invalidates_only_matching_pages() {
        let h = harness();
        let target = event("e1", "u1");
        let bystander = event("e2", "u2");
        h.store.seed(EntityKind::EngagementEvent, target.clone());
        h.store.seed(EntityKind::EngagementEvent, bystander.clone());
        h.services
            .caches
            .entities
            .save(EntityKind::EngagementEvent, &target)
            .await;

        let own_page = cache_page(
            &h,
            WhereClause::new().with("userId", Condition::Eq(json!("u1"))),
            vec![target.clone()],
        )
        .await;
        let other_page = cache_page(
            &h,
            WhereClause::new().with("userId", Condition::Eq(json!("u2"))),
            vec![bystander],
        )
        .await;

        let mut ctx = request("deleteEngagementEvent", "u1");
        ctx.id = Some("e1".into());
        ctx.where_clause = WhereClause::by_id("e1");
        ctx.instance = Some(target);
        DbCommand::new(&h.services, CrudType::Delete)
            .execute(&ctx)
            .await
            .expect("delete");

        let caches = &h.services.caches;
        assert!(caches.entities.get(EntityKind::EngagementEvent, "e1").await.is_none());
        assert!(caches.queries.read(EntityKind::EngagementEvent, &own_page).await.is_none());
        assert!(caches.queries.read(EntityKind::EngagementEvent, &other_page).await.is_some());
        assert_eq!(h.bus.published("EngagementeventDeletedTopic").len(), 1);
    }

    #[tokio::test]
    async fn unknown_prior_state_flushes_the_namespace() {
        let h = harness();
        h.store.seed(EntityKind::EngagementEvent, event("e1", "u1"));
        h.store.seed(EntityKind::EngagementEvent, event("e2", "u1"));
        let unrelated = cache_page(
            &h,
            WhereClause::new().with("userId", Condition::Eq(json!("u9"))),
            Vec::new(),
        )
        .await;

        let mut ctx = request("deleteEngagementEvents", "u1");
        ctx.where_clause = WhereClause::new().with("userId", Condition::Eq(json!("u1")));
        let outcome = DbCommand::new(&h.services, CrudType::Delete)
            .execute(&ctx)
            .await
            .expect("bulk delete");
        assert_eq!(outcome.row_count(), 2);
        assert!(
            h.services
                .caches
                .queries
                .read(EntityKind::EngagementEvent, &unrelated)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn hard_delete_removes_the_row() {
        let h = harness();
        h.store.seed(
            EntityKind::Recommendation,
            EntityRecord::from_value(json!({"id": "rec1", "userId": "u1", "bookIds": []}))
                .expect("record"),
        );
        let mut ctx = request("deleteRecommendation", "u1");
        ctx.id = Some("rec1".into());
        ctx.where_clause = WhereClause::by_id("rec1");
        DbCommand::new(&h.services, CrudType::Delete)
            .execute(&ctx)
            .await
            .expect("delete");
        assert_eq!(h.store.len(EntityKind::Recommendation), 0);
    }
}
