use async_trait::async_trait;
use serde_json::Value;

use super::{
    CommandData, CommandError, CommandOutcome, CommandScope, CommandStrategy, NOT_OWNER,
    RECORD_NOT_FOUND, ResultSource,
};
use crate::application::{
    error::ServiceError,
    repos::{Condition, FindOptions, SortKey, WhereClause},
};
use crate::domain::{
    entities::{EntityKind, EntityRecord, FIELD_CREATED_AT},
    types::CrudType,
};

/// Related rows attached to a single read.
const JOIN_LIMIT: u64 = 20;

pub(super) struct GetStrategy;

/// Field carrying the read-side join for `kind`, if it has one.
fn join_field(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Review => Some("engagementEvents"),
        EntityKind::Recommendation => Some("reviews"),
        EntityKind::EngagementEvent => None,
    }
}

async fn join_related(
    scope: &CommandScope<'_>,
    mut record: EntityRecord,
) -> Result<EntityRecord, CommandError> {
    if scope.request.route.exclude_cqrs {
        return Ok(record);
    }
    let (related_kind, filter) = match scope.kind() {
        EntityKind::Review => match record.get("bookId") {
            Some(book) if !book.is_null() => (
                EntityKind::EngagementEvent,
                WhereClause::new().with("bookId", Condition::Eq(book.clone())),
            ),
            _ => return Ok(record),
        },
        EntityKind::Recommendation => match record.get("bookIds") {
            Some(Value::Array(books)) if !books.is_empty() => (
                EntityKind::Review,
                WhereClause::new().with("bookId", Condition::In(books.clone())),
            ),
            _ => return Ok(record),
        },
        EntityKind::EngagementEvent => return Ok(record),
    };

    let options = FindOptions {
        offset: 0,
        limit: Some(JOIN_LIMIT),
        sort: vec![SortKey {
            field: FIELD_CREATED_AT.to_string(),
            descending: true,
        }],
    };
    let related = scope
        .store()
        .find_many(related_kind, &filter.active_only(), &options)
        .await?;
    if let Some(field) = join_field(scope.kind()) {
        record.set(
            field,
            Value::Array(related.into_iter().map(EntityRecord::into_value).collect()),
        );
    }
    Ok(record)
}

#[async_trait]
impl CommandStrategy for GetStrategy {
    fn crud(&self) -> CrudType {
        CrudType::Get
    }

    async fn pre_command(
        &self,
        scope: &CommandScope<'_>,
    ) -> Result<Option<CommandOutcome>, CommandError> {
        let Some(id) = scope.target_id() else {
            return Ok(None);
        };
        let Some(record) = scope.services.caches.entities.get(scope.kind(), &id).await else {
            return Ok(None);
        };
        if !record.is_active() {
            return Ok(None);
        }
        if !scope.request.may_access(&record) {
            return Err(ServiceError::forbidden(NOT_OWNER).into());
        }
        Ok(Some(CommandOutcome::new(
            CommandData::Record(record),
            ResultSource::EntityCache,
        )))
    }

    async fn run_db_command(
        &self,
        scope: &CommandScope<'_>,
    ) -> Result<CommandOutcome, CommandError> {
        let filter = scope.where_clause.clone().active_only();
        match scope.store().find_one(scope.kind(), &filter).await? {
            Some(record) => {
                let record = join_related(scope, record).await?;
                Ok(CommandOutcome::from_db(CommandData::Record(record)))
            }
            None if scope.request.route.null_result => {
                Ok(CommandOutcome::from_db(CommandData::Null))
            }
            None => Err(ServiceError::not_found(RECORD_NOT_FOUND).into()),
        }
    }

    async fn post_command(&self, scope: &CommandScope<'_>, outcome: &CommandOutcome) {
        if outcome.source != ResultSource::Db {
            return;
        }
        let CommandData::Record(record) = &outcome.data else {
            return;
        };
        let mut cached = record.clone();
        if let Some(field) = join_field(scope.kind()) {
            cached.remove(field);
        }
        scope
            .services
            .caches
            .entities
            .save(scope.kind(), &cached)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::DbCommand;
    use super::super::test_support::{harness, request};
    use super::*;
    use crate::application::error::ServiceErrorKind;

    fn review(id: &str, owner: &str) -> EntityRecord {
        EntityRecord::from_value(json!({
            "id": id, "_owner": owner, "bookId": "b1", "rating": 5,
            "status": "APPROVED", "isActive": true
        }))
        .expect("record")
    }

    #[tokio::test]
    async fn cache_hit_never_touches_the_store() {
        let h = harness();
        h.services
            .caches
            .entities
            .save(EntityKind::Review, &review("r1", "u1"))
            .await;

        let mut ctx = request("getReview", "u2");
        ctx.id = Some("r1".into());
        ctx.where_clause = WhereClause::by_id("r1");
        let outcome = DbCommand::new(&h.services, CrudType::Get)
            .execute(&ctx)
            .await
            .expect("get");
        assert_eq!(outcome.source, ResultSource::EntityCache);
        assert_eq!(h.store.calls(), 0);
    }

    #[tokio::test]
    async fn cache_hit_enforces_ownership() {
        let h = harness();
        let event = EntityRecord::from_value(json!({
            "id": "e1", "_owner": "u1", "userId": "u1", "eventType": "view"
        }))
        .expect("record");
        h.services
            .caches
            .entities
            .save(EntityKind::EngagementEvent, &event)
            .await;

        let mut ctx = request("getEngagementEvent", "u2");
        ctx.id = Some("e1".into());
        ctx.where_clause = WhereClause::by_id("e1");
        let err = DbCommand::new(&h.services, CrudType::Get)
            .execute(&ctx)
            .await
            .expect_err("not owner");
        assert_eq!(err.kind(), ServiceErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn miss_joins_related_rows_and_caches_the_bare_record() {
        let h = harness();
        h.store.seed(EntityKind::Review, review("r1", "u1"));
        h.store.seed(
            EntityKind::EngagementEvent,
            EntityRecord::from_value(json!({
                "id": "e1", "bookId": "b1", "userId": "u3", "eventType": "view"
            }))
            .expect("record"),
        );

        let mut ctx = request("getReview", "u2");
        ctx.id = Some("r1".into());
        ctx.where_clause = WhereClause::by_id("r1");
        let outcome = DbCommand::new(&h.services, CrudType::Get)
            .execute(&ctx)
            .await
            .expect("get");
        assert_eq!(outcome.source, ResultSource::Db);
        let value = outcome.data.to_value();
        assert_eq!(value["engagementEvents"][0]["id"], "e1");

        let cached = h
            .services
            .caches
            .entities
            .get(EntityKind::Review, "r1")
            .await
            .expect("cached");
        assert!(cached.get("engagementEvents").is_none());
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_not_found() {
        let h = harness();
        let mut deleted = review("r1", "u1");
        deleted.set("isActive", json!(false));
        h.store.seed(EntityKind::Review, deleted);

        let mut ctx = request("getReview", "u1");
        ctx.id = Some("r1".into());
        ctx.where_clause = WhereClause::by_id("r1");
        let err = DbCommand::new(&h.services, CrudType::Get)
            .execute(&ctx)
            .await
            .expect_err("soft deleted");
        assert_eq!(err.kind(), ServiceErrorKind::NotFound);
        assert_eq!(err.error_code(), RECORD_NOT_FOUND);
    }

    #[tokio::test]
    async fn nullable_routes_answer_null_on_miss() {
        let h = harness();
        let mut ctx = request("getEngagementEvent", "u1");
        ctx.id = Some("missing".into());
        ctx.where_clause = WhereClause::by_id("missing");
        let outcome = DbCommand::new(&h.services, CrudType::Get)
            .execute(&ctx)
            .await
            .expect("null result");
        assert_eq!(outcome.data, CommandData::Null);
    }
}
