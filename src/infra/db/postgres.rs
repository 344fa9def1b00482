//! Postgres entity store. Every table keeps the record as `jsonb` next to the
//! columns the service filters on directly.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{Postgres, QueryBuilder, query, types::Json};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{PostgresRepositories, map_sqlx_error};
use crate::application::repos::{Condition, EntityStore, FindOptions, RepoError, WhereClause};
use crate::domain::entities::{
    EntityKind, EntityRecord, FIELD_ID, FIELD_IS_ACTIVE, FIELD_OWNER, FIELD_TENANT,
};

fn push_filter<'q>(qb: &mut QueryBuilder<'q, Postgres>, filter: &'q WhereClause) {
    qb.push(" WHERE TRUE");
    for (field, condition) in filter.conditions() {
        qb.push(" AND ");
        if field == FIELD_IS_ACTIVE
            && let Condition::Eq(Value::Bool(active)) = condition
        {
            qb.push("is_active = ");
            qb.push_bind(*active);
            continue;
        }
        push_condition(qb, field, condition);
    }
}

fn push_condition<'q>(qb: &mut QueryBuilder<'q, Postgres>, field: &'q str, condition: &'q Condition) {
    match condition {
        Condition::Eq(value) => {
            qb.push("data -> ");
            qb.push_bind(field);
            qb.push(" = ");
            qb.push_bind(Json(value));
        }
        Condition::Ne(value) => {
            qb.push("data -> ");
            qb.push_bind(field);
            qb.push(" IS DISTINCT FROM ");
            qb.push_bind(Json(value));
        }
        Condition::In(values) => {
            qb.push("(");
            qb.push_bind(Json(values));
            qb.push("::jsonb @> jsonb_build_array(data -> ");
            qb.push_bind(field);
            qb.push("))");
        }
        Condition::Gt(bound) => push_range(qb, field, ">", bound),
        Condition::Gte(bound) => push_range(qb, field, ">=", bound),
        Condition::Lt(bound) => push_range(qb, field, "<", bound),
        Condition::Lte(bound) => push_range(qb, field, "<=", bound),
        Condition::Like(pattern) => {
            qb.push("data ->> ");
            qb.push_bind(field);
            qb.push(" LIKE ");
            qb.push_bind(pattern.as_str());
        }
        Condition::Contains(value) => {
            qb.push("data -> ");
            qb.push_bind(field);
            qb.push(" @> jsonb_build_array(");
            qb.push_bind(Json(value));
            qb.push("::jsonb)");
        }
    }
}

/// Numbers compare numerically; everything else as text.
fn push_range<'q>(
    qb: &mut QueryBuilder<'q, Postgres>,
    field: &'q str,
    operator: &'static str,
    bound: &'q Value,
) {
    match bound.as_f64() {
        Some(number) => {
            qb.push("(data ->> ");
            qb.push_bind(field);
            qb.push(")::double precision ");
            qb.push(operator);
            qb.push(" ");
            qb.push_bind(number);
        }
        None => {
            qb.push("data ->> ");
            qb.push_bind(field);
            qb.push(" ");
            qb.push(operator);
            qb.push(" ");
            qb.push_bind(bound.as_str().unwrap_or_default());
        }
    }
}

fn push_options<'q>(qb: &mut QueryBuilder<'q, Postgres>, options: &'q FindOptions) {
    if options.sort.is_empty() {
        qb.push(" ORDER BY created_at");
    } else {
        qb.push(" ORDER BY ");
        let mut separated = qb.separated(", ");
        for key in &options.sort {
            separated.push("data -> ");
            separated.push_bind_unseparated(key.field.as_str());
            separated.push_unseparated(if key.descending { " DESC" } else { " ASC" });
        }
    }
    if let Some(limit) = options.limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if options.offset > 0 {
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(options.offset).unwrap_or(i64::MAX));
    }
}

fn into_records(rows: Vec<Json<Value>>) -> Vec<EntityRecord> {
    rows.into_iter()
        .filter_map(|Json(value)| EntityRecord::from_value(value))
        .collect()
}

fn record_id(record: &EntityRecord) -> Result<Uuid, RepoError> {
    let id = record.id().ok_or_else(|| RepoError::InvalidInput {
        message: "record has no id".to_string(),
    })?;
    Uuid::parse_str(id).map_err(|err| RepoError::InvalidInput {
        message: format!("`{FIELD_ID}` must be a uuid: {err}"),
    })
}

#[async_trait]
impl EntityStore for PostgresRepositories {
    async fn find_one(
        &self,
        kind: EntityKind,
        filter: &WhereClause,
    ) -> Result<Option<EntityRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!("SELECT data FROM {}", kind.table()));
        push_filter(&mut qb, filter);
        qb.push(" LIMIT 1");
        let row = qb
            .build_query_scalar::<Json<Value>>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.and_then(|Json(value)| EntityRecord::from_value(value)))
    }

    async fn find_many(
        &self,
        kind: EntityKind,
        filter: &WhereClause,
        options: &FindOptions,
    ) -> Result<Vec<EntityRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!("SELECT data FROM {}", kind.table()));
        push_filter(&mut qb, filter);
        push_options(&mut qb, options);
        let rows = qb
            .build_query_scalar::<Json<Value>>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(into_records(rows))
    }

    async fn count(&self, kind: EntityKind, filter: &WhereClause) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", kind.table()));
        push_filter(&mut qb, filter);
        let total = qb
            .build_query_scalar::<i64>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::convert_count(total)
    }

    async fn create(
        &self,
        kind: EntityKind,
        record: EntityRecord,
    ) -> Result<EntityRecord, RepoError> {
        let id = record_id(&record)?;
        let now = OffsetDateTime::now_utc();
        let sql = format!(
            "INSERT INTO {} (id, data, is_active, owner_id, tenant_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) RETURNING data",
            kind.table()
        );
        let Json(stored) = sqlx::query_scalar::<_, Json<Value>>(&sql)
            .bind(id)
            .bind(Json(record.fields()))
            .bind(record.is_active())
            .bind(record.get(FIELD_OWNER).and_then(Value::as_str))
            .bind(record.get(FIELD_TENANT).and_then(Value::as_str))
            .bind(now)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        EntityRecord::from_value(stored).ok_or_else(|| RepoError::Integrity {
            message: "stored row is not an object".to_string(),
        })
    }

    async fn update(
        &self,
        kind: EntityKind,
        filter: &WhereClause,
        changes: &Map<String, Value>,
    ) -> Result<Vec<EntityRecord>, RepoError> {
        let active = changes.get(FIELD_IS_ACTIVE).and_then(Value::as_bool);
        let mut qb = QueryBuilder::new(format!("UPDATE {} SET data = data || ", kind.table()));
        qb.push_bind(Json(changes));
        qb.push("::jsonb, is_active = COALESCE(");
        qb.push_bind(active);
        qb.push(", is_active), updated_at = now()");
        push_filter(&mut qb, filter);
        qb.push(" RETURNING data");
        let rows = qb
            .build_query_scalar::<Json<Value>>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(into_records(rows))
    }

    async fn destroy(
        &self,
        kind: EntityKind,
        filter: &WhereClause,
    ) -> Result<Vec<EntityRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!("DELETE FROM {}", kind.table()));
        push_filter(&mut qb, filter);
        qb.push(" RETURNING data");
        let rows = qb
            .build_query_scalar::<Json<Value>>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(into_records(rows))
    }

    async fn ping(&self) -> Result<(), RepoError> {
        query("SELECT 1")
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn filters_bind_field_names() {
        let filter = WhereClause::new()
            .with("bookId", Condition::Eq(json!("b1")))
            .with("rating", Condition::Gte(json!(4)))
            .active_only();
        let mut qb = QueryBuilder::<Postgres>::new("SELECT data FROM reviews");
        push_filter(&mut qb, &filter);
        assert_eq!(
            qb.sql(),
            "SELECT data FROM reviews WHERE TRUE AND data -> $1 = $2 AND is_active = $3 \
             AND (data ->> $4)::double precision >= $5"
        );
    }

    #[test]
    fn sort_keys_become_jsonb_order() {
        let options = FindOptions {
            offset: 20,
            limit: Some(10),
            sort: FindOptions::parse_sort("-rating,createdAt"),
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT data FROM reviews");
        push_options(&mut qb, &options);
        assert_eq!(
            qb.sql(),
            "SELECT data FROM reviews ORDER BY data -> $1 DESC, data -> $2 ASC LIMIT $3 OFFSET $4"
        );
    }

    #[test]
    fn non_uuid_ids_are_invalid_input() {
        let record = EntityRecord::from_value(json!({"id": "r1"})).expect("record");
        assert!(matches!(record_id(&record), Err(RepoError::InvalidInput { .. })));
    }
}
