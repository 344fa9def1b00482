use async_trait::async_trait;
use review_engagement_api_types::Paging;
use serde_json::{Number, Value};

use super::{CommandData, CommandError, CommandOutcome, CommandScope, CommandStrategy, ResultSource};
use crate::application::repos::FindOptions;
use crate::cache::{CachedPage, query_key};
use crate::domain::{entities::EntityRecord, types::CrudType};

pub(super) struct ListStrategy;

/// Sort order and projection also shape the page, so they join the key.
fn cache_key(scope: &CommandScope<'_>) -> String {
    let sort = scope
        .request
        .sort
        .iter()
        .map(|key| {
            if key.descending {
                format!("-{}", key.field)
            } else {
                key.field.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    let variant = format!("sort={sort};select={}", scope.request.select.join(","));
    query_key(
        scope.kind(),
        &scope.where_clause,
        scope.request.pagination.as_ref(),
        &variant,
    )
}

fn coerce_number(value: &Value) -> Value {
    match value {
        Value::String(text) => {
            let text = text.trim();
            if let Ok(int) = text.parse::<i64>() {
                Value::Number(int.into())
            } else if let Some(float) = text.parse::<f64>().ok().and_then(Number::from_f64) {
                Value::Number(float)
            } else {
                value.clone()
            }
        }
        Value::Bool(flag) => Value::Number(u8::from(*flag).into()),
        other => other.clone(),
    }
}

fn shape_row(scope: &CommandScope<'_>, record: EntityRecord) -> EntityRecord {
    let mut row = if scope.request.select.is_empty() {
        record
    } else {
        record.project(&scope.request.select)
    };
    for field in scope.request.route.aggregate_fields {
        if let Some(value) = row.get(field) {
            let coerced = coerce_number(value);
            row.set(*field, coerced);
        }
    }
    row
}

#[async_trait]
impl CommandStrategy for ListStrategy {
    fn crud(&self) -> CrudType {
        CrudType::GetList
    }

    fn build_command_clauses(&self, scope: &mut CommandScope<'_>) -> Result<(), CommandError> {
        scope.where_clause = std::mem::take(&mut scope.where_clause).active_only();
        Ok(())
    }

    async fn pre_command(
        &self,
        scope: &CommandScope<'_>,
    ) -> Result<Option<CommandOutcome>, CommandError> {
        let queries = &scope.services.caches.queries;
        if !queries.is_enabled() {
            return Ok(None);
        }
        let Some(page) = queries.read(scope.kind(), &cache_key(scope)).await else {
            return Ok(None);
        };
        let mut outcome =
            CommandOutcome::new(CommandData::Records(page.rows), ResultSource::QueryCache);
        outcome.paging = page.paging;
        outcome.total_row_count = Some(page.total_row_count);
        outcome.filters = page.filters;
        Ok(Some(outcome))
    }

    async fn run_db_command(
        &self,
        scope: &CommandScope<'_>,
    ) -> Result<CommandOutcome, CommandError> {
        let kind = scope.kind();
        let page = scope.request.pagination;
        let total = scope.store().count(kind, &scope.where_clause).await?;
        let options = FindOptions {
            offset: page.map(|page| page.skip()).unwrap_or(0),
            limit: page.map(|page| page.page_row_count),
            sort: scope.request.sort.clone(),
        };
        let rows = scope
            .store()
            .find_many(kind, &scope.where_clause, &options)
            .await?
            .into_iter()
            .map(|record| shape_row(scope, record))
            .collect();

        let mut outcome = CommandOutcome::from_db(CommandData::Records(rows));
        outcome.total_row_count = Some(total);
        outcome.paging = page.map(|page| Paging {
            page_number: page.page_number,
            page_row_count: page.page_row_count,
            total_row_count: total,
            page_count: page.page_count(total),
        });
        outcome.filters = Some(scope.where_clause.to_json());
        Ok(outcome)
    }

    async fn post_command(&self, scope: &CommandScope<'_>, outcome: &CommandOutcome) {
        if outcome.source != ResultSource::Db {
            return;
        }
        let CommandData::Records(rows) = &outcome.data else {
            return;
        };
        let queries = &scope.services.caches.queries;
        if !queries.is_enabled() {
            return;
        }
        let page = CachedPage {
            filter: scope.where_clause.to_json(),
            rows: rows.clone(),
            total_row_count: outcome.total_row_count.unwrap_or(rows.len() as u64),
            paging: outcome.paging,
            filters: outcome.filters.clone(),
            ui_permissions: None,
        };
        queries.write(scope.kind(), &cache_key(scope), &page).await;
    }
}
