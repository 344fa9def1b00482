//! Parameter stages: parked parameters, normalization, validation and the
//! where/data clauses.

use serde_json::{Map, Value};
use tracing::warn;

use super::{ApiManager, SOURCE};
use crate::application::{
    error::ServiceError,
    pagination::read_pagination,
    repos::{Condition, FindOptions, WhereClause},
};
use crate::cache::params_key;
use crate::domain::{entities::FIELD_ID, types::CrudType};

pub const PARAMS_KEY: &str = "paramsKey";
pub const SHARE_NOT_VALID: &str = "errMsg_ShareTokenNotValidForRecord";
pub const ITEMS_NOT_ARRAY: &str = "errMsg_itemsMustBeAnArray";
pub const FILTERS_NOT_JSON: &str = "errMsg_filtersMustBeJson";

/// Keys that steer the pipeline and never reach a data clause.
const CONTROL_KEYS: &[&str] = &[
    "pageNumber",
    "pageRowCount",
    "sort",
    "select",
    "filters",
    "items",
    "checkoutResult",
    "requestId",
    "route",
    PARAMS_KEY,
    "_redirect",
    "_download",
];

impl ApiManager<'_> {
    /// Merge parameters parked before a login redirect. Live parameters win.
    pub(super) async fn read_cached_parameters(&mut self) {
        let Some(Value::String(id)) = self.ctx.params.remove(PARAMS_KEY) else {
            return;
        };
        let backend = &self.service.commands.caches.backend;
        let raw = match backend.get(&params_key(&id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    request_id = %self.ctx.request_id,
                    error = %err,
                    "Parked parameters unavailable"
                );
                return;
            }
        };
        match serde_json::from_str::<Map<String, Value>>(&raw) {
            Ok(parked) => {
                for (key, value) in parked {
                    self.ctx.params.entry(key).or_insert(value);
                }
            }
            Err(err) => warn!(
                target = SOURCE,
                request_id = %self.ctx.request_id,
                error = %err,
                "Parked parameters are not an object"
            ),
        }
    }

    pub(super) fn transform_parameters(&mut self) -> Result<(), ServiceError> {
        let route = self.ctx.route;
        if let Some(param) = route.id_param {
            self.ctx.id = self
                .ctx
                .params
                .get(param)
                .or_else(|| self.ctx.params.get(FIELD_ID))
                .and_then(scalar_string);
        }

        if route.crud == CrudType::GetList {
            let default_rows = route
                .default_page_row_count
                .unwrap_or(self.service.options.default_page_row_count);
            self.ctx.pagination = read_pagination(
                self.ctx.params.get("pageNumber"),
                self.ctx.params.get("pageRowCount"),
                default_rows,
            );
        }

        if let Some(sort) = self.ctx.params.get("sort").and_then(list_param) {
            self.ctx.sort = FindOptions::parse_sort(&sort.join(","));
        }
        if let Some(select) = self.ctx.params.get("select").and_then(list_param) {
            self.ctx.select = select;
        }

        self.ctx.items = match self.ctx.params.get("items") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect(),
            Some(_) => return Err(ServiceError::bad_request(ITEMS_NOT_ARRAY)),
        };
        self.ctx.checkout_result = self.ctx.params.get("checkoutResult").cloned();
        Ok(())
    }

    pub(super) fn check_parameters(&self) -> Result<(), ServiceError> {
        let route = self.ctx.route;
        if let Some(param) = route.id_param
            && self.ctx.id.is_none()
        {
            return Err(ServiceError::bad_request(format!("errMsg_{param}IsRequired")));
        }
        if self.ctx.session.is_none()
            && let Some(grant) = self.ctx.share_grant.as_ref()
            && grant.record_id.is_some()
            && !grant.authorizes(route.name, self.ctx.id.as_deref())
        {
            return Err(ServiceError::forbidden(SHARE_NOT_VALID));
        }
        Ok(())
    }

    pub(super) fn build_where_clause(&mut self) -> Result<(), ServiceError> {
        let route = self.ctx.route;
        if route.crud == CrudType::Create {
            return Ok(());
        }
        if let Some(id) = self.ctx.id.as_deref() {
            self.ctx.where_clause = WhereClause::by_id(id);
            return Ok(());
        }

        let mut clause = match self.ctx.params.get("filters") {
            None => WhereClause::new(),
            Some(Value::String(raw)) => {
                let filters: Value = serde_json::from_str(raw)
                    .map_err(|err| ServiceError::bad_request_with(FILTERS_NOT_JSON, err.to_string()))?;
                WhereClause::from_json(&filters)?
            }
            Some(filters) => WhereClause::from_json(filters)?,
        };
        for field in route.filter_fields {
            match self.ctx.params.get(*field) {
                None | Some(Value::Null) => {}
                Some(Value::Array(values)) => clause.insert(*field, Condition::In(values.clone())),
                Some(value) => clause.insert(*field, Condition::Eq(value.clone())),
            }
        }
        self.ctx.where_clause = clause;
        Ok(())
    }

    pub(super) fn build_data_clause(&mut self) {
        let route = self.ctx.route;
        if !matches!(route.crud, CrudType::Create | CrudType::Update) {
            return;
        }
        let mut data: Map<String, Value> = self
            .ctx
            .params
            .iter()
            .filter(|(key, _)| !CONTROL_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let Some(param) = route.id_param {
            data.remove(param);
        }
        if route.crud == CrudType::Update {
            data.remove(FIELD_ID);
        }
        self.ctx.data_clause = data;
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Accepts `"a,b"` or `["a", "b"]`.
fn list_param(value: &Value) -> Option<Vec<String>> {
    let items: Vec<String> = match value {
        Value::String(text) => text
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => return None,
    };
    (!items.is_empty()).then_some(items)
}
