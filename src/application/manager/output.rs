//! Post-command enrichment and the response envelope.

use review_engagement_api_types::ResponseEnvelope;
use serde_json::Map;

use super::ApiManager;
use crate::application::{
    commands::{CommandData, CommandOutcome},
    routes::{BulkMode, RouteSpec},
};
use crate::domain::{entities::EntityRecord, types::CrudType};

impl ApiManager<'_> {
    /// Reads gain a `<field>Label` next to every enum-typed field.
    pub(super) async fn run_after_main_operation(&self, mut outcome: CommandOutcome) -> CommandOutcome {
        if !matches!(self.ctx.route.crud, CrudType::Get | CrudType::GetList) {
            return outcome;
        }
        let fields = self.ctx.route.entity.enum_fields();
        if fields.is_empty() {
            return outcome;
        }
        outcome.data = match outcome.data {
            CommandData::Record(record) => CommandData::Record(self.label(record, fields).await),
            CommandData::Records(records) => {
                let mut labelled = Vec::with_capacity(records.len());
                for record in records {
                    labelled.push(self.label(record, fields).await);
                }
                CommandData::Records(labelled)
            }
            CommandData::Null => CommandData::Null,
        };
        outcome
    }

    async fn label(
        &self,
        mut record: EntityRecord,
        fields: &[(&'static str, &'static str)],
    ) -> EntityRecord {
        for (field, dictionary) in fields {
            let Some(value) = record.get(field).cloned() else {
                continue;
            };
            let label = self
                .service
                .enums
                .get_enum_value(&value, dictionary, false)
                .await;
            record.set(format!("{field}Label"), label);
        }
        record
    }

    pub(super) fn build_output(&self, outcome: CommandOutcome) -> ResponseEnvelope {
        let route = self.ctx.route;
        let data_name = route.data_name();
        let mut payload = Map::new();
        payload.insert(data_name.to_string(), outcome.data.to_value());

        let single_update = route.crud == CrudType::Update && route.bulk == BulkMode::Single;
        if single_update && let Some(previous) = outcome.previous.as_ref() {
            payload.insert(format!("old_{data_name}"), previous.to_value());
        }

        let listing = route.crud == CrudType::GetList;
        ResponseEnvelope {
            status: "OK".to_string(),
            status_code: if route.crud == CrudType::Create { 201 } else { 200 },
            elapsed_ms: self.ctx.elapsed_ms(),
            request_id: self.ctx.request_id.clone(),
            user_id: self.ctx.user_id().map(str::to_string),
            session_id: self.ctx.session_id().map(str::to_string),
            data_name: data_name.to_string(),
            method: route.method.as_str().to_string(),
            action: route.crud.as_str().to_string(),
            app_version: self.service.options.app_version.clone(),
            row_count: outcome.row_count(),
            payload,
            paging: if listing { outcome.paging } else { None },
            filters: if listing { outcome.filters } else { None },
            ui_permissions: listing.then(|| self.ui_permissions()),
            old_data_values: outcome.old_values,
            new_data_values: outcome.new_values,
            checkout_result: self.ctx.checkout_result.clone(),
            source: Some(outcome.source.as_str().to_string()),
        }
    }

    /// Names of the routes on the same entity the caller may invoke.
    fn ui_permissions(&self) -> Vec<String> {
        let entity = self.ctx.route.entity;
        self.service
            .routes
            .all()
            .iter()
            .filter(|route| route.entity == entity && self.may_call(route))
            .map(|route| route.name.to_string())
            .collect()
    }

    fn may_call(&self, route: &RouteSpec) -> bool {
        let session = self.ctx.session.as_ref();
        if route.login_required && session.is_none() {
            return false;
        }
        route.required_roles.is_empty()
            || session.is_some_and(|session| session.has_role(route.required_roles))
    }
}
