//! Unit-of-work commands: one persistence call plus its cache, index and event
//! side effects.
//!
//! A single [`DbCommand`] drives every operation; the per-CRUD behaviour lives
//! in a [`CommandStrategy`] chosen from the route's CRUD type.

mod create;
mod delete;
mod get;
mod list;
mod update;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::histogram;
use review_engagement_api_types::Paging;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::application::{
    context::RequestContext,
    error::ServiceError,
    events::ServicePublisher,
    hooks::HookRegistry,
    repos::{EntityStore, RepoError, WhereClause},
    search::SearchIndexer,
};
use crate::cache::CacheLayer;
use crate::domain::{
    entities::{EntityKind, EntityRecord, FIELD_ID},
    error::DomainError,
    session::Session,
    types::CrudType,
};

pub const EMPTY_BULK_UPDATE: &str = "errMsg_emptyUpdateClauseIsNotAllowedInBulkMode";
pub const EMPTY_BULK_WHERE: &str = "errMsg_emptyWhereClauseIsNotAllowedInBulkMode";
pub const RECORD_NOT_FOUND: &str = "errMsg_RecordNotFound";
pub const RECORD_NOT_FOUND_TO_UPDATE: &str = "errMsg_RecordNotFoundToUpdate";
pub const RECORD_NOT_FOUND_TO_DELETE: &str = "errMsg_RecordNotFoundToDelete";
pub const NOT_OWNER: &str = "errMsg_NotOwnerOfRecord";

const SOURCE: &str = "review_engagement::commands";

/// Collaborators every command shares.
pub struct CommandServices {
    pub store: Arc<dyn EntityStore>,
    pub caches: CacheLayer,
    pub search: SearchIndexer,
    pub publisher: ServicePublisher,
    pub hooks: HookRegistry,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl CommandError {
    /// Recognized kinds pass through; anything else is wrapped once with the
    /// request's correlation data.
    fn into_service(self, request: &RequestContext) -> ServiceError {
        let error = match self {
            CommandError::Service(err) => err,
            CommandError::Domain(err) => err.into(),
            CommandError::Repo(err) => err.into(),
        };
        match error {
            ServiceError::Server {
                message,
                checkout_result,
                request_id,
            } => ServiceError::server(
                message,
                checkout_result.or_else(|| request.checkout_result.clone()),
                request_id.or_else(|| Some(request.request_id.clone())),
            ),
            other => other,
        }
    }
}

/// Where a result came from; echoed to clients as `_source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Db,
    EntityCache,
    QueryCache,
}

impl ResultSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultSource::Db => "db",
            ResultSource::EntityCache => "ecache",
            ResultSource::QueryCache => "cache",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandData {
    Record(EntityRecord),
    Records(Vec<EntityRecord>),
    Null,
}

impl CommandData {
    pub fn row_count(&self) -> u64 {
        match self {
            CommandData::Record(_) => 1,
            CommandData::Records(records) => records.len() as u64,
            CommandData::Null => 0,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            CommandData::Record(record) => record.to_value(),
            CommandData::Records(records) => {
                Value::Array(records.iter().map(EntityRecord::to_value).collect())
            }
            CommandData::Null => Value::Null,
        }
    }

    pub fn records(&self) -> Vec<&EntityRecord> {
        match self {
            CommandData::Record(record) => vec![record],
            CommandData::Records(records) => records.iter().collect(),
            CommandData::Null => Vec::new(),
        }
    }

    fn map_records(self, mut f: impl FnMut(EntityRecord) -> EntityRecord) -> Self {
        match self {
            CommandData::Record(record) => CommandData::Record(f(record)),
            CommandData::Records(records) => {
                CommandData::Records(records.into_iter().map(f).collect())
            }
            CommandData::Null => CommandData::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub data: CommandData,
    pub source: ResultSource,
    /// State before an update or delete, when known.
    pub previous: Option<EntityRecord>,
    pub old_values: Option<Map<String, Value>>,
    pub new_values: Option<Map<String, Value>>,
    pub paging: Option<Paging>,
    pub total_row_count: Option<u64>,
    pub affected_rows: Option<u64>,
    pub filters: Option<Value>,
}

impl CommandOutcome {
    pub fn new(data: CommandData, source: ResultSource) -> Self {
        Self {
            data,
            source,
            previous: None,
            old_values: None,
            new_values: None,
            paging: None,
            total_row_count: None,
            affected_rows: None,
            filters: None,
        }
    }

    pub fn from_db(data: CommandData) -> Self {
        Self::new(data, ResultSource::Db)
    }

    pub fn row_count(&self) -> u64 {
        self.affected_rows.unwrap_or_else(|| self.data.row_count())
    }
}

/// Working state of one command execution.
pub struct CommandScope<'a> {
    pub services: &'a CommandServices,
    pub request: &'a RequestContext,
    pub where_clause: WhereClause,
    pub data_clause: Map<String, Value>,
}

impl CommandScope<'_> {
    pub fn kind(&self) -> EntityKind {
        self.request.route.entity
    }

    pub fn session(&self) -> Option<&Session> {
        self.request.session.as_ref()
    }

    pub fn store(&self) -> &dyn EntityStore {
        self.services.store.as_ref()
    }

    /// Target id: the request id, else an `id` equality in the where clause.
    pub fn target_id(&self) -> Option<String> {
        self.request
            .id
            .clone()
            .or_else(|| self.where_clause.id().map(str::to_string))
    }

    /// Drop fields clients may not write.
    pub fn retain_writable(&mut self) {
        let writable = self.kind().writable_fields();
        self.data_clause
            .retain(|field, _| field == FIELD_ID || writable.contains(&field.as_str()));
    }
}

/// Per-CRUD behaviour plugged into [`DbCommand`].
#[async_trait]
pub trait CommandStrategy: Send + Sync {
    fn crud(&self) -> CrudType;

    /// May answer the request before any clause is built.
    async fn begin_command(
        &self,
        _scope: &CommandScope<'_>,
    ) -> Result<Option<CommandOutcome>, CommandError> {
        Ok(None)
    }

    /// Shape clauses after the route's hooks ran; may reject the request.
    fn build_command_clauses(&self, _scope: &mut CommandScope<'_>) -> Result<(), CommandError> {
        Ok(())
    }

    /// Cache lookups and checks ahead of the store call.
    async fn pre_command(
        &self,
        _scope: &CommandScope<'_>,
    ) -> Result<Option<CommandOutcome>, CommandError> {
        Ok(None)
    }

    async fn run_db_command(&self, scope: &CommandScope<'_>)
    -> Result<CommandOutcome, CommandError>;

    /// Cache maintenance and reindexing. Never fails the request.
    async fn post_command(&self, _scope: &CommandScope<'_>, _outcome: &CommandOutcome) {}

    async fn raise_db_event(&self, _scope: &CommandScope<'_>, _outcome: &CommandOutcome) {}
}

pub fn strategy_for(crud: CrudType) -> &'static dyn CommandStrategy {
    match crud {
        CrudType::Create => &create::CreateStrategy,
        CrudType::Get => &get::GetStrategy,
        CrudType::GetList => &list::ListStrategy,
        CrudType::Update => &update::UpdateStrategy,
        CrudType::Delete => &delete::DeleteStrategy,
    }
}

pub struct DbCommand<'a> {
    services: &'a CommandServices,
    strategy: &'static dyn CommandStrategy,
}

impl<'a> DbCommand<'a> {
    pub fn new(services: &'a CommandServices, crud: CrudType) -> Self {
        Self {
            services,
            strategy: strategy_for(crud),
        }
    }

    pub async fn execute(&self, request: &RequestContext) -> Result<CommandOutcome, ServiceError> {
        let started = Instant::now();
        let crud = self.strategy.crud();
        let result = self.run(request).await;
        histogram!("review_engagement_command_ms", "crud" => crud.as_str())
            .record(started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(outcome) => {
                debug!(
                    target = SOURCE,
                    request_id = %request.request_id,
                    route = request.route.name,
                    entity = request.route.entity.name(),
                    source = outcome.source.as_str(),
                    rows = outcome.row_count(),
                    "Command completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                let err = err.into_service(request);
                if let ServiceError::Server { message, .. } = &err {
                    error!(
                        target = SOURCE,
                        request_id = %request.request_id,
                        route = request.route.name,
                        error = %message,
                        "Command failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn run(&self, request: &RequestContext) -> Result<CommandOutcome, CommandError> {
        let mut scope = CommandScope {
            services: self.services,
            request,
            where_clause: request.where_clause.clone(),
            data_clause: request.data_clause.clone(),
        };

        if let Some(outcome) = self.strategy.begin_command(&scope).await? {
            return Ok(outcome);
        }

        scope.where_clause = self
            .services
            .hooks
            .apply_where(request, std::mem::take(&mut scope.where_clause))?;
        scope.data_clause = self
            .services
            .hooks
            .apply_data(request, std::mem::take(&mut scope.data_clause))?;
        self.strategy.build_command_clauses(&mut scope)?;

        let outcome = match self.strategy.pre_command(&scope).await? {
            Some(outcome) => outcome,
            None => self.strategy.run_db_command(&scope).await?,
        };

        Ok(self.end_command(&scope, outcome).await)
    }

    async fn end_command(&self, scope: &CommandScope<'_>, mut outcome: CommandOutcome) -> CommandOutcome {
        let hooks = &self.services.hooks;
        if hooks.has_result_hooks(scope.request.route.name) {
            outcome.data = outcome
                .data
                .map_records(|record| hooks.apply_result(scope.request, record));
        }
        self.strategy.post_command(scope, &outcome).await;
        self.strategy.raise_db_event(scope, &outcome).await;
        outcome
    }
}
