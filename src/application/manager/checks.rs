//! Authentication and authorization stages.

use tracing::debug;

use super::{ApiManager, CookieDirective, Credentials, SOURCE, TokenOrigin};
use crate::application::{
    commands::{
        CommandData, CommandOutcome, NOT_OWNER, RECORD_NOT_FOUND_TO_DELETE,
        RECORD_NOT_FOUND_TO_UPDATE, ResultSource,
    },
    error::ServiceError,
    repos::WhereClause,
    routes::BulkMode,
};
use crate::domain::{
    entities::EntityRecord,
    session::Session,
    types::{CrudType, TransportKind},
};

pub const LOGIN_REQUIRED: &str = "errMsg_LoginRequired";
pub const EMAIL_NOT_VERIFIED: &str = "errMsg_EmailNotVerified";
pub const MOBILE_NOT_VERIFIED: &str = "errMsg_MobileNotVerified";
pub const TWO_FACTOR_PENDING: &str = "errMsg_TwoFactorPending";
pub const ROLE_NOT_ALLOWED: &str = "errMsg_userRoleNotAllowed";
pub const TENANT_MISMATCH: &str = "errMsg_TenantMismatch";

impl ApiManager<'_> {
    pub(super) fn check_valid_login(
        &mut self,
        credentials: &Credentials,
        trusted: Option<Session>,
    ) -> Result<(), ServiceError> {
        self.ctx.session = match trusted {
            Some(session) => Some(session),
            None => self.resolve_session(credentials),
        };
        self.resolve_share_grant(credentials);

        let route = self.ctx.route;
        if !route.login_required {
            return Ok(());
        }
        let Some(session) = self.ctx.session.as_ref() else {
            if self.ctx.share_grant.is_some() {
                return Ok(());
            }
            return Err(ServiceError::not_authenticated(LOGIN_REQUIRED));
        };

        let options = &self.service.options;
        if options.require_email_verification && !session.email_verified {
            return Err(ServiceError::forbidden(EMAIL_NOT_VERIFIED));
        }
        if options.require_mobile_verification && !session.mobile_verified {
            return Err(ServiceError::forbidden(MOBILE_NOT_VERIFIED));
        }
        if session.two_factor_pending() {
            return Err(ServiceError::forbidden(TWO_FACTOR_PENDING));
        }
        Ok(())
    }

    /// An unreadable token counts as no session at all.
    fn resolve_session(&mut self, credentials: &Credentials) -> Option<Session> {
        let (token, origin) = credentials.token.as_ref()?;
        match self.service.sessions.resolve(token) {
            Ok(session) => {
                if *origin == TokenOrigin::Query && self.ctx.transport == TransportKind::Rest {
                    self.cookie = CookieDirective::Set(token.clone());
                }
                Some(session)
            }
            Err(err) => {
                debug!(
                    target = SOURCE,
                    request_id = %self.ctx.request_id,
                    error = %err,
                    "Session token rejected"
                );
                if *origin == TokenOrigin::Cookie {
                    self.cookie = CookieDirective::Clear;
                }
                None
            }
        }
    }

    fn resolve_share_grant(&mut self, credentials: &Credentials) {
        let Some(token) = credentials.share_token.as_deref() else {
            return;
        };
        match self.service.shares.verify(token) {
            Ok(grant) if grant.covers(self.ctx.route.name) => self.ctx.share_grant = Some(grant),
            Ok(_) => debug!(
                target = SOURCE,
                request_id = %self.ctx.request_id,
                route = self.ctx.route.name,
                "Share token does not cover route"
            ),
            Err(err) => debug!(
                target = SOURCE,
                request_id = %self.ctx.request_id,
                error = %err,
                "Share token rejected"
            ),
        }
    }

    pub(super) fn check_basic_auth(&self) -> Result<(), ServiceError> {
        let roles = self.ctx.route.required_roles;
        if roles.is_empty() {
            return Ok(());
        }
        match self.ctx.session.as_ref() {
            Some(session) if session.has_role(roles) => Ok(()),
            Some(_) => Err(ServiceError::forbidden(ROLE_NOT_ALLOWED)),
            None if self.ctx.share_grant.is_some() => Err(ServiceError::forbidden(ROLE_NOT_ALLOWED)),
            None => Err(ServiceError::not_authenticated(LOGIN_REQUIRED)),
        }
    }

    /// Single-record writes load their target before anything is written.
    pub(super) async fn fetch_instance(&mut self) -> Result<(), ServiceError> {
        let route = self.ctx.route;
        let missing = match route.crud {
            CrudType::Update => RECORD_NOT_FOUND_TO_UPDATE,
            CrudType::Delete => RECORD_NOT_FOUND_TO_DELETE,
            _ => return Ok(()),
        };
        if route.bulk != BulkMode::Single {
            return Ok(());
        }
        let Some(id) = self.ctx.id.clone() else {
            return Ok(());
        };

        let filter = WhereClause::by_id(id).active_only();
        let record = self
            .service
            .commands
            .store
            .find_one(route.entity, &filter)
            .await?
            .ok_or_else(|| ServiceError::not_found(missing))?;
        self.ctx.is_owner = self.ctx.owns(&record);
        self.ctx.instance = Some(record);
        Ok(())
    }

    pub(super) fn check_instance(&self) -> Result<(), ServiceError> {
        let Some(record) = self.ctx.instance.as_ref() else {
            return Ok(());
        };
        if !self.ctx.is_owner && !self.ctx.may_access(record) {
            return Err(ServiceError::forbidden(NOT_OWNER));
        }
        self.check_tenant_match(record)
    }

    /// Sessions in the root tenant see every tenant's rows.
    pub(super) fn check_tenant_match(&self, record: &EntityRecord) -> Result<(), ServiceError> {
        let Some(tenant) = self
            .ctx
            .session
            .as_ref()
            .and_then(|session| session.tenant_id.as_deref())
        else {
            return Ok(());
        };
        if self.service.options.root_tenant_id.as_deref() == Some(tenant) {
            return Ok(());
        }
        match record.tenant() {
            Some(owner) if owner != tenant => Err(ServiceError::forbidden(TENANT_MISMATCH)),
            _ => Ok(()),
        }
    }

    /// Tenant isolation applies to every read source. Ownership of
    /// entity-cache hits was already checked by the command.
    pub(super) fn check_result(&self, outcome: &CommandOutcome) -> Result<(), ServiceError> {
        if self.ctx.route.crud != CrudType::Get {
            return Ok(());
        }
        let CommandData::Record(record) = &outcome.data else {
            return Ok(());
        };
        if outcome.source == ResultSource::Db && !self.ctx.may_access(record) {
            return Err(ServiceError::forbidden(NOT_OWNER));
        }
        self.check_tenant_match(record)
    }
}
