//! Session tokens and share tokens, both HS256 JWTs.

use std::time::Duration;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::session::Session;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token rejected: {0}")]
    Invalid(String),
    #[error("token could not be signed: {0}")]
    Encode(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    #[serde(flatten)]
    session: Session,
    iat: i64,
    exp: i64,
}

/// Decodes bearer/cookie tokens into [`Session`]s.
pub struct SessionResolver {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl SessionResolver {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    pub fn issue(&self, session: &Session, ttl: Duration) -> Result<String, AuthError> {
        let (iat, exp) = window(ttl);
        let claims = SessionClaims {
            session: session.clone(),
            iat,
            exp,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|err| AuthError::Encode(err.to_string()))
    }

    pub fn resolve(&self, token: &str) -> Result<Session, AuthError> {
        let data = decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map_err(|err| AuthError::Invalid(err.to_string()))?;
        if !data.claims.session.is_authenticated() {
            return Err(AuthError::Invalid("token carries no session id".to_string()));
        }
        Ok(data.claims.session)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShareClaims {
    routes: Vec<String>,
    #[serde(default)]
    record_id: Option<String>,
    exp: i64,
}

/// What a verified share token lets an anonymous caller do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareGrant {
    pub routes: Vec<String>,
    pub record_id: Option<String>,
}

impl ShareGrant {
    pub fn covers(&self, route: &str) -> bool {
        self.routes.iter().any(|granted| granted == route)
    }

    /// A grant pinned to a record only covers that record.
    pub fn authorizes(&self, route: &str, id: Option<&str>) -> bool {
        if !self.covers(route) {
            return false;
        }
        match (&self.record_id, id) {
            (Some(granted), Some(id)) => granted == id,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

pub struct ShareTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl ShareTokens {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    pub fn issue(&self, grant: &ShareGrant, ttl: Duration) -> Result<String, AuthError> {
        let (_, exp) = window(ttl);
        let claims = ShareClaims {
            routes: grant.routes.clone(),
            record_id: grant.record_id.clone(),
            exp,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|err| AuthError::Encode(err.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<ShareGrant, AuthError> {
        let data = decode::<ShareClaims>(token, &self.decoding, &self.validation)
            .map_err(|err| AuthError::Invalid(err.to_string()))?;
        Ok(ShareGrant {
            routes: data.claims.routes,
            record_id: data.claims.record_id,
        })
    }
}

fn window(ttl: Duration) -> (i64, i64) {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
    (now, now.saturating_add(ttl))
}
