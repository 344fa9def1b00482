use sqlx::error::{DatabaseError, ErrorKind};

use crate::application::repos::RepoError;

const INVALID_TEXT_REPRESENTATION: &str = "22P02";
const UNTRANSLATABLE_CHARACTER: &str = "22P05";
const INVALID_PARAMETER_VALUE: &str = "22023";
const QUERY_CANCELED: &str = "57014";

/// Maps driver errors from the entity tables onto repository errors.
///
/// Rows are `(id uuid, data jsonb, ...)`, so the interesting failures are id
/// collisions, payloads Postgres refuses to store as jsonb, and `data` columns
/// that no longer decode.
pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db) => map_database_error(db.as_ref()),
        sqlx::Error::ColumnDecode { index, source } => RepoError::Integrity {
            message: format!("column {index} does not decode: {source}"),
        },
        sqlx::Error::Decode(source) => RepoError::Integrity {
            message: format!("stored row does not decode: {source}"),
        },
        other => RepoError::from_persistence(other),
    }
}

fn map_database_error(db: &dyn DatabaseError) -> RepoError {
    match db.kind() {
        ErrorKind::UniqueViolation => {
            return RepoError::Duplicate {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            };
        }
        ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
            return RepoError::Integrity {
                message: db.message().to_string(),
            };
        }
        _ => {}
    }
    match db.code().as_deref() {
        Some(INVALID_TEXT_REPRESENTATION | UNTRANSLATABLE_CHARACTER | INVALID_PARAMETER_VALUE) => {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        Some(QUERY_CANCELED) => RepoError::Timeout,
        _ => RepoError::from_persistence(db.message()),
    }
}
