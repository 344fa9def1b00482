//! Field-level rules for incoming data clauses.

use serde_json::{Map, Value};

use crate::domain::{entities::EntityKind, error::DomainError, types::ReviewStatus};

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;

/// Validate a data clause. `creating` additionally enforces required fields.
pub fn validate_data(
    kind: EntityKind,
    data: &Map<String, Value>,
    creating: bool,
) -> Result<(), DomainError> {
    if creating {
        for field in kind.required_fields() {
            match data.get(*field) {
                None | Some(Value::Null) => {
                    return Err(DomainError::validation(format!(
                        "`{field}` is required for {}",
                        kind.name()
                    )));
                }
                Some(_) => {}
            }
        }
    }

    match kind {
        EntityKind::Review => validate_review(data),
        EntityKind::Recommendation => validate_recommendation(data),
        EntityKind::EngagementEvent => validate_engagement_event(data),
    }
}

fn validate_review(data: &Map<String, Value>) -> Result<(), DomainError> {
    if let Some(rating) = data.get("rating") {
        let rating = rating
            .as_i64()
            .ok_or_else(|| DomainError::validation("`rating` must be an integer"))?;
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(DomainError::validation(format!(
                "`rating` must be between {MIN_RATING} and {MAX_RATING}"
            )));
        }
    }
    if let Some(status) = data.get("status") {
        let parsed = status.as_str().and_then(ReviewStatus::parse);
        if parsed.is_none() {
            return Err(DomainError::validation(
                "`status` must be one of PENDING, APPROVED, REJECTED",
            ));
        }
    }
    Ok(())
}

fn validate_recommendation(data: &Map<String, Value>) -> Result<(), DomainError> {
    if let Some(book_ids) = data.get("bookIds") {
        let ids = book_ids
            .as_array()
            .ok_or_else(|| DomainError::validation("`bookIds` must be a list"))?;
        if ids.iter().any(|id| !id.is_string()) {
            return Err(DomainError::validation("`bookIds` must contain strings"));
        }
    }
    Ok(())
}

fn validate_engagement_event(data: &Map<String, Value>) -> Result<(), DomainError> {
    if let Some(event_type) = data.get("eventType") {
        match event_type.as_str() {
            Some(value) if !value.trim().is_empty() => {}
            _ => return Err(DomainError::validation("`eventType` must be a non-empty string")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn rating_outside_range_is_rejected() {
        let err = validate_data(EntityKind::Review, &data(json!({"rating": 6})), false)
            .expect_err("rating 6 rejected");
        assert!(err.to_string().contains("between 1 and 5"));
        validate_data(EntityKind::Review, &data(json!({"rating": 1})), false)
            .expect("rating 1 accepted");
    }

    #[test]
    fn create_requires_book_and_rating() {
        let err = validate_data(EntityKind::Review, &data(json!({"rating": 3})), true)
            .expect_err("missing bookId");
        assert!(err.to_string().contains("bookId"));
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(validate_data(EntityKind::Review, &data(json!({"status": "LOST"})), false).is_err());
    }

    #[test]
    fn book_ids_must_be_strings() {
        assert!(
            validate_data(
                EntityKind::Recommendation,
                &data(json!({"bookIds": ["b1", 2]})),
                false
            )
            .is_err()
        );
    }
}
