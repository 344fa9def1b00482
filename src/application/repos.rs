//! Persistence contract and the portable filter language commands speak.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{
    entities::{EntityKind, EntityRecord, FIELD_ID, FIELD_IS_ACTIVE},
    error::DomainError,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// One predicate on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Like(String),
    /// Array field contains the value.
    Contains(Value),
}

impl Condition {
    fn operator(&self) -> &'static str {
        match self {
            Condition::Eq(_) => "$eq",
            Condition::Ne(_) => "$ne",
            Condition::In(_) => "$in",
            Condition::Gt(_) => "$gt",
            Condition::Gte(_) => "$gte",
            Condition::Lt(_) => "$lt",
            Condition::Lte(_) => "$lte",
            Condition::Like(_) => "$like",
            Condition::Contains(_) => "$contains",
        }
    }

    fn operand(&self) -> Value {
        match self {
            Condition::Eq(v)
            | Condition::Ne(v)
            | Condition::Gt(v)
            | Condition::Gte(v)
            | Condition::Lt(v)
            | Condition::Lte(v)
            | Condition::Contains(v) => v.clone(),
            Condition::In(values) => Value::Array(values.clone()),
            Condition::Like(pattern) => Value::String(pattern.clone()),
        }
    }

    /// Accepts `$in`, `in` and `Op.in` spellings alike.
    fn parse(operator: &str, operand: Value) -> Result<Self, DomainError> {
        let op = operator
            .trim_start_matches('$')
            .trim_start_matches("Op.")
            .to_ascii_lowercase();
        let condition = match op.as_str() {
            "eq" => Condition::Eq(operand),
            "ne" => Condition::Ne(operand),
            "in" => match operand {
                Value::Array(values) => Condition::In(values),
                other => Condition::In(vec![other]),
            },
            "gt" => Condition::Gt(operand),
            "gte" => Condition::Gte(operand),
            "lt" => Condition::Lt(operand),
            "lte" => Condition::Lte(operand),
            "like" | "ilike" => match operand {
                Value::String(pattern) => Condition::Like(pattern),
                _ => {
                    return Err(DomainError::validation(
                        "`like` filters require a string pattern",
                    ));
                }
            },
            "contains" => Condition::Contains(operand),
            _ => {
                return Err(DomainError::validation(format!(
                    "unsupported filter operator `{operator}`"
                )));
            }
        };
        Ok(condition)
    }

    fn matches(&self, actual: Option<&Value>) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        match self {
            Condition::Eq(expected) => loosely_equal(actual, expected),
            Condition::Ne(expected) => !loosely_equal(actual, expected),
            Condition::In(values) => values.iter().any(|value| loosely_equal(actual, value)),
            Condition::Gt(bound) => compare(actual, bound).is_some_and(|o| o.is_gt()),
            Condition::Gte(bound) => compare(actual, bound).is_some_and(|o| o.is_ge()),
            Condition::Lt(bound) => compare(actual, bound).is_some_and(|o| o.is_lt()),
            Condition::Lte(bound) => compare(actual, bound).is_some_and(|o| o.is_le()),
            Condition::Like(pattern) => actual.as_str().is_some_and(|text| like(pattern, text)),
            Condition::Contains(needle) => actual
                .as_array()
                .is_some_and(|items| items.iter().any(|item| loosely_equal(item, needle))),
        }
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => left.as_f64()?.partial_cmp(&right.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// SQL `LIKE` semantics with `%` wildcards only.
fn like(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut rest = text;
    for (index, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if index == 0 {
            match rest.strip_prefix(part) {
                Some(tail) => rest = tail,
                None => return false,
            }
        } else if index == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

/// Conjunction of field conditions. Keys are sorted so the JSON form is stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    conditions: BTreeMap<String, Condition>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().with(FIELD_ID, Condition::Eq(Value::String(id.into())))
    }

    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.conditions.insert(field.into(), condition);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, condition: Condition) {
        self.conditions.insert(field.into(), condition);
    }

    pub fn remove(&mut self, field: &str) -> Option<Condition> {
        self.conditions.remove(field)
    }

    /// Restrict to rows that have not been soft-deleted.
    pub fn active_only(self) -> Self {
        self.with(FIELD_IS_ACTIVE, Condition::Eq(Value::Bool(true)))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&String, &Condition)> {
        self.conditions.iter()
    }

    pub fn get(&self, field: &str) -> Option<&Condition> {
        self.conditions.get(field)
    }

    /// The id this clause pins, if it is an equality on `id`.
    pub fn id(&self) -> Option<&str> {
        match self.conditions.get(FIELD_ID) {
            Some(Condition::Eq(Value::String(id))) => Some(id),
            _ => None,
        }
    }

    /// Equality-only fields, used for entity-cache index lookups.
    pub fn equalities(&self) -> Vec<(&str, &Value)> {
        self.conditions
            .iter()
            .filter_map(|(field, condition)| match condition {
                Condition::Eq(value) => Some((field.as_str(), value)),
                _ => None,
            })
            .collect()
    }

    pub fn matches(&self, record: &EntityRecord) -> bool {
        self.conditions.iter().all(|(field, condition)| {
            if field == FIELD_IS_ACTIVE {
                let active = Value::Bool(record.is_active());
                return condition.matches(Some(&active));
            }
            condition.matches(record.get(field))
        })
    }

    /// Parse a client filter object. Plain values mean equality; objects carry
    /// a single operator key.
    pub fn from_json(value: &Value) -> Result<Self, DomainError> {
        let object = match value {
            Value::Null => return Ok(Self::new()),
            Value::Object(object) => object,
            _ => return Err(DomainError::validation("filters must be an object")),
        };
        let mut clause = Self::new();
        for (field, raw) in object {
            match raw {
                Value::Object(ops) if ops.len() == 1 => {
                    if let Some((operator, operand)) = ops.iter().next() {
                        clause.insert(field.clone(), Condition::parse(operator, operand.clone())?);
                    }
                }
                Value::Array(values) => {
                    clause.insert(field.clone(), Condition::In(values.clone()));
                }
                other => {
                    clause.insert(field.clone(), Condition::Eq(other.clone()));
                }
            }
        }
        Ok(clause)
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for (field, condition) in &self.conditions {
            let value = match condition {
                Condition::Eq(value) => value.clone(),
                other => {
                    let mut op = Map::new();
                    op.insert(other.operator().to_string(), other.operand());
                    Value::Object(op)
                }
            };
            out.insert(field.clone(), value);
        }
        Value::Object(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub offset: u64,
    pub limit: Option<u64>,
    pub sort: Vec<SortKey>,
}

impl FindOptions {
    /// Parse `"-createdAt,rating"` style sort strings.
    pub fn parse_sort(raw: &str) -> Vec<SortKey> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| match part.strip_prefix('-') {
                Some(field) => SortKey {
                    field: field.to_string(),
                    descending: true,
                },
                None => SortKey {
                    field: part.to_string(),
                    descending: false,
                },
            })
            .collect()
    }
}

/// Narrow persistence collaborator every command talks to.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_one(
        &self,
        kind: EntityKind,
        filter: &WhereClause,
    ) -> Result<Option<EntityRecord>, RepoError>;

    async fn find_many(
        &self,
        kind: EntityKind,
        filter: &WhereClause,
        options: &FindOptions,
    ) -> Result<Vec<EntityRecord>, RepoError>;

    async fn count(&self, kind: EntityKind, filter: &WhereClause) -> Result<u64, RepoError>;

    async fn create(&self, kind: EntityKind, record: EntityRecord)
    -> Result<EntityRecord, RepoError>;

    /// Apply `changes` to every matching row; returns the rows after the write.
    async fn update(
        &self,
        kind: EntityKind,
        filter: &WhereClause,
        changes: &Map<String, Value>,
    ) -> Result<Vec<EntityRecord>, RepoError>;

    /// Remove every matching row; returns the removed rows.
    async fn destroy(
        &self,
        kind: EntityKind,
        filter: &WhereClause,
    ) -> Result<Vec<EntityRecord>, RepoError>;

    async fn ping(&self) -> Result<(), RepoError>;
}
