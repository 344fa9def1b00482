//! Entity kinds served by the service and the schemaless record they persist as.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::domain::error::DomainError;

pub const FIELD_ID: &str = "id";
pub const FIELD_IS_ACTIVE: &str = "isActive";
pub const FIELD_OWNER: &str = "_owner";
pub const FIELD_TENANT: &str = "_tenant";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_UPDATED_AT: &str = "updatedAt";

/// Fields the pipeline maintains itself; never part of an update diff.
const SYSTEM_FIELDS: [&str; 4] = [FIELD_ID, FIELD_CREATED_AT, FIELD_UPDATED_AT, FIELD_OWNER];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Review,
    Recommendation,
    EngagementEvent,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Review,
        EntityKind::Recommendation,
        EntityKind::EngagementEvent,
    ];

    /// Singular data name used in envelopes and cache keys.
    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Review => "review",
            EntityKind::Recommendation => "recommendation",
            EntityKind::EngagementEvent => "engagementEvent",
        }
    }

    /// Plural data name used by list envelopes.
    pub fn plural(self) -> &'static str {
        match self {
            EntityKind::Review => "reviews",
            EntityKind::Recommendation => "recommendations",
            EntityKind::EngagementEvent => "engagementEvents",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Review => "reviews",
            EntityKind::Recommendation => "recommendations",
            EntityKind::EngagementEvent => "engagement_events",
        }
    }

    /// Capitalized stem of the event topics, e.g. `EngagementeventCreatedTopic`.
    pub fn topic_stem(self) -> &'static str {
        match self {
            EntityKind::Review => "Review",
            EntityKind::Recommendation => "Recommendation",
            EntityKind::EngagementEvent => "Engagementevent",
        }
    }

    /// Fields maintained as secondary index sets in the entity cache.
    pub fn index_fields(self) -> &'static [&'static str] {
        match self {
            EntityKind::Review => &["bookId", "userId", "status"],
            EntityKind::Recommendation => &["userId"],
            EntityKind::EngagementEvent => &["userId", "bookId", "eventType"],
        }
    }

    /// Fields a create request must carry.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            EntityKind::Review => &["bookId", "rating"],
            EntityKind::Recommendation => &["userId", "bookIds"],
            EntityKind::EngagementEvent => &["userId", "eventType"],
        }
    }

    /// Fields clients may write; anything else is dropped from data clauses.
    pub fn writable_fields(self) -> &'static [&'static str] {
        match self {
            EntityKind::Review => &[
                "bookId",
                "userId",
                "rating",
                "reviewText",
                "status",
                "moderatedBy",
                "isActive",
            ],
            EntityKind::Recommendation => &[
                "userId",
                "bookIds",
                "generatedBy",
                "context",
                "isActive",
            ],
            EntityKind::EngagementEvent => &[
                "userId",
                "eventType",
                "bookId",
                "eventTime",
                "details",
                "isActive",
            ],
        }
    }

    /// Enum-typed fields and the dictionary that labels them.
    pub fn enum_fields(self) -> &'static [(&'static str, &'static str)] {
        match self {
            EntityKind::Review => &[("status", "reviewStatus")],
            EntityKind::Recommendation | EntityKind::EngagementEvent => &[],
        }
    }

    pub fn from_name(name: &str) -> Result<Self, DomainError> {
        Self::ALL
            .into_iter()
            .find(|kind| {
                kind.name().eq_ignore_ascii_case(name)
                    || kind.plural().eq_ignore_ascii_case(name)
                    || kind.table() == name
            })
            .ok_or_else(|| DomainError::unknown_entity(name))
    }
}

/// A persisted row as seen by the pipeline: a field map plus standard metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRecord(Map<String, Value>);

impl EntityRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(FIELD_ID).and_then(Value::as_str)
    }

    /// Records without an `isActive` flag count as active.
    pub fn is_active(&self) -> bool {
        self.0
            .get(FIELD_IS_ACTIVE)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn owner(&self) -> Option<&str> {
        self.0.get(FIELD_OWNER).and_then(Value::as_str)
    }

    pub fn tenant(&self) -> Option<&str> {
        self.0.get(FIELD_TENANT).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Overlay `changes` onto a copy of this record and stamp `updatedAt`.
    pub fn merged(&self, changes: &Map<String, Value>) -> Self {
        let mut next = self.0.clone();
        for (key, value) in changes {
            next.insert(key.clone(), value.clone());
        }
        next.insert(FIELD_UPDATED_AT.to_string(), Value::String(now_rfc3339()));
        Self(next)
    }

    /// Keep only the listed fields; `id` always survives.
    pub fn project(&self, fields: &[String]) -> Self {
        if fields.is_empty() {
            return self.clone();
        }
        let mut out = Map::new();
        if let Some(id) = self.0.get(FIELD_ID) {
            out.insert(FIELD_ID.to_string(), id.clone());
        }
        for field in fields {
            if let Some(value) = self.0.get(field) {
                out.insert(field.clone(), value.clone());
            }
        }
        Self(out)
    }
}

/// Changed user fields between two states, as `(old values, new values)`.
pub fn diff_records(old: &EntityRecord, new: &EntityRecord) -> (Map<String, Value>, Map<String, Value>) {
    let mut old_values = Map::new();
    let mut new_values = Map::new();
    for (key, value) in new.fields() {
        if SYSTEM_FIELDS.contains(&key.as_str()) {
            continue;
        }
        let previous = old.get(key).cloned().unwrap_or(Value::Null);
        if &previous != value {
            old_values.insert(key.clone(), previous);
            new_values.insert(key.clone(), value.clone());
        }
    }
    (old_values, new_values)
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH.to_string())
}
