use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::sql_types::{BigInt, VarChar};

use models::event::Event;
use schema::event_store;

#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, PartialEq, Eq, FromStr, Display)]
#[sql_type = "BigInt"]
pub struct EventEntryId(i64);
newtype_from_to_sql!(BigInt, EventEntryId, EventEntryId);

impl EventEntryId {
    pub fn new(id: i64) -> Self {
        EventEntryId(id)
    }

    pub fn inner(&self) -> i64 {
        self.0
    }
}

/// Outbox entry lifecycle: `pending -> in_progress -> completed`, back to `pending`
/// after a failed attempt, `failed` once attempts run out.
#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, PartialEq, Eq)]
#[sql_type = "VarChar"]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Fail)]
#[fail(display = "failed to parse event status")]
pub struct ParseEventStatusError;

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::InProgress => "in_progress",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }

    /// Status an entry returns to after an unsuccessful attempt.
    pub fn after_failure(attempt_count: i32, max_attempts: u32) -> Self {
        if attempt_count >= max_attempts as i32 {
            EventStatus::Failed
        } else {
            EventStatus::Pending
        }
    }
}

impl FromStr for EventStatus {
    type Err = ParseEventStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "in_progress" => Ok(EventStatus::InProgress),
            "completed" => Ok(EventStatus::Completed),
            "failed" => Ok(EventStatus::Failed),
            _ => Err(ParseEventStatusError),
        }
    }
}

varchar_enum_sql!(EventStatus);

#[derive(Debug, Clone, Serialize)]
pub struct EventEntry {
    pub id: EventEntryId,
    pub event: Event,
    pub status: EventStatus,
    pub attempt_count: u32,
    pub created_at: NaiveDateTime,
    pub status_updated_at: NaiveDateTime,
    pub event_key: Option<String>,
}

/// Row as stored. The event itself is kept as JSONB.
#[derive(Debug, Clone, Queryable)]
pub struct StoredEvent {
    pub id: EventEntryId,
    pub event: serde_json::Value,
    pub status: EventStatus,
    pub attempt_count: i32,
    pub created_at: NaiveDateTime,
    pub status_updated_at: NaiveDateTime,
    pub event_key: Option<String>,
}

impl StoredEvent {
    pub fn into_entry(self) -> Result<EventEntry, serde_json::Error> {
        let event = serde_json::from_value::<Event>(self.event)?;
        Ok(EventEntry {
            id: self.id,
            event,
            status: self.status,
            attempt_count: self.attempt_count.max(0) as u32,
            created_at: self.created_at,
            status_updated_at: self.status_updated_at,
            event_key: self.event_key,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "event_store"]
pub struct NewStoredEvent {
    pub event: serde_json::Value,
    pub status: EventStatus,
    pub attempt_count: i32,
    pub event_key: Option<String>,
}

impl NewStoredEvent {
    /// Pending entry keyed by the payload's deduplication key.
    pub fn pending(event: &Event) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: serde_json::to_value(event)?,
            status: EventStatus::Pending,
            attempt_count: 0,
            event_key: event.payload.key(),
        })
    }
}
