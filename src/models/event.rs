use std::fmt;

use uuid::Uuid;

use models::{Amount, CloseReason, ProjectId, TransactionId, UserId};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, FromStr)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new(id: Uuid) -> Self {
        EventId(id)
    }

    pub fn inner(&self) -> Uuid {
        self.0
    }

    pub fn generate() -> Self {
        EventId(Uuid::new_v4())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&format!("{}", self.0.hyphenated()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::generate(),
            payload,
        }
    }
}

/// Effects written in the same transaction as the ledger change that caused them
/// and handled after commit.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    NoOp,
    ProjectGoalReached {
        project_id: ProjectId,
    },
    ProjectClosed {
        project_id: ProjectId,
        reason: CloseReason,
    },
    InvestorPaidBack {
        project_id: ProjectId,
        user_id: UserId,
        transaction_id: TransactionId,
        amount: Amount,
    },
}

impl EventPayload {
    /// Deduplication key: an effect is enqueued at most once per key.
    pub fn key(&self) -> Option<String> {
        match self {
            EventPayload::NoOp => None,
            EventPayload::ProjectGoalReached { project_id } => Some(format!("goal_reached:{}", project_id)),
            EventPayload::ProjectClosed { project_id, .. } => Some(format!("project_closed:{}", project_id)),
            EventPayload::InvestorPaidBack { transaction_id, .. } => Some(format!("paid_back:{}", transaction_id)),
        }
    }
}

impl fmt::Debug for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = serde_json::to_string(self).unwrap_or(format!("{{\"{}\": <serialization failed>}}", self));
        f.write_str(&s)
    }
}

impl fmt::Display for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            EventPayload::NoOp => "NoOp",
            EventPayload::ProjectGoalReached { .. } => "ProjectGoalReached",
            EventPayload::ProjectClosed { .. } => "ProjectClosed",
            EventPayload::InvestorPaidBack { .. } => "InvestorPaidBack",
        };

        f.write_str(&s)
    }
}
