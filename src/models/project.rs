use std::str::FromStr;

use chrono::{Duration, NaiveDateTime};
use diesel::sql_types::{Integer, VarChar};

use models::{Amount, OrganizationId, Percent};
use schema::projects;

#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromStr, Display, From)]
#[sql_type = "Integer"]
pub struct ProjectId(i32);
newtype_from_to_sql!(Integer, ProjectId, ProjectId);

impl ProjectId {
    pub fn new(id: i32) -> Self {
        ProjectId(id)
    }

    pub fn inner(&self) -> i32 {
        self.0
    }
}

/// Payout policy of a project.
#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, Eq, PartialEq, Hash)]
#[sql_type = "VarChar"]
#[serde(rename_all = "snake_case")]
pub enum MonetizationType {
    None,
    OneTimePercent,
    TimePercent,
}

#[derive(Debug, Clone, Fail)]
#[fail(display = "failed to parse monetization type")]
pub struct ParseMonetizationTypeError;

impl MonetizationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonetizationType::None => "none",
            MonetizationType::OneTimePercent => "one_time_percent",
            MonetizationType::TimePercent => "time_percent",
        }
    }
}

impl FromStr for MonetizationType {
    type Err = ParseMonetizationTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(MonetizationType::None),
            "one_time_percent" => Ok(MonetizationType::OneTimePercent),
            "time_percent" => Ok(MonetizationType::TimePercent),
            _ => Err(ParseMonetizationTypeError),
        }
    }
}

varchar_enum_sql!(MonetizationType);

/// Project escrow row.
#[derive(Debug, Clone, Serialize, Queryable)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub creator_org_id: OrganizationId,
    pub current_money: Amount,
    pub wanted_money: Amount,
    pub duration_days: i32,
    pub created_at: NaiveDateTime,
    pub monetization_type: MonetizationType,
    pub percent: Percent,
    pub is_completed: bool,
    pub is_public: bool,
    pub is_banned: bool,
    pub payback_started: bool,
    pub payback_started_at: Option<NaiveDateTime>,
    pub money_required_to_payback: Amount,
}

impl Project {
    pub fn expires_at(&self) -> NaiveDateTime {
        self.created_at + Duration::days(self.duration_days as i64)
    }

    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.expires_at() < now
    }

    pub fn is_open(&self) -> bool {
        !self.is_completed && !self.is_banned
    }
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "projects"]
pub struct NewProject {
    pub id: ProjectId,
    pub name: String,
    pub creator_org_id: OrganizationId,
    pub current_money: Amount,
    pub wanted_money: Amount,
    pub duration_days: i32,
    pub created_at: NaiveDateTime,
    pub monetization_type: MonetizationType,
    pub percent: Percent,
}
