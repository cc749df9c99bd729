use std::fmt;
use std::str::FromStr;

use diesel::sql_types::VarChar;
use enum_iterator::IntoEnumIterator;

use models::{OrganizationId, ProjectId, UserId};

/// Kind of a balance holder. `External` is the off-ledger world on the other side of
/// deposits and withdrawals: it has no balance and is never locked.
#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, Eq, PartialEq, Hash, IntoEnumIterator)]
#[sql_type = "VarChar"]
#[serde(rename_all = "snake_case")]
pub enum HolderKind {
    External,
    User,
    #[serde(alias = "org")]
    Organization,
    Project,
}

#[derive(Debug, Clone, Fail)]
#[fail(display = "failed to parse holder kind")]
pub struct ParseHolderKindError;

impl HolderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolderKind::External => "external",
            HolderKind::User => "user",
            HolderKind::Organization => "organization",
            HolderKind::Project => "project",
        }
    }

    /// Position in the canonical lock order: projects first, then organizations, then users.
    fn lock_rank(&self) -> u8 {
        match self {
            HolderKind::Project => 0,
            HolderKind::Organization => 1,
            HolderKind::User => 2,
            HolderKind::External => 3,
        }
    }
}

impl FromStr for HolderKind {
    type Err = ParseHolderKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "external" => Ok(HolderKind::External),
            "user" => Ok(HolderKind::User),
            "organization" | "org" => Ok(HolderKind::Organization),
            "project" => Ok(HolderKind::Project),
            _ => Err(ParseHolderKindError),
        }
    }
}

varchar_enum_sql!(HolderKind);

/// Reference to one side of a transfer.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash)]
pub struct HolderRef {
    pub kind: HolderKind,
    pub id: i32,
}

impl HolderRef {
    pub fn new(kind: HolderKind, id: i32) -> Self {
        Self { kind, id }
    }

    pub fn external() -> Self {
        Self {
            kind: HolderKind::External,
            id: 0,
        }
    }

    pub fn user(user_id: UserId) -> Self {
        Self::new(HolderKind::User, user_id.inner())
    }

    pub fn organization(org_id: OrganizationId) -> Self {
        Self::new(HolderKind::Organization, org_id.inner())
    }

    pub fn project(project_id: ProjectId) -> Self {
        Self::new(HolderKind::Project, project_id.inner())
    }

    pub fn is_external(&self) -> bool {
        self.kind == HolderKind::External
    }

    /// External side must use id 0, real sides a positive id.
    pub fn is_well_formed(&self) -> bool {
        match self.kind {
            HolderKind::External => self.id == 0,
            _ => self.id > 0,
        }
    }

    pub fn lock_order_key(&self) -> (u8, i32) {
        (self.kind.lock_rank(), self.id)
    }
}

impl fmt::Display for HolderRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}
