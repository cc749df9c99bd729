use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::sql_types::{Integer, VarChar};

use models::{Amount, UserId};
use schema::organizations;

#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromStr, Display, From)]
#[sql_type = "Integer"]
pub struct OrganizationId(i32);
newtype_from_to_sql!(Integer, OrganizationId, OrganizationId);

impl OrganizationId {
    pub fn new(id: i32) -> Self {
        OrganizationId(id)
    }

    pub fn inner(&self) -> i32 {
        self.0
    }
}

/// Legal form of an organization.
#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, Eq, PartialEq, Hash)]
#[sql_type = "VarChar"]
#[serde(rename_all = "lowercase")]
pub enum OrgType {
    /// Private individual
    Phys,
    /// Legal entity
    Jur,
    /// Sole proprietor
    Ip,
}

#[derive(Debug, Clone, Fail)]
#[fail(display = "failed to parse organization type")]
pub struct ParseOrgTypeError;

impl OrgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgType::Phys => "phys",
            OrgType::Jur => "jur",
            OrgType::Ip => "ip",
        }
    }
}

impl FromStr for OrgType {
    type Err = ParseOrgTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phys" => Ok(OrgType::Phys),
            "jur" => Ok(OrgType::Jur),
            "ip" => Ok(OrgType::Ip),
            _ => Err(ParseOrgTypeError),
        }
    }
}

varchar_enum_sql!(OrgType);

#[derive(Debug, Clone, Serialize, Queryable)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub owner_id: UserId,
    pub balance: Amount,
    pub org_type: OrgType,
    pub is_banned: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "organizations"]
pub struct NewOrganization {
    pub id: OrganizationId,
    pub name: String,
    pub owner_id: UserId,
    pub balance: Amount,
    pub org_type: OrgType,
    pub is_banned: bool,
}
