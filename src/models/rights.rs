use std::fmt;
use std::str::FromStr;

use enum_iterator::IntoEnumIterator;

use models::{Organization, OrganizationId, UserId};
use schema::user_right_at_org;

/// Capability an employee may hold on an organization.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash, IntoEnumIterator)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    OrgAccountManagement,
    MoneyManagement,
    ProjectManagement,
}

#[derive(Debug, Clone, Fail)]
#[fail(display = "failed to parse capability")]
pub struct ParseCapabilityError;

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::OrgAccountManagement => "org_account_management",
            Capability::MoneyManagement => "money_management",
            Capability::ProjectManagement => "project_management",
        }
    }
}

impl FromStr for Capability {
    type Err = ParseCapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::into_enum_iter()
            .find(|capability| capability.as_str() == s)
            .ok_or(ParseCapabilityError)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[table_name = "user_right_at_org"]
#[primary_key(org_id, user_id)]
pub struct EmployeeRights {
    pub org_id: OrganizationId,
    pub user_id: UserId,
    pub org_account_management: bool,
    pub money_management: bool,
    pub project_management: bool,
}

impl EmployeeRights {
    pub fn none(org_id: OrganizationId, user_id: UserId) -> Self {
        Self {
            org_id,
            user_id,
            org_account_management: false,
            money_management: false,
            project_management: false,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::OrgAccountManagement => self.org_account_management,
            Capability::MoneyManagement => self.money_management,
            Capability::ProjectManagement => self.project_management,
        }
    }
}

/// Rights an organization grants to an employee, as sent over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RightsPayload {
    #[serde(default)]
    pub org_account_management: bool,
    #[serde(default)]
    pub money_management: bool,
    #[serde(default)]
    pub project_management: bool,
}

impl RightsPayload {
    pub fn into_rights(self, org_id: OrganizationId, user_id: UserId) -> EmployeeRights {
        EmployeeRights {
            org_id,
            user_id,
            org_account_management: self.org_account_management,
            money_management: self.money_management,
            project_management: self.project_management,
        }
    }
}

/// The owner holds every capability; anybody else only what their rights row grants.
/// Bans are not considered here.
pub fn grants(org: &Organization, rights: Option<&EmployeeRights>, user_id: UserId, capability: Capability) -> bool {
    if org.owner_id == user_id {
        return true;
    }

    rights
        .filter(|rights| rights.org_id == org.id && rights.user_id == user_id)
        .map(|rights| rights.has(capability))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use models::{Amount, OrgType};

    fn org() -> Organization {
        Organization {
            id: OrganizationId::new(5),
            name: "Acme".to_string(),
            owner_id: UserId::new(1),
            balance: Amount::zero(),
            org_type: OrgType::Jur,
            is_banned: false,
            created_at: NaiveDate::from_ymd(2019, 1, 1).and_hms(0, 0, 0),
        }
    }

    #[test]
    fn owner_holds_every_capability() {
        for capability in Capability::into_enum_iter() {
            assert!(grants(&org(), None, UserId::new(1), capability));
        }
    }

    #[test]
    fn employee_holds_only_granted_capabilities() {
        let mut rights = EmployeeRights::none(OrganizationId::new(5), UserId::new(2));
        rights.project_management = true;

        assert!(grants(&org(), Some(&rights), UserId::new(2), Capability::ProjectManagement));
        assert!(!grants(&org(), Some(&rights), UserId::new(2), Capability::MoneyManagement));
        assert!(!grants(&org(), Some(&rights), UserId::new(3), Capability::ProjectManagement));
        assert!(!grants(&org(), None, UserId::new(2), Capability::OrgAccountManagement));
    }

    #[test]
    fn capability_names() {
        assert_eq!("money_management".parse::<Capability>().unwrap(), Capability::MoneyManagement);
        assert!("admin".parse::<Capability>().is_err());
    }
}
