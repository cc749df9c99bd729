use std::str::FromStr;

use diesel::sql_types::VarChar;
use enum_iterator::IntoEnumIterator;

use models::HolderKind;

/// Closed set of money movements the ledger accepts.
#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, Eq, PartialEq, Hash, IntoEnumIterator)]
#[sql_type = "VarChar"]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    UserDeposit,
    OrgDeposit,
    UserWithdraw,
    OrgWithdraw,
    UserToProject,
    ProjectToUser,
    UserToOrg,
    OrgToUser,
}

#[derive(Debug, Clone, Fail)]
#[fail(display = "failed to parse transfer kind")]
pub struct ParseTransferKindError;

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::UserDeposit => "user_deposit",
            TransferKind::OrgDeposit => "org_deposit",
            TransferKind::UserWithdraw => "user_withdraw",
            TransferKind::OrgWithdraw => "org_withdraw",
            TransferKind::UserToProject => "user_to_project",
            TransferKind::ProjectToUser => "project_to_user",
            TransferKind::UserToOrg => "user_to_org",
            TransferKind::OrgToUser => "org_to_user",
        }
    }

    /// The only legal `(from, to)` holder kinds for this transfer.
    pub fn schema(&self) -> (HolderKind, HolderKind) {
        match self {
            TransferKind::UserDeposit => (HolderKind::External, HolderKind::User),
            TransferKind::OrgDeposit => (HolderKind::External, HolderKind::Organization),
            TransferKind::UserWithdraw => (HolderKind::User, HolderKind::External),
            TransferKind::OrgWithdraw => (HolderKind::Organization, HolderKind::External),
            TransferKind::UserToProject => (HolderKind::User, HolderKind::Project),
            TransferKind::ProjectToUser => (HolderKind::Project, HolderKind::User),
            TransferKind::UserToOrg => (HolderKind::User, HolderKind::Organization),
            TransferKind::OrgToUser => (HolderKind::Organization, HolderKind::User),
        }
    }

    pub fn is_deposit(&self) -> bool {
        self.schema().0 == HolderKind::External
    }

    pub fn is_withdrawal(&self) -> bool {
        self.schema().1 == HolderKind::External
    }

    pub fn deposit_for(kind: HolderKind) -> Option<TransferKind> {
        TransferKind::into_enum_iter().find(|k| k.is_deposit() && k.schema().1 == kind)
    }

    pub fn withdrawal_for(kind: HolderKind) -> Option<TransferKind> {
        TransferKind::into_enum_iter().find(|k| k.is_withdrawal() && k.schema().0 == kind)
    }
}

impl FromStr for TransferKind {
    type Err = ParseTransferKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransferKind::into_enum_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(ParseTransferKindError)
    }
}

varchar_enum_sql!(TransferKind);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_exactly_one_real_or_external_side_pair() {
        for kind in TransferKind::into_enum_iter() {
            let (from, to) = kind.schema();
            assert_ne!(from, to);
            assert!(!(kind.is_deposit() && kind.is_withdrawal()));
            assert_eq!(kind.as_str().parse::<TransferKind>().unwrap(), kind);
        }
    }

    #[test]
    fn deposit_and_withdrawal_lookup() {
        assert_eq!(TransferKind::deposit_for(HolderKind::User), Some(TransferKind::UserDeposit));
        assert_eq!(TransferKind::deposit_for(HolderKind::Organization), Some(TransferKind::OrgDeposit));
        assert_eq!(TransferKind::deposit_for(HolderKind::Project), None);
        assert_eq!(TransferKind::withdrawal_for(HolderKind::Organization), Some(TransferKind::OrgWithdraw));
        assert_eq!(TransferKind::withdrawal_for(HolderKind::External), None);
    }

    #[test]
    fn serde_names_match_storage_names() {
        let json = serde_json::to_string(&TransferKind::UserToProject).unwrap();
        assert_eq!(json, "\"user_to_project\"");
    }
}
