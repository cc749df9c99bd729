use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::sql_types::{Uuid as SqlUuid, VarChar};
use uuid::Uuid;

use models::{Amount, HolderKind, HolderRef, TransactionId, UserId};
use schema::withdrawals;

#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, PartialEq, Eq, Hash, FromStr)]
#[sql_type = "SqlUuid"]
pub struct WithdrawalId(Uuid);
newtype_from_to_sql!(SqlUuid, WithdrawalId, WithdrawalId);

impl WithdrawalId {
    pub fn new(id: Uuid) -> Self {
        WithdrawalId(id)
    }

    pub fn inner(&self) -> &Uuid {
        &self.0
    }

    pub fn generate() -> Self {
        WithdrawalId(Uuid::new_v4())
    }
}

impl fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&format!("{}", self.0.hyphenated()))
    }
}

#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, Eq, PartialEq, Hash)]
#[sql_type = "VarChar"]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Fail)]
#[fail(display = "failed to parse withdrawal status")]
pub struct ParseWithdrawalStatusError;

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Succeeded => "succeeded",
            WithdrawalStatus::Failed => "failed",
        }
    }
}

impl FromStr for WithdrawalStatus {
    type Err = ParseWithdrawalStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WithdrawalStatus::Pending),
            "succeeded" => Ok(WithdrawalStatus::Succeeded),
            "failed" => Ok(WithdrawalStatus::Failed),
            _ => Err(ParseWithdrawalStatusError),
        }
    }
}

varchar_enum_sql!(WithdrawalStatus);

/// Payout in flight at the gateway. The entity is debited before the payout is
/// requested; a failed payout carries the compensating deposit.
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalIntent {
    pub id: WithdrawalId,
    pub external_id: Option<String>,
    pub entity: HolderRef,
    pub amount: Amount,
    pub destination: String,
    pub status: WithdrawalStatus,
    pub debit_transaction_id: TransactionId,
    pub refund_transaction_id: Option<TransactionId>,
    pub initiated_by: Option<UserId>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl WithdrawalIntent {
    pub fn refund_key(&self) -> String {
        match self.external_id {
            Some(ref external_id) => format!("{}:refund", external_id),
            None => format!("{}:refund", self.id),
        }
    }
}

#[derive(Debug, Clone, Queryable)]
pub struct RawWithdrawalIntent {
    pub id: WithdrawalId,
    pub external_id: Option<String>,
    pub entity_kind: HolderKind,
    pub entity_id: i32,
    pub amount: Amount,
    pub destination: String,
    pub status: WithdrawalStatus,
    pub debit_transaction_id: TransactionId,
    pub refund_transaction_id: Option<TransactionId>,
    pub initiated_by: Option<UserId>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<RawWithdrawalIntent> for WithdrawalIntent {
    fn from(raw: RawWithdrawalIntent) -> Self {
        let RawWithdrawalIntent {
            id,
            external_id,
            entity_kind,
            entity_id,
            amount,
            destination,
            status,
            debit_transaction_id,
            refund_transaction_id,
            initiated_by,
            created_at,
            updated_at,
        } = raw;

        WithdrawalIntent {
            id,
            external_id,
            entity: HolderRef::new(entity_kind, entity_id),
            amount,
            destination,
            status,
            debit_transaction_id,
            refund_transaction_id,
            initiated_by,
            created_at,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "withdrawals"]
pub struct NewWithdrawalIntent {
    pub id: WithdrawalId,
    pub entity_kind: HolderKind,
    pub entity_id: i32,
    pub amount: Amount,
    pub destination: String,
    pub status: WithdrawalStatus,
    pub debit_transaction_id: TransactionId,
    pub initiated_by: Option<UserId>,
}
