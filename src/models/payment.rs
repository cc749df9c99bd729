use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::sql_types::{Uuid as SqlUuid, VarChar};
use uuid::Uuid;

use models::{Amount, HolderKind, HolderRef, TransactionId, UserId};
use schema::payments;

#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, PartialEq, Eq, Hash, FromStr)]
#[sql_type = "SqlUuid"]
pub struct PaymentId(Uuid);
newtype_from_to_sql!(SqlUuid, PaymentId, PaymentId);

impl PaymentId {
    pub fn new(id: Uuid) -> Self {
        PaymentId(id)
    }

    pub fn inner(&self) -> &Uuid {
        &self.0
    }

    pub fn generate() -> Self {
        PaymentId(Uuid::new_v4())
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&format!("{}", self.0.hyphenated()))
    }
}

/// `pending_settlement` means the gateway confirmed the payment but the deposit
/// has not been applied yet.
#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, Eq, PartialEq, Hash)]
#[sql_type = "VarChar"]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    PendingSettlement,
    Succeeded,
    Canceled,
}

#[derive(Debug, Clone, Fail)]
#[fail(display = "failed to parse payment status")]
pub struct ParsePaymentStatusError;

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::PendingSettlement => "pending_settlement",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            PaymentStatus::Succeeded | PaymentStatus::Canceled => true,
            PaymentStatus::Pending | PaymentStatus::PendingSettlement => false,
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ParsePaymentStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "pending_settlement" => Ok(PaymentStatus::PendingSettlement),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "canceled" => Ok(PaymentStatus::Canceled),
            _ => Err(ParsePaymentStatusError),
        }
    }
}

varchar_enum_sql!(PaymentStatus);

/// Deposit in flight at the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub id: PaymentId,
    pub external_id: String,
    pub entity: HolderRef,
    pub amount: Amount,
    pub status: PaymentStatus,
    pub confirmation_url: Option<String>,
    pub transaction_id: Option<TransactionId>,
    pub initiated_by: Option<UserId>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable)]
pub struct RawPaymentIntent {
    pub id: PaymentId,
    pub external_id: String,
    pub entity_kind: HolderKind,
    pub entity_id: i32,
    pub amount: Amount,
    pub status: PaymentStatus,
    pub confirmation_url: Option<String>,
    pub transaction_id: Option<TransactionId>,
    pub initiated_by: Option<UserId>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<RawPaymentIntent> for PaymentIntent {
    fn from(raw: RawPaymentIntent) -> Self {
        let RawPaymentIntent {
            id,
            external_id,
            entity_kind,
            entity_id,
            amount,
            status,
            confirmation_url,
            transaction_id,
            initiated_by,
            created_at,
            updated_at,
        } = raw;

        PaymentIntent {
            id,
            external_id,
            entity: HolderRef::new(entity_kind, entity_id),
            amount,
            status,
            confirmation_url,
            transaction_id,
            initiated_by,
            created_at,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "payments"]
pub struct NewPaymentIntent {
    pub id: PaymentId,
    pub external_id: String,
    pub entity_kind: HolderKind,
    pub entity_id: i32,
    pub amount: Amount,
    pub status: PaymentStatus,
    pub confirmation_url: Option<String>,
    pub initiated_by: Option<UserId>,
}
