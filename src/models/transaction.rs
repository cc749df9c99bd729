use chrono::NaiveDateTime;
use diesel::sql_types::BigInt;

use models::{Amount, HolderKind, HolderRef, TransferKind, UserId};
use schema::transactions;

#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromStr, Display)]
#[sql_type = "BigInt"]
pub struct TransactionId(i64);
newtype_from_to_sql!(BigInt, TransactionId, TransactionId);

impl TransactionId {
    pub fn new(id: i64) -> Self {
        TransactionId(id)
    }

    pub fn inner(&self) -> i64 {
        self.0
    }
}

/// Append-only ledger record. Cum sums are the post-apply balances of each side,
/// absent on the external side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRecord {
    pub id: TransactionId,
    pub from: HolderRef,
    pub to: HolderRef,
    pub kind: TransferKind,
    pub amount: Amount,
    pub created_at: NaiveDateTime,
    pub cum_sum_of_sender: Option<Amount>,
    pub cum_sum_of_receiver: Option<Amount>,
    pub idempotency_key: Option<String>,
    pub initiated_by: Option<UserId>,
}

impl LedgerRecord {
    /// Whether a replay with these parameters describes the same movement.
    pub fn matches(&self, kind: TransferKind, from: HolderRef, to: HolderRef, amount: Amount) -> bool {
        self.kind == kind && self.from == from && self.to == to && self.amount == amount
    }

    /// Post-apply balance of `holder` as recorded on this record.
    pub fn balance_of(&self, holder: HolderRef) -> Option<Amount> {
        if self.from == holder {
            self.cum_sum_of_sender
        } else if self.to == holder {
            self.cum_sum_of_receiver
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Queryable)]
pub struct RawLedgerRecord {
    pub id: TransactionId,
    pub from_kind: HolderKind,
    pub from_id: i32,
    pub to_kind: HolderKind,
    pub to_id: i32,
    pub kind: TransferKind,
    pub amount: Amount,
    pub created_at: NaiveDateTime,
    pub cum_sum_of_sender: Option<Amount>,
    pub cum_sum_of_receiver: Option<Amount>,
    pub idempotency_key: Option<String>,
    pub initiated_by: Option<UserId>,
}

impl From<RawLedgerRecord> for LedgerRecord {
    fn from(raw: RawLedgerRecord) -> Self {
        let RawLedgerRecord {
            id,
            from_kind,
            from_id,
            to_kind,
            to_id,
            kind,
            amount,
            created_at,
            cum_sum_of_sender,
            cum_sum_of_receiver,
            idempotency_key,
            initiated_by,
        } = raw;

        LedgerRecord {
            id,
            from: HolderRef::new(from_kind, from_id),
            to: HolderRef::new(to_kind, to_id),
            kind,
            amount,
            created_at,
            cum_sum_of_sender,
            cum_sum_of_receiver,
            idempotency_key,
            initiated_by,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "transactions"]
pub struct NewLedgerRecord {
    pub from_kind: HolderKind,
    pub from_id: i32,
    pub to_kind: HolderKind,
    pub to_id: i32,
    pub kind: TransferKind,
    pub amount: Amount,
    pub created_at: NaiveDateTime,
    pub cum_sum_of_sender: Option<Amount>,
    pub cum_sum_of_receiver: Option<Amount>,
    pub idempotency_key: Option<String>,
    pub initiated_by: Option<UserId>,
}

impl NewLedgerRecord {
    pub fn from_holder(&self) -> HolderRef {
        HolderRef::new(self.from_kind, self.from_id)
    }

    pub fn to_holder(&self) -> HolderRef {
        HolderRef::new(self.to_kind, self.to_id)
    }
}
