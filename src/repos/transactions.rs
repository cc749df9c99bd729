use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use diesel::connection::AnsiTransactionManager;
use diesel::dsl::sum;
use diesel::pg::Pg;
use diesel::{BoolExpressionMethods, Connection, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use failure::Fail;

use models::*;
use schema::transactions::dsl as Transactions;

use super::error::*;
use super::types::RepoResultV2;

/// Append-only ledger of money movements.
pub trait TransactionsRepo {
    /// Inserts a record already carrying its cum sums. A reused idempotency key
    /// fails with `Constraints`.
    fn append(&self, record: NewLedgerRecord) -> RepoResultV2<LedgerRecord>;

    fn get(&self, transaction_id: TransactionId) -> RepoResultV2<Option<LedgerRecord>>;

    fn get_by_idempotency_key(&self, key: &str) -> RepoResultV2<Option<LedgerRecord>>;

    /// Most recent cum sum on either side for the holder, zero without history.
    fn last_balance(&self, holder: HolderRef) -> RepoResultV2<Amount>;

    /// Records touching the holder, newest first.
    fn list_for_holder(&self, holder: HolderRef, offset: i64, limit: i64) -> RepoResultV2<Vec<LedgerRecord>>;

    /// `user_to_project` records of the project, ordered by user then id.
    fn investments_of(&self, project_id: ProjectId, excluded_user: Option<UserId>) -> RepoResultV2<Vec<Investment>>;

    fn investors_of(&self, project_id: ProjectId, excluded_user: Option<UserId>) -> RepoResultV2<Vec<Investor>>;

    fn has_payback(&self, project_id: ProjectId, user_id: UserId) -> RepoResultV2<bool>;

    /// Total of `project_to_user` records from the project to the user.
    fn paid_back_to(&self, project_id: ProjectId, user_id: UserId) -> RepoResultV2<Amount>;

    /// Total credited to the project escrow.
    fn sum_in(&self, project_id: ProjectId) -> RepoResultV2<Amount>;

    /// Total debited from the project escrow.
    fn sum_out(&self, project_id: ProjectId) -> RepoResultV2<Amount>;
}

pub struct TransactionsRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> TransactionsRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> TransactionsRepo
    for TransactionsRepoImpl<'a, T>
{
    fn append(&self, record: NewLedgerRecord) -> RepoResultV2<LedgerRecord> {
        debug!("Appending a ledger record: {:?}", record);

        diesel::insert_into(Transactions::transactions)
            .values(&record)
            .get_result::<RawLedgerRecord>(self.db_conn)
            .map(LedgerRecord::from)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => record)
            })
    }

    fn get(&self, transaction_id: TransactionId) -> RepoResultV2<Option<LedgerRecord>> {
        debug!("Getting a ledger record with ID: {}", transaction_id);

        Transactions::transactions
            .filter(Transactions::id.eq(transaction_id))
            .get_result::<RawLedgerRecord>(self.db_conn)
            .optional()
            .map(|record| record.map(LedgerRecord::from))
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => transaction_id)
            })
    }

    fn get_by_idempotency_key(&self, key: &str) -> RepoResultV2<Option<LedgerRecord>> {
        debug!("Getting a ledger record with idempotency key: {}", key);

        Transactions::transactions
            .filter(Transactions::idempotency_key.eq(key))
            .get_result::<RawLedgerRecord>(self.db_conn)
            .optional()
            .map(|record| record.map(LedgerRecord::from))
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => key)
            })
    }

    fn last_balance(&self, holder: HolderRef) -> RepoResultV2<Amount> {
        debug!("Getting last recorded balance of {}", holder);

        if holder.is_external() {
            return Ok(Amount::zero());
        }

        let is_sender = Transactions::from_kind.eq(holder.kind).and(Transactions::from_id.eq(holder.id));
        let is_receiver = Transactions::to_kind.eq(holder.kind).and(Transactions::to_id.eq(holder.id));

        Transactions::transactions
            .filter(is_sender.or(is_receiver))
            .order(Transactions::id.desc())
            .first::<RawLedgerRecord>(self.db_conn)
            .optional()
            .map(|record| {
                record
                    .map(LedgerRecord::from)
                    .and_then(|record| record.balance_of(holder))
                    .unwrap_or_else(Amount::zero)
            })
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => holder)
            })
    }

    fn list_for_holder(&self, holder: HolderRef, offset: i64, limit: i64) -> RepoResultV2<Vec<LedgerRecord>> {
        debug!("Listing ledger records of {} (offset: {}, limit: {})", holder, offset, limit);

        let is_sender = Transactions::from_kind.eq(holder.kind).and(Transactions::from_id.eq(holder.id));
        let is_receiver = Transactions::to_kind.eq(holder.kind).and(Transactions::to_id.eq(holder.id));

        Transactions::transactions
            .filter(is_sender.or(is_receiver))
            .order(Transactions::id.desc())
            .offset(offset)
            .limit(limit)
            .get_results::<RawLedgerRecord>(self.db_conn)
            .map(|records| records.into_iter().map(LedgerRecord::from).collect())
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => holder, offset, limit)
            })
    }

    fn investments_of(&self, project_id: ProjectId, excluded_user: Option<UserId>) -> RepoResultV2<Vec<Investment>> {
        debug!("Getting investments into project {} excluding {:?}", project_id, excluded_user);

        Transactions::transactions
            .filter(Transactions::kind.eq(TransferKind::UserToProject))
            .filter(Transactions::to_kind.eq(HolderKind::Project))
            .filter(Transactions::to_id.eq(project_id.inner()))
            .order((Transactions::from_id, Transactions::id))
            .select((Transactions::from_id, Transactions::amount, Transactions::created_at))
            .get_results::<(i32, Amount, NaiveDateTime)>(self.db_conn)
            .map(|rows| {
                rows.into_iter()
                    .map(|(user_id, amount, created_at)| Investment {
                        user_id: UserId::new(user_id),
                        amount,
                        created_at,
                    })
                    .filter(|investment| Some(investment.user_id) != excluded_user)
                    .collect()
            })
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id, excluded_user)
            })
    }

    fn investors_of(&self, project_id: ProjectId, excluded_user: Option<UserId>) -> RepoResultV2<Vec<Investor>> {
        let investments = self.investments_of(project_id, excluded_user)?;

        let mut totals: BTreeMap<UserId, Amount> = BTreeMap::new();
        for Investment { user_id, amount, .. } in investments {
            let total = totals.entry(user_id).or_insert_with(Amount::zero);
            *total = total.checked_add(amount).ok_or({
                let e = format_err!("Investments of user {} into project {} overflow", user_id, project_id);
                ectx!(try err e, ErrorKind::Internal)
            })?;
        }

        Ok(totals
            .into_iter()
            .map(|(user_id, total_invested)| Investor { user_id, total_invested })
            .collect())
    }

    fn has_payback(&self, project_id: ProjectId, user_id: UserId) -> RepoResultV2<bool> {
        debug!("Checking payback from project {} to user {}", project_id, user_id);

        Transactions::transactions
            .filter(Transactions::kind.eq(TransferKind::ProjectToUser))
            .filter(Transactions::from_kind.eq(HolderKind::Project))
            .filter(Transactions::from_id.eq(project_id.inner()))
            .filter(Transactions::to_kind.eq(HolderKind::User))
            .filter(Transactions::to_id.eq(user_id.inner()))
            .select(Transactions::id)
            .first::<TransactionId>(self.db_conn)
            .optional()
            .map(|id| id.is_some())
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id, user_id)
            })
    }

    fn paid_back_to(&self, project_id: ProjectId, user_id: UserId) -> RepoResultV2<Amount> {
        debug!("Summing paybacks from project {} to user {}", project_id, user_id);

        Transactions::transactions
            .filter(Transactions::kind.eq(TransferKind::ProjectToUser))
            .filter(Transactions::from_kind.eq(HolderKind::Project))
            .filter(Transactions::from_id.eq(project_id.inner()))
            .filter(Transactions::to_kind.eq(HolderKind::User))
            .filter(Transactions::to_id.eq(user_id.inner()))
            .select(sum(Transactions::amount))
            .first::<Option<Amount>>(self.db_conn)
            .map(|total| total.unwrap_or_else(Amount::zero))
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id, user_id)
            })
    }

    fn sum_in(&self, project_id: ProjectId) -> RepoResultV2<Amount> {
        debug!("Summing money credited to project {}", project_id);

        Transactions::transactions
            .filter(Transactions::to_kind.eq(HolderKind::Project))
            .filter(Transactions::to_id.eq(project_id.inner()))
            .select(sum(Transactions::amount))
            .first::<Option<Amount>>(self.db_conn)
            .map(|total| total.unwrap_or_else(Amount::zero))
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id)
            })
    }

    fn sum_out(&self, project_id: ProjectId) -> RepoResultV2<Amount> {
        debug!("Summing money debited from project {}", project_id);

        Transactions::transactions
            .filter(Transactions::from_kind.eq(HolderKind::Project))
            .filter(Transactions::from_id.eq(project_id.inner()))
            .select(sum(Transactions::amount))
            .first::<Option<Amount>>(self.db_conn)
            .map(|total| total.unwrap_or_else(Amount::zero))
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id)
            })
    }
}
