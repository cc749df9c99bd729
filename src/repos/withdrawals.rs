use chrono::Utc;
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::{Connection, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use failure::Fail;

use models::{NewWithdrawalIntent, RawWithdrawalIntent, TransactionId, WithdrawalId, WithdrawalIntent, WithdrawalStatus};
use schema::withdrawals::dsl as Withdrawals;

use super::error::*;
use super::types::RepoResultV2;

pub trait WithdrawalsRepo {
    fn create(&self, payload: NewWithdrawalIntent) -> RepoResultV2<WithdrawalIntent>;

    fn get(&self, withdrawal_id: WithdrawalId) -> RepoResultV2<Option<WithdrawalIntent>>;

    fn get_by_external_id(&self, external_id: &str) -> RepoResultV2<Option<WithdrawalIntent>>;

    fn set_external_id(&self, withdrawal_id: WithdrawalId, external_id: String) -> RepoResultV2<WithdrawalIntent>;

    /// `pending -> succeeded`. `None` when the intent was not pending.
    fn complete(&self, withdrawal_id: WithdrawalId) -> RepoResultV2<Option<WithdrawalIntent>>;

    /// `pending -> failed`, recording the refund. `None` when the intent was not pending.
    fn fail(&self, withdrawal_id: WithdrawalId, refund_transaction_id: TransactionId) -> RepoResultV2<Option<WithdrawalIntent>>;

    fn list_pending(&self, limit: i64) -> RepoResultV2<Vec<WithdrawalIntent>>;
}

pub struct WithdrawalsRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> WithdrawalsRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> WithdrawalsRepo
    for WithdrawalsRepoImpl<'a, T>
{
    fn create(&self, payload: NewWithdrawalIntent) -> RepoResultV2<WithdrawalIntent> {
        debug!("Creating a withdrawal intent using payload: {:?}", payload);

        diesel::insert_into(Withdrawals::withdrawals)
            .values(&payload)
            .get_result::<RawWithdrawalIntent>(self.db_conn)
            .map(WithdrawalIntent::from)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => payload)
            })
    }

    fn get(&self, withdrawal_id: WithdrawalId) -> RepoResultV2<Option<WithdrawalIntent>> {
        debug!("Getting a withdrawal intent with ID: {}", withdrawal_id);

        Withdrawals::withdrawals
            .filter(Withdrawals::id.eq(withdrawal_id))
            .get_result::<RawWithdrawalIntent>(self.db_conn)
            .optional()
            .map(|intent| intent.map(WithdrawalIntent::from))
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => withdrawal_id)
            })
    }

    fn get_by_external_id(&self, external_id: &str) -> RepoResultV2<Option<WithdrawalIntent>> {
        debug!("Getting a withdrawal intent with external ID: {}", external_id);

        Withdrawals::withdrawals
            .filter(Withdrawals::external_id.eq(external_id))
            .get_result::<RawWithdrawalIntent>(self.db_conn)
            .optional()
            .map(|intent| intent.map(WithdrawalIntent::from))
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => external_id)
            })
    }

    fn set_external_id(&self, withdrawal_id: WithdrawalId, external_id: String) -> RepoResultV2<WithdrawalIntent> {
        debug!("Setting external ID of withdrawal intent {} to {}", withdrawal_id, external_id);

        diesel::update(Withdrawals::withdrawals.filter(Withdrawals::id.eq(withdrawal_id)))
            .set((
                Withdrawals::external_id.eq(Some(external_id.clone())),
                Withdrawals::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result::<RawWithdrawalIntent>(self.db_conn)
            .map(WithdrawalIntent::from)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => withdrawal_id, external_id)
            })
    }

    fn complete(&self, withdrawal_id: WithdrawalId) -> RepoResultV2<Option<WithdrawalIntent>> {
        debug!("Completing withdrawal intent {}", withdrawal_id);

        let target = Withdrawals::withdrawals
            .filter(Withdrawals::id.eq(withdrawal_id))
            .filter(Withdrawals::status.eq(WithdrawalStatus::Pending));

        diesel::update(target)
            .set((
                Withdrawals::status.eq(WithdrawalStatus::Succeeded),
                Withdrawals::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result::<RawWithdrawalIntent>(self.db_conn)
            .optional()
            .map(|intent| intent.map(WithdrawalIntent::from))
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => withdrawal_id)
            })
    }

    fn fail(&self, withdrawal_id: WithdrawalId, refund_transaction_id: TransactionId) -> RepoResultV2<Option<WithdrawalIntent>> {
        debug!("Failing withdrawal intent {} with refund {}", withdrawal_id, refund_transaction_id);

        let target = Withdrawals::withdrawals
            .filter(Withdrawals::id.eq(withdrawal_id))
            .filter(Withdrawals::status.eq(WithdrawalStatus::Pending));

        diesel::update(target)
            .set((
                Withdrawals::status.eq(WithdrawalStatus::Failed),
                Withdrawals::refund_transaction_id.eq(Some(refund_transaction_id)),
                Withdrawals::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result::<RawWithdrawalIntent>(self.db_conn)
            .optional()
            .map(|intent| intent.map(WithdrawalIntent::from))
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => withdrawal_id, refund_transaction_id)
            })
    }

    fn list_pending(&self, limit: i64) -> RepoResultV2<Vec<WithdrawalIntent>> {
        debug!("Listing pending withdrawal intents (limit: {})", limit);

        Withdrawals::withdrawals
            .filter(Withdrawals::status.eq(WithdrawalStatus::Pending))
            .order(Withdrawals::created_at)
            .limit(limit)
            .get_results::<RawWithdrawalIntent>(self.db_conn)
            .map(|intents| intents.into_iter().map(WithdrawalIntent::from).collect())
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => limit)
            })
    }
}
