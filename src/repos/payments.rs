use chrono::Utc;
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::{Connection, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use failure::Fail;

use models::{NewPaymentIntent, PaymentId, PaymentIntent, PaymentStatus, RawPaymentIntent, TransactionId};
use schema::payments::dsl as Payments;

use super::error::*;
use super::types::RepoResultV2;

pub trait PaymentsRepo {
    fn create(&self, payload: NewPaymentIntent) -> RepoResultV2<PaymentIntent>;

    fn get(&self, payment_id: PaymentId) -> RepoResultV2<Option<PaymentIntent>>;

    fn get_by_external_id(&self, external_id: &str) -> RepoResultV2<Option<PaymentIntent>>;

    /// Moves the intent to `to` only if its current status is one of `from`.
    /// `None` means no row was transitioned.
    fn transition(
        &self,
        external_id: &str,
        from: &[PaymentStatus],
        to: PaymentStatus,
        transaction_id: Option<TransactionId>,
    ) -> RepoResultV2<Option<PaymentIntent>>;

    /// Intents still waiting for a terminal status, oldest first.
    fn list_unsettled(&self, limit: i64) -> RepoResultV2<Vec<PaymentIntent>>;
}

pub struct PaymentsRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> PaymentsRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> PaymentsRepo for PaymentsRepoImpl<'a, T> {
    fn create(&self, payload: NewPaymentIntent) -> RepoResultV2<PaymentIntent> {
        debug!("Creating a payment intent using payload: {:?}", payload);

        diesel::insert_into(Payments::payments)
            .values(&payload)
            .get_result::<RawPaymentIntent>(self.db_conn)
            .map(PaymentIntent::from)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => payload)
            })
    }

    fn get(&self, payment_id: PaymentId) -> RepoResultV2<Option<PaymentIntent>> {
        debug!("Getting a payment intent with ID: {}", payment_id);

        Payments::payments
            .filter(Payments::id.eq(payment_id))
            .get_result::<RawPaymentIntent>(self.db_conn)
            .optional()
            .map(|intent| intent.map(PaymentIntent::from))
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => payment_id)
            })
    }

    fn get_by_external_id(&self, external_id: &str) -> RepoResultV2<Option<PaymentIntent>> {
        debug!("Getting a payment intent with external ID: {}", external_id);

        Payments::payments
            .filter(Payments::external_id.eq(external_id))
            .get_result::<RawPaymentIntent>(self.db_conn)
            .optional()
            .map(|intent| intent.map(PaymentIntent::from))
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => external_id)
            })
    }

    fn transition(
        &self,
        external_id: &str,
        from: &[PaymentStatus],
        to: PaymentStatus,
        transaction_id: Option<TransactionId>,
    ) -> RepoResultV2<Option<PaymentIntent>> {
        debug!(
            "Transitioning payment intent with external ID {} from {:?} to {}",
            external_id, from, to
        );

        let target = Payments::payments
            .filter(Payments::external_id.eq(external_id))
            .filter(Payments::status.eq_any(from.to_vec()));

        diesel::update(target)
            .set((
                Payments::status.eq(to),
                Payments::transaction_id.eq(transaction_id),
                Payments::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result::<RawPaymentIntent>(self.db_conn)
            .optional()
            .map(|intent| intent.map(PaymentIntent::from))
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => external_id, from, to, transaction_id)
            })
    }

    fn list_unsettled(&self, limit: i64) -> RepoResultV2<Vec<PaymentIntent>> {
        debug!("Listing unsettled payment intents (limit: {})", limit);

        Payments::payments
            .filter(Payments::status.eq_any(vec![PaymentStatus::Pending, PaymentStatus::PendingSettlement]))
            .order(Payments::created_at)
            .limit(limit)
            .get_results::<RawPaymentIntent>(self.db_conn)
            .map(|intents| intents.into_iter().map(PaymentIntent::from).collect())
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => limit)
            })
    }
}
