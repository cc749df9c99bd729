//! Deposits through the payment gateway.
//!
//! Every completion path (webhook, manual check, sweep) ends in `settle_payment`,
//! where the conditional status update on the intent row decides who credits the
//! entity.

use std::collections::HashMap;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Fail;
use futures::{future, stream, Future, Stream};
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool};
use sentry::integrations::failure::capture_fail;
use validator::{ValidationError, ValidationErrors};

use super::error::*;
use super::permissions::{forbidden, require_user, PermissionOracle};
use super::transfers::{execute_transfer, TransferRequest};
use super::types::{spawn_on_pool, ServiceFutureV2, ServiceResultV2};
use client::gateway::{GatewayClient, GatewayPaymentStatus, NewPayment, Notification, NotificationEvent};
use models::*;
use repos::ReposFactory;

#[derive(Debug, Clone)]
pub struct InitPayment {
    pub entity: HolderRef,
    pub amount: Amount,
    pub return_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentInitiated {
    pub intent_id: PaymentId,
    pub confirmation_url: Option<String>,
}

pub trait PaymentsService: 'static {
    fn init_payment(&self, input: InitPayment) -> ServiceFutureV2<PaymentInitiated>;

    /// Always succeeds unless the outcome could not be persisted
    fn handle_webhook(&self, notification: Notification) -> ServiceFutureV2<()>;

    fn check_payment(&self, payment_id: PaymentId) -> ServiceFutureV2<PaymentIntent>;

    /// Settles, cancels or retries up to `limit` unsettled intents. Returns how many reached a terminal status.
    fn process_pending_payments(&self, limit: i64) -> ServiceFutureV2<usize>;
}

pub struct PaymentsServiceImpl<
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    G: GatewayClient + Clone,
> {
    pub db_pool: Pool<M>,
    pub cpu_pool: CpuPool,
    pub repo_factory: F,
    pub gateway_client: G,
    pub return_url: String,
    pub verify_webhooks: bool,
    pub user_id: Option<UserId>,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        G: GatewayClient + Clone,
    > Clone for PaymentsServiceImpl<T, M, F, G>
{
    fn clone(&self) -> Self {
        Self {
            db_pool: self.db_pool.clone(),
            cpu_pool: self.cpu_pool.clone(),
            repo_factory: self.repo_factory.clone(),
            gateway_client: self.gateway_client.clone(),
            return_url: self.return_url.clone(),
            verify_webhooks: self.verify_webhooks,
            user_id: self.user_id,
        }
    }
}

/// Credits the entity of a confirmed payment exactly once.
///
/// A failed credit rolls back and leaves the intent in `pending_settlement` for the
/// sweep; only an unavailable database is reported to the caller.
pub fn settle_payment<T, F>(db_conn: &T, repo_factory: &F, external_id: &str) -> ServiceResultV2<()>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let payments_repo = repo_factory.create_payments_repo(db_conn);

    let settled = db_conn.transaction::<Option<PaymentIntent>, Error, _>(|| {
        let intent = payments_repo
            .transition(external_id, &[PaymentStatus::Pending, PaymentStatus::PendingSettlement], PaymentStatus::Succeeded, None)
            .map_err(ectx!(try convert => external_id))?;
        let intent = match intent {
            None => return Ok(None),
            Some(intent) => intent,
        };

        let kind = TransferKind::deposit_for(intent.entity.kind).ok_or_else(|| {
            let e = format_err!("Holder kind {} cannot receive deposits", intent.entity.kind);
            ectx!(try err e, ErrorKind::Internal => intent)
        })?;
        let request = TransferRequest {
            kind,
            from: HolderRef::external(),
            to: intent.entity,
            amount: intent.amount,
            idempotency_key: Some(intent.external_id.clone()),
        };
        let record = execute_transfer(
            db_conn,
            repo_factory,
            request,
            Initiator::Bridge {
                on_behalf_of: intent.initiated_by,
            },
        )?;

        payments_repo
            .transition(external_id, &[PaymentStatus::Succeeded], PaymentStatus::Succeeded, Some(record.id))
            .map_err(ectx!(convert => external_id, record.id))
    });

    match settled {
        Ok(Some(intent)) => {
            info!("Payment {} settled, {} credited to {}", intent.external_id, intent.amount, intent.entity);
            Ok(())
        }
        Ok(None) => {
            debug!("Payment {} is already terminal or unknown, nothing to settle", external_id);
            Ok(())
        }
        Err(e) => {
            if e.kind().is_unavailable() {
                return Err(e);
            }
            warn!("Payment {} confirmed but could not be credited: {}", external_id, e);
            capture_fail(&e);
            payments_repo
                .transition(external_id, &[PaymentStatus::Pending], PaymentStatus::PendingSettlement, None)
                .map(|_| ())
                .map_err(ectx!(convert => external_id))
        }
    }
}

pub fn cancel_payment<T, F>(db_conn: &T, repo_factory: &F, external_id: &str) -> ServiceResultV2<()>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let canceled = repo_factory
        .create_payments_repo(db_conn)
        .transition(external_id, &[PaymentStatus::Pending], PaymentStatus::Canceled, None)
        .map_err(ectx!(try convert => external_id))?;
    if canceled.is_some() {
        info!("Payment {} canceled", external_id);
    }
    Ok(())
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        G: GatewayClient + Clone,
    > PaymentsServiceImpl<T, M, F, G>
{
    pub fn new(
        db_pool: Pool<M>,
        cpu_pool: CpuPool,
        repo_factory: F,
        gateway_client: G,
        return_url: String,
        verify_webhooks: bool,
        user_id: Option<UserId>,
    ) -> Self {
        Self {
            db_pool,
            cpu_pool,
            repo_factory,
            gateway_client,
            return_url,
            verify_webhooks,
            user_id,
        }
    }

    /// Acts on a status reported by the gateway
    fn apply_status(&self, external_id: String, status: GatewayPaymentStatus) -> ServiceFutureV2<()> {
        let repo_factory = self.repo_factory.clone();

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| match status {
            GatewayPaymentStatus::Succeeded => settle_payment(&*conn, &repo_factory, &external_id),
            GatewayPaymentStatus::Canceled => cancel_payment(&*conn, &repo_factory, &external_id),
            GatewayPaymentStatus::Pending | GatewayPaymentStatus::WaitingForCapture => Ok(()),
        })
    }

    /// Polls the gateway for a pending intent, settles a `pending_settlement` one directly
    fn advance(&self, intent: PaymentIntent) -> ServiceFutureV2<()> {
        match intent.status {
            PaymentStatus::Succeeded | PaymentStatus::Canceled => Box::new(future::ok(())),
            PaymentStatus::PendingSettlement => self.apply_status(intent.external_id, GatewayPaymentStatus::Succeeded),
            PaymentStatus::Pending => {
                let service = self.clone();
                let external_id = intent.external_id.clone();
                Box::new(
                    self.gateway_client
                        .get_payment(external_id.clone())
                        .map_err(ectx!(convert => external_id))
                        .and_then(move |payment| service.apply_status(payment.id, payment.status)),
                )
            }
        }
    }

    fn get_intent(&self, payment_id: PaymentId) -> ServiceFutureV2<PaymentIntent> {
        let repo_factory = self.repo_factory.clone();

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            repo_factory
                .create_payments_repo(&*conn)
                .get(payment_id)
                .map_err(ectx!(try convert => payment_id))?
                .ok_or_else(|| {
                    let e = format_err!("Payment {} not found", payment_id);
                    ectx!(err e, ErrorKind::NotFound => payment_id)
                })
        })
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        G: GatewayClient + Clone,
    > PaymentsService for PaymentsServiceImpl<T, M, F, G>
{
    fn init_payment(&self, input: InitPayment) -> ServiceFutureV2<PaymentInitiated> {
        let repo_factory = self.repo_factory.clone();
        let db_pool = self.db_pool.clone();
        let cpu_pool = self.cpu_pool.clone();
        let gateway_client = self.gateway_client.clone();
        let user_id = self.user_id;
        let return_url = input.return_url.clone().unwrap_or_else(|| self.return_url.clone());
        let InitPayment { entity, amount, .. } = input;
        let intent_id = PaymentId::generate();

        let auth_repo_factory = repo_factory.clone();
        let authorized = spawn_on_pool(db_pool.clone(), cpu_pool.clone(), move |conn| {
            let caller = require_user(user_id)?;
            validate_deposit(entity, amount)?;
            if !PermissionOracle::new(&auth_repo_factory, &*conn).can_move_money_of(entity, caller)? {
                return forbidden(user_id, &format!("deposit to {}", entity));
            }
            Ok(caller)
        });

        let fut = authorized
            .and_then(move |caller| {
                let mut metadata = HashMap::new();
                metadata.insert("intent_id".to_string(), intent_id.to_string());
                metadata.insert("entity".to_string(), entity.to_string());
                let input = NewPayment {
                    idempotence_key: intent_id.to_string(),
                    amount,
                    description: format!("Deposit to {}", entity),
                    return_url,
                    metadata,
                };
                gateway_client
                    .create_payment(input.clone())
                    .map_err(ectx!(convert => input))
                    .map(move |payment| (caller, payment))
            })
            .and_then(move |(caller, payment)| {
                spawn_on_pool(db_pool, cpu_pool, move |conn| {
                    let confirmation_url = payment.confirmation_url();
                    let new_intent = NewPaymentIntent {
                        id: intent_id,
                        external_id: payment.id.clone(),
                        entity_kind: entity.kind,
                        entity_id: entity.id,
                        amount,
                        status: PaymentStatus::Pending,
                        confirmation_url: confirmation_url.clone(),
                        initiated_by: Some(caller),
                    };
                    let intent = repo_factory
                        .create_payments_repo(&*conn)
                        .create(new_intent.clone())
                        .map_err(ectx!(try convert => new_intent))?;
                    info!("Payment {} of {} to {} started by user {}", intent.external_id, amount, entity, caller);
                    Ok(PaymentInitiated {
                        intent_id: intent.id,
                        confirmation_url,
                    })
                })
            });

        Box::new(fut)
    }

    fn handle_webhook(&self, notification: Notification) -> ServiceFutureV2<()> {
        let reported = match notification.event() {
            NotificationEvent::PaymentSucceeded => GatewayPaymentStatus::Succeeded,
            NotificationEvent::PaymentCanceled => GatewayPaymentStatus::Canceled,
            event => {
                debug!("Ignoring gateway notification {:?} ({})", event, notification.event);
                return Box::new(future::ok(()));
            }
        };
        let external_id = notification.object.id.clone();
        let service = self.clone();

        if !self.verify_webhooks {
            return self.apply_status(external_id, reported);
        }

        let verified = self.gateway_client.get_payment(external_id.clone()).then(move |result| -> ServiceResultV2<Option<GatewayPaymentStatus>> {
            match result {
                Ok(payment) => Ok(Some(payment.status)),
                Err(e) => {
                    warn!("Could not verify gateway notification for payment {}: {}", external_id, e);
                    Ok(None)
                }
            }
        });

        let id = notification.object.id;
        Box::new(verified.and_then(move |status| -> ServiceFutureV2<()> {
            match status {
                Some(status) => service.apply_status(id, status),
                None => Box::new(future::ok(())),
            }
        }))
    }

    fn check_payment(&self, payment_id: PaymentId) -> ServiceFutureV2<PaymentIntent> {
        let repo_factory = self.repo_factory.clone();
        let user_id = self.user_id;
        let service = self.clone();
        let reread = self.clone();

        let authorized = self.get_intent(payment_id).and_then({
            let db_pool = self.db_pool.clone();
            let cpu_pool = self.cpu_pool.clone();
            move |intent| {
                spawn_on_pool(db_pool, cpu_pool, move |conn| {
                    let caller = require_user(user_id)?;
                    if !PermissionOracle::new(&repo_factory, &*conn).can_read_holder(intent.entity, caller)? {
                        return forbidden(user_id, &format!("check payment {}", intent.id));
                    }
                    Ok(intent)
                })
            }
        });

        Box::new(
            authorized
                .and_then(move |intent| service.advance(intent))
                .and_then(move |_| reread.get_intent(payment_id)),
        )
    }

    fn process_pending_payments(&self, limit: i64) -> ServiceFutureV2<usize> {
        let repo_factory = self.repo_factory.clone();
        let service = self.clone();

        let unsettled = spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            repo_factory
                .create_payments_repo(&*conn)
                .list_unsettled(limit)
                .map_err(ectx!(convert => limit))
        });

        Box::new(unsettled.and_then(move |intents| {
            stream::iter_ok::<_, Error>(intents).fold(0usize, move |settled, intent| {
                let external_id = intent.external_id.clone();
                let reread = service.clone();
                service
                    .advance(intent)
                    .and_then(move |_| reread.find_status(external_id.clone()))
                    .then(move |result| -> ServiceResultV2<usize> {
                        match result {
                            Ok(Some(status)) if status.is_terminal() => Ok(settled + 1),
                            Ok(_) => Ok(settled),
                            Err(e) => {
                                warn!("Payment sweep could not advance an intent: {}", e);
                                capture_fail(&e);
                                Ok(settled)
                            }
                        }
                    })
            })
        }))
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        G: GatewayClient + Clone,
    > PaymentsServiceImpl<T, M, F, G>
{
    fn find_status(&self, external_id: String) -> ServiceFutureV2<Option<PaymentStatus>> {
        let repo_factory = self.repo_factory.clone();

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            repo_factory
                .create_payments_repo(&*conn)
                .get_by_external_id(&external_id)
                .map(|intent| intent.map(|intent| intent.status))
                .map_err(ectx!(convert => external_id))
        })
    }
}

fn validate_deposit(entity: HolderRef, amount: Amount) -> ServiceResultV2<()> {
    let mut errors = ValidationErrors::new();
    if amount.is_zero() {
        errors.add("amount", ValidationError::new("positive"));
    }
    if TransferKind::deposit_for(entity.kind).is_none() || !entity.is_well_formed() {
        errors.add("entity", ValidationError::new("deposit_target"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ErrorKind::InvalidInput(errors).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::gateway::mock::GatewayClientMock;
    use client::gateway::{ErrorKind as GatewayErrorKind, NotificationObject};
    use repos::repo_factory::tests::*;

    type Service = PaymentsServiceImpl<MockConnection, MockConnectionManager, ReposFactoryMock, GatewayClientMock>;

    fn service(state: SharedState, gateway: GatewayClientMock, user_id: Option<i32>) -> Service {
        let manager = MockConnectionManager::new(state.clone());
        let db_pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        PaymentsServiceImpl::new(
            db_pool,
            CpuPool::new(1),
            ReposFactoryMock::new(state),
            gateway,
            "https://app.test/return".to_string(),
            false,
            user_id.map(UserId::new),
        )
    }

    fn state() -> SharedState {
        MockState::default()
            .with_user(1, 0)
            .with_user(2, 0)
            .with_organization(10, 2, 0)
            .into_shared()
    }

    fn deposit(entity: HolderRef, cents: u64) -> InitPayment {
        InitPayment {
            entity,
            amount: Amount::new(cents),
            return_url: None,
        }
    }

    fn notification(event: &str, external_id: &str) -> Notification {
        Notification {
            type_: "notification".to_string(),
            event: event.to_string(),
            object: NotificationObject {
                id: external_id.to_string(),
                status: "succeeded".to_string(),
            },
        }
    }

    fn external_id_of(state: &SharedState, intent_id: PaymentId) -> String {
        state
            .lock()
            .unwrap()
            .payments
            .iter()
            .find(|intent| intent.id == intent_id)
            .map(|intent| intent.external_id.clone())
            .unwrap()
    }

    #[test]
    fn webhook_settles_once() {
        let state = state();
        let gateway = GatewayClientMock::default();
        let user = service(state.clone(), gateway.clone(), Some(1));

        let initiated = user.init_payment(deposit(HolderRef::user(UserId::new(1)), 1000000)).wait().unwrap();
        let external_id = external_id_of(&state, initiated.intent_id);
        assert_eq!(
            initiated.confirmation_url,
            Some(format!("https://gateway.test/confirm/{}", external_id))
        );

        let webhook = service(state.clone(), gateway.clone(), None);
        webhook.handle_webhook(notification("payment.succeeded", &external_id)).wait().unwrap();
        webhook.handle_webhook(notification("payment.succeeded", &external_id)).wait().unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.user_balance(1), 1000000);
        assert_eq!(state.transactions.len(), 1);
        let record = &state.transactions[0];
        assert_eq!(record.kind, TransferKind::UserDeposit);
        assert_eq!(record.idempotency_key, Some(external_id.clone()));
        assert_eq!(record.initiated_by, Some(UserId::new(1)));
        let intent = &state.payments[0];
        assert_eq!(intent.status, PaymentStatus::Succeeded);
        assert_eq!(intent.transaction_id, Some(record.id));
    }

    #[test]
    fn unknown_and_ignored_notifications_are_accepted() {
        let state = state();
        let webhook = service(state.clone(), GatewayClientMock::default(), None);

        webhook.handle_webhook(notification("payment.succeeded", "pay-404")).wait().unwrap();
        webhook.handle_webhook(notification("refund.succeeded", "pay-404")).wait().unwrap();
        assert!(state.lock().unwrap().transactions.is_empty());
    }

    #[test]
    fn verified_webhook_trusts_the_gateway_status() {
        let state = state();
        let gateway = GatewayClientMock::default();
        let initiated = service(state.clone(), gateway.clone(), Some(1))
            .init_payment(deposit(HolderRef::user(UserId::new(1)), 500))
            .wait()
            .unwrap();
        let external_id = external_id_of(&state, initiated.intent_id);

        let mut webhook = service(state.clone(), gateway.clone(), None);
        webhook.verify_webhooks = true;
        // forged notification, the gateway still reports pending
        webhook.handle_webhook(notification("payment.succeeded", &external_id)).wait().unwrap();
        assert_eq!(state.lock().unwrap().user_balance(1), 0);

        gateway.set_payment_status(&external_id, GatewayPaymentStatus::Succeeded);
        webhook.handle_webhook(notification("payment.succeeded", &external_id)).wait().unwrap();
        assert_eq!(state.lock().unwrap().user_balance(1), 500);
    }

    #[test]
    fn check_payment_polls_and_cancels() {
        let state = state();
        let gateway = GatewayClientMock::default();
        let user = service(state.clone(), gateway.clone(), Some(1));
        let initiated = user.init_payment(deposit(HolderRef::user(UserId::new(1)), 700)).wait().unwrap();
        let external_id = external_id_of(&state, initiated.intent_id);

        assert_eq!(user.check_payment(initiated.intent_id).wait().unwrap().status, PaymentStatus::Pending);

        gateway.set_payment_status(&external_id, GatewayPaymentStatus::Canceled);
        assert_eq!(user.check_payment(initiated.intent_id).wait().unwrap().status, PaymentStatus::Canceled);

        // a late success never resurrects a canceled intent
        let webhook = service(state.clone(), gateway.clone(), None);
        webhook.handle_webhook(notification("payment.succeeded", &external_id)).wait().unwrap();
        assert_eq!(state.lock().unwrap().user_balance(1), 0);

        match service(state.clone(), gateway, Some(2)).check_payment(initiated.intent_id).wait().unwrap_err().kind() {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
    }

    #[test]
    fn failed_credit_is_retried_by_the_sweep_without_polling() {
        let state = state();
        let gateway = GatewayClientMock::default();
        let initiated = service(state.clone(), gateway.clone(), Some(1))
            .init_payment(deposit(HolderRef::user(UserId::new(1)), 100))
            .wait()
            .unwrap();
        let external_id = external_id_of(&state, initiated.intent_id);

        state.lock().unwrap().users.get_mut(&UserId::new(1)).unwrap().balance = Amount::new(u64::max_value());
        let webhook = service(state.clone(), gateway.clone(), None);
        webhook.handle_webhook(notification("payment.succeeded", &external_id)).wait().unwrap();
        {
            let state = state.lock().unwrap();
            assert_eq!(state.payments[0].status, PaymentStatus::PendingSettlement);
            assert!(state.transactions.is_empty());
        }

        state.lock().unwrap().users.get_mut(&UserId::new(1)).unwrap().balance = Amount::new(50);
        gateway.fail_with(GatewayErrorKind::Unavailable);
        let settled = webhook.process_pending_payments(10).wait().unwrap();

        assert_eq!(settled, 1);
        let state = state.lock().unwrap();
        assert_eq!(state.user_balance(1), 150);
        assert_eq!(state.payments[0].status, PaymentStatus::Succeeded);
    }

    #[test]
    fn sweep_survives_an_unavailable_gateway() {
        let state = state();
        let gateway = GatewayClientMock::default();
        service(state.clone(), gateway.clone(), Some(1))
            .init_payment(deposit(HolderRef::user(UserId::new(1)), 100))
            .wait()
            .unwrap();

        gateway.fail_with(GatewayErrorKind::Unavailable);
        let sweeper = service(state.clone(), gateway.clone(), None);
        assert_eq!(sweeper.process_pending_payments(10).wait().unwrap(), 0);
        assert_eq!(state.lock().unwrap().payments[0].status, PaymentStatus::Pending);

        gateway.recover();
        let external_id = state.lock().unwrap().payments[0].external_id.clone();
        gateway.set_payment_status(&external_id, GatewayPaymentStatus::Succeeded);
        assert_eq!(sweeper.process_pending_payments(10).wait().unwrap(), 1);
        assert_eq!(state.lock().unwrap().user_balance(1), 100);
    }

    #[test]
    fn deposits_need_the_right_to_move_the_entity_money() {
        let state = state();
        let gateway = GatewayClientMock::default();

        let for_other = service(state.clone(), gateway.clone(), Some(1))
            .init_payment(deposit(HolderRef::user(UserId::new(2)), 100))
            .wait()
            .unwrap_err();
        match for_other.kind() {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }

        let into_project = service(state.clone(), gateway.clone(), Some(1))
            .init_payment(deposit(HolderRef::project(ProjectId::new(1)), 100))
            .wait()
            .unwrap_err();
        match into_project.kind() {
            ErrorKind::InvalidInput(_) => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }

        let org = service(state.clone(), gateway.clone(), Some(2))
            .init_payment(deposit(HolderRef::organization(OrganizationId::new(10)), 100))
            .wait();
        assert!(org.is_ok());
        assert!(gateway.payments().len() == 1);
    }
}
