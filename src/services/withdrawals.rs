//! Payouts through the payment gateway.
//!
//! The entity is debited before the gateway hears about the payout. A payout the
//! gateway refuses or fails is compensated by a deposit keyed on the intent, so the
//! refund happens at most once whichever path notices the failure first.

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
use client::gateway::{ErrorKind as GatewayErrorKind, GatewayClient, GatewayPayoutStatus, NewPayout, Notification, NotificationEvent};
use models::*;
use repos::ReposFactory;

#[derive(Debug, Clone)]
pub struct InitWithdrawal {
    pub entity: HolderRef,
    pub amount: Amount,
    pub destination: String,
}

pub trait WithdrawalsService: 'static {
    fn init_withdrawal(&self, input: InitWithdrawal) -> ServiceFutureV2<WithdrawalIntent>;

    /// Always succeeds unless the outcome could not be persisted
    fn handle_webhook(&self, notification: Notification) -> ServiceFutureV2<()>;

    fn check_withdrawal(&self, withdrawal_id: WithdrawalId) -> ServiceFutureV2<WithdrawalIntent>;

    /// Re-submits or polls up to `limit` pending intents. Returns how many reached a terminal status.
    fn process_pending_withdrawals(&self, limit: i64) -> ServiceFutureV2<usize>;
}

pub struct WithdrawalsServiceImpl<
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    G: GatewayClient + Clone,
> {
    pub db_pool: Pool<M>,
    pub cpu_pool: CpuPool,
    pub repo_factory: F,
    pub gateway_client: G,
    pub verify_webhooks: bool,
    pub user_id: Option<UserId>,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        G: GatewayClient + Clone,
    > Clone for WithdrawalsServiceImpl<T, M, F, G>
{
    fn clone(&self) -> Self {
        Self {
            db_pool: self.db_pool.clone(),
            cpu_pool: self.cpu_pool.clone(),
            repo_factory: self.repo_factory.clone(),
            gateway_client: self.gateway_client.clone(),
            verify_webhooks: self.verify_webhooks,
            user_id: self.user_id,
        }
    }
}

/// Fails a pending intent and credits its amount back in the same transaction.
/// Returns `None` when the intent was no longer pending.
pub fn refund_withdrawal<T, F>(db_conn: &T, repo_factory: &F, withdrawal_id: WithdrawalId) -> ServiceResultV2<Option<WithdrawalIntent>>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let withdrawals_repo = repo_factory.create_withdrawals_repo(db_conn);

    let refunded = db_conn.transaction::<Option<WithdrawalIntent>, Error, _>(|| {
        let intent = get_intent(&*withdrawals_repo, withdrawal_id)?;
        if intent.status != WithdrawalStatus::Pending {
            return Ok(None);
        }

        let kind = TransferKind::deposit_for(intent.entity.kind).ok_or_else(|| {
            let e = format_err!("Holder kind {} cannot be refunded", intent.entity.kind);
            ectx!(try err e, ErrorKind::Internal => intent)
        })?;
        let request = TransferRequest {
            kind,
            from: HolderRef::external(),
            to: intent.entity,
            amount: intent.amount,
            idempotency_key: Some(intent.refund_key()),
        };
        let record = execute_transfer(
            db_conn,
            repo_factory,
            request,
            Initiator::Bridge {
                on_behalf_of: intent.initiated_by,
            },
        )?;

        match withdrawals_repo.fail(withdrawal_id, record.id).map_err(ectx!(try convert => withdrawal_id))? {
            Some(intent) => Ok(Some(intent)),
            None => {
                let e = format_err!("Withdrawal {} left pending concurrently", withdrawal_id);
                Err(ectx!(err e, ErrorKind::Conflict => withdrawal_id))
            }
        }
    });

    match refunded {
        Ok(Some(intent)) => {
            info!("Withdrawal {} failed, {} refunded to {}", intent.id, intent.amount, intent.entity);
            Ok(Some(intent))
        }
        Ok(None) => Ok(None),
        Err(e) => match e.kind() {
            ErrorKind::Conflict => Ok(None),
            _ => Err(e),
        },
    }
}

pub fn complete_withdrawal<T, F>(db_conn: &T, repo_factory: &F, withdrawal_id: WithdrawalId) -> ServiceResultV2<Option<WithdrawalIntent>>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let completed = repo_factory
        .create_withdrawals_repo(db_conn)
        .complete(withdrawal_id)
        .map_err(ectx!(try convert => withdrawal_id))?;
    if let Some(ref intent) = completed {
        info!("Withdrawal {} of {} from {} succeeded", intent.id, intent.amount, intent.entity);
    }
    Ok(completed)
}

fn get_intent(withdrawals_repo: &::repos::WithdrawalsRepo, withdrawal_id: WithdrawalId) -> ServiceResultV2<WithdrawalIntent> {
    withdrawals_repo
        .get(withdrawal_id)
        .map_err(ectx!(try convert => withdrawal_id))?
        .ok_or_else(|| {
            let e = format_err!("Withdrawal {} not found", withdrawal_id);
            ectx!(err e, ErrorKind::NotFound => withdrawal_id)
        })
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        G: GatewayClient + Clone,
    > WithdrawalsServiceImpl<T, M, F, G>
{
    pub fn new(db_pool: Pool<M>, cpu_pool: CpuPool, repo_factory: F, gateway_client: G, verify_webhooks: bool, user_id: Option<UserId>) -> Self {
        Self {
            db_pool,
            cpu_pool,
            repo_factory,
            gateway_client,
            verify_webhooks,
            user_id,
        }
    }

    fn load(&self, withdrawal_id: WithdrawalId) -> ServiceFutureV2<WithdrawalIntent> {
        let repo_factory = self.repo_factory.clone();

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            get_intent(&*repo_factory.create_withdrawals_repo(&*conn), withdrawal_id)
        })
    }

    /// Acts on a payout status reported by the gateway
    fn apply_status(&self, withdrawal_id: WithdrawalId, status: GatewayPayoutStatus) -> ServiceFutureV2<()> {
        let repo_factory = self.repo_factory.clone();

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| match status {
            GatewayPayoutStatus::Succeeded => complete_withdrawal(&*conn, &repo_factory, withdrawal_id).map(|_| ()),
            GatewayPayoutStatus::Canceled | GatewayPayoutStatus::Failed => {
                refund_withdrawal(&*conn, &repo_factory, withdrawal_id).map(|_| ())
            }
            GatewayPayoutStatus::Pending => Ok(()),
        })
    }

    /// Sends the payout keyed by the intent id. Only a definite rejection fails the
    /// intent; an unreachable gateway leaves it pending for the sweep.
    fn submit(&self, intent: WithdrawalIntent) -> ServiceFutureV2<()> {
        let service = self.clone();
        let withdrawal_id = intent.id;

        let mut metadata = HashMap::new();
        metadata.insert("intent_id".to_string(), intent.id.to_string());
        metadata.insert("entity".to_string(), intent.entity.to_string());
        let input = NewPayout {
            idempotence_key: intent.id.to_string(),
            amount: intent.amount,
            description: format!("Withdrawal from {}", intent.entity),
            destination: intent.destination.clone(),
            metadata,
        };

        Box::new(self.gateway_client.create_payout(input).then(move |result| -> ServiceFutureV2<()> {
            match result {
                Ok(payout) => {
                    let repo_factory = service.repo_factory.clone();
                    let status = payout.status;
                    let recorded = spawn_on_pool(service.db_pool.clone(), service.cpu_pool.clone(), move |conn| {
                        repo_factory
                            .create_withdrawals_repo(&*conn)
                            .set_external_id(withdrawal_id, payout.id.clone())
                            .map(|_| ())
                            .map_err(ectx!(convert => withdrawal_id, payout.id))
                    });
                    Box::new(recorded.and_then(move |_| service.apply_status(withdrawal_id, status)))
                }
                Err(e) => match e.kind() {
                    GatewayErrorKind::Rejected(reason) => {
                        warn!("Gateway rejected payout {}: {}", withdrawal_id, reason);
                        service.apply_status(withdrawal_id, GatewayPayoutStatus::Failed)
                    }
                    _ => {
                        warn!("Payout {} not submitted, will retry: {}", withdrawal_id, e);
                        Box::new(future::ok(()))
                    }
                },
            }
        }))
    }

    /// Polls a submitted intent, re-submits one the gateway never acknowledged
    fn advance(&self, intent: WithdrawalIntent) -> ServiceFutureV2<()> {
        if intent.status != WithdrawalStatus::Pending {
            return Box::new(future::ok(()));
        }

        match intent.external_id.clone() {
            None => self.submit(intent),
            Some(external_id) => {
                let service = self.clone();
                Box::new(
                    self.gateway_client
                        .get_payout(external_id.clone())
                        .map_err(ectx!(convert => external_id))
                        .and_then(move |payout| service.apply_status(intent.id, payout.status)),
                )
            }
        }
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        G: GatewayClient + Clone,
    > WithdrawalsService for WithdrawalsServiceImpl<T, M, F, G>
{
    fn init_withdrawal(&self, input: InitWithdrawal) -> ServiceFutureV2<WithdrawalIntent> {
        let repo_factory = self.repo_factory.clone();
        let user_id = self.user_id;
        let service = self.clone();
        let reread = self.clone();

        let debited = spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            let caller = require_user(user_id)?;
            let kind = validate_withdrawal(&input)?;
            let InitWithdrawal {
                entity,
                amount,
                destination,
            } = input;
            let withdrawal_id = WithdrawalId::generate();

            conn.transaction::<WithdrawalIntent, Error, _>(|| {
                let request = TransferRequest {
                    kind,
                    from: entity,
                    to: HolderRef::external(),
                    amount,
                    idempotency_key: Some(withdrawal_id.to_string()),
                };
                let record = execute_transfer(&*conn, &repo_factory, request, Initiator::Bridge { on_behalf_of: Some(caller) })?;

                let new_intent = NewWithdrawalIntent {
                    id: withdrawal_id,
                    entity_kind: entity.kind,
                    entity_id: entity.id,
                    amount,
                    destination: destination.clone(),
                    status: WithdrawalStatus::Pending,
                    debit_transaction_id: record.id,
                    initiated_by: Some(caller),
                };
                let intent = repo_factory
                    .create_withdrawals_repo(&*conn)
                    .create(new_intent.clone())
                    .map_err(ectx!(try convert => new_intent))?;
                info!("Withdrawal {} of {} from {} started by user {}", intent.id, amount, entity, caller);
                Ok(intent)
            })
        });

        Box::new(debited.and_then(move |intent| {
            let withdrawal_id = intent.id;
            service.submit(intent).and_then(move |_| reread.load(withdrawal_id))
        }))
    }

    fn handle_webhook(&self, notification: Notification) -> ServiceFutureV2<()> {
        let reported = match notification.event() {
            NotificationEvent::PayoutSucceeded => GatewayPayoutStatus::Succeeded,
            NotificationEvent::PayoutFailed => GatewayPayoutStatus::Failed,
            event => {
                debug!("Ignoring gateway notification {:?} ({})", event, notification.event);
                return Box::new(future::ok(()));
            }
        };
        let external_id = notification.object.id;

        let status: ServiceFutureV2<Option<GatewayPayoutStatus>> = if self.verify_webhooks {
            let id = external_id.clone();
            Box::new(
                self.gateway_client
                    .get_payout(external_id.clone())
                    .then(move |result| -> ServiceResultV2<Option<GatewayPayoutStatus>> {
                        match result {
                            Ok(payout) => Ok(Some(payout.status)),
                            Err(e) => {
                                warn!("Could not verify gateway notification for payout {}: {}", id, e);
                                Ok(None)
                            }
                        }
                    }),
            )
        } else {
            Box::new(future::ok(Some(reported)))
        };

        let repo_factory = self.repo_factory.clone();
        let db_pool = self.db_pool.clone();
        let cpu_pool = self.cpu_pool.clone();
        let service = self.clone();

        Box::new(status.and_then(move |status| -> ServiceFutureV2<()> {
            let status = match status {
                Some(status) => status,
                None => return Box::new(future::ok(())),
            };
            let found = spawn_on_pool(db_pool, cpu_pool, move |conn| {
                repo_factory
                    .create_withdrawals_repo(&*conn)
                    .get_by_external_id(&external_id)
                    .map_err(ectx!(convert => external_id))
            });
            Box::new(found.and_then(move |intent| -> ServiceFutureV2<()> {
                match intent {
                    Some(intent) => service.apply_status(intent.id, status),
                    None => {
                        debug!("Gateway notification for unknown payout");
                        Box::new(future::ok(()))
                    }
                }
            }))
        }))
    }

    fn check_withdrawal(&self, withdrawal_id: WithdrawalId) -> ServiceFutureV2<WithdrawalIntent> {
        let repo_factory = self.repo_factory.clone();
        let user_id = self.user_id;
        let service = self.clone();
        let reread = self.clone();
        let db_pool = self.db_pool.clone();
        let cpu_pool = self.cpu_pool.clone();

        let authorized = self.load(withdrawal_id).and_then(move |intent| {
            spawn_on_pool(db_pool, cpu_pool, move |conn| {
                let caller = require_user(user_id)?;
                if !PermissionOracle::new(&repo_factory, &*conn).can_read_holder(intent.entity, caller)? {
                    return forbidden(user_id, &format!("check withdrawal {}", intent.id));
                }
                Ok(intent)
            })
        });

        Box::new(
            authorized
                .and_then(move |intent| service.advance(intent))
                .and_then(move |_| reread.load(withdrawal_id)),
        )
    }

    fn process_pending_withdrawals(&self, limit: i64) -> ServiceFutureV2<usize> {
        let repo_factory = self.repo_factory.clone();
        let service = self.clone();

        let pending = spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            repo_factory
                .create_withdrawals_repo(&*conn)
                .list_pending(limit)
                .map_err(ectx!(convert => limit))
        });

        Box::new(pending.and_then(move |intents| {
            stream::iter_ok::<_, Error>(intents).fold(0usize, move |finished, intent| {
                let withdrawal_id = intent.id;
                let reread = service.clone();
                service
                    .advance(intent)
                    .and_then(move |_| reread.load(withdrawal_id))
                    .then(move |result| -> ServiceResultV2<usize> {
                        match result {
                            Ok(ref intent) if intent.status != WithdrawalStatus::Pending => Ok(finished + 1),
                            Ok(_) => Ok(finished),
                            Err(e) => {
                                warn!("Withdrawal sweep could not advance {}: {}", withdrawal_id, e);
                                capture_fail(&e);
                                Ok(finished)
                            }
                        }
                    })
            })
        }))
    }
}

fn validate_withdrawal(input: &InitWithdrawal) -> ServiceResultV2<TransferKind> {
    let mut errors = ValidationErrors::new();
    if input.amount.is_zero() {
        errors.add("amount", ValidationError::new("positive"));
    }
    if input.destination.trim().is_empty() {
        errors.add("destination", ValidationError::new("required"));
    }
    let kind = TransferKind::withdrawal_for(input.entity.kind).filter(|_| input.entity.is_well_formed());
    if kind.is_none() {
        errors.add("entity", ValidationError::new("withdrawal_source"));
    }

    match kind {
        Some(kind) if errors.is_empty() => Ok(kind),
        _ => Err(ErrorKind::InvalidInput(errors).into()),
    }
}
