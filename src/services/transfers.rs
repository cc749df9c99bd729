//! Transfer engine: the only writer of the ledger.
//!
//! A transfer runs in one database transaction: holders are locked in canonical
//! order, both legs are checked, both balances written, the ledger record appended
//! with the post-apply balances and the outbox effects enqueued. Called inside an
//! outer transaction it becomes a savepoint.

use std::collections::BTreeMap;

use chrono::Utc;
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Fail;
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool};
use validator::{ValidationError, ValidationErrors};

use super::balances::{check_delta, BalanceActors, Delta, LockedHolder};
use super::error::*;
use super::permissions::{forbidden, require_user, PermissionOracle};
use super::types::{spawn_on_pool, ServiceFutureV2, ServiceResultV2};
use models::*;
use repos::ReposFactory;

const MAX_HISTORY_LIMIT: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub kind: TransferKind,
    pub from: HolderRef,
    pub to: HolderRef,
    pub amount: Amount,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Balance {
    pub holder: HolderRef,
    pub balance: Amount,
}

fn invalid_input<T>(field: &'static str, code: &'static str, message: String) -> ServiceResultV2<T> {
    let mut errors = ValidationErrors::new();
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    errors.add(field, error);
    Err(ErrorKind::from(errors).into())
}

/// Shape checks that need no database access
pub fn validate_request(request: &TransferRequest) -> ServiceResultV2<()> {
    if request.amount.is_zero() {
        return invalid_input("amount", "positive", "Amount must be greater than zero".to_string());
    }

    if request.kind.schema() != (request.from.kind, request.to.kind) {
        let (from, to) = request.kind.schema();
        return invalid_input(
            "kind",
            "schema",
            format!("Transfer {} moves money from {} to {}", request.kind, from, to),
        );
    }

    if !request.from.is_well_formed() {
        return invalid_input("from", "holder", format!("Malformed holder {}", request.from));
    }
    if !request.to.is_well_formed() {
        return invalid_input("to", "holder", format!("Malformed holder {}", request.to));
    }

    Ok(())
}

/// Who may originate the kind at all: deposits come from the bridge or the closing
/// subroutine, withdrawals from the bridge acting for a user.
pub fn check_origin(request: &TransferRequest, initiator: Initiator) -> ServiceResultV2<()> {
    let allowed = if request.kind.is_deposit() {
        match initiator {
            Initiator::Bridge { .. } | Initiator::Closing => true,
            Initiator::User(_) => false,
        }
    } else if request.kind.is_withdrawal() {
        match initiator {
            Initiator::Bridge { on_behalf_of: Some(_) } => true,
            _ => false,
        }
    } else {
        true
    };

    if allowed {
        Ok(())
    } else {
        forbidden(initiator.user_id(), &format!("originate {} as {:?}", request.kind, initiator))
    }
}

/// Executes a transfer in its own transaction (a savepoint when nested).
pub fn execute_transfer<T, F>(db_conn: &T, repo_factory: &F, request: TransferRequest, initiator: Initiator) -> ServiceResultV2<LedgerRecord>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    validate_request(&request)?;
    check_origin(&request, initiator)?;

    db_conn.transaction::<LedgerRecord, Error, _>(|| {
        let transactions_repo = repo_factory.create_transactions_repo(db_conn);

        if let Some(ref key) = request.idempotency_key {
            let existing = transactions_repo
                .get_by_idempotency_key(key)
                .map_err(ectx!(try convert => key))?;
            if let Some(record) = existing {
                return if record.matches(request.kind, request.from, request.to, request.amount) {
                    debug!("Transfer with idempotency key {} already recorded as {}", key, record.id);
                    Ok(record)
                } else {
                    let e = format_err!("Idempotency key {} was used for a different transfer", key);
                    Err(ectx!(err e, ErrorKind::Conflict => request, record))
                };
            }
        }

        let actors = BalanceActors::new(repo_factory, db_conn);
        let mut holders = vec![request.from, request.to];
        holders.sort_by_key(HolderRef::lock_order_key);
        let mut locked = BTreeMap::new();
        for holder in holders {
            let row = actors.lock(holder)?;
            locked.insert(holder.lock_order_key(), row);
        }
        let source = &locked[&request.from.lock_order_key()];
        let destination = &locked[&request.to.lock_order_key()];

        authorize(db_conn, repo_factory, &request, initiator, source, destination)?;

        let sender_balance = check_delta(source, Delta::Debit(request.amount), initiator)?;
        let receiver_balance = check_delta(destination, Delta::Credit(request.amount), initiator)?;
        if let Some(balance) = sender_balance {
            actors.store(request.from, balance)?;
        }
        if let Some(balance) = receiver_balance {
            actors.store(request.to, balance)?;
        }

        let new_record = NewLedgerRecord {
            from_kind: request.from.kind,
            from_id: request.from.id,
            to_kind: request.to.kind,
            to_id: request.to.id,
            kind: request.kind,
            amount: request.amount,
            created_at: Utc::now().naive_utc(),
            cum_sum_of_sender: sender_balance,
            cum_sum_of_receiver: receiver_balance,
            idempotency_key: request.idempotency_key.clone(),
            initiated_by: initiator.user_id(),
        };
        let record = transactions_repo
            .append(new_record.clone())
            .map_err(ectx!(try convert => new_record))?;

        enqueue_effects(db_conn, repo_factory, &record, destination, initiator)?;

        info!(
            "Transfer {} {}: {} -> {}, amount {}, initiated by {:?}",
            record.id, record.kind, record.from, record.to, record.amount, initiator
        );
        Ok(record)
    })
}

/// Human checks on the holders: the acting user must not be banned and must be
/// entitled to move the source's money; investments need an open, unbanned project
/// of an unbanned organization.
fn authorize<T, F>(
    db_conn: &T,
    repo_factory: &F,
    request: &TransferRequest,
    initiator: Initiator,
    source: &LockedHolder,
    destination: &LockedHolder,
) -> ServiceResultV2<()>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let oracle = PermissionOracle::new(repo_factory, db_conn);

    if let LockedHolder::Project(project) = destination {
        if project.is_banned {
            return forbidden(initiator.user_id(), &format!("invest into banned project {}", project.id));
        }
        let org = oracle.get_organization(project.creator_org_id)?;
        if org.is_banned {
            return forbidden(initiator.user_id(), &format!("invest into project {} of banned organization {}", project.id, org.id));
        }
    }

    let actor = match initiator {
        Initiator::User(user_id) => user_id,
        Initiator::Bridge { on_behalf_of: Some(user_id) } => user_id,
        Initiator::Bridge { on_behalf_of: None } | Initiator::Closing => return Ok(()),
    };

    if request.from.is_external() {
        return Ok(());
    }

    let actor_is_banned = match source {
        LockedHolder::User(user) if user.id == actor => user.is_banned,
        _ => oracle.get_user(actor)?.map(|user| user.is_banned).unwrap_or(true),
    };
    if actor_is_banned {
        return forbidden(Some(actor), "move money while banned or unknown");
    }

    let entitled = match source {
        LockedHolder::Organization(org) => oracle.check_on(org, actor, Capability::MoneyManagement)?,
        _ => oracle.can_move_money_of(request.from, actor)?,
    };
    if !entitled {
        return forbidden(Some(actor), &format!("move money of {}", request.from));
    }

    Ok(())
}

fn enqueue_effects<T, F>(
    db_conn: &T,
    repo_factory: &F,
    record: &LedgerRecord,
    destination: &LockedHolder,
    initiator: Initiator,
) -> ServiceResultV2<()>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let event_store_repo = repo_factory.create_event_store_repo(db_conn);

    match record.kind {
        TransferKind::UserToProject => {
            if let LockedHolder::Project(project) = destination {
                let before = project.current_money;
                let after = record.cum_sum_of_receiver.unwrap_or(before);
                if before < project.wanted_money && after >= project.wanted_money {
                    info!("Project {} reached its goal of {}", project.id, project.wanted_money);
                    let event = Event::new(EventPayload::ProjectGoalReached { project_id: project.id });
                    event_store_repo
                        .add_event_once(event.clone())
                        .map_err(ectx!(try convert => event))?;
                }
            }
        }
        TransferKind::ProjectToUser => {
            let project_id = ProjectId::new(record.from.id);
            let user_id = UserId::new(record.to.id);
            // Only a closing payout settles the investor. Dividends paid by hand do not.
            if initiator == Initiator::Closing {
                let payback = InvestorPayback {
                    project_id,
                    user_id,
                    transaction_id: record.id,
                    created_at: record.created_at,
                };
                repo_factory
                    .create_paybacks_repo(db_conn)
                    .mark_paid_back(payback.clone())
                    .map_err(ectx!(try convert => payback))?;
            }

            let event = Event::new(EventPayload::InvestorPaidBack {
                project_id,
                user_id,
                transaction_id: record.id,
                amount: record.amount,
            });
            event_store_repo
                .add_event_once(event.clone())
                .map_err(ectx!(try convert => event))?;
        }
        _ => (),
    }

    Ok(())
}

pub trait TransfersService: 'static {
    fn transfer(&self, request: TransferRequest) -> ServiceFutureV2<LedgerRecord>;

    fn get_balance(&self, holder: HolderRef) -> ServiceFutureV2<Balance>;

    fn get_history(&self, holder: HolderRef, offset: i64, limit: i64) -> ServiceFutureV2<Vec<LedgerRecord>>;

    fn get_investors(&self, project_id: ProjectId) -> ServiceFutureV2<Vec<Investor>>;
}

pub struct TransfersServiceImpl<T, M, F>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
{
    db_pool: Pool<M>,
    cpu_pool: CpuPool,
    repo_factory: F,
    user_id: Option<UserId>,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
    > TransfersServiceImpl<T, M, F>
{
    pub fn new(db_pool: Pool<M>, cpu_pool: CpuPool, repo_factory: F, user_id: Option<UserId>) -> Self {
        Self {
            db_pool,
            cpu_pool,
            repo_factory,
            user_id,
        }
    }

    /// Runs `f` for an authenticated caller allowed to read `holder`
    fn read_as_member<R, Func>(&self, holder: HolderRef, f: Func) -> ServiceFutureV2<R>
    where
        Func: FnOnce(&T, &F) -> ServiceResultV2<R> + Send + 'static,
        R: Send + 'static,
    {
        let repo_factory = self.repo_factory.clone();
        let user_id = self.user_id;

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            let caller = require_user(user_id)?;
            if !PermissionOracle::new(&repo_factory, &*conn).can_read_holder(holder, caller)? {
                return forbidden(user_id, &format!("read {}", holder));
            }
            f(&*conn, &repo_factory)
        })
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
    > TransfersService for TransfersServiceImpl<T, M, F>
{
    fn transfer(&self, request: TransferRequest) -> ServiceFutureV2<LedgerRecord> {
        let repo_factory = self.repo_factory.clone();
        let user_id = self.user_id;

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            let caller = require_user(user_id)?;
            debug!("User {} requests transfer {:?}", caller, request);
            execute_transfer(&*conn, &repo_factory, request, Initiator::User(caller))
        })
    }

    fn get_balance(&self, holder: HolderRef) -> ServiceFutureV2<Balance> {
        self.read_as_member(holder, move |conn, repo_factory| {
            let actors = BalanceActors::new(repo_factory, conn);
            let locked = actors.lock(holder)?;
            Ok(Balance {
                holder,
                balance: locked.balance().unwrap_or_else(Amount::zero),
            })
        })
    }

    fn get_history(&self, holder: HolderRef, offset: i64, limit: i64) -> ServiceFutureV2<Vec<LedgerRecord>> {
        let offset = offset.max(0);
        let limit = limit.max(0).min(MAX_HISTORY_LIMIT);
        self.read_as_member(holder, move |conn, repo_factory| {
            repo_factory
                .create_transactions_repo(conn)
                .list_for_holder(holder, offset, limit)
                .map_err(ectx!(convert => holder, offset, limit))
        })
    }

    fn get_investors(&self, project_id: ProjectId) -> ServiceFutureV2<Vec<Investor>> {
        self.read_as_member(HolderRef::project(project_id), move |conn, repo_factory| {
            let oracle = PermissionOracle::new(repo_factory, conn);
            let project = oracle.get_project(project_id)?;
            let owner = oracle.get_organization(project.creator_org_id)?.owner_id;
            repo_factory
                .create_transactions_repo(conn)
                .investors_of(project_id, Some(owner))
                .map_err(ectx!(convert => project_id, owner))
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::Future;

    use super::*;
    use repos::repo_factory::tests::*;

    type Service = TransfersServiceImpl<MockConnection, MockConnectionManager, ReposFactoryMock>;

    fn service(state: SharedState, user_id: i32) -> Service {
        let manager = MockConnectionManager::new(state.clone());
        let db_pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        TransfersServiceImpl::new(db_pool, CpuPool::new(1), ReposFactoryMock::new(state), Some(UserId::new(user_id)))
    }

    fn invest(user_id: i32, project_id: i32, cents: u64) -> TransferRequest {
        TransferRequest {
            kind: TransferKind::UserToProject,
            from: HolderRef::user(UserId::new(user_id)),
            to: HolderRef::project(ProjectId::new(project_id)),
            amount: Amount::new(cents),
            idempotency_key: None,
        }
    }

    fn kind_of(err: Error) -> ErrorKind {
        err.kind()
    }

    /// Sum of real balances plus what left minus what entered through the external side
    fn conserved(state: &SharedState) -> bool {
        let state = state.lock().unwrap();
        let held: u64 = state.users.values().map(|u| u.balance.inner()).sum::<u64>()
            + state.organizations.values().map(|o| o.balance.inner()).sum::<u64>()
            + state.projects.values().map(|p| p.current_money.inner()).sum::<u64>();
        let deposited: u64 = state
            .transactions
            .iter()
            .filter(|r| r.from.is_external())
            .map(|r| r.amount.inner())
            .sum();
        let withdrawn: u64 = state.transactions.iter().filter(|r| r.to.is_external()).map(|r| r.amount.inner()).sum();
        held + withdrawn == deposited + 100000 + 50000
    }

    fn scenario_state() -> SharedState {
        MockState::default()
            .with_user(1, 100000)
            .with_user(2, 50000)
            .with_user(5, 0)
            .with_organization(10, 5, 0)
            .with_project(project(20, 10, 500000, MonetizationType::None, 0))
            .into_shared()
    }

    #[test]
    fn simple_investment_moves_money_and_records_cum_sums() {
        let state = scenario_state();

        let record = service(state.clone(), 1).transfer(invest(1, 20, 25000)).wait().unwrap();

        assert_eq!(record.cum_sum_of_sender, Some(Amount::new(75000)));
        assert_eq!(record.cum_sum_of_receiver, Some(Amount::new(25000)));
        assert_eq!(record.initiated_by, Some(UserId::new(1)));
        {
            let state = state.lock().unwrap();
            assert_eq!(state.user_balance(1), 75000);
            assert_eq!(state.project(20).current_money, Amount::new(25000));
            assert_eq!(state.transactions.len(), 1);
        }
        assert!(conserved(&state));
    }

    #[test]
    fn insufficient_funds_leave_no_trace() {
        let state = scenario_state();

        let err = service(state.clone(), 2).transfer(invest(2, 20, 60000)).wait().unwrap_err();

        match kind_of(err) {
            ErrorKind::InsufficientFunds => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
        let state = state.lock().unwrap();
        assert_eq!(state.user_balance(2), 50000);
        assert_eq!(state.project(20).current_money, Amount::zero());
        assert!(state.transactions.is_empty());
    }

    #[test]
    fn foreign_sources_and_bans_are_forbidden() {
        let state = MockState::default()
            .with_user(1, 100000)
            .with_banned_user(3, 100000)
            .with_user(7, 0)
            .with_organization(10, 7, 100000)
            .with_project(project(20, 10, 500000, MonetizationType::None, 0))
            .into_shared();

        let moved_for_other = service(state.clone(), 7).transfer(invest(1, 20, 100)).wait().unwrap_err();
        match kind_of(moved_for_other) {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }

        let banned = service(state.clone(), 3).transfer(invest(3, 20, 100)).wait().unwrap_err();
        match kind_of(banned) {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }

        // an employee without money_management cannot pay out of the organization
        let org_payment = TransferRequest {
            kind: TransferKind::OrgToUser,
            from: HolderRef::organization(OrganizationId::new(10)),
            to: HolderRef::user(UserId::new(1)),
            amount: Amount::new(100),
            idempotency_key: None,
        };
        let stranger = service(state.clone(), 1).transfer(org_payment.clone()).wait().unwrap_err();
        match kind_of(stranger) {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
        assert!(service(state.clone(), 7).transfer(org_payment).wait().is_ok());

        state.lock().unwrap().projects.get_mut(&ProjectId::new(20)).unwrap().is_banned = true;
        let into_banned = service(state.clone(), 1).transfer(invest(1, 20, 100)).wait().unwrap_err();
        match kind_of(into_banned) {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
        assert_eq!(state.lock().unwrap().user_balance(1), 100100);
    }

    #[test]
    fn users_cannot_originate_deposits_or_withdrawals() {
        let state = scenario_state();
        let deposit = TransferRequest {
            kind: TransferKind::UserDeposit,
            from: HolderRef::external(),
            to: HolderRef::user(UserId::new(1)),
            amount: Amount::new(100),
            idempotency_key: None,
        };
        match kind_of(service(state.clone(), 1).transfer(deposit).wait().unwrap_err()) {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }

        let withdrawal = TransferRequest {
            kind: TransferKind::UserWithdraw,
            from: HolderRef::user(UserId::new(1)),
            to: HolderRef::external(),
            amount: Amount::new(100),
            idempotency_key: None,
        };
        match kind_of(service(state.clone(), 1).transfer(withdrawal).wait().unwrap_err()) {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
    }

    #[test]
    fn malformed_requests_are_invalid_input() {
        let state = scenario_state();
        let zero = invest(1, 20, 0);
        let mismatched = TransferRequest {
            kind: TransferKind::UserToOrg,
            ..invest(1, 20, 100)
        };
        for request in vec![zero, mismatched] {
            match kind_of(service(state.clone(), 1).transfer(request).wait().unwrap_err()) {
                ErrorKind::InvalidInput(_) => (),
                kind => panic!("unexpected error kind: {:?}", kind),
            }
        }
    }

    #[test]
    fn idempotency_key_replays_or_conflicts() {
        let state = scenario_state();
        let request = TransferRequest {
            idempotency_key: Some("order-1".to_string()),
            ..invest(1, 20, 1000)
        };

        let first = service(state.clone(), 1).transfer(request.clone()).wait().unwrap();
        let replay = service(state.clone(), 1).transfer(request.clone()).wait().unwrap();
        assert_eq!(first.id, replay.id);
        assert_eq!(state.lock().unwrap().user_balance(1), 99000);

        let different = TransferRequest {
            amount: Amount::new(2000),
            ..request
        };
        match kind_of(service(state.clone(), 1).transfer(different).wait().unwrap_err()) {
            ErrorKind::Conflict => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
        assert_eq!(state.lock().unwrap().transactions.len(), 1);
    }

    #[test]
    fn crossing_the_goal_enqueues_one_effect() {
        let state = MockState::default()
            .with_user(1, 100000)
            .with_user(5, 0)
            .with_organization(10, 5, 0)
            .with_project(project(20, 10, 30000, MonetizationType::OneTimePercent, 1000))
            .into_shared();

        service(state.clone(), 1).transfer(invest(1, 20, 20000)).wait().unwrap();
        assert_eq!(state.lock().unwrap().events_with_key("goal_reached:20"), 0);
        service(state.clone(), 1).transfer(invest(1, 20, 10000)).wait().unwrap();
        service(state.clone(), 1).transfer(invest(1, 20, 10000)).wait().unwrap();
        assert_eq!(state.lock().unwrap().events_with_key("goal_reached:20"), 1);
    }

    #[test]
    fn dividends_do_not_settle_investors() {
        let state = scenario_state();
        service(state.clone(), 1).transfer(invest(1, 20, 10000)).wait().unwrap();

        let dividend = TransferRequest {
            kind: TransferKind::ProjectToUser,
            from: HolderRef::project(ProjectId::new(20)),
            to: HolderRef::user(UserId::new(1)),
            amount: Amount::new(1),
            idempotency_key: None,
        };
        let record = service(state.clone(), 5).transfer(dividend).wait().unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.project(20).current_money, Amount::new(9999));
        assert_eq!(state.events_with_key(&format!("paid_back:{}", record.id)), 1);
        assert!(state.paybacks.is_empty());
    }

    #[test]
    fn cum_sums_follow_the_balances() {
        let state = scenario_state();
        for _ in 0..3 {
            service(state.clone(), 1).transfer(invest(1, 20, 1000)).wait().unwrap();
            service(state.clone(), 2).transfer(invest(2, 20, 500)).wait().unwrap();
        }

        let history = service(state.clone(), 1)
            .get_history(HolderRef::user(UserId::new(1)), 0, 10)
            .wait()
            .unwrap();
        assert_eq!(history.len(), 3);
        // newest first, balances strictly decreasing back in time
        let balances: Vec<_> = history
            .iter()
            .map(|record| record.balance_of(HolderRef::user(UserId::new(1))).unwrap().inner())
            .collect();
        assert_eq!(balances, vec![97000, 98000, 99000]);

        let escrow = service(state.clone(), 5)
            .get_balance(HolderRef::project(ProjectId::new(20)))
            .wait()
            .unwrap();
        assert_eq!(escrow.balance, Amount::new(4500));

        let investors = service(state.clone(), 5).get_investors(ProjectId::new(20)).wait().unwrap();
        assert_eq!(
            investors,
            vec![
                Investor {
                    user_id: UserId::new(1),
                    total_invested: Amount::new(3000),
                },
                Investor {
                    user_id: UserId::new(2),
                    total_invested: Amount::new(1500),
                },
            ]
        );

        match kind_of(
            service(state.clone(), 2)
                .get_balance(HolderRef::user(UserId::new(1)))
                .wait()
                .unwrap_err(),
        ) {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
        assert!(conserved(&state));
    }
}
