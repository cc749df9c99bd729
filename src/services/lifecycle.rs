//! Project lifecycle: closing, paying investors back, goal handling and bans.
//!
//! Each project is handled in its own transaction that starts by locking the project
//! row. Investments lock the same row, so no investment lands while a project closes.
//! Paybacks are ordinary `project_to_user` transfers keyed per project and investor.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Utc};
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Fail;
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool};
use sentry::integrations::failure::capture_fail;
use validator::{ValidationError, ValidationErrors};

use super::error::*;
use super::permissions::{forbidden, require_user, PermissionOracle};
use super::transfers::{execute_transfer, TransferRequest};
use super::types::{spawn_on_pool, ServiceFutureV2, ServiceResultV2};
use models::*;
use repos::ReposFactory;

fn payback_error(e: PaybackError, project_id: ProjectId) -> Error {
    match e {
        PaybackError::NotSupported => {
            let mut errors = ValidationErrors::new();
            errors.add("monetization_type", ValidationError::new("payback_not_supported"));
            ectx!(err e, ErrorKind::InvalidInput(errors) => project_id)
        }
        PaybackError::Overflow => ectx!(err e, ErrorKind::Internal => project_id),
    }
}

fn lock_project<T, F>(db_conn: &T, repo_factory: &F, project_id: ProjectId) -> ServiceResultV2<Project>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    repo_factory
        .create_projects_repo(db_conn)
        .get_for_update(project_id)
        .map_err(ectx!(try convert => project_id))?
        .ok_or_else(|| {
            let e = format_err!("Project {} not found", project_id);
            ectx!(err e, ErrorKind::NotFound => project_id)
        })
}

/// Investments of everyone but the owner, skipping investors a closing payout already settled
fn unpaid_investments<T, F>(db_conn: &T, repo_factory: &F, project: &Project) -> ServiceResultV2<Vec<Investment>>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let project_id = project.id;
    let owner_id = PermissionOracle::new(repo_factory, db_conn)
        .get_organization(project.creator_org_id)?
        .owner_id;
    let investments = repo_factory
        .create_transactions_repo(db_conn)
        .investments_of(project_id, Some(owner_id))
        .map_err(ectx!(try convert => project_id, owner_id))?;

    let paybacks_repo = repo_factory.create_paybacks_repo(db_conn);
    let mut settled = BTreeMap::new();
    let mut unpaid = Vec::with_capacity(investments.len());
    for investment in investments {
        let user_id = investment.user_id;
        let is_settled = match settled.get(&user_id) {
            Some(is_settled) => *is_settled,
            None => {
                let is_settled = paybacks_repo
                    .is_paid_back(project_id, user_id)
                    .map_err(ectx!(try convert => project_id, user_id))?;
                settled.insert(user_id, is_settled);
                is_settled
            }
        };
        if !is_settled {
            unpaid.push(investment);
        }
    }
    Ok(unpaid)
}

/// Deducts dividends the project already sent each investor. Investors left with nothing owed are dropped.
fn net_of_paid<T, F>(db_conn: &T, repo_factory: &F, project_id: ProjectId, owed: Vec<Owed>) -> ServiceResultV2<Vec<Owed>>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let transactions_repo = repo_factory.create_transactions_repo(db_conn);
    let mut net = Vec::with_capacity(owed.len());
    for investor in owed {
        let user_id = investor.user_id;
        let has_payback = transactions_repo
            .has_payback(project_id, user_id)
            .map_err(ectx!(try convert => project_id, user_id))?;
        if !has_payback {
            net.push(investor);
            continue;
        }
        let paid = transactions_repo
            .paid_back_to(project_id, user_id)
            .map_err(ectx!(try convert => project_id, user_id))?;
        let left = investor.less_paid(paid);
        debug!("Investor {} of project {} was already paid {}, owed {:?}", user_id, project_id, paid, left);
        if !left.is_settled() {
            net.push(left);
        }
    }
    Ok(net)
}

/// The escrow must equal what the ledger credited to the project minus what it debited.
fn reconcile<T, F>(db_conn: &T, repo_factory: &F, project: &Project) -> ServiceResultV2<()>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let project_id = project.id;
    let transactions_repo = repo_factory.create_transactions_repo(db_conn);
    let sum_in = transactions_repo.sum_in(project_id).map_err(ectx!(try convert => project_id))?;
    let sum_out = transactions_repo.sum_out(project_id).map_err(ectx!(try convert => project_id))?;

    match sum_in.checked_sub(sum_out) {
        Some(ledger) if ledger == project.current_money => Ok(()),
        ledger => {
            let e = format_err!(
                "Escrow of project {} holds {} but the ledger says {:?} (in {}, out {})",
                project_id,
                project.current_money,
                ledger,
                sum_in,
                sum_out
            );
            Err(ectx!(err e, ErrorKind::Internal => project_id, sum_in, sum_out))
        }
    }
}

fn pay_investors<T, F>(db_conn: &T, repo_factory: &F, project_id: ProjectId, payouts: Vec<(UserId, Amount)>) -> ServiceResultV2<Vec<LedgerRecord>>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    payouts
        .into_iter()
        .map(|(user_id, amount)| {
            let request = TransferRequest {
                kind: TransferKind::ProjectToUser,
                from: HolderRef::project(project_id),
                to: HolderRef::user(user_id),
                amount,
                idempotency_key: Some(format!("payback:{}:{}", project_id, user_id)),
            };
            execute_transfer(db_conn, repo_factory, request, Initiator::Closing)
        })
        .collect()
}

fn enqueue_closed<T, F>(db_conn: &T, repo_factory: &F, project_id: ProjectId, reason: CloseReason) -> ServiceResultV2<()>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let event = Event::new(EventPayload::ProjectClosed { project_id, reason });
    repo_factory
        .create_event_store_repo(db_conn)
        .add_event_once(event.clone())
        .map(|_| ())
        .map_err(ectx!(convert => event))
}

/// Closes one expired project and refunds its investors per the monetization policy.
/// Returns the refunds, or `None` when the project was no longer open and expired.
pub fn close_expired_project<T, F>(db_conn: &T, repo_factory: &F, project_id: ProjectId, now: NaiveDateTime) -> ServiceResultV2<Option<Vec<LedgerRecord>>>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    db_conn.transaction::<Option<Vec<LedgerRecord>>, Error, _>(|| {
        let project = lock_project(db_conn, repo_factory, project_id)?;
        if !project.is_open() || !project.is_expired(now) {
            return Ok(None);
        }

        reconcile(db_conn, repo_factory, &project)?;
        repo_factory
            .create_projects_repo(db_conn)
            .close(project_id)
            .map_err(ectx!(try convert => project_id))?;

        let investments = unpaid_investments(db_conn, repo_factory, &project)?;
        let owed = owed_on_expiry(&project, &investments, now).map_err(|e| payback_error(e, project_id))?;
        let owed = net_of_paid(db_conn, repo_factory, project_id, owed)?;
        let total_owed = total(&owed);
        let payouts = allocate(&owed, project.current_money);
        if total_owed.map(|owed| owed > project.current_money).unwrap_or(true) {
            warn!(
                "Escrow of project {} ({}) does not cover what investors are owed, returning principal first",
                project_id, project.current_money
            );
        }

        let refunds = pay_investors(db_conn, repo_factory, project_id, payouts)?;
        enqueue_closed(db_conn, repo_factory, project_id, CloseReason::Expired)?;
        info!("Project {} expired and closed, {} investors refunded", project_id, refunds.len());
        Ok(Some(refunds))
    })
}

/// Writes the accrued amount a time-percent project owes its unpaid investors
pub fn recalculate_project_payback<T, F>(db_conn: &T, repo_factory: &F, project: &Project, now: NaiveDateTime) -> ServiceResultV2<Amount>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let project_id = project.id;
    let investments = unpaid_investments(db_conn, repo_factory, project)?;
    let required = required_to_payback(&investments, project.percent, now).map_err(|e| payback_error(e, project_id))?;
    repo_factory
        .create_projects_repo(db_conn)
        .set_money_required_to_payback(project_id, required)
        .map_err(ectx!(try convert => project_id, required))?;
    debug!("Project {} requires {} to pay back", project_id, required);
    Ok(required)
}

/// One-time-percent projects stop accepting money once funded. Returns whether the project was closed.
pub fn close_funded_project<T, F>(db_conn: &T, repo_factory: &F, project_id: ProjectId) -> ServiceResultV2<bool>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    db_conn.transaction::<bool, Error, _>(|| {
        let project = lock_project(db_conn, repo_factory, project_id)?;
        if project.monetization_type != MonetizationType::OneTimePercent || !project.is_open() {
            return Ok(false);
        }
        repo_factory
            .create_projects_repo(db_conn)
            .close(project_id)
            .map_err(ectx!(try convert => project_id))?;
        info!("Project {} reached its goal and was closed", project_id);
        Ok(true)
    })
}

pub trait LifecycleService: 'static {
    /// Closes every expired project, reading them `page_size` at a time. Returns how many were closed.
    fn close_expired_projects(&self, page_size: i64) -> ServiceFutureV2<usize>;

    /// Returns how many projects were updated
    fn recalculate_payback(&self) -> ServiceFutureV2<usize>;

    fn start_payback(&self, project_id: ProjectId) -> ServiceFutureV2<Project>;

    /// Returns whether the project was closed
    fn handle_goal_reached(&self, project_id: ProjectId) -> ServiceFutureV2<bool>;

    fn ban_project(&self, project_id: ProjectId) -> ServiceFutureV2<Project>;
}

pub struct LifecycleServiceImpl<
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
> {
    pub db_pool: Pool<M>,
    pub cpu_pool: CpuPool,
    pub repo_factory: F,
    pub user_id: Option<UserId>,
    /// Scheduler and event handlers run jobs without a user
    pub system: bool,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
    > LifecycleServiceImpl<T, M, F>
{
    pub fn new(db_pool: Pool<M>, cpu_pool: CpuPool, repo_factory: F, user_id: Option<UserId>) -> Self {
        Self {
            db_pool,
            cpu_pool,
            repo_factory,
            user_id,
            system: false,
        }
    }

    pub fn system(db_pool: Pool<M>, cpu_pool: CpuPool, repo_factory: F) -> Self {
        Self {
            db_pool,
            cpu_pool,
            repo_factory,
            user_id: None,
            system: true,
        }
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
    > Clone for LifecycleServiceImpl<T, M, F>
{
    fn clone(&self) -> Self {
        Self {
            db_pool: self.db_pool.clone(),
            cpu_pool: self.cpu_pool.clone(),
            repo_factory: self.repo_factory.clone(),
            user_id: self.user_id,
            system: self.system,
        }
    }
}

fn require_admin_or_system<T, F>(db_conn: &T, repo_factory: &F, user_id: Option<UserId>, system: bool, action: &str) -> ServiceResultV2<()>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    if system {
        return Ok(());
    }
    let caller = require_user(user_id)?;
    if PermissionOracle::new(repo_factory, db_conn).is_admin(caller)? {
        Ok(())
    } else {
        forbidden(user_id, action)
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
    > LifecycleService for LifecycleServiceImpl<T, M, F>
{
    fn close_expired_projects(&self, page_size: i64) -> ServiceFutureV2<usize> {
        let repo_factory = self.repo_factory.clone();
        let user_id = self.user_id;
        let system = self.system;

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            require_admin_or_system(&*conn, &repo_factory, user_id, system, "run expired projects job")?;
            let now = Utc::now().naive_utc();
            let page_size = page_size.max(1);

            let mut closed = 0;
            let mut failed = 0;
            let mut after = None;
            loop {
                let page = repo_factory
                    .create_projects_repo(&*conn)
                    .list_expired(now, after, page_size)
                    .map_err(ectx!(try convert => now, after, page_size))?;
                let last = match page.last() {
                    Some(project) => project.id,
                    None => break,
                };

                for project in page {
                    match close_expired_project(&*conn, &repo_factory, project.id, now) {
                        Ok(Some(_)) => closed += 1,
                        Ok(None) => (),
                        Err(e) => {
                            failed += 1;
                            error!("Could not close expired project {}: {}", project.id, e);
                            capture_fail(&e);
                        }
                    }
                }
                after = Some(last);
            }

            info!("Expired projects job closed {} projects, {} failed", closed, failed);
            Ok(closed)
        })
    }

    fn recalculate_payback(&self) -> ServiceFutureV2<usize> {
        let repo_factory = self.repo_factory.clone();
        let user_id = self.user_id;
        let system = self.system;

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            require_admin_or_system(&*conn, &repo_factory, user_id, system, "run payback recalculation")?;
            let now = Utc::now().naive_utc();
            let accruing = repo_factory
                .create_projects_repo(&*conn)
                .list_accruing()
                .map_err(ectx!(try convert))?;

            let mut updated = 0;
            for project in accruing {
                match conn.transaction(|| recalculate_project_payback(&*conn, &repo_factory, &project, now)) {
                    Ok(_) => updated += 1,
                    Err(e) => {
                        error!("Could not recalculate payback of project {}: {}", project.id, e);
                        capture_fail(&e);
                    }
                }
            }
            Ok(updated)
        })
    }

    fn start_payback(&self, project_id: ProjectId) -> ServiceFutureV2<Project> {
        let repo_factory = self.repo_factory.clone();
        let user_id = self.user_id;

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            let caller = require_user(user_id)?;

            conn.transaction::<Project, Error, _>(|| {
                let project = lock_project(&*conn, &repo_factory, project_id)?;
                let oracle = PermissionOracle::new(&repo_factory, &*conn);
                if !oracle.check(project.creator_org_id, caller, Capability::MoneyManagement)? {
                    return forbidden(user_id, &format!("start payback of project {}", project_id));
                }
                if project.is_banned {
                    return forbidden(user_id, &format!("start payback of banned project {}", project_id));
                }
                if project.payback_started {
                    let e = format_err!("Payback of project {} already started", project_id);
                    return Err(ectx!(err e, ErrorKind::Conflict => project_id));
                }

                let now = Utc::now().naive_utc();
                reconcile(&*conn, &repo_factory, &project)?;
                let investments = unpaid_investments(&*conn, &repo_factory, &project)?;
                let owed = owed_on_payback(&project, &investments, now).map_err(|e| payback_error(e, project_id))?;
                let owed = net_of_paid(&*conn, &repo_factory, project_id, owed)?;
                let total_owed = total(&owed).ok_or_else(|| payback_error(PaybackError::Overflow, project_id))?;
                if total_owed > project.current_money {
                    let e = format_err!(
                        "Project {} owes {} but holds {}",
                        project_id,
                        total_owed,
                        project.current_money
                    );
                    return Err(ectx!(err e, ErrorKind::InsufficientFunds => project_id, total_owed));
                }

                repo_factory
                    .create_projects_repo(&*conn)
                    .start_payback(project_id, now)
                    .map_err(ectx!(try convert => project_id))?;
                let paid = pay_investors(&*conn, &repo_factory, project_id, allocate(&owed, total_owed))?;
                enqueue_closed(&*conn, &repo_factory, project_id, CloseReason::Payback)?;
                info!(
                    "User {} started payback of project {}: {} paid to {} investors",
                    caller,
                    project_id,
                    total_owed,
                    paid.len()
                );
                lock_project(&*conn, &repo_factory, project_id)
            })
        })
    }

    fn handle_goal_reached(&self, project_id: ProjectId) -> ServiceFutureV2<bool> {
        let repo_factory = self.repo_factory.clone();

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            close_funded_project(&*conn, &repo_factory, project_id)
        })
    }

    fn ban_project(&self, project_id: ProjectId) -> ServiceFutureV2<Project> {
        let repo_factory = self.repo_factory.clone();
        let user_id = self.user_id;

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            let caller = require_user(user_id)?;
            if !PermissionOracle::new(&repo_factory, &*conn).is_admin(caller)? {
                return forbidden(user_id, &format!("ban project {}", project_id));
            }
            conn.transaction::<Project, Error, _>(|| {
                lock_project(&*conn, &repo_factory, project_id)?;
                let project = repo_factory
                    .create_projects_repo(&*conn)
                    .ban(project_id)
                    .map_err(ectx!(try convert => project_id))?;
                warn!("Project {} banned by admin {}", project_id, caller);
                Ok(project)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::Future;

    use super::*;
    use repos::repo_factory::tests::*;

    type Service = LifecycleServiceImpl<MockConnection, MockConnectionManager, ReposFactoryMock>;

    fn pool(state: &SharedState) -> r2d2::Pool<MockConnectionManager> {
        r2d2::Pool::builder()
            .max_size(1)
            .build(MockConnectionManager::new(state.clone()))
            .unwrap()
    }

    fn system(state: SharedState) -> Service {
        LifecycleServiceImpl::system(pool(&state), CpuPool::new(1), ReposFactoryMock::new(state))
    }

    fn as_user(state: SharedState, user_id: i32) -> Service {
        LifecycleServiceImpl::new(pool(&state), CpuPool::new(1), ReposFactoryMock::new(state), Some(UserId::new(user_id)))
    }

    /// Org 10 owned by user 5; investors 1, 2 and 3 put 100, 200 and 300 into project 20.
    /// The owner's own money makes up any difference to `escrow`.
    fn funded(monetization_type: MonetizationType, percent: u32, days_ago: i64, duration_days: i32, escrow: u64) -> SharedState {
        let mut project = aged_project(project(20, 10, 500000, monetization_type, percent), days_ago, duration_days);
        project.current_money = Amount::new(escrow);
        let state = MockState::default()
            .with_user(1, 0)
            .with_user(2, 0)
            .with_user(3, 0)
            .with_user(5, 0)
            .with_admin(9)
            .with_organization(10, 5, 0)
            .with_project(project)
            .with_investment(20, 3, 30000, days_ago)
            .with_investment(20, 1, 10000, days_ago)
            .with_investment(20, 2, 20000, days_ago);

        let state = if escrow > 60000 {
            state.with_investment(20, 5, escrow - 60000, days_ago)
        } else if escrow < 60000 {
            state.with_record(
                TransferKind::ProjectToUser,
                HolderRef::project(ProjectId::new(20)),
                HolderRef::user(UserId::new(5)),
                60000 - escrow,
                0,
                5,
            )
        } else {
            state
        };
        state.into_shared()
    }

    /// Payouts made by closing, in order
    fn paybacks(state: &SharedState) -> Vec<(i32, u64)> {
        state
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|record| record.kind == TransferKind::ProjectToUser && record.initiated_by.is_none())
            .map(|record| (record.to.id, record.amount.inner()))
            .collect()
    }

    #[test]
    fn expired_project_refunds_every_investor_once() {
        let state = funded(MonetizationType::OneTimePercent, 1000, 2, 1, 60000);
        let job = system(state.clone());

        assert_eq!(job.close_expired_projects(100).wait().unwrap(), 1);
        assert_eq!(job.close_expired_projects(100).wait().unwrap(), 0);

        assert_eq!(paybacks(&state), vec![(1, 10000), (2, 20000), (3, 30000)]);
        let state = state.lock().unwrap();
        let project = state.project(20);
        assert!(project.is_completed);
        assert!(!project.is_public);
        assert_eq!(project.current_money, Amount::zero());
        assert_eq!(state.user_balance(3), 30000);
        assert_eq!(state.paybacks.len(), 3);
        assert_eq!(state.events_with_key("project_closed:20"), 1);
    }

    #[test]
    fn time_percent_expiry_pays_accrual() {
        // 1% a day for 2 full days
        let state = funded(MonetizationType::TimePercent, 100, 2, 1, 70000);

        system(state.clone()).close_expired_projects(100).wait().unwrap();

        assert_eq!(paybacks(&state), vec![(1, 10200), (2, 20400), (3, 30600)]);
        assert_eq!(state.lock().unwrap().project(20).current_money, Amount::new(8800));
    }

    #[test]
    fn short_escrow_pays_principal_in_user_order() {
        let state = funded(MonetizationType::None, 0, 2, 1, 25000);

        system(state.clone()).close_expired_projects(100).wait().unwrap();

        assert_eq!(paybacks(&state), vec![(1, 10000), (2, 15000)]);
    }

    #[test]
    fn time_percent_escrow_holding_only_principal_returns_principal() {
        let state = funded(MonetizationType::TimePercent, 100, 2, 1, 60000);

        system(state.clone()).close_expired_projects(100).wait().unwrap();

        assert_eq!(paybacks(&state), vec![(1, 10000), (2, 20000), (3, 30000)]);
        assert_eq!(state.lock().unwrap().project(20).current_money, Amount::zero());
    }

    #[test]
    fn dividend_is_deducted_from_the_expiry_refund() {
        let state = funded(MonetizationType::None, 0, 2, 1, 60000);
        let factory = ReposFactoryMock::new(state.clone());
        let conn = MockConnection::new(state.clone());
        let dividend = TransferRequest {
            kind: TransferKind::ProjectToUser,
            from: HolderRef::project(ProjectId::new(20)),
            to: HolderRef::user(UserId::new(1)),
            amount: Amount::new(1),
            idempotency_key: None,
        };
        execute_transfer(&conn, &factory, dividend, Initiator::User(UserId::new(5))).unwrap();

        assert_eq!(system(state.clone()).close_expired_projects(100).wait().unwrap(), 1);

        assert_eq!(paybacks(&state), vec![(1, 9999), (2, 20000), (3, 30000)]);
        let state = state.lock().unwrap();
        assert_eq!(state.user_balance(1), 10000);
        assert_eq!(state.project(20).current_money, Amount::zero());
        assert_eq!(state.paybacks.len(), 3);
    }

    #[test]
    fn every_expired_project_closes_and_a_broken_one_is_skipped() {
        let mut state = MockState::default().with_user(1, 0).with_user(5, 0).with_organization(10, 5, 0);
        for id in 21..26 {
            let mut expired = aged_project(project(id, 10, 500000, MonetizationType::None, 0), 2, 1);
            expired.current_money = Amount::new(1000);
            state = state.with_project(expired).with_investment(id, 1, 1000, 2);
        }
        // escrow no longer agrees with its ledger
        state.projects.get_mut(&ProjectId::new(22)).unwrap().current_money = Amount::new(999);
        let state = state.into_shared();

        // two projects per page
        assert_eq!(system(state.clone()).close_expired_projects(2).wait().unwrap(), 4);

        let state = state.lock().unwrap();
        for id in &[21, 23, 24, 25] {
            assert!(state.project(*id).is_completed);
        }
        assert!(!state.project(22).is_completed);
        assert_eq!(state.user_balance(1), 4000);
    }

    #[test]
    fn open_projects_are_left_alone() {
        let state = funded(MonetizationType::None, 0, 2, 30, 60000);

        assert_eq!(system(state.clone()).close_expired_projects(100).wait().unwrap(), 0);
        assert!(paybacks(&state).is_empty());
        assert!(!state.lock().unwrap().project(20).is_completed);
    }

    #[test]
    fn jobs_need_an_admin_when_triggered_by_hand() {
        let state = funded(MonetizationType::None, 0, 2, 1, 60000);

        match as_user(state.clone(), 1).close_expired_projects(100).wait().unwrap_err().kind() {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
        assert_eq!(as_user(state.clone(), 9).close_expired_projects(100).wait().unwrap(), 1);
    }

    #[test]
    fn recalculation_moves_no_money() {
        let state = funded(MonetizationType::TimePercent, 100, 3, 30, 60000);

        assert_eq!(system(state.clone()).recalculate_payback().wait().unwrap(), 1);

        let state = state.lock().unwrap();
        assert_eq!(state.project(20).money_required_to_payback, Amount::new(1800));
        assert_eq!(state.project(20).current_money, Amount::new(60000));
        assert_eq!(state.transactions.len(), 3);
    }

    #[test]
    fn start_payback_pays_principal_and_percent() {
        let state = funded(MonetizationType::OneTimePercent, 1000, 1, 30, 66000);

        match as_user(state.clone(), 1).start_payback(ProjectId::new(20)).wait().unwrap_err().kind() {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }

        let project = as_user(state.clone(), 5).start_payback(ProjectId::new(20)).wait().unwrap();
        assert!(project.payback_started);
        assert!(project.is_completed);
        assert_eq!(project.current_money, Amount::zero());
        assert_eq!(paybacks(&state), vec![(1, 11000), (2, 22000), (3, 33000)]);

        match as_user(state.clone(), 5).start_payback(ProjectId::new(20)).wait().unwrap_err().kind() {
            ErrorKind::Conflict => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
    }

    #[test]
    fn start_payback_rejects_uncovered_or_unsupported_projects() {
        let short = funded(MonetizationType::OneTimePercent, 1000, 1, 30, 60000);
        match as_user(short.clone(), 5).start_payback(ProjectId::new(20)).wait().unwrap_err().kind() {
            ErrorKind::InsufficientFunds => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
        assert!(!short.lock().unwrap().project(20).payback_started);

        let plain = funded(MonetizationType::None, 0, 1, 30, 60000);
        match as_user(plain, 5).start_payback(ProjectId::new(20)).wait().unwrap_err().kind() {
            ErrorKind::InvalidInput(_) => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
    }

    #[test]
    fn escrow_out_of_line_with_the_ledger_stops_payback() {
        let state = funded(MonetizationType::OneTimePercent, 1000, 1, 30, 66000);
        state.lock().unwrap().projects.get_mut(&ProjectId::new(20)).unwrap().current_money = Amount::new(70000);

        match as_user(state.clone(), 5).start_payback(ProjectId::new(20)).wait().unwrap_err().kind() {
            ErrorKind::Internal => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
        assert!(paybacks(&state).is_empty());
        assert!(!state.lock().unwrap().project(20).payback_started);
    }

    #[test]
    fn goal_closes_only_one_time_percent_projects() {
        let one_time = funded(MonetizationType::OneTimePercent, 1000, 1, 30, 60000);
        assert!(system(one_time.clone()).handle_goal_reached(ProjectId::new(20)).wait().unwrap());
        assert!(one_time.lock().unwrap().project(20).is_completed);
        assert!(paybacks(&one_time).is_empty());

        let time_percent = funded(MonetizationType::TimePercent, 100, 1, 30, 60000);
        assert!(!system(time_percent.clone()).handle_goal_reached(ProjectId::new(20)).wait().unwrap());
        assert!(!time_percent.lock().unwrap().project(20).is_completed);
    }

    #[test]
    fn only_admins_ban() {
        let state = funded(MonetizationType::None, 0, 1, 30, 60000);

        match as_user(state.clone(), 5).ban_project(ProjectId::new(20)).wait().unwrap_err().kind() {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
        let banned = as_user(state.clone(), 9).ban_project(ProjectId::new(20)).wait().unwrap();
        assert!(banned.is_banned);
        assert!(!banned.is_public);
    }
}
