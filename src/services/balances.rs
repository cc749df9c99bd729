//! Balance actors: user wallets, organization wallets and project escrows.
//!
//! Every balance change goes through `lock -> check_delta -> store` inside the
//! caller's database transaction. The transfer engine uses the split form so that
//! both legs of a transfer are validated before either is written.

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Fail;

use super::error::*;
use super::types::ServiceResultV2;
use models::*;
use repos::{OrganizationsRepo, ProjectsRepo, ReposFactory, UsersRepo};

/// Signed change of a holder balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Credit(Amount),
    Debit(Amount),
}

/// Holder row read under a row lock
#[derive(Debug, Clone)]
pub enum LockedHolder {
    External,
    User(UserWallet),
    Organization(Organization),
    Project(Project),
}

impl LockedHolder {
    pub fn holder(&self) -> HolderRef {
        match self {
            LockedHolder::External => HolderRef::external(),
            LockedHolder::User(user) => HolderRef::user(user.id),
            LockedHolder::Organization(org) => HolderRef::organization(org.id),
            LockedHolder::Project(project) => HolderRef::project(project.id),
        }
    }

    /// `None` for the external side, which has no balance
    pub fn balance(&self) -> Option<Amount> {
        match self {
            LockedHolder::External => None,
            LockedHolder::User(user) => Some(user.balance),
            LockedHolder::Organization(org) => Some(org.balance),
            LockedHolder::Project(project) => Some(project.current_money),
        }
    }

    pub fn is_banned(&self) -> bool {
        match self {
            LockedHolder::External => false,
            LockedHolder::User(user) => user.is_banned,
            LockedHolder::Organization(org) => org.is_banned,
            LockedHolder::Project(project) => project.is_banned,
        }
    }
}

/// Computes the balance after `delta`, or why the holder refuses it.
///
/// Banned holders may still be credited (refunds). A completed project accepts no
/// credits and only gives money back through the closing subroutine.
pub fn check_delta(locked: &LockedHolder, delta: Delta, origin: Initiator) -> ServiceResultV2<Option<Amount>> {
    let holder = locked.holder();
    let balance = match locked.balance() {
        None => return Ok(None),
        Some(balance) => balance,
    };

    if let LockedHolder::Project(project) = locked {
        match delta {
            Delta::Credit(_) if project.is_completed => {
                let e = format_err!("Project {} is completed and accepts no money", project.id);
                return Err(ectx!(err e, ErrorKind::Forbidden => holder, delta));
            }
            Delta::Debit(_) if project.is_completed && origin != Initiator::Closing => {
                let e = format_err!("Escrow of completed project {} is only released by closing", project.id);
                return Err(ectx!(err e, ErrorKind::Forbidden => holder, delta, origin));
            }
            _ => (),
        }
    }

    match delta {
        Delta::Credit(amount) => balance.checked_add(amount).map(Some).ok_or_else(|| {
            let e = format_err!("Balance of {} overflows", holder);
            ectx!(err e, ErrorKind::Internal => holder, balance, amount)
        }),
        Delta::Debit(amount) => {
            if locked.is_banned() {
                let e = format_err!("Holder {} is banned", holder);
                return Err(ectx!(err e, ErrorKind::Forbidden => holder, amount));
            }
            balance.checked_sub(amount).map(Some).ok_or_else(|| {
                let e = format_err!("Holder {} has {}, {} requested", holder, balance, amount);
                ectx!(err e, ErrorKind::InsufficientFunds => holder, balance, amount)
            })
        }
    }
}

pub struct BalanceActors<'a> {
    users_repo: Box<UsersRepo + 'a>,
    organizations_repo: Box<OrganizationsRepo + 'a>,
    projects_repo: Box<ProjectsRepo + 'a>,
}

impl<'a> BalanceActors<'a> {
    pub fn new<T, F>(repo_factory: &F, db_conn: &'a T) -> Self
    where
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        F: ReposFactory<T>,
    {
        Self {
            users_repo: repo_factory.create_users_repo(db_conn),
            organizations_repo: repo_factory.create_organizations_repo(db_conn),
            projects_repo: repo_factory.create_projects_repo(db_conn),
        }
    }

    /// Row lock (`SELECT ... FOR UPDATE`) on the holder. The external sentinel is never locked.
    pub fn lock(&self, holder: HolderRef) -> ServiceResultV2<LockedHolder> {
        let locked = match holder.kind {
            HolderKind::External => Some(LockedHolder::External),
            HolderKind::User => self
                .users_repo
                .get_for_update(UserId::new(holder.id))
                .map_err(ectx!(try convert => holder))?
                .map(LockedHolder::User),
            HolderKind::Organization => self
                .organizations_repo
                .get_for_update(OrganizationId::new(holder.id))
                .map_err(ectx!(try convert => holder))?
                .map(LockedHolder::Organization),
            HolderKind::Project => self
                .projects_repo
                .get_for_update(ProjectId::new(holder.id))
                .map_err(ectx!(try convert => holder))?
                .map(LockedHolder::Project),
        };

        locked.ok_or_else(|| {
            let e = format_err!("Holder {} not found", holder);
            ectx!(err e, ErrorKind::NotFound => holder)
        })
    }

    pub fn store(&self, holder: HolderRef, balance: Amount) -> ServiceResultV2<()> {
        match holder.kind {
            HolderKind::External => Ok(()),
            HolderKind::User => self
                .users_repo
                .set_balance(UserId::new(holder.id), balance)
                .map(|_| ())
                .map_err(ectx!(convert => holder, balance)),
            HolderKind::Organization => self
                .organizations_repo
                .set_balance(OrganizationId::new(holder.id), balance)
                .map(|_| ())
                .map_err(ectx!(convert => holder, balance)),
            HolderKind::Project => self
                .projects_repo
                .set_current_money(ProjectId::new(holder.id), balance)
                .map(|_| ())
                .map_err(ectx!(convert => holder, balance)),
        }
    }

    /// Locks, checks and stores in one go. Returns the new balance.
    pub fn apply_delta(&self, holder: HolderRef, delta: Delta, origin: Initiator) -> ServiceResultV2<Option<Amount>> {
        let locked = self.lock(holder)?;
        let balance = check_delta(&locked, delta, origin)?;
        if let Some(balance) = balance {
            self.store(holder, balance)?;
        }
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repos::repo_factory::tests::*;

    fn user(balance: u64) -> LockedHolder {
        LockedHolder::User(user_wallet(1, balance))
    }

    #[test]
    fn debit_beyond_balance_is_insufficient_funds() {
        let err = check_delta(&user(1000), Delta::Debit(Amount::new(1001)), Initiator::User(UserId::new(1))).unwrap_err();
        match err.kind() {
            ErrorKind::InsufficientFunds => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
        assert_eq!(
            check_delta(&user(1000), Delta::Debit(Amount::new(1000)), Initiator::User(UserId::new(1))).unwrap(),
            Some(Amount::zero())
        );
    }

    #[test]
    fn banned_holder_can_receive_but_not_send() {
        let banned = LockedHolder::User(UserWallet {
            is_banned: true,
            ..user_wallet(1, 500)
        });
        assert_eq!(
            check_delta(&banned, Delta::Credit(Amount::new(100)), Initiator::Closing).unwrap(),
            Some(Amount::new(600))
        );
        match check_delta(&banned, Delta::Debit(Amount::new(100)), Initiator::User(UserId::new(1)))
            .unwrap_err()
            .kind()
        {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
    }

    #[test]
    fn completed_project_only_releases_money_to_closing() {
        let mut completed = project(1, 1, 10000, MonetizationType::None, 0);
        completed.current_money = Amount::new(5000);
        completed.is_completed = true;
        let locked = LockedHolder::Project(completed);

        assert!(check_delta(&locked, Delta::Credit(Amount::new(1)), Initiator::User(UserId::new(2))).is_err());
        assert!(check_delta(&locked, Delta::Debit(Amount::new(1)), Initiator::User(UserId::new(2))).is_err());
        assert_eq!(
            check_delta(&locked, Delta::Debit(Amount::new(5000)), Initiator::Closing).unwrap(),
            Some(Amount::zero())
        );
    }

    #[test]
    fn external_side_accepts_any_delta() {
        assert_eq!(
            check_delta(&LockedHolder::External, Delta::Debit(Amount::new(u64::max_value())), Initiator::Closing).unwrap(),
            None
        );
    }

    #[test]
    fn apply_delta_writes_the_new_balance() {
        let state = MockState::default().with_user(1, 1000).with_organization(2, 1, 300).into_shared();
        let factory = ReposFactoryMock::new(state.clone());
        let conn = MockConnection::new(state.clone());
        let actors = BalanceActors::new(&factory, &conn);

        let balance = actors
            .apply_delta(HolderRef::user(UserId::new(1)), Delta::Debit(Amount::new(250)), Initiator::User(UserId::new(1)))
            .unwrap();
        assert_eq!(balance, Some(Amount::new(750)));
        assert_eq!(state.lock().unwrap().user_balance(1), 750);

        let err = actors
            .apply_delta(
                HolderRef::organization(OrganizationId::new(2)),
                Delta::Debit(Amount::new(301)),
                Initiator::User(UserId::new(1)),
            )
            .unwrap_err();
        match err.kind() {
            ErrorKind::InsufficientFunds => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
        assert_eq!(state.lock().unwrap().organization_balance(2), 300);

        match actors.lock(HolderRef::project(ProjectId::new(9))).unwrap_err().kind() {
            ErrorKind::NotFound => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
    }
}
