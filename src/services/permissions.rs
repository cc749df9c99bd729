//! Organization permission model.
//!
//! `PermissionOracle` answers capability and read checks inside a database
//! connection; `PermissionsService` serves the checks and employee rights
//! management over HTTP.

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Fail;
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool};
use validator::{ValidationError, ValidationErrors};

use super::error::*;
use super::types::{spawn_on_pool, ServiceFutureV2, ServiceResultV2};
use models::*;
use repos::{OrganizationsRepo, ProjectsRepo, ReposFactory, RightsRepo, UsersRepo};

pub struct PermissionOracle<'a> {
    users_repo: Box<UsersRepo + 'a>,
    organizations_repo: Box<OrganizationsRepo + 'a>,
    projects_repo: Box<ProjectsRepo + 'a>,
    rights_repo: Box<RightsRepo + 'a>,
}

impl<'a> PermissionOracle<'a> {
    pub fn new<T, F>(repo_factory: &F, db_conn: &'a T) -> Self
    where
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        F: ReposFactory<T>,
    {
        Self {
            users_repo: repo_factory.create_users_repo(db_conn),
            organizations_repo: repo_factory.create_organizations_repo(db_conn),
            projects_repo: repo_factory.create_projects_repo(db_conn),
            rights_repo: repo_factory.create_rights_repo(db_conn),
        }
    }

    pub fn get_organization(&self, org_id: OrganizationId) -> ServiceResultV2<Organization> {
        self.organizations_repo
            .get(org_id)
            .map_err(ectx!(try convert => org_id))?
            .ok_or_else(|| {
                let e = format_err!("Organization {} not found", org_id);
                ectx!(err e, ErrorKind::NotFound => org_id)
            })
    }

    pub fn get_project(&self, project_id: ProjectId) -> ServiceResultV2<Project> {
        self.projects_repo
            .get(project_id)
            .map_err(ectx!(try convert => project_id))?
            .ok_or_else(|| {
                let e = format_err!("Project {} not found", project_id);
                ectx!(err e, ErrorKind::NotFound => project_id)
            })
    }

    /// Whether `user_id` holds `capability` on `org_id`
    pub fn check(&self, org_id: OrganizationId, user_id: UserId, capability: Capability) -> ServiceResultV2<bool> {
        let org = self.get_organization(org_id)?;
        self.check_on(&org, user_id, capability)
    }

    /// Same as `check` for an organization row the caller already holds
    pub fn check_on(&self, org: &Organization, user_id: UserId, capability: Capability) -> ServiceResultV2<bool> {
        if org.owner_id == user_id {
            return Ok(true);
        }

        let rights = self
            .rights_repo
            .get(org.id, user_id)
            .map_err(ectx!(try convert => org.id, user_id))?;
        Ok(grants(org, rights.as_ref(), user_id, capability))
    }

    pub fn get_user(&self, user_id: UserId) -> ServiceResultV2<Option<UserWallet>> {
        self.users_repo.get(user_id).map_err(ectx!(convert => user_id))
    }

    pub fn is_admin(&self, user_id: UserId) -> ServiceResultV2<bool> {
        Ok(self.get_user(user_id)?.map(|user| user.is_admin).unwrap_or(false))
    }

    pub fn can_read_user(&self, target: UserId, user_id: UserId) -> ServiceResultV2<bool> {
        if target == user_id {
            return Ok(true);
        }
        self.is_admin(user_id)
    }

    /// Owner, any employee with a rights row, or an admin
    pub fn can_read_org(&self, org_id: OrganizationId, user_id: UserId) -> ServiceResultV2<bool> {
        let org = self.get_organization(org_id)?;
        if org.owner_id == user_id {
            return Ok(true);
        }

        let is_employee = self
            .rights_repo
            .get(org_id, user_id)
            .map_err(ectx!(try convert => org_id, user_id))?
            .is_some();
        if is_employee {
            return Ok(true);
        }
        self.is_admin(user_id)
    }

    pub fn can_read_project(&self, project_id: ProjectId, user_id: UserId) -> ServiceResultV2<bool> {
        let project = self.get_project(project_id)?;
        self.can_read_org(project.creator_org_id, user_id)
    }

    pub fn can_read_holder(&self, holder: HolderRef, user_id: UserId) -> ServiceResultV2<bool> {
        match holder.kind {
            HolderKind::External => self.is_admin(user_id),
            HolderKind::User => self.can_read_user(UserId::new(holder.id), user_id),
            HolderKind::Organization => self.can_read_org(OrganizationId::new(holder.id), user_id),
            HolderKind::Project => self.can_read_project(ProjectId::new(holder.id), user_id),
        }
    }

    /// Capability needed to move money out of (or on behalf of) a real holder:
    /// the user themself, `money_management` on an organization, `project_management`
    /// on the organization owning a project.
    pub fn can_move_money_of(&self, holder: HolderRef, user_id: UserId) -> ServiceResultV2<bool> {
        match holder.kind {
            HolderKind::External => Ok(false),
            HolderKind::User => Ok(holder.id == user_id.inner()),
            HolderKind::Organization => self.check(OrganizationId::new(holder.id), user_id, Capability::MoneyManagement),
            HolderKind::Project => {
                let project = self.get_project(ProjectId::new(holder.id))?;
                self.check(project.creator_org_id, user_id, Capability::ProjectManagement)
            }
        }
    }

    pub fn set_rights(&self, rights: EmployeeRights) -> ServiceResultV2<EmployeeRights> {
        self.rights_repo.upsert(rights.clone()).map_err(ectx!(convert => rights))
    }

    pub fn revoke_rights(&self, org_id: OrganizationId, user_id: UserId) -> ServiceResultV2<Option<EmployeeRights>> {
        self.rights_repo.delete(org_id, user_id).map_err(ectx!(convert => org_id, user_id))
    }
}

pub fn forbidden<T>(user_id: Option<UserId>, action: &str) -> ServiceResultV2<T> {
    let e = format_err!("User {:?} is not allowed to {}", user_id, action);
    Err(ectx!(err e, ErrorKind::Forbidden => user_id))
}

pub fn unauthorized<T>() -> ServiceResultV2<T> {
    let e = format_err!("Authentication required");
    Err(ectx!(err e, ErrorKind::Unauthorized))
}

/// Authenticated caller or `Unauthorized`
pub fn require_user(user_id: Option<UserId>) -> ServiceResultV2<UserId> {
    match user_id {
        Some(user_id) => Ok(user_id),
        None => unauthorized(),
    }
}

pub trait PermissionsService: 'static {
    fn check(&self, org_id: OrganizationId, user_id: UserId, capability: Capability) -> ServiceFutureV2<bool>;

    fn set_rights(&self, org_id: OrganizationId, employee_id: UserId, payload: RightsPayload) -> ServiceFutureV2<EmployeeRights>;

    fn revoke_rights(&self, org_id: OrganizationId, employee_id: UserId) -> ServiceFutureV2<()>;
}

pub struct PermissionsServiceImpl<T, M, F>
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
    > PermissionsServiceImpl<T, M, F>
{
    pub fn new(db_pool: Pool<M>, cpu_pool: CpuPool, repo_factory: F, user_id: Option<UserId>) -> Self {
        Self {
            db_pool,
            cpu_pool,
            repo_factory,
            user_id,
        }
    }

    /// Rights management needs `org_account_management`; the owner's own rights are implicit.
    fn manage_rights<R, Func>(&self, org_id: OrganizationId, employee_id: UserId, f: Func) -> ServiceFutureV2<R>
    where
        Func: FnOnce(&PermissionOracle) -> ServiceResultV2<R> + Send + 'static,
        R: Send + 'static,
    {
        let repo_factory = self.repo_factory.clone();
        let user_id = self.user_id;

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            let caller = require_user(user_id)?;
            let oracle = PermissionOracle::new(&repo_factory, &*conn);
            let org = oracle.get_organization(org_id)?;

            if !oracle.check_on(&org, caller, Capability::OrgAccountManagement)? {
                return forbidden(user_id, "manage employee rights");
            }

            if org.owner_id == employee_id {
                let mut errors = ValidationErrors::new();
                let mut error = ValidationError::new("owner_rights");
                error.message = Some("Rights of the organization owner cannot be changed".into());
                errors.add("user_id", error);
                return Err(ErrorKind::from(errors).into());
            }

            f(&oracle)
        })
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
    > PermissionsService for PermissionsServiceImpl<T, M, F>
{
    fn check(&self, org_id: OrganizationId, user_id: UserId, capability: Capability) -> ServiceFutureV2<bool> {
        let repo_factory = self.repo_factory.clone();
        let caller = self.user_id;

        spawn_on_pool(self.db_pool.clone(), self.cpu_pool.clone(), move |conn| {
            require_user(caller)?;
            debug!("Checking {} of user {} at organization {}", capability, user_id, org_id);
            PermissionOracle::new(&repo_factory, &*conn).check(org_id, user_id, capability)
        })
    }

    fn set_rights(&self, org_id: OrganizationId, employee_id: UserId, payload: RightsPayload) -> ServiceFutureV2<EmployeeRights> {
        self.manage_rights(org_id, employee_id, move |oracle| {
            info!("Setting rights of user {} at organization {}: {:?}", employee_id, org_id, payload);
            oracle.set_rights(payload.into_rights(org_id, employee_id))
        })
    }

    fn revoke_rights(&self, org_id: OrganizationId, employee_id: UserId) -> ServiceFutureV2<()> {
        self.manage_rights(org_id, employee_id, move |oracle| {
            info!("Revoking rights of user {} at organization {}", employee_id, org_id);
            oracle.revoke_rights(org_id, employee_id)?.map(|_| ()).ok_or_else(|| {
                let e = format_err!("User {} has no rights at organization {}", employee_id, org_id);
                ectx!(err e, ErrorKind::NotFound => org_id, employee_id)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::Future;

    use super::*;
    use repos::repo_factory::tests::*;

    fn rights(money_management: bool) -> RightsPayload {
        RightsPayload {
            org_account_management: false,
            money_management,
            project_management: false,
        }
    }

    fn state() -> SharedState {
        MockState::default()
            .with_user(1, 0)
            .with_user(2, 0)
            .with_user(3, 0)
            .with_admin(9)
            .with_organization(10, 1, 0)
            .with_rights(10, 2, rights(true))
            .with_project(project(20, 10, 10000, MonetizationType::None, 0))
            .into_shared()
    }

    fn service(state: SharedState, user_id: Option<i32>) -> PermissionsServiceImpl<MockConnection, MockConnectionManager, ReposFactoryMock> {
        let manager = MockConnectionManager::new(state.clone());
        let db_pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        PermissionsServiceImpl::new(db_pool, CpuPool::new(1), ReposFactoryMock::new(state), user_id.map(UserId::new))
    }

    #[test]
    fn owner_holds_every_capability() {
        let state = state();
        let factory = ReposFactoryMock::new(state.clone());
        let conn = MockConnection::new(state);
        let oracle = PermissionOracle::new(&factory, &conn);

        for capability in vec![
            Capability::OrgAccountManagement,
            Capability::MoneyManagement,
            Capability::ProjectManagement,
        ] {
            assert!(oracle.check(OrganizationId::new(10), UserId::new(1), capability).unwrap());
        }
        assert!(oracle.check(OrganizationId::new(10), UserId::new(2), Capability::MoneyManagement).unwrap());
        assert!(!oracle.check(OrganizationId::new(10), UserId::new(2), Capability::ProjectManagement).unwrap());
        assert!(!oracle.check(OrganizationId::new(10), UserId::new(3), Capability::MoneyManagement).unwrap());
    }

    #[test]
    fn admins_read_but_never_move_money() {
        let state = state();
        let factory = ReposFactoryMock::new(state.clone());
        let conn = MockConnection::new(state);
        let oracle = PermissionOracle::new(&factory, &conn);
        let admin = UserId::new(9);

        assert!(oracle.can_read_org(OrganizationId::new(10), admin).unwrap());
        assert!(oracle.can_read_project(ProjectId::new(20), admin).unwrap());
        assert!(oracle.can_read_user(UserId::new(3), admin).unwrap());
        assert!(!oracle.can_move_money_of(HolderRef::organization(OrganizationId::new(10)), admin).unwrap());
        assert!(!oracle.can_move_money_of(HolderRef::user(UserId::new(3)), admin).unwrap());
        assert!(!oracle.can_read_user(UserId::new(1), UserId::new(3)).unwrap());
    }

    #[test]
    fn unknown_organization_is_not_found() {
        let service = service(state(), Some(1));
        match service
            .check(OrganizationId::new(99), UserId::new(1), Capability::MoneyManagement)
            .wait()
            .unwrap_err()
            .kind()
        {
            ErrorKind::NotFound => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
    }

    #[test]
    fn rights_management_requires_org_account_management() {
        let state = state();

        let err = service(state.clone(), Some(2))
            .set_rights(OrganizationId::new(10), UserId::new(3), rights(true))
            .wait()
            .unwrap_err();
        match err.kind() {
            ErrorKind::Forbidden => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }

        let granted = service(state.clone(), Some(1))
            .set_rights(OrganizationId::new(10), UserId::new(3), rights(true))
            .wait()
            .unwrap();
        assert!(granted.money_management);

        let owner_edit = service(state.clone(), Some(1))
            .set_rights(OrganizationId::new(10), UserId::new(1), rights(false))
            .wait()
            .unwrap_err();
        match owner_edit.kind() {
            ErrorKind::InvalidInput(_) => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }

        service(state.clone(), Some(1))
            .revoke_rights(OrganizationId::new(10), UserId::new(3))
            .wait()
            .unwrap();
        let revoked_again = service(state, Some(1))
            .revoke_rights(OrganizationId::new(10), UserId::new(3))
            .wait()
            .unwrap_err();
        match revoked_again.kind() {
            ErrorKind::NotFound => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }
    }
}
