use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;

use repos::*;

pub trait ReposFactory<C>: Clone + Send + Sync + 'static
where
    C: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
{
    fn create_users_repo<'a>(&self, db_conn: &'a C) -> Box<UsersRepo + 'a>;
    fn create_organizations_repo<'a>(&self, db_conn: &'a C) -> Box<OrganizationsRepo + 'a>;
    fn create_projects_repo<'a>(&self, db_conn: &'a C) -> Box<ProjectsRepo + 'a>;
    fn create_transactions_repo<'a>(&self, db_conn: &'a C) -> Box<TransactionsRepo + 'a>;
    fn create_paybacks_repo<'a>(&self, db_conn: &'a C) -> Box<PaybacksRepo + 'a>;
    fn create_rights_repo<'a>(&self, db_conn: &'a C) -> Box<RightsRepo + 'a>;
    fn create_payments_repo<'a>(&self, db_conn: &'a C) -> Box<PaymentsRepo + 'a>;
    fn create_withdrawals_repo<'a>(&self, db_conn: &'a C) -> Box<WithdrawalsRepo + 'a>;
    fn create_event_store_repo<'a>(&self, db_conn: &'a C) -> Box<EventStoreRepo + 'a>;
}

#[derive(Clone)]
pub struct ReposFactoryImpl {
    max_processing_attempts: u32,
    stuck_threshold_sec: u32,
}

impl ReposFactoryImpl {
    pub fn new(max_processing_attempts: u32, stuck_threshold_sec: u32) -> Self {
        Self {
            max_processing_attempts,
            stuck_threshold_sec,
        }
    }
}

impl<C> ReposFactory<C> for ReposFactoryImpl
where
    C: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
{
    fn create_users_repo<'a>(&self, db_conn: &'a C) -> Box<UsersRepo + 'a> {
        Box::new(UsersRepoImpl::new(db_conn)) as Box<UsersRepo>
    }

    fn create_organizations_repo<'a>(&self, db_conn: &'a C) -> Box<OrganizationsRepo + 'a> {
        Box::new(OrganizationsRepoImpl::new(db_conn)) as Box<OrganizationsRepo>
    }

    fn create_projects_repo<'a>(&self, db_conn: &'a C) -> Box<ProjectsRepo + 'a> {
        Box::new(ProjectsRepoImpl::new(db_conn)) as Box<ProjectsRepo>
    }

    fn create_transactions_repo<'a>(&self, db_conn: &'a C) -> Box<TransactionsRepo + 'a> {
        Box::new(TransactionsRepoImpl::new(db_conn)) as Box<TransactionsRepo>
    }

    fn create_paybacks_repo<'a>(&self, db_conn: &'a C) -> Box<PaybacksRepo + 'a> {
        Box::new(PaybacksRepoImpl::new(db_conn)) as Box<PaybacksRepo>
    }

    fn create_rights_repo<'a>(&self, db_conn: &'a C) -> Box<RightsRepo + 'a> {
        Box::new(RightsRepoImpl::new(db_conn)) as Box<RightsRepo>
    }

    fn create_payments_repo<'a>(&self, db_conn: &'a C) -> Box<PaymentsRepo + 'a> {
        Box::new(PaymentsRepoImpl::new(db_conn)) as Box<PaymentsRepo>
    }

    fn create_withdrawals_repo<'a>(&self, db_conn: &'a C) -> Box<WithdrawalsRepo + 'a> {
        Box::new(WithdrawalsRepoImpl::new(db_conn)) as Box<WithdrawalsRepo>
    }

    fn create_event_store_repo<'a>(&self, db_conn: &'a C) -> Box<EventStoreRepo + 'a> {
        Box::new(EventStoreRepoImpl::new(
            db_conn,
            self.max_processing_attempts,
            self.stuck_threshold_sec,
        )) as Box<EventStoreRepo>
    }
}
