use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::{Connection, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use failure::Fail;

use models::{InvestorPayback, ProjectId, UserId};
use schema::investor_paybacks::dsl as InvestorPaybacks;

use super::error::*;
use super::types::RepoResultV2;

pub trait PaybacksRepo {
    /// Returns `false` when the investor already had a mark.
    fn mark_paid_back(&self, payback: InvestorPayback) -> RepoResultV2<bool>;

    /// Whether a closing payout already settled the investor.
    fn is_paid_back(&self, project_id: ProjectId, user_id: UserId) -> RepoResultV2<bool>;
}

pub struct PaybacksRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> PaybacksRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> PaybacksRepo for PaybacksRepoImpl<'a, T> {
    fn mark_paid_back(&self, payback: InvestorPayback) -> RepoResultV2<bool> {
        debug!("Marking investor paid back: {:?}", payback);

        diesel::insert_into(InvestorPaybacks::investor_paybacks)
            .values(&payback)
            .on_conflict_do_nothing()
            .execute(self.db_conn)
            .map(|inserted| inserted > 0)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => payback)
            })
    }

    fn is_paid_back(&self, project_id: ProjectId, user_id: UserId) -> RepoResultV2<bool> {
        debug!("Checking payback mark of user {} in project {}", user_id, project_id);

        InvestorPaybacks::investor_paybacks
            .filter(InvestorPaybacks::project_id.eq(project_id))
            .filter(InvestorPaybacks::user_id.eq(user_id))
            .get_result::<InvestorPayback>(self.db_conn)
            .optional()
            .map(|payback| payback.is_some())
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id, user_id)
            })
    }
}
