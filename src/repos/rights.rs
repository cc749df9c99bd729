use diesel::connection::AnsiTransactionManager;
use diesel::pg::upsert::excluded;
use diesel::pg::Pg;
use diesel::{Connection, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use failure::Fail;

use models::{EmployeeRights, OrganizationId, UserId};
use schema::user_right_at_org::dsl as Rights;

use super::error::*;
use super::types::RepoResultV2;

pub trait RightsRepo {
    fn get(&self, org_id: OrganizationId, user_id: UserId) -> RepoResultV2<Option<EmployeeRights>>;

    fn upsert(&self, rights: EmployeeRights) -> RepoResultV2<EmployeeRights>;

    fn delete(&self, org_id: OrganizationId, user_id: UserId) -> RepoResultV2<Option<EmployeeRights>>;
}

pub struct RightsRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> RightsRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> RightsRepo for RightsRepoImpl<'a, T> {
    fn get(&self, org_id: OrganizationId, user_id: UserId) -> RepoResultV2<Option<EmployeeRights>> {
        debug!("Getting rights of user {} at organization {}", user_id, org_id);

        Rights::user_right_at_org
            .filter(Rights::org_id.eq(org_id))
            .filter(Rights::user_id.eq(user_id))
            .get_result::<EmployeeRights>(self.db_conn)
            .optional()
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => org_id, user_id)
            })
    }

    fn upsert(&self, rights: EmployeeRights) -> RepoResultV2<EmployeeRights> {
        debug!("Setting employee rights: {:?}", rights);

        diesel::insert_into(Rights::user_right_at_org)
            .values(&rights)
            .on_conflict((Rights::org_id, Rights::user_id))
            .do_update()
            .set((
                Rights::org_account_management.eq(excluded(Rights::org_account_management)),
                Rights::money_management.eq(excluded(Rights::money_management)),
                Rights::project_management.eq(excluded(Rights::project_management)),
            ))
            .get_result::<EmployeeRights>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => rights)
            })
    }

    fn delete(&self, org_id: OrganizationId, user_id: UserId) -> RepoResultV2<Option<EmployeeRights>> {
        debug!("Revoking rights of user {} at organization {}", user_id, org_id);

        diesel::delete(
            Rights::user_right_at_org
                .filter(Rights::org_id.eq(org_id))
                .filter(Rights::user_id.eq(user_id)),
        )
        .get_result::<EmployeeRights>(self.db_conn)
        .optional()
        .map_err(|e| {
            let error_kind = ErrorKind::from(&e);
            ectx!(err e, ErrorSource::Diesel, error_kind => org_id, user_id)
        })
    }
}
