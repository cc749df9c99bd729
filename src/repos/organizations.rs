use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::{Connection, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use failure::Fail;

use models::{Amount, NewOrganization, Organization, OrganizationId};
use schema::organizations::dsl as Organizations;

use super::error::*;
use super::types::RepoResultV2;

pub trait OrganizationsRepo {
    fn create(&self, payload: NewOrganization) -> RepoResultV2<Organization>;

    fn get(&self, org_id: OrganizationId) -> RepoResultV2<Option<Organization>>;

    fn get_for_update(&self, org_id: OrganizationId) -> RepoResultV2<Option<Organization>>;

    fn set_balance(&self, org_id: OrganizationId, balance: Amount) -> RepoResultV2<Organization>;
}

pub struct OrganizationsRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> OrganizationsRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> OrganizationsRepo
    for OrganizationsRepoImpl<'a, T>
{
    fn create(&self, payload: NewOrganization) -> RepoResultV2<Organization> {
        debug!("Creating an organization using payload: {:?}", payload);

        diesel::insert_into(Organizations::organizations)
            .values(&payload)
            .get_result::<Organization>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => payload)
            })
    }

    fn get(&self, org_id: OrganizationId) -> RepoResultV2<Option<Organization>> {
        debug!("Getting an organization with ID: {}", org_id);

        Organizations::organizations
            .filter(Organizations::id.eq(org_id))
            .get_result::<Organization>(self.db_conn)
            .optional()
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => org_id)
            })
    }

    fn get_for_update(&self, org_id: OrganizationId) -> RepoResultV2<Option<Organization>> {
        debug!("Locking an organization with ID: {}", org_id);

        Organizations::organizations
            .filter(Organizations::id.eq(org_id))
            .for_update()
            .get_result::<Organization>(self.db_conn)
            .optional()
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => org_id)
            })
    }

    fn set_balance(&self, org_id: OrganizationId, balance: Amount) -> RepoResultV2<Organization> {
        debug!("Setting balance of organization {} to {}", org_id, balance);

        diesel::update(Organizations::organizations.filter(Organizations::id.eq(org_id)))
            .set(Organizations::balance.eq(balance))
            .get_result::<Organization>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => org_id, balance)
            })
    }
}
