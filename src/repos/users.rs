use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::{Connection, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use failure::Fail;

use models::{Amount, NewUserWallet, UserId, UserWallet};
use schema::users::dsl as Users;

use super::error::*;
use super::types::RepoResultV2;

pub trait UsersRepo {
    fn create(&self, payload: NewUserWallet) -> RepoResultV2<UserWallet>;

    fn get(&self, user_id: UserId) -> RepoResultV2<Option<UserWallet>>;

    /// Same as `get`, holding a row lock until the surrounding transaction ends.
    fn get_for_update(&self, user_id: UserId) -> RepoResultV2<Option<UserWallet>>;

    fn set_balance(&self, user_id: UserId, balance: Amount) -> RepoResultV2<UserWallet>;
}

pub struct UsersRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> UsersRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> UsersRepo for UsersRepoImpl<'a, T> {
    fn create(&self, payload: NewUserWallet) -> RepoResultV2<UserWallet> {
        debug!("Creating a user wallet using payload: {:?}", payload);

        diesel::insert_into(Users::users)
            .values(&payload)
            .get_result::<UserWallet>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => payload)
            })
    }

    fn get(&self, user_id: UserId) -> RepoResultV2<Option<UserWallet>> {
        debug!("Getting a user wallet with ID: {}", user_id);

        Users::users
            .filter(Users::id.eq(user_id))
            .get_result::<UserWallet>(self.db_conn)
            .optional()
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => user_id)
            })
    }

    fn get_for_update(&self, user_id: UserId) -> RepoResultV2<Option<UserWallet>> {
        debug!("Locking a user wallet with ID: {}", user_id);

        Users::users
            .filter(Users::id.eq(user_id))
            .for_update()
            .get_result::<UserWallet>(self.db_conn)
            .optional()
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => user_id)
            })
    }

    fn set_balance(&self, user_id: UserId, balance: Amount) -> RepoResultV2<UserWallet> {
        debug!("Setting balance of user {} to {}", user_id, balance);

        diesel::update(Users::users.filter(Users::id.eq(user_id)))
            .set(Users::balance.eq(balance))
            .get_result::<UserWallet>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => user_id, balance)
            })
    }
}
