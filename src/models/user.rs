use chrono::NaiveDateTime;
use diesel::sql_types::Integer;

use models::Amount;
use schema::users;

#[derive(Debug, Serialize, Deserialize, FromSqlRow, AsExpression, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromStr, Display, From)]
#[sql_type = "Integer"]
pub struct UserId(i32);
newtype_from_to_sql!(Integer, UserId, UserId);

impl UserId {
    pub fn new(id: i32) -> Self {
        UserId(id)
    }

    pub fn inner(&self) -> i32 {
        self.0
    }
}

/// User wallet row. The balance is only written by the transfer engine.
#[derive(Debug, Clone, Serialize, Queryable)]
pub struct UserWallet {
    pub id: UserId,
    pub balance: Amount,
    pub is_banned: bool,
    pub is_admin: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "users"]
pub struct NewUserWallet {
    pub id: UserId,
    pub balance: Amount,
    pub is_banned: bool,
    pub is_admin: bool,
}
