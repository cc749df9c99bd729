//! Services is a core layer for the app business logic like
//! validation, authorization, money movement, etc.

pub mod balances;
pub mod error;
pub mod lifecycle;
pub mod payments;
pub mod permissions;
pub mod transfers;
pub mod types;
pub mod withdrawals;

pub use self::error::*;
