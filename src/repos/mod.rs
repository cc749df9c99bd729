//! Repos is a module responsible for interacting with postgres db

pub mod error;
pub mod event_store;
pub mod organizations;
pub mod paybacks;
pub mod payments;
pub mod projects;
pub mod repo_factory;
pub mod rights;
pub mod transactions;
pub mod types;
pub mod users;
pub mod withdrawals;

pub use self::error::*;
pub use self::event_store::*;
pub use self::organizations::*;
pub use self::paybacks::*;
pub use self::payments::*;
pub use self::projects::*;
pub use self::repo_factory::*;
pub use self::rights::*;
pub use self::transactions::*;
pub use self::types::*;
pub use self::users::*;
pub use self::withdrawals::*;
