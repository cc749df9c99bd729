//! Models contains all structures that are used in different
//! modules of the app

pub mod amount;
pub mod auth;
pub mod event;
pub mod event_store;
pub mod holder;
pub mod organization;
pub mod payback;
pub mod payment;
pub mod percent;
pub mod project;
pub mod rights;
pub mod transaction;
pub mod transfer_kind;
pub mod user;
pub mod withdrawal;

pub use self::amount::*;
pub use self::auth::*;
pub use self::event::*;
pub use self::event_store::*;
pub use self::holder::*;
pub use self::organization::*;
pub use self::payback::*;
pub use self::payment::*;
pub use self::percent::*;
pub use self::project::*;
pub use self::rights::*;
pub use self::transaction::*;
pub use self::transfer_kind::*;
pub use self::user::*;
pub use self::withdrawal::*;
