use std::fmt;

use diesel::result::Error as DieselError;
use failure::{Backtrace, Context, Fail};
use validator::ValidationErrors;

use client::gateway::ErrorKind as GatewayClientErrorKind;
use client::notifications::ErrorKind as NotificationsClientErrorKind;
use client::users::ErrorKind as UsersClientErrorKind;
use repos::ErrorKind as RepoErrorKind;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "service error - invalid input, errors: {}", _0)]
    InvalidInput(ValidationErrors),
    #[fail(display = "service error - unauthorized")]
    Unauthorized,
    #[fail(display = "service error - forbidden")]
    Forbidden,
    #[fail(display = "service error - not found")]
    NotFound,
    #[fail(display = "service error - insufficient funds")]
    InsufficientFunds,
    #[fail(display = "service error - conflict")]
    Conflict,
    #[fail(display = "service error - unavailable")]
    Unavailable,
    #[fail(display = "service error - internal")]
    Internal,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorSource {
    #[fail(display = "service source - diesel")]
    Diesel,
    #[fail(display = "service source - r2d2")]
    R2d2,
}

derive_error_impls!();

impl ErrorKind {
    pub fn is_unavailable(&self) -> bool {
        match self {
            ErrorKind::Unavailable => true,
            _ => false,
        }
    }
}

impl From<ValidationErrors> for ErrorKind {
    fn from(errors: ValidationErrors) -> Self {
        ErrorKind::InvalidInput(errors)
    }
}

impl From<RepoErrorKind> for ErrorKind {
    fn from(kind: RepoErrorKind) -> Self {
        match kind {
            RepoErrorKind::Constraints(_) => ErrorKind::Conflict,
            RepoErrorKind::NotFound => ErrorKind::NotFound,
            RepoErrorKind::Unavailable => ErrorKind::Unavailable,
            RepoErrorKind::Internal => ErrorKind::Internal,
        }
    }
}

impl From<GatewayClientErrorKind> for ErrorKind {
    fn from(kind: GatewayClientErrorKind) -> Self {
        match kind {
            GatewayClientErrorKind::Unavailable => ErrorKind::Unavailable,
            GatewayClientErrorKind::NotFound => ErrorKind::NotFound,
            GatewayClientErrorKind::Rejected(message) => {
                let mut errors = ValidationErrors::new();
                let mut error = ::validator::ValidationError::new("rejected_by_gateway");
                error.add_param("message".into(), &message);
                errors.add("gateway", error);
                ErrorKind::InvalidInput(errors)
            }
            GatewayClientErrorKind::Unauthorized | GatewayClientErrorKind::Internal => ErrorKind::Internal,
        }
    }
}

impl From<UsersClientErrorKind> for ErrorKind {
    fn from(kind: UsersClientErrorKind) -> Self {
        match kind {
            UsersClientErrorKind::NotFound => ErrorKind::NotFound,
            UsersClientErrorKind::Unavailable => ErrorKind::Unavailable,
            UsersClientErrorKind::Internal => ErrorKind::Internal,
        }
    }
}

impl From<NotificationsClientErrorKind> for ErrorKind {
    fn from(kind: NotificationsClientErrorKind) -> Self {
        match kind {
            NotificationsClientErrorKind::Unavailable => ErrorKind::Unavailable,
            NotificationsClientErrorKind::Internal => ErrorKind::Internal,
        }
    }
}

/// Raised by `Connection::transaction` itself, when `BEGIN` / `COMMIT` fail.
impl From<DieselError> for Error {
    fn from(e: DieselError) -> Self {
        let kind: ErrorKind = RepoErrorKind::from(&e).into();
        ectx!(err e, ErrorSource::Diesel, kind)
    }
}
