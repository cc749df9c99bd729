use failure::{Backtrace, Context, Fail};
use std::fmt;

use repos::error::ErrorKind as RepoErrorKind;
use services::ErrorKind as ServiceErrorKind;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Debug, Clone, Fail, PartialEq)]
pub enum ErrorKind {
    #[fail(display = "event handler error - unavailable")]
    Unavailable,
    #[fail(display = "event handler error - internal")]
    Internal,
}

#[derive(Debug, Clone, Fail, PartialEq, Eq)]
pub enum ErrorSource {
    #[fail(display = "event handler source - r2d2")]
    R2d2,
}

derive_error_impls!();

impl From<RepoErrorKind> for ErrorKind {
    fn from(e: RepoErrorKind) -> Self {
        match e {
            RepoErrorKind::Unavailable => ErrorKind::Unavailable,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<ServiceErrorKind> for ErrorKind {
    fn from(e: ServiceErrorKind) -> Self {
        match e {
            ServiceErrorKind::Unavailable => ErrorKind::Unavailable,
            _ => ErrorKind::Internal,
        }
    }
}
