use failure::{Backtrace, Context, Fail};
use std::fmt;

use http::client::ErrorKind as HttpClientErrorKind;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, PartialEq, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "users client error - user not found")]
    NotFound,
    #[fail(display = "users client error - service unavailable")]
    Unavailable,
    #[fail(display = "users client error - internal error")]
    Internal,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorSource {
    #[fail(display = "users client source - http client")]
    HttpClient,
}

derive_error_impls!();

impl From<HttpClientErrorKind> for ErrorKind {
    fn from(kind: HttpClientErrorKind) -> Self {
        match kind {
            HttpClientErrorKind::Status { status: 404, .. } => ErrorKind::NotFound,
            ref kind if kind.is_transient() => ErrorKind::Unavailable,
            _ => ErrorKind::Internal,
        }
    }
}
