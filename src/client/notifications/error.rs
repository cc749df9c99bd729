use failure::{Backtrace, Context, Fail};
use std::fmt;

use http::client::ErrorKind as HttpClientErrorKind;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, PartialEq, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "notifications client error - service unavailable")]
    Unavailable,
    #[fail(display = "notifications client error - internal error")]
    Internal,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorSource {
    #[fail(display = "notifications client source - http client")]
    HttpClient,
    #[fail(display = "notifications client source - serde_json")]
    SerdeJson,
}

derive_error_impls!();

impl From<HttpClientErrorKind> for ErrorKind {
    fn from(kind: HttpClientErrorKind) -> Self {
        if kind.is_transient() {
            ErrorKind::Unavailable
        } else {
            ErrorKind::Internal
        }
    }
}
