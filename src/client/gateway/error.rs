use failure::{Backtrace, Context, Fail};
use std::fmt;

use http::client::ErrorKind as HttpClientErrorKind;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, PartialEq, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "gateway client error - gateway unavailable")]
    Unavailable,
    #[fail(display = "gateway client error - unauthorized")]
    Unauthorized,
    #[fail(display = "gateway client error - object not found")]
    NotFound,
    #[fail(display = "gateway client error - request rejected: {}", _0)]
    Rejected(String),
    #[fail(display = "gateway client error - internal error")]
    Internal,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorSource {
    #[fail(display = "gateway client source - bigdecimal")]
    BigDecimal,
    #[fail(display = "gateway client source - http client")]
    HttpClient,
    #[fail(display = "gateway client source - serde_json")]
    SerdeJson,
}

derive_error_impls!();

impl From<HttpClientErrorKind> for ErrorKind {
    fn from(kind: HttpClientErrorKind) -> Self {
        match kind {
            HttpClientErrorKind::Timeout | HttpClientErrorKind::Transport => ErrorKind::Unavailable,
            HttpClientErrorKind::Status { status, body } => match status {
                401 | 403 => ErrorKind::Unauthorized,
                404 => ErrorKind::NotFound,
                400...499 => ErrorKind::Rejected(body),
                _ => ErrorKind::Unavailable,
            },
            HttpClientErrorKind::Parse | HttpClientErrorKind::Internal => ErrorKind::Internal,
        }
    }
}
