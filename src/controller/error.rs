use std::fmt;

use failure::{Backtrace, Context, Fail};
use hyper::StatusCode;
use serde_json;
use validator::ValidationErrors;

use http::{Codeable, PayloadCarrier};
use services::ErrorKind as ServiceErrorKind;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "controller error - unauthorized")]
    Unauthorized,
    #[fail(display = "controller error - invalid input, errors: {}", _0)]
    InvalidInput(ValidationErrors),
    #[fail(display = "controller error - forbidden")]
    Forbidden,
    #[fail(display = "controller error - not found")]
    NotFound,
    #[fail(display = "controller error - insufficient funds")]
    InsufficientFunds,
    #[fail(display = "controller error - conflict")]
    Conflict,
    #[fail(display = "controller error - unavailable")]
    Unavailable,
    #[fail(display = "controller error - internal error")]
    Internal,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorSource {
    #[fail(display = "controller source - jsonwebtoken")]
    JsonWebToken,
}

derive_error_impls!();

impl From<ServiceErrorKind> for ErrorKind {
    fn from(kind: ServiceErrorKind) -> Self {
        match kind {
            ServiceErrorKind::InvalidInput(errors) => ErrorKind::InvalidInput(errors),
            ServiceErrorKind::Unauthorized => ErrorKind::Unauthorized,
            ServiceErrorKind::Forbidden => ErrorKind::Forbidden,
            ServiceErrorKind::NotFound => ErrorKind::NotFound,
            ServiceErrorKind::InsufficientFunds => ErrorKind::InsufficientFunds,
            ServiceErrorKind::Conflict => ErrorKind::Conflict,
            ServiceErrorKind::Unavailable => ErrorKind::Unavailable,
            ServiceErrorKind::Internal => ErrorKind::Internal,
        }
    }
}

impl From<ValidationErrors> for ErrorKind {
    fn from(errors: ValidationErrors) -> Self {
        ErrorKind::InvalidInput(errors)
    }
}

impl Codeable for Error {
    fn code(&self) -> StatusCode {
        match self.inner.get_context() {
            ErrorKind::Unauthorized => StatusCode::Unauthorized,
            ErrorKind::InvalidInput(_) => StatusCode::BadRequest,
            ErrorKind::Forbidden => StatusCode::Forbidden,
            ErrorKind::NotFound => StatusCode::NotFound,
            ErrorKind::InsufficientFunds | ErrorKind::Conflict => StatusCode::Conflict,
            ErrorKind::Unavailable => StatusCode::ServiceUnavailable,
            ErrorKind::Internal => StatusCode::InternalServerError,
        }
    }

    fn error_kind(&self) -> &'static str {
        match self.inner.get_context() {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidInput(_) => "invalid_input",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

impl PayloadCarrier for Error {
    fn payload(&self) -> Option<serde_json::Value> {
        match self.inner.get_context() {
            ErrorKind::InvalidInput(errors) => serde_json::to_value(errors).ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::ValidationError;

    #[test]
    fn service_kinds_map_to_statuses() {
        let cases = vec![
            (ServiceErrorKind::Unauthorized, StatusCode::Unauthorized, "unauthorized"),
            (ServiceErrorKind::Forbidden, StatusCode::Forbidden, "forbidden"),
            (ServiceErrorKind::NotFound, StatusCode::NotFound, "not_found"),
            (ServiceErrorKind::InsufficientFunds, StatusCode::Conflict, "insufficient_funds"),
            (ServiceErrorKind::Conflict, StatusCode::Conflict, "conflict"),
            (ServiceErrorKind::Unavailable, StatusCode::ServiceUnavailable, "unavailable"),
            (ServiceErrorKind::Internal, StatusCode::InternalServerError, "internal"),
        ];

        for (service_kind, status, name) in cases {
            let error = Error::from(ErrorKind::from(service_kind));
            assert_eq!(error.code(), status);
            assert_eq!(error.error_kind(), name);
            assert!(error.payload().is_none());
        }
    }

    #[test]
    fn invalid_input_carries_the_validation_errors() {
        let mut errors = ValidationErrors::new();
        errors.add("amount", ValidationError::new("too_precise"));
        let error = Error::from(ErrorKind::from(ServiceErrorKind::InvalidInput(errors)));

        assert_eq!(error.code(), StatusCode::BadRequest);
        assert_eq!(error.error_kind(), "invalid_input");
        let payload = error.payload().unwrap();
        assert!(payload.to_string().contains("too_precise"));
    }
}
