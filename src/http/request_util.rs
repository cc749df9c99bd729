use std::collections::HashMap;

use failure::{Error as FailureError, Fail};
use futures::{Future, IntoFuture, Stream};
use hyper::{Body, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json;

use super::controller::{json_response, ControllerFuture};
use super::errors::ParseError;

/// Reads the whole body and deserializes it from JSON
pub fn parse_body<T>(body: Body) -> Box<Future<Item = T, Error = FailureError>>
where
    T: DeserializeOwned + 'static,
{
    Box::new(
        body.concat2()
            .map_err(|e| FailureError::from(e.context(ParseError("failed to read request body".to_string()))))
            .and_then(|chunk| {
                serde_json::from_slice::<T>(&chunk).map_err(|e| {
                    let message = e.to_string();
                    FailureError::from(e.context(ParseError(message)))
                })
            }),
    )
}

/// Serializes the result of `f` as a `200 OK` JSON response
pub fn serialize_future<T, E, F>(f: F) -> ControllerFuture
where
    F: IntoFuture<Item = T, Error = E> + 'static,
    E: Into<FailureError> + 'static,
    T: Serialize + 'static,
{
    serialize_future_with_status(StatusCode::Ok, f)
}

pub fn serialize_future_with_status<T, E, F>(status: StatusCode, f: F) -> ControllerFuture
where
    F: IntoFuture<Item = T, Error = E> + 'static,
    E: Into<FailureError> + 'static,
    T: Serialize + 'static,
{
    Box::new(
        f.into_future()
            .map_err(Into::into)
            .and_then(|value| serde_json::to_string(&value).map_err(FailureError::from))
            .map(move |body| json_response(status, body)),
    )
}

/// Parses `a=1&b=2`. Values are taken verbatim, without percent-decoding.
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("").to_string();
            let value = parts.next().unwrap_or("").to_string();
            (key, value)
        })
        .collect()
}
