use std::marker::PhantomData;
use std::sync::Arc;

use failure::{Context, Error as FailureError, Fail};
use futures::{future, Future};
use hyper;
use hyper::header::{ContentLength, ContentType};
use hyper::server::{Request, Response, Service};
use hyper::StatusCode;
use sentry::integrations::failure::capture_error;
use serde_json;

use super::errors::{Codeable, ErrorMessage, ParseError, PayloadCarrier};

pub type ControllerFuture = Box<Future<Item = Response, Error = FailureError>>;

/// Turns a parsed request into a response future
pub trait Controller {
    fn call(&self, request: Request) -> ControllerFuture;
}

/// Hyper service around a controller. Controller errors are rendered with the
/// first `E` found in their cause chain.
pub struct Application<E> {
    controller: Arc<Controller>,
    phantom: PhantomData<E>,
}

impl<E> Application<E> {
    pub fn new<C: Controller + 'static>(controller: C) -> Self {
        Self {
            controller: Arc::new(controller),
            phantom: PhantomData,
        }
    }
}

impl<E> Service for Application<E>
where
    E: Fail + Codeable + PayloadCarrier,
{
    type Request = Request;
    type Response = Response;
    type Error = hyper::Error;
    type Future = Box<Future<Item = Response, Error = hyper::Error>>;

    fn call(&self, request: Request) -> Self::Future {
        let method = request.method().clone();
        let path = request.path().to_string();
        debug!("Received request {} {}", method, path);

        Box::new(self.controller.call(request).then(move |result| match result {
            Ok(response) => future::ok(response),
            Err(err) => future::ok(render_error::<E>(&method, &path, &err)),
        }))
    }
}

pub fn json_response(status: StatusCode, body: String) -> Response {
    Response::new()
        .with_status(status)
        .with_header(ContentLength(body.len() as u64))
        .with_header(ContentType::json())
        .with_body(body)
}

fn find_error<E: Fail>(err: &FailureError) -> Option<&E> {
    err.iter_chain()
        .filter_map(|cause| {
            cause
                .downcast_ref::<Context<E>>()
                .map(Context::get_context)
                .or_else(|| cause.downcast_ref::<E>())
        })
        .next()
}

fn render_error<E>(method: &hyper::Method, path: &str, err: &FailureError) -> Response
where
    E: Fail + Codeable + PayloadCarrier,
{
    let (status, message) = match find_error::<E>(err) {
        Some(e) => (
            e.code(),
            ErrorMessage {
                error_kind: e.error_kind().to_string(),
                message: e.to_string(),
                payload: e.payload(),
            },
        ),
        None => match find_error::<ParseError>(err) {
            Some(e) => (
                StatusCode::BadRequest,
                ErrorMessage {
                    error_kind: "invalid_input".to_string(),
                    message: e.to_string(),
                    payload: None,
                },
            ),
            None => (
                StatusCode::InternalServerError,
                ErrorMessage {
                    error_kind: "internal".to_string(),
                    message: "Internal server error".to_string(),
                    payload: None,
                },
            ),
        },
    };

    if status.is_server_error() {
        error!("{} {} failed with {}: {}", method, path, status, pretty_chain(err));
        capture_error(err);
    } else {
        warn!("{} {} failed with {}: {}", method, path, status, pretty_chain(err));
    }

    let body = serde_json::to_string(&message).unwrap_or_else(|_| r#"{"error_kind":"internal","message":"Internal server error"}"#.to_string());
    json_response(status, body)
}

fn pretty_chain(err: &FailureError) -> String {
    err.iter_chain().map(|cause| cause.to_string()).collect::<Vec<_>>().join(" | ")
}
