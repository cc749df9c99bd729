use std::fmt;
use std::time::Duration;

use failure::{err_msg, Backtrace, Context, Fail};
use futures::future::{self, Either, Loop};
use futures::sync::{mpsc, oneshot};
use futures::{Future, IntoFuture, Sink, Stream};
use hyper;
use hyper::client::HttpConnector;
use hyper::header::{ContentLength, ContentType, Headers};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use serde::de::DeserializeOwned;
use serde_json;
use tokio_core::reactor::Handle;
use tokio_timer::Timeout;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, Debug, PartialEq, Fail)]
pub enum ErrorKind {
    #[fail(display = "http client error - request timed out")]
    Timeout,
    #[fail(display = "http client error - transport failure")]
    Transport,
    #[fail(display = "http client error - unexpected status {}: {}", status, body)]
    Status { status: u16, body: String },
    #[fail(display = "http client error - malformed response")]
    Parse,
    #[fail(display = "http client error - internal")]
    Internal,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorSource {
    #[fail(display = "http client source - hyper")]
    Hyper,
    #[fail(display = "http client source - hyper_tls")]
    HyperTls,
    #[fail(display = "http client source - serde_json")]
    SerdeJson,
    #[fail(display = "http client source - tokio_timer")]
    TokioTimer,
}

derive_error_impls!();

impl ErrorKind {
    /// The remote side may not have seen the request, or failed transiently.
    pub fn is_transient(&self) -> bool {
        match self {
            ErrorKind::Timeout | ErrorKind::Transport => true,
            ErrorKind::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub http_client_retries: usize,
    pub http_client_buffer_size: usize,
    pub dns_worker_thread_count: usize,
    pub timeout_duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ClientResponse {
    /// Deserializes a 2xx body. Other statuses become `ErrorKind::Status`.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, Error> {
        let ClientResponse { status, body } = self;
        if !status.is_success() {
            let e = format_err!("Request failed with status {}", status);
            return Err(ectx!(err e, ErrorKind::Status {
                status: status.as_u16(),
                body,
            }));
        }

        serde_json::from_str::<T>(&body).map_err(ectx!(ErrorSource::SerdeJson, ErrorKind::Parse => body))
    }
}

pub trait HttpClient: Send + Sync + 'static {
    fn request(
        &self,
        method: Method,
        url: String,
        body: Option<String>,
        headers: Option<Headers>,
    ) -> Box<Future<Item = ClientResponse, Error = Error> + Send>;

    fn request_json<T>(
        &self,
        method: Method,
        url: String,
        body: Option<String>,
        headers: Option<Headers>,
    ) -> Box<Future<Item = T, Error = Error> + Send>
    where
        Self: Sized,
        T: DeserializeOwned + Send + 'static,
    {
        Box::new(self.request(method, url, body, headers).and_then(ClientResponse::into_json))
    }
}

struct Payload {
    method: Method,
    url: String,
    body: Option<String>,
    headers: Option<Headers>,
    callback: oneshot::Sender<Result<ClientResponse, Error>>,
}

type HyperClient = hyper::Client<HttpsConnector<HttpConnector>>;

/// Outgoing http client bound to a reactor. Requests are queued by `ClientHandle`s
/// from any thread and executed by the stream returned from `Client::stream`.
pub struct Client {
    client: HyperClient,
    tx: mpsc::Sender<Payload>,
    rx: mpsc::Receiver<Payload>,
    max_retries: usize,
    buffer_size: usize,
    timeout: Duration,
}

impl Client {
    pub fn new(config: &Config, handle: &Handle) -> Result<Self, Error> {
        let connector = HttpsConnector::new(config.dns_worker_thread_count, handle)
            .map_err(ectx!(try ErrorSource::HyperTls, ErrorKind::Internal))?;
        let client = hyper::Client::configure().connector(connector).build(handle);
        let (tx, rx) = mpsc::channel::<Payload>(config.http_client_buffer_size);

        Ok(Self {
            client,
            tx,
            rx,
            max_retries: config.http_client_retries,
            buffer_size: config.http_client_buffer_size.max(1),
            timeout: Duration::from_millis(config.timeout_duration_ms),
        })
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle { tx: self.tx.clone() }
    }

    /// Must be spawned on the reactor the client was created with
    pub fn stream(self) -> Box<Stream<Item = (), Error = ()>> {
        let Client {
            client,
            rx,
            max_retries,
            buffer_size,
            timeout,
            ..
        } = self;

        Box::new(
            rx.map(move |payload| {
                let Payload {
                    method,
                    url,
                    body,
                    headers,
                    callback,
                } = payload;

                send_with_retries(client.clone(), method, url, body, headers, max_retries, timeout).then(move |result| {
                    if callback.send(result).is_err() {
                        debug!("Http client response dropped: the caller is gone");
                    }
                    Ok::<(), ()>(())
                })
            })
            .buffer_unordered(buffer_size),
        )
    }
}

fn send_with_retries(
    client: HyperClient,
    method: Method,
    url: String,
    body: Option<String>,
    headers: Option<Headers>,
    max_retries: usize,
    timeout: Duration,
) -> impl Future<Item = ClientResponse, Error = Error> {
    future::loop_fn(0usize, move |attempt| {
        send_once(&client, method.clone(), url.clone(), body.clone(), headers.clone(), timeout).then(move |result| match result {
            Err(ref e) if attempt < max_retries && e.kind().is_transient() => {
                warn!("Http request attempt {} failed, retrying: {}", attempt + 1, e);
                Ok(Loop::Continue(attempt + 1))
            }
            Err(e) => Err(e),
            Ok(response) => Ok(Loop::Break(response)),
        })
    })
}

fn send_once(
    client: &HyperClient,
    method: Method,
    url: String,
    body: Option<String>,
    headers: Option<Headers>,
    timeout: Duration,
) -> impl Future<Item = ClientResponse, Error = Error> {
    let uri = match url.parse::<Uri>() {
        Ok(uri) => uri,
        Err(e) => return Either::A(future::err(ectx!(err e, ErrorSource::Hyper, ErrorKind::Internal => url))),
    };

    let mut request = Request::new(method.clone(), uri);
    if let Some(headers) = headers {
        request.headers_mut().extend(headers.iter());
    }
    if let Some(body) = body {
        request.headers_mut().set(ContentType::json());
        request.headers_mut().set(ContentLength(body.len() as u64));
        request.set_body(body);
    }

    let response = client.request(request).and_then(|response| {
        let status = response.status();
        response.body().concat2().map(move |chunk| (status, chunk))
    });

    Either::B(Timeout::new(response, timeout).then(move |result| match result {
        Ok((status, chunk)) => Ok(ClientResponse {
            status,
            body: String::from_utf8_lossy(&chunk).into_owned(),
        }),
        Err(e) => {
            if e.is_elapsed() {
                let e = format_err!("{} {} timed out after {:?}", method, url, timeout);
                Err(ectx!(err e, ErrorSource::TokioTimer, ErrorKind::Timeout))
            } else if let Some(e) = e.into_inner() {
                Err(ectx!(err e, ErrorSource::Hyper, ErrorKind::Transport => method, url))
            } else {
                let e = err_msg("timer failure");
                Err(ectx!(err e, ErrorSource::TokioTimer, ErrorKind::Internal => method, url))
            }
        }
    }))
}

/// Cloneable, thread-safe handle queueing requests on a `Client`
#[derive(Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<Payload>,
}

impl HttpClient for ClientHandle {
    fn request(
        &self,
        method: Method,
        url: String,
        body: Option<String>,
        headers: Option<Headers>,
    ) -> Box<Future<Item = ClientResponse, Error = Error> + Send> {
        let (callback, response) = oneshot::channel();
        let payload = Payload {
            method,
            url,
            body,
            headers,
            callback,
        };

        Box::new(
            self.tx
                .clone()
                .send(payload)
                .map_err(|_| ectx!(err err_msg("http client is shut down"), ErrorKind::Internal))
                .and_then(|_| {
                    response
                        .map_err(|_| ectx!(err err_msg("http client dropped the request"), ErrorKind::Internal))
                        .and_then(IntoFuture::into_future)
                }),
        )
    }
}
