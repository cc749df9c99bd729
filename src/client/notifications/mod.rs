mod error;
#[cfg(test)]
pub mod mock;

use std::sync::Arc;

use failure::Fail;
use futures::{Future, IntoFuture};
use hyper::Method;
use serde_json;

use http::client::HttpClient;

pub use self::error::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// An investor received money from a project
    Dividends,
    ProjectClosed,
}

/// Body of `POST /send`. The amount is in major units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailNotification {
    pub email: String,
    #[serde(rename = "type")]
    pub type_: NotificationType,
    pub project_name: String,
    pub amount: f64,
}

/// Email delivery, best-effort
pub trait NotificationsClient: Send + Sync + 'static {
    fn send(&self, notification: EmailNotification) -> Box<Future<Item = (), Error = Error> + Send>;
}

impl<T: ?Sized + NotificationsClient> NotificationsClient for Arc<T> {
    fn send(&self, notification: EmailNotification) -> Box<Future<Item = (), Error = Error> + Send> {
        (*self.clone()).send(notification)
    }
}

#[derive(Clone)]
pub struct NotificationsClientImpl<C: HttpClient + Clone> {
    client: C,
    url: String,
}

impl<C: HttpClient + Clone> NotificationsClientImpl<C> {
    pub fn new(client: C, url: String) -> Self {
        Self {
            client,
            url: url.trim_right_matches('/').to_string(),
        }
    }
}

impl<C: HttpClient + Clone> NotificationsClient for NotificationsClientImpl<C> {
    fn send(&self, notification: EmailNotification) -> Box<Future<Item = (), Error = Error> + Send> {
        let client = self.client.clone();
        let url = format!("{}/send", self.url);

        Box::new(
            serde_json::to_string(&notification)
                .map_err(ectx!(ErrorSource::SerdeJson, ErrorKind::Internal => notification))
                .into_future()
                .and_then(move |body| {
                    client
                        .request(Method::Post, url.clone(), Some(body), None)
                        .and_then(|response| {
                            // the body of a successful answer is not relied on
                            if response.status.is_success() {
                                Ok(())
                            } else {
                                response.into_json::<serde_json::Value>().map(|_| ())
                            }
                        })
                        .map_err(move |e| {
                            let error_kind = ErrorKind::from(e.kind());
                            ectx!(err e, ErrorSource::HttpClient, error_kind => url)
                        })
                }),
        )
    }
}
