mod error;
#[cfg(test)]
pub mod mock;

use std::sync::Arc;

use failure::Fail;
use futures::Future;
use hyper::Method;

use http::client::HttpClient;
use models::UserId;

pub use self::error::*;

/// Profile data owned by the user service
pub trait UsersClient: Send + Sync + 'static {
    fn get_email(&self, user_id: UserId) -> Box<Future<Item = String, Error = Error> + Send>;
}

impl<T: ?Sized + UsersClient> UsersClient for Arc<T> {
    fn get_email(&self, user_id: UserId) -> Box<Future<Item = String, Error = Error> + Send> {
        (*self.clone()).get_email(user_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct EmailResponse {
    email: String,
}

#[derive(Clone)]
pub struct UsersClientImpl<C: HttpClient + Clone> {
    client: C,
    url: String,
}

impl<C: HttpClient + Clone> UsersClientImpl<C> {
    pub fn new(client: C, url: String) -> Self {
        Self {
            client,
            url: url.trim_right_matches('/').to_string(),
        }
    }
}

impl<C: HttpClient + Clone> UsersClient for UsersClientImpl<C> {
    fn get_email(&self, user_id: UserId) -> Box<Future<Item = String, Error = Error> + Send> {
        let url = format!("{}/internal/user/{}/email", self.url, user_id);
        Box::new(
            self.client
                .request_json::<EmailResponse>(Method::Get, url.clone(), None, None)
                .map(|response| response.email)
                .map_err(move |e| {
                    let error_kind = ErrorKind::from(e.kind());
                    ectx!(err e, ErrorSource::HttpClient, error_kind => url)
                }),
        )
    }
}
