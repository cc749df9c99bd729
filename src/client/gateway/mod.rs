mod error;
#[cfg(test)]
pub mod mock;
mod types;

use std::fmt::Debug;
use std::sync::Arc;

use base64;
use failure::Fail;
use futures::{Future, IntoFuture};
use hyper::header::Headers;
use hyper::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json;

use config;
use http::client::HttpClient;

pub use self::error::*;
pub use self::types::*;

/// Payment gateway (YooKassa API v3): payments collect money from a card into the
/// platform, payouts send money out to a payout token.
pub trait GatewayClient: Send + Sync + 'static {
    fn create_payment(&self, input: NewPayment) -> Box<Future<Item = GatewayPayment, Error = Error> + Send>;

    fn get_payment(&self, external_id: String) -> Box<Future<Item = GatewayPayment, Error = Error> + Send>;

    fn create_payout(&self, input: NewPayout) -> Box<Future<Item = GatewayPayout, Error = Error> + Send>;

    fn get_payout(&self, external_id: String) -> Box<Future<Item = GatewayPayout, Error = Error> + Send>;
}

impl<T: ?Sized + GatewayClient> GatewayClient for Arc<T> {
    fn create_payment(&self, input: NewPayment) -> Box<Future<Item = GatewayPayment, Error = Error> + Send> {
        (*self.clone()).create_payment(input)
    }

    fn get_payment(&self, external_id: String) -> Box<Future<Item = GatewayPayment, Error = Error> + Send> {
        (*self.clone()).get_payment(external_id)
    }

    fn create_payout(&self, input: NewPayout) -> Box<Future<Item = GatewayPayout, Error = Error> + Send> {
        (*self.clone()).create_payout(input)
    }

    fn get_payout(&self, external_id: String) -> Box<Future<Item = GatewayPayout, Error = Error> + Send> {
        (*self.clone()).get_payout(external_id)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub shop_id: String,
    pub secret_key: String,
    pub agent_id: String,
    pub payout_api_key: String,
}

impl From<config::Gateway> for Config {
    fn from(config: config::Gateway) -> Self {
        let config::Gateway {
            url,
            shop_id,
            secret_key,
            agent_id,
            payout_api_key,
            ..
        } = config;
        Config {
            url,
            shop_id,
            secret_key,
            agent_id,
            payout_api_key,
        }
    }
}

#[derive(Clone)]
pub struct GatewayClientImpl<C: HttpClient + Clone> {
    client: C,
    url: String,
    payments_auth: String,
    payouts_auth: String,
}

fn basic_auth(login: &str, password: &str) -> String {
    format!("Basic {}", base64::encode(&format!("{}:{}", login, password)))
}

impl<C: HttpClient + Clone + Send> GatewayClientImpl<C> {
    pub fn create_from_config(client: C, config: Config) -> Self {
        let Config {
            url,
            shop_id,
            secret_key,
            agent_id,
            payout_api_key,
        } = config;

        Self {
            client,
            url: url.trim_right_matches('/').to_string(),
            payments_auth: basic_auth(&shop_id, &secret_key),
            payouts_auth: basic_auth(&agent_id, &payout_api_key),
        }
    }

    fn request_with_auth<Req, Res>(
        &self,
        method: Method,
        query: String,
        authorization: String,
        idempotence_key: Option<String>,
        body: Option<Req>,
    ) -> impl Future<Item = Res, Error = Error> + Send
    where
        Req: Debug + Serialize + Send + 'static,
        Res: DeserializeOwned + Send + 'static,
    {
        let client = self.client.clone();
        let url = format!("{}{}", self.url, query);

        body.map(|body| serde_json::to_string(&body).map_err(ectx!(ErrorSource::SerdeJson, ErrorKind::Internal => body)))
            .map_or(Ok(None), |serialized| serialized.map(Some))
            .into_future()
            .and_then(move |body| {
                let mut headers = Headers::new();
                headers.set_raw("Authorization", authorization);
                if let Some(idempotence_key) = idempotence_key {
                    headers.set_raw("Idempotence-Key", idempotence_key);
                }

                client
                    .request_json::<Res>(method.clone(), url.clone(), body.clone(), Some(headers))
                    .map_err(move |e| {
                        let error_kind = ErrorKind::from(e.kind());
                        ectx!(err e, ErrorSource::HttpClient, error_kind => method, url, body)
                    })
            })
    }
}

impl<C: HttpClient + Clone> GatewayClient for GatewayClientImpl<C> {
    fn create_payment(&self, input: NewPayment) -> Box<Future<Item = GatewayPayment, Error = Error> + Send> {
        let NewPayment {
            idempotence_key,
            amount,
            description,
            return_url,
            metadata,
        } = input;

        let body = CreatePaymentRequest {
            amount: GatewayAmount::from_amount(amount),
            capture: true,
            confirmation: ConfirmationRequest {
                type_: "redirect".to_string(),
                return_url,
            },
            description,
            metadata,
        };

        Box::new(self.request_with_auth(
            Method::Post,
            "/payments".to_string(),
            self.payments_auth.clone(),
            Some(idempotence_key),
            Some(body),
        ))
    }

    fn get_payment(&self, external_id: String) -> Box<Future<Item = GatewayPayment, Error = Error> + Send> {
        Box::new(self.request_with_auth::<(), _>(
            Method::Get,
            format!("/payments/{}", external_id),
            self.payments_auth.clone(),
            None,
            None,
        ))
    }

    fn create_payout(&self, input: NewPayout) -> Box<Future<Item = GatewayPayout, Error = Error> + Send> {
        let NewPayout {
            idempotence_key,
            amount,
            description,
            destination,
            metadata,
        } = input;

        let body = CreatePayoutRequest {
            amount: GatewayAmount::from_amount(amount),
            description,
            payout_token: destination,
            metadata,
        };

        Box::new(self.request_with_auth(
            Method::Post,
            "/payouts".to_string(),
            self.payouts_auth.clone(),
            Some(idempotence_key),
            Some(body),
        ))
    }

    fn get_payout(&self, external_id: String) -> Box<Future<Item = GatewayPayout, Error = Error> + Send> {
        Box::new(self.request_with_auth::<(), _>(
            Method::Get,
            format!("/payouts/{}", external_id),
            self.payouts_auth.clone(),
            None,
            None,
        ))
    }
}
