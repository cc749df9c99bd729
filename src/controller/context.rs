//! `Context` is a top level module contains static context and dynamic context for each request
use std::sync::Arc;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Fail;
use futures_cpupool::CpuPool;
use hyper::header::{Authorization, Bearer, Headers};
use jsonwebtoken::{decode, Algorithm, Validation};
use r2d2::{ManageConnection, Pool};

use super::error::*;
use super::routes::*;
use client::gateway::GatewayClient;
use config::Config;
use http::RouteParser;
use models::{JwtClaims, UserId};
use repos::repo_factory::*;

/// Static context for all app
pub struct StaticContext<T, M, F, G>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    G: GatewayClient + Clone,
{
    pub db_pool: Pool<M>,
    pub cpu_pool: CpuPool,
    pub config: Arc<Config>,
    pub route_parser: Arc<RouteParser<Route>>,
    pub repo_factory: F,
    pub gateway_client: G,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        G: GatewayClient + Clone,
    > StaticContext<T, M, F, G>
{
    /// Create a new static context
    pub fn new(db_pool: Pool<M>, cpu_pool: CpuPool, config: Arc<Config>, repo_factory: F, gateway_client: G) -> Self {
        let route_parser = Arc::new(create_route_parser());
        Self {
            route_parser,
            db_pool,
            cpu_pool,
            config,
            repo_factory,
            gateway_client,
        }
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        G: GatewayClient + Clone,
    > Clone for StaticContext<T, M, F, G>
{
    fn clone(&self) -> Self {
        Self {
            cpu_pool: self.cpu_pool.clone(),
            db_pool: self.db_pool.clone(),
            route_parser: self.route_parser.clone(),
            config: self.config.clone(),
            repo_factory: self.repo_factory.clone(),
            gateway_client: self.gateway_client.clone(),
        }
    }
}

/// Dynamic context for each request
#[derive(Debug, Clone)]
pub struct DynamicContext {
    pub user_id: Option<UserId>,
}

impl DynamicContext {
    /// A request without `Authorization` is anonymous. A token that is present but
    /// invalid or expired is rejected.
    pub fn from_headers(headers: &Headers, jwt_secret: &str) -> Result<Self, Error> {
        let token = match headers.get::<Authorization<Bearer>>() {
            Some(auth) => auth.0.token.clone(),
            None => return Ok(Self { user_id: None }),
        };

        let validation = Validation::new(Algorithm::HS256);
        let claims = decode::<JwtClaims>(&token, jwt_secret.as_bytes(), &validation)
            .map_err(ectx!(try ErrorSource::JsonWebToken, ErrorKind::Unauthorized))?
            .claims;

        Ok(Self {
            user_id: Some(claims.user_id),
        })
    }
}

#[cfg(test)]
pub mod tests {
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, Header};

    use super::*;

    pub fn token(user_id: i32, secret: &str) -> String {
        let claims = JwtClaims {
            user_id: UserId::new(user_id),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        encode(&Header::default(), &claims, secret.as_bytes()).unwrap()
    }

    fn bearer(token: String) -> Headers {
        let mut headers = Headers::new();
        headers.set(Authorization(Bearer { token }));
        headers
    }

    #[test]
    fn valid_token_names_the_user() {
        let context = DynamicContext::from_headers(&bearer(token(7, "secret")), "secret").unwrap();
        assert_eq!(context.user_id, Some(UserId::new(7)));
    }

    #[test]
    fn missing_token_is_anonymous() {
        let context = DynamicContext::from_headers(&Headers::new(), "secret").unwrap();
        assert_eq!(context.user_id, None);
    }

    #[test]
    fn foreign_or_expired_tokens_are_unauthorized() {
        let err = DynamicContext::from_headers(&bearer(token(7, "other")), "secret").unwrap_err();
        match err.kind() {
            ErrorKind::Unauthorized => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }

        let expired = JwtClaims {
            user_id: UserId::new(7),
            exp: (Utc::now() - Duration::hours(1)).timestamp(),
        };
        let token = encode(&Header::default(), &expired, "secret".as_bytes()).unwrap();
        assert!(DynamicContext::from_headers(&bearer(token), "secret").is_err());
    }
}
