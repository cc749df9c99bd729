//! `Controller` is a top layer that handles all http-related
//! stuff like reading bodies, parsing params, forming a response.
//! Basically it provides inputs to `Service` layer and converts outputs
//! of `Service` layer to http responses

pub mod context;
pub mod error;
pub mod requests;
pub mod responses;
pub mod routes;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::{Error as FailureError, Fail};
use futures::future;
use futures::prelude::*;
use hyper::server::Request;
use hyper::{Delete, Get, Post, Put, StatusCode};
use r2d2::ManageConnection;
use validator::ValidationErrors;

use self::context::{DynamicContext, StaticContext};
pub use self::error::*;
use self::requests::*;
use self::responses::*;
use self::routes::Route;
use client::gateway::{GatewayClient, Notification};
use http::request_util::{parse_body, serialize_future, serialize_future_with_status};
use http::{Controller, ControllerFuture};
use models::*;
use repos::repo_factory::*;
use services::lifecycle::{LifecycleService, LifecycleServiceImpl};
use services::payments::{PaymentsService, PaymentsServiceImpl};
use services::permissions::{PermissionsService, PermissionsServiceImpl};
use services::transfers::{TransfersService, TransfersServiceImpl};
use services::withdrawals::{WithdrawalsService, WithdrawalsServiceImpl};
use services::types::ServiceFutureV2;
use services::{Error as ServiceError, ErrorKind as ServiceErrorKind};

/// Controller handles route parsing and calling `Service` layer
pub struct ControllerImpl<T, M, F, G>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    G: GatewayClient + Clone,
{
    pub static_context: StaticContext<T, M, F, G>,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        G: GatewayClient + Clone,
    > ControllerImpl<T, M, F, G>
{
    /// Create a new controller based on services
    pub fn new(static_context: StaticContext<T, M, F, G>) -> Self {
        Self { static_context }
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        G: GatewayClient + Clone,
    > Controller for ControllerImpl<T, M, F, G>
{
    /// Handle a request and get future response
    fn call(&self, req: Request) -> ControllerFuture {
        let ctx = self.static_context.clone();
        let dynamic_context = match DynamicContext::from_headers(req.headers(), &ctx.config.auth.jwt_secret) {
            Ok(dynamic_context) => dynamic_context,
            Err(e) => return Box::new(future::err(e.into())),
        };
        let user_id = dynamic_context.user_id;

        let transfers_service = TransfersServiceImpl::new(ctx.db_pool.clone(), ctx.cpu_pool.clone(), ctx.repo_factory.clone(), user_id);
        let payments_service = PaymentsServiceImpl::new(
            ctx.db_pool.clone(),
            ctx.cpu_pool.clone(),
            ctx.repo_factory.clone(),
            ctx.gateway_client.clone(),
            ctx.config.gateway.return_url.clone(),
            ctx.config.gateway.verify_webhooks,
            user_id,
        );
        let withdrawals_service = WithdrawalsServiceImpl::new(
            ctx.db_pool.clone(),
            ctx.cpu_pool.clone(),
            ctx.repo_factory.clone(),
            ctx.gateway_client.clone(),
            ctx.config.gateway.verify_webhooks,
            user_id,
        );
        let permissions_service = PermissionsServiceImpl::new(ctx.db_pool.clone(), ctx.cpu_pool.clone(), ctx.repo_factory.clone(), user_id);
        let lifecycle_service = LifecycleServiceImpl::new(ctx.db_pool.clone(), ctx.cpu_pool.clone(), ctx.repo_factory.clone(), user_id);
        let expired_page_size = ctx.config.scheduler.expired_page_size;

        let path = req.path().to_string();
        let query = req.query().map(|query| query.to_string());

        match (req.method().clone(), ctx.route_parser.test(req.path())) {
            (Get, Some(Route::Healthcheck)) => serialize_future(future::ok::<_, FailureError>("Ok")),

            (Post, Some(Route::Transfer)) => serialize_future_with_status(
                StatusCode::Created,
                parse_body::<TransferRequestBody>(req.body())
                    .and_then(|body| body.into_request().map_err(invalid_input))
                    .and_then(move |request| {
                        debug!("Received request to transfer {:?}", request);
                        from_service(transfers_service.transfer(request))
                    })
                    .map(|record| TransferResponse { ledger_id: record.id }),
            ),
            (Get, Some(Route::Balance { holder })) => {
                debug!("Received request to get balance of {}", holder);
                serialize_future(from_service(transfers_service.get_balance(holder)).map(BalanceResponse::from))
            }
            (Get, Some(Route::Transactions { holder })) => serialize_future(
                PageQuery::parse(query.as_ref().map(String::as_str))
                    .map_err(invalid_input)
                    .into_future()
                    .and_then(move |page| {
                        debug!("Received request to get history of {}, page {:?}", holder, page);
                        from_service(transfers_service.get_history(holder, page.offset, page.limit))
                    })
                    .map(|records| records.into_iter().map(LedgerRecordResponse::from).collect::<Vec<_>>()),
            ),

            (Get, Some(Route::ProjectInvestors { project_id })) => {
                debug!("Received request to get investors of project {}", project_id);
                serialize_future(
                    from_service(transfers_service.get_investors(project_id))
                        .map(|investors| investors.into_iter().map(InvestorResponse::from).collect::<Vec<_>>()),
                )
            }
            (Post, Some(Route::ProjectPayback { project_id })) => {
                debug!("Received request to start payback of project {}", project_id);
                serialize_future(from_service(lifecycle_service.start_payback(project_id)).map(ProjectResponse::from))
            }
            (Post, Some(Route::ProjectBan { project_id })) => {
                debug!("Received request to ban project {}", project_id);
                serialize_future(from_service(lifecycle_service.ban_project(project_id)).map(ProjectResponse::from))
            }

            (Post, Some(Route::PayInit)) => serialize_future(
                parse_body::<InitPaymentRequest>(req.body())
                    .and_then(move |body| body.into_input(user_id).map_err(invalid_input))
                    .and_then(move |input| {
                        debug!("Received request to init payment {:?}", input);
                        from_service(payments_service.init_payment(input))
                    })
                    .map(PaymentInitResponse::from),
            ),
            (Post, Some(Route::PayWebhook)) => serialize_future(
                parse_body::<Notification>(req.body())
                    .and_then(move |notification| {
                        debug!("Received payment notification {:?}", notification);
                        acknowledge(payments_service.handle_webhook(notification))
                    })
                    .map(|_| "Ok"),
            ),
            (Get, Some(Route::Payment { payment_id })) => {
                debug!("Received request to check payment {}", payment_id);
                serialize_future(from_service(payments_service.check_payment(payment_id)).map(PaymentResponse::from))
            }

            (Post, Some(Route::WithdrawInit)) => serialize_future(
                parse_body::<InitWithdrawalRequest>(req.body())
                    .and_then(move |body| body.into_input(user_id).map_err(invalid_input))
                    .and_then(move |input| {
                        debug!("Received request to init withdrawal {:?}", input);
                        from_service(withdrawals_service.init_withdrawal(input))
                    })
                    .map(WithdrawalInitResponse::from),
            ),
            (Post, Some(Route::WithdrawWebhook)) => serialize_future(
                parse_body::<Notification>(req.body())
                    .and_then(move |notification| {
                        debug!("Received payout notification {:?}", notification);
                        acknowledge(withdrawals_service.handle_webhook(notification))
                    })
                    .map(|_| "Ok"),
            ),
            (Get, Some(Route::Withdrawal { withdrawal_id })) => {
                debug!("Received request to check withdrawal {}", withdrawal_id);
                serialize_future(from_service(withdrawals_service.check_withdrawal(withdrawal_id)).map(WithdrawalResponse::from))
            }

            (Get, Some(Route::OrgRights {
                org_id,
                user_id: employee_id,
                capability,
            })) => {
                debug!("Received request to check {} of user {} at organization {}", capability, employee_id, org_id);
                serialize_future(from_service(permissions_service.check(org_id, employee_id, capability)).map(|allowed| RightsCheckResponse { allowed }))
            }
            (Put, Some(Route::OrgEmployee {
                org_id,
                user_id: employee_id,
            })) => serialize_future(parse_body::<RightsPayload>(req.body()).and_then(move |payload| {
                debug!("Received request to set rights {:?} of user {} at organization {}", payload, employee_id, org_id);
                from_service(permissions_service.set_rights(org_id, employee_id, payload))
            })),
            (Delete, Some(Route::OrgEmployee {
                org_id,
                user_id: employee_id,
            })) => {
                debug!("Received request to revoke rights of user {} at organization {}", employee_id, org_id);
                serialize_future(from_service(permissions_service.revoke_rights(org_id, employee_id)))
            }

            (Post, Some(Route::ExpiredProjectsJob)) => {
                debug!("Received request to close expired projects");
                serialize_future(from_service(lifecycle_service.close_expired_projects(expired_page_size)).map(|affected| JobResponse { affected }))
            }
            (Post, Some(Route::RecalculatePaybackJob)) => {
                debug!("Received request to recalculate payback");
                serialize_future(from_service(lifecycle_service.recalculate_payback()).map(|affected| JobResponse { affected }))
            }

            // Fallback
            (m, _) => {
                debug!("Request to non existing endpoint in treasury! {:?} {:?}", m, path);
                Box::new(future::err(Error::from(ErrorKind::NotFound).into()))
            }
        }
    }
}

fn from_service<T: 'static>(f: ServiceFutureV2<T>) -> Box<Future<Item = T, Error = FailureError>> {
    Box::new(f.map_err(|e| -> FailureError {
        let e: Error = ectx!(convert err e);
        e.into()
    }))
}

fn invalid_input(errors: ValidationErrors) -> FailureError {
    Error::from(ErrorKind::from(errors)).into()
}

/// The gateway resends a notification until it sees a 2xx, so only failures to persist
/// are reported back. Everything else is logged and acknowledged.
fn acknowledge(f: ServiceFutureV2<()>) -> Box<Future<Item = (), Error = FailureError>> {
    from_service(Box::new(f.or_else(|e: ServiceError| match e.kind() {
        ServiceErrorKind::Internal | ServiceErrorKind::Unavailable => Err(e),
        _ => {
            warn!("Ignoring gateway notification: {}", e);
            Ok(())
        }
    })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_cpupool::CpuPool;
    use hyper::header::{Authorization, Bearer};
    use hyper::server::{Response, Service};
    use hyper::Method;
    use r2d2;
    use serde_json::{self, Value};

    use super::context::tests::token;
    use super::*;
    use client::gateway::mock::GatewayClientMock;
    use config::tests::config;
    use http::Application;
    use repos::repo_factory::tests::*;

    type App = Application<Error>;

    fn app(state: SharedState) -> App {
        let manager = MockConnectionManager::new(state.clone());
        let db_pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        let context = StaticContext::new(
            db_pool,
            CpuPool::new(1),
            Arc::new(config()),
            ReposFactoryMock::new(state),
            GatewayClientMock::default(),
        );
        Application::new(ControllerImpl::new(context))
    }

    fn request(method: Method, path: &str, user_id: Option<i32>, body: Option<&str>) -> Request {
        let mut request = Request::new(method, path.parse().unwrap());
        if let Some(user_id) = user_id {
            request.headers_mut().set(Authorization(Bearer {
                token: token(user_id, &config().auth.jwt_secret),
            }));
        }
        if let Some(body) = body {
            request.set_body(body.to_string());
        }
        request
    }

    fn send(app: &App, request: Request) -> (StatusCode, Value) {
        let response: Response = app.call(request).wait().unwrap();
        let status = response.status();
        let body = response.body().concat2().wait().unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn state() -> SharedState {
        MockState::default()
            .with_user(1, 100000)
            .with_user(7, 0)
            .with_organization(10, 7, 0)
            .with_project(project(20, 10, 500000, MonetizationType::None, 0))
            .into_shared()
    }

    const INVEST: &str = r#"{"from_kind": "user", "from_id": 1, "to_kind": "project", "to_id": 20, "amount": "250.50", "kind": "user_to_project"}"#;

    #[test]
    fn transfer_is_created() {
        let state = state();
        let (status, body) = send(&app(state.clone()), request(Method::Post, "/transfer", Some(1), Some(INVEST)));

        assert_eq!(status, StatusCode::Created);
        assert!(body["ledger_id"].is_number());
        assert_eq!(state.lock().unwrap().user_balance(1), 100000 - 25050);
    }

    #[test]
    fn transfer_with_nested_holders_is_invalid_input() {
        let body = r#"{"kind": "user_to_project", "from": {"kind": "user", "id": 1}, "to": {"kind": "project", "id": 20}, "amount": "250.50"}"#;
        let (status, body) = send(&app(state()), request(Method::Post, "/transfer", Some(1), Some(body)));
        assert_eq!(status, StatusCode::BadRequest);
        assert_eq!(body["error_kind"], "invalid_input");
    }

    #[test]
    fn transfer_without_token_is_unauthorized() {
        let (status, body) = send(&app(state()), request(Method::Post, "/transfer", None, Some(INVEST)));
        assert_eq!(status, StatusCode::Unauthorized);
        assert_eq!(body["error_kind"], "unauthorized");
    }

    #[test]
    fn forged_token_is_unauthorized() {
        let mut request = request(Method::Get, "/balances/user/1", None, None);
        request.headers_mut().set(Authorization(Bearer {
            token: token(1, "not-the-secret"),
        }));
        let (status, _) = send(&app(state()), request);
        assert_eq!(status, StatusCode::Unauthorized);
    }

    #[test]
    fn overdraft_is_a_conflict() {
        let body = INVEST.replace("250.50", "5000");
        let (status, body) = send(&app(state()), request(Method::Post, "/transfer", Some(1), Some(&body)));
        assert_eq!(status, StatusCode::Conflict);
        assert_eq!(body["error_kind"], "insufficient_funds");
    }

    #[test]
    fn fractional_cents_are_invalid_input() {
        let body = INVEST.replace("250.50", "0.005");
        let (status, body) = send(&app(state()), request(Method::Post, "/transfer", Some(1), Some(&body)));
        assert_eq!(status, StatusCode::BadRequest);
        assert_eq!(body["error_kind"], "invalid_input");
        assert!(body["payload"]["amount"].is_array());
    }

    #[test]
    fn balance_is_reported_in_major_units() {
        let (status, body) = send(&app(state()), request(Method::Get, "/balances/user/1", Some(1), None));
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(body["balance"], "1000.00");
    }

    #[test]
    fn rights_check_answers_for_the_owner() {
        let (status, body) = send(&app(state()), request(Method::Get, "/orgs/10/rights/7/money_management", Some(7), None));
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(body["allowed"], true);
    }

    #[test]
    fn unknown_payment_notifications_are_acknowledged() {
        let notification = r#"{"type": "notification", "event": "payment.succeeded", "object": {"id": "unknown", "status": "succeeded"}}"#;
        let (status, _) = send(&app(state()), request(Method::Post, "/pay/webhook", None, Some(notification)));
        assert_eq!(status, StatusCode::Ok);
    }

    #[test]
    fn unknown_paths_are_not_found() {
        let (status, body) = send(&app(state()), request(Method::Get, "/wallets", Some(1), None));
        assert_eq!(status, StatusCode::NotFound);
        assert_eq!(body["error_kind"], "not_found");
    }

    #[test]
    fn healthcheck_needs_no_token() {
        let (status, body) = send(&app(state()), request(Method::Get, "/healthcheck", None, None));
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(body, "Ok");
    }
}
