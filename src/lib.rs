//! Treasury is a microservice that keeps the money ledger of the crowdfunding platform:
//! user, organization and project balances, investments and paybacks, deposits and
//! withdrawals through the payment gateway.
//! The layered structure of the app is
//!
//! `Application -> Controller -> Service -> Repo + HttpClient`
//!
//! Each layer can only face exceptions in its base layers and can only expose its own errors.
//! E.g. `Service` layer will only deal with `Repo` and `HttpClient` errors and will only return
//! `ServiceError`. That way Controller will only have to deal with ServiceError, but not with `Repo`
//! or `HttpClient` repo.
//!
//! Background jobs (project expiry, payback accrual, gateway sweep, outbox) run on a
//! separate thread, see `scheduler`.

extern crate base64;
extern crate bigdecimal;
extern crate chrono;
extern crate config as config_crate;
#[macro_use]
extern crate derive_more;
#[macro_use]
extern crate diesel;
extern crate enum_iterator;
#[macro_use]
extern crate failure;
extern crate futures;
extern crate futures_cpupool;
extern crate hyper;
extern crate hyper_tls;
extern crate jsonwebtoken;
#[macro_use]
extern crate log;
extern crate r2d2;
extern crate r2d2_diesel;
extern crate regex;
extern crate sentry;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;
extern crate tokio_core;
extern crate tokio_signal;
extern crate tokio_timer;
extern crate uuid;
extern crate validator;

#[macro_use]
pub mod macros;
pub mod client;
pub mod config;
pub mod controller;
pub mod event_handling;
pub mod http;
pub mod models;
pub mod repos;
pub mod scheduler;
pub mod schema;
pub mod sentry_integration;
pub mod services;

use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use diesel::pg::PgConnection;
use failure::{Error as FailureError, Fail};
use futures::future;
use futures::sync::oneshot;
use futures::{Future, Stream};
use futures_cpupool::CpuPool;
use hyper::server::Http;
use r2d2_diesel::ConnectionManager;
use tokio_core::reactor::Core;
use tokio_signal::unix::{Signal, SIGTERM};

use client::gateway::GatewayClientImpl;
use client::notifications::NotificationsClientImpl;
use client::users::UsersClientImpl;
use config::Config;
use controller::context::StaticContext;
use event_handling::EventHandler;
use http::Application;
use repos::repo_factory::ReposFactoryImpl;
use scheduler::{DailyAt, Scheduler, SchedulerSettings};
use services::lifecycle::LifecycleServiceImpl;
use services::payments::PaymentsServiceImpl;
use services::withdrawals::WithdrawalsServiceImpl;

/// Starts new web service and the scheduler from provided `Config`.
/// Returns after SIGINT or SIGTERM once the scheduler has drained. Errors are
/// startup failures.
pub fn start_server(config: Config) -> Result<(), FailureError> {
    // Prepare reactor
    let mut core = Core::new().map_err(|e| e.context("Unexpected error creating event loop core"))?;
    let handle = Arc::new(core.handle());

    let client = http::Client::new(&config.client, &handle)?;
    let client_handle = client.handle();
    let client_stream = client.stream();
    handle.spawn(client_stream.for_each(|_| Ok(())));

    // Prepare server
    let thread_count = config.server.thread_count;
    let address: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e: AddrParseError| e.context(format!("Could not parse address {}:{}", config.server.host, config.server.port)))?;

    // Prepare database pool
    let manager = ConnectionManager::<PgConnection>::new(config.server.database.clone());
    let db_pool = r2d2::Pool::builder()
        .build(manager)
        .map_err(|e| e.context("Failed to create connection pool"))?;

    // Prepare CPU pool
    let cpu_pool = CpuPool::new(thread_count);

    let repo_factory = ReposFactoryImpl::new(config.event_store.max_processing_attempts, config.event_store.stuck_threshold_sec);

    let gateway_client = GatewayClientImpl::create_from_config(client_handle.clone(), config.gateway.clone().into());
    let users_client = UsersClientImpl::new(client_handle.clone(), config.services.users_url.clone());
    let notifications_client = NotificationsClientImpl::new(client_handle.clone(), config.services.notifications_url.clone());

    // Prepare scheduler
    let daily_at: DailyAt = config.scheduler.daily_at.parse()?;
    let settings = SchedulerSettings {
        daily_at,
        sweep_interval: Duration::from_secs(config.scheduler.sweep_interval_s),
        sweep_batch_size: config.scheduler.sweep_batch_size,
        expired_page_size: config.scheduler.expired_page_size,
        events_interval: Duration::from_millis(config.scheduler.events_interval_ms),
    };
    let scheduler = Scheduler::new(
        LifecycleServiceImpl::system(db_pool.clone(), cpu_pool.clone(), repo_factory.clone()),
        PaymentsServiceImpl::new(
            db_pool.clone(),
            cpu_pool.clone(),
            repo_factory.clone(),
            gateway_client.clone(),
            config.gateway.return_url.clone(),
            config.gateway.verify_webhooks,
            None,
        ),
        WithdrawalsServiceImpl::new(
            db_pool.clone(),
            cpu_pool.clone(),
            repo_factory.clone(),
            gateway_client.clone(),
            config.gateway.verify_webhooks,
            None,
        ),
        EventHandler {
            cpu_pool: cpu_pool.clone(),
            db_pool: db_pool.clone(),
            repo_factory: repo_factory.clone(),
            users_client,
            notifications_client,
            batch_size: config.event_store.batch_size,
        },
        settings,
    );

    let context = StaticContext::new(db_pool, cpu_pool, Arc::new(config), repo_factory, gateway_client);

    let serve = Http::new()
        .serve_addr_handle(&address, &handle, move || {
            let controller = controller::ControllerImpl::new(context.clone());

            // Prepare application
            let app = Application::<controller::Error>::new(controller);

            Ok(app)
        })
        .map_err(|e| e.context(format!("Http Server Initialization Error on {}", address)))?;

    let handle_arc2 = handle.clone();
    handle.spawn(
        serve
            .for_each(move |conn| {
                handle_arc2.spawn(conn.map(|_| ()).map_err(|why| error!("Server Error: {:?}", why)));
                Ok(())
            })
            .map_err(|_| ()),
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let scheduler_finished = scheduler.spawn(shutdown_rx)?;

    info!("Listening on http://{}, threads: {}", address, thread_count);

    // The reactor keeps serving outgoing requests of the scheduler while it drains.
    let shutdown = shutdown_signal().then(move |signal| {
        match signal {
            Ok(name) => info!("Received {}, shutting down", name),
            Err(e) => error!("Signal handling failed, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(());
        scheduler_finished.then(|_| future::ok::<(), ()>(()))
    });

    core.run(shutdown).map_err(|_| format_err!("Event loop stopped unexpectedly"))?;
    info!("Treasury stopped");
    Ok(())
}

fn shutdown_signal() -> Box<Future<Item = &'static str, Error = FailureError>> {
    let interrupt = tokio_signal::ctrl_c()
        .flatten_stream()
        .take(1)
        .into_future()
        .map(|_| "SIGINT")
        .map_err(|(e, _)| FailureError::from(e.context("SIGINT handler failed")));
    let terminate = Signal::new(SIGTERM)
        .flatten_stream()
        .take(1)
        .into_future()
        .map(|_| "SIGTERM")
        .map_err(|(e, _)| FailureError::from(e.context("SIGTERM handler failed")));

    Box::new(interrupt.select(terminate).map(|(name, _)| name).map_err(|(e, _)| e))
}
