//! Background jobs on a dedicated thread with its own reactor: the daily lifecycle
//! jobs, the gateway sweep and the outbox poll.
//!
//! On shutdown no new tick starts. Ticks already running get a drain window.

mod daily;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use diesel::{
    connection::{AnsiTransactionManager, Connection},
    pg::Pg,
};
use failure::Error as FailureError;
use futures::future::{self, Either, Loop};
use futures::sync::oneshot;
use futures::{Future, Stream};
use r2d2::ManageConnection;
use sentry::integrations::failure::capture_error;
use tokio_core::reactor::Core;
use tokio_timer::{Delay, Interval};

use client::gateway::GatewayClient;
use client::notifications::NotificationsClient;
use client::users::UsersClient;
use event_handling::EventHandler;
use repos::repo_factory::ReposFactory;
use services::lifecycle::{LifecycleService, LifecycleServiceImpl};
use services::payments::{PaymentsService, PaymentsServiceImpl};
use services::withdrawals::{WithdrawalsService, WithdrawalsServiceImpl};

pub use self::daily::{DailyAt, ParseDailyAtError};

pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_POLL: Duration = Duration::from_millis(100);

type JobFuture = Box<Future<Item = usize, Error = FailureError>>;
type TickFuture = Box<Future<Item = (), Error = ()>>;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub daily_at: DailyAt,
    pub sweep_interval: Duration,
    pub sweep_batch_size: i64,
    pub expired_page_size: i64,
    pub events_interval: Duration,
}

/// Counts running ticks and refuses new ones once stopping
#[derive(Clone, Default)]
struct Ticks {
    stopping: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
}

impl Ticks {
    fn run<J>(&self, name: &'static str, job: J) -> TickFuture
    where
        J: FnOnce() -> JobFuture,
    {
        if self.stopping.load(Ordering::SeqCst) {
            debug!("Skipping {} tick, shutting down", name);
            return Box::new(future::ok(()));
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.clone();
        debug!("Started {} tick", name);
        Box::new(job().then(move |result| {
            in_flight.fetch_sub(1, Ordering::SeqCst);
            match result {
                Ok(affected) => debug!("Finished {} tick, {} affected", name, affected),
                Err(err) => {
                    let err = FailureError::from(err.context(format!("{} tick failed", name)));
                    error!("{:?}", &err);
                    capture_error(&err);
                }
            }
            Ok::<(), ()>(())
        }))
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Resolves when no tick is running or when `timeout` elapses
    fn drain(&self, timeout: Duration) -> TickFuture {
        let in_flight = self.in_flight.clone();
        let idle = Interval::new(Instant::now(), DRAIN_POLL)
            .map_err(|e| error!("Drain timer failed: {}", e))
            .take_while(move |_| Ok(in_flight.load(Ordering::SeqCst) > 0))
            .for_each(|_| Ok(()));
        let deadline = Delay::new(Instant::now() + timeout).map_err(|e| error!("Drain timer failed: {}", e));

        let in_flight = self.in_flight.clone();
        Box::new(idle.select2(deadline).then(move |_| {
            let left = in_flight.load(Ordering::SeqCst);
            if left > 0 {
                warn!("Scheduler stopped with {} ticks still running", left);
            }
            Ok::<(), ()>(())
        }))
    }
}

pub struct Scheduler<T, M, F, G, UC, NC>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    G: GatewayClient + Clone,
    UC: UsersClient + Clone,
    NC: NotificationsClient + Clone,
{
    pub lifecycle_service: LifecycleServiceImpl<T, M, F>,
    pub payments_service: PaymentsServiceImpl<T, M, F, G>,
    pub withdrawals_service: WithdrawalsServiceImpl<T, M, F, G>,
    pub event_handler: EventHandler<T, M, F, UC, NC>,
    pub settings: SchedulerSettings,
    ticks: Ticks,
}

impl<T, M, F, G, UC, NC> Scheduler<T, M, F, G, UC, NC>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    G: GatewayClient + Clone,
    UC: UsersClient + Clone,
    NC: NotificationsClient + Clone,
{
    pub fn new(
        lifecycle_service: LifecycleServiceImpl<T, M, F>,
        payments_service: PaymentsServiceImpl<T, M, F, G>,
        withdrawals_service: WithdrawalsServiceImpl<T, M, F, G>,
        event_handler: EventHandler<T, M, F, UC, NC>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            lifecycle_service,
            payments_service,
            withdrawals_service,
            event_handler,
            settings,
            ticks: Ticks::default(),
        }
    }

    /// Runs the jobs on a new thread until `shutdown` fires, then drains.
    /// The returned receiver resolves once the thread has finished.
    pub fn spawn(self, shutdown: oneshot::Receiver<()>) -> Result<oneshot::Receiver<()>, FailureError>
    where
        Self: Send + 'static,
    {
        let (finished_tx, finished_rx) = oneshot::channel::<()>();
        thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || {
                let _finished = finished_tx;
                let mut core = match Core::new() {
                    Ok(core) => core,
                    Err(e) => {
                        error!("Could not create scheduler event loop: {}", e);
                        return;
                    }
                };
                if core.run(self.run(shutdown)).is_err() {
                    error!("Scheduler stopped unexpectedly");
                }
                info!("Scheduler stopped");
            })?;
        Ok(finished_rx)
    }

    pub fn run(self, shutdown: oneshot::Receiver<()>) -> TickFuture {
        let ticks = self.ticks.clone();
        info!(
            "Scheduler started: daily jobs at {}, gateway sweep every {:?}, events every {:?}",
            self.settings.daily_at, self.settings.sweep_interval, self.settings.events_interval
        );

        let jobs = self
            .daily_jobs()
            .join3(self.gateway_sweep(), self.event_polling())
            .map(|_| ());
        let stop = shutdown.then(move |_| {
            info!("Scheduler is shutting down");
            ticks.stop();
            ticks.drain(DRAIN_TIMEOUT)
        });

        Box::new(jobs.select2(stop).then(|result| match result {
            Ok(_) => Ok(()),
            Err(Either::A((e, _))) | Err(Either::B((e, _))) => Err(e),
        }))
    }

    fn daily_jobs(&self) -> TickFuture {
        let daily_at = self.settings.daily_at;
        let page_size = self.settings.expired_page_size;
        let lifecycle_service = self.lifecycle_service.clone();
        let ticks = self.ticks.clone();

        Box::new(future::loop_fn((), move |_| {
            let wait = daily_at.wait_from(Local::now().naive_local());
            debug!("Next daily jobs in {:?}", wait);
            let expired_service = lifecycle_service.clone();
            let payback_service = lifecycle_service.clone();
            let ticks = ticks.clone();

            Delay::new(Instant::now() + wait)
                .map_err(|e| error!("Daily jobs timer failed: {}", e))
                .and_then(move |_| {
                    ticks
                        .run("expired-projects", move || {
                            Box::new(expired_service.close_expired_projects(page_size).map_err(FailureError::from))
                        })
                        .then(move |_| {
                            ticks.run("recalculate-payback", move || {
                                Box::new(payback_service.recalculate_payback().map_err(FailureError::from))
                            })
                        })
                })
                .map(|_| -> Loop<(), ()> { Loop::Continue(()) })
        }))
    }

    fn gateway_sweep(&self) -> TickFuture {
        let batch_size = self.settings.sweep_batch_size;
        let payments_service = self.payments_service.clone();
        let withdrawals_service = self.withdrawals_service.clone();

        every(self.ticks.clone(), "gateway-sweep", self.settings.sweep_interval, move || {
            let withdrawals_service = withdrawals_service.clone();
            Box::new(
                payments_service
                    .process_pending_payments(batch_size)
                    .and_then(move |payments| {
                        withdrawals_service
                            .process_pending_withdrawals(batch_size)
                            .map(move |withdrawals| payments + withdrawals)
                    })
                    .map_err(FailureError::from),
            )
        })
    }

    fn event_polling(&self) -> TickFuture {
        let event_handler = self.event_handler.clone();

        every(self.ticks.clone(), "events", self.settings.events_interval, move || {
            Box::new(event_handler.clone().process_events().map_err(FailureError::from))
        })
    }
}

/// Ticks never overlap: the next tick is taken after the previous one finished.
fn every<J>(ticks: Ticks, name: &'static str, period: Duration, job: J) -> TickFuture
where
    J: Fn() -> JobFuture + 'static,
{
    Box::new(
        Interval::new(Instant::now() + period, period)
            .map_err(move |e| error!("{} timer failed: {}", name, e))
            .for_each(move |_| ticks.run(name, || job())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_ticks_do_not_start_jobs() {
        let ticks = Ticks::default();
        ticks.stop();
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();

        ticks
            .run("test", move || {
                flag.store(true, Ordering::SeqCst);
                Box::new(future::ok(1))
            })
            .wait()
            .unwrap();

        assert!(!started.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_ticks_are_released() {
        let ticks = Ticks::default();

        ticks
            .run("test", || Box::new(future::err(format_err!("boom"))))
            .wait()
            .unwrap();
        ticks.run("test", || Box::new(future::ok(3))).wait().unwrap();

        assert_eq!(ticks.in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn running_ticks_are_counted() {
        let ticks = Ticks::default();
        let (tx, rx) = oneshot::channel::<usize>();

        let tick = ticks.run("test", move || Box::new(rx.map_err(FailureError::from)));
        assert_eq!(ticks.in_flight.load(Ordering::SeqCst), 1);

        tx.send(2).unwrap();
        tick.wait().unwrap();
        assert_eq!(ticks.in_flight.load(Ordering::SeqCst), 0);
    }
}
