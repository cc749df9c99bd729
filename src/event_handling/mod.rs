//! Outbox worker. Effects written in the same transaction as a ledger change are
//! picked up here after commit and handled at least once.

pub mod error;
mod handlers;

use diesel::{
    connection::{AnsiTransactionManager, Connection},
    pg::Pg,
};
use failure::Fail;
use futures::{stream, Future, Stream};
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool, PooledConnection};
use sentry::integrations::failure::capture_fail;

use client::notifications::NotificationsClient;
use client::users::UsersClient;
use models::event_store::EventEntry;
use repos::repo_factory::ReposFactory;

use self::error::*;

pub type EventHandlerFuture<T> = Box<Future<Item = T, Error = Error>>;

pub struct EventHandler<T, M, F, UC, NC>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    UC: UsersClient,
    NC: NotificationsClient,
{
    pub cpu_pool: CpuPool,
    pub db_pool: Pool<M>,
    pub repo_factory: F,
    pub users_client: UC,
    pub notifications_client: NC,
    pub batch_size: u32,
}

impl<T, M, F, UC, NC> Clone for EventHandler<T, M, F, UC, NC>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    UC: UsersClient + Clone,
    NC: NotificationsClient + Clone,
{
    fn clone(&self) -> Self {
        Self {
            cpu_pool: self.cpu_pool.clone(),
            db_pool: self.db_pool.clone(),
            repo_factory: self.repo_factory.clone(),
            users_client: self.users_client.clone(),
            notifications_client: self.notifications_client.clone(),
            batch_size: self.batch_size,
        }
    }
}

impl<T, M, F, UC, NC> EventHandler<T, M, F, UC, NC>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    UC: UsersClient + Clone,
    NC: NotificationsClient + Clone,
{
    /// Handles one batch of pending events. Returns how many were handled successfully.
    pub fn process_events(self) -> EventHandlerFuture<usize> {
        let EventHandler {
            cpu_pool,
            db_pool,
            repo_factory,
            batch_size,
            ..
        } = self.clone();

        let fut = spawn_on_pool(db_pool.clone(), cpu_pool.clone(), {
            let repo_factory = repo_factory.clone();
            move |conn| {
                let event_store_repo = repo_factory.create_event_store_repo(&conn);

                debug!("Resetting stuck events...");
                let reset_events = event_store_repo.reset_stuck_events().map_err(ectx!(try convert))?;
                debug!("{} events have been reset", reset_events.len());

                debug!("Getting events for processing...");
                event_store_repo
                    .get_events_for_processing(batch_size)
                    .map(|event_entries| {
                        debug!("Got {} events to process", event_entries.len());
                        event_entries
                    })
                    .map_err(ectx!(convert => batch_size))
            }
        })
        .and_then(move |event_entries| {
            stream::iter_ok::<_, Error>(event_entries).fold(0usize, move |handled, EventEntry { id: entry_id, event, .. }| {
                let db_pool = db_pool.clone();
                let cpu_pool = cpu_pool.clone();
                let repo_factory = repo_factory.clone();

                debug!("Started processing event #{} - {:?}", entry_id, event);
                self.clone().handle_event(event.clone()).then(move |result| {
                    spawn_on_pool(db_pool, cpu_pool, move |conn| {
                        let event_store_repo = repo_factory.create_event_store_repo(&conn);

                        match result {
                            Ok(()) => {
                                debug!("Finished processing event #{} - {:?}", entry_id, event);
                                event_store_repo.complete_event(entry_id).map_err(ectx!(try convert => entry_id))?;
                                Ok(handled + 1)
                            }
                            Err(e) => {
                                warn!("Failed to process event #{} - {:?}: {}", entry_id, event, e);
                                capture_fail(&e);
                                event_store_repo.fail_event(entry_id).map_err(ectx!(try convert => entry_id))?;
                                Ok(handled)
                            }
                        }
                    })
                })
            })
        });

        Box::new(fut)
    }
}

pub fn spawn_on_pool<T, M, Func, R>(db_pool: Pool<M>, cpu_pool: CpuPool, f: Func) -> EventHandlerFuture<R>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    Func: FnOnce(PooledConnection<M>) -> Result<R, Error> + Send + 'static,
    R: Send + 'static,
{
    Box::new(cpu_pool.spawn_fn(move || db_pool.get().map_err(ectx!(ErrorSource::R2d2, ErrorKind::Unavailable)).and_then(f)))
}
