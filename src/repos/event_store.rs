use chrono::{Duration, Utc};
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::query_dsl::RunQueryDsl;
use diesel::{Connection, ExpressionMethods, OptionalExtension, QueryDsl};
use failure::Fail;

use models::{Event, EventEntry, EventEntryId, EventStatus, NewStoredEvent, StoredEvent};
use schema::event_store::dsl as EventStore;

use super::error::*;
use super::types::RepoResultV2;

/// Outbox of post-commit effects. Entries are written inside the transaction
/// that caused them and handled at least once afterwards.
pub trait EventStoreRepo {
    fn add_event(&self, event: Event) -> RepoResultV2<EventEntry>;

    /// Skips the insert when an entry with the same event key exists.
    fn add_event_once(&self, event: Event) -> RepoResultV2<Option<EventEntry>>;

    /// Moves up to `limit` pending entries to `in_progress`, oldest first, counting the attempt.
    fn get_events_for_processing(&self, limit: u32) -> RepoResultV2<Vec<EventEntry>>;

    /// Returns entries stuck in `in_progress` to the queue, or fails them when attempts ran out.
    fn reset_stuck_events(&self) -> RepoResultV2<Vec<EventEntry>>;

    fn complete_event(&self, event_entry_id: EventEntryId) -> RepoResultV2<EventEntry>;

    fn fail_event(&self, event_entry_id: EventEntryId) -> RepoResultV2<EventEntry>;
}

pub struct EventStoreRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
    pub max_processing_attempts: u32,
    pub stuck_threshold_sec: u32,
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> EventStoreRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T, max_processing_attempts: u32, stuck_threshold_sec: u32) -> Self {
        Self {
            db_conn,
            max_processing_attempts,
            stuck_threshold_sec,
        }
    }

    fn entry(stored: StoredEvent) -> RepoResultV2<EventEntry> {
        let id = stored.id;
        stored
            .into_entry()
            .map_err(ectx!(ErrorSource::SerdeJson, ErrorKind::Internal => id))
    }

    fn entries(stored: Vec<StoredEvent>) -> RepoResultV2<Vec<EventEntry>> {
        stored.into_iter().map(Self::entry).collect()
    }

    /// Finishes an attempt. Only an entry currently `in_progress` can be finished.
    fn finish_attempt(&self, event_entry_id: EventEntryId, succeeded: bool) -> RepoResultV2<EventEntry> {
        let max_attempts = self.max_processing_attempts;

        self.db_conn.transaction(|| {
            let in_progress = EventStore::event_store
                .filter(EventStore::id.eq(event_entry_id))
                .filter(EventStore::status.eq(EventStatus::InProgress))
                .select(EventStore::attempt_count)
                .for_update()
                .get_result::<i32>(self.db_conn)
                .optional()
                .map_err(|e| {
                    let error_kind = ErrorKind::from(&e);
                    ectx!(try err e, ErrorSource::Diesel, error_kind => event_entry_id)
                })?;

            let attempt_count = match in_progress {
                Some(attempt_count) => attempt_count,
                None => {
                    let e = format_err!("Event entry {} is not in progress", event_entry_id);
                    return Err(ectx!(err e, ErrorKind::Internal => event_entry_id, succeeded));
                }
            };

            let status = if succeeded {
                EventStatus::Completed
            } else {
                EventStatus::after_failure(attempt_count, max_attempts)
            };

            let stored = diesel::update(EventStore::event_store.filter(EventStore::id.eq(event_entry_id)))
                .set((EventStore::status.eq(status), EventStore::status_updated_at.eq(Utc::now().naive_utc())))
                .get_result::<StoredEvent>(self.db_conn)
                .map_err(|e| {
                    let error_kind = ErrorKind::from(&e);
                    ectx!(try err e, ErrorSource::Diesel, error_kind => event_entry_id, status)
                })?;

            Self::entry(stored)
        })
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> EventStoreRepo for EventStoreRepoImpl<'a, T> {
    fn add_event(&self, event: Event) -> RepoResultV2<EventEntry> {
        debug!("Enqueueing {} effect {}", event.payload, event.id);

        let new_stored = NewStoredEvent::pending(&event).map_err(ectx!(try ErrorSource::SerdeJson, ErrorKind::Internal => event))?;

        let stored = diesel::insert_into(EventStore::event_store)
            .values(&new_stored)
            .get_result::<StoredEvent>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(try err e, ErrorSource::Diesel, error_kind => new_stored.event_key)
            })?;

        Self::entry(stored)
    }

    fn add_event_once(&self, event: Event) -> RepoResultV2<Option<EventEntry>> {
        debug!("Enqueueing {} effect {} unless its key is taken", event.payload, event.id);

        let new_stored = NewStoredEvent::pending(&event).map_err(ectx!(try ErrorSource::SerdeJson, ErrorKind::Internal => event))?;

        let stored = diesel::insert_into(EventStore::event_store)
            .values(&new_stored)
            .on_conflict_do_nothing()
            .get_result::<StoredEvent>(self.db_conn)
            .optional()
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(try err e, ErrorSource::Diesel, error_kind => new_stored.event_key)
            })?;

        match stored {
            Some(stored) => Self::entry(stored).map(Some),
            None => {
                debug!("Effect with key {:?} is already enqueued", new_stored.event_key);
                Ok(None)
            }
        }
    }

    fn get_events_for_processing(&self, limit: u32) -> RepoResultV2<Vec<EventEntry>> {
        debug!("Taking up to {} pending effects", limit);

        self.db_conn.transaction(|| {
            // Entries locked by a concurrent poller are left to it.
            let ids = EventStore::event_store
                .filter(EventStore::status.eq(EventStatus::Pending))
                .order(EventStore::id)
                .limit(limit as i64)
                .select(EventStore::id)
                .for_update()
                .skip_locked()
                .get_results::<EventEntryId>(self.db_conn)
                .map_err(|e| {
                    let error_kind = ErrorKind::from(&e);
                    ectx!(try err e, ErrorSource::Diesel, error_kind => limit)
                })?;

            if ids.is_empty() {
                return Ok(vec![]);
            }

            let stored = diesel::update(EventStore::event_store.filter(EventStore::id.eq_any(ids.clone())))
                .set((
                    EventStore::status.eq(EventStatus::InProgress),
                    EventStore::attempt_count.eq(EventStore::attempt_count + 1),
                    EventStore::status_updated_at.eq(Utc::now().naive_utc()),
                ))
                .get_results::<StoredEvent>(self.db_conn)
                .map_err(|e| {
                    let error_kind = ErrorKind::from(&e);
                    ectx!(try err e, ErrorSource::Diesel, error_kind => ids)
                })?;

            let mut entries = Self::entries(stored)?;
            entries.sort_by_key(|entry| entry.id.inner());
            Ok(entries)
        })
    }

    fn reset_stuck_events(&self) -> RepoResultV2<Vec<EventEntry>> {
        let now = Utc::now().naive_utc();
        let stuck_before = now - Duration::seconds(self.stuck_threshold_sec as i64);
        let max_attempts = self.max_processing_attempts as i32;

        debug!("Resetting effects in progress since before {}", stuck_before);

        let stuck = EventStore::event_store
            .filter(EventStore::status.eq(EventStatus::InProgress))
            .filter(EventStore::status_updated_at.lt(stuck_before));

        self.db_conn.transaction(|| {
            let mut stored = diesel::update(stuck.clone().filter(EventStore::attempt_count.ge(max_attempts)))
                .set((EventStore::status.eq(EventStatus::Failed), EventStore::status_updated_at.eq(now)))
                .get_results::<StoredEvent>(self.db_conn)
                .map_err(|e| {
                    let error_kind = ErrorKind::from(&e);
                    ectx!(try err e, ErrorSource::Diesel, error_kind => stuck_before)
                })?;

            let requeued = diesel::update(stuck.clone().filter(EventStore::attempt_count.lt(max_attempts)))
                .set((EventStore::status.eq(EventStatus::Pending), EventStore::status_updated_at.eq(now)))
                .get_results::<StoredEvent>(self.db_conn)
                .map_err(|e| {
                    let error_kind = ErrorKind::from(&e);
                    ectx!(try err e, ErrorSource::Diesel, error_kind => stuck_before)
                })?;

            if !stored.is_empty() {
                warn!("{} effects ran out of attempts while stuck", stored.len());
            }
            stored.extend(requeued);
            Self::entries(stored)
        })
    }

    fn complete_event(&self, event_entry_id: EventEntryId) -> RepoResultV2<EventEntry> {
        debug!("Completing effect entry {}", event_entry_id);
        self.finish_attempt(event_entry_id, true)
    }

    fn fail_event(&self, event_entry_id: EventEntryId) -> RepoResultV2<EventEntry> {
        debug!("Failing effect entry {}", event_entry_id);
        self.finish_attempt(event_entry_id, false)
    }
}
