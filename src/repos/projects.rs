use chrono::NaiveDateTime;
use diesel::connection::AnsiTransactionManager;
use diesel::dsl::sql;
use diesel::pg::Pg;
use diesel::sql_types::Interval;
use diesel::{Connection, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use failure::Fail;

use models::{Amount, MonetizationType, NewProject, Project, ProjectId};
use schema::projects::dsl as Projects;

use super::error::*;
use super::types::RepoResultV2;

pub trait ProjectsRepo {
    fn create(&self, payload: NewProject) -> RepoResultV2<Project>;

    fn get(&self, project_id: ProjectId) -> RepoResultV2<Option<Project>>;

    /// Row lock on the escrow. Investments and closing both take it, which
    /// serializes a late investment against expiry.
    fn get_for_update(&self, project_id: ProjectId) -> RepoResultV2<Option<Project>>;

    fn set_current_money(&self, project_id: ProjectId, current_money: Amount) -> RepoResultV2<Project>;

    /// Open (not completed, not banned) projects whose duration has run out by `now`,
    /// ordered by id and starting after `after`.
    fn list_expired(&self, now: NaiveDateTime, after: Option<ProjectId>, limit: i64) -> RepoResultV2<Vec<Project>>;

    /// Time-percent projects whose payback has not started.
    fn list_accruing(&self) -> RepoResultV2<Vec<Project>>;

    fn close(&self, project_id: ProjectId) -> RepoResultV2<Project>;

    fn start_payback(&self, project_id: ProjectId, started_at: NaiveDateTime) -> RepoResultV2<Project>;

    fn set_money_required_to_payback(&self, project_id: ProjectId, amount: Amount) -> RepoResultV2<Project>;

    fn ban(&self, project_id: ProjectId) -> RepoResultV2<Project>;
}

pub struct ProjectsRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> ProjectsRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> ProjectsRepo for ProjectsRepoImpl<'a, T> {
    fn create(&self, payload: NewProject) -> RepoResultV2<Project> {
        debug!("Creating a project using payload: {:?}", payload);

        diesel::insert_into(Projects::projects)
            .values(&payload)
            .get_result::<Project>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => payload)
            })
    }

    fn get(&self, project_id: ProjectId) -> RepoResultV2<Option<Project>> {
        debug!("Getting a project with ID: {}", project_id);

        Projects::projects
            .filter(Projects::id.eq(project_id))
            .get_result::<Project>(self.db_conn)
            .optional()
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id)
            })
    }

    fn get_for_update(&self, project_id: ProjectId) -> RepoResultV2<Option<Project>> {
        debug!("Locking a project with ID: {}", project_id);

        Projects::projects
            .filter(Projects::id.eq(project_id))
            .for_update()
            .get_result::<Project>(self.db_conn)
            .optional()
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id)
            })
    }

    fn set_current_money(&self, project_id: ProjectId, current_money: Amount) -> RepoResultV2<Project> {
        debug!("Setting current money of project {} to {}", project_id, current_money);

        diesel::update(Projects::projects.filter(Projects::id.eq(project_id)))
            .set(Projects::current_money.eq(current_money))
            .get_result::<Project>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id, current_money)
            })
    }

    fn list_expired(&self, now: NaiveDateTime, after: Option<ProjectId>, limit: i64) -> RepoResultV2<Vec<Project>> {
        debug!("Listing projects expired by {} after {:?} (limit: {})", now, after, limit);

        let after_id = after.map(|id| id.inner()).unwrap_or_else(i32::min_value);
        let expires_at = Projects::created_at + sql::<Interval>("make_interval(days => duration_days)");

        Projects::projects
            .filter(Projects::is_completed.eq(false))
            .filter(Projects::is_banned.eq(false))
            .filter(expires_at.lt(now))
            .filter(Projects::id.gt(after_id))
            .order(Projects::id)
            .limit(limit)
            .get_results::<Project>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => now, after, limit)
            })
    }

    fn list_accruing(&self) -> RepoResultV2<Vec<Project>> {
        debug!("Listing time percent projects without started payback");

        Projects::projects
            .filter(Projects::monetization_type.eq(MonetizationType::TimePercent))
            .filter(Projects::payback_started.eq(false))
            .order(Projects::id)
            .get_results::<Project>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind)
            })
    }

    fn close(&self, project_id: ProjectId) -> RepoResultV2<Project> {
        debug!("Closing project {}", project_id);

        diesel::update(Projects::projects.filter(Projects::id.eq(project_id)))
            .set((Projects::is_completed.eq(true), Projects::is_public.eq(false)))
            .get_result::<Project>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id)
            })
    }

    fn start_payback(&self, project_id: ProjectId, started_at: NaiveDateTime) -> RepoResultV2<Project> {
        debug!("Starting payback of project {} at {}", project_id, started_at);

        diesel::update(Projects::projects.filter(Projects::id.eq(project_id)))
            .set((
                Projects::payback_started.eq(true),
                Projects::payback_started_at.eq(Some(started_at)),
                Projects::is_completed.eq(true),
                Projects::is_public.eq(false),
            ))
            .get_result::<Project>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id, started_at)
            })
    }

    fn set_money_required_to_payback(&self, project_id: ProjectId, amount: Amount) -> RepoResultV2<Project> {
        debug!("Setting money required to payback project {} to {}", project_id, amount);

        diesel::update(Projects::projects.filter(Projects::id.eq(project_id)))
            .set(Projects::money_required_to_payback.eq(amount))
            .get_result::<Project>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id, amount)
            })
    }

    fn ban(&self, project_id: ProjectId) -> RepoResultV2<Project> {
        debug!("Banning project {}", project_id);

        diesel::update(Projects::projects.filter(Projects::id.eq(project_id)))
            .set((Projects::is_banned.eq(true), Projects::is_public.eq(false)))
            .get_result::<Project>(self.db_conn)
            .map_err(|e| {
                let error_kind = ErrorKind::from(&e);
                ectx!(err e, ErrorSource::Diesel, error_kind => project_id)
            })
    }
}
