use diesel::{connection::AnsiTransactionManager, pg::Pg, Connection};
use failure::Fail;
use futures::{future, Future};
use r2d2::ManageConnection;

use client::notifications::{EmailNotification, NotificationType, NotificationsClient};
use client::users::UsersClient;
use models::{Amount, CloseReason, Event, EventPayload, HolderRef, ProjectId, UserId};
use repos::repo_factory::ReposFactory;
use services::lifecycle::{LifecycleService, LifecycleServiceImpl};

use super::error::*;
use super::{spawn_on_pool, EventHandler, EventHandlerFuture};

/// Who to tell about a project and what its name is
struct ProjectAudience {
    project_name: String,
    owner_id: UserId,
    investors: Vec<UserId>,
}

impl<T, M, F, UC, NC> EventHandler<T, M, F, UC, NC>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    UC: UsersClient + Clone,
    NC: NotificationsClient + Clone,
{
    pub fn handle_event(self, event: Event) -> EventHandlerFuture<()> {
        let Event { id: _, payload } = event;

        match payload {
            EventPayload::NoOp => Box::new(future::ok(())),
            EventPayload::ProjectGoalReached { project_id } => self.handle_goal_reached(project_id),
            EventPayload::ProjectClosed { project_id, reason } => self.handle_project_closed(project_id, reason),
            EventPayload::InvestorPaidBack {
                project_id,
                user_id,
                amount,
                ..
            } => self.handle_investor_paid_back(project_id, user_id, amount),
        }
    }

    /// The owner hears about it only when the project closed.
    fn handle_goal_reached(self, project_id: ProjectId) -> EventHandlerFuture<()> {
        let lifecycle_service = LifecycleServiceImpl::system(self.db_pool.clone(), self.cpu_pool.clone(), self.repo_factory.clone());

        let fut = lifecycle_service
            .handle_goal_reached(project_id)
            .map_err(ectx!(convert => project_id))
            .and_then(move |closed| -> EventHandlerFuture<()> {
                if !closed {
                    return Box::new(future::ok(()));
                }
                let self_ = self.clone();
                Box::new(
                    self.audience(project_id, false)
                        .and_then(move |audience| self_.notify(audience.owner_id, NotificationType::ProjectClosed, audience.project_name, Amount::zero())),
                )
            });

        Box::new(fut)
    }

    fn handle_project_closed(self, project_id: ProjectId, reason: CloseReason) -> EventHandlerFuture<()> {
        let self_ = self.clone();
        let with_investors = reason == CloseReason::Expired;

        let fut = self.audience(project_id, with_investors).and_then(move |audience| {
            let ProjectAudience {
                project_name,
                owner_id,
                investors,
            } = audience;

            let mut notifications = vec![self_
                .clone()
                .notify(owner_id, NotificationType::ProjectClosed, project_name.clone(), Amount::zero())];
            for investor in investors {
                notifications.push(
                    self_
                        .clone()
                        .notify(investor, NotificationType::ProjectClosed, project_name.clone(), Amount::zero()),
                );
            }
            future::join_all(notifications).map(|_| ())
        });

        Box::new(fut)
    }

    fn handle_investor_paid_back(self, project_id: ProjectId, user_id: UserId, amount: Amount) -> EventHandlerFuture<()> {
        let self_ = self.clone();

        let fut = self
            .audience(project_id, false)
            .and_then(move |audience| self_.notify(user_id, NotificationType::Dividends, audience.project_name, amount));

        Box::new(fut)
    }

    fn audience(self, project_id: ProjectId, with_investors: bool) -> EventHandlerFuture<ProjectAudience> {
        let repo_factory = self.repo_factory.clone();

        spawn_on_pool(self.db_pool, self.cpu_pool, move |conn| {
            let project = repo_factory
                .create_projects_repo(&conn)
                .get(project_id)
                .map_err(ectx!(try convert => project_id))?
                .ok_or_else(|| {
                    let e = format_err!("Project {} not found", project_id);
                    ectx!(try err e, ErrorKind::Internal => project_id)
                })?;
            let org_id = project.creator_org_id;
            let owner_id = repo_factory
                .create_organizations_repo(&conn)
                .get(org_id)
                .map_err(ectx!(try convert => org_id))?
                .map(|org| org.owner_id)
                .ok_or_else(|| {
                    let e = format_err!("Organization {} of project {} not found", org_id, project_id);
                    ectx!(try err e, ErrorKind::Internal => org_id)
                })?;
            let investors = if with_investors {
                repo_factory
                    .create_transactions_repo(&conn)
                    .investors_of(project_id, Some(owner_id))
                    .map_err(ectx!(try convert => project_id))?
                    .into_iter()
                    .map(|investor| investor.user_id)
                    .collect()
            } else {
                Vec::new()
            };

            Ok(ProjectAudience {
                project_name: project.name,
                owner_id,
                investors,
            })
        })
    }

    /// Best-effort email. Failures are logged and never fail the event.
    fn notify(self, user_id: UserId, type_: NotificationType, project_name: String, amount: Amount) -> EventHandlerFuture<()> {
        let notifications_client = self.notifications_client.clone();
        let recipient = HolderRef::user(user_id);

        let fut = self
            .users_client
            .get_email(user_id)
            .map_err(|e| format_err!("{}", e))
            .and_then(move |email| {
                let notification = EmailNotification {
                    email,
                    type_,
                    project_name,
                    amount: amount.inner() as f64 / 100.0,
                };
                notifications_client.send(notification).map_err(|e| format_err!("{}", e))
            })
            .then(move |result| {
                if let Err(e) = result {
                    warn!("Could not notify {}: {}", recipient, e);
                }
                Ok::<(), Error>(())
            });

        Box::new(fut)
    }
}

#[cfg(test)]
mod tests {
    use futures_cpupool::CpuPool;

    use super::*;
    use client::notifications::mock::NotificationsClientMock;
    use client::users::mock::UsersClientMock;
    use models::*;
    use repos::repo_factory::tests::*;
    use repos::EventStoreRepo;

    type Handler = EventHandler<MockConnection, MockConnectionManager, ReposFactoryMock, UsersClientMock, NotificationsClientMock>;

    fn handler(state: SharedState, notifications: NotificationsClientMock) -> Handler {
        let db_pool = r2d2::Pool::builder()
            .max_size(1)
            .build(MockConnectionManager::new(state.clone()))
            .unwrap();
        EventHandler {
            cpu_pool: CpuPool::new(1),
            db_pool,
            repo_factory: ReposFactoryMock::new(state),
            users_client: UsersClientMock::default().with_email(UserId::new(5), "owner@example.com"),
            notifications_client: notifications,
            batch_size: 10,
        }
    }

    fn state(monetization_type: MonetizationType) -> SharedState {
        let mut project = project(20, 10, 30000, monetization_type, 1000);
        project.name = "Greenhouse".to_string();
        MockState::default()
            .with_user(1, 0)
            .with_user(2, 0)
            .with_user(5, 0)
            .with_organization(10, 5, 0)
            .with_project(project)
            .with_investment(20, 1, 10000, 0)
            .with_investment(20, 2, 20000, 0)
            .into_shared()
    }

    fn enqueue(state: &SharedState, payload: EventPayload) {
        let factory = ReposFactoryMock::new(state.clone());
        let conn = MockConnection::new(state.clone());
        factory.create_event_store_repo(&conn).add_event(Event::new(payload)).unwrap();
    }

    #[test]
    fn goal_reached_closes_and_notifies_the_owner() {
        let state = state(MonetizationType::OneTimePercent);
        let notifications = NotificationsClientMock::default();
        enqueue(
            &state,
            EventPayload::ProjectGoalReached {
                project_id: ProjectId::new(20),
            },
        );

        let handled = handler(state.clone(), notifications.clone()).process_events().wait().unwrap();

        assert_eq!(handled, 1);
        assert!(state.lock().unwrap().project(20).is_completed);
        let sent = notifications.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].email, "owner@example.com");
        assert_eq!(sent[0].type_, NotificationType::ProjectClosed);
        assert_eq!(sent[0].project_name, "Greenhouse");
        assert_eq!(state.lock().unwrap().events[0].status, EventStatus::Completed);
    }

    #[test]
    fn goal_reached_keeps_time_percent_projects_open_and_quiet() {
        let state = state(MonetizationType::TimePercent);
        let notifications = NotificationsClientMock::default();
        enqueue(
            &state,
            EventPayload::ProjectGoalReached {
                project_id: ProjectId::new(20),
            },
        );

        assert_eq!(handler(state.clone(), notifications.clone()).process_events().wait().unwrap(), 1);

        assert!(!state.lock().unwrap().project(20).is_completed);
        assert!(notifications.sent().is_empty());
        assert_eq!(state.lock().unwrap().events[0].status, EventStatus::Completed);
    }

    #[test]
    fn expiry_notifies_owner_and_investors() {
        let state = state(MonetizationType::None);
        let notifications = NotificationsClientMock::default();
        enqueue(
            &state,
            EventPayload::ProjectClosed {
                project_id: ProjectId::new(20),
                reason: CloseReason::Expired,
            },
        );

        handler(state, notifications.clone()).process_events().wait().unwrap();

        let mut emails: Vec<_> = notifications.sent().into_iter().map(|n| n.email).collect();
        emails.sort();
        assert_eq!(emails, vec!["owner@example.com", "user1@example.com", "user2@example.com"]);
    }

    #[test]
    fn payback_sends_dividends_with_the_amount() {
        let state = state(MonetizationType::OneTimePercent);
        let notifications = NotificationsClientMock::default();
        enqueue(
            &state,
            EventPayload::InvestorPaidBack {
                project_id: ProjectId::new(20),
                user_id: UserId::new(2),
                transaction_id: TransactionId::new(7),
                amount: Amount::new(22050),
            },
        );

        handler(state, notifications.clone()).process_events().wait().unwrap();

        let sent = notifications.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].type_, NotificationType::Dividends);
        assert_eq!(sent[0].email, "user2@example.com");
        assert!((sent[0].amount - 220.5).abs() < 1e-9);
    }

    #[test]
    fn failed_handling_returns_the_event_to_the_queue() {
        let state = state(MonetizationType::OneTimePercent);
        enqueue(
            &state,
            EventPayload::ProjectGoalReached {
                project_id: ProjectId::new(404),
            },
        );

        let handled = handler(state.clone(), NotificationsClientMock::default())
            .process_events()
            .wait()
            .unwrap();

        assert_eq!(handled, 0);
        let state = state.lock().unwrap();
        assert_eq!(state.events[0].status, EventStatus::Pending);
        assert_eq!(state.events[0].attempt_count, 1);
    }
}
