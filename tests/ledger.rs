extern crate chrono;
extern crate diesel;
extern crate treasury_lib;

mod common;

use treasury_lib::models::*;
use treasury_lib::repos::*;
use treasury_lib::services::transfers::{execute_transfer, TransferRequest};
use treasury_lib::services::ErrorKind;

use common::*;

fn invest(user_id: i32, project_id: i32, cents: u64, key: Option<&str>) -> TransferRequest {
    TransferRequest {
        kind: TransferKind::UserToProject,
        from: HolderRef::user(UserId::new(user_id)),
        to: HolderRef::project(ProjectId::new(project_id)),
        amount: Amount::new(cents),
        idempotency_key: key.map(String::from),
    }
}

#[test]
#[ignore]
fn investment_updates_balances_and_cum_sums() {
    with_test_db_conn(|conn| {
        let repo_factory = ReposFactoryImpl::new(5, 300);
        create_user(conn, 900_001, 100_000);
        create_user(conn, 900_002, 0);
        create_organization(conn, 900_010, 900_002, 0);
        create_project(conn, 900_020, 900_010, 500_000);

        let record = execute_transfer(
            conn,
            &repo_factory,
            invest(900_001, 900_020, 25_000, None),
            Initiator::User(UserId::new(900_001)),
        )
        .unwrap();

        assert_eq!(record.cum_sum_of_sender, Some(Amount::new(75_000)));
        assert_eq!(record.cum_sum_of_receiver, Some(Amount::new(25_000)));
        assert_eq!(record.initiated_by, Some(UserId::new(900_001)));

        let user = UsersRepoImpl::new(conn).get(UserId::new(900_001)).unwrap().unwrap();
        assert_eq!(user.balance, Amount::new(75_000));
        let project = ProjectsRepoImpl::new(conn).get(ProjectId::new(900_020)).unwrap().unwrap();
        assert_eq!(project.current_money, Amount::new(25_000));

        let transactions_repo = TransactionsRepoImpl::new(conn);
        assert_eq!(
            transactions_repo.last_balance(HolderRef::user(UserId::new(900_001))).unwrap(),
            Amount::new(75_000)
        );
        let history = transactions_repo
            .list_for_holder(HolderRef::project(ProjectId::new(900_020)), 0, 10)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, record.id);
    })
}

#[test]
#[ignore]
fn idempotency_key_is_recorded_once() {
    with_test_db_conn(|conn| {
        let repo_factory = ReposFactoryImpl::new(5, 300);
        create_user(conn, 900_001, 100_000);
        create_user(conn, 900_002, 0);
        create_organization(conn, 900_010, 900_002, 0);
        create_project(conn, 900_020, 900_010, 500_000);
        let initiator = Initiator::User(UserId::new(900_001));

        let first = execute_transfer(conn, &repo_factory, invest(900_001, 900_020, 1_000, Some("ledger-test-key")), initiator).unwrap();
        let second = execute_transfer(conn, &repo_factory, invest(900_001, 900_020, 1_000, Some("ledger-test-key")), initiator).unwrap();
        assert_eq!(first.id, second.id);

        let other = execute_transfer(conn, &repo_factory, invest(900_001, 900_020, 2_000, Some("ledger-test-key")), initiator).unwrap_err();
        match other.kind() {
            ErrorKind::Conflict => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }

        let user = UsersRepoImpl::new(conn).get(UserId::new(900_001)).unwrap().unwrap();
        assert_eq!(user.balance, Amount::new(99_000));
    })
}

#[test]
#[ignore]
fn overdraft_is_rejected_without_a_record() {
    with_test_db_conn(|conn| {
        let repo_factory = ReposFactoryImpl::new(5, 300);
        create_user(conn, 900_001, 500);
        create_user(conn, 900_002, 0);
        create_organization(conn, 900_010, 900_002, 0);
        create_project(conn, 900_020, 900_010, 500_000);

        let err = execute_transfer(
            conn,
            &repo_factory,
            invest(900_001, 900_020, 501, None),
            Initiator::User(UserId::new(900_001)),
        )
        .unwrap_err();
        match err.kind() {
            ErrorKind::InsufficientFunds => (),
            kind => panic!("unexpected error kind: {:?}", kind),
        }

        let history = TransactionsRepoImpl::new(conn)
            .list_for_holder(HolderRef::user(UserId::new(900_001)), 0, 10)
            .unwrap();
        assert!(history.is_empty());
    })
}

#[test]
#[ignore]
fn project_aggregates_track_dividends_and_closing_payouts() {
    with_test_db_conn(|conn| {
        let repo_factory = ReposFactoryImpl::new(5, 300);
        create_user(conn, 900_001, 100_000);
        create_user(conn, 900_002, 0);
        create_user(conn, 900_003, 100_000);
        create_organization(conn, 900_010, 900_002, 0);
        create_project(conn, 900_020, 900_010, 500_000);
        let project_id = ProjectId::new(900_020);
        let (first, second) = (UserId::new(900_001), UserId::new(900_003));

        execute_transfer(conn, &repo_factory, invest(900_001, 900_020, 10_000, None), Initiator::User(first)).unwrap();
        execute_transfer(conn, &repo_factory, invest(900_003, 900_020, 20_000, None), Initiator::User(second)).unwrap();

        let dividend = TransferRequest {
            kind: TransferKind::ProjectToUser,
            from: HolderRef::project(project_id),
            to: HolderRef::user(first),
            amount: Amount::new(100),
            idempotency_key: None,
        };
        execute_transfer(conn, &repo_factory, dividend, Initiator::User(UserId::new(900_002))).unwrap();

        let transactions_repo = TransactionsRepoImpl::new(conn);
        let paybacks_repo = PaybacksRepoImpl::new(conn);
        assert!(transactions_repo.has_payback(project_id, first).unwrap());
        assert!(!transactions_repo.has_payback(project_id, second).unwrap());
        assert_eq!(transactions_repo.paid_back_to(project_id, first).unwrap(), Amount::new(100));
        assert_eq!(transactions_repo.paid_back_to(project_id, second).unwrap(), Amount::zero());
        assert_eq!(transactions_repo.sum_in(project_id).unwrap(), Amount::new(30_000));
        assert_eq!(transactions_repo.sum_out(project_id).unwrap(), Amount::new(100));
        // a dividend does not settle the investor
        assert!(!paybacks_repo.is_paid_back(project_id, first).unwrap());

        let payout = TransferRequest {
            kind: TransferKind::ProjectToUser,
            from: HolderRef::project(project_id),
            to: HolderRef::user(second),
            amount: Amount::new(20_000),
            idempotency_key: Some("payback:900020:900003".to_string()),
        };
        let record = execute_transfer(conn, &repo_factory, payout, Initiator::Closing).unwrap();

        assert!(paybacks_repo.is_paid_back(project_id, second).unwrap());
        let again = InvestorPayback {
            project_id,
            user_id: second,
            transaction_id: record.id,
            created_at: record.created_at,
        };
        assert!(!paybacks_repo.mark_paid_back(again).unwrap());
        assert_eq!(transactions_repo.sum_out(project_id).unwrap(), Amount::new(20_100));

        let project = ProjectsRepoImpl::new(conn).get(project_id).unwrap().unwrap();
        assert_eq!(project.current_money, Amount::new(9_900));
    })
}

#[test]
#[ignore]
fn expired_projects_are_listed_in_pages() {
    with_test_db_conn(|conn| {
        create_user(conn, 900_002, 0);
        create_organization(conn, 900_010, 900_002, 0);
        for id in 900_020..900_023 {
            create_project(conn, id, 900_010, 500_000);
        }
        let projects_repo = ProjectsRepoImpl::new(conn);
        let later = chrono::Utc::now().naive_utc() + chrono::Duration::days(31);

        let expired = projects_repo.list_expired(later, None, 100).unwrap();
        let ours: Vec<_> = expired.iter().map(|p| p.id).filter(|id| id.inner() >= 900_020 && id.inner() < 900_023).collect();
        assert_eq!(ours.len(), 3);

        let page = projects_repo.list_expired(later, Some(ProjectId::new(900_020)), 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, ProjectId::new(900_021));

        // 30 day projects created now are not expired yet
        let now = chrono::Utc::now().naive_utc();
        let not_yet = projects_repo.list_expired(now, Some(ProjectId::new(900_019)), 100).unwrap();
        assert!(!not_yet.iter().any(|p| p.id.inner() >= 900_020 && p.id.inner() < 900_023));
    })
}
