use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::Connection;

use treasury_lib::models::*;
use treasury_lib::repos::*;

/// Runs `f` inside a transaction that is always rolled back
pub fn with_test_db_conn<F, T>(f: F) -> T
where
    F: FnOnce(&PgConnection) -> T,
{
    let config = treasury_lib::config::Config::new().unwrap();
    let db_conn = PgConnection::establish(&config.server.database).unwrap();

    let mut result = None;
    let _ = db_conn.test_transaction::<(), (), _>(|| {
        result = Some(f(&db_conn));
        Ok(())
    });
    result.unwrap()
}

pub fn create_user(conn: &PgConnection, id: i32, balance: u64) -> UserWallet {
    UsersRepoImpl::new(conn)
        .create(NewUserWallet {
            id: UserId::new(id),
            balance: Amount::new(balance),
            is_banned: false,
            is_admin: false,
        })
        .unwrap()
}

pub fn create_organization(conn: &PgConnection, id: i32, owner_id: i32, balance: u64) -> Organization {
    OrganizationsRepoImpl::new(conn)
        .create(NewOrganization {
            id: OrganizationId::new(id),
            name: format!("organization {}", id),
            owner_id: UserId::new(owner_id),
            balance: Amount::new(balance),
            org_type: OrgType::Jur,
            is_banned: false,
        })
        .unwrap()
}

pub fn create_project(conn: &PgConnection, id: i32, org_id: i32, wanted_money: u64) -> Project {
    ProjectsRepoImpl::new(conn)
        .create(NewProject {
            id: ProjectId::new(id),
            name: format!("project {}", id),
            creator_org_id: OrganizationId::new(org_id),
            current_money: Amount::zero(),
            wanted_money: Amount::new(wanted_money),
            duration_days: 30,
            created_at: Utc::now().naive_utc(),
            monetization_type: MonetizationType::None,
            percent: Percent::new(0),
        })
        .unwrap()
}
