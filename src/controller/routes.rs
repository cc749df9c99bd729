use http::RouteParser;
use models::*;

/// List of all routes with params for the app
#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    Healthcheck,
    Transfer,
    Balance { holder: HolderRef },
    Transactions { holder: HolderRef },
    ProjectInvestors { project_id: ProjectId },
    ProjectPayback { project_id: ProjectId },
    ProjectBan { project_id: ProjectId },
    PayInit,
    PayWebhook,
    Payment { payment_id: PaymentId },
    WithdrawInit,
    WithdrawWebhook,
    Withdrawal { withdrawal_id: WithdrawalId },
    OrgRights {
        org_id: OrganizationId,
        user_id: UserId,
        capability: Capability,
    },
    OrgEmployee { org_id: OrganizationId, user_id: UserId },
    ExpiredProjectsJob,
    RecalculatePaybackJob,
}

fn holder(params: &[&str]) -> Option<HolderRef> {
    let kind = params.get(0).and_then(|kind| kind.parse::<HolderKind>().ok())?;
    let id = params.get(1).and_then(|id| id.parse::<i32>().ok())?;
    Some(HolderRef::new(kind, id))
}

pub fn create_route_parser() -> RouteParser<Route> {
    let mut route_parser = RouteParser::default();

    route_parser.add_route(r"^/healthcheck$", || Route::Healthcheck);

    route_parser.add_route(r"^/transfer$", || Route::Transfer);
    route_parser.add_route_with_params(r"^/balances/(\w+)/(\d+)$", |params| {
        holder(&params).map(|holder| Route::Balance { holder })
    });
    route_parser.add_route_with_params(r"^/transactions/(\w+)/(\d+)$", |params| {
        holder(&params).map(|holder| Route::Transactions { holder })
    });

    route_parser.add_route_with_params(r"^/projects/(\d+)/investors$", |params| {
        params
            .get(0)
            .and_then(|string_id| string_id.parse().ok())
            .map(|project_id| Route::ProjectInvestors { project_id })
    });
    route_parser.add_route_with_params(r"^/projects/(\d+)/payback$", |params| {
        params
            .get(0)
            .and_then(|string_id| string_id.parse().ok())
            .map(|project_id| Route::ProjectPayback { project_id })
    });
    route_parser.add_route_with_params(r"^/projects/(\d+)/ban$", |params| {
        params
            .get(0)
            .and_then(|string_id| string_id.parse().ok())
            .map(|project_id| Route::ProjectBan { project_id })
    });

    route_parser.add_route(r"^/pay/init$", || Route::PayInit);
    route_parser.add_route(r"^/pay/webhook$", || Route::PayWebhook);
    route_parser.add_route_with_params(r"^/pay/([0-9a-fA-F-]+)$", |params| {
        params
            .get(0)
            .and_then(|string_id| string_id.parse().ok())
            .map(|payment_id| Route::Payment { payment_id })
    });

    route_parser.add_route(r"^/withdraw/init$", || Route::WithdrawInit);
    route_parser.add_route(r"^/withdraw/webhook$", || Route::WithdrawWebhook);
    route_parser.add_route_with_params(r"^/withdraw/([0-9a-fA-F-]+)$", |params| {
        params
            .get(0)
            .and_then(|string_id| string_id.parse().ok())
            .map(|withdrawal_id| Route::Withdrawal { withdrawal_id })
    });

    route_parser.add_route_with_params(r"^/orgs/(\d+)/rights/(\d+)/(\w+)$", |params| {
        let org_id = params.get(0).and_then(|string_id| string_id.parse().ok())?;
        let user_id = params.get(1).and_then(|string_id| string_id.parse().ok())?;
        let capability = params.get(2).and_then(|capability| capability.parse().ok())?;
        Some(Route::OrgRights {
            org_id,
            user_id,
            capability,
        })
    });
    route_parser.add_route_with_params(r"^/orgs/(\d+)/employees/(\d+)$", |params| {
        let org_id = params.get(0).and_then(|string_id| string_id.parse().ok())?;
        let user_id = params.get(1).and_then(|string_id| string_id.parse().ok())?;
        Some(Route::OrgEmployee { org_id, user_id })
    });

    route_parser.add_route(r"^/jobs/expired-projects$", || Route::ExpiredProjectsJob);
    route_parser.add_route(r"^/jobs/recalculate-payback$", || Route::RecalculatePaybackJob);

    route_parser
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holder_routes() {
        let parser = create_route_parser();
        assert_eq!(
            parser.test("/balances/organization/7"),
            Some(Route::Balance {
                holder: HolderRef::organization(OrganizationId::new(7))
            })
        );
        assert_eq!(
            parser.test("/transactions/user/3"),
            Some(Route::Transactions {
                holder: HolderRef::user(UserId::new(3))
            })
        );
        assert_eq!(parser.test("/balances/wallet/3"), None);
    }

    #[test]
    fn intent_routes_need_uuids() {
        let parser = create_route_parser();
        assert_eq!(parser.test("/pay/webhook"), Some(Route::PayWebhook));
        assert_eq!(parser.test("/withdraw/init"), Some(Route::WithdrawInit));
        match parser.test("/pay/6f2b6a3c-5d7e-4f0a-9b1c-2d3e4f5a6b7c") {
            Some(Route::Payment { .. }) => (),
            other => panic!("unexpected route: {:?}", other),
        }
        assert_eq!(parser.test("/withdraw/abc"), None);
    }

    #[test]
    fn organization_routes() {
        let parser = create_route_parser();
        assert_eq!(
            parser.test("/orgs/10/rights/4/money_management"),
            Some(Route::OrgRights {
                org_id: OrganizationId::new(10),
                user_id: UserId::new(4),
                capability: Capability::MoneyManagement,
            })
        );
        assert_eq!(parser.test("/orgs/10/rights/4/everything"), None);
        assert_eq!(
            parser.test("/orgs/10/employees/4"),
            Some(Route::OrgEmployee {
                org_id: OrganizationId::new(10),
                user_id: UserId::new(4),
            })
        );
    }

    #[test]
    fn project_and_job_routes() {
        let parser = create_route_parser();
        assert_eq!(
            parser.test("/projects/20/payback"),
            Some(Route::ProjectPayback {
                project_id: ProjectId::new(20)
            })
        );
        assert_eq!(parser.test("/jobs/expired-projects"), Some(Route::ExpiredProjectsJob));
        assert_eq!(parser.test("/healthcheck"), Some(Route::Healthcheck));
    }
}
