//! Payback arithmetic: how much each investor is owed when a project closes.
//!
//! Accrual counts whole days since the investment, `floor(hours / 24)`, and rounds
//! each investment's accrued percent half-to-even to cents before summing.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use models::{Amount, MonetizationType, Percent, Project, ProjectId, TransactionId, UserId};
use schema::investor_paybacks;

/// One `user_to_project` ledger record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Investment {
    pub user_id: UserId,
    pub amount: Amount,
    pub created_at: NaiveDateTime,
}

/// Investments of one user in one project, aggregated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Investor {
    pub user_id: UserId,
    pub total_invested: Amount,
}

/// Mark written together with the `project_to_user` record that paid the investor.
#[derive(Debug, Clone, Serialize, Queryable, Insertable)]
#[table_name = "investor_paybacks"]
pub struct InvestorPayback {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Expired,
    GoalReached,
    Payback,
}

#[derive(Debug, Clone, PartialEq, Eq, Fail)]
pub enum PaybackError {
    #[fail(display = "payback is not supported for projects without monetization")]
    NotSupported,
    #[fail(display = "payback amount overflow")]
    Overflow,
}

pub fn days_between(from: NaiveDateTime, to: NaiveDateTime) -> u64 {
    let hours = to.signed_duration_since(from).num_hours();
    if hours <= 0 {
        0
    } else {
        (hours / 24) as u64
    }
}

pub fn accrued(investment: &Investment, percent: Percent, now: NaiveDateTime) -> Option<Amount> {
    investment.amount.percent_of(percent, days_between(investment.created_at, now))
}

/// Total accrued (percent only, no principal) over the given investments.
pub fn required_to_payback(investments: &[Investment], percent: Percent, now: NaiveDateTime) -> Result<Amount, PaybackError> {
    investments.iter().try_fold(Amount::zero(), |acc, investment| {
        accrued(investment, percent, now)
            .and_then(|accrued| acc.checked_add(accrued))
            .ok_or(PaybackError::Overflow)
    })
}

/// What one investor is owed. Principal and accrual are kept apart so a short
/// escrow returns principal before any percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owed {
    pub user_id: UserId,
    pub principal: Amount,
    pub accrual: Amount,
}

impl Owed {
    pub fn amount(&self) -> Option<Amount> {
        self.principal.checked_add(self.accrual)
    }

    /// Deducts what the project already paid this investor, accrual first.
    pub fn less_paid(self, paid: Amount) -> Self {
        let from_accrual = self.accrual.min(paid);
        let from_principal = paid.checked_sub(from_accrual).unwrap_or_else(Amount::zero);
        Owed {
            user_id: self.user_id,
            principal: self.principal.checked_sub(from_principal).unwrap_or_else(Amount::zero),
            accrual: self.accrual.checked_sub(from_accrual).unwrap_or_else(Amount::zero),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.principal.is_zero() && self.accrual.is_zero()
    }
}

/// Amounts owed when a project expires: principal, plus accrual for time-percent projects.
pub fn owed_on_expiry(project: &Project, investments: &[Investment], now: NaiveDateTime) -> Result<Vec<Owed>, PaybackError> {
    owed_by_user(investments, |investment| match project.monetization_type {
        MonetizationType::None | MonetizationType::OneTimePercent => Some(Amount::zero()),
        MonetizationType::TimePercent => accrued(investment, project.percent, now),
    })
}

/// Amounts owed when the organization starts payback.
pub fn owed_on_payback(project: &Project, investments: &[Investment], now: NaiveDateTime) -> Result<Vec<Owed>, PaybackError> {
    match project.monetization_type {
        MonetizationType::None => Err(PaybackError::NotSupported),
        MonetizationType::OneTimePercent => owed_by_user(investments, |investment| investment.amount.percent_of(project.percent, 1)),
        MonetizationType::TimePercent => owed_by_user(investments, |investment| accrued(investment, project.percent, now)),
    }
}

/// Splits `available` between investors. Principal is paid first, in user-id order,
/// then accrual in the same order. Investors left with nothing are dropped.
pub fn allocate(owed: &[Owed], available: Amount) -> Vec<(UserId, Amount)> {
    let mut remaining = available;
    let mut take = |amount: Amount| {
        let paid = amount.min(remaining);
        remaining = remaining.checked_sub(paid).unwrap_or_else(Amount::zero);
        paid
    };

    let principal: Vec<Amount> = owed.iter().map(|o| take(o.principal)).collect();
    let accrual: Vec<Amount> = owed.iter().map(|o| take(o.accrual)).collect();

    owed.iter()
        .zip(principal.into_iter().zip(accrual))
        .filter_map(|(o, (principal, accrual))| {
            // both parts were cut from `available`, the sum fits
            let paid = principal.checked_add(accrual).unwrap_or(principal);
            if paid.is_zero() {
                None
            } else {
                Some((o.user_id, paid))
            }
        })
        .collect()
}

pub fn total(owed: &[Owed]) -> Option<Amount> {
    owed.iter().try_fold(Amount::zero(), |acc, o| o.amount().and_then(|amount| acc.checked_add(amount)))
}

fn owed_by_user<F>(investments: &[Investment], accrual_of: F) -> Result<Vec<Owed>, PaybackError>
where
    F: Fn(&Investment) -> Option<Amount>,
{
    let mut by_user: BTreeMap<UserId, Owed> = BTreeMap::new();
    for investment in investments {
        let accrual = accrual_of(investment).ok_or(PaybackError::Overflow)?;
        let entry = by_user.entry(investment.user_id).or_insert(Owed {
            user_id: investment.user_id,
            principal: Amount::zero(),
            accrual: Amount::zero(),
        });
        entry.principal = entry.principal.checked_add(investment.amount).ok_or(PaybackError::Overflow)?;
        entry.accrual = entry.accrual.checked_add(accrual).ok_or(PaybackError::Overflow)?;
    }
    Ok(by_user.into_iter().map(|(_, owed)| owed).collect())
}
