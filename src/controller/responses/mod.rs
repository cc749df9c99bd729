//! Response bodies. Amounts leave the service as decimals in major units.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;

use models::*;
use services::payments::PaymentInitiated;
use services::transfers::Balance;

#[derive(Debug, Clone, Serialize)]
pub struct TransferResponse {
    pub ledger_id: TransactionId,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceResponse {
    pub holder: HolderRef,
    pub balance: BigDecimal,
}

impl From<Balance> for BalanceResponse {
    fn from(balance: Balance) -> Self {
        Self {
            holder: balance.holder,
            balance: balance.balance.to_super_unit(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerRecordResponse {
    pub id: TransactionId,
    pub kind: TransferKind,
    pub from: HolderRef,
    pub to: HolderRef,
    pub amount: BigDecimal,
    pub created_at: NaiveDateTime,
    pub cum_sum_of_sender: Option<BigDecimal>,
    pub cum_sum_of_receiver: Option<BigDecimal>,
    pub initiated_by: Option<UserId>,
}

impl From<LedgerRecord> for LedgerRecordResponse {
    fn from(record: LedgerRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            from: record.from,
            to: record.to,
            amount: record.amount.to_super_unit(),
            created_at: record.created_at,
            cum_sum_of_sender: record.cum_sum_of_sender.map(|amount| amount.to_super_unit()),
            cum_sum_of_receiver: record.cum_sum_of_receiver.map(|amount| amount.to_super_unit()),
            initiated_by: record.initiated_by,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvestorResponse {
    pub user_id: UserId,
    pub total_invested: BigDecimal,
}

impl From<Investor> for InvestorResponse {
    fn from(investor: Investor) -> Self {
        Self {
            user_id: investor.user_id,
            total_invested: investor.total_invested.to_super_unit(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectResponse {
    pub id: ProjectId,
    pub name: String,
    pub creator_org_id: OrganizationId,
    pub current_money: BigDecimal,
    pub wanted_money: BigDecimal,
    pub monetization_type: MonetizationType,
    pub is_completed: bool,
    pub is_public: bool,
    pub is_banned: bool,
    pub payback_started: bool,
    pub money_required_to_payback: BigDecimal,
}

impl From<Project> for ProjectResponse {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            name: project.name,
            creator_org_id: project.creator_org_id,
            current_money: project.current_money.to_super_unit(),
            wanted_money: project.wanted_money.to_super_unit(),
            monetization_type: project.monetization_type,
            is_completed: project.is_completed,
            is_public: project.is_public,
            is_banned: project.is_banned,
            payback_started: project.payback_started,
            money_required_to_payback: project.money_required_to_payback.to_super_unit(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentInitResponse {
    pub intent_id: PaymentId,
    pub confirmation_url: Option<String>,
}

impl From<PaymentInitiated> for PaymentInitResponse {
    fn from(initiated: PaymentInitiated) -> Self {
        Self {
            intent_id: initiated.intent_id,
            confirmation_url: initiated.confirmation_url,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentResponse {
    pub id: PaymentId,
    pub entity: HolderRef,
    pub amount: BigDecimal,
    pub status: PaymentStatus,
    pub confirmation_url: Option<String>,
    pub transaction_id: Option<TransactionId>,
    pub created_at: NaiveDateTime,
}

impl From<PaymentIntent> for PaymentResponse {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            id: intent.id,
            entity: intent.entity,
            amount: intent.amount.to_super_unit(),
            status: intent.status,
            confirmation_url: intent.confirmation_url,
            transaction_id: intent.transaction_id,
            created_at: intent.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalInitResponse {
    pub intent_id: WithdrawalId,
    pub status: WithdrawalStatus,
}

impl From<WithdrawalIntent> for WithdrawalInitResponse {
    fn from(intent: WithdrawalIntent) -> Self {
        Self {
            intent_id: intent.id,
            status: intent.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalResponse {
    pub id: WithdrawalId,
    pub entity: HolderRef,
    pub amount: BigDecimal,
    pub destination: String,
    pub status: WithdrawalStatus,
    pub debit_transaction_id: TransactionId,
    pub refund_transaction_id: Option<TransactionId>,
    pub created_at: NaiveDateTime,
}

impl From<WithdrawalIntent> for WithdrawalResponse {
    fn from(intent: WithdrawalIntent) -> Self {
        Self {
            id: intent.id,
            entity: intent.entity,
            amount: intent.amount.to_super_unit(),
            destination: intent.destination,
            status: intent.status,
            debit_transaction_id: intent.debit_transaction_id,
            refund_transaction_id: intent.refund_transaction_id,
            created_at: intent.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RightsCheckResponse {
    pub allowed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub affected: usize,
}
