//! Bodies of incoming requests. Amounts arrive as decimals in major units and are
//! converted to `Amount` here, so the services only ever see whole cents.

use bigdecimal::BigDecimal;
use validator::{ValidationError, ValidationErrors};

use models::*;
use services::payments::InitPayment;
use services::transfers::TransferRequest;
use services::withdrawals::InitWithdrawal;

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequestBody {
    pub from_kind: HolderKind,
    pub from_id: i32,
    pub to_kind: HolderKind,
    pub to_id: i32,
    pub amount: BigDecimal,
    pub kind: TransferKind,
    pub idempotency_key: Option<String>,
}

impl TransferRequestBody {
    pub fn into_request(self) -> Result<TransferRequest, ValidationErrors> {
        Ok(TransferRequest {
            kind: self.kind,
            from: HolderRef::new(self.from_kind, self.from_id),
            to: HolderRef::new(self.to_kind, self.to_id),
            amount: parse_amount(&self.amount)?,
            idempotency_key: self.idempotency_key,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitPaymentRequest {
    pub entity_kind: Option<HolderKind>,
    pub entity_id: Option<i32>,
    pub amount: BigDecimal,
    pub return_url: Option<String>,
}

impl InitPaymentRequest {
    pub fn into_input(self, user_id: Option<UserId>) -> Result<InitPayment, ValidationErrors> {
        Ok(InitPayment {
            entity: entity(self.entity_kind, self.entity_id, user_id)?,
            amount: parse_amount(&self.amount)?,
            return_url: self.return_url,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitWithdrawalRequest {
    pub entity_kind: Option<HolderKind>,
    pub entity_id: Option<i32>,
    pub amount: BigDecimal,
    pub destination: String,
}

impl InitWithdrawalRequest {
    pub fn into_input(self, user_id: Option<UserId>) -> Result<InitWithdrawal, ValidationErrors> {
        Ok(InitWithdrawal {
            entity: entity(self.entity_kind, self.entity_id, user_id)?,
            amount: parse_amount(&self.amount)?,
            destination: self.destination,
        })
    }
}

/// Offset and limit of a history page, from the query string
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageQuery {
    pub offset: i64,
    pub limit: i64,
}

impl PageQuery {
    pub fn parse(query: Option<&str>) -> Result<Self, ValidationErrors> {
        let params = ::http::request_util::parse_query(query);
        let offset = page_param(params.get("offset"), "offset", 0)?;
        let limit = page_param(params.get("limit"), "limit", DEFAULT_HISTORY_LIMIT)?;
        Ok(Self { offset, limit })
    }
}

fn page_param(value: Option<&String>, field: &'static str, default: i64) -> Result<i64, ValidationErrors> {
    match value {
        None => Ok(default),
        Some(value) => match value.parse::<i64>() {
            Ok(number) if number >= 0 => Ok(number),
            _ => Err(validation_error(field, "not_a_count", format!("{} must be a non-negative integer", field))),
        },
    }
}

/// Entity kind defaults to the caller's own wallet
fn entity(kind: Option<HolderKind>, id: Option<i32>, user_id: Option<UserId>) -> Result<HolderRef, ValidationErrors> {
    match (kind.unwrap_or(HolderKind::User), id) {
        (HolderKind::External, _) => Err(validation_error(
            "entity_kind",
            "not_a_wallet",
            "payments are made for users and organizations".to_string(),
        )),
        (kind, Some(id)) => Ok(HolderRef::new(kind, id)),
        (HolderKind::User, None) => match user_id {
            Some(user_id) => Ok(HolderRef::user(user_id)),
            None => Err(validation_error("entity_id", "required", "entity_id is required".to_string())),
        },
        (_, None) => Err(validation_error("entity_id", "required", "entity_id is required".to_string())),
    }
}

fn parse_amount(value: &BigDecimal) -> Result<Amount, ValidationErrors> {
    Amount::from_super_unit_exact(value).map_err(|e| validation_error("amount", "invalid_amount", format!("{}: {}", value, e)))
}

fn validation_error(field: &'static str, code: &'static str, message: String) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    errors.add(field, error);
    errors
}
