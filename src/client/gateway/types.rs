use std::collections::HashMap;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use failure::Fail;

use super::error::*;
use models::Amount;

pub const CURRENCY: &str = "RUB";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayAmount {
    pub value: String,
    pub currency: String,
}

impl GatewayAmount {
    pub fn from_amount(amount: Amount) -> Self {
        GatewayAmount {
            value: amount.to_string(),
            currency: CURRENCY.to_string(),
        }
    }

    pub fn to_amount(&self) -> Result<Amount, Error> {
        let decimal = BigDecimal::from_str(&self.value).map_err(ectx!(try ErrorSource::BigDecimal, ErrorKind::Internal => self.value))?;
        Amount::from_super_unit_exact(&decimal).map_err(|e| ectx!(err e, ErrorKind::Internal => self.value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    #[serde(rename = "type")]
    pub type_: String,
    pub return_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePaymentRequest {
    pub amount: GatewayAmount,
    pub capture: bool,
    pub confirmation: ConfirmationRequest,
    pub description: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePayoutRequest {
    pub amount: GatewayAmount,
    pub description: String,
    pub payout_token: String,
    pub metadata: HashMap<String, String>,
}

/// Input of `create_payment`
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub idempotence_key: String,
    pub amount: Amount,
    pub description: String,
    pub return_url: String,
    pub metadata: HashMap<String, String>,
}

/// Input of `create_payout`
#[derive(Debug, Clone)]
pub struct NewPayout {
    pub idempotence_key: String,
    pub amount: Amount,
    pub description: String,
    pub destination: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Pending,
    WaitingForCapture,
    Succeeded,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPayoutStatus {
    Pending,
    Succeeded,
    Canceled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    #[serde(rename = "type")]
    pub type_: String,
    pub confirmation_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    pub status: GatewayPaymentStatus,
    #[serde(default)]
    pub paid: bool,
    pub amount: GatewayAmount,
    pub confirmation: Option<ConfirmationResponse>,
}

impl GatewayPayment {
    pub fn confirmation_url(&self) -> Option<String> {
        self.confirmation.as_ref().and_then(|c| c.confirmation_url.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayout {
    pub id: String,
    pub status: GatewayPayoutStatus,
}

/// Object carried by a webhook notification. Only the id and status are relied on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationObject {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEvent {
    PaymentSucceeded,
    PaymentCanceled,
    PayoutSucceeded,
    PayoutFailed,
    Other,
}

impl<'a> From<&'a str> for NotificationEvent {
    fn from(event: &'a str) -> Self {
        match event {
            "payment.succeeded" => NotificationEvent::PaymentSucceeded,
            "payment.canceled" => NotificationEvent::PaymentCanceled,
            "payout.succeeded" => NotificationEvent::PayoutSucceeded,
            "payout.canceled" | "payout.failed" => NotificationEvent::PayoutFailed,
            _ => NotificationEvent::Other,
        }
    }
}

/// Webhook body posted by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub type_: String,
    pub event: String,
    pub object: NotificationObject,
}

impl Notification {
    pub fn event(&self) -> NotificationEvent {
        NotificationEvent::from(self.event.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[test]
    fn amounts_use_two_decimals() {
        let amount = GatewayAmount::from_amount(Amount::new(12345));
        assert_eq!(amount.value, "123.45");
        assert_eq!(amount.currency, "RUB");
        assert_eq!(amount.to_amount().unwrap(), Amount::new(12345));
    }

    #[test]
    fn parses_payment_response() {
        let body = r#"{
            "id": "22e12f66-000f-5000-8000-18db351245c7",
            "status": "pending",
            "paid": false,
            "amount": {"value": "2.00", "currency": "RUB"},
            "confirmation": {"type": "redirect", "confirmation_url": "https://gateway.test/confirm"},
            "created_at": "2018-07-18T10:51:18.139Z"
        }"#;
        let payment: GatewayPayment = serde_json::from_str(body).unwrap();
        assert_eq!(payment.status, GatewayPaymentStatus::Pending);
        assert_eq!(payment.confirmation_url(), Some("https://gateway.test/confirm".to_string()));
        assert_eq!(payment.amount.to_amount().unwrap(), Amount::new(200));
    }

    #[test]
    fn classifies_webhook_events() {
        let body = r#"{"type":"notification","event":"payout.canceled","object":{"id":"po-1","status":"canceled"}}"#;
        let notification: Notification = serde_json::from_str(body).unwrap();
        assert_eq!(notification.event(), NotificationEvent::PayoutFailed);
        assert_eq!(NotificationEvent::from("refund.succeeded"), NotificationEvent::Other);
    }
}
