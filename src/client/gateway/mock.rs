use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::{future, Future};

use super::error::*;
use super::types::*;
use super::GatewayClient;

#[derive(Clone, Default)]
struct State {
    payments: HashMap<String, GatewayPayment>,
    payouts: HashMap<String, GatewayPayout>,
    /// idempotence key -> external id
    keys: HashMap<String, String>,
    payout_requests: Vec<NewPayout>,
    failure: Option<ErrorKind>,
    counter: u32,
}

/// In-memory gateway. Objects are created pending; tests move them to final
/// statuses with `set_payment_status` / `set_payout_status`.
#[derive(Clone, Default)]
pub struct GatewayClientMock {
    state: Arc<Mutex<State>>,
}

impl GatewayClientMock {
    /// Every following call fails with `kind` until `recover` is called
    pub fn fail_with(&self, kind: ErrorKind) {
        self.state.lock().unwrap().failure = Some(kind);
    }

    pub fn recover(&self) {
        self.state.lock().unwrap().failure = None;
    }

    pub fn set_payment_status(&self, external_id: &str, status: GatewayPaymentStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(payment) = state.payments.get_mut(external_id) {
            payment.status = status;
            payment.paid = status == GatewayPaymentStatus::Succeeded;
        }
    }

    pub fn set_payout_status(&self, external_id: &str, status: GatewayPayoutStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(payout) = state.payouts.get_mut(external_id) {
            payout.status = status;
        }
    }

    pub fn payments(&self) -> Vec<GatewayPayment> {
        self.state.lock().unwrap().payments.values().cloned().collect()
    }

    pub fn payout_requests(&self) -> Vec<NewPayout> {
        self.state.lock().unwrap().payout_requests.clone()
    }

    pub fn payout_id_for(&self, idempotence_key: &str) -> Option<String> {
        self.state.lock().unwrap().keys.get(idempotence_key).cloned()
    }

    fn failure(&self) -> Option<Error> {
        self.state.lock().unwrap().failure.clone().map(Error::from)
    }
}

impl GatewayClient for GatewayClientMock {
    fn create_payment(&self, input: NewPayment) -> Box<Future<Item = GatewayPayment, Error = Error> + Send> {
        if let Some(e) = self.failure() {
            return Box::new(future::err(e));
        }

        let mut state = self.state.lock().unwrap();
        if let Some(payment) = state.keys.get(&input.idempotence_key).and_then(|id| state.payments.get(id)).cloned() {
            return Box::new(future::ok(payment));
        }

        state.counter += 1;
        let id = format!("pay-{}", state.counter);
        let payment = GatewayPayment {
            id: id.clone(),
            status: GatewayPaymentStatus::Pending,
            paid: false,
            amount: GatewayAmount::from_amount(input.amount),
            confirmation: Some(ConfirmationResponse {
                type_: "redirect".to_string(),
                confirmation_url: Some(format!("https://gateway.test/confirm/{}", id)),
            }),
        };
        state.keys.insert(input.idempotence_key, id.clone());
        state.payments.insert(id, payment.clone());

        Box::new(future::ok(payment))
    }

    fn get_payment(&self, external_id: String) -> Box<Future<Item = GatewayPayment, Error = Error> + Send> {
        if let Some(e) = self.failure() {
            return Box::new(future::err(e));
        }

        let state = self.state.lock().unwrap();
        match state.payments.get(&external_id) {
            Some(payment) => Box::new(future::ok(payment.clone())),
            None => Box::new(future::err(ErrorKind::NotFound.into())),
        }
    }

    fn create_payout(&self, input: NewPayout) -> Box<Future<Item = GatewayPayout, Error = Error> + Send> {
        let mut state = self.state.lock().unwrap();
        state.payout_requests.push(input.clone());
        if let Some(kind) = state.failure.clone() {
            return Box::new(future::err(kind.into()));
        }

        if let Some(payout) = state.keys.get(&input.idempotence_key).and_then(|id| state.payouts.get(id)).cloned() {
            return Box::new(future::ok(payout));
        }

        state.counter += 1;
        let id = format!("po-{}", state.counter);
        let payout = GatewayPayout {
            id: id.clone(),
            status: GatewayPayoutStatus::Pending,
        };
        state.keys.insert(input.idempotence_key, id.clone());
        state.payouts.insert(id, payout.clone());

        Box::new(future::ok(payout))
    }

    fn get_payout(&self, external_id: String) -> Box<Future<Item = GatewayPayout, Error = Error> + Send> {
        if let Some(e) = self.failure() {
            return Box::new(future::err(e));
        }

        let state = self.state.lock().unwrap();
        match state.payouts.get(&external_id) {
            Some(payout) => Box::new(future::ok(payout.clone())),
            None => Box::new(future::err(ErrorKind::NotFound.into())),
        }
    }
}
