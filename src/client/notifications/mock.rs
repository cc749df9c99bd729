use std::sync::{Arc, Mutex};

use futures::{future, Future};

use super::error::*;
use super::{EmailNotification, NotificationsClient};

/// Records every notification instead of sending it
#[derive(Clone, Default)]
pub struct NotificationsClientMock {
    sent: Arc<Mutex<Vec<EmailNotification>>>,
}

impl NotificationsClientMock {
    pub fn sent(&self) -> Vec<EmailNotification> {
        self.sent.lock().unwrap().clone()
    }
}

impl NotificationsClient for NotificationsClientMock {
    fn send(&self, notification: EmailNotification) -> Box<Future<Item = (), Error = Error> + Send> {
        self.sent.lock().unwrap().push(notification);
        Box::new(future::ok(()))
    }
}
