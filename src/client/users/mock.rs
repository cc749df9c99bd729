use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::{future, Future};

use super::error::*;
use super::UsersClient;
use models::UserId;

/// Answers `user{id}@example.com` unless an address was registered for the user
#[derive(Clone, Default)]
pub struct UsersClientMock {
    emails: Arc<Mutex<HashMap<UserId, String>>>,
}

impl UsersClientMock {
    pub fn with_email(self, user_id: UserId, email: &str) -> Self {
        self.emails.lock().unwrap().insert(user_id, email.to_string());
        self
    }
}

impl UsersClient for UsersClientMock {
    fn get_email(&self, user_id: UserId) -> Box<Future<Item = String, Error = Error> + Send> {
        let email = self
            .emails
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| format!("user{}@example.com", user_id));
        Box::new(future::ok(email))
    }
}
