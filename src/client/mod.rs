//! Clients of the services this one talks to over http: the payment gateway,
//! the user service (emails) and the notification service.

pub mod gateway;
pub mod notifications;
pub mod users;
