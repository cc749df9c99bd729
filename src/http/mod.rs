//! Hyper 0.11 glue shared by the controller and the outgoing clients:
//! `Application` wraps a `Controller` into a hyper `Service`, `Client` runs
//! outgoing requests on the reactor and hands out `ClientHandle`s, `RouteParser`
//! maps paths to routes.

pub mod client;
pub mod controller;
pub mod errors;
pub mod request_util;
pub mod router;

pub use self::client::{Client, ClientHandle, ClientResponse, HttpClient};
pub use self::controller::{Application, Controller, ControllerFuture};
pub use self::errors::{Codeable, PayloadCarrier};
pub use self::router::RouteParser;
