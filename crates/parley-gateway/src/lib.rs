pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod signaling;

pub use auth::Identity;
pub use dispatcher::{Delivery, Dispatcher, Exclude, Session};
pub use error::GatewayError;
