//! HTTP request handlers.

mod health;
mod messages;
mod session;

pub use health::health;
pub use messages::send;
pub use session::{logout, qr, status};
