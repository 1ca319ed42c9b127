//! Access tokens and handshake authentication helpers

pub mod guard;
pub mod token;

// Re-export main components
pub use guard::{constant_time_eq, extract_token, AuthTimer};
pub use token::{Claims, TokenManager};
