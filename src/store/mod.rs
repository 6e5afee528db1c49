//! Usage: Durable state (registry document) and secret blob persistence.

pub mod secrets;
pub mod state;
