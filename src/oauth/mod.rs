//! Usage: Browser-based OAuth login: PKCE, provider table, token grants,
//! and the in-memory session engine.

pub mod pkce;
pub mod providers;
pub mod service;
pub mod token_exchange;
