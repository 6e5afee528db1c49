//! Local daemon that multiplexes several codex accounts across one shared
//! CLI credential file: durable account registry, encrypted secret blobs,
//! browser OAuth login, upstream quota polling, and automatic rotation when
//! the upstream reports quota or rate-limit errors.

pub mod auth;
pub mod core;
pub mod domain;
pub mod oauth;
pub mod quota;
pub mod server;
pub mod shared;
pub mod store;
