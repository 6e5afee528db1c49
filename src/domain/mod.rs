//! Usage: Domain model types shared by storage, manager and API layers.

pub mod accounts;
