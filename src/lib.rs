//! credgate: credential lifecycle service.
//!
//! Library crate shared by the `credgate` binary and the integration tests in `tests/`.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod service;
pub mod store;
pub mod token;
pub mod vault;

use service::CredentialService;

/// Shared application state passed to handlers.
pub struct AppState {
    pub service: CredentialService,
    pub config: config::Config,
}
