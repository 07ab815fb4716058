pub mod api;
pub mod automation;
pub mod cdp;
pub mod config;
pub mod error;
pub mod frontier;
pub mod manager;
pub mod provision;
pub mod replay;
pub mod runner;
pub mod store;
pub mod supervisor;
pub mod tab;
pub mod timeouts;
pub mod utils;

pub use config::Config;
pub use error::OrchestratorError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Initializes the global tracing subscriber from `RUST_LOG`, defaulting to
/// `info` for this crate and `warn` elsewhere.
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crawl_orchestrator=info,warn"));

    fmt().with_env_filter(filter).with_target(true).init();
}
