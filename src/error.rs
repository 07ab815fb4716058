use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("store error: {0}")]
    Store(String),

    #[error("automation not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid property: {0}")]
    InvalidProperty(String),

    #[error("provisioning failed: {0}")]
    ProvisionFailed(String),

    #[error("browser connection lost for reqid {0}")]
    BrowserLost(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("recording is not open")]
    RecordingClosed,

    #[error("admin privileges required")]
    Forbidden,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("invalid regex pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("general error: {0}")]
    General(String),
}

impl OrchestratorError {
    /// Maps an error to whether the next manager tick should be allowed to
    /// retry the operation, per the transient/terminal split in spec §7.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProvisionFailed(_) | Self::BrowserLost(_) | Self::Cdp(_) | Self::Navigation(_)
        )
    }
}
