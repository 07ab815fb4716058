use crate::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub provisioner: ProvisionerConfig,
    #[serde(default)]
    pub warcserver: WarcserverConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_key_prefix() -> String {
    "a".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisionerConfig {
    #[serde(default = "default_provisioner_base_url")]
    pub base_url: String,
    #[serde(default = "default_browser_poll_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            base_url: default_provisioner_base_url(),
            poll_interval_ms: default_browser_poll_ms(),
        }
    }
}

fn default_provisioner_base_url() -> String {
    "http://shepherd:9020".to_string()
}

fn default_browser_poll_ms() -> u64 {
    crate::timeouts::ms::BROWSER_POLL
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarcserverConfig {
    #[serde(default = "default_warcserver_base_url")]
    pub base_url: String,
}

impl Default for WarcserverConfig {
    fn default() -> Self {
        Self {
            base_url: default_warcserver_base_url(),
        }
    }
}

fn default_warcserver_base_url() -> String {
    "http://warcserver:8070".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlConfig {
    #[serde(default = "default_max_browsers")]
    pub default_max_browsers: u32,
    #[serde(default = "default_num_tabs")]
    pub default_num_tabs: u32,
    #[serde(default = "default_hops")]
    pub default_hops: u32,
    #[serde(default = "default_tick_secs")]
    pub manager_tick_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            default_max_browsers: default_max_browsers(),
            default_num_tabs: default_num_tabs(),
            default_hops: default_hops(),
            manager_tick_secs: default_tick_secs(),
        }
    }
}

fn default_max_browsers() -> u32 {
    2
}
fn default_num_tabs() -> u32 {
    1
}
fn default_hops() -> u32 {
    0
}
fn default_tick_secs() -> u64 {
    crate::timeouts::secs::MANAGER_TICK
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

pub fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join("crawl-orchestrator"))
        .ok_or_else(|| OrchestratorError::Config("could not determine config directory".into()))
}

impl Config {
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::default();

        let resolved_path = match path {
            Some(p) => Some(p.clone()),
            None => default_config_dir().ok().map(|d| d.join("config.toml")),
        };

        if let Some(path) = resolved_path
            && path.exists()
        {
            let content = std::fs::read_to_string(&path)?;
            config = toml::from_str(&content)?;
        }

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    fn load_from_env(&mut self) {
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.store.redis_url = url;
        }
        if let Ok(url) = std::env::var("SHEPHERD_URL") {
            self.provisioner.base_url = url;
        }
        if let Ok(url) = std::env::var("WARCSERVER_URL") {
            self.warcserver.base_url = url;
        }
        if let Ok(addr) = std::env::var("ORCHESTRATOR_BIND_ADDR") {
            self.server.bind_addr = addr;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.crawl.default_max_browsers == 0 {
            return Err(OrchestratorError::Config(
                "crawl.default_max_browsers must be >= 1".into(),
            ));
        }
        if self.crawl.default_num_tabs == 0 {
            return Err(OrchestratorError::Config(
                "crawl.default_num_tabs must be >= 1".into(),
            ));
        }
        if self.store.redis_url.is_empty() {
            return Err(OrchestratorError::Config(
                "store.redis_url must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn show(&self) -> String {
        format!(
            r#"Store:
  Redis URL: {}
  Key prefix: {}

Provisioner:
  Base URL: {}
  Poll interval: {}ms

Warcserver:
  Base URL: {}

Crawl defaults:
  max_browsers: {}
  num_tabs: {}
  hops: {}
  manager tick: {}s

Server:
  Bind address: {}
"#,
            self.store.redis_url,
            self.store.key_prefix,
            self.provisioner.base_url,
            self.provisioner.poll_interval_ms,
            self.warcserver.base_url,
            self.crawl.default_max_browsers,
            self.crawl.default_num_tabs,
            self.crawl.default_hops,
            self.crawl.manager_tick_secs,
            self.server.bind_addr,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.crawl.default_max_browsers, 2);
        assert_eq!(config.crawl.default_num_tabs, 1);
        assert_eq!(config.crawl.default_hops, 0);
        assert_eq!(config.crawl.manager_tick_secs, 10);
    }

    #[test]
    fn test_config_validate_invalid_max_browsers() {
        let mut config = Config::default();
        config.crawl.default_max_browsers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[store]"));
        assert!(toml_str.contains("[crawl]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.crawl.default_max_browsers, config.crawl.default_max_browsers);
    }
}
