use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::replay::RecordingContext;
use crate::{OrchestratorError, Result};

/// The immutable per-recording context passed to `request_new_browser`
/// (§4.4's `cdata`).
#[derive(Debug, Clone, Serialize)]
pub struct CdataRequest<'a> {
    pub user: &'a str,
    pub coll: &'a str,
    pub rec: &'a str,
    pub browser: &'a str,
    #[serde(rename = "type")]
    pub kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_ts: Option<&'a str>,
}

impl<'a> CdataRequest<'a> {
    pub fn new(ctx: &'a RecordingContext, browser_tag: &'a str, request_ts: Option<&'a str>) -> Self {
        Self {
            user: &ctx.user_name,
            coll: &ctx.collection_name,
            rec: &ctx.recording_id,
            browser: browser_tag,
            kind: "record",
            request_ts,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RequestNewBrowserResponse {
    reqid: String,
}

/// Result of polling `/init_browser`: pending until `cmd_host` appears.
#[derive(Debug, Clone)]
pub struct BrowserInfo {
    pub ip: String,
    pub cmd_host: String,
}

#[derive(Debug, Deserialize)]
struct InitBrowserResponse {
    ip: Option<String>,
    cmd_host: Option<String>,
}

/// One CDP-discoverable tab, as returned by `/json` and `/json/new`.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpTabInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// Client for the external browser-provisioning service (§6, "shepherd").
pub struct ProvisionClient {
    client: Client,
    base_url: String,
}

impl ProvisionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn request_new_browser(&self, cdata: &CdataRequest<'_>) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/request_new_browser", self.base_url))
            .json(cdata)
            .send()
            .await?;
        let parsed: RequestNewBrowserResponse = response.json().await?;
        debug!(reqid = %parsed.reqid, "requested new browser");
        Ok(parsed.reqid)
    }

    /// One poll of `/init_browser`. `Ok(None)` means pending (no `cmd_host`
    /// yet); a malformed body is a hard abort per §7 (transient provisioning
    /// error on JSON parse failure — caller retries on the next tick, this
    /// call itself does not loop).
    pub async fn init_browser(&self, reqid: &str) -> Result<Option<BrowserInfo>> {
        let response = self
            .client
            .get(format!("{}/init_browser", self.base_url))
            .query(&[("reqid", reqid)])
            .send()
            .await?;
        let body: Value = response.json().await.map_err(|e| {
            OrchestratorError::ProvisionFailed(format!("init_browser body for {reqid}: {e}"))
        })?;
        let parsed: InitBrowserResponse = serde_json::from_value(body).map_err(|e| {
            OrchestratorError::ProvisionFailed(format!("init_browser shape for {reqid}: {e}"))
        })?;

        match (parsed.ip, parsed.cmd_host) {
            (Some(ip), Some(cmd_host)) => Ok(Some(BrowserInfo { ip, cmd_host })),
            _ => Ok(None),
        }
    }

    /// `GET http://<ip>:9222/json`, filtered to `type == "page"` tabs.
    pub async fn list_tabs(&self, ip: &str) -> Result<Vec<CdpTabInfo>> {
        let response = self.client.get(format!("http://{ip}:9222/json")).send().await?;
        let tabs: Vec<CdpTabInfo> = response.json().await?;
        Ok(tabs.into_iter().filter(|t| t.kind == "page").collect())
    }

    pub async fn new_tab(&self, ip: &str) -> Result<CdpTabInfo> {
        let response = self.client.get(format!("http://{ip}:9222/json/new")).send().await?;
        let tab: CdpTabInfo = response.json().await?;
        Ok(tab)
    }

    pub async fn delete_browser(&self, reqid: &str) -> Result<()> {
        self.client
            .delete(format!("{}/delete_browser/{reqid}", self.base_url))
            .send()
            .await?;
        Ok(())
    }

    pub async fn delete_all(&self) -> Result<()> {
        self.client.delete(format!("{}/delete_all", self.base_url)).send().await?;
        Ok(())
    }
}
