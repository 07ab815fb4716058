use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::cdp::CdpClient;
use crate::provision::{CdataRequest, ProvisionClient};
use crate::replay::{RecordingContext, RecordingHandle, ReplayClient};
use crate::store::Store;
use crate::store::redis_store::browser_poll_interval;
use crate::Result;
use crate::tab::TabDriver;

/// Immutable per-recording context a browser supervisor needs to provision
/// browsers and construct tab drivers (§4.4's `cdata`, compiled once by the
/// runner and shared down).
#[derive(Clone)]
pub struct SupervisorContext {
    pub auto_id: String,
    pub browser_tag: String,
    pub num_tabs: u32,
    pub scopes: Vec<Regex>,
    pub autoscroll: bool,
    pub rec_ctx: RecordingContext,
    pub request_ts: Option<String>,
}

/// Owns one provisioned browser and all its tabs (C3). Subscribes to the
/// browser's inbound pub/sub channel and routes `autoscroll_resp` messages
/// back to the tab whose current URL matches.
pub struct BrowserSupervisor {
    pub reqid: String,
    ctx: SupervisorContext,
    store: Arc<dyn Store>,
    provisioner: Arc<ProvisionClient>,
    tabs: Vec<Arc<TabDriver>>,
    tab_tasks: Mutex<Vec<JoinHandle<()>>>,
    pubsub_task: Mutex<Option<JoinHandle<()>>>,
    alive: Arc<AtomicBool>,
}

impl BrowserSupervisor {
    /// Provision protocol (§4.3 steps 1-5): request a fresh browser, poll
    /// until ready, open `num_tabs` CDP tabs, and start driving them.
    pub async fn provision(
        store: Arc<dyn Store>,
        provisioner: Arc<ProvisionClient>,
        replay: Arc<ReplayClient>,
        recording: Arc<dyn RecordingHandle>,
        ctx: SupervisorContext,
    ) -> Result<Self> {
        let cdata = CdataRequest::new(&ctx.rec_ctx, &ctx.browser_tag, ctx.request_ts.as_deref());
        let reqid = provisioner.request_new_browser(&cdata).await?;

        let info = loop {
            if let Some(info) = provisioner.init_browser(&reqid).await? {
                break info;
            }
            sleep(browser_poll_interval()).await;
        };

        let mut cdp_tabs = loop {
            let tabs = provisioner.list_tabs(&info.ip).await?;
            if !tabs.is_empty() {
                break tabs;
            }
            sleep(browser_poll_interval()).await;
        };

        while (cdp_tabs.len() as u32) < ctx.num_tabs {
            cdp_tabs.push(provisioner.new_tab(&info.ip).await?);
        }
        cdp_tabs.truncate(ctx.num_tabs as usize);

        info!(reqid, ip = %info.ip, tabs = cdp_tabs.len(), "provisioned browser");

        Self::from_tabs(store, provisioner, replay, recording, ctx, reqid, cdp_tabs).await
    }

    /// Reconnect path (§4.3, crash recovery across controller restarts):
    /// probes the existing browser; `Ok(None)` means the caller should drop
    /// `reqid` from B(A) and provision a fresh one instead.
    pub async fn adopt(
        store: Arc<dyn Store>,
        provisioner: Arc<ProvisionClient>,
        replay: Arc<ReplayClient>,
        recording: Arc<dyn RecordingHandle>,
        ctx: SupervisorContext,
        reqid: String,
    ) -> Result<Option<Self>> {
        let info = match provisioner.init_browser(&reqid).await? {
            Some(info) => info,
            None => return Ok(None),
        };

        let cdp_tabs = provisioner.list_tabs(&info.ip).await?;
        if cdp_tabs.is_empty() {
            return Ok(None);
        }

        Self::from_tabs(store, provisioner, replay, recording, ctx, reqid, cdp_tabs)
            .await
            .map(Some)
    }

    async fn from_tabs(
        store: Arc<dyn Store>,
        provisioner: Arc<ProvisionClient>,
        replay: Arc<ReplayClient>,
        recording: Arc<dyn RecordingHandle>,
        ctx: SupervisorContext,
        reqid: String,
        cdp_tabs: Vec<crate::provision::CdpTabInfo>,
    ) -> Result<Self> {
        store.browsers_add(&ctx.auto_id, &reqid).await?;

        let mut tabs = Vec::with_capacity(cdp_tabs.len());
        for tab_info in &cdp_tabs {
            let cdp = Arc::new(CdpClient::connect(&tab_info.web_socket_debugger_url).await?);
            let tab = Arc::new(TabDriver::new(
                ctx.auto_id.clone(),
                reqid.clone(),
                tab_info.id.clone(),
                ctx.browser_tag.clone(),
                cdp,
                store.clone(),
                replay.clone(),
                recording.clone(),
                ctx.rec_ctx.clone(),
                ctx.scopes.clone(),
                ctx.autoscroll,
            ));
            tabs.push(tab);
        }

        let mut tab_tasks = Vec::with_capacity(tabs.len());
        for tab in &tabs {
            let tab = tab.clone();
            tab_tasks.push(tokio::spawn(async move { tab.run().await }));
        }

        let inbound_channel = format!("from_cbr_ps:{reqid}");
        let receiver = store.subscribe(&inbound_channel).await?;
        let alive = Arc::new(AtomicBool::new(true));
        let pubsub_task = spawn_pubsub_listener(receiver, tabs.clone(), store.clone(), ctx.auto_id.clone(), reqid.clone(), alive.clone());

        Ok(Self {
            reqid,
            ctx,
            store,
            provisioner,
            tabs,
            tab_tasks: Mutex::new(tab_tasks),
            pubsub_task: Mutex::new(Some(pubsub_task)),
            alive,
        })
    }

    /// True while at least one tab is still driving navigations and the
    /// pub/sub subscription hasn't errored out. The runner reinitializes
    /// the whole supervisor once this goes false.
    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.tabs.iter().any(|t| t.is_running())
    }

    pub fn num_tabs(&self) -> usize {
        self.tabs.len()
    }

    /// Closes every tab WebSocket, unsubscribes pub/sub, releases the
    /// browser back to the provisioning service, and removes `reqid` from
    /// B(A) (§4.3 Teardown).
    pub async fn teardown(&self) {
        for task in self.tab_tasks.lock().await.drain(..) {
            task.abort();
        }
        for tab in &self.tabs {
            tab.close_cdp().await;
        }
        if let Some(task) = self.pubsub_task.lock().await.take() {
            task.abort();
        }
        if let Err(err) = self.provisioner.delete_browser(&self.reqid).await {
            warn!(reqid = %self.reqid, %err, "failed to release browser from provisioner");
        }
        let _ = self.store.browsers_remove(&self.ctx.auto_id, &self.reqid).await;
        let _ = self.store.tabs_delete(&self.ctx.auto_id, &self.reqid).await;
    }
}

fn spawn_pubsub_listener(
    mut receiver: tokio::sync::mpsc::Receiver<String>,
    tabs: Vec<Arc<TabDriver>>,
    store: Arc<dyn Store>,
    auto_id: String,
    reqid: String,
    alive: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = receiver.recv().await {
            let Ok(value): std::result::Result<Value, _> = serde_json::from_str(&payload) else {
                warn!(reqid, "unparseable pub/sub message, ignoring");
                continue;
            };
            let ws_type = value.get("ws_type").and_then(Value::as_str).unwrap_or("");
            match ws_type {
                "remote_url" => {
                    // Informational (§4.3); no action.
                }
                "autoscroll_resp" => {
                    let Some(url) = value.get("url").and_then(Value::as_str) else {
                        continue;
                    };
                    if let Some(tab) = find_tab_by_url(&tabs, &store, &auto_id, &reqid, url).await {
                        tab.resume_autoscroll().await;
                    }
                }
                other => {
                    warn!(reqid, ws_type = other, "unrecognized pub/sub message type");
                }
            }
        }
        // Channel closed: the underlying subscription died, which the next
        // tick's reconcile should treat as a dead browser.
        alive.store(false, Ordering::SeqCst);
    })
}

/// Matches an `autoscroll_resp` by URL against each tab's current URL
/// (§5 ordering guarantees: ties broken by scan order).
async fn find_tab_by_url(
    tabs: &[Arc<TabDriver>],
    store: &Arc<dyn Store>,
    auto_id: &str,
    reqid: &str,
    url: &str,
) -> Option<Arc<TabDriver>> {
    let current = store.tab_members(auto_id, reqid).await.ok()?;
    tabs.iter()
        .find(|tab| current.get(tab.tab_id()).map(String::as_str) == Some(url))
        .cloned()
}
