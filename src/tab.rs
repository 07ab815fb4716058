use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use crate::cdp::CdpClient;
use crate::frontier::{Frontier, UrlRequest};
use crate::replay::{RecordingContext, RecordingHandle, ReplayClient};
use crate::store::Store;
use crate::utils;
use crate::{OrchestratorError, Result};

/// One tab driver owns one CDP WebSocket to one browser tab (C2). Runs the
/// navigation loop of §4.2 until a terminal failure; the browser supervisor
/// (C3) notices via [`TabDriver::is_running`] and replaces it.
pub struct TabDriver {
    auto_id: String,
    reqid: String,
    tab_id: String,
    browser_tag: String,
    cdp: Arc<CdpClient>,
    frontier: Frontier,
    replay: Arc<ReplayClient>,
    recording: Arc<dyn RecordingHandle>,
    rec_ctx: RecordingContext,
    scopes: Vec<Regex>,
    store: Arc<dyn Store>,
    autoscroll: bool,
    running: Arc<AtomicBool>,
    autoscroll_waiter: Mutex<Option<oneshot::Sender<()>>>,
}

impl TabDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        auto_id: impl Into<String>,
        reqid: impl Into<String>,
        tab_id: impl Into<String>,
        browser_tag: impl Into<String>,
        cdp: Arc<CdpClient>,
        store: Arc<dyn Store>,
        replay: Arc<ReplayClient>,
        recording: Arc<dyn RecordingHandle>,
        rec_ctx: RecordingContext,
        scopes: Vec<Regex>,
        autoscroll: bool,
    ) -> Self {
        let auto_id = auto_id.into();
        Self {
            frontier: Frontier::new(store.clone(), auto_id.clone()),
            auto_id,
            reqid: reqid.into(),
            tab_id: tab_id.into(),
            browser_tag: browser_tag.into(),
            cdp,
            replay,
            recording,
            rec_ctx,
            scopes,
            store,
            autoscroll,
            running: Arc::new(AtomicBool::new(true)),
            autoscroll_waiter: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Closes this tab's CDP WebSocket (§4.3 Teardown). Called by the
    /// browser supervisor after aborting the tab's `run()` task.
    pub async fn close_cdp(&self) {
        self.cdp.close().await;
    }

    /// Called by the browser supervisor when an `autoscroll_resp` pub/sub
    /// message correlates to this tab's current URL (§4.3).
    pub async fn resume_autoscroll(&self) {
        if let Some(tx) = self.autoscroll_waiter.lock().await.take() {
            let _ = tx.send(());
        }
    }

    /// Runs the navigation loop until a terminal failure. Returns once
    /// `running` goes false; the caller (supervisor) owns replacement.
    pub async fn run(self: Arc<Self>) {
        loop {
            if !self.is_running() {
                return;
            }
            let req = match self.frontier.pop_blocking().await {
                Ok(req) => req,
                Err(err) => {
                    warn!(auto_id = %self.auto_id, %err, "frontier pop failed, stopping tab");
                    self.running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            match self.visit(req).await {
                Ok(()) => continue,
                Err(TabOutcome::Terminal) => return,
            }
        }
    }

    async fn should_visit(&self, url: &str) -> Result<bool> {
        if self.replay.already_recorded(&self.rec_ctx, url).await? {
            return Ok(false);
        }
        Ok(utils::in_scope(url, &self.scopes))
    }

    async fn visit(&self, req: UrlRequest) -> std::result::Result<(), TabOutcome> {
        let url = utils::strip_fragment(&req.url);

        match self.should_visit(&url).await {
            Ok(false) => return Ok(()),
            Ok(true) => {}
            Err(err) => {
                warn!(%err, url, "should_visit check failed, skipping");
                return Ok(());
            }
        }

        let hops = req.hops.unwrap_or(0);
        let _ = self.store.tab_set(&self.auto_id, &self.reqid, &self.tab_id, &url).await;

        let navigate = self.cdp.call("Page.navigate", serde_json::json!({ "url": url })).await;
        let frame_id = match navigate {
            Ok(result) => result.get("frameId").and_then(Value::as_str).map(str::to_string),
            Err(err) => {
                warn!(%err, url, "Page.navigate send failed, requeueing");
                let _ = self.frontier.requeue_front(UrlRequest::new(url, req.hops)).await;
                self.running.store(false, Ordering::SeqCst);
                return Err(TabOutcome::Terminal);
            }
        };

        let Some(frame_id) = frame_id else {
            warn!(url, "Page.navigate returned no frameId, treating as handler error");
            return Ok(());
        };

        let mime = match self.wait_for_frame_navigated(&frame_id).await {
            Ok(mime) => mime,
            Err(err) => {
                warn!(%err, url, "lost connection waiting for frameNavigated");
                self.running.store(false, Ordering::SeqCst);
                return Err(TabOutcome::Terminal);
            }
        };

        if mime != "text/html" {
            let ts = utils::warc_timestamp_now();
            if let Err(err) = self.recording.add_page(&url, &url, &ts, &self.browser_tag).await {
                warn!(%err, url, "add_page failed for non-HTML response");
            }
        }

        if let Err(err) = self.wait_for_frame_stopped_loading(&frame_id).await {
            warn!(%err, url, "lost connection waiting for frameStoppedLoading");
            self.running.store(false, Ordering::SeqCst);
            return Err(TabOutcome::Terminal);
        }

        if mime != "text/html" {
            self.finish_navigation().await;
            return Ok(());
        }

        if self.autoscroll && let Err(err) = self.request_autoscroll(&url).await {
            warn!(%err, url, "autoscroll request failed, continuing without it");
        }

        if hops > 0
            && let Err(err) = self.extract_links(hops).await
        {
            warn!(%err, url, "link extraction failed");
        }

        self.finish_navigation().await;
        Ok(())
    }

    async fn finish_navigation(&self) {
        let _ = self.store.tab_clear(&self.auto_id, &self.reqid, &self.tab_id).await;
    }

    async fn wait_for_frame_navigated(&self, frame_id: &str) -> Result<String> {
        let mut events = self.cdp.subscribe();
        loop {
            let event = events
                .recv()
                .await
                .map_err(|_| OrchestratorError::Cdp("CDP event stream closed".into()))?;
            if event.method != "Page.frameNavigated" {
                continue;
            }
            let Some(frame) = event.params.get("frame") else {
                debug!("frameNavigated event missing frame field, ignoring");
                continue;
            };
            if frame.get("id").and_then(Value::as_str) != Some(frame_id) {
                continue;
            }
            let mime = frame
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("text/html")
                .to_string();
            return Ok(mime);
        }
    }

    async fn wait_for_frame_stopped_loading(&self, frame_id: &str) -> Result<()> {
        let mut events = self.cdp.subscribe();
        loop {
            let event = events
                .recv()
                .await
                .map_err(|_| OrchestratorError::Cdp("CDP event stream closed".into()))?;
            if event.method != "Page.frameStoppedLoading" {
                continue;
            }
            if event.params.get("frameId").and_then(Value::as_str) == Some(frame_id) {
                return Ok(());
            }
        }
    }

    async fn request_autoscroll(&self, url: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        *self.autoscroll_waiter.lock().await = Some(tx);

        let channel = format!("to_cbr_ps:{}", self.reqid);
        self.store
            .publish(&channel, &serde_json::json!({ "ws_type": "autoscroll", "url": url }).to_string())
            .await?;

        rx.await
            .map_err(|_| OrchestratorError::Cdp("autoscroll response never arrived".into()))
    }

    async fn extract_links(&self, hops: u32) -> Result<()> {
        let result = self
            .cdp
            .call(
                "Runtime.evaluate",
                serde_json::json!({
                    "expression": "JSON.stringify(window.extractLinks ? window.extractLinks() : [])",
                    "returnByValue": true,
                }),
            )
            .await?;

        let raw = result
            .get("result")
            .and_then(|r| r.get("value"))
            .and_then(Value::as_str)
            .unwrap_or("[]");

        let links: Vec<String> = serde_json::from_str(raw).unwrap_or_default();
        for link in links {
            self.frontier.enqueue(UrlRequest::discovered(link, hops)).await?;
        }
        Ok(())
    }
}

#[derive(Debug)]
enum TabOutcome {
    Terminal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_fragment_stripped_before_scope_check() {
        let scopes = utils::compile_scopes(&[r"^https?://example\.org/".to_string()]).unwrap();
        let url = utils::strip_fragment("https://example.org/a#frag");
        assert!(utils::in_scope(&url, &scopes));
    }

    #[derive(Default)]
    struct SpyRecording {
        calls: Mutex<Vec<(String, String, String, String)>>,
    }

    #[async_trait]
    impl RecordingHandle for SpyRecording {
        async fn add_page(&self, url: &str, title: &str, ts: &str, browser_tag: &str) -> Result<()> {
            self.calls
                .lock()
                .await
                .push((url.to_string(), title.to_string(), ts.to_string(), browser_tag.to_string()));
            Ok(())
        }
        async fn is_open(&self) -> Result<bool> {
            Ok(true)
        }
    }

    /// Answers one `Page.navigate` with a frameId, then emits
    /// `Page.frameNavigated` (non-HTML mime type) and
    /// `Page.frameStoppedLoading`, and holds the connection open.
    async fn spawn_non_html_cdp_tab() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else { return };
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else { return };

            let Some(Ok(Message::Text(text))) = ws.next().await else { return };
            let req: Value = serde_json::from_str(&text).unwrap();
            let reply = serde_json::json!({ "id": req["id"], "result": { "frameId": "f1" } });
            if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                return;
            }

            // Give the driver time to subscribe to the event broadcast
            // before these events go out; the channel doesn't replay.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;

            let navigated = serde_json::json!({
                "method": "Page.frameNavigated",
                "params": { "frame": { "id": "f1", "mimeType": "application/pdf" } }
            });
            if ws.send(Message::Text(navigated.to_string().into())).await.is_err() {
                return;
            }

            tokio::time::sleep(std::time::Duration::from_millis(50)).await;

            let stopped = serde_json::json!({
                "method": "Page.frameStoppedLoading",
                "params": { "frameId": "f1" }
            });
            let _ = ws.send(Message::Text(stopped.to_string().into())).await;

            // Hold the socket open; the driver under test doesn't navigate again.
            while ws.next().await.is_some() {}
        });
        format!("ws://{addr}/tab")
    }

    /// §8 scenario 3: a non-HTML response is recorded directly via
    /// `add_page` and never reaches link extraction.
    #[tokio::test]
    async fn test_visit_non_html_response_calls_add_page_without_link_extraction() {
        let replay_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/replay/index"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&replay_server)
            .await;

        let ws_url = spawn_non_html_cdp_tab().await;
        let cdp = Arc::new(CdpClient::connect(&ws_url).await.unwrap());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let replay = Arc::new(ReplayClient::new(replay_server.uri()));
        let spy = Arc::new(SpyRecording::default());
        let recording: Arc<dyn RecordingHandle> = spy.clone();
        let rec_ctx = RecordingContext {
            user_name: "alice".into(),
            collection_name: "coll1".into(),
            recording_id: "rec1".into(),
        };

        let tab = TabDriver::new(
            "auto1",
            "reqid1",
            "tab1",
            "chrome:60",
            cdp,
            store.clone(),
            replay,
            recording.clone(),
            rec_ctx,
            Vec::new(),
            false,
        );

        tab.visit(UrlRequest::new("https://example.org/report.pdf", Some(3)))
            .await
            .unwrap();

        let calls = spy.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://example.org/report.pdf");
        assert_eq!(calls[0].1, "https://example.org/report.pdf");
        assert_eq!(calls[0].2.len(), 14);
        assert!(calls[0].2.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(calls[0].3, "chrome:60");
        drop(calls);

        assert!(store.frontier_snapshot("auto1").await.unwrap().is_empty());
    }
}
