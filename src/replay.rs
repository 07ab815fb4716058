use async_trait::async_trait;
use reqwest::Client;

use crate::Result;

/// Recording context needed to address the replay index and the
/// provisioning service (§4.4's `cdata`).
#[derive(Debug, Clone)]
pub struct RecordingContext {
    pub user_name: String,
    pub collection_name: String,
    pub recording_id: String,
}

/// Client for the replay/WARC index server (§6): answers "has this URL
/// already been recorded".
pub struct ReplayClient {
    client: Client,
    base_url: String,
}

impl ReplayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Non-empty body means "already recorded" (§4.2 step 1, §6).
    pub async fn already_recorded(&self, ctx: &RecordingContext, url: &str) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/replay/index", self.base_url))
            .query(&[
                ("param.user", ctx.user_name.as_str()),
                ("param.coll", ctx.collection_name.as_str()),
                ("param.rec", ctx.recording_id.as_str()),
                ("allowFuzzy", "0"),
                ("url", url),
            ])
            .send()
            .await?;

        let body = response.text().await?;
        Ok(!body.trim().is_empty())
    }
}

/// Capability handle for the recording attached to one automation (§4.4 step
/// 2: "Instantiate a Recording handle for A.rec"). Modeled as a trait object
/// injected into the tab driver and runner rather than a shared back-pointer
/// (§9 "Cyclic graphs").
#[async_trait]
pub trait RecordingHandle: Send + Sync {
    /// Directly records a page for non-HTML responses (§4.2 step 3:
    /// `add_page(url, title=url, ts, browser)`); HTML pages are added
    /// upstream by the recording proxy on first byte. `ts` is the capture
    /// timestamp of this visit, not of `add_page`'s own invocation.
    async fn add_page(&self, url: &str, title: &str, ts: &str, browser_tag: &str) -> Result<()>;
    /// False once the recording has been closed (§4.4 `process()`,
    /// terminal transition to DONE).
    async fn is_open(&self) -> Result<bool>;
}

/// HTTP-backed [`RecordingHandle`] talking to the recording proxy's control
/// endpoints alongside the replay index.
pub struct HttpRecordingClient {
    client: Client,
    base_url: String,
    ctx: RecordingContext,
}

impl HttpRecordingClient {
    pub fn new(base_url: impl Into<String>, ctx: RecordingContext) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            ctx,
        }
    }
}

#[async_trait]
impl RecordingHandle for HttpRecordingClient {
    async fn add_page(&self, url: &str, title: &str, ts: &str, browser_tag: &str) -> Result<()> {
        self.client
            .post(format!("{}/add_page", self.base_url))
            .json(&serde_json::json!({
                "user": self.ctx.user_name,
                "coll": self.ctx.collection_name,
                "rec": self.ctx.recording_id,
                "url": url,
                "title": title,
                "ts": ts,
                "browser": browser_tag,
            }))
            .send()
            .await?;
        Ok(())
    }

    async fn is_open(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/recording/is_open", self.base_url))
            .query(&[
                ("user", self.ctx.user_name.as_str()),
                ("coll", self.ctx.collection_name.as_str()),
                ("rec", self.ctx.recording_id.as_str()),
            ])
            .send()
            .await?;
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::json!({"open": false}));
        Ok(body.get("open").and_then(serde_json::Value::as_bool).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> RecordingContext {
        RecordingContext {
            user_name: "alice".into(),
            collection_name: "coll1".into(),
            recording_id: "rec1".into(),
        }
    }

    #[tokio::test]
    async fn test_already_recorded_true_on_nonempty_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/replay/index"))
            .respond_with(ResponseTemplate::new(200).set_body_string("some-cdx-line"))
            .mount(&server)
            .await;

        let client = ReplayClient::new(server.uri());
        assert!(client.already_recorded(&ctx(), "https://example.org/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_already_recorded_false_on_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/replay/index"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;

        let client = ReplayClient::new(server.uri());
        assert!(!client.already_recorded(&ctx(), "https://example.org/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_recording_is_open_parses_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recording/is_open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "open": true })))
            .mount(&server)
            .await;

        let client = HttpRecordingClient::new(server.uri(), ctx());
        assert!(client.is_open().await.unwrap());
    }

    #[tokio::test]
    async fn test_recording_add_page_posts_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/add_page"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = HttpRecordingClient::new(server.uri(), ctx());
        client
            .add_page("https://example.org/a.pdf", "https://example.org/a.pdf", "20260726120000", "chrome:60")
            .await
            .unwrap();
    }
}
