use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::frontier::{Frontier, UrlRequest};
use crate::replay::RecordingHandle;
use crate::store::Store;
use crate::{OrchestratorError, Result};

/// Status DAG (§3 Lifecycle, §8 property 5): INACTIVE -> READY -> RUNNING ->
/// DONE, with DELETE reachable from any state (deletion just removes the
/// record; it has no status of its own).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Inactive,
    Ready,
    Running,
    Paused,
    Done,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Inactive => "INACTIVE",
            Status::Ready => "READY",
            Status::Running => "RUNNING",
            Status::Paused => "PAUSED",
            Status::Done => "DONE",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "INACTIVE" => Ok(Status::Inactive),
            "READY" => Ok(Status::Ready),
            "RUNNING" => Ok(Status::Running),
            "PAUSED" => Ok(Status::Paused),
            "DONE" => Ok(Status::Done),
            other => Err(OrchestratorError::Store(format!("unknown status {other}"))),
        }
    }
}

/// The persistent fields of one automation (§3). `request_ts` pins the
/// recording to a point in time when set; empty otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRecord {
    pub auto_id: String,
    pub status: Status,
    pub owner_collection_id: String,
    pub user_name: String,
    pub collection_name: String,
    #[serde(default)]
    pub recording_id: String,
    pub browser_tag: String,
    pub max_browsers: u32,
    pub num_tabs: u32,
    pub hops: u32,
    #[serde(rename = "type")]
    pub auto_type: String,
    #[serde(default)]
    pub request_ts: Option<String>,
    pub autoscroll: bool,
}

/// Recognized `create()` props (§9): unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateProps {
    pub hops: Option<u32>,
    pub num_tabs: Option<u32>,
    pub max_browsers: Option<u32>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub browser_tag: Option<String>,
    pub request_ts: Option<String>,
    pub autoscroll: Option<bool>,
}

const DEFAULT_HOPS: u32 = 0;
const DEFAULT_NUM_TABS: u32 = 1;
const DEFAULT_MAX_BROWSERS: u32 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct Serialized {
    #[serde(flatten)]
    pub record: AutomationRecord,
    pub active_browsers: HashMap<String, HashMap<String, String>>,
    pub queue: Vec<UrlRequest>,
    pub scopes: Vec<String>,
}

/// API-side operations on the automation model (C6). A thin façade over the
/// [`Store`] — the runner (C4) is the only other owner of `status`, and it
/// writes through the same store rather than through this type.
pub struct Automation {
    store: Arc<dyn Store>,
}

impl Automation {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validates `max_browsers`, `num_tabs`, `hops` as non-negative integers
    /// with defaults (2, 1, 0), stores `scopes`, pushes the new id onto
    /// `new-auto`.
    pub async fn create(
        &self,
        owner_collection_id: &str,
        user_name: &str,
        collection_name: &str,
        browser_tag: &str,
        props: CreateProps,
    ) -> Result<AutomationRecord> {
        let id = self.store.next_id().await?;
        let auto_id = id.to_string();

        let record = AutomationRecord {
            auto_id: auto_id.clone(),
            status: Status::Inactive,
            owner_collection_id: owner_collection_id.to_string(),
            user_name: user_name.to_string(),
            collection_name: collection_name.to_string(),
            recording_id: String::new(),
            browser_tag: props.browser_tag.unwrap_or_else(|| browser_tag.to_string()),
            max_browsers: props.max_browsers.unwrap_or(DEFAULT_MAX_BROWSERS).max(1),
            num_tabs: props.num_tabs.unwrap_or(DEFAULT_NUM_TABS).max(1),
            hops: props.hops.unwrap_or(DEFAULT_HOPS),
            auto_type: "record".to_string(),
            request_ts: props.request_ts,
            autoscroll: props.autoscroll.unwrap_or(false),
        };

        self.write_record(&record).await?;
        self.store.scope_add(&auto_id, &props.scopes).await?;
        self.store.push_new_auto(&auto_id).await?;

        Ok(record)
    }

    /// Appends each bookmark URL in `urls` to Q(A). Valid only when status is
    /// INACTIVE or RUNNING and the recording is open (§3 Lifecycle "Queue
    /// list").
    pub async fn queue_list(&self, auto_id: &str, urls: &[String], recording: &dyn RecordingHandle) -> Result<()> {
        let record = self.load(auto_id).await?;
        if !matches!(record.status, Status::Inactive | Status::Running) {
            return Err(OrchestratorError::InvalidProperty(format!(
                "automation {auto_id} is not queueable in status {:?}",
                record.status
            )));
        }
        if !recording.is_open().await? {
            return Err(OrchestratorError::RecordingClosed);
        }

        let frontier = Frontier::new(self.store.clone(), auto_id);
        let hops = if record.hops > 0 { Some(record.hops) } else { None };
        for url in urls {
            frontier.enqueue(UrlRequest::new(url.clone(), hops)).await?;
        }
        Ok(())
    }

    /// INACTIVE -> READY: attaches a fresh recording. Recording creation
    /// itself is an external collaborator (§1); this just records the id and
    /// flips status.
    pub async fn start(&self, auto_id: &str, recording_id: &str) -> Result<()> {
        let record = self.load(auto_id).await?;
        if record.status != Status::Inactive {
            return Ok(());
        }
        self.store
            .hset_info(
                auto_id,
                &[
                    ("status", Status::Ready.as_str().to_string()),
                    ("recording_id", recording_id.to_string()),
                ],
            )
            .await
    }

    pub async fn serialize(&self, auto_id: &str) -> Result<Serialized> {
        let record = self.load(auto_id).await?;
        let reqids = self.store.browsers_members(auto_id).await?;

        let mut active_browsers = HashMap::new();
        for reqid in reqids {
            let tabs = self.store.tab_members(auto_id, &reqid).await?;
            active_browsers.insert(reqid, tabs);
        }

        let queue = self.store.frontier_snapshot(auto_id).await?;
        let scopes = self.store.scope_members(auto_id).await?;

        Ok(Serialized {
            record,
            active_browsers,
            queue,
            scopes,
        })
    }

    /// Admin-checked by the caller (the HTTP layer, §6); deletes all keys
    /// under `A.*` and pushes the id onto `del-auto`.
    pub async fn delete(&self, auto_id: &str) -> Result<()> {
        self.store.delete_automation_keys(auto_id).await?;
        self.store.push_del_auto(auto_id).await?;
        Ok(())
    }

    pub async fn load(&self, auto_id: &str) -> Result<AutomationRecord> {
        let fields = self.store.hgetall_info(auto_id).await?;
        if fields.is_empty() {
            return Err(OrchestratorError::NotFound(auto_id.to_string()));
        }
        record_from_fields(auto_id, &fields)
    }

    async fn write_record(&self, record: &AutomationRecord) -> Result<()> {
        let fields: Vec<(&str, String)> = vec![
            ("status", record.status.as_str().to_string()),
            ("owner_collection_id", record.owner_collection_id.clone()),
            ("user_name", record.user_name.clone()),
            ("collection_name", record.collection_name.clone()),
            ("recording_id", record.recording_id.clone()),
            ("browser_tag", record.browser_tag.clone()),
            ("max_browsers", record.max_browsers.to_string()),
            ("num_tabs", record.num_tabs.to_string()),
            ("hops", record.hops.to_string()),
            ("type", record.auto_type.clone()),
            ("request_ts", record.request_ts.clone().unwrap_or_default()),
            ("autoscroll", record.autoscroll.to_string()),
        ];
        self.store.hset_info(&record.auto_id, &fields).await
    }
}

pub(crate) fn record_from_fields(auto_id: &str, fields: &HashMap<String, String>) -> Result<AutomationRecord> {
    let get = |key: &str| fields.get(key).cloned().unwrap_or_default();
    let status = Status::parse(&get("status"))?;
    let request_ts = fields.get("request_ts").filter(|s| !s.is_empty()).cloned();

    Ok(AutomationRecord {
        auto_id: auto_id.to_string(),
        status,
        owner_collection_id: get("owner_collection_id"),
        user_name: get("user_name"),
        collection_name: get("collection_name"),
        recording_id: get("recording_id"),
        browser_tag: get("browser_tag"),
        max_browsers: get("max_browsers").parse().unwrap_or(DEFAULT_MAX_BROWSERS),
        num_tabs: get("num_tabs").parse().unwrap_or(DEFAULT_NUM_TABS),
        hops: get("hops").parse().unwrap_or(DEFAULT_HOPS),
        auto_type: get("type"),
        request_ts,
        autoscroll: get("autoscroll") == "true",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn new_automation() -> Automation {
        Automation::new(Arc::new(MemoryStore::new()))
    }

    struct AlwaysOpen;

    #[async_trait::async_trait]
    impl RecordingHandle for AlwaysOpen {
        async fn add_page(&self, _url: &str, _title: &str, _ts: &str, _browser_tag: &str) -> Result<()> {
            Ok(())
        }
        async fn is_open(&self) -> Result<bool> {
            Ok(true)
        }
    }

    struct AlwaysClosed;

    #[async_trait::async_trait]
    impl RecordingHandle for AlwaysClosed {
        async fn add_page(&self, _url: &str, _title: &str, _ts: &str, _browser_tag: &str) -> Result<()> {
            Ok(())
        }
        async fn is_open(&self) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_create_applies_defaults() {
        let automation = new_automation();
        let record = automation
            .create("coll1", "alice", "My Collection", "chrome:60", CreateProps::default())
            .await
            .unwrap();

        assert_eq!(record.status, Status::Inactive);
        assert_eq!(record.max_browsers, DEFAULT_MAX_BROWSERS);
        assert_eq!(record.num_tabs, DEFAULT_NUM_TABS);
        assert_eq!(record.hops, DEFAULT_HOPS);
        assert_eq!(record.auto_type, "record");
    }

    #[tokio::test]
    async fn test_round_trip_serialize_after_create() {
        let automation = new_automation();
        let props = CreateProps {
            hops: Some(2),
            num_tabs: Some(3),
            max_browsers: Some(4),
            scopes: vec!["^https://example\\.org/".to_string()],
            ..Default::default()
        };
        let record = automation
            .create("coll1", "alice", "My Collection", "chrome:60", props)
            .await
            .unwrap();

        let serialized = automation.serialize(&record.auto_id).await.unwrap();
        assert_eq!(serialized.record.hops, 2);
        assert_eq!(serialized.record.status, Status::Inactive);
        assert!(serialized.queue.is_empty());
        assert!(serialized.active_browsers.is_empty());
        assert_eq!(serialized.scopes, vec!["^https://example\\.org/".to_string()]);
    }

    #[tokio::test]
    async fn test_queue_list_rejects_non_queueable_status() {
        let automation = new_automation();
        let record = automation
            .create("coll1", "alice", "My Collection", "chrome:60", CreateProps::default())
            .await
            .unwrap();

        automation
            .store
            .hset_info(&record.auto_id, &[("status", Status::Done.as_str().to_string())])
            .await
            .unwrap();

        let result = automation
            .queue_list(&record.auto_id, &["https://example.org/a".to_string()], &AlwaysOpen)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_queue_list_rejects_closed_recording() {
        let automation = new_automation();
        let record = automation
            .create("coll1", "alice", "My Collection", "chrome:60", CreateProps::default())
            .await
            .unwrap();

        let result = automation
            .queue_list(&record.auto_id, &["https://example.org/a".to_string()], &AlwaysClosed)
            .await;
        assert!(matches!(result, Err(OrchestratorError::RecordingClosed)));
    }

    #[tokio::test]
    async fn test_queue_list_applies_automation_hops_when_nonzero() {
        let automation = new_automation();
        let props = CreateProps {
            hops: Some(3),
            ..Default::default()
        };
        let record = automation
            .create("coll1", "alice", "My Collection", "chrome:60", props)
            .await
            .unwrap();

        automation
            .queue_list(&record.auto_id, &["https://example.org/a".to_string()], &AlwaysOpen)
            .await
            .unwrap();

        let serialized = automation.serialize(&record.auto_id).await.unwrap();
        assert_eq!(serialized.queue.len(), 1);
        assert_eq!(serialized.queue[0].hops, Some(3));
    }

    #[tokio::test]
    async fn test_delete_pushes_del_auto() {
        let automation = new_automation();
        let record = automation
            .create("coll1", "alice", "My Collection", "chrome:60", CreateProps::default())
            .await
            .unwrap();

        automation.delete(&record.auto_id).await.unwrap();

        let drained = automation.store.drain_del_auto().await.unwrap();
        assert_eq!(drained, vec![record.auto_id.clone()]);
        assert!(automation.load(&record.auto_id).await.is_err());
    }
}
