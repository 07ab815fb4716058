use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::Result;
use crate::store::Store;

/// One pending navigation. `hops` is omitted once the remaining budget is
/// zero, mirroring the wire-layout used for the persisted frontier list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hops: Option<u32>,
}

impl UrlRequest {
    pub fn new(url: impl Into<String>, hops: Option<u32>) -> Self {
        Self {
            url: url.into(),
            hops,
        }
    }

    /// A link discovered during extraction carries the parent's hop budget
    /// minus one; once that would be zero, `hops` is omitted entirely (§4.2
    /// step 6).
    pub fn discovered(url: impl Into<String>, parent_hops: u32) -> Self {
        let remaining = parent_hops - 1;
        Self {
            url: url.into(),
            hops: if remaining > 0 { Some(remaining) } else { None },
        }
    }
}

/// Per-automation FIFO queue of pending navigations (C1). Deliberately
/// ignorant of scope/dedup policy — that lives in the tab driver (§4.1).
pub struct Frontier {
    store: Arc<dyn Store>,
    auto_id: String,
}

impl Frontier {
    pub fn new(store: Arc<dyn Store>, auto_id: impl Into<String>) -> Self {
        Self {
            store,
            auto_id: auto_id.into(),
        }
    }

    pub async fn enqueue(&self, req: UrlRequest) -> Result<()> {
        self.store.frontier_enqueue(&self.auto_id, &req).await
    }

    pub async fn pop_blocking(&self) -> Result<UrlRequest> {
        self.store.frontier_pop_blocking(&self.auto_id).await
    }

    pub async fn requeue_front(&self, req: UrlRequest) -> Result<()> {
        self.store.frontier_requeue_front(&self.auto_id, &req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovered_omits_hops_at_zero() {
        let req = UrlRequest::discovered("https://example.org/b", 1);
        assert_eq!(req.hops, None);
    }

    #[test]
    fn test_discovered_keeps_remaining_hops() {
        let req = UrlRequest::discovered("https://example.org/b", 3);
        assert_eq!(req.hops, Some(2));
    }

    #[test]
    fn test_serialize_omits_none_hops() {
        let req = UrlRequest::new("https://example.org/a", None);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"url":"https://example.org/a"}"#);
    }

    #[tokio::test]
    async fn test_enqueue_and_pop_fifo() {
        let store: Arc<dyn Store> = Arc::new(crate::store::memory::MemoryStore::new());
        let frontier = Frontier::new(store, "auto1");

        frontier.enqueue(UrlRequest::new("https://example.org/a", None)).await.unwrap();
        frontier.enqueue(UrlRequest::new("https://example.org/b", None)).await.unwrap();

        let first = frontier.pop_blocking().await.unwrap();
        assert_eq!(first.url, "https://example.org/a");

        let second = frontier.pop_blocking().await.unwrap();
        assert_eq!(second.url, "https://example.org/b");
    }

    #[tokio::test]
    async fn test_requeue_front_is_retried_first() {
        let store: Arc<dyn Store> = Arc::new(crate::store::memory::MemoryStore::new());
        let frontier = Frontier::new(store, "auto1");

        frontier.enqueue(UrlRequest::new("https://example.org/a", None)).await.unwrap();
        let popped = frontier.pop_blocking().await.unwrap();
        frontier.requeue_front(popped.clone()).await.unwrap();

        let retried = frontier.pop_blocking().await.unwrap();
        assert_eq!(retried, popped);
    }
}
