pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::Result;
use crate::frontier::UrlRequest;

/// Abstracts the key-value layout of §6 so the rest of the crate never
/// touches a Redis connection directly. The real implementation is
/// [`redis_store::RedisStore`]; tests run against [`memory::MemoryStore`].
///
/// Key layout mirrored by implementors:
/// ```text
/// a:<aid>:info      hash   automation fields
/// a:<aid>:br        set    active reqids
/// a:<aid>:t:<reqid> hash   tabid -> current url
/// a:<aid>:q         list   URL frontier
/// a:<aid>:scope     set    regex scope patterns
/// q:auto:add        list   new-auto notifications
/// q:auto:del        list   del-auto notifications
/// n:autos:count     int    id allocator
/// ```
#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically allocates the next automation id (`n:autos:count`).
    async fn next_id(&self) -> Result<u64>;

    async fn hset_info(&self, aid: &str, fields: &[(&str, String)]) -> Result<()>;
    async fn hgetall_info(&self, aid: &str) -> Result<HashMap<String, String>>;
    async fn hget_info(&self, aid: &str, field: &str) -> Result<Option<String>>;

    /// Removes every key matching `a:<aid>:*`.
    async fn delete_automation_keys(&self, aid: &str) -> Result<()>;

    /// Lists every automation id with an `info` hash, for the manager's
    /// startup scan (§4.5).
    async fn scan_automation_ids(&self) -> Result<Vec<String>>;

    async fn scope_add(&self, aid: &str, patterns: &[String]) -> Result<()>;
    async fn scope_members(&self, aid: &str) -> Result<Vec<String>>;

    async fn frontier_enqueue(&self, aid: &str, req: &UrlRequest) -> Result<()>;
    /// Blocks until an item is available, FIFO across all concurrent
    /// poppers of the same automation (§4.1).
    async fn frontier_pop_blocking(&self, aid: &str) -> Result<UrlRequest>;
    async fn frontier_requeue_front(&self, aid: &str, req: &UrlRequest) -> Result<()>;
    /// Non-destructive snapshot of the remaining queue, for `serialize()`.
    async fn frontier_snapshot(&self, aid: &str) -> Result<Vec<UrlRequest>>;

    async fn browsers_add(&self, aid: &str, reqid: &str) -> Result<()>;
    async fn browsers_remove(&self, aid: &str, reqid: &str) -> Result<()>;
    async fn browsers_members(&self, aid: &str) -> Result<Vec<String>>;

    async fn tab_set(&self, aid: &str, reqid: &str, tab_id: &str, url: &str) -> Result<()>;
    async fn tab_clear(&self, aid: &str, reqid: &str, tab_id: &str) -> Result<()>;
    async fn tab_members(&self, aid: &str, reqid: &str) -> Result<HashMap<String, String>>;
    async fn tabs_delete(&self, aid: &str, reqid: &str) -> Result<()>;

    async fn push_new_auto(&self, aid: &str) -> Result<()>;
    /// Pops everything currently queued, non-blocking.
    async fn drain_new_auto(&self) -> Result<Vec<String>>;
    async fn push_del_auto(&self, aid: &str) -> Result<()>;
    async fn drain_del_auto(&self) -> Result<Vec<String>>;

    /// Subscribes to a pub/sub channel (`from_cbr_ps:<reqid>` in practice),
    /// forwarding published payloads to the returned receiver until it is
    /// dropped.
    async fn subscribe(&self, channel: &str) -> Result<tokio::sync::mpsc::Receiver<String>>;
    /// Publishes to a pub/sub channel (`to_cbr_ps:<reqid>` in practice).
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
}
