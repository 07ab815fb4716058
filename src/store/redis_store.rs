use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::warn;

use super::Store;
use crate::error::OrchestratorError;
use crate::frontier::UrlRequest;
use crate::{Result, timeouts};

/// The real [`Store`], backed by a Redis `ConnectionManager` (auto-reconnecting
/// multiplexed connection) for normal commands and a fresh client for each
/// pub/sub subscription.
pub struct RedisStore {
    conn: ConnectionManager,
    client: redis::Client,
    prefix: String,
}

impl RedisStore {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| OrchestratorError::Store(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| OrchestratorError::Store(e.to_string()))?;
        Ok(Self {
            conn,
            client,
            prefix: prefix.to_string(),
        })
    }

    fn info_key(&self, aid: &str) -> String {
        format!("{}:{aid}:info", self.prefix)
    }

    fn browsers_key(&self, aid: &str) -> String {
        format!("{}:{aid}:br", self.prefix)
    }

    fn tabs_key(&self, aid: &str, reqid: &str) -> String {
        format!("{}:{aid}:t:{reqid}", self.prefix)
    }

    fn queue_key(&self, aid: &str) -> String {
        format!("{}:{aid}:q", self.prefix)
    }

    fn scope_key(&self, aid: &str) -> String {
        format!("{}:{aid}:scope", self.prefix)
    }

    fn new_auto_key(&self) -> String {
        "q:auto:add".to_string()
    }

    fn del_auto_key(&self) -> String {
        "q:auto:del".to_string()
    }

    fn id_counter_key(&self) -> String {
        "n:autos:count".to_string()
    }

    fn map_err(e: redis::RedisError) -> OrchestratorError {
        OrchestratorError::Store(e.to_string())
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn next_id(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(self.id_counter_key(), 1).await.map_err(Self::map_err)?;
        Ok(id)
    }

    async fn hset_info(&self, aid: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.info_key(aid);
        let owned: Vec<(String, String)> = fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let _: () = conn.hset_multiple(key, &owned).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn hgetall_info(&self, aid: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(self.info_key(aid)).await.map_err(Self::map_err)?;
        Ok(map)
    }

    async fn hget_info(&self, aid: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(self.info_key(aid), field).await.map_err(Self::map_err)?;
        Ok(value)
    }

    async fn delete_automation_keys(&self, aid: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let reqids = self.browsers_members(aid).await?;
        let mut keys = vec![
            self.info_key(aid),
            self.browsers_key(aid),
            self.queue_key(aid),
            self.scope_key(aid),
        ];
        for reqid in reqids {
            keys.push(self.tabs_key(aid, &reqid));
        }
        let _: () = conn.del(keys).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn scan_automation_ids(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*:info", self.prefix);
        let keys: Vec<String> = conn.keys(pattern).await.map_err(Self::map_err)?;
        let prefix_len = self.prefix.len() + 1;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.get(prefix_len..k.len() - ":info".len()).map(|s| s.to_string()))
            .collect())
    }

    async fn scope_add(&self, aid: &str, patterns: &[String]) -> Result<()> {
        if patterns.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(self.scope_key(aid), patterns).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn scope_members(&self, aid: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(self.scope_key(aid)).await.map_err(Self::map_err)?;
        Ok(members)
    }

    async fn frontier_enqueue(&self, aid: &str, req: &UrlRequest) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(req)?;
        let _: () = conn.rpush(self.queue_key(aid), payload).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn frontier_pop_blocking(&self, aid: &str) -> Result<UrlRequest> {
        let mut conn = self.conn.clone();
        let key = self.queue_key(aid);
        loop {
            let result: Option<(String, String)> =
                conn.blpop(&key, 1.0).await.map_err(Self::map_err)?;
            if let Some((_, payload)) = result {
                return Ok(serde_json::from_str(&payload)?);
            }
        }
    }

    async fn frontier_requeue_front(&self, aid: &str, req: &UrlRequest) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(req)?;
        let _: () = conn.lpush(self.queue_key(aid), payload).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn frontier_snapshot(&self, aid: &str) -> Result<Vec<UrlRequest>> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn.lrange(self.queue_key(aid), 0, -1).await.map_err(Self::map_err)?;
        items
            .into_iter()
            .map(|s| serde_json::from_str(&s).map_err(OrchestratorError::from))
            .collect()
    }

    async fn browsers_add(&self, aid: &str, reqid: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(self.browsers_key(aid), reqid).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn browsers_remove(&self, aid: &str, reqid: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(self.browsers_key(aid), reqid).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn browsers_members(&self, aid: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(self.browsers_key(aid)).await.map_err(Self::map_err)?;
        Ok(members)
    }

    async fn tab_set(&self, aid: &str, reqid: &str, tab_id: &str, url: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(self.tabs_key(aid, reqid), tab_id, url).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn tab_clear(&self, aid: &str, reqid: &str, tab_id: &str) -> Result<()> {
        self.tab_set(aid, reqid, tab_id, "").await
    }

    async fn tab_members(&self, aid: &str, reqid: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(self.tabs_key(aid, reqid)).await.map_err(Self::map_err)?;
        Ok(map)
    }

    async fn tabs_delete(&self, aid: &str, reqid: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.tabs_key(aid, reqid)).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn push_new_auto(&self, aid: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(self.new_auto_key(), aid).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn drain_new_auto(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn
            .lpop(self.new_auto_key(), std::num::NonZeroUsize::new(1024))
            .await
            .map_err(Self::map_err)?;
        Ok(items)
    }

    async fn push_del_auto(&self, aid: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(self.del_auto_key(), aid).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn drain_del_auto(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn
            .lpop(self.del_auto_key(), std::num::NonZeroUsize::new(1024))
            .await
            .map_err(Self::map_err)?;
        Ok(items)
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let client = self.client.clone();
        let channel = channel.to_string();
        let (tx, rx) = mpsc::channel(100);

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(Self::map_err)?;
        pubsub.subscribe(&channel).await.map_err(Self::map_err)?;

        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(err) => {
                        warn!(%err, "failed to decode pub/sub payload");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload).await.map_err(Self::map_err)?;
        Ok(())
    }
}

/// Poll interval while waiting on browser bring-up (`WAIT_TIME`, §4.3).
pub fn browser_poll_interval() -> std::time::Duration {
    std::time::Duration::from_millis(timeouts::ms::BROWSER_POLL)
}
