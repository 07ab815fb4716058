use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::{Notify, broadcast, mpsc};

use super::Store;
use crate::Result;
use crate::frontier::UrlRequest;

/// In-memory [`Store`] used by unit and integration tests so the frontier,
/// scope, and lifecycle logic can run without a live Redis (per the test
/// tooling requirements).
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    notify: Notify,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    info: HashMap<String, HashMap<String, String>>,
    scopes: HashMap<String, HashSet<String>>,
    frontiers: HashMap<String, VecDeque<UrlRequest>>,
    browsers: HashMap<String, HashSet<String>>,
    tabs: HashMap<String, HashMap<String, String>>,
    new_auto: VecDeque<String>,
    del_auto: VecDeque<String>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tab_key(aid: &str, reqid: &str) -> String {
        format!("{aid}:{reqid}")
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn next_id(&self) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        Ok(inner.next_id)
    }

    async fn hset_info(&self, aid: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.info.entry(aid.to_string()).or_default();
        for (k, v) in fields {
            entry.insert((*k).to_string(), v.clone());
        }
        Ok(())
    }

    async fn hgetall_info(&self, aid: &str) -> Result<HashMap<String, String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.info.get(aid).cloned().unwrap_or_default())
    }

    async fn hget_info(&self, aid: &str, field: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.info.get(aid).and_then(|h| h.get(field).cloned()))
    }

    async fn delete_automation_keys(&self, aid: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.info.remove(aid);
        inner.scopes.remove(aid);
        inner.frontiers.remove(aid);
        let reqids: Vec<String> = inner
            .browsers
            .remove(aid)
            .map(|s| s.into_iter().collect())
            .unwrap_or_default();
        for reqid in reqids {
            inner.tabs.remove(&Self::tab_key(aid, &reqid));
        }
        Ok(())
    }

    async fn scan_automation_ids(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.info.keys().cloned().collect())
    }

    async fn scope_add(&self, aid: &str, patterns: &[String]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.scopes.entry(aid.to_string()).or_default();
        for p in patterns {
            entry.insert(p.clone());
        }
        Ok(())
    }

    async fn scope_members(&self, aid: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .scopes
            .get(aid)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn frontier_enqueue(&self, aid: &str, req: &UrlRequest) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.frontiers.entry(aid.to_string()).or_default().push_back(req.clone());
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn frontier_pop_blocking(&self, aid: &str) -> Result<UrlRequest> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(q) = inner.frontiers.get_mut(aid)
                    && let Some(req) = q.pop_front()
                {
                    return Ok(req);
                }
            }
            self.notify.notified().await;
        }
    }

    async fn frontier_requeue_front(&self, aid: &str, req: &UrlRequest) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.frontiers.entry(aid.to_string()).or_default().push_front(req.clone());
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn frontier_snapshot(&self, aid: &str) -> Result<Vec<UrlRequest>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .frontiers
            .get(aid)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn browsers_add(&self, aid: &str, reqid: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.browsers.entry(aid.to_string()).or_default().insert(reqid.to_string());
        Ok(())
    }

    async fn browsers_remove(&self, aid: &str, reqid: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(set) = inner.browsers.get_mut(aid) {
            set.remove(reqid);
        }
        Ok(())
    }

    async fn browsers_members(&self, aid: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .browsers
            .get(aid)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn tab_set(&self, aid: &str, reqid: &str, tab_id: &str, url: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .tabs
            .entry(Self::tab_key(aid, reqid))
            .or_default()
            .insert(tab_id.to_string(), url.to_string());
        Ok(())
    }

    async fn tab_clear(&self, aid: &str, reqid: &str, tab_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(tabs) = inner.tabs.get_mut(&Self::tab_key(aid, reqid)) {
            tabs.insert(tab_id.to_string(), String::new());
        }
        Ok(())
    }

    async fn tab_members(&self, aid: &str, reqid: &str) -> Result<HashMap<String, String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tabs.get(&Self::tab_key(aid, reqid)).cloned().unwrap_or_default())
    }

    async fn tabs_delete(&self, aid: &str, reqid: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.tabs.remove(&Self::tab_key(aid, reqid));
        Ok(())
    }

    async fn push_new_auto(&self, aid: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.new_auto.push_back(aid.to_string());
        Ok(())
    }

    async fn drain_new_auto(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.new_auto.drain(..).collect())
    }

    async fn push_del_auto(&self, aid: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.del_auto.push_back(aid.to_string());
        Ok(())
    }

    async fn drain_del_auto(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.del_auto.drain(..).collect())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let mut broadcast_rx = {
            let mut inner = self.inner.lock().unwrap();
            let sender = inner
                .channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(100).0);
            sender.subscribe()
        };

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            while let Ok(msg) = broadcast_rx.recv().await {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let sender = inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(100).0);
        let _ = sender.send(payload.to_string());
        Ok(())
    }
}
