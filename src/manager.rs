use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::automation::Status;
use crate::config::Config;
use crate::provision::ProvisionClient;
use crate::replay::ReplayClient;
use crate::runner::{AutomationRunner, RunnerOutcome};
use crate::store::Store;
use crate::Result;

/// Discovers automations at startup and ticks all runners (C5). One
/// instance per deployment; owns no unshared state beyond its runner map
/// (§9 "Global mutable state").
pub struct Manager {
    store: Arc<dyn Store>,
    config: Config,
    provisioner: Arc<ProvisionClient>,
    replay: Arc<ReplayClient>,
    runners: Mutex<HashMap<String, Arc<AutomationRunner>>>,
}

impl Manager {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        let provisioner = Arc::new(ProvisionClient::new(config.provisioner.base_url.clone()));
        let replay = Arc::new(ReplayClient::new(config.warcserver.base_url.clone()));
        Self {
            store,
            config,
            provisioner,
            replay,
            runners: Mutex::new(HashMap::new()),
        }
    }

    fn new_runner(&self, auto_id: &str) -> AutomationRunner {
        AutomationRunner::new(
            auto_id.to_string(),
            self.store.clone(),
            self.provisioner.clone(),
            self.replay.clone(),
            self.config.clone(),
        )
    }

    /// Scans the key space for all automation info keys and instantiates a
    /// runner for each whose status ≠ DONE (§4.5).
    async fn startup_scan(&self) -> Result<()> {
        let ids = self.store.scan_automation_ids().await?;
        let mut runners = self.runners.lock().await;
        for auto_id in ids {
            let fields = self.store.hgetall_info(&auto_id).await?;
            let Some(status) = fields.get("status") else {
                continue;
            };
            if Status::parse(status).ok() == Some(Status::Done) {
                continue;
            }
            info!(auto_id, "adopting automation at startup");
            runners.insert(auto_id.clone(), Arc::new(self.new_runner(&auto_id)));
        }
        Ok(())
    }

    /// Drains `new-auto`/`del-auto` and ticks every remaining runner. Runs
    /// until the process is killed; intended to be spawned as its own task
    /// by the binary entrypoint.
    pub async fn run(&self) -> Result<()> {
        self.startup_scan().await?;

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.crawl.manager_tick_secs));
        loop {
            interval.tick().await;
            if let Err(err) = self.tick().await {
                warn!(%err, "manager tick failed");
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        for auto_id in self.store.drain_new_auto().await? {
            let mut runners = self.runners.lock().await;
            runners.entry(auto_id.clone()).or_insert_with(|| Arc::new(self.new_runner(&auto_id)));
            info!(auto_id, "new automation adopted");
        }

        for auto_id in self.store.drain_del_auto().await? {
            let removed = self.runners.lock().await.remove(&auto_id);
            if let Some(runner) = removed {
                runner.teardown_all().await;
                info!(auto_id, "automation removed");
            }
        }

        let snapshot: Vec<Arc<AutomationRunner>> = self.runners.lock().await.values().cloned().collect();
        let mut done = Vec::new();
        for runner in snapshot {
            match runner.process().await {
                Ok(RunnerOutcome::Done) => done.push(runner.auto_id().to_string()),
                Ok(RunnerOutcome::Continue) => {}
                Err(err) => warn!(auto_id = %runner.auto_id(), %err, "runner process failed"),
            }
        }
        if !done.is_empty() {
            let mut runners = self.runners.lock().await;
            for auto_id in done {
                runners.remove(&auto_id);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{Automation, CreateProps};
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_startup_scan_skips_done_automations() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let automation = Automation::new(store.clone());
        let record = automation
            .create("coll1", "alice", "My Collection", "chrome:60", CreateProps::default())
            .await
            .unwrap();
        store
            .hset_info(&record.auto_id, &[("status", Status::Done.as_str().to_string())])
            .await
            .unwrap();

        let config = Config::default();
        let manager = Manager::new(store, config);
        manager.startup_scan().await.unwrap();

        assert!(manager.runners.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_tick_adopts_new_automation() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let automation = Automation::new(store.clone());
        let record = automation
            .create("coll1", "alice", "My Collection", "chrome:60", CreateProps::default())
            .await
            .unwrap();

        let config = Config::default();
        let manager = Manager::new(store, config);
        manager.tick().await.unwrap();

        assert!(manager.runners.lock().await.contains_key(&record.auto_id));
    }
}
