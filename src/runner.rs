use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::automation::{AutomationRecord, Status};
use crate::config::Config;
use crate::provision::ProvisionClient;
use crate::replay::{HttpRecordingClient, RecordingContext, RecordingHandle, ReplayClient};
use crate::store::Store;
use crate::supervisor::{BrowserSupervisor, SupervisorContext};
use crate::utils;
use crate::{OrchestratorError, Result};

/// Maintains the target browser count for one automation (C4). Constructed
/// per automation with status ∈ {READY, RUNNING}; holds the immutable
/// per-recording context and compiled scope regexes once `init_browsers`
/// has run.
pub struct AutomationRunner {
    auto_id: String,
    store: Arc<dyn Store>,
    provisioner: Arc<ProvisionClient>,
    replay: Arc<ReplayClient>,
    config: Config,
    supervisors: Mutex<Vec<BrowserSupervisor>>,
    recording: Mutex<Option<Arc<dyn RecordingHandle>>>,
    ctx: Mutex<Option<SupervisorContext>>,
}

impl AutomationRunner {
    pub fn new(
        auto_id: impl Into<String>,
        store: Arc<dyn Store>,
        provisioner: Arc<ProvisionClient>,
        replay: Arc<ReplayClient>,
        config: Config,
    ) -> Self {
        Self {
            auto_id: auto_id.into(),
            store,
            provisioner,
            replay,
            config,
            supervisors: Mutex::new(Vec::new()),
            recording: Mutex::new(None),
            ctx: Mutex::new(None),
        }
    }

    pub fn auto_id(&self) -> &str {
        &self.auto_id
    }

    /// §4.4 `init_browsers()`: adopts existing browsers up to `max_browsers`,
    /// provisions the remainder, and transitions to RUNNING.
    pub async fn init_browsers(&self) -> Result<()> {
        let record = self.load_record().await?;
        let rec_ctx = RecordingContext {
            user_name: record.user_name.clone(),
            collection_name: record.collection_name.clone(),
            recording_id: record.recording_id.clone(),
        };
        let scope_patterns = self.store.scope_members(&self.auto_id).await?;
        let scopes = utils::compile_scopes(&scope_patterns)?;

        let sup_ctx = SupervisorContext {
            auto_id: self.auto_id.clone(),
            browser_tag: record.browser_tag.clone(),
            num_tabs: record.num_tabs,
            scopes,
            autoscroll: record.autoscroll,
            rec_ctx: rec_ctx.clone(),
            request_ts: record.request_ts.clone(),
        };

        let recording: Arc<dyn RecordingHandle> =
            Arc::new(HttpRecordingClient::new(self.config.warcserver.base_url.clone(), rec_ctx));

        let existing_reqids = self.store.browsers_members(&self.auto_id).await?;
        let mut supervisors = Vec::new();

        for reqid in existing_reqids {
            if supervisors.len() as u32 >= record.max_browsers {
                break;
            }
            match BrowserSupervisor::adopt(
                self.store.clone(),
                self.provisioner.clone(),
                self.replay.clone(),
                recording.clone(),
                sup_ctx.clone(),
                reqid.clone(),
            )
            .await
            {
                Ok(Some(supervisor)) => supervisors.push(supervisor),
                Ok(None) => {
                    let _ = self.store.browsers_remove(&self.auto_id, &reqid).await;
                }
                Err(err) => {
                    warn!(auto_id = %self.auto_id, reqid, %err, "adopt failed, dropping reqid");
                    let _ = self.store.browsers_remove(&self.auto_id, &reqid).await;
                }
            }
        }

        while (supervisors.len() as u32) < record.max_browsers {
            match BrowserSupervisor::provision(
                self.store.clone(),
                self.provisioner.clone(),
                self.replay.clone(),
                recording.clone(),
                sup_ctx.clone(),
            )
            .await
            {
                Ok(supervisor) => supervisors.push(supervisor),
                Err(err) => {
                    warn!(auto_id = %self.auto_id, %err, "provision failed, retrying next tick");
                    break;
                }
            }
        }

        *self.supervisors.lock().await = supervisors;
        *self.recording.lock().await = Some(recording);
        *self.ctx.lock().await = Some(sup_ctx);

        self.store
            .hset_info(&self.auto_id, &[("status", Status::Running.as_str().to_string())])
            .await?;

        info!(auto_id = %self.auto_id, "automation running");
        Ok(())
    }

    /// §4.4 `process()`, invoked on every manager tick.
    pub async fn process(&self) -> Result<RunnerOutcome> {
        let status = self.load_record().await?.status;

        if status == Status::Ready {
            self.init_browsers().await?;
        }

        let status = self.load_record().await?.status;
        if status != Status::Running {
            return Ok(RunnerOutcome::Continue);
        }

        let recording = self.recording.lock().await.clone();
        if let Some(recording) = recording
            && !recording.is_open().await?
        {
            self.store
                .hset_info(&self.auto_id, &[("status", Status::Done.as_str().to_string())])
                .await?;
            self.store.push_del_auto(&self.auto_id).await?;
            info!(auto_id = %self.auto_id, "recording closed, automation done");
            self.teardown_all().await;
            return Ok(RunnerOutcome::Done);
        }

        self.reconcile().await?;
        Ok(RunnerOutcome::Continue)
    }

    /// Reconciles `|B(A)|` to `max_browsers`, closing surplus and
    /// provisioning missing, then reinitializes any dead supervisor.
    async fn reconcile(&self) -> Result<()> {
        let record = self.load_record().await?;
        let Some(sup_ctx) = self.ctx.lock().await.clone() else {
            return Ok(());
        };
        let recording = self.recording.lock().await.clone().expect("recording set once RUNNING");

        let mut supervisors = self.supervisors.lock().await;

        while supervisors.len() as u32 > record.max_browsers {
            if let Some(surplus) = supervisors.pop() {
                surplus.teardown().await;
            }
        }

        let mut still_running = Vec::with_capacity(supervisors.len());
        for supervisor in supervisors.drain(..) {
            if supervisor.is_running() {
                still_running.push(supervisor);
                continue;
            }
            warn!(auto_id = %self.auto_id, reqid = %supervisor.reqid, "supervisor unhealthy, reinitializing");
            let reqid = supervisor.reqid.clone();
            supervisor.teardown().await;

            match BrowserSupervisor::adopt(
                self.store.clone(),
                self.provisioner.clone(),
                self.replay.clone(),
                recording.clone(),
                sup_ctx.clone(),
                reqid,
            )
            .await
            {
                Ok(Some(reinited)) => still_running.push(reinited),
                Ok(None) | Err(_) => {
                    if let Ok(fresh) = BrowserSupervisor::provision(
                        self.store.clone(),
                        self.provisioner.clone(),
                        self.replay.clone(),
                        recording.clone(),
                        sup_ctx.clone(),
                    )
                    .await
                    {
                        still_running.push(fresh);
                    }
                }
            }
        }

        while (still_running.len() as u32) < record.max_browsers {
            match BrowserSupervisor::provision(
                self.store.clone(),
                self.provisioner.clone(),
                self.replay.clone(),
                recording.clone(),
                sup_ctx.clone(),
            )
            .await
            {
                Ok(supervisor) => still_running.push(supervisor),
                Err(err) => {
                    warn!(auto_id = %self.auto_id, %err, "provision failed during reconcile");
                    break;
                }
            }
        }

        *supervisors = still_running;
        Ok(())
    }

    pub async fn teardown_all(&self) {
        let mut supervisors = self.supervisors.lock().await;
        for supervisor in supervisors.drain(..) {
            supervisor.teardown().await;
        }
    }

    async fn load_record(&self) -> Result<AutomationRecord> {
        let fields = self.store.hgetall_info(&self.auto_id).await?;
        if fields.is_empty() {
            return Err(OrchestratorError::NotFound(self.auto_id.clone()));
        }
        crate::automation::record_from_fields(&self.auto_id, &fields)
    }
}

pub enum RunnerOutcome {
    Continue,
    Done,
}
