//! Scheduler registry: one active run loop per job.
//!
//! The registry is an injected, process-scoped object (no global state,
//! no durability). It holds the set of jobs with a live run loop and
//! rejects duplicate scheduling; everything else a restart would need is
//! in the store, so re-scheduling after a crash is safe through stale-row
//! recovery and resumable counters.

use std::sync::{Arc, Mutex};

use promptbench_provider::{
    CredentialResolver, GeminiConfig, GeminiProvider, GenerationProvider,
};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::SchedResult;
use crate::job::BatchJobId;
use crate::persistence::StateStore;
use crate::runner::{JobRunner, RunnerConfig};

/// Why a scheduling request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// A run loop for this job is already live in this process.
    AlreadyRunning,
    /// No API key in the environment or the request.
    MissingApiKey,
}

/// Result of a scheduling request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    pub scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl ScheduleOutcome {
    fn scheduled() -> Self {
        Self {
            scheduled: true,
            reason: None,
        }
    }

    fn rejected(reason: RejectReason) -> Self {
        Self {
            scheduled: false,
            reason: Some(reason),
        }
    }
}

type ProviderFactory = dyn Fn(String) -> Arc<dyn GenerationProvider> + Send + Sync;

/// Tracks live run loops and spawns new ones.
pub struct JobRegistry {
    store: Arc<dyn StateStore>,
    active: Arc<Mutex<FxHashSet<BatchJobId>>>,
    resolver: CredentialResolver,
    provider_factory: Arc<ProviderFactory>,
    runner_config: RunnerConfig,
}

impl JobRegistry {
    /// Create a registry that builds Gemini providers from the resolved
    /// API key.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            active: Arc::new(Mutex::new(FxHashSet::default())),
            resolver: CredentialResolver::default(),
            provider_factory: Arc::new(|api_key| {
                Arc::new(GeminiProvider::new(GeminiConfig::new(api_key)))
            }),
            runner_config: RunnerConfig::default(),
        }
    }

    /// Override the credential resolver.
    pub fn with_resolver(mut self, resolver: CredentialResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Override how providers are built from the resolved key.
    pub fn with_provider_factory(
        mut self,
        factory: impl Fn(String) -> Arc<dyn GenerationProvider> + Send + Sync + 'static,
    ) -> Self {
        self.provider_factory = Arc::new(factory);
        self
    }

    /// Override the run loop tuning.
    pub fn with_runner_config(mut self, config: RunnerConfig) -> Self {
        self.runner_config = config;
        self
    }

    /// Whether a run loop for the job is live in this process.
    pub fn is_active(&self, job_id: &BatchJobId) -> bool {
        self.active
            .lock()
            .map(|set| set.contains(job_id))
            .unwrap_or(false)
    }

    /// Number of live run loops.
    pub fn active_count(&self) -> usize {
        self.active.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Schedule a job's run loop as a detached task.
    ///
    /// Rejects the request when the job is already running here or no API
    /// key can be resolved. The spawned loop deregisters itself whatever
    /// way it ends.
    pub async fn schedule(
        &self,
        job_id: &BatchJobId,
        request_api_key: Option<&str>,
    ) -> SchedResult<ScheduleOutcome> {
        let Some(api_key) = self.resolver.resolve(request_api_key) else {
            return Ok(ScheduleOutcome::rejected(RejectReason::MissingApiKey));
        };

        {
            let mut active = self
                .active
                .lock()
                .map_err(|e| crate::error::SchedError::Internal(e.to_string()))?;
            if !active.insert(job_id.clone()) {
                return Ok(ScheduleOutcome::rejected(RejectReason::AlreadyRunning));
            }
        }

        let guard = ActiveGuard {
            active: Arc::clone(&self.active),
            job_id: job_id.clone(),
        };
        let provider = (self.provider_factory)(api_key);
        let runner =
            JobRunner::new(Arc::clone(&self.store), provider).with_config(self.runner_config);
        let run_id = job_id.clone();

        tokio::spawn(async move {
            // Deregisters on every exit path.
            let _guard = guard;
            match runner.run(&run_id).await {
                Ok(state) => info!(job_id = %run_id, state = %state, "run loop exited"),
                Err(e) => error!(job_id = %run_id, error = %e, "run loop failed"),
            }
        });

        info!(job_id = %job_id, "run loop scheduled");
        Ok(ScheduleOutcome::scheduled())
    }
}

struct ActiveGuard {
    active: Arc<Mutex<FxHashSet<BatchJobId>>>,
    job_id: BatchJobId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.active.lock() {
            set.remove(&self.job_id);
        }
    }
}
