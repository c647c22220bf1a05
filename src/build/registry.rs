use super::context::{BuildHandle, NoProgress, ProgressSink};
use super::orchestrator::BuildOrchestrator;
use crate::backends::{backend_for, BackendPorts, DeployBackend};
use crate::config::BuilderConfig;
use crate::error::{Result, SwarmError};
use crate::types::{BuildId, BuildStatus, BuildStatusView, TargetSpec, TaskStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type BackendFactory =
    Arc<dyn Fn(&TargetSpec) -> Result<Box<dyn DeployBackend>> + Send + Sync>;

struct BuildRecord {
    handle: BuildHandle,
    worker: Option<JoinHandle<BuildStatusView>>,
    running: Arc<AtomicBool>,
    abandoned: bool,
}

impl BuildRecord {
    /// A stopped build stays busy until its worker has finished cleanup.
    /// Builds force-failed for exceeding the time limit are abandoned.
    fn is_busy(&self) -> bool {
        self.handle.state.read().is_active()
            || (!self.abandoned && self.running.load(Ordering::Acquire))
    }
}

/// Clears the running flag when the worker future completes or is dropped.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns every build of the process. Admits at most one active build.
pub struct BuildRegistry {
    builds: Mutex<HashMap<BuildId, BuildRecord>>,
    factory: BackendFactory,
    log_capacity: usize,
    retention: Duration,
    max_duration: Duration,
}

impl BuildRegistry {
    #[must_use]
    pub fn new(config: BuilderConfig, ports: BackendPorts) -> Self {
        let log_capacity = config.log_capacity;
        let retention = config.build_retention;
        let max_duration = config.max_build_duration;
        let factory: BackendFactory =
            Arc::new(move |spec: &TargetSpec| backend_for(spec, &config, &ports));
        Self {
            builds: Mutex::new(HashMap::new()),
            factory,
            log_capacity,
            retention,
            max_duration,
        }
    }

    #[must_use]
    pub fn with_backend_factory(mut self, factory: BackendFactory) -> Self {
        self.factory = factory;
        self
    }

    /// # Errors
    /// See [`Self::start_build_with_sink`].
    pub fn start_build(&self, spec: TargetSpec) -> Result<BuildStatusView> {
        self.start_build_with_sink(spec, Arc::new(NoProgress))
    }

    /// Admits and spawns a build. Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns `Conflict` while another build is active, `ConfigError` when
    /// the backend cannot be created, `DependencyCycle` when the modules
    /// cannot be ordered.
    pub fn start_build_with_sink(
        &self,
        spec: TargetSpec,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<BuildStatusView> {
        let mut builds = self.builds.lock();
        let now = Utc::now();
        self.force_fail_stale(&mut builds, now);
        self.prune(&mut builds, now);

        if let Some((id, record)) = builds.iter().find(|(_, record)| record.is_busy()) {
            warn!(active = %id, "Build rejected: another build is active");
            let message = if record.handle.state.read().is_active() {
                format!("Build {id} is already running")
            } else {
                format!("Build {id} is still shutting down")
            };
            return Err(SwarmError::Conflict(message));
        }

        let backend = (self.factory)(&spec)?;
        let orchestrator = BuildOrchestrator::new(spec, backend, sink, self.log_capacity)?;
        let handle = orchestrator.handle().clone();
        let view = handle.snapshot();
        let running = Arc::new(AtomicBool::new(true));
        let guard = RunningGuard(Arc::clone(&running));
        let worker = tokio::spawn(async move {
            let _guard = guard;
            orchestrator.execute().await
        });
        info!(build_id = %view.build_id, "Build admitted");

        builds.insert(
            view.build_id.clone(),
            BuildRecord {
                handle,
                worker: Some(worker),
                running,
                abandoned: false,
            },
        );
        Ok(view)
    }

    /// # Errors
    /// Returns `NotFound` for an unknown build.
    pub fn get_status(&self, build_id: &BuildId) -> Result<BuildStatusView> {
        let builds = self.builds.lock();
        builds
            .get(build_id)
            .map(|record| record.handle.snapshot())
            .ok_or_else(|| not_found(build_id))
    }

    #[must_use]
    pub fn list(&self) -> Vec<BuildStatusView> {
        let builds = self.builds.lock();
        let mut views: Vec<BuildStatusView> =
            builds.values().map(|record| record.handle.snapshot()).collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        views
    }

    /// Requests cancellation and marks the build failed. Stopping a
    /// finished build is a no-op.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown build.
    pub fn stop_build(&self, build_id: &BuildId) -> Result<BuildStatusView> {
        let builds = self.builds.lock();
        let record = builds.get(build_id).ok_or_else(|| not_found(build_id))?;
        if record.handle.state.read().is_active() {
            info!(build_id = %build_id, "Stopping build");
            mark_failed(&record.handle, "Build stopped");
        } else {
            debug!(build_id = %build_id, "Stop requested for finished build");
        }
        Ok(record.handle.snapshot())
    }

    /// Releases the task currently waiting on the operator. The task leaves
    /// `waiting_user` under the same lock, so a repeated confirmation is
    /// rejected instead of pre-confirming the next wait.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown build, `Conflict` when no task is
    /// waiting.
    pub fn confirm_action(&self, build_id: &BuildId) -> Result<BuildStatusView> {
        let builds = self.builds.lock();
        let record = builds.get(build_id).ok_or_else(|| not_found(build_id))?;
        let released = {
            let mut state = record.handle.state.write();
            match state
                .tasks
                .iter_mut()
                .find(|task| task.status == TaskStatus::WaitingUser)
            {
                Some(task) if record.handle.gate.confirm() => {
                    task.status = TaskStatus::InProgress;
                    true
                }
                _ => false,
            }
        };
        if !released {
            return Err(SwarmError::Conflict(format!(
                "Build {build_id} has no task waiting for confirmation"
            )));
        }
        info!(build_id = %build_id, "Operator action confirmed");
        record.handle.notify();
        Ok(record.handle.snapshot())
    }

    /// Waits for the worker of `build_id` to finish.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown build, `Internal` if the worker
    /// panicked.
    pub async fn wait(&self, build_id: &BuildId) -> Result<BuildStatusView> {
        let worker = {
            let mut builds = self.builds.lock();
            let record = builds.get_mut(build_id).ok_or_else(|| not_found(build_id))?;
            record.worker.take()
        };
        match worker {
            Some(worker) => worker
                .await
                .map_err(|e| SwarmError::Internal(format!("Build worker failed: {e}"))),
            None => self.get_status(build_id),
        }
    }

    fn force_fail_stale(&self, builds: &mut HashMap<BuildId, BuildRecord>, now: DateTime<Utc>) {
        for (id, record) in builds.iter_mut() {
            let started_at = {
                let state = record.handle.state.read();
                if state.status != BuildStatus::InProgress {
                    continue;
                }
                state.started_at
            };
            if started_at.is_some_and(|started| elapsed(started, now) > self.max_duration) {
                warn!(build_id = %id, "Build exceeded maximum duration; forcing failure");
                mark_failed(
                    &record.handle,
                    &format!(
                        "Build timed out after {} minutes",
                        self.max_duration.as_secs() / 60
                    ),
                );
                record.abandoned = true;
            }
        }
    }

    fn prune(&self, builds: &mut HashMap<BuildId, BuildRecord>, now: DateTime<Utc>) {
        builds.retain(|id, record| {
            if record.is_busy() {
                return true;
            }
            let state = record.handle.state.read();
            let expired = state
                .completed_at
                .is_some_and(|completed| elapsed(completed, now) > self.retention);
            if expired {
                debug!(build_id = %id, "Pruning finished build");
            }
            !expired
        });
    }
}

fn mark_failed(handle: &BuildHandle, reason: &str) {
    handle.cancel.cancel();
    {
        let mut state = handle.state.write();
        state.status = BuildStatus::Failed;
        state.error.get_or_insert_with(|| reason.to_string());
        state.completed_at.get_or_insert_with(Utc::now);
    }
    handle.notify();
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

fn not_found(build_id: &BuildId) -> SwarmError {
    SwarmError::NotFound(format!("Build {build_id} not found"))
}
