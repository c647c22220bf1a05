use super::context::{BuildHandle, ProgressSink, TaskContext};
use super::plan::plan_tasks;
use crate::backends::DeployBackend;
use crate::error::{Result, SwarmError};
use crate::types::{
    BuildId, BuildState, BuildStatus, BuildStatusView, ModuleKey, TargetSpec, TaskKind,
    TaskStatus,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

const STOPPED_MESSAGE: &str = "Build stopped";

/// Runs the tasks of one build strictly in order against one backend.
pub struct BuildOrchestrator {
    spec: TargetSpec,
    backend: Box<dyn DeployBackend>,
    handle: BuildHandle,
}

impl BuildOrchestrator {
    /// Plans the task list and creates the shared build state.
    ///
    /// # Errors
    /// Returns `DependencyCycle` if the requested modules cannot be ordered.
    pub fn new(
        spec: TargetSpec,
        backend: Box<dyn DeployBackend>,
        sink: Arc<dyn ProgressSink>,
        log_capacity: usize,
    ) -> Result<Self> {
        let mut state = BuildState::new(BuildId::generate(), &spec.spec_id, spec.deploy_target);
        state.tasks = plan_tasks(&spec)?;
        Ok(Self {
            spec,
            backend,
            handle: BuildHandle::new(state, sink, log_capacity),
        })
    }

    #[must_use]
    pub const fn handle(&self) -> &BuildHandle {
        &self.handle
    }

    /// Runs the build to a final status and returns the last snapshot.
    pub async fn execute(mut self) -> BuildStatusView {
        let (build_id, task_count) = {
            let mut state = self.handle.state.write();
            state.status = BuildStatus::InProgress;
            state.started_at = Some(Utc::now());
            (state.build_id.clone(), state.tasks.len())
        };
        info!(
            build_id = %build_id,
            backend = self.backend.name(),
            tasks = task_count,
            "Build started"
        );
        self.handle.notify();

        let cancel = self.handle.cancel.clone();
        let mut last_started = None;
        let mut failure = None;

        for index in 0..task_count {
            if cancel.is_cancelled() {
                failure = Some(STOPPED_MESSAGE.to_string());
                break;
            }

            let (kind, name, module) = {
                let mut state = self.handle.state.write();
                let Some(task) = state.tasks.get_mut(index) else {
                    break;
                };
                task.start();
                (task.kind, task.name.clone(), task.module.clone())
            };
            last_started = Some(index);
            self.handle.notify();
            info!(build_id = %build_id, task = %name, kind = %kind, "Task started");

            let ctx = self.handle.task(index);
            let outcome = cancel
                .guard(&name, self.run_task(&ctx, kind, module.as_ref()))
                .await;

            match outcome {
                Ok(()) => {
                    if let Some(task) = self.handle.state.write().tasks.get_mut(index) {
                        task.complete();
                    }
                    info!(build_id = %build_id, task = %name, "Task completed");
                    self.handle.notify();
                }
                Err(err) => {
                    let stopped = matches!(err, SwarmError::Cancelled(_));
                    let message = if stopped {
                        STOPPED_MESSAGE.to_string()
                    } else {
                        err.to_string()
                    };
                    ctx.log(format!("Failed: {message}"));
                    if let Some(task) = self.handle.state.write().tasks.get_mut(index) {
                        task.fail(message.clone());
                    }
                    self.handle.notify();

                    if stopped || kind.is_fatal() {
                        error!(build_id = %build_id, task = %name, error = %message, "Task failed; aborting build");
                        failure = Some(format!("{name} failed: {message}"));
                        break;
                    }
                    warn!(build_id = %build_id, task = %name, error = %message, "Task failed; continuing");
                }
            }
        }

        if failure.is_none() && cancel.is_cancelled() {
            failure = Some(STOPPED_MESSAGE.to_string());
        }

        match failure {
            Some(reason) => self.abort(reason, last_started).await,
            None => {
                let mut state = self.handle.state.write();
                state.status = BuildStatus::Completed;
                state.completed_at = Some(Utc::now());
            }
        }

        let view = self.handle.snapshot();
        info!(
            build_id = %build_id,
            status = %view.status,
            progress = view.overall_progress,
            "Build finished"
        );
        self.handle.sink.notify(&view);
        view
    }

    async fn run_task(
        &mut self,
        ctx: &TaskContext,
        kind: TaskKind,
        module: Option<&ModuleKey>,
    ) -> Result<()> {
        match kind {
            TaskKind::Provision => self.backend.provision(ctx).await,
            TaskKind::DbInit => {
                self.backend.wait_ready(ctx).await?;
                self.backend.init_database(ctx).await
            }
            TaskKind::ModuleInstall => {
                let module = module.ok_or_else(|| missing_module(kind))?;
                self.backend.install_module(ctx, module).await
            }
            TaskKind::ModuleConfigure => {
                let module = module.ok_or_else(|| missing_module(kind))?;
                let request = self.spec.module(module).ok_or_else(|| {
                    SwarmError::NotFound(format!("Module '{module}' is not part of the build"))
                })?;
                self.backend
                    .configure_module(ctx, module, &request.settings)
                    .await
            }
            TaskKind::UserSetup => {
                self.backend
                    .setup_users(ctx, &self.spec.user_roles, &self.spec.company)
                    .await
            }
            TaskKind::FinalConfig => self.backend.finalize(ctx, &self.spec.company).await,
        }
    }

    /// Marks the build failed, skips unstarted tasks and runs best-effort
    /// cleanup. Cleanup errors are logged, never returned.
    async fn abort(&mut self, reason: String, last_started: Option<usize>) {
        {
            let mut state = self.handle.state.write();
            for task in &mut state.tasks {
                if task.status == TaskStatus::Pending {
                    task.skip("Not started: build aborted");
                }
            }
            state.status = BuildStatus::Failed;
            state.error.get_or_insert(reason);
        }
        self.handle.notify();

        if let Some(index) = last_started {
            let ctx = self.handle.task(index);
            ctx.log("Releasing provisioned resources...");
            match self.backend.cleanup(&ctx).await {
                Ok(true) => {
                    ctx.log("Cleanup complete");
                    ctx.update_outputs(|outputs| outputs.cleaned_up = Some(true));
                }
                Ok(false) => ctx.log("Nothing to clean up"),
                Err(err) => {
                    ctx.warn(format!("Cleanup failed: {err}"));
                    ctx.update_outputs(|outputs| outputs.cleaned_up = Some(false));
                }
            }
        }

        self.handle.state.write().completed_at = Some(Utc::now());
    }
}

fn missing_module(kind: TaskKind) -> SwarmError {
    SwarmError::Internal(format!("{kind} task has no module"))
}
