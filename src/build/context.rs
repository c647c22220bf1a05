use crate::error::{Result, SwarmError};
use crate::ports::CancelFlag;
use crate::types::{BuildOutputs, BuildState, BuildStatusView, ModuleKey, TaskStatus};
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

pub type SharedBuildState = Arc<RwLock<BuildState>>;

/// Observer invoked after every task transition with a fresh snapshot.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, view: &BuildStatusView);
}

impl<F> ProgressSink for F
where
    F: Fn(&BuildStatusView) + Send + Sync,
{
    fn notify(&self, view: &BuildStatusView) {
        self(view);
    }
}

impl ProgressSink for watch::Sender<Option<BuildStatusView>> {
    fn notify(&self, view: &BuildStatusView) {
        self.send_replace(Some(view.clone()));
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn notify(&self, _view: &BuildStatusView) {}
}

/// External "done" signal for tasks waiting on the operator. Each wait arms
/// a fresh one-shot channel, so a confirmation releases at most one wait.
#[derive(Debug, Clone, Default)]
pub struct ActionGate {
    pending: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ActionGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases the armed wait. Returns `false` when nothing is waiting.
    pub fn confirm(&self) -> bool {
        self.pending
            .lock()
            .take()
            .is_some_and(|sender| sender.send(()).is_ok())
    }

    fn arm(&self) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        *self.pending.lock() = Some(sender);
        receiver
    }

    fn disarm(&self) {
        self.pending.lock().take();
    }
}

/// Everything shared by the tasks of one build.
#[derive(Clone)]
pub struct BuildHandle {
    pub state: SharedBuildState,
    pub cancel: CancelFlag,
    pub gate: ActionGate,
    pub sink: Arc<dyn ProgressSink>,
    pub log_capacity: usize,
}

impl BuildHandle {
    #[must_use]
    pub fn new(state: BuildState, sink: Arc<dyn ProgressSink>, log_capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            cancel: CancelFlag::new(),
            gate: ActionGate::new(),
            sink,
            log_capacity,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> BuildStatusView {
        self.state.read().status_view()
    }

    pub fn notify(&self) {
        let view = self.snapshot();
        self.sink.notify(&view);
    }

    #[must_use]
    pub fn task(&self, index: usize) -> TaskContext {
        let (build_id, task_name) = {
            let state = self.state.read();
            let name = state
                .tasks
                .get(index)
                .map(|task| task.name.clone())
                .unwrap_or_default();
            (state.build_id.to_string(), name)
        };
        TaskContext {
            handle: self.clone(),
            index,
            build_id,
            task_name,
        }
    }
}

/// Write access to one task of a running build.
#[derive(Clone)]
pub struct TaskContext {
    handle: BuildHandle,
    index: usize,
    build_id: String,
    task_name: String,
}

impl TaskContext {
    #[must_use]
    pub const fn cancel(&self) -> &CancelFlag {
        &self.handle.cancel
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.task_name
    }

    #[must_use]
    pub fn module(&self) -> Option<ModuleKey> {
        self.handle
            .state
            .read()
            .tasks
            .get(self.index)
            .and_then(|task| task.module.clone())
    }

    #[must_use]
    pub fn status(&self) -> Option<TaskStatus> {
        self.handle
            .state
            .read()
            .tasks
            .get(self.index)
            .map(|task| task.status)
    }

    fn append(&self, message: &str) {
        let line = format!("[{}] {message}", Local::now().format("%H:%M:%S"));
        {
            let mut state = self.handle.state.write();
            if let Some(task) = state.tasks.get_mut(self.index) {
                task.push_log(line, self.handle.log_capacity);
            }
        }
        self.handle.notify();
    }

    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(build_id = %self.build_id, task = %self.task_name, "{message}");
        self.append(message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(build_id = %self.build_id, task = %self.task_name, "{message}");
        self.append(&format!("Warning: {message}"));
    }

    pub fn set_progress(&self, progress: u8) {
        {
            let mut state = self.handle.state.write();
            if let Some(task) = state.tasks.get_mut(self.index) {
                task.progress = progress.min(100);
            }
        }
        self.handle.notify();
    }

    pub fn update_outputs(&self, update: impl FnOnce(&mut BuildOutputs)) {
        update(&mut self.handle.state.write().outputs);
        self.handle.notify();
    }

    #[must_use]
    pub fn outputs(&self) -> BuildOutputs {
        self.handle.state.read().outputs.clone()
    }

    /// Parks the task in `waiting_user` until the build's action gate is
    /// confirmed, then resumes it.
    ///
    /// # Errors
    /// Returns `Cancelled` if the build is stopped while waiting.
    pub async fn wait_for_user(
        &self,
        url: Option<&str>,
        instructions: impl Into<String>,
    ) -> Result<()> {
        let instructions = instructions.into();
        let confirmed = {
            let mut state = self.handle.state.write();
            if let Some(task) = state.tasks.get_mut(self.index) {
                task.status = TaskStatus::WaitingUser;
                task.user_action_url = url.map(ToString::to_string);
                task.user_instructions = Some(instructions.clone());
            }
            self.handle.gate.arm()
        };
        self.log(format!("Action required: {instructions}"));
        if let Some(url) = url {
            self.log(format!("Open: {url}"));
        }

        if let Err(err) = self.handle.cancel.check("wait_for_user") {
            self.handle.gate.disarm();
            return Err(err);
        }
        tokio::select! {
            released = confirmed => {
                if released.is_err() {
                    return Err(SwarmError::Cancelled("wait_for_user".to_string()));
                }
            }
            () = self.handle.cancel.cancelled() => {
                self.handle.gate.disarm();
                return Err(SwarmError::Cancelled("wait_for_user".to_string()));
            }
        }

        {
            let mut state = self.handle.state.write();
            if let Some(task) = state.tasks.get_mut(self.index) {
                task.status = TaskStatus::InProgress;
                task.user_instructions = None;
            }
        }
        self.log("Confirmed by operator");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{BuildHandle, NoProgress, ProgressSink};
    use crate::error::SwarmError;
    use crate::types::{
        BuildId, BuildState, BuildStatusView, BuildTask, DeployTarget, TaskKind, TaskStatus,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn handle_with(sink: Arc<dyn ProgressSink>) -> BuildHandle {
        let mut state = BuildState::new(BuildId::new("build-ctx"), "spec", DeployTarget::GuidedCloud);
        state.tasks = vec![BuildTask::new(TaskKind::Provision, "Create Account", "")];
        state.tasks[0].start();
        BuildHandle::new(state, sink, 3)
    }

    #[test]
    fn log_lines_are_timestamped_bounded_and_notified() {
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let sink: Arc<dyn ProgressSink> = Arc::new(move |_view: &BuildStatusView| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let handle = handle_with(sink);
        let ctx = handle.task(0);

        for n in 0..5 {
            ctx.log(format!("step {n}"));
        }
        ctx.warn("disk almost full");

        let view = handle.snapshot();
        let logs = &view.tasks[0].logs;
        assert_eq!(logs.len(), 3);
        assert!(logs[0].starts_with('['));
        assert!(logs[2].ends_with("Warning: disk almost full"));
        assert_eq!(notified.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn given_waiting_task_when_confirmed_then_task_resumes() {
        let handle = handle_with(Arc::new(NoProgress));
        let ctx = handle.task(0);
        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.wait_for_user(Some("https://signup.example"), "Create an account").await }
        });

        for _ in 0..50 {
            if ctx.status() == Some(TaskStatus::WaitingUser) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let view = handle.snapshot();
        assert_eq!(
            view.current_task.as_ref().map(|task| task.status),
            Some(TaskStatus::WaitingUser)
        );
        assert_eq!(
            view.tasks[0].user_action_url.as_deref(),
            Some("https://signup.example")
        );

        assert!(handle.gate.confirm());
        assert!(!handle.gate.confirm());
        let result = waiter.await.expect("join");
        assert!(result.is_ok());
        assert_eq!(ctx.status(), Some(TaskStatus::InProgress));
    }

    #[tokio::test]
    async fn given_no_waiting_task_when_confirmed_then_next_wait_still_blocks() {
        let handle = handle_with(Arc::new(NoProgress));
        let ctx = handle.task(0);

        assert!(!handle.gate.confirm());
        let wait = ctx.wait_for_user(None, "Create an instance");
        let outcome = tokio::time::timeout(Duration::from_millis(50), wait).await;

        assert!(outcome.is_err());
        assert_eq!(ctx.status(), Some(TaskStatus::WaitingUser));
    }

    #[tokio::test]
    async fn given_waiting_task_when_cancelled_then_wait_errors() {
        let handle = handle_with(Arc::new(NoProgress));
        let ctx = handle.task(0);
        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.wait_for_user(None, "Create an instance").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel.cancel();
        let result = waiter.await.expect("join");
        assert!(matches!(result, Err(SwarmError::Cancelled(_))));
    }
}
