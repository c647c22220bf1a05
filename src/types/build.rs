use super::{BuildId, DeployTarget, ModuleKey, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Lines of task log surfaced in status snapshots.
pub const LOG_TAIL_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Provision,
    DbInit,
    ModuleInstall,
    ModuleConfigure,
    UserSetup,
    FinalConfig,
}

impl TaskKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::DbInit => "db_init",
            Self::ModuleInstall => "module_install",
            Self::ModuleConfigure => "module_configure",
            Self::UserSetup => "user_setup",
            Self::FinalConfig => "final_config",
        }
    }

    /// Failure of these kinds aborts the whole build.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Provision | Self::DbInit)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
    WaitingUser,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::WaitingUser => "waiting_user",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::InProgress | Self::WaitingUser)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "waiting_user" => Ok(Self::WaitingUser),
            _ => Err(format!("Unknown task status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl BuildStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub logs: VecDeque<String>,
    pub module: Option<ModuleKey>,
    pub user_action_url: Option<String>,
    pub user_instructions: Option<String>,
}

impl BuildTask {
    #[must_use]
    pub fn new(kind: TaskKind, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: TaskId::generate(),
            kind,
            name: name.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            progress: 0,
            started_at: None,
            completed_at: None,
            error: None,
            logs: VecDeque::new(),
            module: None,
            user_action_url: None,
            user_instructions: None,
        }
    }

    #[must_use]
    pub fn for_module(mut self, module: ModuleKey) -> Self {
        self.module = Some(module);
        self
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::InProgress;
        self.progress = 0;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.error = None;
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Skipped;
        self.error = Some(reason.into());
    }

    /// Appends a log line, evicting the oldest once `capacity` is reached.
    pub fn push_log(&mut self, line: impl Into<String>, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.logs.len() >= capacity {
            self.logs.pop_front();
        }
        self.logs.push_back(line.into());
    }

    #[must_use]
    pub fn log_tail(&self, lines: usize) -> Vec<String> {
        let skip = self.logs.len().saturating_sub(lines);
        self.logs.iter().skip(skip).cloned().collect()
    }
}

/// Backend-specific results of a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutputs {
    pub url: Option<String>,
    pub database: Option<String>,
    pub admin_login: Option<String>,
    pub admin_password: Option<String>,
    pub provider: Option<String>,
    pub project_id: Option<String>,
    pub environment_id: Option<String>,
    pub service_id: Option<String>,
    pub work_dir: Option<String>,
    pub cleaned_up: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    pub build_id: BuildId,
    pub spec_id: String,
    pub deploy_target: DeployTarget,
    pub status: BuildStatus,
    pub tasks: Vec<BuildTask>,
    pub outputs: BuildOutputs,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BuildState {
    #[must_use]
    pub fn new(build_id: BuildId, spec_id: impl Into<String>, deploy_target: DeployTarget) -> Self {
        Self {
            build_id,
            spec_id: spec_id.into(),
            deploy_target,
            status: BuildStatus::Pending,
            tasks: Vec::new(),
            outputs: BuildOutputs::default(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn overall_progress(&self) -> u8 {
        if self.tasks.is_empty() {
            return 0;
        }
        let completed = self
            .tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .count();
        u8::try_from(completed * 100 / self.tasks.len()).unwrap_or(100)
    }

    #[must_use]
    pub fn current_task(&self) -> Option<&BuildTask> {
        self.tasks.iter().find(|task| task.status.is_active())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    #[must_use]
    pub fn failed_tasks(&self) -> Vec<&BuildTask> {
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Failed)
            .collect()
    }

    #[must_use]
    pub fn status_view(&self) -> BuildStatusView {
        BuildStatusView {
            build_id: self.build_id.clone(),
            spec_id: self.spec_id.clone(),
            deploy_target: self.deploy_target,
            status: self.status,
            overall_progress: self.overall_progress(),
            current_task: self.current_task().map(TaskView::from),
            tasks: self.tasks.iter().map(TaskView::from).collect(),
            outputs: self.outputs.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Read-only snapshot returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatusView {
    pub build_id: BuildId,
    pub spec_id: String,
    pub deploy_target: DeployTarget,
    pub status: BuildStatus,
    pub overall_progress: u8,
    pub current_task: Option<TaskView>,
    pub tasks: Vec<TaskView>,
    pub outputs: BuildOutputs,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: TaskId,
    pub kind: TaskKind,
    pub name: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub module: Option<ModuleKey>,
    pub error: Option<String>,
    pub user_action_url: Option<String>,
    pub user_instructions: Option<String>,
    pub logs: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&BuildTask> for TaskView {
    fn from(task: &BuildTask) -> Self {
        Self {
            id: task.id.clone(),
            kind: task.kind,
            name: task.name.clone(),
            status: task.status,
            progress: task.progress,
            module: task.module.clone(),
            error: task.error.clone(),
            user_action_url: task.user_action_url.clone(),
            user_instructions: task.user_instructions.clone(),
            logs: task.log_tail(LOG_TAIL_LINES),
            started_at: task.started_at,
            completed_at: task.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildState, BuildTask, TaskKind, TaskStatus, LOG_TAIL_LINES};
    use crate::types::{BuildId, DeployTarget};

    fn state_with(statuses: &[TaskStatus]) -> BuildState {
        let mut state = BuildState::new(BuildId::new("build-1"), "spec-1", DeployTarget::Local);
        state.tasks = statuses
            .iter()
            .map(|status| {
                let mut task = BuildTask::new(TaskKind::ModuleInstall, "Install", "");
                task.status = *status;
                task
            })
            .collect();
        state
    }

    #[test]
    fn overall_progress_counts_completed_tasks_only() {
        let state = state_with(&[
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::InProgress,
            TaskStatus::Pending,
        ]);
        assert_eq!(state.overall_progress(), 25);
        assert_eq!(
            state.current_task().map(|task| task.status),
            Some(TaskStatus::InProgress)
        );
    }

    #[test]
    fn waiting_task_is_reported_as_current() {
        let state = state_with(&[TaskStatus::Completed, TaskStatus::WaitingUser]);
        assert_eq!(
            state.status_view().current_task.map(|task| task.status),
            Some(TaskStatus::WaitingUser)
        );
    }

    #[test]
    fn log_buffer_is_bounded_and_view_shows_tail() {
        let mut task = BuildTask::new(TaskKind::Provision, "Provision", "");
        for line in 0..30 {
            task.push_log(format!("line {line}"), 20);
        }
        assert_eq!(task.logs.len(), 20);
        assert_eq!(task.logs.front().map(String::as_str), Some("line 10"));
        let tail = task.log_tail(LOG_TAIL_LINES);
        assert_eq!(tail.len(), LOG_TAIL_LINES);
        assert_eq!(tail.last().map(String::as_str), Some("line 29"));
    }

    #[test]
    fn only_provision_and_db_init_are_fatal() {
        assert!(TaskKind::Provision.is_fatal());
        assert!(TaskKind::DbInit.is_fatal());
        assert!(!TaskKind::ModuleInstall.is_fatal());
        assert!(!TaskKind::FinalConfig.is_fatal());
    }
}
