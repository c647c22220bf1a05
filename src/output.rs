use crate::cli::OutputFormat;
use erpswarm::error::get_error_info;
use erpswarm::{BuildStatusView, SwarmError, TaskStatus};
use serde_json::json;

pub fn emit_output(output: OutputFormat, command: &str, payload: serde_json::Value) {
    match output {
        OutputFormat::Text => payload
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| println!("{payload}"), |msg| println!("{msg}")),
        OutputFormat::Json => println!(
            "{}",
            json!({
                "command": command,
                "status": "ok",
                "payload": payload,
            })
        ),
    }
}

pub fn emit_error(output: OutputFormat, error: &SwarmError) {
    let code = error.code();
    match output {
        OutputFormat::Text => {
            eprintln!("error: {error}");
            if let Some((_, fix)) = get_error_info(code) {
                eprintln!("hint: {fix}");
            }
        }
        OutputFormat::Json => println!(
            "{}",
            json!({
                "status": "error",
                "error": {
                    "code": code,
                    "message": error.to_string(),
                    "fix": get_error_info(code).map(|(_, fix)| fix),
                },
            })
        ),
    }
}

/// Prints task transitions and new log lines of a running build.
#[derive(Default)]
pub struct ProgressPrinter {
    last_task: Option<(String, TaskStatus)>,
    last_line: Option<String>,
}

impl ProgressPrinter {
    pub fn show(&mut self, view: &BuildStatusView) {
        let Some(task) = &view.current_task else {
            return;
        };
        let key = (task.id.to_string(), task.status);
        if self.last_task.as_ref() != Some(&key) {
            println!(
                "[{:>3}%] {} ({})",
                view.overall_progress,
                task.name,
                task.status.as_str()
            );
            if task.status == TaskStatus::WaitingUser {
                if let Some(instructions) = &task.user_instructions {
                    println!("  >> {instructions}");
                }
                if let Some(url) = &task.user_action_url {
                    println!("  >> {url}");
                }
                println!("  >> press Enter when done");
            }
            self.last_task = Some(key);
        }
        if let Some(line) = task.logs.last() {
            if self.last_line.as_ref() != Some(line) {
                println!("         {line}");
                self.last_line = Some(line.clone());
            }
        }
    }
}

#[must_use]
pub fn build_summary(view: &BuildStatusView) -> String {
    let mut lines = vec![format!(
        "Build {} {} ({}%)",
        view.build_id,
        view.status.as_str(),
        view.overall_progress
    )];
    if let Some(error) = &view.error {
        lines.push(format!("  error: {error}"));
    }
    for task in &view.tasks {
        lines.push(format!("  - {:<28} {}", task.name, task.status.as_str()));
    }
    let outputs = &view.outputs;
    for (label, value) in [
        ("url", &outputs.url),
        ("database", &outputs.database),
        ("admin login", &outputs.admin_login),
        ("admin password", &outputs.admin_password),
        ("project", &outputs.project_id),
        ("work dir", &outputs.work_dir),
    ] {
        if let Some(value) = value {
            lines.push(format!("  {label}: {value}"));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::build_summary;
    use erpswarm::{BuildId, BuildState, BuildStatus, BuildTask, DeployTarget, TaskKind};

    #[test]
    fn summary_lists_tasks_and_known_outputs() {
        let mut state = BuildState::new(BuildId::new("build-1234abcd"), "spec", DeployTarget::Local);
        state.tasks = vec![BuildTask::new(TaskKind::Provision, "Provision Environment", "")];
        state.status = BuildStatus::Failed;
        state.error = Some("Provision Environment failed: no docker".to_string());
        state.outputs.url = Some("http://localhost:8069".to_string());

        let summary = build_summary(&state.status_view());

        assert!(summary.starts_with("Build build-1234abcd failed"));
        assert!(summary.contains("error: Provision Environment failed"));
        assert!(summary.contains("url: http://localhost:8069"));
        assert!(!summary.contains("database:"));
    }
}
