use super::{InstallWait, RemoteConfigClient};
use crate::error::{Result, SwarmError};
use crate::ports::CancelFlag;
use crate::types::ModuleKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleApplyStatus {
    Installed,
    AlreadyInstalled,
    Missing,
    Failed,
    DryRun,
}

impl ModuleApplyStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::AlreadyInstalled => "already_installed",
            Self::Missing => "missing",
            Self::Failed => "failed",
            Self::DryRun => "dry_run",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleApplyResult {
    pub module: ModuleKey,
    pub status: ModuleApplyStatus,
    pub details: String,
}

impl ModuleApplyResult {
    fn new(module: &ModuleKey, status: ModuleApplyStatus, details: impl Into<String>) -> Self {
        Self {
            module: module.clone(),
            status,
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub dry_run: bool,
    pub target_url: String,
    pub target_database: String,
    pub install_order: Vec<ModuleKey>,
    pub results: Vec<ModuleApplyResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ApplyReport {
    #[must_use]
    pub fn count(&self, status: ModuleApplyStatus) -> usize {
        self.results
            .iter()
            .filter(|result| result.status == status)
            .count()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.count(ModuleApplyStatus::Failed) > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    pub update_catalog: bool,
    pub fail_on_missing: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            update_catalog: true,
            fail_on_missing: false,
        }
    }
}

/// Planned installs only; no remote calls.
#[must_use]
pub fn dry_run_report(install_order: &[ModuleKey]) -> ApplyReport {
    let started_at = Utc::now();
    ApplyReport {
        dry_run: true,
        target_url: String::new(),
        target_database: String::new(),
        install_order: install_order.to_vec(),
        results: install_order
            .iter()
            .map(|module| {
                ModuleApplyResult::new(
                    module,
                    ModuleApplyStatus::DryRun,
                    "Planned installation only; no remote calls made.",
                )
            })
            .collect(),
        started_at,
        completed_at: Some(Utc::now()),
    }
}

impl RemoteConfigClient {
    /// Installs `install_order` in sequence, skipping modules already
    /// installed.
    ///
    /// # Errors
    /// Returns `NotFound` for a missing module when `fail_on_missing` is set,
    /// login/catalog errors, or `Cancelled`.
    pub async fn apply_plan(
        &mut self,
        install_order: &[ModuleKey],
        options: ApplyOptions,
        cancel: &CancelFlag,
    ) -> Result<ApplyReport> {
        let mut report = ApplyReport {
            dry_run: false,
            target_url: self.credentials().url.clone(),
            target_database: self.credentials().database.clone(),
            install_order: install_order.to_vec(),
            results: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        };

        self.login_with_retry(cancel).await?;
        if options.update_catalog {
            self.update_module_catalog().await?;
        }

        for module in install_order {
            cancel.check("apply_plan")?;
            let Some(module_id) = self.find_module(module.value()).await? else {
                report.results.push(ModuleApplyResult::new(
                    module,
                    ModuleApplyStatus::Missing,
                    "Module not found in target instance.",
                ));
                if options.fail_on_missing {
                    return Err(SwarmError::NotFound(format!(
                        "Module '{module}' not found in target instance"
                    )));
                }
                continue;
            };

            if self.get_module_state(module_id).await? == "installed" {
                report.results.push(ModuleApplyResult::new(
                    module,
                    ModuleApplyStatus::AlreadyInstalled,
                    "Module already installed.",
                ));
                continue;
            }

            if let Err(err) = self.install_module(module_id).await {
                warn!(module = %module, error = %err, "Install call failed");
                report.results.push(ModuleApplyResult::new(
                    module,
                    ModuleApplyStatus::Failed,
                    format!("Install call failed: {err}"),
                ));
                continue;
            }

            let result = match self.wait_until_installed(module_id, cancel).await? {
                InstallWait::Installed => ModuleApplyResult::new(
                    module,
                    ModuleApplyStatus::Installed,
                    "Installed successfully.",
                ),
                InstallWait::Failed(state) => ModuleApplyResult::new(
                    module,
                    ModuleApplyStatus::Failed,
                    format!("Module ended in state '{state}'."),
                ),
                InstallWait::TimedOut => ModuleApplyResult::new(
                    module,
                    ModuleApplyStatus::Failed,
                    "Timed out waiting for installation.",
                ),
            };
            info!(module = %module, status = result.status.as_str(), "Applied module");
            report.results.push(result);
        }

        report.completed_at = Some(Utc::now());
        Ok(report)
    }
}
