use crate::cli::{Cli, Commands, OutputFormat};
use crate::output::{build_summary, emit_error, emit_output, ProgressPrinter};
use chrono::Utc;
use clap::Parser;
use erpswarm::backends::provider_catalog;
use erpswarm::ports::CancelFlag;
use erpswarm::rpc::{dry_run_report, ApplyOptions, ApplyReport, JsonRpcTransport};
use erpswarm::swarm::{config_tasks, render_summary};
use erpswarm::{
    load_config, BackendPorts, BuildId, BuildRegistry, BuildStatus, BuildStatusView,
    CompanyProfile, DecisionEngine, DecisionOutcome, DeployTarget, ModuleRegistry,
    RemoteConfigClient, Result, RpcCredentials, RpcSettings, SignalMap, SwarmError, TargetSpec,
    Tier,
};
use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs the parsed command and returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let output = cli.output;
    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            debug!(code = err.code(), "Command failed");
            emit_error(output, &err);
            err.exit_code()
        }
    }
}

async fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Decide {
            ref signals,
            ref registry,
            ref tier,
            ref target_version,
            ref out_dir,
            ref company,
        } => {
            decide_command(
                &cli,
                signals,
                registry.as_deref(),
                tier,
                target_version,
                out_dir.as_deref(),
                company.as_deref(),
            )
            .await
        }
        Commands::Order { ref plan } => order_command(&cli, plan).await,
        Commands::Apply {
            ref plan,
            ref url,
            ref db,
            ref user,
            ref password,
            dry_run,
            fail_on_missing,
        } => {
            if dry_run {
                apply_dry_run_command(&cli, plan).await
            } else {
                let target = ApplyTarget {
                    url: url.clone(),
                    database: db.clone(),
                    username: user.clone(),
                    password: password.clone(),
                };
                apply_command(&cli, plan, target, fail_on_missing).await
            }
        }
        Commands::Build {
            ref spec,
            ref target,
            ref provider,
        } => build_command(&cli, spec, target.as_deref(), provider.clone()).await,
        Commands::Providers => {
            providers_command(&cli);
            Ok(0)
        }
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        SwarmError::ConfigError(format!("Cannot read {what} {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| SwarmError::ConfigError(format!("Invalid {what} {}: {e}", path.display())))
}

async fn write_artifact(dir: &Path, name: &str, content: String) -> Result<PathBuf> {
    let path = dir.join(name);
    tokio::fs::write(&path, content).await?;
    info!(path = %path.display(), "Wrote artifact");
    Ok(path)
}

async fn decide_command(
    cli: &Cli,
    signals: &Path,
    registry: Option<&Path>,
    tier: &str,
    target_version: &str,
    out_dir: Option<&Path>,
    company: Option<&str>,
) -> Result<i32> {
    let signals: SignalMap = read_json(signals, "signal file").await?;
    let tier = Tier::try_from(tier).map_err(SwarmError::ConfigError)?;
    let registry = Arc::new(match registry {
        Some(path) => ModuleRegistry::from_json_file(path)?,
        None => ModuleRegistry::builtin()?,
    });

    let engine = DecisionEngine::new(Arc::clone(&registry), tier, target_version)?;
    let outcome = engine.decide(&signals).await?;
    let tasks = config_tasks(&outcome, &registry);
    let summary = render_summary(company.unwrap_or("ERP Implementation"), &outcome, &tasks);

    let mut written = Vec::new();
    if let Some(dir) = out_dir {
        tokio::fs::create_dir_all(dir).await?;
        written.push(write_artifact(dir, "module_plan.json", serde_json::to_string_pretty(&outcome)?).await?);
        written.push(write_artifact(dir, "config_tasks.json", serde_json::to_string_pretty(&tasks)?).await?);
        written.push(write_artifact(dir, "implementation_summary.md", summary.clone()).await?);
        if let Some(name) = company {
            let spec_id = format!("spec-{}", Utc::now().format("%Y%m%d%H%M%S"));
            let spec = TargetSpec::from_decision(spec_id, CompanyProfile::new(name), &outcome);
            written.push(write_artifact(dir, "target_spec.json", serde_json::to_string_pretty(&spec)?).await?);
        }
    }

    let decision = &outcome.decision;
    emit_output(
        cli.output,
        "decide",
        json!({
            "message": summary,
            "install_order": outcome.install_order,
            "selected": decision.selected.iter().map(|m| m.key.value()).collect::<Vec<_>>(),
            "auto_added": decision.auto_added,
            "rejected": decision.rejected.iter().map(|r| json!({
                "module": r.candidate.key,
                "reason": r.reason.as_str(),
                "fallbacks": r.suggested_fallbacks,
            })).collect::<Vec<_>>(),
            "open_questions": decision.open_questions,
            "risks": decision.risks,
            "files": written.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        }),
    );
    Ok(0)
}

async fn order_command(cli: &Cli, plan: &Path) -> Result<i32> {
    let mut outcome: DecisionOutcome = read_json(plan, "module plan").await?;
    outcome.reorder()?;
    let message = outcome
        .install_order
        .iter()
        .enumerate()
        .map(|(index, key)| format!("{:>3}. {key}", index + 1))
        .join("\n");
    emit_output(
        cli.output,
        "order",
        json!({"message": message, "install_order": outcome.install_order}),
    );
    Ok(0)
}

struct ApplyTarget {
    url: Option<String>,
    database: Option<String>,
    username: String,
    password: Option<String>,
}

fn required(value: Option<String>, flag: &str, env: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SwarmError::ConfigError(format!("--{flag} or {env} is required")))
}

async fn apply_dry_run_command(cli: &Cli, plan: &Path) -> Result<i32> {
    let mut outcome: DecisionOutcome = read_json(plan, "module plan").await?;
    outcome.reorder()?;
    let report = dry_run_report(&outcome.install_order);
    emit_apply_report(cli.output, &report);
    Ok(0)
}

async fn apply_command(
    cli: &Cli,
    plan: &Path,
    target: ApplyTarget,
    fail_on_missing: bool,
) -> Result<i32> {
    let mut outcome: DecisionOutcome = read_json(plan, "module plan").await?;
    outcome.reorder()?;
    let credentials = RpcCredentials {
        url: required(target.url, "url", "ERP_URL")?,
        database: required(target.database, "db", "ERP_DB")?,
        username: target.username,
        password: required(target.password, "password", "ERP_PASSWORD")?,
        version: outcome.target_version.clone(),
    };
    let config = load_config(cli.config.clone()).await?;
    let transport = Arc::new(JsonRpcTransport::new(config.request_timeout));
    let mut client = RemoteConfigClient::new(credentials, transport, RpcSettings::from(&config));

    let cancel = CancelFlag::new();
    let interrupts = cancel_on_interrupt(cancel.clone());
    let options = ApplyOptions {
        update_catalog: true,
        fail_on_missing,
    };
    let report = client
        .apply_plan(&outcome.install_order, options, &cancel)
        .await;
    interrupts.abort();
    let report = report?;

    emit_apply_report(cli.output, &report);
    Ok(i32::from(report.has_failures()))
}

fn emit_apply_report(output: OutputFormat, report: &ApplyReport) {
    let target = if report.dry_run {
        "dry run".to_string()
    } else {
        format!("{} / {}", report.target_url, report.target_database)
    };
    let message = std::iter::once(format!(
        "Applied {} modules ({target})",
        report.install_order.len()
    ))
    .chain(report.results.iter().map(|result| {
        format!(
            "  {:<18} {:<28} {}",
            result.status.as_str(),
            result.module.value(),
            result.details
        )
    }))
    .join("\n");
    emit_output(output, "apply", json!({"message": message, "report": report}));
}

fn cancel_on_interrupt(cancel: CancelFlag) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            cancel.cancel();
        }
    })
}

async fn build_command(
    cli: &Cli,
    spec: &Path,
    target: Option<&str>,
    provider: Option<String>,
) -> Result<i32> {
    let mut spec: TargetSpec = read_json(spec, "target spec").await?;
    if let Some(target) = target {
        spec.deploy_target = DeployTarget::try_from(target).map_err(SwarmError::ConfigError)?;
    }
    if provider.is_some() {
        spec.cloud_provider = provider;
    }

    let config = load_config(cli.config.clone()).await?;
    let ports = BackendPorts::live(&config);
    let registry = Arc::new(BuildRegistry::new(config, ports));
    let (sender, mut updates) = watch::channel::<Option<BuildStatusView>>(None);
    let started = registry.start_build_with_sink(spec, Arc::new(sender))?;
    let build_id = started.build_id.clone();
    info!(build_id = %build_id, target = %started.deploy_target, "Build started");

    let confirmations = (started.deploy_target == DeployTarget::GuidedCloud)
        .then(|| confirm_from_stdin(Arc::clone(&registry), build_id.clone()));
    let finished = follow_build(&registry, &build_id, &mut updates, cli.output).await;
    if let Some(confirmations) = confirmations {
        confirmations.abort();
    }
    let view = finished?;

    emit_output(
        cli.output,
        "build",
        json!({"message": build_summary(&view), "build": view}),
    );
    Ok(i32::from(view.status != BuildStatus::Completed))
}

/// Streams progress until the worker finishes. The first interrupt stops
/// the build; the worker then winds down on its own.
async fn follow_build(
    registry: &BuildRegistry,
    build_id: &BuildId,
    updates: &mut watch::Receiver<Option<BuildStatusView>>,
    output: OutputFormat,
) -> Result<BuildStatusView> {
    let mut printer = ProgressPrinter::default();
    let finished = registry.wait(build_id);
    tokio::pin!(finished);
    let mut updates_open = true;
    let mut stopping = false;

    loop {
        tokio::select! {
            view = &mut finished => return view,
            changed = updates.changed(), if updates_open => {
                if changed.is_err() {
                    updates_open = false;
                } else if output == OutputFormat::Text {
                    let view = updates.borrow_and_update().clone();
                    if let Some(view) = view {
                        printer.show(&view);
                    }
                }
            }
            interrupted = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                if interrupted.is_ok() {
                    warn!(build_id = %build_id, "Interrupt received, stopping build");
                    registry.stop_build(build_id)?;
                }
            }
        }
    }
}

/// Each line on stdin confirms the action the build is waiting for.
fn confirm_from_stdin(registry: Arc<BuildRegistry>, build_id: BuildId) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            match registry.confirm_action(&build_id) {
                Ok(_) => info!(build_id = %build_id, "Action confirmed"),
                Err(SwarmError::Conflict(_)) => debug!("No action is waiting"),
                Err(err) => {
                    warn!(error = %err, "Confirmation failed");
                    return;
                }
            }
        }
    })
}

fn providers_command(cli: &Cli) {
    let providers = provider_catalog();
    let message = providers
        .iter()
        .map(|provider| {
            format!(
                "{:<10} {:<12} {}{}",
                provider.id,
                provider.name,
                provider.signup_url,
                if provider.recommended {
                    "  (recommended)"
                } else {
                    ""
                }
            )
        })
        .join("\n");
    emit_output(
        cli.output,
        "providers",
        json!({"message": message, "providers": providers}),
    );
}
