#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use super::{public_url, start_command, PaasBackend};
use crate::backends::fakes::{
    logs, task_context, FakeCommands, FakeControlPlane, FakeErp, FakeHealth,
};
use crate::backends::{BackendPorts, DeployBackend};
use crate::config::BuilderConfig;
use crate::error::SwarmError;
use crate::types::{CompanyProfile, DeployTarget, ModuleKey, TargetSpec};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    control_plane: FakeControlPlane,
    health: FakeHealth,
    erp: FakeErp,
}

impl Harness {
    fn backend(&self, attempts: u32) -> PaasBackend {
        let config = BuilderConfig {
            cloud_ready_attempts: attempts,
            cloud_ready_interval: Duration::from_millis(1),
            login_attempts: 1,
            install_poll_interval: Duration::from_millis(1),
            ..BuilderConfig::default()
        };
        let ports = BackendPorts {
            commands: Arc::new(FakeCommands::default()),
            health: Arc::new(self.health.clone()),
            rpc: Arc::new(self.erp.clone()),
            control_plane: None,
        };
        let spec = TargetSpec::new("spec-1", CompanyProfile::new("Acme Widgets"))
            .with_target(DeployTarget::CloudPaas);
        PaasBackend::new(&spec, &config, &ports, Arc::new(self.control_plane.clone()))
    }
}

fn harness() -> Harness {
    Harness {
        control_plane: FakeControlPlane::default(),
        health: FakeHealth::default(),
        erp: FakeErp::default(),
    }
}

#[test]
fn domains_get_an_https_scheme_once() {
    assert_eq!(public_url(" acme.up.example.app "), "https://acme.up.example.app");
    assert_eq!(public_url("https://acme.example.app"), "https://acme.example.app");
    assert_eq!(public_url("http://acme.example.app"), "http://acme.example.app");
}

#[test]
fn start_command_initializes_base_without_demo_data() {
    let command = start_command("odoo", "pw123");
    assert!(command.starts_with("odoo --database odoo --init base"));
    assert!(command.contains("--db_host $HOST --db_port 5432"));
    assert!(command.contains("--db_password pw123"));
    assert!(command.ends_with("--without-demo=all"));
}

#[tokio::test]
async fn given_control_plane_when_provisioning_then_both_services_are_wired() {
    let h = harness();
    let mut backend = h.backend(3);
    let (handle, ctx) = task_context(DeployTarget::CloudPaas);

    backend.provision(&ctx).await.unwrap();

    let calls = h.control_plane.calls().await;
    assert_eq!(calls[0], "create_project:odoo-acme-widgets");
    assert_eq!(calls[1], "create_service:Postgres");
    assert_eq!(calls[2], "set_image:svc-postgres:postgres:15");
    assert_eq!(calls[4], "create_service:Odoo");
    assert_eq!(calls[5], "set_image:svc-odoo:odoo:17.0");
    assert!(calls[7].starts_with("set_start_command:svc-odoo:odoo --database odoo"));
    assert_eq!(calls[8], "create_domain:svc-odoo");

    let postgres = h.control_plane.variables_of("svc-postgres").await;
    let odoo = h.control_plane.variables_of("svc-odoo").await;
    assert_eq!(postgres["POSTGRES_USER"], "odoo");
    assert_eq!(postgres["POSTGRES_PASSWORD"], odoo["PASSWORD"]);
    assert_eq!(odoo["HOST"], "${{Postgres.RAILWAY_PRIVATE_DOMAIN}}");

    let outputs = handle.snapshot().outputs;
    assert_eq!(outputs.url.as_deref(), Some("https://acme-odoo.up.example.app"));
    assert_eq!(outputs.project_id.as_deref(), Some("proj-1"));
    assert_eq!(outputs.environment_id.as_deref(), Some("env-1"));
    assert_eq!(outputs.service_id.as_deref(), Some("svc-odoo"));
}

#[tokio::test]
async fn given_domain_failure_when_provisioning_then_partial_project_is_deleted() {
    let h = Harness {
        control_plane: FakeControlPlane::default().failing_on("create_domain").await,
        ..harness()
    };
    let mut backend = h.backend(3);
    let (handle, ctx) = task_context(DeployTarget::CloudPaas);

    let result = backend.provision(&ctx).await;

    assert!(matches!(result, Err(SwarmError::ProvisioningError(_))));
    assert_eq!(
        h.control_plane.calls().await.last().map(String::as_str),
        Some("delete_project:proj-1")
    );
    assert!(logs(&handle)
        .iter()
        .any(|line| line.contains("Cleaning up partial project")));
    assert!(!backend.cleanup(&ctx).await.unwrap());
}

#[tokio::test]
async fn given_booting_instance_when_waiting_then_any_ready_path_counts() {
    let h = Harness {
        health: FakeHealth::default().healthy_after(1).await,
        ..harness()
    };
    let mut backend = h.backend(3);
    let (_handle, ctx) = task_context(DeployTarget::CloudPaas);
    backend.provision(&ctx).await.unwrap();

    backend.wait_ready(&ctx).await.unwrap();

    assert_eq!(
        h.health.checks().await,
        vec![
            "https://acme-odoo.up.example.app/web/login",
            "https://acme-odoo.up.example.app/web/database/selector",
        ]
    );
}

#[tokio::test]
async fn given_instance_never_answers_when_waiting_then_progress_is_logged_and_it_times_out() {
    let h = harness();
    let mut backend = h.backend(7);
    let (handle, ctx) = task_context(DeployTarget::CloudPaas);
    backend.provision(&ctx).await.unwrap();

    let result = backend.wait_ready(&ctx).await;

    assert!(matches!(result, Err(SwarmError::Timeout(_))));
    assert_eq!(h.health.checks().await.len(), 21);
    assert!(logs(&handle)
        .iter()
        .any(|line| line.contains("Still waiting... (")));
}

#[tokio::test]
async fn given_ready_instance_when_initializing_then_admin_password_is_rotated() {
    let h = harness();
    let mut backend = h.backend(3);
    let (handle, ctx) = task_context(DeployTarget::CloudPaas);
    backend.provision(&ctx).await.unwrap();

    backend.init_database(&ctx).await.unwrap();

    let rotated = handle.snapshot().outputs.admin_password.unwrap();
    assert_eq!(rotated.len(), 16);
    assert_ne!(rotated, "admin");
    let writes = h.erp.calls_to("res.users.write").await;
    assert_eq!(writes[0].args[1]["password"], rotated.as_str());
}

#[tokio::test]
async fn given_transport_error_when_installing_then_task_fails_and_next_install_reconnects() {
    let h = Harness {
        erp: FakeErp::default()
            .with_module("sale", 5, "uninstalled")
            .await
            .with_module("stock", 6, "uninstalled")
            .await
            .dropping("ir.module.module.update_list", 1)
            .await,
        ..harness()
    };
    let mut backend = h.backend(3);
    let (_handle, ctx) = task_context(DeployTarget::CloudPaas);
    backend.provision(&ctx).await.unwrap();

    let first = backend.install_module(&ctx, &ModuleKey::new("sale")).await;
    assert!(matches!(first, Err(SwarmError::TransportError(_))));

    backend
        .install_module(&ctx, &ModuleKey::new("stock"))
        .await
        .unwrap();
    assert_eq!(h.erp.logins().await, 2);
    assert_eq!(h.erp.module_state("stock").await.as_deref(), Some("installed"));
}

#[tokio::test]
async fn given_provisioned_project_when_cleaning_up_then_it_is_deleted_once() {
    let h = harness();
    let mut backend = h.backend(3);
    let (_handle, ctx) = task_context(DeployTarget::CloudPaas);
    backend.provision(&ctx).await.unwrap();

    assert!(backend.cleanup(&ctx).await.unwrap());
    assert!(!backend.cleanup(&ctx).await.unwrap());
    let deletes = h
        .control_plane
        .calls()
        .await
        .into_iter()
        .filter(|call| call.starts_with("delete_project"))
        .count();
    assert_eq!(deletes, 1);
}
