#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use super::{generate_secret, sanitize_login, RemoteSteps};
use crate::backends::fakes::{logs, task_context, FakeErp};
use crate::error::SwarmError;
use crate::rpc::{RpcCredentials, RpcSettings};
use crate::types::{CompanyProfile, DeployTarget, ModuleKey, UserRole};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

fn steps(erp: &FakeErp) -> RemoteSteps {
    RemoteSteps::new(
        RpcCredentials {
            url: "http://localhost:8069".to_string(),
            database: "odoo".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            version: "17.0".to_string(),
        },
        Arc::new(erp.clone()),
        RpcSettings {
            login_attempts: 1,
            login_backoff: Duration::from_millis(1),
            poll_interval: Duration::from_millis(1),
            install_timeout: Duration::from_millis(50),
        },
    )
}

fn role(name: &str, groups: &[&str], headcount: u32) -> UserRole {
    UserRole {
        name: name.to_string(),
        description: String::new(),
        groups: groups.iter().map(ToString::to_string).collect(),
        headcount,
    }
}

#[test]
fn given_accented_names_when_sanitized_then_logins_are_ascii() {
    assert_eq!(sanitize_login("José Müller!"), "jose_muller");
    assert_eq!(sanitize_login("  Sales -- Manager "), "sales_manager");
    assert_eq!(sanitize_login("Antonín Dvořák"), "antonin_dvorak");
    assert_eq!(sanitize_login("Zoë Ærø"), "zoe_r");
    assert_eq!(sanitize_login(""), "user");
    assert_eq!(sanitize_login("!!!"), "user");
}

#[test]
fn generated_secrets_are_alphanumeric_and_distinct() {
    let first = generate_secret(14);
    let second = generate_secret(14);
    assert_eq!(first.len(), 14);
    assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(first, second);
}

#[tokio::test]
async fn given_uninstalled_module_when_installing_then_it_ends_installed() {
    let erp = FakeErp::default().with_module("sale", 7, "uninstalled").await;
    let (handle, ctx) = task_context(DeployTarget::Local);
    let mut steps = steps(&erp);

    steps
        .install_module(&ctx, &ModuleKey::new("sale"))
        .await
        .unwrap();

    assert_eq!(erp.module_state("sale").await.as_deref(), Some("installed"));
    assert_eq!(erp.logins().await, 1);
    assert!(steps.is_connected());
    assert!(logs(&handle)
        .iter()
        .any(|line| line.contains("Module sale installed successfully")));
}

#[tokio::test]
async fn given_unknown_module_when_installing_then_step_is_skipped() {
    let erp = FakeErp::default();
    let (handle, ctx) = task_context(DeployTarget::Local);
    let mut steps = steps(&erp);

    steps
        .install_module(&ctx, &ModuleKey::new("ghost"))
        .await
        .unwrap();

    assert!(erp.calls_to("ir.module.module.button_immediate_install").await.is_empty());
    assert!(logs(&handle)
        .iter()
        .any(|line| line.contains("Module ghost not found, skipping")));
}

#[tokio::test]
async fn given_uninstallable_module_when_installing_then_fault_is_returned() {
    let erp = FakeErp::default().with_module("broken", 9, "uninstallable").await;
    let (_handle, ctx) = task_context(DeployTarget::Local);
    let mut steps = steps(&erp);

    let result = steps.install_module(&ctx, &ModuleKey::new("broken")).await;

    assert!(matches!(result, Err(SwarmError::RemoteFault(msg)) if msg.contains("uninstallable")));
    assert!(steps.is_connected());
}

#[tokio::test]
async fn given_transport_error_when_installing_then_session_is_dropped_and_reused_later() {
    let erp = FakeErp::default()
        .with_module("account", 3, "uninstalled")
        .await
        .dropping("ir.module.module.update_list", 1)
        .await;
    let (_handle, ctx) = task_context(DeployTarget::CloudPaas);
    let mut steps = steps(&erp);

    let first = steps.install_module(&ctx, &ModuleKey::new("account")).await;
    assert!(matches!(first, Err(SwarmError::TransportError(_))));
    assert!(!steps.is_connected());

    steps
        .install_module(&ctx, &ModuleKey::new("account"))
        .await
        .unwrap();
    assert_eq!(erp.logins().await, 2);
    assert_eq!(erp.module_state("account").await.as_deref(), Some("installed"));
}

#[tokio::test]
async fn given_settings_when_configuring_then_wizard_is_created_and_applied() {
    let erp = FakeErp::default();
    let (_handle, ctx) = task_context(DeployTarget::Local);
    let mut steps = steps(&erp);
    let mut settings = Map::new();
    settings.insert("group_stock_multi_locations".to_string(), json!(true));

    steps
        .configure_module(&ctx, &ModuleKey::new("stock"), &settings)
        .await
        .unwrap();

    let creates = erp.calls_to("res.config.settings.create").await;
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].args[0], json!({"group_stock_multi_locations": true}));
    let applied = erp.calls_to("res.config.settings.set_values").await;
    assert_eq!(applied[0].args[0], json!([101]));
}

#[tokio::test]
async fn given_empty_settings_when_configuring_then_nothing_is_called() {
    let erp = FakeErp::default();
    let (_handle, ctx) = task_context(DeployTarget::Local);
    let mut steps = steps(&erp);

    steps
        .configure_module(&ctx, &ModuleKey::new("stock"), &Map::new())
        .await
        .unwrap();

    assert!(erp.calls().await.is_empty());
    assert_eq!(erp.logins().await, 0);
}

#[tokio::test]
async fn given_settings_fault_when_configuring_then_warning_is_logged_and_task_succeeds() {
    let erp = FakeErp::default()
        .faulting("res.config.settings.create", "Invalid field 'bogus'")
        .await;
    let (handle, ctx) = task_context(DeployTarget::Local);
    let mut steps = steps(&erp);
    let mut settings = Map::new();
    settings.insert("bogus".to_string(), json!(1));

    steps
        .configure_module(&ctx, &ModuleKey::new("stock"), &settings)
        .await
        .unwrap();

    assert!(logs(&handle)
        .iter()
        .any(|line| line.contains("Warning: settings apply failed") && line.contains("bogus")));
}

#[tokio::test]
async fn given_settings_transport_error_when_configuring_then_task_fails() {
    let erp = FakeErp::default()
        .dropping("res.config.settings.create", 1)
        .await;
    let (_handle, ctx) = task_context(DeployTarget::Local);
    let mut steps = steps(&erp);
    let mut settings = Map::new();
    settings.insert("x".to_string(), json!(1));

    let result = steps
        .configure_module(&ctx, &ModuleKey::new("stock"), &settings)
        .await;

    assert!(matches!(result, Err(SwarmError::TransportError(_))));
    assert!(!steps.is_connected());
}

#[tokio::test]
async fn given_roles_when_setting_up_users_then_logins_carry_company_slug_and_groups() {
    let erp = FakeErp::default()
        .answering("ir.model.data.search", json!([55]))
        .await
        .answering("ir.model.data.read", json!([{"id": 55, "res_id": 12}]))
        .await;
    let (handle, ctx) = task_context(DeployTarget::Local);
    let mut steps = steps(&erp);
    let roles = vec![
        role("Sales Rep", &["sales_team.group_sale_salesman", "not-a-ref"], 2),
        role("Accountant", &[], 1),
    ];

    steps
        .setup_users(&ctx, &roles, &CompanyProfile::new("Café Olé GmbH"))
        .await
        .unwrap();

    let created: Vec<Value> = erp
        .calls_to("res.users.create")
        .await
        .into_iter()
        .map(|call| call.args[0].clone())
        .collect();
    let logins: Vec<&str> = created
        .iter()
        .map(|values| values["login"].as_str().unwrap())
        .collect();
    assert_eq!(
        logins,
        vec![
            "sales_rep_1@cafe_ole_gmbh.local",
            "sales_rep_2@cafe_ole_gmbh.local",
            "accountant@cafe_ole_gmbh.local",
        ]
    );
    assert_eq!(created[0]["groups_id"], json!([[4, 12]]));
    assert!(created[2].get("groups_id").is_none());
    assert_eq!(created[0]["password"].as_str().unwrap().len(), 14);

    let lookups = erp.calls_to("ir.model.data.search").await;
    assert_eq!(
        lookups[0].args[0],
        json!([["module", "=", "sales_team"], ["name", "=", "group_sale_salesman"]])
    );
    assert!(logs(&handle)
        .iter()
        .any(|line| line.contains("Skipping invalid group reference: not-a-ref")));
}

#[tokio::test]
async fn given_existing_login_when_setting_up_users_then_duplicate_is_skipped() {
    let erp = FakeErp::default()
        .faulting(
            "res.users.create",
            "duplicate key value violates unique constraint \"res_users_login_key\"",
        )
        .await;
    let (handle, ctx) = task_context(DeployTarget::Local);
    let mut steps = steps(&erp);

    steps
        .setup_users(&ctx, &[role("Manager", &[], 1)], &CompanyProfile::new("Acme"))
        .await
        .unwrap();

    assert!(logs(&handle)
        .iter()
        .any(|line| line.contains("manager@acme.local already exists, skipping")));
}

#[tokio::test]
async fn given_company_profile_when_finalizing_then_currency_country_and_timezone_are_written() {
    let erp = FakeErp::default()
        .answering("res.currency.search", json!([4]))
        .await
        .answering("res.country.search", json!([21]))
        .await;
    let (_handle, ctx) = task_context(DeployTarget::Local);
    let mut steps = steps(&erp);
    let mut company = CompanyProfile::new("Acme");
    company.currency = "EUR".to_string();
    company.country = "BE".to_string();
    company.timezone = "Europe/Brussels".to_string();

    steps.finalize(&ctx, &company).await.unwrap();

    let currency_search = erp.calls_to("res.currency.search").await;
    assert_eq!(currency_search[0].args[0], json!([["name", "=", "EUR"]]));
    assert_eq!(currency_search[0].kwargs["context"], json!({"active_test": false}));

    let writes = erp.calls_to("res.currency.write").await;
    assert_eq!(writes[0].args, vec![json!([4]), json!({"active": true})]);

    let company_writes = erp.calls_to("res.company.write").await;
    assert_eq!(
        company_writes[0].args,
        vec![
            json!([1]),
            json!({"name": "Acme", "currency_id": 4, "country_id": 21})
        ]
    );

    let user_writes = erp.calls_to("res.users.write").await;
    assert_eq!(
        user_writes[0].args,
        vec![json!([2]), json!({"tz": "Europe/Brussels"})]
    );
}

#[tokio::test]
async fn given_new_password_when_rotating_then_next_login_uses_it() {
    let erp = FakeErp::default();
    let (_handle, ctx) = task_context(DeployTarget::CloudPaas);
    let mut steps = steps(&erp);

    steps.rotate_admin_password(&ctx, "s3cret").await.unwrap();

    let writes = erp.calls_to("res.users.write").await;
    assert_eq!(writes[0].args, vec![json!([2]), json!({"password": "s3cret"})]);
    assert_eq!(steps.credentials().password, "s3cret");
    assert!(!steps.is_connected());
}
