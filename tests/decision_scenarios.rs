#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use erpswarm::swarm::{config_tasks, render_summary};
use erpswarm::{
    CompanyProfile, DecisionEngine, ModuleKey, ModuleRegistry, RejectionReason, SignalMap,
    SwarmError, TargetSpec, Tier,
};
use std::sync::Arc;

fn builtin() -> Arc<ModuleRegistry> {
    Arc::new(ModuleRegistry::builtin().unwrap())
}

fn position(order: &[ModuleKey], key: &str) -> usize {
    order
        .iter()
        .position(|module| module.value() == key)
        .unwrap_or_else(|| panic!("{key} missing from install order {order:?}"))
}

#[tokio::test]
async fn given_inventory_and_purchase_signals_when_deciding_then_dependencies_install_first() {
    let engine = DecisionEngine::new(builtin(), Tier::Unrestricted, "17.0").unwrap();
    let signals = SignalMap::new()
        .with_signal("inventory", 2)
        .with_signal("purchase", 1)
        .with_evidence("inventory", "We track stock in three warehouses");

    let outcome = engine.decide(&signals).await.unwrap();
    let order = &outcome.install_order;

    assert_eq!(order[0].value(), "base");
    assert!(position(order, "stock") < position(order, "purchase"));
    assert!(position(order, "account") < position(order, "purchase"));
    assert!(outcome.decision.auto_added.contains(&ModuleKey::new("account")));
    assert_eq!(outcome.registry_source, "builtin");
}

#[tokio::test]
async fn given_unknown_tier_when_restricted_module_is_proposed_then_question_is_raised() {
    let engine = DecisionEngine::new(builtin(), Tier::Unknown, "17.0").unwrap();
    let signals = SignalMap::new().with_signal("support", 1);

    let outcome = engine.decide(&signals).await.unwrap();

    assert!(outcome.decision.is_selected("helpdesk"));
    assert!(outcome
        .decision
        .open_questions
        .iter()
        .any(|question| question.contains("helpdesk")));
}

#[tokio::test]
async fn given_restricted_tier_when_restricted_module_is_proposed_then_it_is_kept() {
    let engine = DecisionEngine::new(builtin(), Tier::Restricted, "17.0").unwrap();
    let signals = SignalMap::new().with_signal("support", 1);

    let outcome = engine.decide(&signals).await.unwrap();

    assert!(outcome.decision.is_selected("helpdesk"));
    assert!(outcome.decision.rejected.is_empty());
}

#[tokio::test]
async fn given_old_target_version_when_ecommerce_is_signalled_then_storefront_is_rejected() {
    let engine = DecisionEngine::new(builtin(), Tier::Unrestricted, "12.0").unwrap();
    let signals = SignalMap::new().with_signal("ecommerce", 1);

    let outcome = engine.decide(&signals).await.unwrap();

    let rejected = outcome
        .decision
        .rejected
        .iter()
        .find(|module| module.candidate.key.value() == "website_sale")
        .expect("website_sale rejected");
    assert_eq!(rejected.reason, RejectionReason::IncompatibleVersion);
    assert!(outcome.decision.is_selected("website"));
    assert!(outcome
        .decision
        .open_questions
        .iter()
        .any(|question| question.contains("website_sale") && question.contains("12.0")));
}

#[tokio::test]
async fn given_no_active_signals_when_deciding_then_only_base_is_planned() {
    let engine = DecisionEngine::new(builtin(), Tier::Unrestricted, "17.0").unwrap();
    let signals = SignalMap::new().with_signal("inventory", 0);

    let outcome = engine.decide(&signals).await.unwrap();

    assert_eq!(outcome.install_order, vec![ModuleKey::base()]);
    assert_eq!(outcome.decision.auto_added, vec![ModuleKey::base()]);
}

#[tokio::test]
async fn given_registry_without_base_and_no_signals_when_deciding_then_decision_error_is_returned() {
    let registry =
        ModuleRegistry::from_json_str(r#"[{"key": "crm", "name": "CRM", "domain": "sales"}]"#, "tiny")
            .unwrap();
    let engine = DecisionEngine::new(Arc::new(registry), Tier::Unrestricted, "17.0").unwrap();

    let result = engine.decide(&SignalMap::new()).await;

    assert!(matches!(result, Err(SwarmError::DecisionError(_))));
}

#[tokio::test]
async fn given_independent_stock_and_account_when_deciding_then_order_is_base_then_alphabetical() {
    let registry = ModuleRegistry::from_json_str(
        r#"[
            {"key": "base", "name": "Base", "domain": "core"},
            {"key": "stock", "name": "Inventory", "domain": "inventory"},
            {"key": "account", "name": "Invoicing", "domain": "accounting"},
            {"key": "mrp", "name": "Manufacturing", "domain": "manufacturing", "dependencies": ["stock"]}
        ]"#,
        "minimal",
    )
    .unwrap();
    let engine = DecisionEngine::new(Arc::new(registry), Tier::Unrestricted, "17.0").unwrap();
    let signals = SignalMap::new()
        .with_signal("inventory", 3)
        .with_signal("accounting", 1);

    let outcome = engine.decide(&signals).await.unwrap();

    let order: Vec<&str> = outcome.install_order.iter().map(ModuleKey::value).collect();
    assert_eq!(order, vec!["base", "account", "stock"]);
    assert_eq!(outcome.decision.auto_added, vec![ModuleKey::base()]);
    assert!(!outcome.decision.is_selected("mrp"));
    assert!(outcome.decision.rejected.is_empty());
}

#[tokio::test]
async fn given_cyclic_registry_when_deciding_then_cycle_is_reported() {
    let registry = ModuleRegistry::from_json_str(
        r#"[
            {"key": "base", "name": "Base", "domain": "core"},
            {"key": "crm", "name": "CRM", "domain": "sales", "dependencies": ["contacts"]},
            {"key": "contacts", "name": "Contacts", "domain": "core", "dependencies": ["crm"]}
        ]"#,
        "cyclic",
    )
    .unwrap();
    let engine = DecisionEngine::new(Arc::new(registry), Tier::Unrestricted, "17.0").unwrap();

    let result = engine.decide(&SignalMap::new().with_signal("crm", 1)).await;

    assert!(matches!(result, Err(SwarmError::DependencyCycle(_))));
}

#[tokio::test]
async fn decision_feeds_tasks_summary_and_target_spec() {
    let registry = builtin();
    let engine = DecisionEngine::new(Arc::clone(&registry), Tier::Unrestricted, "17.0").unwrap();
    let signals = SignalMap::new()
        .with_signal("sales", 1)
        .with_signal("accounting", 1)
        .with_signal("integration", 1);
    let outcome = engine.decide(&signals).await.unwrap();

    let tasks = config_tasks(&outcome, &registry);
    assert_eq!(tasks.len(), outcome.install_order.len());
    assert_eq!(tasks[0].task_id, "CFG-001");

    let summary = render_summary("Cafe Ole", &outcome, &tasks);
    assert!(summary.starts_with("# Implementation Summary - Cafe Ole"));
    assert!(summary.contains("## Risks / Flags"));
    assert!(summary.contains("CFG-001"));

    let spec = TargetSpec::from_decision("spec-1", CompanyProfile::new("Cafe Ole"), &outcome);
    let keys: Vec<&ModuleKey> = spec.modules.iter().map(|module| &module.key).collect();
    let ordered: Vec<&ModuleKey> = outcome.install_order.iter().collect();
    assert_eq!(keys, ordered);
    assert_eq!(spec.version, "17.0");
}
