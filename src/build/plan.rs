use crate::error::Result;
use crate::swarm::order_by_dependencies;
use crate::types::{BuildTask, ModuleRequest, TargetSpec, TaskKind};

/// Modules of `spec` in install order. Dependencies not requested by the
/// spec are ignored for ordering.
///
/// # Errors
/// Returns `DependencyCycle` if the requested modules depend on each other
/// cyclically.
pub fn install_sequence(spec: &TargetSpec) -> Result<Vec<&ModuleRequest>> {
    let order = order_by_dependencies(
        spec.modules
            .iter()
            .map(|module| (&module.key, module.dependencies.as_slice())),
    )?;
    Ok(order
        .iter()
        .filter_map(|key| spec.module(key))
        .collect())
}

/// Task list for one build: provision, database, one install per module,
/// one configure per module with settings, users (if any roles), final
/// configuration.
///
/// # Errors
/// Returns `DependencyCycle` from module ordering.
pub fn plan_tasks(spec: &TargetSpec) -> Result<Vec<BuildTask>> {
    let modules = install_sequence(spec)?;
    let mut tasks = Vec::with_capacity(modules.len() * 2 + 4);

    tasks.push(BuildTask::new(
        TaskKind::Provision,
        "Provision Environment",
        format!("Provision the {} runtime", spec.deploy_target),
    ));
    tasks.push(BuildTask::new(
        TaskKind::DbInit,
        "Database Setup",
        "Wait for the instance and initialize the database",
    ));

    tasks.extend(modules.iter().map(|module| {
        BuildTask::new(
            TaskKind::ModuleInstall,
            format!("Install {}", module.label()),
            format!("Installing {} module", module.key),
        )
        .for_module(module.key.clone())
    }));

    tasks.extend(
        modules
            .iter()
            .filter(|module| module.has_settings())
            .map(|module| {
                BuildTask::new(
                    TaskKind::ModuleConfigure,
                    format!("Configure {}", module.label()),
                    format!("Applying settings for {}", module.key),
                )
                .for_module(module.key.clone())
            }),
    );

    if !spec.user_roles.is_empty() {
        tasks.push(BuildTask::new(
            TaskKind::UserSetup,
            "User Roles",
            "Creating user roles and permissions",
        ));
    }

    tasks.push(BuildTask::new(
        TaskKind::FinalConfig,
        "Final Setup",
        "Company settings and final configuration",
    ));
    Ok(tasks)
}
