//! Cloud PaaS backend: one project holding a Postgres service and an ERP
//! service, created through the control plane and configured over RPC.

use super::{
    generate_secret, BackendPorts, ControlPlane, DeployBackend, HealthProbe, ProjectHandle,
    RemoteSteps,
};
use crate::build::TaskContext;
use crate::config::BuilderConfig;
use crate::error::{Result, SwarmError};
use crate::ports::PortFuture;
use crate::rpc::{RpcCredentials, RpcSettings};
use crate::types::{CompanyProfile, ModuleKey, TargetSpec, UserRole};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const POSTGRES_IMAGE: &str = "postgres:15";
const DB_USER: &str = "odoo";
const READY_PATHS: [&str; 3] = ["/web/login", "/web/database/selector", "/web"];
const PROGRESS_LOG_EVERY: u32 = 6;

/// `https://` is prepended unless the control plane already returned a URL.
fn public_url(domain: &str) -> String {
    let domain = domain.trim();
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    }
}

fn start_command(database: &str, db_password: &str) -> String {
    format!(
        "odoo --database {database} --init base --db_host $HOST --db_port 5432 \
         --db_user {DB_USER} --db_password {db_password} --without-demo=all"
    )
}

pub struct PaasBackend {
    control_plane: Arc<dyn ControlPlane>,
    health: Arc<dyn HealthProbe>,
    remote: RemoteSteps,
    project_name: String,
    version: String,
    database: String,
    admin_login: String,
    admin_password: String,
    ready_attempts: u32,
    ready_interval: Duration,
    project: Option<ProjectHandle>,
    url: Option<String>,
}

impl PaasBackend {
    #[must_use]
    pub fn new(
        spec: &TargetSpec,
        config: &BuilderConfig,
        ports: &BackendPorts,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Self {
        let remote = RemoteSteps::new(
            RpcCredentials {
                url: String::new(),
                database: config.database.clone(),
                username: config.admin_login.clone(),
                password: config.admin_password.clone(),
                version: spec.version.clone(),
            },
            Arc::clone(&ports.rpc),
            RpcSettings::from(config),
        );
        Self {
            control_plane,
            health: Arc::clone(&ports.health),
            remote,
            project_name: format!("odoo-{}", spec.company.slug()),
            version: spec.version.clone(),
            database: config.database.clone(),
            admin_login: config.admin_login.clone(),
            admin_password: config.admin_password.clone(),
            ready_attempts: config.cloud_ready_attempts,
            ready_interval: config.cloud_ready_interval,
            project: None,
            url: None,
        }
    }

    async fn provision_inner(&mut self, ctx: &TaskContext) -> Result<()> {
        let db_password = generate_secret(24);

        ctx.log(format!("Creating project: {}", self.project_name));
        let project = self.control_plane.create_project(&self.project_name).await?;
        self.project = Some(project.clone());
        ctx.update_outputs(|outputs| {
            outputs.project_id = Some(project.project_id.clone());
            outputs.environment_id = Some(project.environment_id.clone());
        });
        ctx.set_progress(15);

        ctx.log("Creating PostgreSQL 15 service...");
        let postgres = self
            .control_plane
            .create_service(&project.project_id, "Postgres")
            .await?;
        self.control_plane
            .set_service_image(&postgres, POSTGRES_IMAGE)
            .await?;
        let postgres_vars = BTreeMap::from([
            ("POSTGRES_USER".to_string(), DB_USER.to_string()),
            ("POSTGRES_PASSWORD".to_string(), db_password.clone()),
            ("POSTGRES_DB".to_string(), "postgres".to_string()),
            (
                "PGDATA".to_string(),
                "/var/lib/postgresql/data/pgdata".to_string(),
            ),
        ]);
        self.control_plane
            .set_variables(&project, &postgres, &postgres_vars)
            .await?;
        ctx.set_progress(40);

        ctx.log(format!("Creating Odoo {} service...", self.version));
        let service = self
            .control_plane
            .create_service(&project.project_id, "Odoo")
            .await?;
        self.control_plane
            .set_service_image(&service, &format!("odoo:{}", self.version))
            .await?;
        let service_vars = BTreeMap::from([
            (
                "HOST".to_string(),
                "${{Postgres.RAILWAY_PRIVATE_DOMAIN}}".to_string(),
            ),
            ("USER".to_string(), DB_USER.to_string()),
            ("PASSWORD".to_string(), db_password.clone()),
        ]);
        self.control_plane
            .set_variables(&project, &service, &service_vars)
            .await?;

        ctx.log("Setting start command (--init base)...");
        self.control_plane
            .set_start_command(&service, &start_command(&self.database, &db_password))
            .await?;
        ctx.set_progress(65);

        ctx.log("Creating public domain...");
        let domain = self.control_plane.create_domain(&project, &service).await?;
        let url = public_url(&domain);
        self.remote.set_url(url.clone());
        self.url = Some(url.clone());
        ctx.set_progress(80);

        ctx.update_outputs(|outputs| {
            outputs.url = Some(url.clone());
            outputs.service_id = Some(service.clone());
            outputs.database = Some(self.database.clone());
            outputs.admin_login = Some(self.admin_login.clone());
            outputs.admin_password = Some(self.admin_password.clone());
        });
        ctx.log(format!("Project created, URL: {url}"));
        Ok(())
    }

    /// Deletes a half-built project; failures here are only logged.
    async fn discard_partial_project(&mut self, ctx: &TaskContext) {
        let Some(project) = self.project.take() else {
            return;
        };
        ctx.log("Cleaning up partial project...");
        if let Err(err) = self.control_plane.delete_project(&project.project_id).await {
            ctx.warn(format!("could not delete project {}: {err}", project.project_id));
        }
    }

    async fn wait_ready_inner(&self, ctx: &TaskContext) -> Result<()> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| SwarmError::Internal("Instance URL is not known yet".to_string()))?;
        ctx.log(format!(
            "Waiting for instance at {url} (this can take several minutes)..."
        ));
        ctx.log("Postgres boots first, then the instance initializes its database...");

        let attempts = self.ready_attempts.max(1);
        for attempt in 0..attempts {
            ctx.set_progress(u8::try_from(attempt * 90 / attempts).unwrap_or(90));
            for path in READY_PATHS {
                let probe_url = format!("{url}{path}");
                if self.health.check(&probe_url).await.unwrap_or(false) {
                    ctx.log(format!("Instance is ready ({probe_url} responded)"));
                    return Ok(());
                }
            }
            if attempt > 0 && attempt % PROGRESS_LOG_EVERY == 0 {
                let elapsed = self.ready_interval.as_secs() * u64::from(attempt);
                ctx.log(format!("Still waiting... ({elapsed}s elapsed)"));
            }
            ctx.cancel().sleep(self.ready_interval, "wait_ready").await?;
        }
        let waited = self.ready_interval.as_secs() * u64::from(attempts);
        Err(SwarmError::Timeout(format!(
            "Instance did not start in time ({} minutes)",
            waited / 60
        )))
    }

    /// The instance boots with the configured admin password; it is
    /// replaced by a generated one before anything else logs in.
    async fn init_database_inner(&mut self, ctx: &TaskContext) -> Result<()> {
        ctx.log("Securing the admin account...");
        let password = generate_secret(16);
        match self.remote.rotate_admin_password(ctx, &password).await {
            Ok(()) => {
                ctx.update_outputs(|outputs| outputs.admin_password = Some(password.clone()));
                self.admin_password = password;
                ctx.log("Admin password rotated");
                Ok(())
            }
            Err(err @ SwarmError::Cancelled(_)) => Err(err),
            Err(err) => {
                ctx.warn(format!("could not rotate admin password ({err}), keeping the default"));
                Ok(())
            }
        }
    }

    async fn cleanup_inner(&mut self, ctx: &TaskContext) -> Result<bool> {
        self.remote.disconnect();
        let Some(project) = self.project.take() else {
            return Ok(false);
        };
        ctx.log(format!("Deleting project {}...", project.project_id));
        if let Err(err) = self.control_plane.delete_project(&project.project_id).await {
            self.project = Some(project);
            return Err(err);
        }
        ctx.log("Project deleted");
        Ok(true)
    }
}

impl DeployBackend for PaasBackend {
    fn name(&self) -> &'static str {
        "cloud-paas"
    }

    fn provision<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let result = self.provision_inner(ctx).await;
            if let Err(err) = &result {
                ctx.log(format!("Control plane setup error: {err}"));
                self.discard_partial_project(ctx).await;
            }
            result
        })
    }

    fn wait_ready<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, ()> {
        Box::pin(self.wait_ready_inner(ctx))
    }

    fn init_database<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, ()> {
        Box::pin(self.init_database_inner(ctx))
    }

    fn install_module<'a>(
        &'a mut self,
        ctx: &'a TaskContext,
        module: &'a ModuleKey,
    ) -> PortFuture<'a, ()> {
        Box::pin(self.remote.install_module(ctx, module))
    }

    fn configure_module<'a>(
        &'a mut self,
        ctx: &'a TaskContext,
        module: &'a ModuleKey,
        settings: &'a Map<String, Value>,
    ) -> PortFuture<'a, ()> {
        Box::pin(self.remote.configure_module(ctx, module, settings))
    }

    fn setup_users<'a>(
        &'a mut self,
        ctx: &'a TaskContext,
        roles: &'a [UserRole],
        company: &'a CompanyProfile,
    ) -> PortFuture<'a, ()> {
        Box::pin(self.remote.setup_users(ctx, roles, company))
    }

    fn finalize<'a>(
        &'a mut self,
        ctx: &'a TaskContext,
        company: &'a CompanyProfile,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.remote.finalize(ctx, company).await?;
            if let Some(url) = &self.url {
                ctx.log(format!("Instance ready at {url}"));
            }
            Ok(())
        })
    }

    fn cleanup<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, bool> {
        Box::pin(self.cleanup_inner(ctx))
    }
}

#[cfg(test)]
mod tests;
