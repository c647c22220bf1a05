//! Local container backend: a two-service compose stack (ERP + Postgres)
//! driven through the `docker` CLI.

use super::{BackendPorts, CommandOutput, CommandRunner, DeployBackend, HealthProbe, RemoteSteps};
use crate::build::TaskContext;
use crate::config::BuilderConfig;
use crate::error::{Result, SwarmError};
use crate::ports::PortFuture;
use crate::rpc::{RpcCredentials, RpcSettings};
use crate::types::{CompanyProfile, ModuleKey, TargetSpec, UserRole};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DOCKER_MISSING: &str =
    "Docker is not installed. Please install Docker Desktop from https://docker.com/products/docker-desktop";
const COMPOSE_FILE: &str = "docker-compose.yml";

#[must_use]
pub fn render_compose_manifest(spec: &TargetSpec, config: &BuilderConfig) -> String {
    let slug = spec.company.slug();
    format!(
        "version: '3.8'
services:
  odoo:
    image: odoo:{version}
    container_name: odoo-{slug}
    depends_on:
      - db
    ports:
      - \"{port}:8069\"
    volumes:
      - odoo-data:/var/lib/odoo
      - ./addons:/mnt/extra-addons
      - ./config:/etc/odoo
    environment:
      - HOST=db
      - USER=odoo
      - PASSWORD=odoo
    restart: unless-stopped

  db:
    image: postgres:15
    container_name: postgres-{slug}
    environment:
      - POSTGRES_DB=postgres
      - POSTGRES_USER=odoo
      - POSTGRES_PASSWORD=odoo
      - PGDATA=/var/lib/postgresql/data/pgdata
    volumes:
      - postgres-data:/var/lib/postgresql/data/pgdata
    restart: unless-stopped

volumes:
  odoo-data:
  postgres-data:
",
        version = spec.version,
        port = config.local_port,
    )
}

#[must_use]
pub fn render_instance_config(config: &BuilderConfig) -> String {
    format!(
        "[options]
addons_path = /mnt/extra-addons,/usr/lib/python3/dist-packages/odoo/addons
data_dir = /var/lib/odoo
admin_passwd = {admin_password}
db_host = db
db_port = 5432
db_user = odoo
db_password = odoo
db_name = {database}
list_db = True
",
        admin_password = config.admin_password,
        database = config.database,
    )
}

pub struct LocalBackend {
    compose: String,
    instance_config: String,
    version: String,
    database: String,
    admin_login: String,
    admin_password: String,
    url: String,
    stack_dir: PathBuf,
    health_attempts: u32,
    health_interval: Duration,
    commands: Arc<dyn CommandRunner>,
    health: Arc<dyn HealthProbe>,
    remote: RemoteSteps,
    started: bool,
}

impl LocalBackend {
    #[must_use]
    pub fn new(spec: &TargetSpec, config: &BuilderConfig, ports: &BackendPorts) -> Self {
        let url = format!("http://localhost:{}", config.local_port);
        let remote = RemoteSteps::new(
            RpcCredentials {
                url: url.clone(),
                database: config.database.clone(),
                username: config.admin_login.clone(),
                password: config.admin_password.clone(),
                version: spec.version.clone(),
            },
            Arc::clone(&ports.rpc),
            RpcSettings::from(config),
        );
        Self {
            compose: render_compose_manifest(spec, config),
            instance_config: render_instance_config(config),
            version: spec.version.clone(),
            database: config.database.clone(),
            admin_login: config.admin_login.clone(),
            admin_password: config.admin_password.clone(),
            url,
            stack_dir: config.work_dir.join(format!("odoo-{}", spec.company.slug())),
            health_attempts: config.health_attempts,
            health_interval: config.health_interval,
            commands: Arc::clone(&ports.commands),
            health: Arc::clone(&ports.health),
            remote,
            started: false,
        }
    }

    async fn docker(&self, ctx: &TaskContext, args: &[&str]) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        ctx.log(format!("Running: docker {}", args.join(" ")));
        let output = self
            .commands
            .run("docker", &args, Some(self.stack_dir.as_path()))
            .await?;
        if !output.success() {
            ctx.log(format!("Error: {}", output.combined()));
        }
        Ok(output)
    }

    async fn write_stack_files(&self, ctx: &TaskContext) -> Result<()> {
        ctx.log("Creating directory structure...");
        tokio::fs::create_dir_all(self.stack_dir.join("addons")).await?;
        tokio::fs::create_dir_all(self.stack_dir.join("config")).await?;
        ctx.set_progress(20);

        ctx.log(format!("Generating {COMPOSE_FILE}..."));
        tokio::fs::write(self.stack_dir.join(COMPOSE_FILE), &self.compose).await?;
        ctx.set_progress(40);

        ctx.log("Generating odoo.conf...");
        tokio::fs::write(self.stack_dir.join("config").join("odoo.conf"), &self.instance_config)
            .await?;
        ctx.set_progress(60);
        Ok(())
    }

    async fn ensure_docker(&self, ctx: &TaskContext) -> Result<()> {
        ctx.log("Checking Docker availability...");
        let version = match self.docker(ctx, &["--version"]).await {
            Ok(output) if output.success() => output,
            Ok(_) | Err(SwarmError::CommandError(_)) => {
                ctx.log("Docker is required but not installed");
                return Err(SwarmError::ProvisioningError(DOCKER_MISSING.to_string()));
            }
            Err(err) => return Err(err),
        };
        ctx.log(format!("Docker found: {}", version.stdout.trim()));
        ctx.set_progress(70);
        Ok(())
    }

    async fn provision_inner(&mut self, ctx: &TaskContext) -> Result<()> {
        self.write_stack_files(ctx).await?;
        self.ensure_docker(ctx).await?;

        ctx.log(format!("Pulling Odoo {} image...", self.version));
        let pulled = self.docker(ctx, &["compose", "pull"]).await?;
        if !pulled.success() {
            ctx.warn("image pull failed; starting with local images");
        }
        ctx.set_progress(90);

        ctx.log("Starting containers...");
        self.started = true;
        let up = self.docker(ctx, &["compose", "up", "-d"]).await?;
        if !up.success() {
            return Err(SwarmError::ProvisioningError(format!(
                "docker compose up failed: {}",
                up.combined()
            )));
        }

        let stack_dir = self.stack_dir.display().to_string();
        ctx.update_outputs(|outputs| {
            outputs.url = Some(self.url.clone());
            outputs.database = Some(self.database.clone());
            outputs.admin_login = Some(self.admin_login.clone());
            outputs.admin_password = Some(self.admin_password.clone());
            outputs.work_dir = Some(stack_dir);
        });
        ctx.log(format!("Local stack is up; instance will be at {}", self.url));
        Ok(())
    }

    async fn wait_ready_inner(&self, ctx: &TaskContext) -> Result<()> {
        ctx.log("Waiting for the instance to start...");
        let probe_url = format!("{}/web/database/selector", self.url);
        let attempts = self.health_attempts.max(1);
        for attempt in 0..attempts {
            ctx.set_progress(u8::try_from(attempt * 50 / attempts).unwrap_or(50));
            if self.health.check(&probe_url).await.unwrap_or(false) {
                ctx.log("Instance is ready");
                return Ok(());
            }
            ctx.cancel().sleep(self.health_interval, "wait_ready").await?;
        }
        Err(SwarmError::Timeout(format!(
            "Instance at {} did not start in time",
            self.url
        )))
    }

    async fn init_database_inner(&self, ctx: &TaskContext) -> Result<()> {
        ctx.set_progress(60);
        ctx.log(format!("Creating database '{}'...", self.database));
        let output = self
            .docker(
                ctx,
                &[
                    "compose",
                    "exec",
                    "-T",
                    "odoo",
                    "odoo",
                    "--database",
                    self.database.as_str(),
                    "--init",
                    "base",
                    "--stop-after-init",
                    "--without-demo=all",
                ],
            )
            .await?;
        if output.success() {
            ctx.log("Database initialized successfully");
        } else if output.combined().to_lowercase().contains("already exists") {
            ctx.log("Database already exists, continuing");
        } else {
            return Err(SwarmError::ProvisioningError(format!(
                "Database initialization failed: {}",
                output.combined()
            )));
        }
        Ok(())
    }

    async fn install_inner(&self, ctx: &TaskContext, module: &ModuleKey) -> Result<()> {
        ctx.log(format!("Installing module: {module}"));
        ctx.set_progress(20);
        let output = self
            .docker(
                ctx,
                &[
                    "compose",
                    "exec",
                    "-T",
                    "odoo",
                    "odoo",
                    "--database",
                    self.database.as_str(),
                    "--init",
                    module.value(),
                    "--stop-after-init",
                ],
            )
            .await?;
        if output.success() || output.combined().to_lowercase().contains("already installed") {
            ctx.log(format!("Module {module} installed successfully"));
            Ok(())
        } else {
            Err(SwarmError::CommandError(format!(
                "Failed to install {module}: {}",
                output.combined()
            )))
        }
    }

    async fn cleanup_inner(&mut self, ctx: &TaskContext) -> Result<bool> {
        if !self.started {
            return Ok(false);
        }
        self.remote.disconnect();
        ctx.log("Stopping containers...");
        let output = self.docker(ctx, &["compose", "down"]).await?;
        if !output.success() {
            return Err(SwarmError::CommandError(format!(
                "docker compose down failed: {}",
                output.combined()
            )));
        }
        self.started = false;
        ctx.log("Containers stopped");
        Ok(true)
    }
}

impl DeployBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn provision<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, ()> {
        Box::pin(self.provision_inner(ctx))
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
        Box::pin(self.install_inner(ctx, module))
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
            ctx.log(format!("Instance ready at {}", self.url));
            Ok(())
        })
    }

    fn cleanup<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, bool> {
        Box::pin(self.cleanup_inner(ctx))
    }
}
