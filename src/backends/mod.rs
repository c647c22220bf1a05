//! Deployment backends.
//!
//! The orchestrator only ever sees [`DeployBackend`]. Each backend writes
//! its log lines into the task it is given and returns `Err` when the step
//! failed; warnings that should not fail the task are logged and swallowed.

mod command;
mod control_plane;
#[cfg(test)]
pub(crate) mod fakes;
mod guided;
mod health;
mod local;
mod paas;
mod remote_steps;

pub use command::{CommandOutput, CommandRunner, TokioCommandRunner, MAX_OUTPUT_CAPTURE_BYTES};
pub use control_plane::{ControlPlane, GraphqlControlPlane, ProjectHandle};
pub use guided::{find_provider, provider_catalog, GuidedBackend, ProviderInfo, SetupInstructions};
pub use health::{HealthProbe, HttpHealthProbe};
pub use local::{render_compose_manifest, render_instance_config, LocalBackend};
pub use paas::PaasBackend;
pub use remote_steps::{generate_secret, sanitize_login, RemoteSteps};

use crate::build::TaskContext;
use crate::config::BuilderConfig;
use crate::error::Result;
use crate::ports::PortFuture;
use crate::rpc::{JsonRpcTransport, RpcTransport};
use crate::types::{CompanyProfile, DeployTarget, ModuleKey, TargetSpec, UserRole};
use serde_json::{Map, Value};
use std::sync::Arc;

pub trait DeployBackend: Send {
    fn name(&self) -> &'static str;

    /// Creates the runtime the instance will live in.
    fn provision<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, ()>;

    /// Blocks until the instance answers over HTTP.
    fn wait_ready<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, ()>;

    fn init_database<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, ()>;

    fn install_module<'a>(
        &'a mut self,
        ctx: &'a TaskContext,
        module: &'a ModuleKey,
    ) -> PortFuture<'a, ()>;

    fn configure_module<'a>(
        &'a mut self,
        ctx: &'a TaskContext,
        module: &'a ModuleKey,
        settings: &'a Map<String, Value>,
    ) -> PortFuture<'a, ()>;

    fn setup_users<'a>(
        &'a mut self,
        ctx: &'a TaskContext,
        roles: &'a [UserRole],
        company: &'a CompanyProfile,
    ) -> PortFuture<'a, ()>;

    fn finalize<'a>(
        &'a mut self,
        ctx: &'a TaskContext,
        company: &'a CompanyProfile,
    ) -> PortFuture<'a, ()>;

    /// Releases whatever `provision` created. Resolves to `true` when
    /// something was torn down.
    fn cleanup<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, bool>;
}

/// External adapters a backend may need.
#[derive(Clone)]
pub struct BackendPorts {
    pub commands: Arc<dyn CommandRunner>,
    pub health: Arc<dyn HealthProbe>,
    pub rpc: Arc<dyn RpcTransport>,
    pub control_plane: Option<Arc<dyn ControlPlane>>,
}

impl BackendPorts {
    /// Real process, HTTP and JSON-RPC adapters. The control plane is only
    /// built when a cloud token is configured.
    #[must_use]
    pub fn live(config: &BuilderConfig) -> Self {
        let control_plane = config.cloud_api_token.as_ref().map(|token| {
            Arc::new(GraphqlControlPlane::new(
                token.clone(),
                config.cloud_api_urls.clone(),
                config.request_timeout,
            )) as Arc<dyn ControlPlane>
        });
        Self {
            commands: Arc::new(TokioCommandRunner::new(config.command_timeout)),
            health: Arc::new(HttpHealthProbe::new(config.request_timeout)),
            rpc: Arc::new(JsonRpcTransport::new(config.request_timeout)),
            control_plane,
        }
    }
}

/// Backend for `spec.deploy_target`.
///
/// # Errors
/// Returns `ConfigError` when a cloud-PaaS build has no control-plane
/// credentials, or an unknown guided-cloud provider is named.
pub fn backend_for(
    spec: &TargetSpec,
    config: &BuilderConfig,
    ports: &BackendPorts,
) -> Result<Box<dyn DeployBackend>> {
    match spec.deploy_target {
        DeployTarget::Local => Ok(Box::new(LocalBackend::new(spec, config, ports))),
        DeployTarget::CloudPaas => {
            config.require_cloud_token()?;
            let control_plane = ports.control_plane.clone().ok_or_else(|| {
                crate::error::SwarmError::ConfigError(
                    "Cloud control plane is not configured".to_string(),
                )
            })?;
            Ok(Box::new(PaasBackend::new(spec, config, ports, control_plane)))
        }
        DeployTarget::GuidedCloud => Ok(Box::new(GuidedBackend::new(spec)?)),
    }
}
