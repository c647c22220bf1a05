//! Remote configuration client for a running ERP instance.
//!
//! Two protocol generations are supported. Current instances authenticate
//! with `authenticate` and call models through `execute_kw`; legacy
//! instances (major version below 8) use `login` and positional `execute`.
//! The generation is fixed when the client is created.

mod apply;
mod jsonrpc;

pub use apply::{dry_run_report, ApplyOptions, ApplyReport, ModuleApplyResult, ModuleApplyStatus};
pub use jsonrpc::{JsonRpcTransport, RpcTransport};

use crate::config::BuilderConfig;
use crate::error::{Result, SwarmError};
use crate::ports::CancelFlag;
use crate::registry::major_version;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const MODULE_MODEL: &str = "ir.module.module";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolGeneration {
    Legacy,
    Current,
}

impl ProtocolGeneration {
    #[must_use]
    pub fn from_version(version: &str) -> Self {
        match major_version(version) {
            Some(major) if major < 8 => Self::Legacy,
            _ => Self::Current,
        }
    }

    #[must_use]
    pub const fn endpoint_path(&self) -> &'static str {
        match self {
            Self::Legacy => "/web/jsonrpc",
            Self::Current => "/jsonrpc",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RpcCredentials {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub version: String,
}

impl fmt::Debug for RpcCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcCredentials")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("version", &self.version)
            .finish()
    }
}

/// Timing knobs for authentication and module-state polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcSettings {
    pub login_attempts: u32,
    pub login_backoff: Duration,
    pub poll_interval: Duration,
    pub install_timeout: Duration,
}

impl From<&BuilderConfig> for RpcSettings {
    fn from(config: &BuilderConfig) -> Self {
        Self {
            login_attempts: config.login_attempts,
            login_backoff: config.login_backoff,
            poll_interval: config.install_poll_interval,
            install_timeout: config.install_timeout,
        }
    }
}

/// Final state observed while waiting for a module install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallWait {
    Installed,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RemoteSession {
    uid: i64,
}

pub struct RemoteConfigClient {
    credentials: RpcCredentials,
    generation: ProtocolGeneration,
    endpoint: String,
    transport: Arc<dyn RpcTransport>,
    settings: RpcSettings,
    session: Option<RemoteSession>,
}

impl RemoteConfigClient {
    #[must_use]
    pub fn new(
        credentials: RpcCredentials,
        transport: Arc<dyn RpcTransport>,
        settings: RpcSettings,
    ) -> Self {
        let generation = ProtocolGeneration::from_version(&credentials.version);
        let endpoint = format!(
            "{}{}",
            credentials.url.trim_end_matches('/'),
            generation.endpoint_path()
        );
        Self {
            credentials,
            generation,
            endpoint,
            transport,
            settings,
            session: None,
        }
    }

    #[must_use]
    pub const fn generation(&self) -> ProtocolGeneration {
        self.generation
    }

    /// User id of the current session, if authenticated.
    #[must_use]
    pub fn uid(&self) -> Option<i64> {
        self.session.map(|session| session.uid)
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub const fn credentials(&self) -> &RpcCredentials {
        &self.credentials
    }

    /// Drops the cached session so the next call re-authenticates.
    pub fn discard_session(&mut self) {
        if self.session.take().is_some() {
            debug!(url = %self.credentials.url, "Discarded remote session");
        }
    }

    /// # Errors
    /// Returns `RemoteFault` when the credentials are rejected, or the
    /// transport error.
    pub async fn login(&mut self) -> Result<i64> {
        let creds = &self.credentials;
        let (method, args) = match self.generation {
            ProtocolGeneration::Legacy => (
                "login",
                vec![json!(creds.database), json!(creds.username), json!(creds.password)],
            ),
            ProtocolGeneration::Current => (
                "authenticate",
                vec![
                    json!(creds.database),
                    json!(creds.username),
                    json!(creds.password),
                    json!({}),
                ],
            ),
        };
        let response = self
            .transport
            .call(&self.endpoint, "common", method, args)
            .await?;
        let uid = response.as_i64().filter(|uid| *uid > 0).ok_or_else(|| {
            SwarmError::RemoteFault(format!(
                "Authentication failed for user '{}' on database '{}'",
                creds.username, creds.database
            ))
        })?;
        self.session = Some(RemoteSession { uid });
        info!(url = %creds.url, database = %creds.database, uid, "Authenticated");
        Ok(uid)
    }

    /// Retries transport failures with a fixed backoff; the instance may
    /// still be starting.
    ///
    /// # Errors
    /// Returns the last error once attempts are exhausted, or `Cancelled`.
    pub async fn login_with_retry(&mut self, cancel: &CancelFlag) -> Result<i64> {
        let attempts = self.settings.login_attempts.max(1);
        let mut attempt = 1;
        loop {
            cancel.check("login")?;
            let outcome = cancel.guard("login", self.login()).await;
            match outcome {
                Ok(uid) => return Ok(uid),
                Err(err) if err.is_transport() && attempt < attempts => {
                    warn!(attempt, attempts, error = %err, "Login failed; retrying");
                    attempt += 1;
                    cancel.sleep(self.settings.login_backoff, "login").await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// `entity.method(*args, **kwargs)`; keyword arguments are dropped on
    /// legacy instances.
    ///
    /// # Errors
    /// Transport errors also discard the cached session.
    pub async fn call(
        &mut self,
        entity: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value> {
        let uid = match self.session {
            Some(session) => session.uid,
            None => self.login().await?,
        };
        let creds = &self.credentials;
        let mut call_args = vec![
            json!(creds.database),
            json!(uid),
            json!(creds.password),
            json!(entity),
            json!(method),
        ];
        let rpc_method = match self.generation {
            ProtocolGeneration::Legacy => {
                call_args.extend(args);
                "execute"
            }
            ProtocolGeneration::Current => {
                call_args.push(Value::Array(args));
                call_args.push(Value::Object(kwargs));
                "execute_kw"
            }
        };
        let result = self
            .transport
            .call(&self.endpoint, "object", rpc_method, call_args)
            .await;
        if let Err(err) = &result {
            if err.is_transport() {
                warn!(entity, method, error = %err, "Transport error; session discarded");
                self.discard_session();
            }
        }
        result
    }

    /// # Errors
    /// Propagates RPC errors.
    pub async fn update_module_catalog(&mut self) -> Result<()> {
        self.call(MODULE_MODEL, "update_list", Vec::new(), Map::new())
            .await
            .map(|_| ())
    }

    /// Record id of the module named `key`, if the instance knows it.
    ///
    /// # Errors
    /// Propagates RPC errors.
    pub async fn find_module(&mut self, key: &str) -> Result<Option<i64>> {
        let ids = self
            .call(
                MODULE_MODEL,
                "search",
                vec![json!([["name", "=", key]])],
                Map::new(),
            )
            .await?;
        Ok(ids
            .as_array()
            .and_then(|ids| ids.first())
            .and_then(Value::as_i64))
    }

    /// # Errors
    /// Propagates RPC errors.
    pub async fn get_module_state(&mut self, module_id: i64) -> Result<String> {
        let rows = self
            .call(
                MODULE_MODEL,
                "read",
                vec![json!([module_id]), json!(["state"])],
                Map::new(),
            )
            .await?;
        let row = match &rows {
            Value::Array(rows) => rows.first(),
            Value::Object(_) => Some(&rows),
            _ => None,
        };
        Ok(row
            .and_then(|row| row.get("state"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    /// Immediate install where supported, queued install otherwise.
    ///
    /// # Errors
    /// Propagates RPC errors from the queued install call.
    pub async fn install_module(&mut self, module_id: i64) -> Result<()> {
        if self.generation == ProtocolGeneration::Current {
            match self
                .call(
                    MODULE_MODEL,
                    "button_immediate_install",
                    vec![json!([module_id])],
                    Map::new(),
                )
                .await
            {
                Ok(_) => return Ok(()),
                Err(SwarmError::RemoteFault(fault)) => {
                    debug!(module_id, %fault, "Immediate install unsupported; queueing install");
                }
                Err(err) => return Err(err),
            }
        }
        self.call(
            MODULE_MODEL,
            "button_install",
            vec![json!([module_id])],
            Map::new(),
        )
        .await
        .map(|_| ())
    }

    /// Polls the module state until installed, uninstallable or timed out.
    ///
    /// # Errors
    /// Propagates RPC errors and `Cancelled`.
    pub async fn wait_until_installed(
        &mut self,
        module_id: i64,
        cancel: &CancelFlag,
    ) -> Result<InstallWait> {
        let deadline = Instant::now() + self.settings.install_timeout;
        loop {
            cancel.check("wait_until_installed")?;
            let state = self.get_module_state(module_id).await?;
            match state.as_str() {
                "installed" => return Ok(InstallWait::Installed),
                "uninstallable" => return Ok(InstallWait::Failed(state)),
                _ => {}
            }
            if Instant::now() >= deadline {
                return Ok(InstallWait::TimedOut);
            }
            cancel
                .sleep(self.settings.poll_interval, "wait_until_installed")
                .await?;
        }
    }

    /// Searches `entity` and returns matching ids.
    ///
    /// # Errors
    /// Propagates RPC errors.
    pub async fn search(
        &mut self,
        entity: &str,
        domain: Value,
        kwargs: Map<String, Value>,
    ) -> Result<Vec<i64>> {
        let ids = self.call(entity, "search", vec![domain], kwargs).await?;
        Ok(ids
            .as_array()
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default())
    }

    /// # Errors
    /// Propagates RPC errors.
    pub async fn write(&mut self, entity: &str, ids: &[i64], values: Value) -> Result<()> {
        self.call(entity, "write", vec![json!(ids), values], Map::new())
            .await
            .map(|_| ())
    }

    /// # Errors
    /// Returns `RemoteFault` if the create call does not return an id.
    pub async fn create(&mut self, entity: &str, values: Value) -> Result<i64> {
        let id = self
            .call(entity, "create", vec![values], Map::new())
            .await?;
        id.as_i64()
            .or_else(|| id.as_array().and_then(|ids| ids.first()).and_then(Value::as_i64))
            .ok_or_else(|| SwarmError::RemoteFault(format!("{entity}.create returned no id")))
    }
}
