use crate::build::TaskContext;
use crate::error::{Result, SwarmError};
use crate::rpc::{InstallWait, RemoteConfigClient, RpcCredentials, RpcSettings, RpcTransport};
use crate::types::{CompanyProfile, ModuleKey, UserRole};
use itertools::Itertools;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

const COMPANY_ID: i64 = 1;
const SLUG_LIMIT: usize = 20;

/// Random alphanumeric secret.
#[must_use]
pub fn generate_secret(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Login-safe form of `name`: compatibility-decomposed, non-ASCII marks
/// dropped, lowercased, every other character becomes `_`, runs collapsed,
/// ends trimmed. `user` if nothing is left.
#[must_use]
pub fn sanitize_login(name: &str) -> String {
    let folded: String = name
        .nfkd()
        .filter(char::is_ascii)
        .collect::<String>()
        .to_ascii_lowercase();
    let sanitized = folded
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .join("_");
    if sanitized.is_empty() {
        "user".to_string()
    } else {
        sanitized
    }
}

fn is_duplicate(err: &SwarmError) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("already exists") || message.contains("unique")
}

/// Configuration steps executed over the remote configuration client.
///
/// One authenticated client is cached for the whole build and dropped on
/// any transport error so the next step logs in again.
pub struct RemoteSteps {
    credentials: RpcCredentials,
    transport: Arc<dyn RpcTransport>,
    settings: RpcSettings,
    client: Option<RemoteConfigClient>,
}

impl RemoteSteps {
    #[must_use]
    pub fn new(
        credentials: RpcCredentials,
        transport: Arc<dyn RpcTransport>,
        settings: RpcSettings,
    ) -> Self {
        Self {
            credentials,
            transport,
            settings,
            client: None,
        }
    }

    #[must_use]
    pub const fn credentials(&self) -> &RpcCredentials {
        &self.credentials
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.credentials.url = url.into();
        self.disconnect();
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.credentials.password = password.into();
        self.disconnect();
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn disconnect(&mut self) {
        self.client = None;
    }

    async fn connect(&mut self, ctx: &TaskContext) -> Result<&mut RemoteConfigClient> {
        if self.client.is_none() {
            ctx.log(format!("Connecting to {}", self.credentials.url));
            let mut client = RemoteConfigClient::new(
                self.credentials.clone(),
                Arc::clone(&self.transport),
                self.settings,
            );
            client.login_with_retry(ctx.cancel()).await?;
            self.client = Some(client);
        }
        self.client
            .as_mut()
            .ok_or_else(|| SwarmError::Internal("Remote client missing after login".to_string()))
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_transport() {
                self.disconnect();
            }
        }
        result
    }

    /// Installs one module and waits for it. A module the instance does not
    /// know is skipped with a log line.
    ///
    /// # Errors
    /// Transport errors (session dropped), faults, or a failed/timed-out
    /// install.
    pub async fn install_module(&mut self, ctx: &TaskContext, module: &ModuleKey) -> Result<()> {
        let result = self.install_inner(ctx, module).await;
        self.settle(result)
    }

    async fn install_inner(&mut self, ctx: &TaskContext, module: &ModuleKey) -> Result<()> {
        ctx.log(format!("Installing module: {module}"));
        ctx.set_progress(10);
        let client = self.connect(ctx).await?;
        ctx.set_progress(30);

        ctx.log("Updating module list...");
        client.update_module_catalog().await?;
        ctx.set_progress(50);

        let Some(module_id) = client.find_module(module.value()).await? else {
            ctx.log(format!("Module {module} not found, skipping"));
            return Ok(());
        };
        if client.get_module_state(module_id).await? == "installed" {
            ctx.log(format!("Module {module} already installed"));
            return Ok(());
        }

        client.install_module(module_id).await?;
        ctx.set_progress(70);
        match client.wait_until_installed(module_id, ctx.cancel()).await? {
            InstallWait::Installed => {
                ctx.log(format!("Module {module} installed successfully"));
                Ok(())
            }
            InstallWait::Failed(state) => Err(SwarmError::RemoteFault(format!(
                "Module {module} ended in state '{state}'"
            ))),
            InstallWait::TimedOut => Err(SwarmError::Timeout(format!(
                "Module {module} did not finish installing"
            ))),
        }
    }

    /// Applies settings through a settings wizard record. Faults are logged
    /// as warnings; only transport errors fail the task.
    ///
    /// # Errors
    /// Transport errors.
    pub async fn configure_module(
        &mut self,
        ctx: &TaskContext,
        module: &ModuleKey,
        settings: &Map<String, Value>,
    ) -> Result<()> {
        ctx.log(format!("Configuring {module}..."));
        if settings.is_empty() {
            ctx.log("No settings to apply, skipping");
            return Ok(());
        }
        let result = self.configure_inner(ctx, settings).await;
        let result = self.settle(result);
        match result {
            Ok(()) => {
                ctx.log("Settings applied successfully");
                Ok(())
            }
            Err(err) if err.is_transport() || matches!(err, SwarmError::Cancelled(_)) => Err(err),
            Err(err) => {
                ctx.warn(format!("settings apply failed ({err}), continuing anyway"));
                Ok(())
            }
        }
    }

    async fn configure_inner(&mut self, ctx: &TaskContext, settings: &Map<String, Value>) -> Result<()> {
        ctx.set_progress(30);
        let client = self.connect(ctx).await?;
        ctx.log(format!("Applying settings: {}", settings.keys().join(", ")));
        let wizard_id = client
            .create("res.config.settings", Value::Object(settings.clone()))
            .await?;
        ctx.set_progress(70);
        client
            .call(
                "res.config.settings",
                "set_values",
                vec![json!([wizard_id])],
                Map::new(),
            )
            .await
            .map(|_| ())
    }

    /// Creates `headcount` users per role with the role's groups.
    ///
    /// # Errors
    /// Transport errors.
    pub async fn setup_users(
        &mut self,
        ctx: &TaskContext,
        roles: &[UserRole],
        company: &CompanyProfile,
    ) -> Result<()> {
        ctx.log("Setting up user roles...");
        if roles.is_empty() {
            ctx.log("No user roles defined, skipping");
            return Ok(());
        }
        let result = self.users_inner(ctx, roles, company).await;
        let result = self.settle(result);
        match result {
            Ok(()) => {
                ctx.log("User roles configured");
                Ok(())
            }
            Err(err) if err.is_transport() || matches!(err, SwarmError::Cancelled(_)) => Err(err),
            Err(err) => {
                ctx.warn(format!("user setup encountered errors ({err})"));
                Ok(())
            }
        }
    }

    async fn users_inner(
        &mut self,
        ctx: &TaskContext,
        roles: &[UserRole],
        company: &CompanyProfile,
    ) -> Result<()> {
        let client = self.connect(ctx).await?;
        let company_slug: String = sanitize_login(&company.name)
            .chars()
            .take(SLUG_LIMIT)
            .collect();

        for (index, role) in roles.iter().enumerate() {
            let progress = 20 + index * 70 / roles.len();
            ctx.set_progress(u8::try_from(progress).unwrap_or(90));

            let group_ids = resolve_groups(client, ctx, &role.groups).await?;
            ctx.log(format!(
                "  {}: creating {} user(s) with {} groups",
                role.name,
                role.headcount,
                group_ids.len()
            ));

            let login_base = sanitize_login(&role.name);
            for n in 1..=role.headcount {
                let suffix = if role.headcount > 1 {
                    format!("_{n}")
                } else {
                    String::new()
                };
                let login = format!("{login_base}{suffix}@{company_slug}.local");
                let password = generate_secret(14);
                let mut values = json!({
                    "name": format!("{}{suffix}", role.name),
                    "login": login,
                    "password": password,
                });
                if !group_ids.is_empty() {
                    values["groups_id"] = Value::Array(
                        group_ids.iter().map(|gid| json!([4, gid])).collect(),
                    );
                }
                match client.create("res.users", values).await {
                    Ok(_) => ctx.log(format!("    Created user: {login} (password: {password})")),
                    Err(err) if err.is_transport() => return Err(err),
                    Err(err) if is_duplicate(&err) => {
                        ctx.log(format!("    User {login} already exists, skipping"));
                    }
                    Err(err) => ctx.warn(format!("failed to create {login}: {err}")),
                }
            }
        }
        Ok(())
    }

    /// Company name, currency, country and the admin timezone.
    ///
    /// # Errors
    /// Transport errors.
    pub async fn finalize(&mut self, ctx: &TaskContext, company: &CompanyProfile) -> Result<()> {
        ctx.log(format!("Setting company name to: {}", company.name));
        if !company.industry.is_empty() {
            ctx.log(format!("Industry: {}", company.industry));
        }
        let result = self.finalize_inner(ctx, company).await;
        let result = self.settle(result);
        match result {
            Ok(()) => {
                ctx.log("Final configuration complete");
                Ok(())
            }
            Err(err) if err.is_transport() || matches!(err, SwarmError::Cancelled(_)) => Err(err),
            Err(err) => {
                ctx.warn(format!("final config encountered errors ({err})"));
                Ok(())
            }
        }
    }

    async fn finalize_inner(&mut self, ctx: &TaskContext, company: &CompanyProfile) -> Result<()> {
        let client = self.connect(ctx).await?;
        ctx.set_progress(30);
        let mut values = Map::new();
        values.insert("name".to_string(), json!(company.name));

        if !company.currency.is_empty() {
            ctx.log(format!("Setting currency: {}", company.currency));
            let mut kwargs = Map::new();
            kwargs.insert("context".to_string(), json!({"active_test": false}));
            let ids = client
                .search("res.currency", json!([["name", "=", company.currency]]), kwargs)
                .await?;
            if let Some(currency_id) = ids.first() {
                client
                    .write("res.currency", &[*currency_id], json!({"active": true}))
                    .await?;
                values.insert("currency_id".to_string(), json!(currency_id));
            }
        }
        ctx.set_progress(50);

        if !company.country.is_empty() {
            ctx.log(format!("Setting country: {}", company.country));
            let ids = client
                .search("res.country", json!([["code", "=", company.country]]), Map::new())
                .await?;
            if let Some(country_id) = ids.first() {
                values.insert("country_id".to_string(), json!(country_id));
            }
        }
        ctx.set_progress(70);

        client
            .write("res.company", &[COMPANY_ID], Value::Object(values))
            .await?;
        ctx.log("Company settings applied");

        if !company.timezone.is_empty() {
            if let Some(uid) = client.uid() {
                ctx.log(format!("Setting admin timezone: {}", company.timezone));
                client
                    .write("res.users", &[uid], json!({"tz": company.timezone}))
                    .await?;
            }
        }
        Ok(())
    }

    /// Sets a new password for the logged-in admin and switches to it.
    ///
    /// # Errors
    /// Transport errors and faults.
    pub async fn rotate_admin_password(&mut self, ctx: &TaskContext, password: &str) -> Result<()> {
        let result = self.rotate_inner(ctx, password).await;
        let result = self.settle(result);
        if result.is_ok() {
            self.set_password(password);
        }
        result
    }

    async fn rotate_inner(&mut self, ctx: &TaskContext, password: &str) -> Result<()> {
        let client = self.connect(ctx).await?;
        let uid = client
            .uid()
            .ok_or_else(|| SwarmError::Internal("No authenticated session".to_string()))?;
        client
            .write("res.users", &[uid], json!({"password": password}))
            .await
    }
}

/// Resolves `module.name` group references to record ids. Malformed
/// references and lookup faults are logged and skipped.
async fn resolve_groups(
    client: &mut RemoteConfigClient,
    ctx: &TaskContext,
    references: &[String],
) -> Result<Vec<i64>> {
    let mut ids = Vec::new();
    for reference in references {
        let Some((module, name)) = reference
            .split_once('.')
            .filter(|(module, name)| !module.is_empty() && !name.is_empty() && !name.contains('.'))
        else {
            ctx.log(format!("  Skipping invalid group reference: {reference}"));
            continue;
        };
        let lookup = async {
            let data_ids = client
                .search(
                    "ir.model.data",
                    json!([["module", "=", module], ["name", "=", name]]),
                    Map::new(),
                )
                .await?;
            if data_ids.is_empty() {
                return Ok(None);
            }
            let rows = client
                .call(
                    "ir.model.data",
                    "read",
                    vec![json!(data_ids), json!(["res_id"])],
                    Map::new(),
                )
                .await?;
            let row = match &rows {
                Value::Array(rows) => rows.first().cloned(),
                Value::Object(_) => Some(rows.clone()),
                _ => None,
            };
            Ok::<_, SwarmError>(row.and_then(|row| row.get("res_id").and_then(Value::as_i64)))
        };
        match lookup.await {
            Ok(Some(id)) => ids.push(id),
            Ok(None) => ctx.log(format!("  Group {reference} not found")),
            Err(err) if err.is_transport() => return Err(err),
            Err(err) => ctx.warn(format!("could not resolve {reference}: {err}")),
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests;
