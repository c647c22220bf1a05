//! Guided cloud backend. Nothing is automated: every step writes
//! instructions into its task and waits for the operator to confirm.

use super::DeployBackend;
use crate::build::{install_sequence, TaskContext};
use crate::error::{Result, SwarmError};
use crate::ports::PortFuture;
use crate::types::{CompanyProfile, ModuleKey, TargetSpec, UserRole};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_PROVIDER: &str = "skysize";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub signup_url: String,
    pub features: Vec<String>,
    pub recommended: bool,
}

fn provider(
    id: &str,
    name: &str,
    signup_url: &str,
    features: &[&str],
    recommended: bool,
) -> ProviderInfo {
    ProviderInfo {
        id: id.to_string(),
        name: name.to_string(),
        signup_url: signup_url.to_string(),
        features: features.iter().map(ToString::to_string).collect(),
        recommended,
    }
}

/// Hosting providers the guided flow knows how to walk through.
#[must_use]
pub fn provider_catalog() -> Vec<ProviderInfo> {
    vec![
        provider(
            "skysize",
            "SkySize.io",
            "https://skysize.io/signup",
            &["Free forever", "10GB storage", "5-min deploy", "No credit card"],
            true,
        ),
        provider(
            "odoo_sh",
            "Odoo.sh",
            "https://www.odoo.sh/trial",
            &["Official hosting", "15-day trial", "Full features"],
            false,
        ),
        provider(
            "railway",
            "Railway",
            "https://railway.app",
            &["Easy deploy", "Free tier", "GitHub integration"],
            false,
        ),
        provider(
            "render",
            "Render",
            "https://render.com",
            &["Free tier", "Auto-deploy", "Easy setup"],
            false,
        ),
    ]
}

#[must_use]
pub fn find_provider(id: &str) -> Option<ProviderInfo> {
    provider_catalog().into_iter().find(|info| info.id == id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionModule {
    pub name: String,
    pub technical_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRole {
    pub name: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanySettings {
    pub country: String,
    pub currency: String,
    pub timezone: String,
}

/// Everything the operator needs to reproduce the target by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupInstructions {
    pub provider: String,
    pub signup_url: String,
    pub company_name: String,
    pub industry: String,
    pub modules: Vec<InstructionModule>,
    pub settings: CompanySettings,
    pub user_roles: Vec<InstructionRole>,
}

/// `group_multi_currency` reads as `Multi Currency`.
fn setting_label(key: &str) -> String {
    key.trim_start_matches("group_")
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect::<String>()
            })
        })
        .join(" ")
}

fn setting_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub struct GuidedBackend {
    provider: ProviderInfo,
    instructions: SetupInstructions,
    company_slug: String,
    url: Option<String>,
}

impl GuidedBackend {
    /// # Errors
    /// Returns `ConfigError` for a provider id outside the catalog, or the
    /// dependency error when the module list cannot be ordered.
    pub fn new(spec: &TargetSpec) -> Result<Self> {
        let provider_id = spec.cloud_provider.as_deref().unwrap_or(DEFAULT_PROVIDER);
        let provider = find_provider(provider_id).ok_or_else(|| {
            SwarmError::ConfigError(format!(
                "Unknown cloud provider '{provider_id}'. Available: {}",
                provider_catalog().iter().map(|info| info.id.as_str()).join(", ")
            ))
        })?;

        let modules = install_sequence(spec)?
            .into_iter()
            .map(|module| InstructionModule {
                name: module.label().to_string(),
                technical_name: module.key.value().to_string(),
            })
            .collect();
        let instructions = SetupInstructions {
            provider: provider.name.clone(),
            signup_url: provider.signup_url.clone(),
            company_name: spec.company.name.clone(),
            industry: spec.company.industry.clone(),
            modules,
            settings: CompanySettings {
                country: spec.company.country.clone(),
                currency: spec.company.currency.clone(),
                timezone: spec.company.timezone.clone(),
            },
            user_roles: spec
                .user_roles
                .iter()
                .map(|role| InstructionRole {
                    name: role.name.clone(),
                    count: role.headcount,
                })
                .collect(),
        };

        Ok(Self {
            provider,
            instructions,
            company_slug: spec.company.slug(),
            url: None,
        })
    }

    #[must_use]
    pub const fn provider(&self) -> &ProviderInfo {
        &self.provider
    }

    #[must_use]
    pub const fn setup_instructions(&self) -> &SetupInstructions {
        &self.instructions
    }

    fn instance_url(&self) -> String {
        match self.provider.id.as_str() {
            "skysize" => format!("https://{}.skysize.io", self.company_slug),
            "odoo_sh" => format!("https://{}.odoo.com", self.company_slug),
            _ => "https://your-odoo-instance.example.com".to_string(),
        }
    }

    async fn provision_inner(&mut self, ctx: &TaskContext) -> Result<()> {
        let name = self.provider.name.clone();
        ctx.log(format!("Creating account on {name}..."));
        ctx.log(format!("Sign up URL: {}", self.provider.signup_url));
        ctx.set_progress(25);
        ctx.wait_for_user(
            Some(&self.provider.signup_url),
            &format!("Create a free account at {name}"),
        )
        .await?;
        ctx.log("Account setup ready");

        ctx.log("Creating new Odoo instance...");
        match self.provider.id.as_str() {
            "skysize" => {
                ctx.log(format!("Steps for {name}:"));
                ctx.log("  1. Click 'Create New App'");
                ctx.log("  2. Select 'Odoo' from templates");
                ctx.log("  3. Choose the target Odoo version");
                ctx.log(format!("  4. Name it: {}", self.company_slug));
                ctx.log("  5. Click 'Deploy'");
            }
            "odoo_sh" => {
                ctx.log(format!("Steps for {name}:"));
                ctx.log("  1. Start free trial");
                ctx.log("  2. Connect GitHub repository");
                ctx.log("  3. Select branch for deployment");
            }
            _ => ctx.log("Follow the provider's setup wizard"),
        }
        ctx.set_progress(60);
        ctx.wait_for_user(None, "Create a new Odoo instance/app").await?;

        let url = self.instance_url();
        ctx.update_outputs(|outputs| {
            outputs.url = Some(url.clone());
            outputs.provider = Some(self.provider.id.clone());
        });
        ctx.log(format!("Instance will be available at: {url}"));
        self.url = Some(url);
        Ok(())
    }

    async fn init_database_inner(&self, ctx: &TaskContext) -> Result<()> {
        ctx.log("Create the production database from the instance's database manager:");
        ctx.log(format!("  - Company: {}", self.instructions.company_name));
        ctx.log(format!("  - Country: {}", self.instructions.settings.country));
        ctx.log("  - Demo data: off");
        ctx.wait_for_user(
            self.url.as_deref(),
            "Create the database and log in as administrator",
        )
        .await?;
        ctx.log("Database ready");
        Ok(())
    }

    async fn install_inner(&self, ctx: &TaskContext, module: &ModuleKey) -> Result<()> {
        let label = self
            .instructions
            .modules
            .iter()
            .find(|entry| entry.technical_name == module.value())
            .map_or_else(|| module.to_string(), |entry| entry.name.clone());
        let position = self
            .instructions
            .modules
            .iter()
            .position(|entry| entry.technical_name == module.value())
            .map_or(0, |index| index + 1);
        ctx.log(format!(
            "  [{position}/{}] {label} ({module})",
            self.instructions.modules.len()
        ));
        ctx.wait_for_user(
            self.url.as_deref(),
            &format!("In Apps, install '{label}' ({module})"),
        )
        .await?;
        ctx.log(format!("{label} marked as installed"));
        Ok(())
    }

    async fn configure_inner(
        &self,
        ctx: &TaskContext,
        module: &ModuleKey,
        settings: &Map<String, Value>,
    ) -> Result<()> {
        if settings.is_empty() {
            ctx.log(format!("No settings for {module}, skipping"));
            return Ok(());
        }
        ctx.log(format!("Module settings to enable for {module}:"));
        for (key, value) in settings {
            ctx.log(format!("    - {}: {}", setting_label(key), setting_value(value)));
        }
        ctx.wait_for_user(self.url.as_deref(), "Apply these settings in Settings")
            .await?;
        ctx.log("Configuration instructions applied");
        Ok(())
    }

    async fn users_inner(&self, ctx: &TaskContext, roles: &[UserRole]) -> Result<()> {
        if roles.is_empty() {
            ctx.log("No user roles defined, skipping");
            return Ok(());
        }
        ctx.log("Create these users in Settings > Users:");
        for role in roles {
            ctx.log(format!("  - {} x{}", role.name, role.headcount));
            for group in &role.groups {
                ctx.log(format!("      group: {group}"));
            }
        }
        ctx.wait_for_user(self.url.as_deref(), "Create the users listed above")
            .await?;
        ctx.log("User roles configured");
        Ok(())
    }

    async fn finalize_inner(&self, ctx: &TaskContext, company: &CompanyProfile) -> Result<()> {
        ctx.log("In Settings > General Settings:");
        ctx.log(format!("  - Company Name: {}", company.name));
        ctx.log(format!("  - Country: {}", company.country));
        ctx.log(format!("  - Currency: {}", company.currency));
        ctx.log(format!("  - Timezone: {}", company.timezone));
        ctx.set_progress(50);
        ctx.wait_for_user(self.url.as_deref(), "Apply the company settings")
            .await?;

        ctx.log("Verification checklist:");
        for check in [
            "Can access the login page",
            "Can log in as admin",
            "All modules installed",
            "Company info configured",
        ] {
            ctx.log(format!("  [x] {check}"));
        }
        ctx.log("Setup complete! Your instance is ready to use.");
        Ok(())
    }
}

impl DeployBackend for GuidedBackend {
    fn name(&self) -> &'static str {
        "guided-cloud"
    }

    fn provision<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, ()> {
        Box::pin(self.provision_inner(ctx))
    }

    fn wait_ready<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, ()> {
        Box::pin(async move {
            if let Some(url) = &self.url {
                ctx.log(format!("Open {url} once the provider reports the app as running"));
            }
            Ok(())
        })
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
        Box::pin(self.configure_inner(ctx, module, settings))
    }

    fn setup_users<'a>(
        &'a mut self,
        ctx: &'a TaskContext,
        roles: &'a [UserRole],
        _company: &'a CompanyProfile,
    ) -> PortFuture<'a, ()> {
        Box::pin(self.users_inner(ctx, roles))
    }

    fn finalize<'a>(
        &'a mut self,
        ctx: &'a TaskContext,
        company: &'a CompanyProfile,
    ) -> PortFuture<'a, ()> {
        Box::pin(self.finalize_inner(ctx, company))
    }

    fn cleanup<'a>(&'a mut self, ctx: &'a TaskContext) -> PortFuture<'a, bool> {
        Box::pin(async move {
            ctx.log("Guided builds leave the hosted instance in place");
            Ok(false)
        })
    }
}
