use super::ModuleKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub locale: Option<String>,
}

fn default_country() -> String {
    "US".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl CompanyProfile {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            industry: String::new(),
            country: default_country(),
            currency: default_currency(),
            timezone: default_timezone(),
            locale: None,
        }
    }

    /// Lowercase, dash-separated name, at most 20 characters.
    #[must_use]
    pub fn slug(&self) -> String {
        let slug: String = self
            .name
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '_' { '-' } else { c })
            .take(20)
            .collect();
        if slug.is_empty() {
            "company".to_string()
        } else {
            slug
        }
    }
}

/// One module the build must install, with its non-default settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRequest {
    #[serde(alias = "module_name")]
    pub key: ModuleKey,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default, alias = "depends_on")]
    pub dependencies: Vec<ModuleKey>,
}

impl ModuleRequest {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        let key = ModuleKey::new(key);
        Self {
            display_name: key.value().to_string(),
            key,
            settings: Map::new(),
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_setting(mut self, name: impl Into<String>, value: Value) -> Self {
        self.settings.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.dependencies.push(ModuleKey::new(key));
        self
    }

    #[must_use]
    pub fn has_settings(&self) -> bool {
        !self.settings.is_empty()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            self.key.value()
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Permission groups as `module.identifier` references.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default = "default_headcount", alias = "count")]
    pub headcount: u32,
}

const fn default_headcount() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeployTarget {
    #[default]
    #[serde(alias = "docker")]
    Local,
    #[serde(alias = "cloud-paas", alias = "railway")]
    CloudPaas,
    #[serde(alias = "guided-cloud")]
    GuidedCloud,
}

impl DeployTarget {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::CloudPaas => "cloud-paas",
            Self::GuidedCloud => "guided-cloud",
        }
    }
}

impl TryFrom<&str> for DeployTarget {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        match value {
            "local" | "docker" => Ok(Self::Local),
            "cloud-paas" | "cloud_paas" | "railway" => Ok(Self::CloudPaas),
            "guided-cloud" | "guided_cloud" => Ok(Self::GuidedCloud),
            _ => Err(format!("Invalid deploy target: {value}")),
        }
    }
}

impl fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a build needs to know about the instance it must produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub spec_id: String,
    pub company: CompanyProfile,
    #[serde(default)]
    pub modules: Vec<ModuleRequest>,
    #[serde(default)]
    pub user_roles: Vec<UserRole>,
    #[serde(default)]
    pub deploy_target: DeployTarget,
    #[serde(default)]
    pub cloud_provider: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "17.0".to_string()
}

impl TargetSpec {
    #[must_use]
    pub fn new(spec_id: impl Into<String>, company: CompanyProfile) -> Self {
        Self {
            spec_id: spec_id.into(),
            company,
            modules: Vec::new(),
            user_roles: Vec::new(),
            deploy_target: DeployTarget::Local,
            cloud_provider: None,
            version: default_version(),
        }
    }

    #[must_use]
    pub fn with_module(mut self, module: ModuleRequest) -> Self {
        self.modules.push(module);
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: UserRole) -> Self {
        self.user_roles.push(role);
        self
    }

    #[must_use]
    pub const fn with_target(mut self, target: DeployTarget) -> Self {
        self.deploy_target = target;
        self
    }

    #[must_use]
    pub fn module(&self, key: &ModuleKey) -> Option<&ModuleRequest> {
        self.modules.iter().find(|module| &module.key == key)
    }
}
