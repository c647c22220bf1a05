use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn short_uuid(len: usize) -> String {
    Uuid::new_v4().simple().to_string().chars().take(len).collect()
}

/// Build identifier (`build-xxxxxxxx`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(String);

impl BuildId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(format!("build-{}", short_uuid(8)))
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(format!("task-{}", short_uuid(6)))
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Technical key of an installable module (`sale_management`, `stock`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleKey(String);

impl ModuleKey {
    /// Every instance carries the universal base module.
    pub const BASE: &'static str = "base";

    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn base() -> Self {
        Self(Self::BASE.to_string())
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_base(&self) -> bool {
        self.0 == Self::BASE
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModuleKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
