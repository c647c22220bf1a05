#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use thiserror::Error;

/// Error code constants for type-safe error handling
pub mod code {
    pub const CLI_ERROR: &str = "CLI_ERROR";
    pub const NOTFOUND: &str = "NOTFOUND";
    pub const INVALID: &str = "INVALID";
    pub const CONFLICT: &str = "CONFLICT";
    pub const DEPENDENCY: &str = "DEPENDENCY";
    pub const TRANSPORT: &str = "TRANSPORT";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const CANCELLED: &str = "CANCELLED";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Decision error: {0}")]
    DecisionError(String),

    #[error("Dependency cycle detected at module '{0}'")]
    DependencyCycle(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provisioning error: {0}")]
    ProvisioningError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Remote fault: {0}")]
    RemoteFault(String),

    #[error("Command error: {0}")]
    CommandError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwarmError {
    /// Returns the protocol error code for this error
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_)
            | Self::RegistryError(_)
            | Self::DecisionError(_)
            | Self::DependencyCycle(_)
            | Self::SerializationError(_) => code::INVALID,
            Self::Conflict(_) => code::CONFLICT,
            Self::NotFound(_) => code::NOTFOUND,
            Self::ProvisioningError(_) | Self::CommandError(_) | Self::IoError(_) => {
                code::DEPENDENCY
            }
            Self::TransportError(_) | Self::RemoteFault(_) => code::TRANSPORT,
            Self::Timeout(_) => code::TIMEOUT,
            Self::Cancelled(_) => code::CANCELLED,
            Self::Internal(_) => code::INTERNAL,
        }
    }

    /// Returns the exit code for this error
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigError(_) => 2,
            Self::RegistryError(_) | Self::DecisionError(_) | Self::DependencyCycle(_) => 3,
            Self::Conflict(_) => 4,
            Self::NotFound(_) => 5,
            Self::ProvisioningError(_) | Self::CommandError(_) => 6,
            Self::IoError(_) => 7,
            Self::SerializationError(_) => 8,
            Self::TransportError(_) | Self::RemoteFault(_) => 10,
            Self::Timeout(_) => 11,
            Self::Cancelled(_) => 12,
            Self::Internal(_) => 9,
        }
    }

    /// Errors after which a cached remote session must not be reused.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::TransportError(_) | Self::Timeout(_))
    }
}

impl From<reqwest::Error> for SwarmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::TransportError(err.to_string())
        }
    }
}

/// Protocol error codes as documented in the CLI
pub const ERROR_CODES: &[(&str, &str, &str)] = &[
    (
        code::CLI_ERROR,
        "Invalid CLI usage",
        "Run 'erpswarm --help' for valid options",
    ),
    (
        code::NOTFOUND,
        "Resource was not found",
        "List builds and verify the build identifier",
    ),
    (
        code::INVALID,
        "Invalid request payload or registry data",
        "Validate JSON syntax and module registry references",
    ),
    (
        code::CONFLICT,
        "A build is already running",
        "Wait for the active build to finish or stop it",
    ),
    (
        code::DEPENDENCY,
        "Missing system dependency or provisioning failure",
        "Install the container runtime or check cloud credentials and retry",
    ),
    (
        code::TRANSPORT,
        "Remote application unreachable or rejected a call",
        "Check the instance URL and credentials, then retry",
    ),
    (
        code::TIMEOUT,
        "Operation timed out",
        "Increase timeout and retry",
    ),
    (
        code::CANCELLED,
        "Operation was cancelled",
        "Start a new build",
    ),
    (
        code::INTERNAL,
        "Unexpected internal failure",
        "Inspect logs and retry command",
    ),
];

/// Get error code details (description and fix) for a given error code
#[must_use]
pub fn get_error_info(error_code: &str) -> Option<(&'static str, &'static str)> {
    ERROR_CODES
        .iter()
        .find(|(code, _, _)| *code == error_code)
        .map(|(_, desc, fix)| (*desc, *fix))
}

pub type Result<T> = std::result::Result<T, SwarmError>;
