#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

pub mod backends;
pub mod build;
pub mod config;
pub mod error;
pub mod ports;
pub mod registry;
pub mod rpc;
pub mod swarm;
pub mod types;

pub use backends::{backend_for, BackendPorts, DeployBackend};
pub use build::{BuildOrchestrator, BuildRegistry, ProgressSink};
pub use config::{load_config, BuilderConfig};
pub use error::{Result, SwarmError};
pub use registry::ModuleRegistry;
pub use rpc::{RemoteConfigClient, RpcCredentials, RpcSettings};
pub use swarm::{DecisionEngine, DecisionOutcome};
pub use types::*;
