use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "erpswarm")]
#[command(about = "Select ERP modules from capability signals and build configured instances")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the module-selection swarm over a signal file
    Decide {
        signals: PathBuf,
        #[arg(long)]
        registry: Option<PathBuf>,
        #[arg(long, default_value = "unrestricted")]
        tier: String,
        #[arg(long = "target-version", default_value = "17.0")]
        target_version: String,
        /// Writes module_plan.json, config_tasks.json and implementation_summary.md
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Also writes target_spec.json for this company
        #[arg(long)]
        company: Option<String>,
    },
    /// Print the install order of a module plan
    Order { plan: PathBuf },
    /// Install a module plan on a running instance
    Apply {
        plan: PathBuf,
        #[arg(long, env = "ERP_URL")]
        url: Option<String>,
        #[arg(long, env = "ERP_DB")]
        db: Option<String>,
        #[arg(long, env = "ERP_USER", default_value = "admin")]
        user: String,
        #[arg(long, env = "ERP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        fail_on_missing: bool,
    },
    /// Build an instance from a target specification
    Build {
        spec: PathBuf,
        /// local | cloud-paas | guided-cloud
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        provider: Option<String>,
    },
    /// List guided-cloud providers
    Providers,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}
