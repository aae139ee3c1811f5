//! Clap CLI definitions for agentlink.

use agentlink_types::RawBridgeConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
Examples:
  agentlink start --agent-address agent1... --port 9001
  agentlink check --config demos/airbnb.toml --json
  agentlink identity --seed my-bridge-seed

The bridge seed is read from `seed` in the config file, then from the
AGENTLINK_BRIDGE_SEED environment variable.";

/// agentlink: a JSON-RPC front door for agents on the messaging network.
#[derive(Parser, Debug)]
#[command(name = "agentlink", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file (default: ~/.agentlink/bridge.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bridge until Ctrl+C or SIGTERM.
    Start {
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
    /// Validate the configuration and show what the bridge would expose.
    Check {
        #[command(flatten)]
        overrides: ConfigOverrides,
        /// Output as JSON for scripting.
        #[arg(long)]
        json: bool,
    },
    /// Print the network address derived from a seed.
    Identity {
        /// Seed to derive from (default: AGENTLINK_BRIDGE_SEED).
        #[arg(long)]
        seed: Option<String>,
    },
}

/// Command-line values that take precedence over the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Address of the remote agent to bridge to.
    #[arg(long)]
    pub agent_address: Option<String>,
    /// RPC (HTTP) port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Messaging network port.
    #[arg(long)]
    pub bridge_port: Option<u16>,
    /// Host to bind both listeners on.
    #[arg(long)]
    pub host: Option<String>,
    /// Seed for the bridge identity.
    #[arg(long)]
    pub seed: Option<String>,
}

impl ConfigOverrides {
    pub fn into_raw(self) -> RawBridgeConfig {
        RawBridgeConfig {
            agent_address: self.agent_address,
            port: self.port,
            bridge_port: self.bridge_port,
            host: self.host,
            seed: self.seed,
            ..RawBridgeConfig::default()
        }
    }
}
