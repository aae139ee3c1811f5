//! Bridge configuration: the raw key/value mapping and its validated form.
//!
//! [`RawBridgeConfig`] mirrors the configuration surface one-to-one (every key
//! optional) and is what TOML files and CLI overrides deserialize into.
//! [`BridgeConfig::from_raw`] applies defaults and validates everything once,
//! before any socket is opened.

use crate::error::{ConfigError, ConfigResult};
use crate::identity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default RPC port.
pub const DEFAULT_RPC_PORT: u16 = 9000;
/// Default bind host for both listeners.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default messaging port = RPC port + this offset (9001 -> 8001).
pub const DEFAULT_MESSAGING_PORT_OFFSET: i32 = -1000;
/// Default time an RPC call waits for the remote agent's reply.
pub const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 30;
/// Default time shutdown waits for in-flight calls.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;
/// Default interval of the expired-entry sweep.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;

/// The configuration mapping as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawBridgeConfig {
    /// Address of the remote agent that does the work. Required.
    pub agent_address: Option<String>,
    /// Display name advertised in the Agent Card.
    pub name: Option<String>,
    /// Description advertised in the Agent Card.
    pub description: Option<String>,
    /// Skill tags advertised in the Agent Card.
    pub skill_tags: Vec<String>,
    /// Example prompts advertised in the Agent Card.
    pub skill_examples: Vec<String>,
    /// RPC (HTTP) port.
    pub port: Option<u16>,
    /// Messaging-network port. Derived from `port` when absent.
    pub bridge_port: Option<u16>,
    /// Bind host for both listeners.
    pub host: Option<String>,
    /// Identity seed. Falls back to the environment.
    pub seed: Option<String>,
    /// Refuse to start without an explicit seed.
    pub require_seed: Option<bool>,
    pub reply_timeout_secs: Option<u64>,
    pub drain_timeout_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    /// Offset used to derive `bridge_port` from `port`.
    pub messaging_port_offset: Option<i32>,
    /// Known agent endpoints: address -> `host:port`.
    pub endpoints: BTreeMap<String, String>,
}

impl RawBridgeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Overlay `overrides` on top of `self`. Scalar keys present in
    /// `overrides` win; list keys win when non-empty; endpoint tables merge.
    pub fn merge(mut self, overrides: RawBridgeConfig) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if overrides.$field.is_some() {
                    self.$field = overrides.$field;
                })*
            };
        }
        take!(
            agent_address,
            name,
            description,
            port,
            bridge_port,
            host,
            seed,
            require_seed,
            reply_timeout_secs,
            drain_timeout_secs,
            sweep_interval_secs,
            messaging_port_offset
        );
        if !overrides.skill_tags.is_empty() {
            self.skill_tags = overrides.skill_tags;
        }
        if !overrides.skill_examples.is_empty() {
            self.skill_examples = overrides.skill_examples;
        }
        self.endpoints.extend(overrides.endpoints);
        self
    }
}

/// Validated bridge configuration.
#[derive(Clone, PartialEq)]
pub struct BridgeConfig {
    pub target_agent_address: String,
    pub display_name: String,
    pub description: String,
    pub skill_tags: BTreeSet<String>,
    pub skill_examples: Vec<String>,
    pub rpc_port: u16,
    pub messaging_port: u16,
    pub host: String,
    pub reply_timeout: Duration,
    pub drain_timeout: Duration,
    pub sweep_interval: Duration,
    /// Configured seed, if any. Resolution against the environment happens in
    /// [`identity::resolve_identity`].
    pub seed: Option<String>,
    pub require_seed: bool,
    pub endpoints: BTreeMap<String, SocketAddr>,
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("target_agent_address", &self.target_agent_address)
            .field("display_name", &self.display_name)
            .field("rpc_port", &self.rpc_port)
            .field("messaging_port", &self.messaging_port)
            .field("host", &self.host)
            .field("reply_timeout", &self.reply_timeout)
            .field("seed", &self.seed.as_ref().map(|_| "<redacted>"))
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl BridgeConfig {
    /// Apply defaults and validate a raw mapping.
    pub fn from_raw(raw: RawBridgeConfig) -> ConfigResult<Self> {
        let target_agent_address = raw
            .agent_address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .ok_or(ConfigError::MissingAgentAddress)?;
        if target_agent_address.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidAgentAddress(target_agent_address));
        }
        if !identity::is_valid_address(&target_agent_address) {
            warn!(
                target = %target_agent_address,
                "agent_address is not a well-formed network address; sends will fail"
            );
        }

        let host = raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        if host.trim().is_empty() {
            return Err(ConfigError::invalid("host", "must not be empty"));
        }

        let rpc_port = raw.port.unwrap_or(DEFAULT_RPC_PORT);
        let messaging_port = derive_messaging_port(
            rpc_port,
            raw.bridge_port,
            raw.messaging_port_offset
                .unwrap_or(DEFAULT_MESSAGING_PORT_OFFSET),
        )?;
        // Port 0 asks the OS for an ephemeral port, so two zeros never collide.
        if rpc_port != 0 && rpc_port == messaging_port {
            return Err(ConfigError::invalid(
                "bridge_port",
                format!("must differ from the RPC port {rpc_port}"),
            ));
        }

        let reply_timeout = positive_secs(
            "reply_timeout_secs",
            raw.reply_timeout_secs.unwrap_or(DEFAULT_REPLY_TIMEOUT_SECS),
        )?;
        let drain_timeout = positive_secs(
            "drain_timeout_secs",
            raw.drain_timeout_secs.unwrap_or(DEFAULT_DRAIN_TIMEOUT_SECS),
        )?;
        let sweep_interval = positive_secs(
            "sweep_interval_secs",
            raw.sweep_interval_secs
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        )?;

        let mut endpoints = BTreeMap::new();
        for (address, endpoint) in raw.endpoints {
            let addr = resolve_endpoint(&endpoint).ok_or_else(|| {
                ConfigError::invalid(
                    &format!("endpoints.{address}"),
                    format!("'{endpoint}' is not a host:port socket address"),
                )
            })?;
            endpoints.insert(address, addr);
        }

        let display_name = raw
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "agentlink bridge".to_string());
        let description = raw.description.unwrap_or_else(|| {
            format!("A2A bridge to network agent {target_agent_address}")
        });

        Ok(Self {
            target_agent_address,
            display_name,
            description,
            skill_tags: raw.skill_tags.into_iter().collect(),
            skill_examples: raw.skill_examples,
            rpc_port,
            messaging_port,
            host,
            reply_timeout,
            drain_timeout,
            sweep_interval,
            seed: raw.seed,
            require_seed: raw.require_seed.unwrap_or(false),
            endpoints,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        Self::from_raw(RawBridgeConfig::from_toml_str(contents)?)
    }

    /// Base URL of the RPC front door.
    pub fn rpc_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.rpc_port)
    }
}

/// Derive the messaging-network port: an explicit `bridge_port` wins,
/// otherwise `rpc_port + offset`.
pub fn derive_messaging_port(
    rpc_port: u16,
    bridge_port: Option<u16>,
    offset: i32,
) -> ConfigResult<u16> {
    if let Some(port) = bridge_port {
        return Ok(port);
    }
    if rpc_port == 0 {
        return Ok(0);
    }
    let derived = i64::from(rpc_port) + i64::from(offset);
    u16::try_from(derived)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| {
            ConfigError::invalid(
                "bridge_port",
                format!("port {rpc_port} with offset {offset} gives {derived}, out of range"),
            )
        })
}

fn positive_secs(key: &str, secs: u64) -> ConfigResult<Duration> {
    if secs == 0 {
        return Err(ConfigError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

fn resolve_endpoint(endpoint: &str) -> Option<SocketAddr> {
    if let Ok(addr) = endpoint.parse::<SocketAddr>() {
        return Some(addr);
    }
    endpoint.to_socket_addrs().ok()?.next()
}

/// Default config location: `~/.agentlink/bridge.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agentlink")
        .join("bridge.toml")
}

/// Read a raw config file. A missing file at the default location yields an
/// empty mapping; an explicitly named missing file is an error.
pub fn load_raw_config(path: Option<&Path>) -> ConfigResult<RawBridgeConfig> {
    let explicit = path.is_some();
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        if explicit {
            return Err(ConfigError::Read {
                path: config_path.display().to_string(),
                reason: "file not found".to_string(),
            });
        }
        info!(path = %config_path.display(), "Config file not found, using flags only");
        return Ok(RawBridgeConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Read {
        path: config_path.display().to_string(),
        reason: e.to_string(),
    })?;
    let raw = RawBridgeConfig::from_toml_str(&contents)?;
    info!(path = %config_path.display(), "Loaded configuration");
    Ok(raw)
}
