//! Subcommand implementations.

use crate::cli::ConfigOverrides;
use agentlink_api::run_bridge;
use agentlink_types::config::load_raw_config;
use agentlink_types::identity::{resolve_identity, SEED_ENV_VAR};
use agentlink_types::{
    build_agent_card, BridgeConfig, BridgeIdentity, ConfigError, ConfigResult, SeedSource,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

/// Print `message` to stderr and exit with status 1.
fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

fn env_seed() -> Option<Zeroizing<String>> {
    std::env::var(SEED_ENV_VAR).ok().map(Zeroizing::new)
}

/// Config file (or the default location) overlaid with command-line values.
pub fn load_bridge_config(
    path: Option<&Path>,
    overrides: ConfigOverrides,
) -> ConfigResult<BridgeConfig> {
    let raw = load_raw_config(path)?.merge(overrides.into_raw());
    BridgeConfig::from_raw(raw)
}

fn bridge_identity(
    config: &BridgeConfig,
    env_seed: Option<&str>,
) -> ConfigResult<(BridgeIdentity, SeedSource)> {
    resolve_identity(config.seed.as_deref(), env_seed, config.require_seed)
}

pub fn cmd_start(config_path: Option<&Path>, overrides: ConfigOverrides) {
    let config = load_bridge_config(config_path, overrides).unwrap_or_else(|e| fail(e));
    let env_seed = env_seed();
    let (identity, source) =
        bridge_identity(&config, env_seed.as_deref().map(String::as_str)).unwrap_or_else(|e| fail(e));
    info!(bridge = %identity.address(), seed_source = %source, "Bridge identity ready");

    let rt = tokio::runtime::Runtime::new()
        .unwrap_or_else(|e| fail(format!("failed to start async runtime: {e}")));
    let result = rt.block_on(run_bridge(
        config,
        Arc::new(identity),
        agentlink_api::shutdown_signal(),
    ));
    if let Err(e) = result {
        fail(e);
    }
}

/// Validation report for `agentlink check`. Mirrors `{success, error?}`.
pub fn check_report(
    config_path: Option<&Path>,
    overrides: ConfigOverrides,
    env_seed: Option<&str>,
) -> Value {
    let checked = load_bridge_config(config_path, overrides).and_then(|config| {
        let (identity, source) = bridge_identity(&config, env_seed)?;
        Ok((config, identity, source))
    });
    let (config, identity, source) = match checked {
        Ok(parts) => parts,
        Err(e) => return failure(&e),
    };

    let base_url = config.rpc_base_url();
    let card = build_agent_card(&config, &base_url);
    json!({
        "success": true,
        "agent_address": config.target_agent_address,
        "bridge_address": identity.address(),
        "seed_source": source.to_string(),
        "rpc_url": format!("{base_url}/"),
        "messaging_port": config.messaging_port,
        "agent_card": card,
    })
}

fn failure(err: &ConfigError) -> Value {
    json!({"success": false, "error": err.to_string()})
}

pub fn cmd_check(config_path: Option<&Path>, overrides: ConfigOverrides, as_json: bool) {
    let env_seed = env_seed();
    let report = check_report(
        config_path,
        overrides,
        env_seed.as_deref().map(String::as_str),
    );
    let success = report["success"].as_bool().unwrap_or(false);

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_else(|_| report.to_string())
        );
    } else if success {
        println!("Configuration OK");
        println!("  target agent:   {}", report["agent_address"].as_str().unwrap_or(""));
        println!(
            "  bridge address: {} (seed: {})",
            report["bridge_address"].as_str().unwrap_or(""),
            report["seed_source"].as_str().unwrap_or("")
        );
        println!("  rpc endpoint:   {}", report["rpc_url"].as_str().unwrap_or(""));
        println!("  messaging port: {}", report["messaging_port"]);
        println!(
            "  agent card:     {}",
            report["agent_card"]["name"].as_str().unwrap_or("")
        );
    } else {
        eprintln!("error: {}", report["error"].as_str().unwrap_or("invalid configuration"));
    }

    if !success {
        std::process::exit(1);
    }
}

pub fn cmd_identity(seed: Option<String>) {
    let seed = seed
        .map(Zeroizing::new)
        .or_else(env_seed)
        .unwrap_or_else(|| fail(format!("no seed given (use --seed or set {SEED_ENV_VAR})")));
    match BridgeIdentity::from_seed(&seed) {
        Ok(identity) => println!("{}", identity.address()),
        Err(e) => fail(e),
    }
}
