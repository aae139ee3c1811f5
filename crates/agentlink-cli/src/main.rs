//! agentlink CLI: run and inspect a JSON-RPC bridge to a network agent.

mod cli;
mod cmd;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Start { overrides } => cmd::cmd_start(config, overrides),
        Commands::Check { overrides, json } => cmd::cmd_check(config, overrides, json),
        Commands::Identity { seed } => cmd::cmd_identity(seed),
    }
}
