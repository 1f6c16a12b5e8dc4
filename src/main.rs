use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use stakerd::cli::{Cli, Command};
use stakerd::config::StakerConfig;
use stakerd::environment;
use stakerd::node::Node;
use stakerd::relay::StaticBooster;
use stakerd::snapshot::NoOpSnapshotManager;
use stakerd::tunnel::HttpIpProbe;

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults — no stakerd.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<20} {value}\n"));
}

fn render_config_human(config: &StakerConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Node\n");
    push_kv(&mut output, "network", config.network.label());
    push_kv(&mut output, "docker", config.docker);
    push_kv(&mut output, "aws", config.aws);
    push_kv(&mut output, "fee_recipient", &config.fee_recipient);
    push_kv(&mut output, "kill_time_secs", config.kill_time_secs);
    push_kv(&mut output, "snapshot_days", config.snapshot_days);
    push_kv(&mut output, "consensus_dir", config.consensus_dir.display());
    output.push('\n');

    output.push_str("Relays\n");
    if config.relays.is_empty() {
        push_kv(&mut output, "entries", "(none)");
    } else {
        for relay in &config.relays {
            output.push_str(&format!("  - {relay}\n"));
        }
    }
    output.push('\n');

    output.push_str("Vpn\n");
    push_kv(&mut output, "enabled", config.vpn.enabled);
    push_kv(&mut output, "timeout_secs", config.vpn.timeout_secs);
    push_kv(&mut output, "config_glob", &config.vpn.config_glob);
    match config.vpn.max_attempts {
        Some(max) => push_kv(&mut output, "max_attempts", max),
        None => push_kv(&mut output, "max_attempts", "(unbounded)"),
    }
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

fn render_config_json(config: &StakerConfig, config_path: Option<&Path>) -> Result<String> {
    let payload = serde_json::json!({
        "node": {
            "network": config.network.label(),
            "docker": config.docker,
            "aws": config.aws,
            "fee_recipient": &config.fee_recipient,
            "kill_time_secs": config.kill_time_secs,
            "snapshot_days": config.snapshot_days,
            "consensus_dir": config.consensus_dir.display().to_string()
        },
        "relays": &config.relays,
        "vpn": {
            "enabled": config.vpn.enabled,
            "timeout_secs": config.vpn.timeout_secs,
            "config_glob": &config.vpn.config_glob,
            "max_attempts": config.vpn.max_attempts
        },
        "source_path": config_source_label(config_path)
    });

    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 if is_config_command => "stakerd=warn",
        0 => "stakerd=info",
        1 => "stakerd=debug",
        _ => "stakerd=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = StakerConfig::load(&cwd, cli.config.as_deref())?;

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no stakerd.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Run => {
            let stop = Arc::new(AtomicBool::new(false));
            let handler_stop = Arc::clone(&stop);
            // SIGINT and SIGTERM both land here; the handler only raises
            // the flag, teardown happens on the supervisor thread.
            ctrlc::set_handler(move || {
                handler_stop.store(true, Ordering::SeqCst);
            })
            .context("failed to install signal handler")?;

            let env = environment::for_config(&config);
            let booster = Box::new(StaticBooster::new(config.relays.clone()));
            let mut node = Node::new(
                env,
                Box::new(NoOpSnapshotManager),
                booster,
                Box::new(HttpIpProbe::default()),
                config,
                stop,
            )?;
            node.run()?;
        }
        Command::Config { json } => {
            if json {
                println!("{}", render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", render_config_human(&config, config_path.as_deref()));
            }
        }
    }

    Ok(())
}
