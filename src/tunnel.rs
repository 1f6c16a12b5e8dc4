//! VPN tunnel bring-up.
//!
//! The tunnel is declared up only when the externally observed IP address
//! changes from its pre-tunnel value. Each attempt picks a random config
//! from the pool; an attempt that does not flip the IP within the timeout
//! is discarded and a fresh one starts.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::command::{ConfigError, Role};
use crate::config::VpnConfig;
use crate::process::ManagedProcess;

const IP_ECHO_URL: &str = "https://4.tnedi.me";
const CREDS_FILE: &str = "vpn_creds.txt";

/// Observes the host's external IP address.
pub trait IpProbe {
    fn current_ip(&self) -> Result<String>;
}

/// Probes a plaintext IP-echo endpoint over HTTPS.
pub struct HttpIpProbe {
    agent: ureq::Agent,
}

impl Default for HttpIpProbe {
    fn default() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(5))
                .build(),
        }
    }
}

impl IpProbe for HttpIpProbe {
    fn current_ip(&self) -> Result<String> {
        let body = self
            .agent
            .get(IP_ECHO_URL)
            .call()
            .context("ip echo request failed")?
            .into_string()
            .context("ip echo response was not text")?;
        Ok(body.trim().to_string())
    }
}

pub enum TunnelOutcome {
    Connected(ManagedProcess),
    /// The attempt cap was exhausted without an IP change.
    Failed,
    /// An external stop was requested while connecting.
    Stopped,
}

/// All configs matching the pool pattern. An empty pool is a
/// configuration error, not a retry condition.
fn config_pool(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|source| ConfigError::BadPattern {
            pattern: pattern.to_string(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .collect();
    if paths.is_empty() {
        return Err(ConfigError::NoMatch {
            pattern: pattern.to_string(),
        }
        .into());
    }
    Ok(paths)
}

/// Materialize the auth file openvpn reads. Credentials come from the
/// environment so they never land in the config repo.
fn write_creds_file() -> Result<PathBuf> {
    let user = std::env::var("VPN_USER").context("VPN_USER is not set")?;
    let pass = std::env::var("VPN_PASS").context("VPN_PASS is not set")?;
    std::fs::write(CREDS_FILE, format!("{user}\n{pass}\n"))
        .context("failed to write vpn credentials file")?;
    Ok(PathBuf::from(CREDS_FILE))
}

/// Sleep in short slices so a raised stop flag cuts the wait short.
/// Returns true when a stop was requested.
fn sleep_interrupted(total: Duration, stop: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(250);
    let mut slept = Duration::ZERO;
    while slept < total {
        if stop.load(Ordering::SeqCst) {
            return true;
        }
        let step = SLICE.min(total - slept);
        std::thread::sleep(step);
        slept += step;
    }
    stop.load(Ordering::SeqCst)
}

/// Poll the probe until the observed IP differs from `start_ip`, the
/// deadline passes, or a stop is requested. Probe failures count as
/// unchanged.
pub fn wait_for_ip_change(
    probe: &dyn IpProbe,
    start_ip: &str,
    timeout: Duration,
    stop: &AtomicBool,
) -> bool {
    let interval = timeout / 3;
    let mut elapsed = Duration::ZERO;
    while elapsed < timeout {
        info!("Waiting for VPN...");
        if sleep_interrupted(interval, stop) {
            return false;
        }
        elapsed += interval;
        match probe.current_ip() {
            Ok(ip) if ip != start_ip => return true,
            Ok(_) => {}
            Err(err) => warn!(error = %err, "ip probe failed, treating as unchanged"),
        }
    }
    false
}

/// Bring the tunnel up, retrying with a fresh random config until the IP
/// changes or the configured attempt cap runs out (no cap retries
/// forever). A raised stop flag ends the retry loop immediately.
pub fn connect(
    vpn: &VpnConfig,
    probe: &dyn IpProbe,
    stop: &AtomicBool,
) -> Result<TunnelOutcome> {
    // Config load rejects a zero timeout; the clamp keeps a hand-built
    // config from spinning through spawn/kill cycles with no wait.
    let timeout = Duration::from_secs(vpn.timeout_secs.max(1));
    let start_ip = probe
        .current_ip()
        .context("failed to observe pre-tunnel ip")?;
    info!("Current IP: {start_ip}");

    let mut attempts = 0u32;
    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(TunnelOutcome::Stopped);
        }
        if let Some(max) = vpn.max_attempts {
            if attempts >= max {
                return Ok(TunnelOutcome::Failed);
            }
        }
        attempts += 1;

        let pool = config_pool(&vpn.config_glob)?;
        let config = pool
            .choose(&mut rand::thread_rng())
            .cloned()
            .context("tunnel config pool is empty")?;
        let creds = write_creds_file()?;

        let cmd = vec![
            Role::Tunnel.binary().to_string(),
            "--config".to_string(),
            config.display().to_string(),
            "--auth-user-pass".to_string(),
            creds.display().to_string(),
        ];
        let mut proc = ManagedProcess::spawn(Role::Tunnel, &cmd)?;

        if wait_for_ip_change(probe, &start_ip, timeout, stop) {
            info!("VPN connected");
            return Ok(TunnelOutcome::Connected(proc));
        }

        info!("VPN attempt timed out after {}s, retrying", vpn.timeout_secs);
        if let Err(err) = proc.kill_and_reap() {
            warn!(error = %err, "failed to discard tunnel process");
        }
    }
}
