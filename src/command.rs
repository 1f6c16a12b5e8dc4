//! Role command builder.
//!
//! Pure mapping from a process role plus static configuration to the
//! argument vector for that role's binary. Discovery globs (checkpoint
//! files) are validated here, before anything is launched, so a missing
//! file surfaces as a `ConfigError` instead of a child crash mid-session.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::StakerConfig;
use crate::paths::NodePaths;

/// The functional kind of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Execution,
    Consensus,
    Validation,
    MevBoost,
    Tunnel,
}

impl Role {
    /// Display prefix every multiplexed log line from this role carries.
    pub fn prefix(self) -> &'static str {
        match self {
            Role::Execution => "<<< EXECUTION >>>",
            Role::Consensus => "[[[ CONSENSUS ]]]",
            Role::Validation => "(( _VALIDATION ))",
            Role::MevBoost => "+++ MEV_BOOST +++",
            Role::Tunnel => "xxx OPENVPN__ xxx",
        }
    }

    pub fn binary(self) -> &'static str {
        match self {
            Role::Execution => "geth",
            Role::Consensus => "beacon-chain",
            Role::Validation => "validator",
            Role::MevBoost => "mev-boost",
            Role::Tunnel => "openvpn",
        }
    }
}

/// Pre-launch configuration failures. These abort session start; nothing
/// is partially launched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no files match {pattern}")]
    NoMatch { pattern: String },
    #[error("invalid glob pattern {pattern}")]
    BadPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// First filesystem match for `pattern`, or a `ConfigError` when the
/// pattern is malformed or matches nothing.
pub fn discover_one(pattern: &str) -> Result<PathBuf, ConfigError> {
    let mut matches = glob::glob(pattern).map_err(|source| ConfigError::BadPattern {
        pattern: pattern.to_string(),
        source,
    })?;
    matches
        .find_map(|entry| entry.ok())
        .ok_or_else(|| ConfigError::NoMatch {
            pattern: pattern.to_string(),
        })
}

/// Argument builder for the four fixed pipeline roles.
pub struct RoleCommands<'a> {
    config: &'a StakerConfig,
    paths: &'a NodePaths,
    p2p_host_dns: Option<String>,
    relays: &'a [String],
}

impl<'a> RoleCommands<'a> {
    pub fn new(
        config: &'a StakerConfig,
        paths: &'a NodePaths,
        p2p_host_dns: Option<String>,
        relays: &'a [String],
    ) -> Self {
        Self {
            config,
            paths,
            p2p_host_dns,
            relays,
        }
    }

    pub fn execution(&self) -> Vec<String> {
        let mut cmd = vec![
            Role::Execution.binary().to_string(),
            "--http".to_string(),
            "--http.api".to_string(),
            "eth,net,engine,admin".to_string(),
            "--state.scheme=path".to_string(),
            self.config.network.client_flag().to_string(),
        ];
        if self.config.docker {
            cmd.push(format!(
                "--datadir={}",
                self.paths.geth_data_dir.display()
            ));
        }
        cmd
    }

    pub fn consensus(&self) -> Result<Vec<String>, ConfigError> {
        let mut cmd = vec![
            Role::Consensus.binary().to_string(),
            "--accept-terms-of-use".to_string(),
            format!("--execution-endpoint={}", self.paths.ipc_path.display()),
            format!("--suggested-fee-recipient={}", self.config.fee_recipient),
            "--blob-storage-layout=by-epoch".to_string(),
            // alternatively http://127.0.0.1:18550
            "--http-mev-relay=http://localhost:18550".to_string(),
            "--enable-backfill".to_string(),
            self.config.network.client_flag().to_string(),
        ];

        let consensus_dir = self.config.consensus_dir.display();
        if self.config.network.is_dev() {
            cmd.push(format!("--genesis-state={consensus_dir}/genesis.ssz"));
        }
        if self.config.docker {
            cmd.push(format!(
                "--datadir={}",
                self.paths.prysm_data_dir.display()
            ));
        }
        if let Some(dns) = &self.p2p_host_dns {
            cmd.push(format!("--p2p-host-dns={dns}"));
        }

        let state = discover_one(&format!("{consensus_dir}/state*.ssz"))?;
        let block = discover_one(&format!("{consensus_dir}/block*.ssz"))?;
        cmd.push(format!("--checkpoint-state={}", state.display()));
        cmd.push(format!("--checkpoint-block={}", block.display()));
        cmd.push("--checkpoint-sync-url=https://sync-mainnet.beaconcha.in".to_string());
        cmd.push("--genesis-beacon-api-url=https://sync-mainnet.beaconcha.in".to_string());
        Ok(cmd)
    }

    pub fn validation(&self) -> Vec<String> {
        let wallet = self.paths.prysm_wallet_dir.display();
        vec![
            Role::Validation.binary().to_string(),
            "--accept-terms-of-use".to_string(),
            "--enable-builder".to_string(),
            format!("--wallet-dir={wallet}"),
            format!("--suggested-fee-recipient={}", self.config.fee_recipient),
            format!("--wallet-password-file={wallet}/password.txt"),
            self.config.network.client_flag().to_string(),
        ]
    }

    pub fn mev_boost(&self) -> Vec<String> {
        vec![
            Role::MevBoost.binary().to_string(),
            "-relay-check".to_string(),
            self.config.network.boost_flag().to_string(),
            "-relays".to_string(),
            self.relays.join(","),
        ]
    }

    /// Build all four role commands in launch order, validating every
    /// discovery glob before the caller spawns anything.
    pub fn build_all(&self) -> Result<Vec<(Role, Vec<String>)>, ConfigError> {
        Ok(vec![
            (Role::Execution, self.execution()),
            (Role::Consensus, self.consensus()?),
            (Role::Validation, self.validation()),
            (Role::MevBoost, self.mev_boost()),
        ])
    }
}
