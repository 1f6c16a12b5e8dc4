use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_FILENAME: &str = "stakerd.toml";

/// Which chain the pipeline runs against.
#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    #[default]
    Mainnet,
    Holesky,
}

impl Network {
    /// Holesky is the dev/test network; mainnet is production.
    pub fn is_dev(self) -> bool {
        matches!(self, Network::Holesky)
    }

    /// Network selector flag for geth / beacon-chain / validator.
    pub fn client_flag(self) -> &'static str {
        match self {
            Network::Mainnet => "--mainnet",
            Network::Holesky => "--holesky",
        }
    }

    /// mev-boost uses single-dash flags.
    pub fn boost_flag(self) -> &'static str {
        match self {
            Network::Mainnet => "-mainnet",
            Network::Holesky => "-holesky",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Holesky => "holesky",
        }
    }
}

fn default_fee_recipient() -> String {
    "0x0000000000000000000000000000000000000000".to_string()
}

fn default_kill_time_secs() -> u64 {
    60
}

fn default_snapshot_days() -> u32 {
    3
}

fn default_consensus_dir() -> PathBuf {
    PathBuf::from("./consensus/prysm")
}

fn default_vpn_timeout_secs() -> u64 {
    60
}

fn default_vpn_config_glob() -> String {
    "config/us*.tcp.ovpn".to_string()
}

/// Optional VPN tunnel settings.
///
/// ```toml
/// [vpn]
/// enabled = true
/// timeout_secs = 90
/// config_glob = "config/us*.tcp.ovpn"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct VpnConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_vpn_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_vpn_config_glob")]
    pub config_glob: String,
    /// Retry cap for the connect loop. Absent means retry forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: default_vpn_timeout_secs(),
            config_glob: default_vpn_config_glob(),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StakerConfig {
    #[serde(default)]
    pub network: Network,
    /// Containerized deployment: data dirs live under the environment's
    /// data prefix instead of the user's home layout.
    #[serde(default)]
    pub docker: bool,
    /// Selects the AWS environment (and with it snapshot management).
    #[serde(default)]
    pub aws: bool,
    #[serde(default = "default_fee_recipient")]
    pub fee_recipient: String,
    /// Bounded wait between signal escalation tiers, in seconds.
    #[serde(default = "default_kill_time_secs")]
    pub kill_time_secs: u64,
    /// Backup staleness threshold: a backup older than this forces a pause.
    #[serde(default = "default_snapshot_days")]
    pub snapshot_days: u32,
    /// Directory holding the consensus client's checkpoint/genesis files.
    #[serde(default = "default_consensus_dir")]
    pub consensus_dir: PathBuf,
    /// Fallback relay set for mev-boost when no discovery source is wired.
    #[serde(default)]
    pub relays: Vec<String>,
    #[serde(default)]
    pub vpn: VpnConfig,
}

impl Default for StakerConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            docker: false,
            aws: false,
            fee_recipient: default_fee_recipient(),
            kill_time_secs: default_kill_time_secs(),
            snapshot_days: default_snapshot_days(),
            consensus_dir: default_consensus_dir(),
            relays: Vec::new(),
            vpn: VpnConfig::default(),
        }
    }
}

impl StakerConfig {
    /// Load the configuration.
    ///
    /// An explicit path must exist; otherwise `stakerd.toml` in `start` is
    /// used when present, and the defaults when it is not.
    pub fn load(start: &Path, explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let candidate = match explicit {
            Some(path) => {
                if !path.is_file() {
                    anyhow::bail!("config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => {
                let default = start.join(CONFIG_FILENAME);
                default.is_file().then_some(default)
            }
        };

        match candidate {
            Some(path) => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let config: StakerConfig = toml::from_str(&contents)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
                if config.vpn.timeout_secs == 0 {
                    anyhow::bail!(
                        "vpn.timeout_secs must be at least 1 in {}",
                        path.display()
                    );
                }
                Ok((config, Some(path)))
            }
            None => Ok((StakerConfig::default(), None)),
        }
    }
}
