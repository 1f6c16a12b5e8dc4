//! Runtime environment abstraction.
//!
//! Separates where the process runs (AWS container vs local machine) from
//! which network it runs against. Everything the supervisor needs from the
//! host — log path, data prefix, DNS, color preference, whether snapshots
//! are managed — comes through this trait.

use std::path::PathBuf;

use crate::config::StakerConfig;

pub trait Environment {
    /// Path of the persistent log file.
    fn logs_path(&self) -> PathBuf;

    /// Base directory for client data dirs in containerized deployments.
    fn data_prefix(&self) -> PathBuf;

    /// P2P host DNS advertised by the consensus client, if applicable.
    fn p2p_host_dns(&self, is_dev: bool) -> Option<String>;

    fn use_colored_logs(&self) -> bool;

    fn should_manage_snapshots(&self) -> bool;
}

/// AWS ECS container deployment: data and logs live on the EBS mount,
/// output goes to plain-text collection, snapshots are managed.
pub struct AwsEnvironment;

impl Environment for AwsEnvironment {
    fn logs_path(&self) -> PathBuf {
        PathBuf::from("/mnt/ebs/logs.txt")
    }

    fn data_prefix(&self) -> PathBuf {
        PathBuf::from("/mnt/ebs")
    }

    fn p2p_host_dns(&self, is_dev: bool) -> Option<String> {
        let dev = if is_dev { "dev." } else { "" };
        Some(format!("aws.{dev}eth.forcepu.sh"))
    }

    fn use_colored_logs(&self) -> bool {
        false
    }

    fn should_manage_snapshots(&self) -> bool {
        true
    }
}

/// Local development machine.
pub struct LocalEnvironment;

impl Environment for LocalEnvironment {
    fn logs_path(&self) -> PathBuf {
        PathBuf::from("/mnt/ebs/ethereum/logs.txt")
    }

    fn data_prefix(&self) -> PathBuf {
        crate::paths::home_dir()
    }

    fn p2p_host_dns(&self, _is_dev: bool) -> Option<String> {
        None
    }

    fn use_colored_logs(&self) -> bool {
        true
    }

    fn should_manage_snapshots(&self) -> bool {
        false
    }
}

/// Pick the environment for a loaded configuration.
pub fn for_config(config: &StakerConfig) -> Box<dyn Environment> {
    if config.aws {
        Box::new(AwsEnvironment)
    } else {
        Box::new(LocalEnvironment)
    }
}
