use std::path::{Path, PathBuf};

/// Home directory of the current user, falling back to the working
/// directory when `HOME` is unset.
pub fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolved on-disk layout for the client data directories.
///
/// The wallet dir is deliberately concatenated without a separator: prysm's
/// defaults are `~/Library/Eth2Validators` on macOS and `~/.eth2validators`
/// on Linux, i.e. the validators suffix glues onto the consensus dir name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePaths {
    pub geth_data_dir: PathBuf,
    pub prysm_data_dir: PathBuf,
    pub prysm_wallet_dir: PathBuf,
    pub ipc_path: PathBuf,
}

impl NodePaths {
    /// Resolve for the current platform.
    ///
    /// `env_prefix` is the environment's data prefix, used only in
    /// containerized deployments; otherwise the layout anchors at `$HOME`.
    pub fn resolve(env_prefix: &Path, docker: bool, is_dev: bool) -> Self {
        let prefix = if docker {
            env_prefix.to_path_buf()
        } else {
            home_dir()
        };
        Self::resolve_for(&prefix, is_dev, cfg!(target_os = "macos"))
    }

    pub fn resolve_for(prefix: &Path, is_dev: bool, on_mac: bool) -> Self {
        let prefix = prefix.display();
        let geth_base = if on_mac { "Library/Ethereum" } else { ".ethereum" };
        let prysm_base = if on_mac { "Library/Eth2" } else { ".eth2" };
        let wallet_postfix = if on_mac {
            "Validators/prysm-wallet-v2"
        } else {
            "validators/prysm-wallet-v2"
        };
        let geth_postfix = if is_dev { "/holesky" } else { "" };

        let geth_data_dir = format!("{prefix}/{geth_base}{geth_postfix}");
        let prysm_data_dir = format!("{prefix}/{prysm_base}");
        let prysm_wallet_dir = format!("{prysm_data_dir}{wallet_postfix}");
        let ipc_path = format!("{geth_data_dir}/geth.ipc");

        Self {
            geth_data_dir: PathBuf::from(geth_data_dir),
            prysm_data_dir: PathBuf::from(prysm_data_dir),
            prysm_wallet_dir: PathBuf::from(prysm_wallet_dir),
            ipc_path: PathBuf::from(ipc_path),
        }
    }
}
