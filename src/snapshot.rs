//! Snapshot subsystem interface.
//!
//! The supervisor only coordinates with the snapshot lifecycle — pausing
//! the pipeline so a consistent snapshot can be taken, and draining before
//! instance termination. The EBS-backed implementation lives outside this
//! crate and plugs in behind `SnapshotManager`.

use anyhow::Result;

/// Opaque handle to the most recent backup, issued at session start and
/// used for staleness checks for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupToken(String);

impl BackupToken {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

pub trait SnapshotManager {
    /// Take (or adopt) a backup and return its token.
    fn backup(&self) -> Result<BackupToken>;

    /// Whether the backup behind `token` is older than `days`.
    fn is_older_than(&self, token: &BackupToken, days: u32) -> bool;

    /// Reconcile snapshot state with the instance lifecycle. Returns true
    /// when the lifecycle has requested termination of this host.
    fn update(&self) -> Result<bool>;

    /// Acknowledge a termination request. Blocks until the external
    /// lifecycle confirms completion.
    fn terminate(&self) -> Result<()>;

    /// Take an out-of-band snapshot regardless of staleness.
    fn force_create(&self) -> Result<()>;

    /// Whether the host is being decommissioned.
    fn instance_is_draining(&self) -> bool;
}

/// Used wherever snapshots are not managed: every check reports fresh,
/// nothing is ever taken.
pub struct NoOpSnapshotManager;

impl SnapshotManager for NoOpSnapshotManager {
    fn backup(&self) -> Result<BackupToken> {
        Ok(BackupToken::new("unmanaged"))
    }

    fn is_older_than(&self, _token: &BackupToken, _days: u32) -> bool {
        false
    }

    fn update(&self) -> Result<bool> {
        Ok(false)
    }

    fn terminate(&self) -> Result<()> {
        Ok(())
    }

    fn force_create(&self) -> Result<()> {
        Ok(())
    }

    fn instance_is_draining(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_manager_never_goes_stale_or_terminates() {
        let manager = NoOpSnapshotManager;
        let token = manager.backup().unwrap();
        assert!(!manager.is_older_than(&token, 0));
        assert!(!manager.update().unwrap());
        assert!(!manager.instance_is_draining());
    }

    #[test]
    fn backup_token_is_an_opaque_id() {
        let token = BackupToken::new("snap-0123");
        assert_eq!(token.id(), "snap-0123");
        assert_eq!(token, BackupToken::new("snap-0123"));
    }
}
