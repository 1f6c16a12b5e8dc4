//! Three-tier shutdown signaling.
//!
//! interrupt → terminate → kill, with a bounded liveness wait between
//! tiers. Soft escalations stand down once an external hard stop has
//! begun (`kill_in_progress`); hard escalations always send. A signal
//! that fails because the target already exited is logged and the rest
//! of the set is still signaled.

use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{info, warn};

use crate::process::{self, ManagedProcess};

pub struct Escalator {
    kill_time: Duration,
}

impl Escalator {
    /// `kill_time` bounds the wait between escalation tiers.
    pub fn new(kill_time: Duration) -> Self {
        Self { kill_time }
    }

    pub fn interrupt(&self, processes: &[ManagedProcess], hard: bool, kill_in_progress: bool) {
        self.signal_all(processes, Signal::SIGINT, "Interrupting", hard, kill_in_progress);
    }

    pub fn terminate(&self, processes: &[ManagedProcess], hard: bool, kill_in_progress: bool) {
        self.signal_all(processes, Signal::SIGTERM, "Terminating", hard, kill_in_progress);
    }

    pub fn kill(&self, processes: &[ManagedProcess], hard: bool, kill_in_progress: bool) {
        self.signal_all(processes, Signal::SIGKILL, "Killing", hard, kill_in_progress);
    }

    fn signal_all(
        &self,
        processes: &[ManagedProcess],
        sig: Signal,
        label: &str,
        hard: bool,
        kill_in_progress: bool,
    ) {
        if !hard && kill_in_progress {
            return;
        }
        info!(
            "{label} all processes... [{}]",
            if hard { "HARD" } else { "SOFT" }
        );
        for proc in processes {
            let pid = Pid::from_raw(proc.pid() as i32);
            if let Err(err) = signal::kill(pid, sig) {
                warn!(role = ?proc.role, %pid, error = %err, "failed to signal process");
            }
        }
    }

    /// Run the full escalation ladder until every process is dead or all
    /// three tiers have been sent.
    pub fn escalate(&self, processes: &mut [ManagedProcess], hard: bool, kill_in_progress: bool) {
        self.interrupt(processes, hard, kill_in_progress);
        if !self.wait_for_exit(processes) {
            self.terminate(processes, hard, kill_in_progress);
        }
        if !self.wait_for_exit(processes) {
            self.kill(processes, hard, kill_in_progress);
        }
    }

    /// Poll liveness once per second up to the kill-time bound.
    fn wait_for_exit(&self, processes: &mut [ManagedProcess]) -> bool {
        let start = Instant::now();
        while !process::all_dead(processes) && start.elapsed() < self.kill_time {
            std::thread::sleep(Duration::from_secs(1));
        }
        process::all_dead(processes)
    }
}
