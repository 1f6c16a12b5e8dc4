//! Supervised child processes.
//!
//! Each child writes stdout and stderr into one manually created pipe so
//! the multiplexer sees a single line stream per process (the execution
//! client logs exclusively to stderr).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::os::fd::{AsFd, BorrowedFd};
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result};
use tracing::info;

use crate::command::Role;

pub struct ManagedProcess {
    pub role: Role,
    pub prefix: &'static str,
    child: Child,
    reader: BufReader<File>,
}

impl ManagedProcess {
    /// Launch `cmd` (binary followed by its arguments) with stdout and
    /// stderr merged into a single owned pipe.
    pub fn spawn(role: Role, cmd: &[String]) -> Result<Self> {
        let (program, args) = cmd
            .split_first()
            .context("role command must not be empty")?;
        info!("Running cmd: {}", cmd.join(" "));

        let (read_end, write_end) =
            nix::unistd::pipe().context("failed to create output pipe")?;
        let stderr_end = write_end
            .try_clone()
            .context("failed to clone output pipe")?;

        let child = Command::new(program)
            .args(args)
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(stderr_end))
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        Ok(Self {
            role,
            prefix: role.prefix(),
            child,
            reader: BufReader::new(File::from(read_end)),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Terminal exit observed. `try_wait` reaps the child on first success.
    pub fn is_dead(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// SIGKILL and reap. Used when a tunnel attempt is discarded.
    pub fn kill_and_reap(&mut self) -> Result<()> {
        self.child.kill().context("failed to kill process")?;
        self.child.wait().context("failed to reap process")?;
        Ok(())
    }

    /// Lines already sitting in the reader's buffer count as readable
    /// without another readiness poll.
    pub fn has_buffered(&self) -> bool {
        !self.reader.buffer().is_empty()
    }

    pub fn stream_fd(&self) -> BorrowedFd<'_> {
        self.reader.get_ref().as_fd()
    }

    /// Read one raw line. `None` means end of stream.
    pub fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}

/// Quantified liveness over a set of processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub any_dead: bool,
    pub all_dead: bool,
}

/// Pure summary over per-process terminal states.
pub fn liveness_summary(dead: &[bool]) -> Liveness {
    Liveness {
        any_dead: dead.iter().any(|d| *d),
        all_dead: dead.iter().all(|d| *d),
    }
}

pub fn any_dead(processes: &mut [ManagedProcess]) -> bool {
    let states: Vec<bool> = processes.iter_mut().map(ManagedProcess::is_dead).collect();
    liveness_summary(&states).any_dead
}

pub fn all_dead(processes: &mut [ManagedProcess]) -> bool {
    let states: Vec<bool> = processes.iter_mut().map(ManagedProcess::is_dead).collect();
    liveness_summary(&states).all_dead
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn spawn_sleep(secs: u32) -> ManagedProcess {
        ManagedProcess::spawn(
            Role::Execution,
            &["sleep".to_string(), secs.to_string()],
        )
        .unwrap()
    }

    fn spawn_exited() -> ManagedProcess {
        let mut proc =
            ManagedProcess::spawn(Role::Consensus, &["true".to_string()]).unwrap();
        // Wait for the exit to become observable.
        while !proc.is_dead() {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        proc
    }

    #[test]
    fn all_running_reports_no_death() {
        let mut procs: Vec<ManagedProcess> = (0..4).map(|_| spawn_sleep(10)).collect();

        assert!(!any_dead(&mut procs));
        assert!(!all_dead(&mut procs));

        for proc in &mut procs {
            proc.kill_and_reap().unwrap();
        }
    }

    #[test]
    fn one_exited_reports_any_but_not_all() {
        let mut procs = vec![spawn_sleep(10), spawn_sleep(10), spawn_sleep(10)];
        procs.push(spawn_exited());

        assert!(any_dead(&mut procs));
        assert!(!all_dead(&mut procs));

        for proc in &mut procs {
            let _ = proc.kill_and_reap();
        }
    }

    #[test]
    fn reads_merged_output_lines() {
        let mut proc = ManagedProcess::spawn(
            Role::Execution,
            &[
                "sh".to_string(),
                "-c".to_string(),
                "echo out; echo err >&2".to_string(),
            ],
        )
        .unwrap();

        let first = proc.read_line().unwrap().unwrap();
        let second = proc.read_line().unwrap().unwrap();
        let mut lines = vec![first.trim().to_string(), second.trim().to_string()];
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);

        // Stream ends once the child exits and the write ends close.
        assert!(proc.read_line().unwrap().is_none());
    }

    #[test]
    fn read_line_none_at_end_of_stream() {
        let mut proc = spawn_exited();
        assert!(proc.read_line().unwrap().is_none());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(ManagedProcess::spawn(Role::Execution, &[]).is_err());
    }

    proptest! {
        #[test]
        fn liveness_summary_matches_quantifiers(
            states in proptest::collection::vec(any::<bool>(), 0..12)
        ) {
            let summary = liveness_summary(&states);
            prop_assert_eq!(summary.any_dead, states.iter().any(|d| *d));
            prop_assert_eq!(summary.all_dead, states.iter().all(|d| *d));
        }
    }
}
