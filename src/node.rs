//! Supervisor core.
//!
//! Runs the pipeline as a sequence of sessions. A session launches every
//! role, multiplexes their output, and ends when any process dies or a
//! stop is requested. Death tears the remainder down softly and the next
//! session starts; a stop escalates hard and the supervisor exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::command::RoleCommands;
use crate::config::StakerConfig;
use crate::detector::FatalLogDetector;
use crate::environment::Environment;
use crate::escalate::Escalator;
use crate::mux::LogMux;
use crate::paths::NodePaths;
use crate::process::{self, ManagedProcess};
use crate::relay::Booster;
use crate::snapshot::{BackupToken, SnapshotManager};
use crate::tunnel::{self, IpProbe, TunnelOutcome};

/// Readiness poll timeout. Bounds how long a stop request can go
/// unnoticed while every child is silent.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// One launch-to-teardown span of the pipeline.
pub struct Session {
    pub processes: Vec<ManagedProcess>,
    backup_token: BackupToken,
    soft_interrupt_sent: bool,
}

impl Session {
    fn new(processes: Vec<ManagedProcess>, backup_token: BackupToken) -> Self {
        Self {
            processes,
            backup_token,
            soft_interrupt_sent: false,
        }
    }

    /// One-shot guard for the session's soft interrupt. True exactly once.
    fn mark_soft_interrupt(&mut self) -> bool {
        if self.soft_interrupt_sent {
            return false;
        }
        self.soft_interrupt_sent = true;
        true
    }
}

enum SessionExit {
    /// At least one process reached a terminal state.
    Death,
    /// The external stop flag was raised.
    Stop,
}

pub struct Node {
    env: Box<dyn Environment>,
    snapshot: Box<dyn SnapshotManager>,
    booster: Box<dyn Booster>,
    probe: Box<dyn IpProbe>,
    config: StakerConfig,
    paths: NodePaths,
    mux: LogMux,
    detector: FatalLogDetector,
    escalator: Escalator,
    kill_in_progress: bool,
    terminating: bool,
    stop: Arc<AtomicBool>,
}

impl Node {
    pub fn new(
        env: Box<dyn Environment>,
        snapshot: Box<dyn SnapshotManager>,
        booster: Box<dyn Booster>,
        probe: Box<dyn IpProbe>,
        config: StakerConfig,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let paths = NodePaths::resolve(
            &env.data_prefix(),
            config.docker,
            config.network.is_dev(),
        );
        let mux = LogMux::new(&env.logs_path(), env.use_colored_logs())?;
        let escalator = Escalator::new(Duration::from_secs(config.kill_time_secs));
        Ok(Self {
            env,
            snapshot,
            booster,
            probe,
            config,
            paths,
            mux,
            detector: FatalLogDetector::new(),
            escalator,
            kill_in_progress: false,
            terminating: false,
            stop,
        })
    }

    /// Supervise until stopped or the instance lifecycle requests
    /// termination. Each loop turn is one session.
    pub fn run(&mut self) -> Result<()> {
        info!("Supervising {} pipeline", self.config.network.label());
        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!("Node stopped");
                self.finalize_drain();
                return Ok(());
            }
            if self.env.should_manage_snapshots() && self.snapshot.update()? {
                self.terminating = true;
                info!("Termination requested, draining");
                self.snapshot.terminate()?;
                return Ok(());
            }

            let mut session = self.start_session()?;
            match self.session_loop(&mut session)? {
                SessionExit::Death => {
                    info!("Process death, restarting session");
                    self.escalator.escalate(
                        &mut session.processes,
                        false,
                        self.kill_in_progress,
                    );
                    self.mux.squeeze_logs(&mut session.processes);
                }
                SessionExit::Stop => {
                    self.stop_session(&mut session);
                    return Ok(());
                }
            }
        }
    }

    /// Launch everything for one session. All role commands are built and
    /// validated before the first spawn, so a configuration failure leaves
    /// nothing running.
    fn start_session(&mut self) -> Result<Session> {
        let backup_token = self.snapshot.backup()?;
        let relays = self.booster.get_relays()?;

        let mut processes = Vec::new();
        if self.config.vpn.enabled {
            match tunnel::connect(&self.config.vpn, self.probe.as_ref(), &self.stop)? {
                TunnelOutcome::Connected(proc) => processes.push(proc),
                TunnelOutcome::Failed => {
                    warn!("tunnel never came up, continuing without it");
                }
                // The session loop observes the stop flag on its first
                // turn and runs the stop sequence with nothing launched.
                TunnelOutcome::Stopped => {
                    return Ok(Session::new(processes, backup_token));
                }
            }
        }

        let dns = self.env.p2p_host_dns(self.config.network.is_dev());
        let commands =
            RoleCommands::new(&self.config, &self.paths, dns, &relays).build_all()?;
        for (role, cmd) in commands {
            processes.push(ManagedProcess::spawn(role, &cmd)?);
        }
        Ok(Session::new(processes, backup_token))
    }

    fn session_loop(&mut self, session: &mut Session) -> Result<SessionExit> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(SessionExit::Stop);
            }

            let ready = self.mux.wait_readable(&session.processes, POLL_TIMEOUT)?;

            if self.env.should_manage_snapshots()
                && self
                    .snapshot
                    .is_older_than(&session.backup_token, self.config.snapshot_days)
                && session.mark_soft_interrupt()
            {
                info!("Pausing node to initiate snapshot.");
                self.escalator
                    .interrupt(&session.processes, false, self.kill_in_progress);
            }

            let records = self.mux.stream_logs(&mut session.processes, &ready)?;
            if self.detector.scan(&records) && session.mark_soft_interrupt() {
                self.escalator
                    .interrupt(&session.processes, false, self.kill_in_progress);
            }

            if process::any_dead(&mut session.processes) {
                return Ok(SessionExit::Death);
            }
        }
    }

    /// Hard stop: escalate, drain trailing output, and finalize the
    /// snapshot state when the host is being decommissioned.
    fn stop_session(&mut self, session: &mut Session) {
        self.kill_in_progress = true;
        self.escalator
            .escalate(&mut session.processes, true, self.kill_in_progress);
        self.mux.squeeze_logs(&mut session.processes);
        info!("Node stopped");
        self.finalize_drain();
    }

    /// Final snapshot bookkeeping for a decommissioning host. Runs on
    /// every stop path, including a stop observed between sessions.
    fn finalize_drain(&mut self) {
        if self.env.should_manage_snapshots()
            && self.snapshot.instance_is_draining()
            && !self.terminating
        {
            if let Err(err) = self.snapshot.force_create() {
                warn!(error = %err, "failed to snapshot on drain");
            }
            if let Err(err) = self.snapshot.update() {
                warn!(error = %err, "failed to reconcile snapshot state on drain");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Role;
    use crate::relay::StaticBooster;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    struct FakeEnv {
        logs: PathBuf,
        manage: bool,
    }

    impl Environment for FakeEnv {
        fn logs_path(&self) -> PathBuf {
            self.logs.clone()
        }

        fn data_prefix(&self) -> PathBuf {
            self.logs.parent().unwrap().to_path_buf()
        }

        fn p2p_host_dns(&self, _is_dev: bool) -> Option<String> {
            None
        }

        fn use_colored_logs(&self) -> bool {
            false
        }

        fn should_manage_snapshots(&self) -> bool {
            self.manage
        }
    }

    #[derive(Default)]
    struct SnapshotCalls {
        terminated: AtomicBool,
        force_created: AtomicBool,
        updates: AtomicUsize,
    }

    struct FakeSnapshot {
        calls: Arc<SnapshotCalls>,
        terminate_requested: bool,
        stale: bool,
        draining: bool,
    }

    impl SnapshotManager for FakeSnapshot {
        fn backup(&self) -> Result<BackupToken> {
            Ok(BackupToken::new("fake"))
        }

        fn is_older_than(&self, _token: &BackupToken, _days: u32) -> bool {
            self.stale
        }

        fn update(&self) -> Result<bool> {
            self.calls.updates.fetch_add(1, Ordering::SeqCst);
            Ok(self.terminate_requested)
        }

        fn terminate(&self) -> Result<()> {
            self.calls.terminated.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn force_create(&self) -> Result<()> {
            self.calls.force_created.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn instance_is_draining(&self) -> bool {
            self.draining
        }
    }

    struct FixedProbe;

    impl IpProbe for FixedProbe {
        fn current_ip(&self) -> Result<String> {
            Ok("1.1.1.1".to_string())
        }
    }

    struct Fixture {
        node: Node,
        calls: Arc<SnapshotCalls>,
        stop: Arc<AtomicBool>,
        _tmp: tempfile::TempDir,
    }

    fn fixture(manage: bool, build: impl FnOnce(Arc<SnapshotCalls>) -> FakeSnapshot) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let calls = Arc::new(SnapshotCalls::default());
        let stop = Arc::new(AtomicBool::new(false));
        let config = StakerConfig {
            kill_time_secs: 2,
            ..StakerConfig::default()
        };
        let node = Node::new(
            Box::new(FakeEnv {
                logs: tmp.path().join("logs.txt"),
                manage,
            }),
            Box::new(build(Arc::clone(&calls))),
            Box::new(StaticBooster::new(Vec::new())),
            Box::new(FixedProbe),
            config,
            Arc::clone(&stop),
        )
        .unwrap();
        Fixture {
            node,
            calls,
            stop,
            _tmp: tmp,
        }
    }

    fn plain_snapshot(calls: Arc<SnapshotCalls>) -> FakeSnapshot {
        FakeSnapshot {
            calls,
            terminate_requested: false,
            stale: false,
            draining: false,
        }
    }

    fn session_of(cmds: &[&str]) -> Session {
        let processes = cmds
            .iter()
            .map(|script| {
                ManagedProcess::spawn(
                    Role::Execution,
                    &["sh".to_string(), "-c".to_string(), script.to_string()],
                )
                .unwrap()
            })
            .collect();
        Session::new(processes, BackupToken::new("fake"))
    }

    #[test]
    fn soft_interrupt_guard_is_one_shot() {
        let mut session = Session::new(Vec::new(), BackupToken::new("t"));
        assert!(session.mark_soft_interrupt());
        assert!(!session.mark_soft_interrupt());
        assert!(!session.mark_soft_interrupt());
    }

    #[test]
    fn stop_flag_set_before_run_exits_without_launching() {
        let mut fx = fixture(false, plain_snapshot);
        fx.stop.store(true, Ordering::SeqCst);

        fx.node.run().unwrap();
        assert_eq!(fx.calls.updates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn termination_request_drains_before_any_launch() {
        let mut fx = fixture(true, |calls| FakeSnapshot {
            calls,
            terminate_requested: true,
            stale: false,
            draining: true,
        });

        fx.node.run().unwrap();
        assert!(fx.calls.terminated.load(Ordering::SeqCst));
        // The drain finalization is the terminate path's job, not stop's.
        assert!(!fx.calls.force_created.load(Ordering::SeqCst));
    }

    #[test]
    fn session_loop_reports_death_of_one_process() {
        let mut fx = fixture(false, plain_snapshot);
        let mut session = session_of(&["sleep 30", "true"]);

        match fx.node.session_loop(&mut session).unwrap() {
            SessionExit::Death => {}
            SessionExit::Stop => panic!("expected death exit"),
        }

        for proc in &mut session.processes {
            let _ = proc.kill_and_reap();
        }
    }

    #[test]
    fn session_loop_honors_stop_flag() {
        let mut fx = fixture(false, plain_snapshot);
        let mut session = session_of(&["sleep 30"]);
        fx.stop.store(true, Ordering::SeqCst);

        match fx.node.session_loop(&mut session).unwrap() {
            SessionExit::Stop => {}
            SessionExit::Death => panic!("expected stop exit"),
        }

        fx.node.stop_session(&mut session);
        assert!(process::all_dead(&mut session.processes));
    }

    #[test]
    fn fatal_line_interrupts_and_session_ends_in_death() {
        let mut fx = fixture(false, plain_snapshot);
        let mut session =
            session_of(&["echo 'ERROR Beacon backfilling failed'; sleep 30"]);

        match fx.node.session_loop(&mut session).unwrap() {
            SessionExit::Death => {}
            SessionExit::Stop => panic!("expected death exit"),
        }
        assert!(session.soft_interrupt_sent);

        for proc in &mut session.processes {
            let _ = proc.kill_and_reap();
        }
    }

    #[test]
    fn stale_backup_interrupts_once() {
        let mut fx = fixture(true, |calls| FakeSnapshot {
            calls,
            terminate_requested: false,
            stale: true,
            draining: false,
        });
        let mut session = session_of(&["sleep 30"]);

        match fx.node.session_loop(&mut session).unwrap() {
            SessionExit::Death => {}
            SessionExit::Stop => panic!("expected death exit"),
        }
        assert!(session.soft_interrupt_sent);

        for proc in &mut session.processes {
            let _ = proc.kill_and_reap();
        }
    }

    #[test]
    fn stop_between_sessions_on_draining_host_takes_final_snapshot() {
        let mut fx = fixture(true, |calls| FakeSnapshot {
            calls,
            terminate_requested: false,
            stale: false,
            draining: true,
        });
        fx.stop.store(true, Ordering::SeqCst);

        fx.node.run().unwrap();
        assert!(fx.calls.force_created.load(Ordering::SeqCst));
        assert_eq!(fx.calls.updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_on_draining_host_takes_final_snapshot() {
        let mut fx = fixture(true, |calls| FakeSnapshot {
            calls,
            terminate_requested: false,
            stale: false,
            draining: true,
        });
        let mut session = session_of(&["sleep 30"]);

        fx.node.stop_session(&mut session);
        assert!(fx.calls.force_created.load(Ordering::SeqCst));
        assert_eq!(fx.calls.updates.load(Ordering::SeqCst), 1);
        assert!(process::all_dead(&mut session.processes));
    }
}
