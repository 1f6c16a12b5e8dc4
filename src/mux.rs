//! Log multiplexer.
//!
//! Blocks on readiness across all live child output streams, tags each
//! line with its role prefix, appends the plain form to the persistent
//! log file, and echoes a colorized form to the console when the
//! environment asks for it. Cross-stream interleaving follows OS
//! readiness; per-stream line order is preserved.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::warn;

use crate::process::ManagedProcess;

const RESET: &str = "\x1b[0m";

/// Token → ANSI style, applied only for colored console output. The file
/// always receives the plain form.
const STYLES: &[(&str, &str)] = &[
    ("OPENVPN", "\x1b[38;5;208m"),
    ("EXECUTION", "\x1b[1;35m"),
    ("CONSENSUS", "\x1b[1;36m"),
    ("VALIDATION", "\x1b[1;33m"),
    ("MEV_BOOST", "\x1b[1;32m"),
    ("INFO", "\x1b[32m"),
    ("WARNING", "\x1b[93m"),
    ("WARN", "\x1b[93m"),
    ("ERROR", "\x1b[91m"),
    ("level=info", "\x1b[32m"),
    ("level=warning", "\x1b[93m"),
    ("level=error", "\x1b[91m"),
];

fn colorize(text: &str) -> String {
    let mut out = text.to_string();
    for (token, style) in STYLES {
        // WARNING is handled whole; the WARN token would split it.
        if *token == "WARN" && out.contains("WARNING") {
            continue;
        }
        if out.contains(token) {
            out = out.replace(token, &format!("{style}{token}{RESET}"));
        }
    }
    out
}

pub struct LogMux {
    file: File,
    colored: bool,
}

impl LogMux {
    /// Open the persistent log file, truncating any previous run's content.
    pub fn new(logs_path: &Path, colored: bool) -> Result<Self> {
        if let Some(parent) = logs_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create log directory: {}", parent.display())
            })?;
        }
        let file = File::create(logs_path)
            .with_context(|| format!("failed to open log file: {}", logs_path.display()))?;
        Ok(Self { file, colored })
    }

    /// Indexes of streams with data (or end-of-stream) available.
    ///
    /// Buffered reader data counts as ready without touching the OS. The
    /// poll carries a timeout so the caller can re-check its stop flag
    /// even while every child is silent; EINTR likewise returns an empty
    /// set rather than an error.
    pub fn wait_readable(
        &self,
        processes: &[ManagedProcess],
        timeout: Duration,
    ) -> Result<Vec<usize>> {
        let mut ready: Vec<usize> = processes
            .iter()
            .enumerate()
            .filter(|(_, proc)| proc.has_buffered())
            .map(|(i, _)| i)
            .collect();
        if !ready.is_empty() {
            return Ok(ready);
        }
        if processes.is_empty() {
            std::thread::sleep(timeout);
            return Ok(ready);
        }

        let mut fds: Vec<PollFd> = processes
            .iter()
            .map(|proc| PollFd::new(proc.stream_fd(), PollFlags::POLLIN))
            .collect();
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) | Err(Errno::EINTR) => {}
            Ok(_) => {
                for (i, fd) in fds.iter().enumerate() {
                    let revents = fd.revents().unwrap_or(PollFlags::empty());
                    if revents.intersects(
                        PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR,
                    ) {
                        ready.push(i);
                    }
                }
            }
            Err(err) => return Err(err).context("readiness poll failed"),
        }
        Ok(ready)
    }

    /// Format, persist, and echo one line.
    ///
    /// Whitespace-only lines produce no output and no file write. Returns
    /// the plain (uncolored) record that was appended to the file.
    pub fn print_line(&mut self, prefix: &str, raw: &str) -> Result<Option<String>> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let log = format!("{prefix} {line}");
        writeln!(self.file, "{log}").context("failed to append to log file")?;
        if self.colored {
            println!("{}", colorize(&log));
        } else {
            println!("{log}");
        }
        Ok(Some(log))
    }

    /// Read one line from each ready stream and forward it. End-of-stream
    /// and read failures yield a null record; process death is observed
    /// separately through liveness polling.
    pub fn stream_logs(
        &mut self,
        processes: &mut [ManagedProcess],
        ready: &[usize],
    ) -> Result<Vec<Option<String>>> {
        let mut records = Vec::with_capacity(ready.len());
        for &i in ready {
            let Some(proc) = processes.get_mut(i) else {
                continue;
            };
            match proc.read_line() {
                Ok(Some(raw)) => records.push(self.print_line(proc.prefix, &raw)?),
                Ok(None) => records.push(None),
                Err(err) => {
                    warn!(role = ?proc.role, error = %err, "failed to read child output");
                    records.push(None);
                }
            }
        }
        Ok(records)
    }

    /// Drain whatever the dying processes still have buffered, through the
    /// same per-line routine. Reads only what is available: a stream that
    /// stops producing without reaching end-of-stream is abandoned after a
    /// short grace poll.
    pub fn squeeze_logs(&mut self, processes: &mut [ManagedProcess]) {
        for proc in processes.iter_mut() {
            loop {
                if !proc.has_buffered() {
                    let mut fds = [PollFd::new(proc.stream_fd(), PollFlags::POLLIN)];
                    match poll(&mut fds, PollTimeout::from(100u16)) {
                        Ok(n) if n > 0 => {}
                        _ => break,
                    }
                }
                match proc.read_line() {
                    Ok(Some(raw)) => {
                        let _ = self.print_line(proc.prefix, &raw);
                    }
                    _ => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Role;

    fn mux(colored: bool) -> (LogMux, std::path::PathBuf, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs.txt");
        (LogMux::new(&path, colored).unwrap(), path, tmp)
    }

    #[test]
    fn print_line_writes_prefixed_record() {
        let (mut mux, path, _tmp) = mux(false);
        let record = mux.print_line("<<< EXECUTION >>>", "test message\n").unwrap();
        assert_eq!(record.as_deref(), Some("<<< EXECUTION >>> test message"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "<<< EXECUTION >>> test message\n");
    }

    #[test]
    fn whitespace_line_yields_null_record_and_no_write() {
        let (mut mux, path, _tmp) = mux(true);
        let record = mux.print_line("ROLE", "   \n").unwrap();
        assert!(record.is_none());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn file_receives_plain_form_even_when_colored() {
        let (mut mux, path, _tmp) = mux(true);
        mux.print_line("[[[ CONSENSUS ]]]", "INFO synced\n").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains('\x1b'));
        assert!(content.contains("[[[ CONSENSUS ]]] INFO synced"));
    }

    #[test]
    fn truncates_previous_log_on_open() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs.txt");
        std::fs::write(&path, "stale\n").unwrap();
        let _mux = LogMux::new(&path, false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn colorize_styles_known_tokens() {
        let out = colorize("<<< EXECUTION >>> INFO imported chain");
        assert!(out.contains("\x1b[1;35mEXECUTION\x1b[0m"));
        assert!(out.contains("\x1b[32mINFO\x1b[0m"));
    }

    #[test]
    fn colorize_keeps_warning_whole() {
        let out = colorize("CONSENSUS WARNING slow peers");
        assert!(out.contains("\x1b[93mWARNING\x1b[0m"));
        assert!(!out.contains("\x1b[93mWARN\x1b[0mING"));
    }

    #[test]
    fn colorize_leaves_unknown_text_alone() {
        assert_eq!(colorize("plain text"), "plain text");
    }

    #[test]
    fn wait_and_stream_forwards_ready_lines() {
        let (mut mux, path, _tmp) = mux(false);
        let mut procs = vec![
            ManagedProcess::spawn(
                Role::Execution,
                &[
                    "sh".to_string(),
                    "-c".to_string(),
                    "printf 'alpha\\nbeta\\n'".to_string(),
                ],
            )
            .unwrap(),
        ];

        let mut seen = Vec::new();
        for _ in 0..50 {
            let ready = mux
                .wait_readable(&procs, Duration::from_millis(200))
                .unwrap();
            let records = mux.stream_logs(&mut procs, &ready).unwrap();
            seen.extend(records.into_iter().flatten());
            if seen.len() >= 2 {
                break;
            }
        }

        assert_eq!(
            seen,
            vec![
                "<<< EXECUTION >>> alpha".to_string(),
                "<<< EXECUTION >>> beta".to_string(),
            ]
        );
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn wait_readable_times_out_on_silent_stream() {
        let (mux, _path, _tmp) = mux(false);
        let mut procs = vec![
            ManagedProcess::spawn(Role::Execution, &["sleep".to_string(), "5".to_string()])
                .unwrap(),
        ];

        let ready = mux
            .wait_readable(&procs, Duration::from_millis(50))
            .unwrap();
        assert!(ready.is_empty());

        procs[0].kill_and_reap().unwrap();
    }

    #[test]
    fn squeeze_drains_trailing_output() {
        let (mut mux, path, _tmp) = mux(false);
        let mut procs = vec![
            ManagedProcess::spawn(
                Role::MevBoost,
                &[
                    "sh".to_string(),
                    "-c".to_string(),
                    "echo one; echo two".to_string(),
                ],
            )
            .unwrap(),
        ];

        while !crate::process::all_dead(&mut procs) {
            std::thread::sleep(Duration::from_millis(10));
        }
        mux.squeeze_logs(&mut procs);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("+++ MEV_BOOST +++ one"));
        assert!(content.contains("+++ MEV_BOOST +++ two"));
    }
}
