//! Process Runner: runs a sequence of shell-invoked commands as one logical pipeline
//! and surfaces their combined stdout+stderr as a line stream.
//!
//! The commands are joined with `&&` and handed to a single `bash -c` invocation so that
//! shell-level operators embedded in caller-supplied argv strings (e.g. `|| true`) behave as
//! the caller intends — the composition happens once, here, rather than once per caller.
//! Grounded on the `sh -c` composition in `danielnaab-graft`'s `ProcessHandle::spawn` and the
//! `tokio::process::Command` usage in the syslog relay this crate's process plumbing descends
//! from.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Initial stdout/stderr buffer size: large enough that a bursty `dmesg -w` dump on startup
/// does not truncate before the reader catches up.
const INITIAL_BUFFER_BYTES: usize = 16 * 1024;

/// Channel capacity for the raw line stream. The streamer layered on top has its own, larger
/// capacity; this one only needs to smooth over the gap between the OS pipe and the
/// reader task.
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// One item off the combined stdout+stderr stream.
///
/// `ReadError` is terminal and synthetic — it never came from the child's output — so
/// callers (the Log Streamer, specifically) must route it straight to
/// [`crate::record::LogRecord::terminal_error`] rather than handing it to a line parser or
/// the Deduper, both of which assume `content` is real process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerOutput {
    Line(String),
    ReadError(String),
}

/// Runs an ordered list of argv commands as a single shell pipeline.
pub struct ProcessRunner {
    lines_rx: mpsc::Receiver<RunnerOutput>,
    cancel: CancellationToken,
    child_pid: Option<i32>,
    detached: bool,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl ProcessRunner {
    /// Spawn `commands` (each an argv list) composed into one `bash -c` pipeline.
    ///
    /// `cancel` is a child token (see [`tokio_util::sync::CancellationToken::child_token`])
    /// owned by the caller; cancelling it terminates the reader and releases the child.
    /// `detached` selects whether the child's process group is killed on [`Self::close`]
    /// (default, used by the log-observation core) or left alone (used only by callers that
    /// deliberately schedule background work, e.g. package-install scripts).
    pub async fn start(
        commands: Vec<Vec<String>>,
        cancel: CancellationToken,
        detached: bool,
    ) -> Result<Self, Error> {
        if commands.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let script = compose_pipeline(&commands);
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&script);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        if !detached {
            // Put the child in its own process group (pgid == pid) so Close() can kill the
            // whole group — stray `sleep N &` descendants included — instead of only the
            // direct child.
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(Error::Spawn)?;
        let child_pid = child.id().map(|id| id as i32);

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let reader_cancel = cancel.clone();

        let reader_task = tokio::spawn(async move {
            let mut stdout_lines =
                BufReader::with_capacity(INITIAL_BUFFER_BYTES, stdout).lines();
            let mut stderr_lines =
                BufReader::with_capacity(INITIAL_BUFFER_BYTES, stderr).lines();
            let mut child = child;
            // Once a stream hits EOF it must stop being polled: `next_line()` returns
            // `Ok(None)` sticky at EOF, so selecting on a done stream unconditionally would
            // spin. The process is only considered finished once BOTH streams are drained —
            // racing `child.wait()` as a third select arm let the child's exit status "win"
            // the race against a stream that still had buffered-but-unread lines in it.
            let mut stdout_done = false;
            let mut stderr_done = false;

            loop {
                if stdout_done && stderr_done {
                    break;
                }
                tokio::select! {
                    _ = reader_cancel.cancelled() => {
                        let _ = child.start_kill();
                        break;
                    }
                    line = stdout_lines.next_line(), if !stdout_done => {
                        match line {
                            Ok(Some(l)) => {
                                if tx.send(RunnerOutput::Line(l)).await.is_err() { break; }
                            }
                            Ok(None) => stdout_done = true,
                            Err(e) => {
                                let _ = tx
                                    .send(RunnerOutput::ReadError(format!("stdout read error: {e}")))
                                    .await;
                                break;
                            }
                        }
                    }
                    line = stderr_lines.next_line(), if !stderr_done => {
                        match line {
                            Ok(Some(l)) => {
                                if tx.send(RunnerOutput::Line(l)).await.is_err() { break; }
                            }
                            Ok(None) => stderr_done = true,
                            Err(e) => {
                                let _ = tx
                                    .send(RunnerOutput::ReadError(format!("stderr read error: {e}")))
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
            // Both streams are drained (or the reader is tearing down early via cancellation
            // or a read error) — reap the child so it doesn't linger as a zombie. The
            // pipeline's own exit code is not surfaced as an error: a non-zero exit is
            // expected whenever a fallback command is tried and the call site has guarded it
            // with `|| true`.
            let _ = child.wait().await;
        });

        Ok(Self {
            lines_rx: rx,
            cancel,
            child_pid,
            detached,
            reader_task: Some(reader_task),
        })
    }

    /// The receiver half of the line stream; exhausts on process exit, cancellation, or
    /// [`Self::close`].
    pub fn lines(&mut self) -> &mut mpsc::Receiver<RunnerOutput> {
        &mut self.lines_rx
    }

    /// Idempotent. Terminates the reader task and, unless running in detached mode, kills the
    /// whole process group so that backgrounded children do not leak.
    pub async fn close(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        if !self.detached {
            if let Some(pid) = self.child_pid {
                unsafe {
                    libc::killpg(pid, libc::SIGKILL);
                }
            }
        }
        self.cancel.cancel();
        if let Some(task) = self.reader_task.take() {
            let _ = task.await;
        }
    }
}

/// Compose an ordered list of argv commands into a single `bash -c` script. Each command is
/// joined with `&&`, with arguments quoted so embedded whitespace is not re-split by the
/// shell; any shell metacharacters a caller wants (e.g. `|| true`) are expected to already be
/// part of the argv strings, consistent with pipelines like `dmesg ... || true`.
fn compose_pipeline(commands: &[Vec<String>]) -> String {
    let mut script = String::new();
    for (i, argv) in commands.iter().enumerate() {
        let rendered = argv
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ");
        // A command list whose argv leads with its own operator (e.g. `["||", "true"]`, used
        // to guard a failure-tolerant attempt) must not get an extra `&&` glued in front of it
        // — `cmd && || true` is a shell syntax error, not a no-op.
        let starts_with_operator = matches!(argv.first().map(String::as_str), Some("||" | "&&"));
        if i > 0 && !starts_with_operator {
            script.push_str(" && ");
        } else if i > 0 {
            script.push(' ');
        }
        script.push_str(&rendered);
    }
    script
}

/// Single-quote an argument for `bash -c`, escaping embedded single quotes. Arguments that are
/// themselves shell fragments (e.g. `"||"`, `"true"`) are passed through unquoted so callers
/// can still compose shell operators — the same trick a dmesg fallback chain relies
/// on by passing `"||"` and `"true"` as their own argv elements.
fn shell_quote(arg: &str) -> String {
    if arg == "||" || arg == "&&" || arg == "true" || arg == "false" {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[test]
    fn or_true_guard_does_not_duplicate_the_and_operator() {
        let script = compose_pipeline(&[
            vec!["dmesg".into(), "-w".into()],
            vec!["||".into(), "true".into()],
            vec!["journalctl".into(), "-f".into()],
        ]);
        assert_eq!(script, "dmesg -w || true && journalctl -f");
    }

    #[test]
    fn plain_commands_are_joined_with_and() {
        let script = compose_pipeline(&[
            vec!["echo".into(), "one".into()],
            vec!["echo".into(), "two".into()],
        ]);
        assert_eq!(script, "echo 'one' && echo 'two'");
    }

    async fn collect_lines(runner: &mut ProcessRunner) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(item) = timeout(Duration::from_secs(5), runner.lines().recv())
            .await
            .expect("timed out waiting for line")
        {
            match item {
                RunnerOutput::Line(l) => out.push(l),
                RunnerOutput::ReadError(e) => panic!("unexpected read error: {e}"),
            }
        }
        out
    }

    #[tokio::test]
    async fn empty_commands_is_invalid_argument() {
        let cancel = CancellationToken::new();
        let result = ProcessRunner::start(vec![], cancel, false).await;
        assert!(matches!(result, Err(Error::InvalidArgument)));
    }

    #[tokio::test]
    async fn single_command_streams_stdout() {
        let cancel = CancellationToken::new();
        let mut runner = ProcessRunner::start(
            vec![vec!["echo".into(), "hello world".into()]],
            cancel,
            false,
        )
        .await
        .unwrap();

        let lines = collect_lines(&mut runner).await;
        assert_eq!(lines, vec!["hello world".to_string()]);
    }

    #[tokio::test]
    async fn fallback_command_order_survives_leading_failure() {
        // First command fails but is guarded with `|| true`, second
        // produces output, third would block — we don't include the third here since the
        // runner doesn't auto-stop on success; we only assert ordering and that the guarded
        // failure does not appear as an error line.
        let cancel = CancellationToken::new();
        let mut runner = ProcessRunner::start(
            vec![
                vec!["false".into()],
                vec!["||".into(), "true".into()],
                vec!["echo".into(), "first command".into()],
            ],
            cancel,
            false,
        )
        .await
        .unwrap();

        let first = timeout(Duration::from_secs(5), runner.lines().recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, RunnerOutput::Line("first command".to_string()));
        runner.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let cancel = CancellationToken::new();
        let mut runner =
            ProcessRunner::start(vec![vec!["sleep".into(), "5".into()]], cancel, false)
                .await
                .unwrap();
        runner.close().await;
        runner.close().await;
    }

    #[tokio::test]
    async fn cancellation_terminates_the_reader() {
        let cancel = CancellationToken::new();
        let mut runner = ProcessRunner::start(
            vec![vec!["sleep".into(), "60".into()]],
            cancel.clone(),
            false,
        )
        .await
        .unwrap();

        cancel.cancel();
        let result = timeout(Duration::from_secs(5), runner.lines().recv()).await;
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), None);
    }

    fn marker_path(label: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "hostagent-process-runner-{label}-{}-{}",
            std::process::id(),
            label.len()
        ))
    }

    #[tokio::test]
    async fn default_mode_kills_the_process_group_on_close() {
        // The default (non-detached) mode puts the child in its own process group and kills
        // the whole group on close — the background `sleep && touch` pattern packaging scripts
        // rely on must NOT survive a non-detached runner's close.
        let marker = marker_path("killed");
        let _ = std::fs::remove_file(&marker);

        let cancel = CancellationToken::new();
        let mut runner = ProcessRunner::start(
            vec![vec![
                "bash".into(),
                "-c".into(),
                format!("(sleep 0.3 && touch {}) & echo started", marker.display()),
            ]],
            cancel,
            false,
        )
        .await
        .unwrap();

        let first = timeout(Duration::from_secs(5), runner.lines().recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, RunnerOutput::Line("started".to_string()));

        runner.close().await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(
            !marker.exists(),
            "backgrounded child survived close() in non-detached mode"
        );
        let _ = std::fs::remove_file(&marker);
    }

    #[tokio::test]
    async fn detached_mode_lets_backgrounded_children_outlive_close() {
        let marker = marker_path("detached");
        let _ = std::fs::remove_file(&marker);

        let cancel = CancellationToken::new();
        let mut runner = ProcessRunner::start(
            vec![vec![
                "bash".into(),
                "-c".into(),
                format!("(sleep 0.3 && touch {}) & echo started", marker.display()),
            ]],
            cancel,
            true,
        )
        .await
        .unwrap();

        let first = timeout(Duration::from_secs(5), runner.lines().recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, RunnerOutput::Line("started".to_string()));

        runner.close().await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(
            marker.exists(),
            "detached background child was killed by close()"
        );
        let _ = std::fs::remove_file(&marker);
    }
}
