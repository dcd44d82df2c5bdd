//! Shell subprocess startup and exit tracking.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, warn};
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;

use crate::config::ShellSettings;
use crate::error::{ShellError, ShellResult};

const TARGET: &str = "shelldb::process";

/// How long a shell gets to exit by itself once its connection is cancelled.
const KILL_GRACE: Duration = Duration::from_millis(100);

/// A running shell and the parent's ends of its pipes.
pub(crate) struct ShellProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    /// stdout and stderr, merged
    pub output: pipe::Receiver,
}

/// Start `<program> [args..] -quote -header <target>`.
///
/// stdout and stderr share one pipe so error text and rows arrive in the
/// order the shell wrote them.
pub(crate) fn spawn(settings: &ShellSettings, target: &str) -> ShellResult<ShellProcess> {
    let (sender, output) = pipe::pipe().map_err(ShellError::Pipe)?;
    let stdout = sender.into_blocking_fd().map_err(ShellError::Pipe)?;
    let stderr = stdout.try_clone().map_err(ShellError::Pipe)?;

    let mut command = Command::new(&settings.program);
    command
        .args(settings.command_args(target))
        .stdin(Stdio::piped())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| ShellError::spawn(&settings.program, e))?;
    // the command holds the parent's copies of the write end; without
    // dropping it the output pipe never reports end-of-stream
    drop(command);

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ShellError::internal("shell stdin was not captured"))?;

    debug!(
        target: TARGET,
        "Spawned {} (pid {:?}) for {}",
        settings.program,
        child.id(),
        target
    );
    Ok(ShellProcess {
        child,
        stdin,
        output,
    })
}

/// Wait for the shell to exit, then end the connection's lifetime.
///
/// If the lifetime ends first and no close was requested, the shell is
/// killed unless it exits within a short grace period. Any exit not caused
/// by a close request or by that kill is reported as
/// [`ShellError::ProcessExit`].
pub(crate) async fn wait_loop(
    mut child: Child,
    lifetime: CancellationToken,
    closing: Arc<AtomicBool>,
) -> ShellResult<()> {
    let mut killed = false;
    let mut lifetime_seen = false;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = lifetime.cancelled(), if !lifetime_seen => {
                lifetime_seen = true;
                if closing.load(Ordering::Acquire) {
                    continue;
                }
                // the shell may be on its way out already (its output
                // closes just before its exit status is available)
                if let Ok(status) = tokio::time::timeout(KILL_GRACE, child.wait()).await {
                    break status;
                }
                debug!(target: TARGET, "Connection cancelled, killing shell");
                killed = child.start_kill().is_ok();
            }
        }
    };
    let expected = closing.load(Ordering::Acquire) || killed;
    lifetime.cancel();

    let status = status.map_err(ShellError::Wait)?;
    if expected {
        debug!(target: TARGET, "Shell exited: {}", status);
        Ok(())
    } else {
        warn!(target: TARGET, "Shell exited unexpectedly: {}", status);
        Err(ShellError::ProcessExit(status))
    }
}
