//! Supervision of the external time-sync daemon process.
use dau_gateway_error::{DauError, DauResult};
use std::{path::PathBuf, process::Stdio};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::Mutex,
};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub struct PtpDaemon {
    program: String,
    args: Vec<String>,
    config_path: PathBuf,
    child: Mutex<Option<Child>>,
    tracker: TaskTracker,
}

impl PtpDaemon {
    pub fn new(program: impl Into<String>, args: Vec<String>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            config_path: config_path.into(),
            child: Mutex::new(None),
            tracker: TaskTracker::new(),
        }
    }

    /// Launches the daemon with `-f <config>`; its output is forwarded to the log.
    pub async fn start(&self) -> DauResult<()> {
        let mut slot = self.child.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("-f")
            .arg(&self.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DauError::InitializationError(format!("spawn {}: {e}", self.program)))?;

        if let Some(stdout) = child.stdout.take() {
            self.tracker.spawn(pump(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            self.tracker.spawn(pump(stderr, true));
        }
        info!(program = %self.program, pid = child.id(), config = %self.config_path.display(), "time-sync daemon started");
        *slot = Some(child);
        Ok(())
    }

    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    /// Asks the daemon to re-read its configuration.
    pub async fn reload(&self) -> DauResult<()> {
        let mut slot = self.child.lock().await;
        let Some(child) = slot.as_mut() else {
            return Ok(());
        };
        if let Some(status) = child.try_wait()? {
            warn!(%status, "time-sync daemon exited");
            *slot = None;
            return Ok(());
        }
        let Some(pid) = child.id() else {
            return Ok(());
        };
        signal_reload(pid)?;
        debug!(pid, "time-sync daemon reload signalled");
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to stop time-sync daemon");
            }
            info!("time-sync daemon stopped");
        }
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(unix)]
fn signal_reload(pid: u32) -> DauResult<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGHUP) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn signal_reload(pid: u32) -> DauResult<()> {
    debug!(pid, "reload signal not supported on this platform");
    Ok(())
}

async fn pump<R: AsyncRead + Unpin>(stream: R, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => warn!(target: "ptp-daemon", "{line}"),
            Ok(Some(line)) => info!(target: "ptp-daemon", "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "daemon output closed");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn supervises_and_reloads_a_process() {
        // the appended `-f <path>` become positional parameters of the script
        let daemon = PtpDaemon::new(
            "sh",
            vec!["-c".into(), "trap '' HUP; sleep 30".into(), "daemon".into()],
            "/tmp/unused.conf",
        );
        daemon.start().await.unwrap();
        assert!(daemon.pid().await.is_some());
        daemon.reload().await.unwrap();
        daemon.stop().await;
        assert!(daemon.pid().await.is_none());
    }

    #[tokio::test]
    async fn missing_program_fails_to_start() {
        let daemon = PtpDaemon::new("/nonexistent/ptp4l", Vec::new(), "/tmp/x.conf");
        assert!(matches!(daemon.start().await, Err(DauError::InitializationError(_))));
    }
}
