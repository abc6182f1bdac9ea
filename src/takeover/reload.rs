//! Signalling tor to re-read its configuration.

use std::path::PathBuf;

use tracing::info;

use crate::types::{CellarError, Result};

/// How a torrc change is pushed to the running daemon. Injected so tests
/// and dry runs never signal a real process.
pub trait ReloadSignal: Send + Sync {
    fn reload(&self) -> Result<()>;
}

/// SIGHUPs the tor process named by its pid file.
pub struct TorReload {
    pid_file: PathBuf,
}

impl TorReload {
    pub fn new(pid_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
        }
    }
}

impl ReloadSignal for TorReload {
    #[cfg(unix)]
    fn reload(&self) -> Result<()> {
        let text = std::fs::read_to_string(&self.pid_file).map_err(|e| {
            CellarError::ReloadSignal(format!(
                "cannot read tor pid file {}: {e}",
                self.pid_file.display()
            ))
        })?;
        let pid: i32 = text.trim().parse().map_err(|_| {
            CellarError::ReloadSignal(format!(
                "tor pid file {} does not contain a pid",
                self.pid_file.display()
            ))
        })?;

        let rc = unsafe { libc::kill(pid, libc::SIGHUP) };
        if rc != 0 {
            return Err(CellarError::ReloadSignal(format!(
                "SIGHUP to tor pid {pid} failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        info!(pid, "sent SIGHUP to tor");
        Ok(())
    }

    #[cfg(not(unix))]
    fn reload(&self) -> Result<()> {
        Err(CellarError::ReloadSignal(
            "tor reload signalling is only supported on unix".into(),
        ))
    }
}

/// Reload that does nothing, for tests and `--no-reload` style use.
#[derive(Default)]
pub struct NoopReload;

impl ReloadSignal for NoopReload {
    fn reload(&self) -> Result<()> {
        Ok(())
    }
}
