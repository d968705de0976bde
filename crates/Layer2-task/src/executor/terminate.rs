//! Process termination
//!
//! Children are started as the leader of their own process group (unix) or in a
//! new console process group (windows) so that everything a shell spawns is
//! stopped together.

use async_trait::async_trait;
use deskrun_foundation::{Error, Result};
use std::sync::Arc;

/// Stops a process tree identified by the root pid
#[async_trait]
pub trait ProcessTerminator: Send + Sync {
    /// Ask the process tree to exit
    async fn terminate(&self, pid: u32) -> Result<()>;

    /// Force the process tree down
    async fn kill(&self, pid: u32) -> Result<()>;
}

/// Terminator for the current platform
pub fn platform_terminator() -> Arc<dyn ProcessTerminator> {
    #[cfg(unix)]
    {
        Arc::new(SignalTerminator)
    }
    #[cfg(windows)]
    {
        Arc::new(TaskkillTerminator)
    }
}

// ============================================================================
// Unix: signals to the process group
// ============================================================================

/// SIGTERM / SIGKILL to the process group led by `pid`
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalTerminator;

#[cfg(unix)]
impl SignalTerminator {
    fn signal_group(pid: u32, signal: libc::c_int) -> Result<()> {
        let pgid = libc::pid_t::try_from(pid)
            .map_err(|_| Error::ProcessIo(format!("pid {} out of range", pid)))?;

        // SAFETY: killpg only reads its arguments
        let ret = unsafe { libc::killpg(pgid, signal) };
        if ret == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            // Already gone
            return Ok(());
        }
        Err(Error::ProcessIo(format!(
            "Failed to signal process group {}: {}",
            pid, err
        )))
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessTerminator for SignalTerminator {
    async fn terminate(&self, pid: u32) -> Result<()> {
        Self::signal_group(pid, libc::SIGTERM)
    }

    async fn kill(&self, pid: u32) -> Result<()> {
        Self::signal_group(pid, libc::SIGKILL)
    }
}

// ============================================================================
// Windows: taskkill over the process tree
// ============================================================================

#[cfg(windows)]
pub const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// `taskkill /T` (tree), `/F` when forced
#[cfg(windows)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskkillTerminator;

#[cfg(windows)]
impl TaskkillTerminator {
    async fn taskkill(pid: u32, force: bool) -> Result<()> {
        let pid_arg = pid.to_string();
        let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
        if force {
            args.push("/F");
        }

        let output = tokio::process::Command::new("taskkill")
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::ProcessIo(format!("Failed to run taskkill: {}", e)))?;

        // Exit code 128: process not found
        if output.status.success() || output.status.code() == Some(128) {
            Ok(())
        } else {
            Err(Error::ProcessIo(format!(
                "taskkill failed for {}: {}",
                pid,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[cfg(windows)]
#[async_trait]
impl ProcessTerminator for TaskkillTerminator {
    async fn terminate(&self, pid: u32) -> Result<()> {
        Self::taskkill(pid, false).await
    }

    async fn kill(&self, pid: u32) -> Result<()> {
        Self::taskkill(pid, true).await
    }
}
