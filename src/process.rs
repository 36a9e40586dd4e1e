//! Signal delivery to processes we only know by id.
//!
//! The tunnel process is detached from whoever spawned it, so teardown can
//! only reach it through its pid. [`ProcessControl`] is the narrow surface
//! the rest of the crate needs; [`SystemProcessControl`] implements it with
//! POSIX signals on Unix and `tasklist`/`taskkill` elsewhere.

use crate::error::{Result, TunnelError};

/// Liveness probing and escalating stop requests for a process id.
pub trait ProcessControl: Send + Sync {
    /// Non-destructive check whether `pid` still exists.
    fn is_alive(&self, pid: u32) -> Result<bool>;

    /// Polite stop request (`SIGINT`).
    fn interrupt(&self, pid: u32) -> Result<()>;

    /// Firmer stop request (`SIGTERM`).
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Unconditional kill (`SIGKILL`).
    fn kill(&self, pid: u32) -> Result<()>;
}

/// [`ProcessControl`] backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessControl;

#[cfg(unix)]
mod imp {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    use super::*;

    fn to_pid(pid: u32) -> Result<Pid> {
        i32::try_from(pid)
            .ok()
            .filter(|raw| *raw > 0)
            .map(Pid::from_raw)
            .ok_or_else(|| TunnelError::Signal(format!("invalid process id {}", pid)))
    }

    fn send(pid: u32, signal: Signal) -> Result<()> {
        kill(to_pid(pid)?, signal)
            .map_err(|e| TunnelError::Signal(format!("{} to pid {} failed: {}", signal, pid, e)))
    }

    impl ProcessControl for SystemProcessControl {
        fn is_alive(&self, pid: u32) -> Result<bool> {
            match kill(to_pid(pid)?, None) {
                Ok(()) => Ok(true),
                Err(Errno::ESRCH) => Ok(false),
                // The pid exists but belongs to someone we may not signal.
                Err(Errno::EPERM) => Ok(true),
                Err(e) => Err(TunnelError::Signal(format!(
                    "liveness probe for pid {} failed: {}",
                    pid, e
                ))),
            }
        }

        fn interrupt(&self, pid: u32) -> Result<()> {
            send(pid, Signal::SIGINT)
        }

        fn terminate(&self, pid: u32) -> Result<()> {
            send(pid, Signal::SIGTERM)
        }

        fn kill(&self, pid: u32) -> Result<()> {
            send(pid, Signal::SIGKILL)
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::process::{Command, Stdio};

    use super::*;

    fn taskkill(pid: u32, force: bool) -> Result<()> {
        let mut cmd = Command::new("taskkill");
        cmd.arg("/PID").arg(pid.to_string());
        if force {
            cmd.arg("/F");
        }
        let status = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(TunnelError::Signal(format!(
                "taskkill for pid {} exited with {}",
                pid, status
            )))
        }
    }

    // No graceful signals here: interrupt and terminate are the same request.
    impl ProcessControl for SystemProcessControl {
        fn is_alive(&self, pid: u32) -> Result<bool> {
            let output = Command::new("tasklist")
                .args(["/FI", &format!("PID eq {}", pid), "/NH"])
                .output()?;
            let listing = String::from_utf8_lossy(&output.stdout);
            Ok(listing
                .split_whitespace()
                .any(|field| field == pid.to_string()))
        }

        fn interrupt(&self, pid: u32) -> Result<()> {
            taskkill(pid, false)
        }

        fn terminate(&self, pid: u32) -> Result<()> {
            taskkill(pid, false)
        }

        fn kill(&self, pid: u32) -> Result<()> {
            taskkill(pid, true)
        }
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        let me = std::process::id();
        assert!(SystemProcessControl.is_alive(me).unwrap());
    }

    #[test]
    fn test_zero_pid_is_rejected() {
        // pid 0 would address our own process group.
        assert!(SystemProcessControl.is_alive(0).is_err());
        assert!(SystemProcessControl.kill(0).is_err());
    }

    #[test]
    fn test_reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!SystemProcessControl.is_alive(pid).unwrap());
    }

    #[test]
    fn test_terminate_stops_sleeping_child() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id();
        assert!(SystemProcessControl.is_alive(pid).unwrap());

        SystemProcessControl.terminate(pid).unwrap();
        child.wait().unwrap();

        assert!(!SystemProcessControl.is_alive(pid).unwrap());
    }
}
