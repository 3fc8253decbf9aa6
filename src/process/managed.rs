use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to a launched service, identified by its pid. The service leads
/// its own process group, so signals go to the whole group first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedProcess {
    pid: u32,
}

impl ManagedProcess {
    pub fn from_pid(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        is_pid_alive(self.pid)
    }

    /// Whether the process was started with `key=value` in its environment.
    ///
    /// Reads `/proc/<pid>/environ`. A process whose environment cannot be
    /// read is never claimed.
    #[cfg(target_os = "linux")]
    pub fn has_env(&self, key: &str, value: &str) -> bool {
        let Ok(data) = std::fs::read(format!("/proc/{}/environ", self.pid)) else {
            return false;
        };
        let expected = format!("{key}={value}");
        // environ is null-separated key=value pairs
        data.split(|&b| b == 0)
            .any(|entry| entry == expected.as_bytes())
    }

    /// Without procfs there is no way to inspect another process's
    /// environment; the recorded pid is trusted.
    #[cfg(not(target_os = "linux"))]
    pub fn has_env(&self, _key: &str, _value: &str) -> bool {
        true
    }

    /// Ask the service to stop (SIGTERM). Returns false when the process is
    /// already gone or cannot be signalled.
    pub fn signal_stop(&self) -> bool {
        send_signal(self.pid, libc::SIGTERM)
    }

    /// SIGKILL the service. Best-effort.
    pub fn kill(&self) -> bool {
        send_signal(self.pid, libc::SIGKILL)
    }

    /// SIGTERM, wait up to `grace` for the process to exit, then SIGKILL.
    /// Never fails: a process that is already gone counts as stopped.
    pub async fn terminate(&self, grace: Duration) {
        if !self.is_alive() {
            return;
        }
        if !self.signal_stop() {
            tracing::debug!("PID {} could not be signalled, treating as stopped", self.pid);
            return;
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !self.is_alive() {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        tracing::warn!(
            "PID {} did not exit within {}ms, sending SIGKILL",
            self.pid,
            grace.as_millis()
        );
        self.kill();

        // Give the reaper a moment to collect the process.
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.is_alive() && Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Check if a process with the given PID exists.
///
/// Uses `kill(pid, 0)`. Returns true if the process exists, even if we lack
/// permission to signal it (EPERM means "process exists, but you can't signal it").
pub fn is_pid_alive(pid: u32) -> bool {
    let Some(pid) = valid_pid(pid) else {
        return false;
    };
    let ret = unsafe { libc::kill(pid, 0) };
    if ret == 0 {
        return true;
    }
    // errno == EPERM means process exists but we lack permission to signal it.
    // errno == ESRCH means no such process.
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    errno == libc::EPERM
}

/// Pids 0 and 1 and values that overflow `pid_t` address more than one
/// process (or init), never a service we launched.
fn valid_pid(pid: u32) -> Option<libc::pid_t> {
    let pid = libc::pid_t::try_from(pid).ok()?;
    (pid > 1).then_some(pid)
}

/// Signal the process group led by `pid`, falling back to the pid alone.
fn send_signal(pid: u32, signal: libc::c_int) -> bool {
    let Some(pid) = valid_pid(pid) else {
        return false;
    };
    if unsafe { libc::kill(-pid, signal) } == 0 {
        return true;
    }
    unsafe { libc::kill(pid, signal) == 0 }
}
