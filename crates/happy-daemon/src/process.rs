//! Process liveness checks and signal delivery for daemon and child
//! supervision (§3 "DaemonStateFile", §4.7 steps 1 and 9, §9 "pid reuse is
//! real").

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sysinfo::{Pid as SysPid, ProcessRefreshKind, RefreshKind, System};

/// Whether a process with `pid` currently exists.
///
/// A bare existence check is necessary but not sufficient to conclude a
/// *specific* daemon generation is still running — callers that care
/// about pid reuse must also compare `startedWithCliVersion` or another
/// identifying field from the state file.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Best-effort process name lookup, used to make pid-reuse false
/// positives in [`is_alive`] less likely when cross-checked by callers
/// (e.g. confirming the process is still a `happy`/`happyd` binary).
#[must_use]
pub fn process_name(pid: u32) -> Option<String> {
    let system = System::new_with_specifics(
        RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
    );
    let mut system = system;
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[SysPid::from_u32(pid)]), true);
    system
        .process(SysPid::from_u32(pid))
        .map(|p| p.name().to_string_lossy().into_owned())
}

/// Send `SIGTERM`, the graceful-shutdown request.
///
/// # Errors
///
/// Returns the underlying `nix` error if the signal could not be
/// delivered (process already gone, permission denied).
pub fn terminate(pid: u32) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
}

/// Send `SIGKILL`, the fallback used when a graceful stop request (HTTP
/// `/stop`) does not make the pid disappear in time (§4.7 step 1).
///
/// # Errors
///
/// Returns the underlying `nix` error if the signal could not be
/// delivered.
pub fn kill(pid: u32) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn arbitrary_large_pid_is_not_alive() {
        // Not a guarantee on every system, but a pid this high is
        // overwhelmingly unlikely to be assigned in a test sandbox.
        assert!(!is_alive(u32::MAX - 1));
    }
}
