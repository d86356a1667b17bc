// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Launch and attach supervision of the IKE daemon process.

use crate::client::ControlClient;
use crate::error::IkeError;
use crate::{DEFAULT_SOCKET_PATH, PID_FILE_PATH};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::{error, info};

/// Daemon subsystems whose debug level is set at launch.
const DEBUG_GROUPS: [&str; 15] = [
    "dmn", "mgr", "ike", "chd", "cfg", "knl", "net", "asn", "tnc", "imc", "imv", "pts", "tls",
    "esp", "lib",
];

const MONITOR_INTERVAL: Duration = Duration::from_secs(2);

/// Spawn the daemon and wait for it to exit.
///
/// The stale control socket is removed first, the daemon's stdout/stderr go
/// to `log_file` when given, and the child is bound to this process's
/// lifetime via the parent-death signal. The daemon exiting is always an
/// error; this function never returns success.
///
/// # Errors
///
/// Returns [`IkeError::Daemon`] when the daemon cannot be spawned or exits.
pub async fn run(log_file: Option<&Path>, debug: bool) -> IkeError {
    // a leftover socket from a previous daemon would shadow the new one
    let _ = std::fs::remove_file(DEFAULT_SOCKET_PATH);

    let level = if debug { "3" } else { "1" };
    let mut command = tokio::process::Command::new("charon");
    for group in DEBUG_GROUPS {
        command.arg(format!("--debug-{group}"));
        command.arg(level);
    }

    match log_file {
        Some(path) => {
            let open = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path);
            match open {
                Ok(file) => {
                    let stderr = match file.try_clone() {
                        Ok(clone) => clone,
                        Err(e) => {
                            return IkeError::Daemon(format!(
                                "failed to clone log handle for {}: {e}",
                                path.display()
                            ));
                        }
                    };
                    command.stdout(Stdio::from(file));
                    command.stderr(Stdio::from(stderr));
                }
                Err(e) => {
                    return IkeError::Daemon(format!(
                        "failed to open log file {}: {e}",
                        path.display()
                    ));
                }
            }
        }
        None => {
            command.stdout(Stdio::inherit());
            command.stderr(Stdio::inherit());
        }
    }

    #[allow(unsafe_code)] // pre_exec runs between fork and exec
    unsafe {
        command.pre_exec(|| {
            nix::sys::prctl::set_pdeathsig(Signal::SIGTERM).map_err(std::io::Error::from)
        });
    }

    info!("launching charon");
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return IkeError::Daemon(format!("failed to launch charon: {e}")),
    };
    match child.wait().await {
        Ok(status) => IkeError::Daemon(format!("charon exited: {status}")),
        Err(e) => IkeError::Daemon(format!("failed to wait for charon: {e}")),
    }
}

/// Monitor an externally managed daemon.
///
/// Reads the daemon's PID file on a fixed interval. A missing PID file or a
/// PID change is fatal. Once the PID is known, each interval probes the
/// control socket; a failed probe kills the daemon and is fatal, leaving the
/// restart to the outer orchestration. This function never returns success.
pub async fn monitor(client: &ControlClient) -> IkeError {
    let mut pid: Option<String> = None;
    loop {
        let raw = match std::fs::read_to_string(PID_FILE_PATH) {
            Ok(raw) => raw,
            Err(e) => return IkeError::Daemon(format!("failed to read {PID_FILE_PATH}: {e}")),
        };
        let current = raw.trim().to_string();
        match &pid {
            None => {
                info!(pid = %current, "charon running");
                pid = Some(current);
            }
            Some(known) if *known != current => {
                return IkeError::Daemon(format!(
                    "charon restarted, old PID: {known}, new PID: {current}"
                ));
            }
            Some(known) => {
                if let Err(e) = client.probe().await {
                    error!("killing charon due to: {e}");
                    kill_daemon(known);
                    return IkeError::Daemon(format!("control socket probe failed: {e}"));
                }
            }
        }
        tokio::time::sleep(MONITOR_INTERVAL).await;
    }
}

fn kill_daemon(pid: &str) {
    match pid.parse::<i32>() {
        Ok(pid) => {
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGKILL) {
                error!("can't kill {pid}: {e}");
            }
        }
        Err(e) => error!("can't kill {pid}: {e}"),
    }
}
