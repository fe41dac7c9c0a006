use super::DaemonError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Start `exe --daemon` in a new session with no stdio attached.
pub fn spawn_detached(exe: &Path) -> Result<(), DaemonError> {
    let mut command = Command::new(exe);
    command
        .arg("--daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(DaemonError::Spawn)?;
    info!("Started daemon (pid {:?})", child.id());
    Ok(())
}
