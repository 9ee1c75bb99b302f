use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
impl Signal {
    fn as_raw(self) -> i32 {
        match self {
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// Puts the child in its own session so a group signal reaches everything it forks.
#[cfg(unix)]
pub fn apply_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn apply_process_group(_cmd: &mut Command) {}

/// Group id of a child started with [`apply_process_group`]; equal to its pid.
///
/// Read it right after spawning: once the child is reaped its pid is gone,
/// while other members of the group may still be running.
pub fn process_group_id(child: &Child) -> Option<i32> {
    child.id().and_then(|pid| i32::try_from(pid).ok())
}

/// Signals every member of the group. Returns false when none is left.
#[cfg(unix)]
pub fn signal_process_group(pgid: i32, signal: Signal) -> bool {
    if pgid <= 0 {
        return false;
    }
    unsafe { libc::kill(-pgid, signal.as_raw()) == 0 }
}

#[cfg(not(unix))]
pub fn signal_process_group(_pgid: i32, _signal: Signal) -> bool {
    false
}

/// One pipe shared by stdout and stderr, the `2>&1` of a direct spawn.
///
/// The returned `Stdio` pair must be handed to the command and the command
/// dropped after spawning, otherwise the read side never sees EOF.
#[cfg(unix)]
pub fn merged_output_pipe() -> io::Result<(Stdio, Stdio, tokio::net::unix::pipe::Receiver)> {
    use std::os::fd::OwnedFd;

    let (reader, writer) = std::io::pipe()?;
    let stderr_writer = writer.try_clone()?;
    let receiver = tokio::net::unix::pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    Ok((Stdio::from(writer), Stdio::from(stderr_writer), receiver))
}

/// Exit code as reported to callers; a signal death maps to the negated signal number.
pub fn exit_code(status: ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(|signal| -signal)
    }
    #[cfg(not(unix))]
    {
        None
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn merged_pipe_collects_both_streams() {
        let (stdout, stderr, mut receiver) = merged_output_pipe().expect("pipe");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("echo out; echo err 1>&2")
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        let mut child = cmd.spawn().expect("spawn");
        drop(cmd);

        let mut collected = Vec::new();
        receiver.read_to_end(&mut collected).await.expect("read");
        let status = child.wait().await.expect("wait");

        let text = String::from_utf8(collected).expect("utf8");
        assert!(text.contains("out\n"));
        assert!(text.contains("err\n"));
        assert_eq!(exit_code(status), Some(0));
    }

    #[tokio::test]
    async fn group_outlives_its_leader_until_killed() {
        let (stdout, stderr, mut receiver) = merged_output_pipe().expect("pipe");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("sh -c 'trap \"\" TERM; echo $$; while true; do sleep 0.1; done' & wait")
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        apply_process_group(&mut cmd);
        let mut child = cmd.spawn().expect("spawn");
        drop(cmd);
        let pgid = process_group_id(&child).expect("pgid");

        let mut line = [0u8; 32];
        let n = receiver.read(&mut line).await.expect("read pid");
        assert!(n > 0);

        assert!(signal_process_group(pgid, Signal::Terminate));
        child.wait().await.expect("leader exits");
        assert_eq!(child.id(), None);
        // The leader is gone but the TERM-ignoring member keeps the group alive.
        assert!(signal_process_group(pgid, Signal::Kill));

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), receiver.read_to_end(&mut rest))
            .await
            .expect("pipe closes once the group is dead")
            .expect("read");
    }

    #[tokio::test]
    async fn group_signal_reports_negated_signal() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30").stdin(Stdio::null());
        apply_process_group(&mut cmd);
        let mut child = cmd.spawn().expect("spawn");
        let pgid = process_group_id(&child).expect("pgid");

        assert!(signal_process_group(pgid, Signal::Terminate));
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("exit in time")
            .expect("wait");
        assert_eq!(exit_code(status), Some(-libc::SIGTERM));
        assert!(!signal_process_group(pgid, Signal::Kill));
    }
}
