use std::io;
use std::process::Stdio;
use std::time::Duration;

use system_utils::process::{
    apply_process_group, merged_output_pipe, process_group_id, signal_process_group, Signal,
};
use tokio::net::unix::pipe::Receiver;
use tokio::process::{Child, Command};

use super::ExecSpec;

pub(super) struct Launched {
    pub(super) child: Child,
    pub(super) output: Receiver,
    /// Outlives the leader: members may keep running after it is reaped.
    pub(super) pgid: i32,
}

pub(super) fn launch(spec: &ExecSpec) -> io::Result<Launched> {
    let (stdout, stderr, output) = merged_output_pipe()?;
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true);
    apply_process_group(&mut cmd);
    let child = cmd.spawn()?;
    // The command still owns the write ends of the pipe.
    drop(cmd);
    let pgid = process_group_id(&child)
        .ok_or_else(|| io::Error::other("spawned process has no pid"))?;
    Ok(Launched {
        child,
        output,
        pgid,
    })
}

pub(super) fn terminate_group(pgid: i32) -> bool {
    signal_process_group(pgid, Signal::Terminate)
}

/// SIGKILL to every member, then reap the leader.
pub(super) async fn force_kill(child: &mut Child, pgid: i32) {
    signal_process_group(pgid, Signal::Kill);
    let _ = child.kill().await;
}

/// Two-phase termination without any reporting, used once the output is
/// no longer read. Members still alive after the grace period are killed.
pub(super) async fn terminate_quietly(child: &mut Child, pgid: i32, grace: Duration) {
    terminate_group(pgid);
    let _ = tokio::time::timeout(grace, child.wait()).await;
    force_kill(child, pgid).await;
}
