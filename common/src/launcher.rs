use std::{collections::HashMap, process::Stdio, time::Duration};

use eyre::{Context, Result, bail};
use futures::future::join_all;
use nix::{
    errno::Errno,
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use tokio::{
    process::{Child, Command},
    time::timeout,
};
use tracing::{debug, warn};

use crate::{
    config::Config,
    grid::{Invocation, Role, TrialParams},
};

/// What the leader left behind once it exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderOutput {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl LeaderOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A follower process launched for its side effects only.
#[async_trait::async_trait]
pub trait Follower: Send {
    fn rank(&self) -> u32;
    /// Asks the follower to stop and waits up to `grace` before forcing it.
    async fn terminate(&mut self, grace: Duration) -> Result<()>;
    /// Best effort, non-blocking kill used when the attempt is torn down without
    /// reaching [`Follower::terminate`].
    fn kill(&mut self);
}

/// Launches the program under test
#[async_trait::async_trait]
pub trait Launcher: Send + Sync {
    type Handle: Follower;

    /// Starts a follower without waiting for it
    fn spawn_follower(&self, invocation: &Invocation) -> Result<Self::Handle>;
    /// Runs the leader to completion, capturing its output
    async fn run_leader(&self, invocation: &Invocation) -> Result<LeaderOutput>;
}

/// Followers of a single attempt. They are terminated exactly once: explicitly
/// through [`FollowerGroup::terminate`], or on drop if the attempt unwinds first.
pub struct FollowerGroup<F: Follower> {
    followers: Vec<F>,
    released: bool,
}

impl<F: Follower> FollowerGroup<F> {
    /// Launches ranks `1..cluster_size`. A follower that fails to start is logged
    /// and skipped, the leader's outcome decides the attempt.
    pub fn launch<L>(launcher: &L, params: &TrialParams) -> Self
    where
        L: Launcher<Handle = F>,
    {
        let mut followers = Vec::with_capacity(params.follower_ranks().len());
        for rank in params.follower_ranks() {
            let invocation = params.invocation(Role::Follower(rank));
            match launcher.spawn_follower(&invocation) {
                Ok(follower) => followers.push(follower),
                Err(err) => warn!("Could not start follower rank={rank} for {params}: {err:#}"),
            }
        }
        debug!("Started {} followers for {params}", followers.len());
        Self {
            followers,
            released: false,
        }
    }

    pub async fn terminate(mut self, grace: Duration) {
        self.released = true;
        let results = join_all(
            self.followers
                .iter_mut()
                .map(|follower| follower.terminate(grace)),
        )
        .await;
        for (follower, result) in self.followers.iter().zip(results) {
            if let Err(err) = result {
                warn!("Terminating follower rank={}: {err:#}", follower.rank());
            }
        }
    }
}

impl<F: Follower> Drop for FollowerGroup<F> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for follower in &mut self.followers {
            follower.kill();
        }
    }
}

/// Launches real OS processes: `program args.. cluster_size rank workload`
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: HashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
        }
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(invocation.args())
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Shell-like rendering of an invocation, for logs and dry runs
    pub fn command_line(&self, invocation: &Invocation) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(str::to_owned)
            .chain(invocation.args())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait::async_trait]
impl Launcher for ProcessLauncher {
    type Handle = ProcessFollower;

    fn spawn_follower(&self, invocation: &Invocation) -> Result<ProcessFollower> {
        let rank = invocation.role.rank();
        let child = self
            .command(invocation)
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("Spawning {}", self.command_line(invocation)))?;
        debug!("Follower rank={rank} pid={:?}", child.id());
        Ok(ProcessFollower { child, rank })
    }

    async fn run_leader(&self, invocation: &Invocation) -> Result<LeaderOutput> {
        debug!("Running leader: {}", self.command_line(invocation));
        let output = self
            .command(invocation)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Running {}", self.command_line(invocation)))?;
        Ok(LeaderOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug)]
pub struct ProcessFollower {
    child: Child,
    rank: u32,
}

#[async_trait::async_trait]
impl Follower for ProcessFollower {
    fn rank(&self) -> u32 {
        self.rank
    }

    async fn terminate(&mut self, grace: Duration) -> Result<()> {
        // already reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = Pid::from_raw(i32::try_from(pid)?);
        match kill(pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => bail!("Sending SIGTERM to follower rank={}: {err}", self.rank),
        }

        match timeout(grace, self.child.wait()).await {
            Ok(status) => {
                debug!("Follower rank={} exited: {}", self.rank, status?);
            }
            Err(_) => {
                warn!(
                    "Follower rank={} ignored SIGTERM for {grace:?}, killing",
                    self.rank
                );
                self.child.kill().await?;
            }
        }
        Ok(())
    }

    fn kill(&mut self) {
        _ = self.child.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn sh(script: &str) -> ProcessLauncher {
        ProcessLauncher::new(
            "sh",
            vec!["-c".to_owned(), script.to_owned(), "sh".to_owned()],
        )
    }

    #[test]
    fn command_line_appends_positional_args() {
        let launcher = ProcessLauncher::new("./eval", vec!["--quiet".to_owned()]);
        let invocation = TrialParams::new(4, 1000).invocation(Role::Follower(3));
        assert_eq!(launcher.command_line(&invocation), "./eval --quiet 4 3 1000");
    }

    #[tokio::test]
    async fn leader_output_is_captured() {
        let launcher = sh("echo \"$1/$2/$3\"; echo oops >&2; exit 3");
        let invocation = TrialParams::new(2, 10).invocation(Role::Leader);
        let output = launcher.run_leader(&invocation).await.unwrap();
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout, "2/0/10\n");
        assert_eq!(output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let launcher = ProcessLauncher::new("/nonexistent/cluster-sweep-eval", Vec::new());
        let invocation = TrialParams::new(2, 1).invocation(Role::Leader);
        assert!(launcher.run_leader(&invocation).await.is_err());
        assert!(launcher.spawn_follower(&invocation).is_err());
    }

    #[tokio::test]
    async fn terminate_stops_a_running_follower() {
        let launcher = sh("exec sleep 30");
        let invocation = TrialParams::new(2, 1).invocation(Role::Follower(1));
        let mut follower = launcher.spawn_follower(&invocation).unwrap();
        assert_eq!(follower.rank(), 1);

        let start = Instant::now();
        follower.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(follower.child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn terminate_kills_a_follower_ignoring_sigterm() {
        let launcher = sh("trap '' TERM; while true; do sleep 1; done");
        let invocation = TrialParams::new(2, 1).invocation(Role::Follower(1));
        let mut follower = launcher.spawn_follower(&invocation).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        follower
            .terminate(Duration::from_millis(200))
            .await
            .unwrap();
        assert!(follower.child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn terminate_after_exit_is_fine() {
        let launcher = sh("exit 0");
        let invocation = TrialParams::new(2, 1).invocation(Role::Follower(1));
        let mut follower = launcher.spawn_follower(&invocation).unwrap();
        follower.child.wait().await.unwrap();
        follower.terminate(Duration::from_millis(100)).await.unwrap();
    }
}
