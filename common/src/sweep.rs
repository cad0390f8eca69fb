use std::time::Duration;

use eyre::Result;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    grid::{Grid, Pass, Role, TrialParams},
    launcher::{FollowerGroup, Launcher, LeaderOutput},
    readiness::ReadinessWait,
    record::ResultRecord,
};

/// Why an attempt did not produce a measurement. Every variant leads to a retry.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AttemptFailure {
    #[error("leader could not be run: {0}")]
    Launch(String),
    #[error("leader exited with {}", exit_code(.code))]
    Exit { code: Option<i32>, stderr: String },
    #[error("leader did not finish within {0:?}")]
    TimedOut(Duration),
}

fn exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_owned(),
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SweepError {
    #[error("{params} failed {attempts} attempts in a row")]
    AttemptsExhausted { params: TrialParams, attempts: usize },
}

/// Receives the sweep's progress. Only [`SweepObserver::record`] is required.
#[async_trait::async_trait]
pub trait SweepObserver: Send {
    fn trial_started(&mut self, _params: &TrialParams) {}
    fn attempt_failed(
        &mut self,
        _params: &TrialParams,
        _attempt: usize,
        _failure: &AttemptFailure,
    ) {
    }
    /// Called once per grid point with the measurement and the attempts it took
    async fn record(&mut self, record: &ResultRecord, pass: Pass, attempts: usize) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub cooldown: Duration,
    pub termination_grace: Duration,
    pub leader_timeout: Option<Duration>,
    pub max_attempts: Option<usize>,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cooldown: config.cooldown(),
            termination_grace: config.termination_grace(),
            leader_timeout: config.leader_timeout(),
            max_attempts: config.max_attempts,
        }
    }
}

/// Judges a finished leader on its exit status alone. On success the trimmed
/// stdout is the measurement, unparsed.
pub fn judge(output: LeaderOutput) -> Result<String, AttemptFailure> {
    if !output.success() {
        return Err(AttemptFailure::Exit {
            code: output.code,
            stderr: output.stderr,
        });
    }
    Ok(output.stdout.trim().to_owned())
}

pub struct Sweep<L, R> {
    launcher: L,
    readiness: R,
    policy: RetryPolicy,
}

impl<L: Launcher, R: ReadinessWait> Sweep<L, R> {
    pub fn new(launcher: L, readiness: R, policy: RetryPolicy) -> Self {
        Self {
            launcher,
            readiness,
            policy,
        }
    }

    /// Measures every grid point in order, returning the number of records.
    pub async fn run<O: SweepObserver>(&self, grid: &Grid, observer: &mut O) -> Result<usize> {
        let mut completed = 0;
        for (pass, params) in grid.iter_passes() {
            observer.trial_started(&params);
            let (record, attempts) = self.run_trial(&params, observer).await?;
            observer.record(&record, pass, attempts).await?;
            completed += 1;
        }
        info!("Sweep complete, {completed} grid points measured");
        Ok(completed)
    }

    /// Retries one grid point until an attempt succeeds.
    pub async fn run_trial<O: SweepObserver>(
        &self,
        params: &TrialParams,
        observer: &mut O,
    ) -> Result<(ResultRecord, usize)> {
        let mut attempt = 1;
        loop {
            match self.run_attempt(params).await {
                Ok(elapsed) => {
                    debug!("{params} took {elapsed:?} after {attempt} attempt(s)");
                    return Ok((ResultRecord::new(*params, elapsed), attempt));
                }
                Err(failure) => {
                    match &failure {
                        AttemptFailure::Exit { stderr, .. } if !stderr.trim().is_empty() => {
                            warn!("{params} attempt {attempt}: {failure}, stderr: {}", stderr.trim())
                        }
                        _ => warn!("{params} attempt {attempt}: {failure}"),
                    }
                    observer.attempt_failed(params, attempt, &failure);

                    if let Some(max_attempts) = self.policy.max_attempts
                        && attempt >= max_attempts
                    {
                        return Err(SweepError::AttemptsExhausted {
                            params: *params,
                            attempts: attempt,
                        }
                        .into());
                    }
                    sleep(self.policy.cooldown).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One attempt: followers, readiness wait, leader, follower teardown, judgment.
    pub async fn run_attempt(&self, params: &TrialParams) -> Result<String, AttemptFailure> {
        let followers = FollowerGroup::launch(&self.launcher, params);
        self.readiness.wait(params).await;

        let leader = self.run_leader(params).await;
        followers.terminate(self.policy.termination_grace).await;

        judge(leader?)
    }

    async fn run_leader(&self, params: &TrialParams) -> Result<LeaderOutput, AttemptFailure> {
        let invocation = params.invocation(Role::Leader);
        let leader = self.launcher.run_leader(&invocation);
        let output = match self.policy.leader_timeout {
            Some(limit) => timeout(limit, leader)
                .await
                .map_err(|_| AttemptFailure::TimedOut(limit))?,
            None => leader.await,
        };
        output.map_err(|err| AttemptFailure::Launch(format!("{err:#}")))
    }
}
