use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::grid::TrialParams;

/// Decides when the followers of an attempt are ready for the leader.
#[async_trait::async_trait]
pub trait ReadinessWait: Send + Sync {
    async fn wait(&self, params: &TrialParams);
}

/// Sleeps a fixed, empirically chosen delay. There is no handshake with the
/// followers, so a slow follower can still miss the leader.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

#[async_trait::async_trait]
impl ReadinessWait for FixedDelay {
    async fn wait(&self, params: &TrialParams) {
        debug!("Waiting {:?} for followers of {params}", self.0);
        if !self.0.is_zero() {
            sleep(self.0).await;
        }
    }
}
