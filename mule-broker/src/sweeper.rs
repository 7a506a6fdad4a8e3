use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::broker::Broker;

/// Background task reclaiming expired leases.
///
/// Runs one sweep per tick; each sweep re-queues every job whose lease has
/// lapsed and wakes all blocked polls when it re-queued anything. Without
/// the sweeper a crashed worker would pin its jobs in `Leased` forever.
pub struct LeaseSweeper {
    broker: Arc<Broker>,
    interval: Duration,
}

impl LeaseSweeper {
    /// Create a sweeper ticking at the broker's configured interval.
    pub fn new(broker: Arc<Broker>) -> Self {
        let interval = broker.config().sweep_interval;
        Self { broker, interval }
    }

    /// Create a sweeper with a custom interval.
    pub fn with_interval(broker: Arc<Broker>, interval: Duration) -> Self {
        Self { broker, interval }
    }

    /// Run the sweep loop until the task is dropped.
    pub async fn start(self) {
        let mut ticker = interval(self.interval);
        info!(interval = ?self.interval, "starting lease sweeper");

        loop {
            ticker.tick().await;

            let requeued = self.broker.sweep_expired();
            if requeued > 0 {
                info!(requeued, "re-queued jobs with expired leases");
            } else {
                debug!("no expired leases found");
            }
        }
    }

    /// Spawn the sweep loop onto the runtime.
    pub fn spawn(broker: Arc<Broker>) -> JoinHandle<()> {
        tokio::spawn(Self::new(broker).start())
    }
}
