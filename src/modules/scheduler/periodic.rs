use crate::modules::{common::signal::SIGNAL_MANAGER, error::MailTrailResult};
use std::{future::Future, time::Duration};
use tracing::{info, warn};

/// Named recurring job on a fixed-interval ticker. A failed round is logged
/// and the ticker keeps going; the loop exits when the process-wide shutdown
/// broadcast fires.
pub struct PeriodicTask {
    name: String,
}

impl PeriodicTask {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }

    pub fn start<F, T>(self, task: T, interval: Duration) -> tokio::task::JoinHandle<()>
    where
        T: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = MailTrailResult<()>> + Send + 'static,
    {
        info!("Task '{}' started", &self.name);
        let name = self.name;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            let mut shutdown = SIGNAL_MANAGER.subscribe();

            interval.tick().await; // discard first immediate tick

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = task().await {
                            warn!("Task '{}' failed: {:?}", name, e);
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Task '{}' shutting down due to shutdown signal", name);
                        break;
                    }
                }
            }

            info!("Task '{}' stopped", name);
        })
    }
}
