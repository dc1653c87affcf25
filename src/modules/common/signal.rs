use std::sync::LazyLock;

use crate::modules::{
    context::Initialize, error::MailTrailResult, utils::shutdown::shutdown_signal,
};
use tokio::sync::broadcast;

pub static SIGNAL_MANAGER: LazyLock<SignalManager> = LazyLock::new(SignalManager::new);

/// Fans the process shutdown signal out to every long-lived loop: the HTTP
/// server and the periodic reconciliation tasks each hold a receiver.
pub struct SignalManager {
    sender: broadcast::Sender<()>,
}

impl SignalManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        SignalManager { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

impl Initialize for SignalManager {
    async fn initialize() -> MailTrailResult<()> {
        tokio::spawn(async move {
            shutdown_signal().await;
            println!("\nShutdown requested, stopping background tasks...");
            let _ = SIGNAL_MANAGER.sender.send(());
        });
        Ok(())
    }
}
