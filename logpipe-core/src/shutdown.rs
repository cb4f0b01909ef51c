use tokio::sync::broadcast;

/// Cooperative shutdown broadcaster shared by every long-running component
/// (IFE listener, worker loop, claim sweep). Each component subscribes for
/// its own receiver and exits at the next checkpoint after `trigger` fires,
/// finishing in-flight work rather than aborting mid-batch (spec §5).
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
