//! Interruption signal for callers blocked on the orchestrator.

use tokio::sync::watch;

/// Transmitter side of the interruption channel.
///
/// Every call to [`InterruptTx::interrupt`] wakes all receivers that are currently waiting.
/// Receivers subscribed after an interruption do not observe it.
#[derive(Debug, Clone)]
pub struct InterruptTx(watch::Sender<()>);

impl InterruptTx {
    /// Wraps a watch sender into an [`InterruptTx`].
    pub fn new(tx: watch::Sender<()>) -> Self {
        Self(tx)
    }

    /// Interrupts all subscribed waiters.
    pub fn interrupt(&self) {
        // Infallible so interrupting with nobody waiting is a no-op.
        self.0.send_replace(());
    }

    /// Creates a new receiver that only observes future interruptions.
    pub fn subscribe(&self) -> InterruptRx {
        self.0.subscribe()
    }
}

/// Receiver side of the interruption channel.
pub type InterruptRx = watch::Receiver<()>;

/// Creates a new interruption channel.
pub fn create_interrupt_channel() -> (InterruptTx, InterruptRx) {
    let (tx, rx) = watch::channel(());
    (InterruptTx::new(tx), rx)
}
