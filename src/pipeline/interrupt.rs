//! User interrupt plumbing.
//!
//! The signal handler only flips a flag; the stage runner and the collector
//! decide at safe points what to persist before stopping.

use tokio::sync::watch;
use tracing::warn;

/// Observes whether the run has been interrupted. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

/// Fires the paired [`Interrupt`].
#[derive(Debug)]
pub struct InterruptTrigger {
    tx: watch::Sender<bool>,
}

impl Interrupt {
    /// Create a linked trigger/observer pair.
    pub fn pair() -> (InterruptTrigger, Interrupt) {
        let (tx, rx) = watch::channel(false);
        (InterruptTrigger { tx }, Interrupt { rx })
    }

    /// An interrupt that never fires.
    pub fn never() -> Self {
        Self::pair().1
    }

    /// Fire on Ctrl+C. A second Ctrl+C exits immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_ctrl_c() -> Self {
        let (trigger, interrupt) = Self::pair();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("Could not install Ctrl+C handler; interrupts will not be checkpointed");
                return;
            }
            warn!("Interrupt received, saving progress (press Ctrl+C again to exit immediately)");
            trigger.trigger();

            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
        interrupt
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the interrupt fires; pends forever if it never can.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl InterruptTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiter() {
        let (trigger, interrupt) = Interrupt::pair();
        assert!(!interrupt.is_triggered());

        let waiter = {
            let interrupt = interrupt.clone();
            tokio::spawn(async move { interrupt.triggered().await })
        };
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        assert!(interrupt.is_triggered());
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let interrupt = Interrupt::never();
        assert!(!interrupt.is_triggered());
        let waited = tokio::time::timeout(Duration::from_millis(20), interrupt.triggered()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_triggered_after_sender_dropped_still_resolves() {
        let (trigger, interrupt) = Interrupt::pair();
        trigger.trigger();
        drop(trigger);
        tokio::time::timeout(Duration::from_millis(100), interrupt.triggered())
            .await
            .expect("already fired");
    }
}
