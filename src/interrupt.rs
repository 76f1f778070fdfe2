//! Ctrl-C handling shared between the signal listener and running statements

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{ShellError, ShellResult};

#[derive(Debug, Default)]
struct Inner {
    fired: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation flag
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.inner.fired.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.inner.fired.store(false, Ordering::SeqCst);
    }

    /// Resolves once [`Interrupt::fire`] has been called
    pub async fn fired(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }

    /// Run `fut`, giving up with [`ShellError::Cancelled`] if the interrupt fires first
    pub async fn guard<T, F>(&self, fut: F) -> ShellResult<T>
    where
        F: Future<Output = ShellResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.fired() => Err(ShellError::Cancelled),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_passes_result_through() {
        let interrupt = Interrupt::new();
        let value = interrupt.guard(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_guard_cancels_pending_work() {
        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.fire();
        });

        let result: ShellResult<()> = interrupt
            .guard(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ShellError::Cancelled)));
    }

    #[tokio::test]
    async fn test_reset_clears_flag() {
        let interrupt = Interrupt::new();
        interrupt.fire();
        assert!(interrupt.is_fired());
        assert!(interrupt.guard(async { Ok(()) }).await.is_err());

        interrupt.reset();
        assert!(!interrupt.is_fired());
        assert!(interrupt.guard(async { Ok(()) }).await.is_ok());
    }
}
