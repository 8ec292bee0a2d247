use std::time::Duration;
use tokio::sync::watch;

use crate::error::LookupError;

/// Flips the paired [`CancelSignal`]s.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Checked by the pipeline between network waits.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelSignal {
    /// A signal nobody can fire.
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn is_canceled(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn check(&self) -> Result<(), LookupError> {
        if self.is_canceled() {
            Err(LookupError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `delay` unless cancellation arrives first.
    pub async fn sleep(&self, delay: Duration) -> Result<(), LookupError> {
        let mut rx = self.rx.clone();

        tokio::select! {
            () = tokio::time::sleep(delay) => self.check(),
            () = wait_for_cancel(&mut rx) => Err(LookupError::Canceled),
        }
    }

    /// Drives `work` until it finishes or cancellation arrives. On cancel the
    /// work future is dropped mid-flight, retries and backoff sleeps included.
    pub async fn race<T, E>(
        &self,
        work: impl Future<Output = Result<T, E>>,
    ) -> Result<T, LookupError>
    where
        LookupError: From<E>,
    {
        self.check()?;
        let mut rx = self.rx.clone();

        tokio::select! {
            biased;
            () = wait_for_cancel(&mut rx) => Err(LookupError::Canceled),
            result = work => result.map_err(LookupError::from),
        }
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    // Dropped handle: cancellation can no longer happen.
    if rx.wait_for(|canceled| *canceled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
