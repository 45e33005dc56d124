use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Trailing-edge debouncer.
///
/// Every call restarts the quiescence window; when the window elapses the
/// handler runs once with the value of the last call. Earlier values in the
/// burst are discarded.
#[derive(Clone, Copy, Debug)]
pub struct Debouncer {
    window: Duration,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wrap `handler`. Must be called inside a Tokio runtime.
    pub fn wrap<T, F>(&self, handler: F) -> DebouncedHandler<T>
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(debounce_loop(
            self.window,
            rx,
            cancel.clone(),
            handler,
        ));
        DebouncedHandler { tx, cancel }
    }
}

async fn debounce_loop<T, F>(
    window: Duration,
    mut rx: mpsc::UnboundedReceiver<T>,
    cancel: CancellationToken,
    handler: F,
) where
    T: Send + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    loop {
        let mut latest = tokio::select! {
            _ = cancel.cancelled() => return,
            msg = rx.recv() => match msg {
                Some(value) => value,
                None => return,
            },
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                res = timeout(window, rx.recv()) => match res {
                    Ok(Some(value)) => latest = value,
                    // Every handle is gone; nothing may fire after teardown.
                    Ok(None) => return,
                    Err(_) => {
                        handler(latest);
                        break;
                    }
                },
            }
        }
    }
}

/// Handle returned by [`Debouncer::wrap`]. Cheap to clone; all clones feed
/// the same window.
pub struct DebouncedHandler<T> {
    tx: mpsc::UnboundedSender<T>,
    cancel: CancellationToken,
}

impl<T> Clone for DebouncedHandler<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> fmt::Debug for DebouncedHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebouncedHandler")
            .field("closed", &self.tx.is_closed())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl<T> DebouncedHandler<T> {
    pub fn call(&self, value: T) {
        // Send only fails once the loop has exited, i.e. after cancel.
        let _ = self.tx.send(value);
    }

    /// Drop any pending value and stop the timer for good.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Instant, sleep};

    #[tokio::test(start_paused = true)]
    async fn burst_fires_once_with_last_value() {
        let start = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let debounced = Debouncer::new(Duration::from_millis(50)).wrap(move |value: u32| {
            let _ = tx.send((value, Instant::now()));
        });

        debounced.call(1);
        sleep(Duration::from_millis(10)).await;
        debounced.call(2);
        sleep(Duration::from_millis(5)).await;
        debounced.call(3);

        let (value, fired_at) = rx.recv().await.unwrap();
        assert_eq!(value, 3);
        let elapsed = fired_at - start;
        assert!(elapsed >= Duration::from_millis(65), "fired early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(70), "fired late: {elapsed:?}");

        sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn separated_calls_fire_separately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let debounced = Debouncer::new(Duration::from_millis(50)).wrap(move |value: u32| {
            let _ = tx.send(value);
        });

        debounced.call(1);
        sleep(Duration::from_millis(100)).await;
        debounced.call(2);
        sleep(Duration::from_millis(100)).await;

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_pending_call() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let debounced = Debouncer::new(Duration::from_millis(50)).wrap(move |value: u32| {
            let _ = tx.send(value);
        });

        debounced.call(1);
        sleep(Duration::from_millis(10)).await;
        debounced.cancel();
        sleep(Duration::from_millis(200)).await;

        // The loop exited and dropped the handler, closing the channel.
        assert_eq!(rx.recv().await, None);
    }
}
