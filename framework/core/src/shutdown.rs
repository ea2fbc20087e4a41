use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver, Sender};
use tokio::sync::Mutex;

/// Broadcasts a single stop signal to every worker and long running task of the reporter.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<()>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
        }
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.sender.send(()) {
            // Nobody subscribed, so there is nothing to stop.
            log::debug!("No listeners for shutdown signal: {e:?}");
        }
    }

    pub fn new_listener(&self) -> ShutdownListener {
        ShutdownListener::new(self.sender.subscribe())
    }
}

/// A cloneable view of the shutdown signal.
///
/// Clones share one receiver, so a signal observed through one clone is observed by all of them.
#[derive(Clone, Debug)]
pub struct ShutdownListener {
    receiver: Arc<Mutex<Receiver<()>>>,
    signalled: Arc<std::sync::atomic::AtomicBool>,
}

impl ShutdownListener {
    pub(crate) fn new(receiver: Receiver<()>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            signalled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Resolves once the signal has been sent, or once the [`ShutdownHandle`] has been dropped.
    ///
    /// Safe to race against other futures with `tokio::select!`.
    pub async fn wait(&self) {
        use std::sync::atomic::Ordering;

        if self.signalled.load(Ordering::Acquire) {
            return;
        }

        let mut guard = self.receiver.lock().await;
        // Another clone may have consumed the signal while this one waited for the lock.
        if self.signalled.load(Ordering::Acquire) {
            return;
        }
        loop {
            match guard.recv().await {
                Ok(()) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => continue,
            }
        }
        self.signalled.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_sees_signal() {
        let handle = ShutdownHandle::new();
        let listener = handle.new_listener();
        let other = listener.clone();

        handle.shutdown();
        listener.wait().await;
        // The clone shares the observed signal.
        tokio::time::timeout(std::time::Duration::from_secs(1), other.wait())
            .await
            .expect("clone should see the signal");
    }

    #[tokio::test]
    async fn dropped_handle_releases_waiters() {
        let handle = ShutdownHandle::new();
        let listener = handle.new_listener();
        drop(handle);

        tokio::time::timeout(std::time::Duration::from_secs(1), listener.wait())
            .await
            .expect("listener should be released when the handle is dropped");
    }
}
