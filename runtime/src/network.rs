//! Connectivity tracking.
//!
//! The host reports connectivity changes through [`ConnectivityMonitor`].
//! Hosts without a platform API can run a [`TcpProbe`] instead.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Current connectivity plus change notifications.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor {
    pub fn new(connected: bool) -> Self {
        let (tx, _) = watch::channel(connected);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Point-in-time check.
    pub fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    /// Record the current connectivity. Subscribers only hear about changes.
    pub fn set_connected(&self, connected: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
        if changed {
            tracing::info!(connected, "connectivity changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Run `callback` on every change until the returned handle is dropped.
    ///
    /// Must be called inside a tokio runtime.
    pub fn on_change<F, Fut>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.subscribe();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let connected = *rx.borrow_and_update();
                callback(connected).await;
            }
        });
        Subscription { task: Some(task) }
    }
}

/// Handle returned by [`ConnectivityMonitor::on_change`].
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Periodic TCP reachability check.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    interval: Duration,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            interval,
            timeout,
        }
    }

    /// Whether a connection can be opened within the timeout.
    pub async fn check(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::trace!(addr = %self.addr, error = %e, "probe failed");
                false
            }
            Err(_) => {
                tracing::trace!(addr = %self.addr, "probe timed out");
                false
            }
        }
    }

    /// Feed probe results into `monitor` until the task is aborted.
    pub fn spawn(self, monitor: ConnectivityMonitor) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                monitor.set_connected(self.check().await);
            }
        })
    }
}
