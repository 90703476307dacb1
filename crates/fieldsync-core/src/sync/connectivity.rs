//! Online/offline tracking.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::transport::TransportError;

/// Shared online flag; cloning yields another handle to the same state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Update the flag; returns whether it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                tracing::info!("Connectivity restored");
            } else {
                tracing::info!("Connectivity lost");
            }
        }
        changed
    }

    /// Listen for transitions; dropping the subscription unsubscribes.
    pub fn subscribe(&self) -> ConnectivitySubscription {
        ConnectivitySubscription {
            rx: self.state.subscribe(),
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

pub struct ConnectivitySubscription {
    rx: watch::Receiver<bool>,
}

impl ConnectivitySubscription {
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next change that leaves the device online.
    ///
    /// Returns `false` once every monitor handle has been dropped.
    pub async fn went_online(&mut self) -> bool {
        loop {
            if self.rx.changed().await.is_err() {
                return false;
            }
            if *self.rx.borrow_and_update() {
                return true;
            }
        }
    }
}

/// Polls a health endpoint and feeds the result into a `ConnectivityMonitor`.
pub struct HttpProbe {
    url: String,
    interval: Duration,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(
        url: impl Into<String>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| TransportError::Network(error.to_string()))?;
        Ok(Self {
            url: url.into(),
            interval,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One health check: any 2xx reply counts as online.
    pub async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!("Health probe to {} failed: {error}", self.url);
                false
            }
        }
    }

    /// Probe every `interval` until `shutdown` resolves.
    pub async fn run(&self, monitor: &ConnectivityMonitor, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => return,
                _ = ticker.tick() => {
                    let online = self.check().await;
                    monitor.set_online(online);
                }
            }
        }
    }
}
