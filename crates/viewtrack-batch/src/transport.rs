// Best-effort delivery used when the process is going away.
//
// Handing off a beacon gives no delivery confirmation. Callers write the
// batch back to local storage whenever the hand-off is not accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Largest payload a beacon will carry.
pub const MAX_BEACON_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconStatus {
    /// Handed off; delivery is not confirmed.
    Accepted,
    /// No transport available right now.
    Unavailable,
}

#[async_trait]
pub trait UnloadTransport: Send + Sync {
    /// Hand a JSON event array off without waiting for delivery.
    fn send_best_effort(&self, payload: Bytes) -> Result<BeaconStatus, TransportError>;

    /// Give accepted hand-offs up to `timeout` to leave the process.
    async fn wait_idle(&self, _timeout: Duration) {}
}

/// Always unavailable; unload batches are written back locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTransport;

#[async_trait]
impl UnloadTransport for DisabledTransport {
    fn send_best_effort(&self, _payload: Bytes) -> Result<BeaconStatus, TransportError> {
        Ok(BeaconStatus::Unavailable)
    }
}

/// POSTs the payload to a beacon endpoint on the current tokio runtime.
pub struct HttpBeaconTransport {
    client: reqwest::Client,
    url: String,
    handoffs: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl HttpBeaconTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            handoffs: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl UnloadTransport for HttpBeaconTransport {
    fn send_best_effort(&self, payload: Bytes) -> Result<BeaconStatus, TransportError> {
        if payload.len() > MAX_BEACON_BYTES {
            return Err(TransportError::payload_too_large(
                payload.len(),
                MAX_BEACON_BYTES,
            ));
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return Ok(BeaconStatus::Unavailable),
        };

        let request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);
        let url = self.url.clone();

        let task = handle.spawn(async move {
            match request.send().await {
                Ok(response) => {
                    debug!(url = %url, status = %response.status(), "Beacon delivered")
                }
                Err(err) => warn!(url = %url, error = %err, "Beacon delivery failed"),
            }
        });

        let mut handoffs = self.handoffs.lock();
        handoffs.retain(|task| !task.is_finished());
        handoffs.push(task);
        Ok(BeaconStatus::Accepted)
    }

    async fn wait_idle(&self, timeout: Duration) {
        let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handoffs.lock());
        if pending.is_empty() {
            return;
        }
        let all = futures::future::join_all(pending);
        if tokio::time::timeout(timeout, all).await.is_err() {
            warn!(?timeout, "Beacon hand-offs still running at shutdown");
        }
    }
}
