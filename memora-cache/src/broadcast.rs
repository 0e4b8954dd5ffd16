//! Best-effort invalidation fan-out to sibling processes over UDP.
//!
//! Every local clear is mirrored as one JSON datagram:
//!
//! ```json
//! {"action":"clear","key":"User.findAll:{}"}
//! {"action":"clearTag","tag":"User"}
//! ```
//!
//! Delivery and ordering are not guaranteed. A lost message leaves a peer
//! stale until the entry's TTL runs out.

use crate::config::BroadcastConfig;
use crate::error::{CacheError, CacheResult};
use memora_log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Largest datagram the listener accepts.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Pause after the first failed receive; doubles per consecutive failure.
const RECV_RETRY_BASE: Duration = Duration::from_millis(50);

/// Longest pause between failed receives.
const RECV_RETRY_MAX: Duration = Duration::from_secs(5);

fn recv_retry_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    RECV_RETRY_BASE
        .saturating_mul(1 << exponent)
        .min(RECV_RETRY_MAX)
}

/// An invalidation exchanged between processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum BroadcastMessage {
    /// Clear one key
    Clear { key: String },
    /// Clear every entry tagged with `tag`
    ClearTag { tag: String },
}

impl BroadcastMessage {
    pub fn clear(key: impl Into<String>) -> Self {
        Self::Clear { key: key.into() }
    }

    pub fn clear_tag(tag: impl Into<String>) -> Self {
        Self::ClearTag { tag: tag.into() }
    }

    /// Encode as a datagram body.
    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Decode a datagram body.
    pub fn decode(datagram: &[u8]) -> CacheResult<Self> {
        serde_json::from_slice(datagram).map_err(|e| CacheError::Deserialization(e.to_string()))
    }
}

/// One UDP socket used both to send and to receive invalidations.
pub struct Broadcaster {
    socket: Arc<UdpSocket>,
    destination: SocketAddr,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Broadcaster {
    /// Bind the listen address and enable broadcast sends.
    pub async fn bind(config: &BroadcastConfig) -> CacheResult<Self> {
        let socket = UdpSocket::bind(config.listen_addr())
            .await
            .map_err(|e| CacheError::Broadcast(format!("bind {}: {}", config.listen_addr(), e)))?;
        socket
            .set_broadcast(true)
            .map_err(|e| CacheError::Broadcast(e.to_string()))?;

        let local = socket.local_addr()?;
        info!(
            "Cache broadcast listening on {}, sending to {}",
            local,
            config.destination()
        );

        Ok(Self {
            socket: Arc::new(socket),
            destination: config.destination(),
            listener: Mutex::new(None),
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> CacheResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Where messages are sent.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Send one message.
    pub async fn send(&self, message: &BroadcastMessage) -> CacheResult<()> {
        let datagram = message.encode()?;
        self.socket
            .send_to(&datagram, self.destination)
            .await
            .map_err(|e| CacheError::Broadcast(format!("send to {}: {}", self.destination, e)))?;
        Ok(())
    }

    /// Start handing received messages to `on_message`.
    ///
    /// Malformed datagrams are logged and dropped. The listener stops when
    /// `on_message` returns `false`, on [`shutdown`](Self::shutdown), or when
    /// the broadcaster is dropped. Calling this again replaces the listener.
    pub fn listen<F, Fut>(&self, on_message: F)
    where
        F: Fn(BroadcastMessage) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let socket = self.socket.clone();

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let mut failures = 0u32;
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => {
                        failures = 0;
                        received
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        let delay = recv_retry_delay(failures);
                        warn!("Broadcast receive failed, retrying in {:?}: {}", delay, e);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };

                let message = match BroadcastMessage::decode(&buf[..len]) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Discarding malformed broadcast from {}: {}", from, e);
                        continue;
                    }
                };

                debug!("Received broadcast {:?} from {}", message, from);
                if !on_message(message).await {
                    break;
                }
            }
            debug!("Broadcast listener stopped");
        });

        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Whether a listener task is running.
    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the listener. Sending keeps working.
    pub fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
            info!("Cache broadcast listener shut down");
        }
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}
