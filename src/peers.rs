//! Peer routing and transport interfaces
//!
//! The cache core never talks to the network itself. It consumes two
//! capabilities: a [`PeerPicker`] that maps a key to its authoritative
//! owner, and per-peer [`PeerClient`]s that carry typed requests to that
//! owner. Transport implementations (HTTP, gRPC, in-process fakes) live
//! outside the crate and implement these traits.
//!
//! Wire shapes are plain serde structs; expiry travels as Unix nanoseconds
//! with zero meaning "never expires".

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Request for a value from the owning peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    pub group: String,
    pub key: String,
}

/// Response carrying a value and its expiry (Unix nanoseconds, 0 = none).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    pub value: Vec<u8>,
    pub expire_unix_nanos: i64,
}

/// Request to store a value on the owning peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRequest {
    pub group: String,
    pub key: String,
    pub value: Vec<u8>,
    pub expire_unix_nanos: i64,
}

/// Request to purge a key from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub group: String,
    pub key: String,
}

/// Convert an optional absolute expiry to wire nanoseconds. Times before
/// the epoch collapse to "never".
pub fn expire_to_unix_nanos(expire: Option<SystemTime>) -> i64 {
    expire
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Convert wire nanoseconds back to an optional absolute expiry.
pub fn expire_from_unix_nanos(nanos: i64) -> Option<SystemTime> {
    if nanos <= 0 {
        None
    } else {
        Some(UNIX_EPOCH + Duration::from_nanos(nanos as u64))
    }
}

/// A client for one remote peer.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Fetch a value from the peer's cache or loader.
    async fn get(&self, ctx: &CancellationToken, req: &GetRequest) -> Result<GetResponse>;

    /// Store a value on the peer.
    async fn set(&self, ctx: &CancellationToken, req: &SetRequest) -> Result<()>;

    /// Purge a key from the peer's caches.
    async fn remove(&self, ctx: &CancellationToken, req: &RemoveRequest) -> Result<()>;

    /// The peer's address, used to identify it within a picker's peer set.
    fn url(&self) -> &str;
}

/// Routes keys to their authoritative peers.
pub trait PeerPicker: Send + Sync {
    /// The owner of `key` when it is a remote peer; `None` when this
    /// process is the owner.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerClient>>;

    /// Every known remote peer, for broadcast operations.
    fn all_peers(&self) -> Vec<Arc<dyn PeerClient>>;
}

/// A picker with no peers: every key is owned locally.
pub struct NoPeers;

impl PeerPicker for NoPeers {
    fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerClient>> {
        None
    }

    fn all_peers(&self) -> Vec<Arc<dyn PeerClient>> {
        Vec::new()
    }
}

/// Check that `addr` looks like `host:port` where host is `localhost` or a
/// dotted quad.
pub fn valid_peer_addr(addr: &str) -> bool {
    let Some((host, port)) = addr.split_once(':') else {
        return false;
    };
    if port.is_empty() || port.parse::<u16>().is_err() {
        return false;
    }
    if host == "localhost" {
        return true;
    }
    let octets: Vec<&str> = host.split('.').collect();
    octets.len() == 4 && octets.iter().all(|o| !o.is_empty())
}
