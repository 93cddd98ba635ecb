use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QakkaError;
use crate::queue_service::QueueService;
use crate::types::{QueueName, Region};

/// The unit forwarded between regions: everything the destination needs to
/// perform the local write. The payload body is not carried — the body table
/// is replicated by the database layer, not by this transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEnvelope {
    pub queue: QueueName,
    pub source_region: Region,
    pub dest_region: Region,
    pub message_id: Uuid,
    pub delay_ms: Option<u64>,
    pub expiration_secs: Option<u64>,
}

/// Message-forwarding sink toward a peer region.
///
/// Delivery is at-least-once from the producer's point of view: a send either
/// reaches the peer's local write path or the producer sees the error. The
/// wire layer behind this trait is an external collaborator.
#[async_trait]
pub trait RegionTransport: Send + Sync {
    /// Forward a send to its destination region's write path.
    async fn forward_send(&self, envelope: &SendEnvelope) -> Result<(), QakkaError>;
}

/// Transport connecting regions hosted in the same process, used by tests
/// and single-process multi-region setups. Envelopes still round-trip
/// through the msgpack encoding a real wire would carry.
#[derive(Default)]
pub struct InProcessTransport {
    peers: DashMap<Region, Arc<QueueService>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the service handling a region. Last registration wins.
    pub fn register(&self, region: Region, service: Arc<QueueService>) {
        self.peers.insert(region, service);
    }
}

#[async_trait]
impl RegionTransport for InProcessTransport {
    async fn forward_send(&self, envelope: &SendEnvelope) -> Result<(), QakkaError> {
        let encoded = rmp_serde::to_vec(envelope).map_err(|e| QakkaError::MalformedEnvelope {
            reason: format!("encode failed: {e}"),
            source: Some(Box::new(e)),
        })?;
        let decoded: SendEnvelope =
            rmp_serde::from_slice(&encoded).map_err(|e| QakkaError::MalformedEnvelope {
                reason: format!("decode failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let peer = self
            .peers
            .get(&decoded.dest_region)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| QakkaError::RegionUnknown {
                region: decoded.dest_region.clone(),
            })?;
        peer.receive_send(decoded).await
    }
}
