//! WebRTC signaling through a shared document store
//!
//! The sender creates a room, writes its offer and watches for the answer;
//! both sides append ICE candidates to the room and watch the other side's.
//!
//! # Architecture
//!
//! ```text
//! LifecycleManager / HTTP handlers
//!        |
//!        v
//! SignalingClient  (rooms, offers, answers, candidates)
//!        |
//!        v
//! dyn DocumentStore
//!   |- MemoryDocumentStore     (in-process, broadcast notifications)
//!   |- FirestoreDocumentStore  (REST, polling watches)
//! ```

pub mod client;
pub mod document;
pub mod firestore;
pub mod memory;
pub mod types;

use std::sync::Arc;

pub use client::{sdp_from_value, SignalingClient, StoredCandidate};
pub use document::{Document, DocumentStore, Subscription};
pub use firestore::FirestoreDocumentStore;
pub use memory::MemoryDocumentStore;
pub use types::{CandidateRecord, IceCandidate, Room, RoomStatus, SdpType, SessionDescription};

use crate::config::{SignalingBackend, SignalingConfig};
use crate::error::Result;

/// Build the document store selected by configuration
pub async fn open_store(config: &SignalingConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        SignalingBackend::Memory => Ok(Arc::new(MemoryDocumentStore::new())),
        SignalingBackend::Firestore => Ok(Arc::new(
            FirestoreDocumentStore::from_config(config).await?,
        )),
    }
}

/// Build a signaling client from configuration
pub async fn open_client(config: &SignalingConfig) -> Result<SignalingClient> {
    let store = open_store(config).await?;
    Ok(SignalingClient::new(store, config.collection.clone())
        .with_channel_capacity(config.channel_capacity))
}
