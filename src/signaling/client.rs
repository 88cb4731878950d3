//! Room-level signaling operations
//!
//! One document per room holds the offer and the answer; ICE candidates
//! are appended to the room's `ice_candidates` sub-collection. Either side
//! watches the fields it is waiting for.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::document::{child_path, Document, DocumentStore, Subscription};
use super::types::{CandidateRecord, IceCandidate, Room, RoomStatus, SdpType, SessionDescription};
use crate::error::{AppError, Result};

/// Sub-collection holding candidate records
pub const CANDIDATES_COLLECTION: &str = "ice_candidates";

/// Default buffer per subscription
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// A stored candidate with its document id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCandidate {
    pub id: String,
    pub record: CandidateRecord,
}

/// Signaling client over any [`DocumentStore`]
pub struct SignalingClient {
    store: Arc<dyn DocumentStore>,
    collection: String,
    channel_capacity: usize,
}

impl SignalingClient {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Backend name for logs and status
    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    fn room_path(&self, room_id: &str) -> String {
        child_path(&self.collection, room_id)
    }

    fn candidates_path(&self, room_id: &str) -> String {
        child_path(&self.room_path(room_id), CANDIDATES_COLLECTION)
    }

    /// Create the room in `waiting` status, replacing any previous contents
    pub async fn create_room(&self, room_id: &str) -> Result<()> {
        let doc = to_document(&Room::waiting())?;
        self.store.set(&self.room_path(room_id), doc).await?;
        info!(room_id, "Created signaling room");
        Ok(())
    }

    pub async fn write_offer(&self, room_id: &str, sdp: &str, from: &str) -> Result<()> {
        self.write_description(room_id, SdpType::Offer, sdp, from)
            .await
    }

    pub async fn write_answer(&self, room_id: &str, sdp: &str, from: &str) -> Result<()> {
        self.write_description(room_id, SdpType::Answer, sdp, from)
            .await
    }

    async fn write_description(
        &self,
        room_id: &str,
        sdp_type: SdpType,
        sdp: &str,
        from: &str,
    ) -> Result<()> {
        let description = SessionDescription::new(sdp_type, sdp, from);
        let (field, status) = match sdp_type {
            SdpType::Offer => ("offer", RoomStatus::OfferSent),
            SdpType::Answer => ("answer", RoomStatus::AnswerSent),
        };

        let mut fields = Document::new();
        fields.insert(field.to_string(), serde_json::to_value(&description)?);
        fields.insert("status".to_string(), serde_json::to_value(status)?);

        match self.store.update(&self.room_path(room_id), fields).await {
            Ok(()) => {
                debug!(room_id, device_id = from, "Wrote {}", field);
                Ok(())
            }
            Err(AppError::DocumentNotFound(_)) => Err(AppError::RoomNotFound(room_id.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Append a candidate record, returns its document id
    pub async fn add_ice_candidate(
        &self,
        room_id: &str,
        candidate: &IceCandidate,
        from: &str,
    ) -> Result<String> {
        let record = CandidateRecord::new(candidate.clone(), from);
        let id = self
            .store
            .add(&self.candidates_path(room_id), to_document(&record)?)
            .await?;
        debug!(room_id, device_id = from, candidate_id = %id, "Added ICE candidate");
        Ok(id)
    }

    pub async fn get_room(&self, room_id: &str) -> Result<Option<Room>> {
        match self.store.get(&self.room_path(room_id)).await? {
            Some(doc) => Ok(Some(from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// Room status, None when the room does not exist
    pub async fn room_status(&self, room_id: &str) -> Result<Option<RoomStatus>> {
        Ok(self.get_room(room_id).await?.map(|room| room.status))
    }

    pub async fn get_offer(&self, room_id: &str) -> Result<Option<SessionDescription>> {
        Ok(self.get_room(room_id).await?.and_then(|room| room.offer))
    }

    /// Candidates in a room not written by `exclude_from`
    pub async fn list_ice_candidates(
        &self,
        room_id: &str,
        exclude_from: Option<&str>,
    ) -> Result<Vec<StoredCandidate>> {
        let docs = self.store.list(&self.candidates_path(room_id)).await?;
        let mut out = Vec::with_capacity(docs.len());
        for (id, doc) in docs {
            match from_document::<CandidateRecord>(doc) {
                Ok(record) if Some(record.from.as_str()) != exclude_from => {
                    out.push(StoredCandidate { id, record })
                }
                Ok(_) => {}
                Err(e) => warn!(room_id, candidate_id = %id, "Skipping malformed candidate: {}", e),
            }
        }
        Ok(out)
    }

    /// Fires each time the room's offer goes from null to non-null
    pub async fn subscribe_offer(&self, room_id: &str) -> Result<Subscription<SessionDescription>> {
        self.subscribe_description(room_id, "offer").await
    }

    /// Fires each time the room's answer goes from null to non-null
    pub async fn subscribe_answer(&self, room_id: &str) -> Result<Subscription<SessionDescription>> {
        self.subscribe_description(room_id, "answer").await
    }

    async fn subscribe_description(
        &self,
        room_id: &str,
        field: &'static str,
    ) -> Result<Subscription<SessionDescription>> {
        let watch = self
            .store
            .watch_document(&self.room_path(room_id), self.channel_capacity)
            .await?;

        let room_id = room_id.to_string();
        let mut was_set = false;
        Ok(watch.filter_map(self.channel_capacity, move |doc| {
            let value = doc.as_ref().and_then(|d| d.get(field)).filter(|v| !v.is_null());
            let Some(value) = value else {
                was_set = false;
                return None;
            };
            if was_set {
                return None;
            }
            match serde_json::from_value::<SessionDescription>(value.clone()) {
                Ok(description) => {
                    was_set = true;
                    Some(description)
                }
                Err(e) => {
                    warn!(room_id = %room_id, "Ignoring malformed {}: {}", field, e);
                    None
                }
            }
        }))
    }

    /// Fires once per appended candidate whose `from` differs from `from_device`
    pub async fn subscribe_ice_candidates(
        &self,
        room_id: &str,
        from_device: &str,
    ) -> Result<Subscription<IceCandidate>> {
        let watch = self
            .store
            .watch_collection(&self.candidates_path(room_id), self.channel_capacity)
            .await?;

        let room_id = room_id.to_string();
        let from_device = from_device.to_string();
        Ok(watch.filter_map(self.channel_capacity, move |(id, doc)| {
            match from_document::<CandidateRecord>(doc) {
                Ok(record) if record.from != from_device => Some(record.candidate),
                Ok(_) => None,
                Err(e) => {
                    warn!(room_id = %room_id, candidate_id = %id, "Ignoring malformed candidate: {}", e);
                    None
                }
            }
        }))
    }

    /// Delete all candidate records, then the room document
    ///
    /// Not transactional: a failure part way leaves the remaining records.
    pub async fn cleanup_room(&self, room_id: &str) -> Result<()> {
        let candidates_path = self.candidates_path(room_id);
        let candidates = self.store.list(&candidates_path).await?;
        let count = candidates.len();
        for (id, _) in candidates {
            self.store.delete(&child_path(&candidates_path, &id)).await?;
        }
        self.store.delete(&self.room_path(room_id)).await?;
        info!(room_id, candidates = count, "Cleaned up signaling room");
        Ok(())
    }
}

fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Internal(format!(
            "Expected a JSON object, got {}",
            other
        ))),
    }
}

fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Parse a viewer-supplied answer: either a bare SDP string or `{sdp, type}`
pub fn sdp_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(sdp) => Some(sdp.clone()),
        Value::Object(map) => map.get("sdp").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
