//! Helpers for constructing and reading Qdrant chunk payloads.
//!
//! A payload is the chunk's flat metadata plus the chunk text under `contents`.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::vector_store::{ChunkRecord, VectorRecord};

const CONTENTS_KEY: &str = "contents";

/// Build the payload stored alongside an embedded chunk.
pub(crate) fn build_payload(record: &VectorRecord) -> Map<String, Value> {
    let mut payload = record.metadata.clone();
    payload.insert(
        CONTENTS_KEY.into(),
        Value::String(record.contents.clone()),
    );
    payload
}

/// Split a stored payload back into a [`ChunkRecord`].
pub(crate) fn chunk_from_payload(
    id: String,
    mut payload: Map<String, Value>,
    distance: Option<f32>,
) -> ChunkRecord {
    let contents = match payload.remove(CONTENTS_KEY) {
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    ChunkRecord {
        id,
        metadata: payload,
        contents,
        distance,
    }
}

/// Compute a deterministic hash for chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a new point identifier.
pub(crate) fn generate_point_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_round_trips_contents_and_metadata() {
        let record = VectorRecord {
            contents: "Net 30 payment terms".into(),
            vector: vec![0.1],
            metadata: json!({ "document_id": "abc", "chunk_index": 0 })
                .as_object()
                .cloned()
                .expect("object"),
        };

        let payload = build_payload(&record);
        assert_eq!(payload["contents"], json!("Net 30 payment terms"));
        assert_eq!(payload["document_id"], json!("abc"));

        let chunk = chunk_from_payload("p-1".into(), payload, Some(0.25));
        assert_eq!(chunk.contents, "Net 30 payment terms");
        assert!(!chunk.metadata.contains_key("contents"));
        assert_eq!(chunk.document_id(), Some("abc"));
        assert_eq!(chunk.distance, Some(0.25));
    }

    #[test]
    fn compute_chunk_hash_is_stable() {
        let first = compute_chunk_hash("hello world");
        assert_eq!(first, compute_chunk_hash("hello world"));
        assert_ne!(first, compute_chunk_hash("hello world!"));
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn generate_point_id_yields_unique_uuids() {
        let first = generate_point_id();
        let second = generate_point_id();
        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }
}
