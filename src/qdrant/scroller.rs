//! Paged scroll over the chunks stored in a collection.

use async_stream::try_stream;
use futures_core::Stream;
use reqwest::Method;
use serde_json::{Value, json};

use super::client::{QdrantService, stringify_point_id};
use super::payload::chunk_from_payload;
use super::types::{QdrantError, ScrollResponse};
use crate::vector_store::ChunkRecord;

/// Points requested per scroll page.
pub const SCROLL_PAGE_SIZE: usize = 256;

/// Stream every stored chunk matching `filter`, one scroll page at a time.
///
/// Points without an id or payload are skipped. Chunks come back in storage order; callers
/// that need document order sort by `chunk_index` afterwards.
pub fn stream_chunks<'a>(
    service: &'a QdrantService,
    collection: &'a str,
    filter: Value,
    page_size: usize,
) -> impl Stream<Item = Result<ChunkRecord, QdrantError>> + 'a {
    try_stream! {
        let path = format!("collections/{collection}/points/scroll");
        let mut offset = Value::Null;
        let mut pages = 0usize;

        loop {
            let body = json!({
                "with_payload": true,
                "with_vector": false,
                "limit": page_size.max(1),
                "filter": filter,
                "offset": offset,
            });
            let response = service.request(Method::POST, &path)?.json(&body).send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(collection, status = %status, pages, "Chunk scroll failed");
                Err(QdrantError::UnexpectedStatus { status, body })?;
                break;
            }

            let ScrollResponse { result } = response.json().await?;
            pages += 1;
            for point in result.points {
                if let (Some(id), Some(payload)) = (point.id, point.payload) {
                    yield chunk_from_payload(stringify_point_id(id), payload, None);
                }
            }

            match result.next_page_offset {
                Some(next) if !next.is_null() => offset = next,
                _ => break,
            }
        }
        tracing::debug!(collection, pages, "Finished chunk scroll");
    }
}
