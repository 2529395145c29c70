//! Translate flat metadata filters into Qdrant filter clauses.

use serde_json::{Map, Value, json};

use crate::vector_store::normalize_filters;

/// Compose a `must` filter from exact-match metadata constraints.
///
/// Filters go through [`normalize_filters`] first, so both backends agree on what matches.
/// Array values become `match.any` clauses. Returns `None` when no clause survives.
pub fn build_metadata_filter(filters: &Map<String, Value>) -> Option<Value> {
    let must: Vec<Value> = normalize_filters(filters)
        .into_iter()
        .map(|(key, value)| match value {
            Value::Array(values) => json!({ "key": key, "match": { "any": values } }),
            value => json!({ "key": key, "match": { "value": value } }),
        })
        .collect();

    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

/// Filter selecting the chunks of one document, by id or else by filename.
pub fn build_document_filter(document_id: Option<&str>, filename: Option<&str>) -> Option<Value> {
    if let Some(id) = document_id.and_then(non_empty) {
        return Some(json!({
            "must": [
                { "key": "document_id", "match": { "value": id } }
            ]
        }));
    }

    filename.and_then(non_empty).map(|name| {
        json!({
            "should": [
                { "key": "filename", "match": { "value": name } },
                { "key": "original_filename", "match": { "value": name } }
            ]
        })
    })
}

fn non_empty(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn metadata_filter_builds_value_and_any_clauses() {
        let filter = build_metadata_filter(&map(json!({
            "doc_type": "invoice",
            "page_numbers": [1, 2],
            "ignored": null
        })))
        .expect("filter");

        assert_eq!(
            filter,
            json!({
                "must": [
                    { "key": "doc_type", "match": { "value": "invoice" } },
                    { "key": "page_numbers", "match": { "any": [1, 2] } }
                ]
            })
        );
    }

    #[test]
    fn metadata_filter_returns_none_when_empty() {
        assert!(build_metadata_filter(&Map::new()).is_none());
        assert!(build_metadata_filter(&map(json!({ "doc_type": "  " }))).is_none());
    }

    #[test]
    fn document_filter_prefers_document_id() {
        let filter = build_document_filter(Some("abc"), Some("a.txt")).expect("filter");
        assert_eq!(filter["must"][0]["key"], json!("document_id"));

        let by_name = build_document_filter(None, Some("a.txt")).expect("filter");
        assert_eq!(by_name["should"].as_array().map(Vec::len), Some(2));

        assert!(build_document_filter(Some(" "), None).is_none());
    }
}
