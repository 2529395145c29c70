mod common;

use std::io::Write;
use std::sync::{Arc, Mutex};

use common::{ScriptedCompletion, services};
use doculens::event::Event;
use doculens::pipeline::{PipelineRegistry, RegistryError};
use doculens::pipelines::{
    DEFAULT_PIPELINE, default_registry, ingestion_pipeline, search_pipeline,
};
use serde_json::json;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("logs lock")).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("logs lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn events() -> Vec<Event> {
    [
        json!({ "event_type": "document_upload", "filename": "a.md" }),
        json!({ "event_type": "document_classification", "document_id": "d", "text": "t" }),
        json!({
            "event_type": "information_extraction",
            "document_id": "d",
            "doc_type": "invoice",
            "text": "t",
            "fields": ["total"]
        }),
        json!({
            "event_type": "document_routing",
            "document_id": "d",
            "target_department": "finance",
            "reason": "invoice"
        }),
        json!({ "event_type": "search_query", "query": "q" }),
        json!({ "event_type": "document_summary", "document_id": "d" }),
        json!({ "event_type": "qa_query", "query": "q" }),
    ]
    .into_iter()
    .map(|value| Event::from_value(value).expect("valid event"))
    .collect()
}

#[test]
fn registered_event_types_resolve_to_their_own_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let test = services(dir.path(), ScriptedCompletion::json([]));
    let registry = default_registry(test.services);

    for event in events() {
        assert_eq!(registry.resolve(&event), event.event_type());
        assert!(registry.instantiate(&event).is_ok());
    }
}

#[test]
fn unregistered_event_type_falls_back_with_a_warning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let test = services(dir.path(), ScriptedCompletion::json([]));
    let mut registry = PipelineRegistry::new(test.services, DEFAULT_PIPELINE);
    registry.register(DEFAULT_PIPELINE, ingestion_pipeline);
    registry.register("search_query", search_pipeline);

    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();

    let qa = Event::from_value(json!({ "event_type": "qa_query", "query": "q" })).expect("qa");
    let search = Event::from_value(json!({ "event_type": "search_query", "query": "q" }))
        .expect("search");
    let (fallback, direct) = tracing::subscriber::with_default(subscriber, || {
        (registry.resolve(&qa), registry.resolve(&search))
    });

    assert_eq!(fallback, DEFAULT_PIPELINE);
    assert_eq!(direct, "search_query");
    let output = logs.contents();
    assert!(output.contains("WARN"));
    assert!(output.contains("falling back to default pipeline"));
    assert_eq!(output.matches("WARN").count(), 1);

    let pipeline = registry.instantiate(&qa).expect("fallback pipeline");
    assert_eq!(pipeline.name(), "ingestion");
}

#[test]
fn missing_default_registration_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let test = services(dir.path(), ScriptedCompletion::json([]));
    let registry = PipelineRegistry::new(test.services, DEFAULT_PIPELINE);

    let event = Event::from_value(json!({ "event_type": "qa_query", "query": "q" })).expect("qa");
    let error = registry.instantiate(&event).expect_err("nothing registered");
    assert!(matches!(error, RegistryError::UnknownPipeline(key) if key == DEFAULT_PIPELINE));
}
