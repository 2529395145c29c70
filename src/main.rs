use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;
use walkdir::WalkDir;

use doculens::classifier::LlmLabelClassifier;
use doculens::config::{self, Config};
use doculens::dispatch::{LocalTaskQueue, TaskDispatcher, Worker};
use doculens::lifecycle;
use doculens::logging;
use doculens::nodes::PipelineServices;
use doculens::pipelines::default_registry;
use doculens::store::{EventStore, FsEventStore, InMemoryClassificationStore};

#[derive(Parser)]
#[command(
    name = "doculens",
    about = "Run document events through DocuLens pipelines"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit JSON event files (or directories of them) and process them until idle.
    Process {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print a stored event and its task context.
    Show { event_id: Uuid },
    /// Soft-archive a document.
    Archive {
        document_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Soft-delete a document and purge its vectors.
    Delete {
        document_id: String,
        #[arg(long)]
        reason: Option<String>,
        /// Leave the document's vectors in place.
        #[arg(long)]
        keep_vectors: bool,
    },
    /// Return an archived document to active processing.
    Restore {
        document_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("Failed to load configuration")?;
    logging::init_tracing();

    let events = FsEventStore::open(&config.event_dir)
        .await
        .context("Failed to open event store")?;

    match cli.command {
        Command::Process { paths } => process(config, Arc::new(events), &paths).await,
        Command::Show { event_id } => {
            let event = events
                .load(event_id)
                .await?
                .with_context(|| format!("Event {event_id} not found"))?;
            print_json(&event)
        }
        Command::Archive {
            document_id,
            reason,
        } => {
            let outcome =
                lifecycle::archive_document(&events, &document_id, reason.as_deref()).await?;
            print_json(&outcome)
        }
        Command::Delete {
            document_id,
            reason,
            keep_vectors,
        } => {
            let services = PipelineServices::from_config(config).await?;
            let outcome = lifecycle::delete_document(
                &events,
                services.vector_store.as_ref(),
                &document_id,
                reason.as_deref(),
                !keep_vectors,
            )
            .await?;
            print_json(&outcome)
        }
        Command::Restore {
            document_id,
            reason,
        } => {
            let outcome =
                lifecycle::restore_document(&events, &document_id, reason.as_deref()).await?;
            print_json(&outcome)
        }
    }
}

async fn process(config: &Config, events: Arc<FsEventStore>, paths: &[PathBuf]) -> Result<()> {
    let services = Arc::new(PipelineServices::from_config(config).await?);
    let classifier = Arc::new(LlmLabelClassifier::new(
        Arc::clone(&services.completion),
        config.llm_provider.as_str(),
        config.pipeline.llm_model.clone(),
    ));
    let classifications = Arc::new(InMemoryClassificationStore::new(
        config.classification_labels.clone(),
    ));
    let (queue, receiver) = LocalTaskQueue::new();
    let dispatcher = Arc::new(TaskDispatcher::new(
        default_registry(services),
        events,
        Arc::new(queue),
        classifications,
        classifier,
        config.dispatch.clone(),
    ));

    let mut rejected = 0usize;
    for file in collect_event_files(paths)? {
        for payload in read_payloads(&file)? {
            match dispatcher.submit(payload).await {
                Ok(submitted) => {
                    tracing::info!(file = %file.display(), event_id = %submitted.event_id, "Submitted event");
                }
                Err(error) => {
                    rejected += 1;
                    tracing::error!(file = %file.display(), error = %error, "Rejected event");
                }
            }
        }
    }

    let mut worker = Worker::new(Arc::clone(&dispatcher), receiver);
    let outcomes = worker.run_until_idle().await;
    let mut failed = 0usize;
    for outcome in outcomes {
        let event_id = outcome
            .event_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        match outcome.result {
            Ok(record) => {
                println!("== {event_id}");
                print_json(&record)?;
            }
            Err(error) => {
                failed += 1;
                eprintln!("== {event_id} failed: {error}");
            }
        }
    }
    print_json(&dispatcher.metrics().snapshot())?;

    if rejected + failed > 0 {
        bail!("{rejected} event(s) rejected, {failed} run(s) failed");
    }
    Ok(())
}

fn collect_event_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
                if entry.file_type().is_file()
                    && entry.path().extension().and_then(|ext| ext.to_str()) == Some("json")
                {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

/// A file holds one event object or an array of them.
fn read_payloads(path: &Path) -> Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
