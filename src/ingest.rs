use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::db::Database;
use crate::doc_processor::{self, ExtractError, CHUNK_SIZE};
use crate::keypool::KeyPool;
use crate::llm::{Oracle, OracleError};

/// Pause between chunk embeddings. Sequential processing plus this delay keeps
/// ingestion under the oracle's request budget.
pub const CHUNK_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub struct IngestReport {
    pub chunks: usize,
}

/// Turns an uploaded document into searchable chunks.
pub struct Ingestor {
    db: Arc<Database>,
    oracle: Arc<dyn Oracle>,
    keys: Arc<KeyPool>,
    chunk_delay: Duration,
}

impl Ingestor {
    pub fn new(db: Arc<Database>, oracle: Arc<dyn Oracle>, keys: Arc<KeyPool>) -> Self {
        Self {
            db,
            oracle,
            keys,
            chunk_delay: CHUNK_DELAY,
        }
    }

    /// Same pipeline with a custom inter-chunk delay; tests pass zero.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Extract, slice, then embed and persist one chunk at a time. A failure
    /// aborts the remaining slices; chunks persisted before it stay.
    pub async fn ingest_pdf(&self, bytes: &[u8]) -> Result<IngestReport, IngestError> {
        let text = doc_processor::extract_pdf_text(bytes)?;
        self.ingest_text(&text).await
    }

    async fn ingest_text(&self, text: &str) -> Result<IngestReport, IngestError> {
        let slices = doc_processor::chunk_text(text, CHUNK_SIZE);
        let total = slices.len();
        info!(chunks = total, "ingesting document");

        for (i, slice) in slices.iter().enumerate() {
            let embedding = self
                .keys
                .run(|key| {
                    let oracle = Arc::clone(&self.oracle);
                    async move { oracle.embed(&key, slice).await }
                })
                .await?;
            self.db.insert_chunk(slice, &embedding)?;
            info!(chunk = i + 1, total, "chunk embedded");
            if i + 1 < total {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }

        Ok(IngestReport { chunks: total })
    }
}
