use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, IngestError};
use crate::extractor::{infer_file_meta, PdfExtractor};
use crate::models::{DocumentMeta, RecordDraft, TextChunk, TextbookStructure};
use crate::normalize::TextNormalizer;
use crate::profile::DomainProfile;
use crate::segment::ChunkSegmenter;
use crate::structure::StructureAnalyzer;
use crate::traits::RecordStore;
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Outcome of a single-file ingestion run.
#[derive(Debug)]
pub struct IngestReport {
    pub document: DocumentMeta,
    pub structure: TextbookStructure,
    pub chunks_indexed: usize,
    pub duplicates_skipped: usize,
    pub chunks_rejected: usize,
    /// Chunks stored with a zero embedding after the backend kept
    /// failing; they stay reachable through keyword search.
    pub embeddings_degraded: usize,
    /// True when the run stopped early on the cancellation flag;
    /// everything indexed so far stays indexed.
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug)]
pub struct FolderReport {
    pub reports: Vec<IngestReport>,
    pub skipped: Vec<SkippedPdf>,
}

/// End-to-end ingestion: extract, normalize, segment, analyze
/// structure, embed in batches, and index with hash deduplication.
pub struct IngestionPipeline<S, E, X>
where
    S: RecordStore,
    E: Embedder,
    X: PdfExtractor,
{
    store: S,
    embedder: E,
    extractor: X,
    normalizer: TextNormalizer,
    segmenter: ChunkSegmenter,
    analyzer: StructureAnalyzer,
    config: PipelineConfig,
    cancel: Arc<AtomicBool>,
}

impl<S, E, X> IngestionPipeline<S, E, X>
where
    S: RecordStore,
    E: Embedder,
    X: PdfExtractor,
{
    pub fn new(
        store: S,
        embedder: E,
        extractor: X,
        profile: &DomainProfile,
        config: PipelineConfig,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            store,
            embedder,
            extractor,
            normalizer: TextNormalizer::new(profile)?,
            segmenter: ChunkSegmenter::new(profile)?,
            analyzer: StructureAnalyzer::new(profile)?,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Shared flag that stops ingestion at the next batch boundary.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport, IngestError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
            .to_string();
        let checksum = digest_file(path)?;
        let file_meta = infer_file_meta(path)?;

        let pages = self.extractor.extract_pages(path)?;
        let total_pages = pages.len();

        let mut document = DocumentMeta {
            source_file: file_name,
            subject: file_meta.subject,
            grade: file_meta.grade,
            checksum,
            total_pages,
            ingested_at: Utc::now(),
        };

        let mut chunks: Vec<TextChunk> = Vec::new();
        let mut rejected = 0usize;
        for page in &pages {
            // Image presence is chunk metadata, never a reason to drop
            // a page; only a missing text layer is.
            if page.text.trim().is_empty() {
                debug!(page = page.number, "skipping page without text layer");
                continue;
            }
            let mut normalized = page.clone();
            normalized.text = self.normalizer.normalize(&page.text);

            let segments = self.segmenter.segment_page(&document, &normalized);
            rejected += segments.rejected.len();
            chunks.extend(segments.chunks);
        }

        if chunks.is_empty() {
            return Err(IngestError::EmptyDocument(path.display().to_string()));
        }

        let grade = document.grade.clone().unwrap_or_default();
        let subject = document.subject.clone().unwrap_or_default();
        let structure = self.analyzer.analyze(&chunks, &grade, &subject);
        attach_lesson_metadata(&mut chunks, &structure);

        let mut indexed = 0usize;
        let mut duplicates = 0usize;
        let mut degraded = 0usize;
        let mut cancelled = false;
        for batch in chunks.chunks(self.config.batch_size.max(1)) {
            if self.cancel.load(Ordering::Relaxed) {
                warn!(file = %document.source_file, "ingestion cancelled at batch boundary");
                cancelled = true;
                break;
            }

            let (embeddings, batch_degraded) = self.embed_batch_or_zero(batch).await?;
            degraded += batch_degraded;

            for (chunk, (embedding, was_degraded)) in batch.iter().zip(embeddings) {
                let mut metadata = chunk.metadata.clone();
                if was_degraded {
                    metadata.insert("embedding_degraded".to_string(), Value::Bool(true));
                }

                let outcome = self
                    .store
                    .insert(RecordDraft {
                        content: chunk.content.clone(),
                        embedding,
                        content_hash: content_hash(&chunk.content),
                        metadata,
                        source_file: document.source_file.clone(),
                        chunk_index: chunk.chunk_index,
                        page_number: chunk.page_number,
                        quality_score: chunk.quality_score,
                    })
                    .await?;

                if outcome.is_duplicate() {
                    duplicates += 1;
                } else {
                    indexed += 1;
                }
            }
        }

        document.ingested_at = Utc::now();
        info!(
            file = %document.source_file,
            pages = total_pages,
            indexed,
            duplicates,
            rejected,
            degraded,
            cancelled,
            "file ingested"
        );

        Ok(IngestReport {
            document,
            structure,
            chunks_indexed: indexed,
            duplicates_skipped: duplicates,
            chunks_rejected: rejected,
            embeddings_degraded: degraded,
            cancelled,
        })
    }

    pub async fn ingest_folder(&self, folder: &Path) -> Result<FolderReport, IngestError> {
        let files = discover_pdf_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut reports = Vec::new();
        let mut skipped = Vec::new();
        for path in files {
            if self.cancel.load(Ordering::Relaxed) {
                warn!("ingestion cancelled, remaining files skipped");
                break;
            }
            match self.ingest_file(&path).await {
                Ok(report) => reports.push(report),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping file");
                    skipped.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(FolderReport { reports, skipped })
    }

    /// Embeds one batch of chunk contents. A batch that still fails
    /// after the configured retries falls back to zero vectors so
    /// ingestion never loses the text itself.
    async fn embed_batch_or_zero(
        &self,
        batch: &[TextChunk],
    ) -> Result<(Vec<(Vec<f32>, bool)>, usize), IngestError> {
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();

        match self.embed_batch_with_retry(&texts).await {
            Ok(vectors) => Ok((vectors.into_iter().map(|vector| (vector, false)).collect(), 0)),
            Err(EmbeddingError::DimensionMismatch { expected, actual }) => {
                // A wrong dimension is a configuration error, not a
                // transient fault; storing zeros would poison the
                // index silently.
                Err(EmbeddingError::DimensionMismatch { expected, actual }.into())
            }
            Err(error) => {
                warn!(%error, batch = texts.len(), "embedding failed, storing zero vectors");
                let dimensions = self.embedder.dimensions();
                let vectors = std::iter::repeat_with(|| (vec![0f32; dimensions], true))
                    .take(texts.len())
                    .collect();
                Ok((vectors, texts.len()))
            }
        }
    }

    async fn embed_batch_with_retry(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt = 0u32;
        loop {
            match self.embedder.embed_batch(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(error @ EmbeddingError::DimensionMismatch { .. }) => return Err(error),
                Err(error) => {
                    if attempt >= self.config.max_retries {
                        return Err(error);
                    }
                    let delay = self.config.retry_base_delay * 2u32.saturating_pow(attempt);
                    debug!(%error, attempt, delay_ms = delay.as_millis() as u64, "retrying embedding batch");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn attach_lesson_metadata(chunks: &mut [TextChunk], structure: &TextbookStructure) {
    let mut assignments: HashMap<String, (String, String)> = HashMap::new();
    for lesson in structure.lessons() {
        for assigned in &lesson.content_chunks {
            assignments.insert(
                assigned.id.clone(),
                (lesson.unit_title.clone(), lesson.lesson_title.clone()),
            );
        }
    }

    for chunk in chunks {
        if let Some((unit, lesson)) = assignments.get(&chunk.id) {
            chunk
                .metadata
                .insert("unit".to_string(), Value::String(unit.clone()));
            chunk
                .metadata
                .insert("lesson".to_string(), Value::String(lesson.clone()));
        }
    }
}
