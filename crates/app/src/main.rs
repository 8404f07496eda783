use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use textbook_search_core::{
    unit_summaries, DomainProfile, Embedder, HashEmbedder, IngestReport, IngestionPipeline,
    LopdfExtractor, OpenSearchStore, PipelineConfig, RemoteEmbedder, RetrievalConfig,
    RetrievalEngine, SearchFilters, DEFAULT_EMBEDDING_DIMENSIONS,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "textbook-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// OpenSearch base URL
    #[arg(long, default_value = "http://localhost:9200")]
    opensearch_url: String,

    /// OpenSearch index name
    #[arg(long, default_value = "textbook_chunks")]
    opensearch_index: String,

    /// Text-cleanup and structure profile
    #[arg(long, value_enum, default_value_t = Profile::ChineseGrade3)]
    profile: Profile,

    /// OpenAI-compatible embeddings endpoint; without it a local
    /// hashing embedder is used.
    #[arg(long, env = "EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Embedding model name for the remote endpoint
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "BAAI/bge-large-zh-v1.5")]
    embedding_model: String,

    /// API key for the remote endpoint
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    ChineseGrade3,
    Generic,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one PDF or a folder of PDFs into the index.
    Ingest {
        /// A pdf file, or a folder scanned recursively.
        path: PathBuf,
    },
    /// Hybrid vector and keyword search over indexed chunks.
    Search {
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        grade: Option<String>,
        #[arg(long)]
        unit: Option<String>,
        /// Emit results as a JSON array instead of plain text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Chunks most similar to an already-indexed chunk.
    Similar {
        chunk_id: i64,
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Analyze a PDF's unit and lesson structure without indexing.
    Structure {
        path: PathBuf,
    },
}

fn build_embedder(cli: &Cli) -> Box<dyn Embedder> {
    match &cli.embedding_endpoint {
        Some(endpoint) => Box::new(RemoteEmbedder::new(
            endpoint,
            &cli.embedding_model,
            cli.embedding_api_key.clone(),
            DEFAULT_EMBEDDING_DIMENSIONS,
        )),
        None => Box::new(HashEmbedder::default()),
    }
}

fn print_report(report: &IngestReport) {
    println!(
        "{}: {} chunks indexed, {} duplicates, {} rejected, {} degraded embeddings",
        report.document.source_file,
        report.chunks_indexed,
        report.duplicates_skipped,
        report.chunks_rejected,
        report.embeddings_degraded
    );
    if report.cancelled {
        println!("  cancelled before completion; indexed chunks are kept");
    }
    if !report.structure.is_empty() {
        println!(
            "  structure: {} lessons across {} units",
            report.structure.total_lessons(),
            unit_summaries(&report.structure).len()
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let profile = match cli.profile {
        Profile::ChineseGrade3 => DomainProfile::chinese_grade3(),
        Profile::Generic => DomainProfile::generic(),
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        profile = %profile.name,
        "textbook-search boot"
    );

    match &cli.command {
        Command::Ingest { path } => {
            let store = OpenSearchStore::new(
                &cli.opensearch_url,
                &cli.opensearch_index,
                DEFAULT_EMBEDDING_DIMENSIONS,
            )?;
            store.ensure_index().await?;

            let pipeline = IngestionPipeline::new(
                store,
                build_embedder(&cli),
                LopdfExtractor,
                &profile,
                PipelineConfig::default(),
            )?;

            let cancel = pipeline.cancellation_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing current batch");
                    cancel.store(true, std::sync::atomic::Ordering::Relaxed);
                }
            });

            if path.is_dir() {
                let folder = pipeline.ingest_folder(path).await?;
                for skipped in &folder.skipped {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                }
                for report in &folder.reports {
                    print_report(report);
                }
                println!(
                    "{} file(s) ingested, {} skipped",
                    folder.reports.len(),
                    folder.skipped.len()
                );
            } else {
                let report = pipeline.ingest_file(path).await?;
                print_report(&report);
            }
        }
        Command::Search {
            query,
            top_k,
            subject,
            grade,
            unit,
            json,
        } => {
            let store = OpenSearchStore::new(
                &cli.opensearch_url,
                &cli.opensearch_index,
                DEFAULT_EMBEDDING_DIMENSIONS,
            )?;
            let engine =
                RetrievalEngine::new(store, build_embedder(&cli), RetrievalConfig::default());

            let filters = SearchFilters {
                subject: subject.clone(),
                grade: grade.clone(),
                unit: unit.clone(),
            };
            let hits = engine.search(query, Some(*top_k), &filters).await?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
                return Ok(());
            }

            if hits.is_empty() {
                println!("no results for: {query}");
            }
            for hit in hits {
                println!(
                    "[{}] score={:.4} page={} source={}",
                    hit.chunk_id,
                    hit.score,
                    hit.page_number.unwrap_or_default(),
                    hit.source_file.unwrap_or_default()
                );
                println!("  {}", hit.content);
            }
        }
        Command::Similar { chunk_id, top_k } => {
            let store = OpenSearchStore::new(
                &cli.opensearch_url,
                &cli.opensearch_index,
                DEFAULT_EMBEDDING_DIMENSIONS,
            )?;
            let engine =
                RetrievalEngine::new(store, build_embedder(&cli), RetrievalConfig::default());

            let hits = engine.similar(*chunk_id, Some(*top_k)).await?;
            if hits.is_empty() {
                println!("no similar chunks for: {chunk_id}");
            }
            for hit in hits {
                println!("[{}] similarity={:.4}", hit.chunk_id, hit.score);
                println!("  {}", hit.content);
            }
        }
        Command::Structure { path } => {
            use textbook_search_core::{
                infer_file_meta, ChunkSegmenter, DocumentMeta, PdfExtractor, StructureAnalyzer,
                TextNormalizer,
            };

            let extractor = LopdfExtractor;
            let normalizer = TextNormalizer::new(&profile)?;
            let segmenter = ChunkSegmenter::new(&profile)?;
            let analyzer = StructureAnalyzer::new(&profile)?;

            let meta = infer_file_meta(path)?;
            let document = DocumentMeta {
                source_file: path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default(),
                subject: meta.subject.clone(),
                grade: meta.grade.clone(),
                checksum: String::new(),
                total_pages: 0,
                ingested_at: Utc::now(),
            };

            let pages = extractor.extract_pages(path)?;
            let mut chunks = Vec::new();
            for page in &pages {
                if page.has_images {
                    continue;
                }
                let mut normalized = page.clone();
                normalized.text = normalizer.normalize(&page.text);
                chunks.extend(segmenter.segment_page(&document, &normalized).chunks);
            }

            let structure = analyzer.analyze(
                &chunks,
                meta.grade.as_deref().unwrap_or_default(),
                meta.subject.as_deref().unwrap_or_default(),
            );

            if structure.is_empty() {
                println!("no recognizable unit structure in {}", path.display());
            } else {
                println!(
                    "{}: {} lessons",
                    document.source_file,
                    structure.total_lessons()
                );
                for summary in unit_summaries(&structure) {
                    let pages = match (summary.first_page, summary.last_page) {
                        (Some(first), Some(last)) => format!("pages {first}-{last}"),
                        (Some(first), None) => format!("from page {first}"),
                        _ => "pages unknown".to_string(),
                    };
                    println!(
                        "  unit {}: {} lesson(s), {} chunk(s), {}",
                        summary.unit_number, summary.lesson_count, summary.chunk_count, pages
                    );
                }
                for lesson in structure.lessons() {
                    println!(
                        "    {}  {} {} (page {})",
                        lesson.unit_title,
                        lesson.lesson_number,
                        lesson.lesson_title,
                        lesson.start_page
                    );
                }
            }
        }
    }

    Ok(())
}
