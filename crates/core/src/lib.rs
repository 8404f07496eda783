pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod profile;
pub mod quality;
pub mod retrieval;
pub mod segment;
pub mod stores;
pub mod structure;
pub mod traits;

pub use embeddings::{
    Embedder, HashEmbedder, RemoteEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, IngestError, Result, SearchError};
pub use extractor::{infer_file_meta, FileNameMeta, LopdfExtractor, PdfExtractor};
pub use ingest::{
    content_hash, digest_file, discover_pdf_files, FolderReport, IngestReport,
    IngestionPipeline, PipelineConfig, SkippedPdf,
};
pub use models::{
    ContentKind, DocumentMeta, IndexedRecord, Lesson, Page, RecordDraft, SearchFilters,
    SearchHit, TextChunk, TextbookStructure,
};
pub use normalize::TextNormalizer;
pub use profile::{DomainProfile, Separator};
pub use quality::{QualityReport, QualityScorer};
pub use retrieval::{RetrievalConfig, RetrievalEngine};
pub use segment::{ChunkSegmenter, PageSegments, RejectedChunk};
pub use stores::{MemoryStore, OpenSearchStore};
pub use structure::{parse_numeral, unit_summaries, StructureAnalyzer, UnitSummary};
pub use traits::{InsertOutcome, RecordStore};
