use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One physical page as produced by the extraction backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub text: String,
    /// Reported by extractors that can see embedded images. Carried into
    /// chunk metadata only; never used by the segmentation logic.
    #[serde(default)]
    pub has_images: bool,
}

impl Page {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
            has_images: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    LessonMain,
    Exercise,
    Vocabulary,
    Poem,
    WritingGuide,
    ReadingGuide,
    UnitReview,
    Other,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::LessonMain => "lesson_main",
            ContentKind::Exercise => "exercise",
            ContentKind::Vocabulary => "vocabulary",
            ContentKind::Poem => "poem",
            ContentKind::WritingGuide => "writing_guide",
            ContentKind::ReadingGuide => "reading_guide",
            ContentKind::UnitReview => "unit_review",
            ContentKind::Other => "other",
        }
    }
}

/// A bounded span of normalized text, the atomic unit of indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: String,
    pub content: String,
    pub page_number: u32,
    pub chunk_index: u32,
    pub text_length: usize,
    pub quality_score: f64,
    pub kind: ContentKind,
    pub metadata: Map<String, Value>,
}

/// A titled curriculum item recovered from the directory page or from
/// known-title confirmation on content pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub unit_number: u32,
    pub unit_title: String,
    pub lesson_number: u32,
    pub lesson_title: String,
    pub start_page: u32,
    pub end_page: Option<u32>,
    pub content_chunks: Vec<TextChunk>,
}

impl Lesson {
    pub fn new(
        unit_number: u32,
        lesson_number: u32,
        lesson_title: impl Into<String>,
        start_page: u32,
    ) -> Self {
        Self {
            unit_number,
            unit_title: format!("第{unit_number}单元"),
            lesson_number,
            lesson_title: lesson_title.into(),
            start_page,
            end_page: None,
            content_chunks: Vec::new(),
        }
    }
}

/// Inferred unit/lesson hierarchy of one textbook.
///
/// `total_lessons` always equals the lesson count; it is maintained by the
/// constructor and not settable from outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextbookStructure {
    pub grade: String,
    pub subject: String,
    lessons: Vec<Lesson>,
    total_lessons: usize,
}

impl TextbookStructure {
    pub fn new(grade: impl Into<String>, subject: impl Into<String>, lessons: Vec<Lesson>) -> Self {
        let total_lessons = lessons.len();
        Self {
            grade: grade.into(),
            subject: subject.into(),
            lessons,
            total_lessons,
        }
    }

    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    pub fn total_lessons(&self) -> usize {
        self.total_lessons
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }
}

/// Identity and provenance of one source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub source_file: String,
    pub subject: Option<String>,
    pub grade: Option<String>,
    pub checksum: String,
    pub total_pages: usize,
    pub ingested_at: DateTime<Utc>,
}

/// A record ready for insertion; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDraft {
    pub content: String,
    pub embedding: Vec<f32>,
    pub content_hash: String,
    pub metadata: Map<String, Value>,
    pub source_file: String,
    pub chunk_index: u32,
    pub page_number: u32,
    pub quality_score: f64,
}

/// The persisted retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedRecord {
    pub id: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub content_hash: String,
    pub metadata: Map<String, Value>,
    pub source_file: String,
    pub chunk_index: u32,
    pub page_number: u32,
    pub quality_score: f64,
}

/// Equality filters applied against record metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchFilters {
    pub subject: Option<String>,
    pub grade: Option<String>,
    pub unit: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.subject.is_none() && self.grade.is_none() && self.unit.is_none()
    }

    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        let field_matches = |key: &str, wanted: &Option<String>| match wanted {
            Some(value) => metadata
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|found| found == value),
            None => true,
        };

        field_matches("subject", &self.subject)
            && field_matches("grade", &self.grade)
            && field_matches("unit", &self.unit)
    }
}

/// One ranked query result. Ephemeral; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub score: f64,
    pub metadata: Map<String, Value>,
    pub chunk_id: i64,
    pub source_file: Option<String>,
    pub page_number: Option<u32>,
}

impl SearchHit {
    pub fn from_record(record: &IndexedRecord, score: f64) -> Self {
        Self {
            content: record.content.clone(),
            score,
            metadata: record.metadata.clone(),
            chunk_id: record.id,
            source_file: Some(record.source_file.clone()),
            page_number: Some(record.page_number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structure_tracks_lesson_count() {
        let lessons = vec![
            Lesson::new(1, 1, "大青树下的小学", 2),
            Lesson::new(1, 2, "花的学校", 6),
        ];
        let structure = TextbookStructure::new("三年级", "语文", lessons);
        assert_eq!(structure.total_lessons(), 2);
        assert_eq!(structure.lessons().len(), structure.total_lessons());
    }

    #[test]
    fn filters_match_on_exact_metadata_values() {
        let mut metadata = Map::new();
        metadata.insert("subject".to_string(), json!("语文"));
        metadata.insert("grade".to_string(), json!("三年级"));

        let filters = SearchFilters {
            subject: Some("语文".to_string()),
            ..Default::default()
        };
        assert!(filters.matches(&metadata));

        let filters = SearchFilters {
            subject: Some("数学".to_string()),
            ..Default::default()
        };
        assert!(!filters.matches(&metadata));

        let filters = SearchFilters {
            unit: Some("第1单元".to_string()),
            ..Default::default()
        };
        assert!(!filters.matches(&metadata));
    }
}
