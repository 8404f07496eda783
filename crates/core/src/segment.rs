use crate::error::IngestError;
use crate::models::{ContentKind, DocumentMeta, Page, TextChunk};
use crate::profile::{DomainProfile, Separator};
use crate::quality::QualityScorer;
use regex::Regex;
use serde_json::{json, Map};
use tracing::debug;

enum CompiledSeparator {
    Pattern(Regex),
    Literal(&'static str),
}

/// A chunk dropped by the quality gate, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct RejectedChunk {
    pub page_number: u32,
    pub chunk_index: u32,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct PageSegments {
    pub chunks: Vec<TextChunk>,
    pub rejected: Vec<RejectedChunk>,
}

/// Splits normalized text into bounded chunks using an ordered cascade of
/// separators, preferring semantic boundaries over uniform slicing.
/// Overlap applies only at the character-level fallback.
pub struct ChunkSegmenter {
    separators: Vec<CompiledSeparator>,
    kind_rules: Vec<(ContentKind, Regex)>,
    scorer: QualityScorer,
    page_furniture: Vec<Regex>,
    max_chunk_size: usize,
    overlap: usize,
}

impl ChunkSegmenter {
    pub fn new(profile: &DomainProfile) -> Result<Self, IngestError> {
        let separators = profile
            .separators
            .iter()
            .map(|separator| match separator {
                Separator::Pattern(source) => Ok(CompiledSeparator::Pattern(Regex::new(source)?)),
                Separator::Literal(literal) => Ok(CompiledSeparator::Literal(literal)),
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        let kind_rules = profile
            .kind_rules
            .iter()
            .map(|(kind, source)| Ok((*kind, Regex::new(source)?)))
            .collect::<Result<Vec<_>, IngestError>>()?;

        let page_furniture = [
            r"^\d+$",
            r"^第\d+页$",
            r"(?i)^page\s*\d+$",
            r"^\d+\s*/\s*\d+$",
            r"^-\s*\d+\s*-$",
            r"^\[\s*\d+\s*\]$",
            r"^（?\(?\s*\d+\s*\)?）?$",
        ]
        .iter()
        .map(|source| Ok(Regex::new(source)?))
        .collect::<Result<Vec<_>, IngestError>>()?;

        Ok(Self {
            separators,
            kind_rules,
            scorer: QualityScorer::new(profile)?,
            page_furniture,
            max_chunk_size: profile.chunk_size,
            overlap: profile.chunk_overlap,
        })
    }

    /// Splits free text into pieces no longer than `max_chunk_size`
    /// characters. Pieces that no separator level can bound are sliced at
    /// the character level with `overlap` characters carried between
    /// consecutive slices.
    pub fn split_text(&self, text: &str, max_chunk_size: usize, overlap: usize) -> Vec<String> {
        let mut pieces = Vec::new();
        self.split_at_level(text, 0, max_chunk_size, overlap, &mut pieces);
        pieces
    }

    /// Segments one page into scored chunks, dropping chunks below the
    /// quality threshold.
    pub fn segment_page(&self, document: &DocumentMeta, page: &Page) -> PageSegments {
        let stripped = self.strip_page_furniture(&page.text);
        if stripped.trim().is_empty() {
            return PageSegments::default();
        }

        let pieces = self.split_text(&stripped, self.max_chunk_size, self.overlap);

        let mut segments = PageSegments::default();
        for (index, piece) in pieces.iter().enumerate() {
            let index = index as u32;
            let content = piece.trim();
            if content.is_empty() {
                continue;
            }

            let report = self.scorer.score(content);
            if !report.is_suitable {
                debug!(
                    page = page.number,
                    chunk = index,
                    score = report.score,
                    reason = %report.reason,
                    "chunk rejected"
                );
                segments.rejected.push(RejectedChunk {
                    page_number: page.number,
                    chunk_index: index,
                    score: report.score,
                    reason: report.reason,
                });
                continue;
            }

            let kind = self.classify(content);
            let mut metadata = Map::new();
            metadata.insert("source_file".to_string(), json!(document.source_file));
            if let Some(subject) = &document.subject {
                metadata.insert("subject".to_string(), json!(subject));
            }
            if let Some(grade) = &document.grade {
                metadata.insert("grade".to_string(), json!(grade));
            }
            metadata.insert("page_number".to_string(), json!(page.number));
            metadata.insert("content_type".to_string(), json!(kind.as_str()));
            metadata.insert("has_images".to_string(), json!(page.has_images));

            segments.chunks.push(TextChunk {
                id: format!(
                    "{}_page_{}_chunk_{}",
                    document.source_file,
                    page.number,
                    index + 1
                ),
                content: content.to_string(),
                page_number: page.number,
                chunk_index: index,
                text_length: content.chars().count(),
                quality_score: report.score,
                kind,
                metadata,
            });
        }

        segments
    }

    pub fn classify(&self, text: &str) -> ContentKind {
        for (kind, pattern) in &self.kind_rules {
            if pattern.is_match(text) {
                return *kind;
            }
        }
        ContentKind::Other
    }

    fn strip_page_furniture(&self, text: &str) -> String {
        text.lines()
            .filter(|line| {
                let line = line.trim();
                !self
                    .page_furniture
                    .iter()
                    .any(|pattern| pattern.is_match(line))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn split_at_level(
        &self,
        text: &str,
        level: usize,
        max_chunk_size: usize,
        overlap: usize,
        out: &mut Vec<String>,
    ) {
        if text.chars().count() <= max_chunk_size {
            if !text.trim().is_empty() {
                out.push(text.trim().to_string());
            }
            return;
        }

        if level >= self.separators.len() {
            character_fallback(text, max_chunk_size, overlap, out);
            return;
        }

        let pieces = split_once_level(text, &self.separators[level]);

        // A level that produces a single piece cannot bound anything;
        // hand the text straight to the next level.
        if pieces.len() <= 1 {
            self.split_at_level(text, level + 1, max_chunk_size, overlap, out);
            return;
        }

        let mut buffer = String::new();
        for piece in pieces {
            let piece_len = piece.chars().count();
            let buffer_len = buffer.chars().count();

            if !buffer.is_empty() && buffer_len + piece_len > max_chunk_size {
                self.emit(&buffer, level, max_chunk_size, overlap, out);
                buffer.clear();
            }
            buffer.push_str(piece);
        }
        if !buffer.is_empty() {
            self.emit(&buffer, level, max_chunk_size, overlap, out);
        }
    }

    fn emit(
        &self,
        piece: &str,
        level: usize,
        max_chunk_size: usize,
        overlap: usize,
        out: &mut Vec<String>,
    ) {
        if piece.chars().count() <= max_chunk_size {
            if !piece.trim().is_empty() {
                out.push(piece.trim().to_string());
            }
        } else {
            self.split_at_level(piece, level + 1, max_chunk_size, overlap, out);
        }
    }
}

/// Splits text at one separator level. Literal separators stay attached to
/// the piece they end; pattern separators start the piece they introduce.
fn split_once_level<'a>(text: &'a str, separator: &CompiledSeparator) -> Vec<&'a str> {
    match separator {
        CompiledSeparator::Literal(literal) => text.split_inclusive(literal).collect(),
        CompiledSeparator::Pattern(pattern) => {
            let mut pieces = Vec::new();
            let mut last = 0;
            for found in pattern.find_iter(text) {
                if found.start() > last {
                    pieces.push(&text[last..found.start()]);
                }
                last = found.start();
            }
            if last < text.len() {
                pieces.push(&text[last..]);
            }
            pieces
        }
    }
}

fn character_fallback(text: &str, max_chunk_size: usize, overlap: usize, out: &mut Vec<String>) {
    let chars: Vec<char> = text.chars().collect();
    let step = max_chunk_size.saturating_sub(overlap).max(1);

    let mut start = 0;
    while start < chars.len() {
        let end = (start + max_chunk_size).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn segmenter() -> ChunkSegmenter {
        ChunkSegmenter::new(&DomainProfile::chinese_grade3()).expect("fixed patterns compile")
    }

    fn document() -> DocumentMeta {
        DocumentMeta {
            source_file: "语文3上.pdf".to_string(),
            subject: Some("语文".to_string()),
            grade: Some("三年级".to_string()),
            checksum: "checksum".to_string(),
            total_pages: 1,
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn all_chunks_respect_the_size_bound() {
        let segmenter = segmenter();
        let sentence = "秋天的雨是一把钥匙。它带着清凉和温柔把秋天的大门打开了。";
        let text = sentence.repeat(120);

        let pieces = segmenter.split_text(&text, 300, 50);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.chars().count() <= 300, "piece overflows: {}", piece.chars().count());
        }
    }

    #[test]
    fn character_fallback_produces_the_expected_offsets() {
        let segmenter = segmenter();
        // No separator character appears anywhere, so every level falls
        // through to the character slicer.
        let text = "山".repeat(3200);

        let pieces = segmenter.split_text(&text, 1500, 200);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].chars().count(), 1500);
        assert_eq!(pieces[1].chars().count(), 1500);
        assert_eq!(pieces[2].chars().count(), 600);

        // Slice two starts at offset max - overlap = 1300.
        let chars: Vec<char> = text.chars().collect();
        let expected: String = chars[1300..2800].iter().collect();
        assert_eq!(pieces[1], expected);
    }

    #[test]
    fn structural_markers_beat_sentence_punctuation() {
        let segmenter = segmenter();
        let lesson_one = format!("\n第一课\n{}", "大青树下的小学的课文内容。".repeat(10));
        let lesson_two = format!("\n第二课\n{}", "花的学校的课文内容在这里。".repeat(10));
        let text = format!("{lesson_one}{lesson_two}");

        let pieces = segmenter.split_text(&text, 200, 0);
        assert!(pieces.iter().any(|piece| piece.starts_with("第二课")));
    }

    #[test]
    fn short_text_passes_through_whole() {
        let segmenter = segmenter();
        let text = "秋天的雨是一把钥匙。";
        let pieces = segmenter.split_text(text, 1200, 150);
        assert_eq!(pieces, vec![text.to_string()]);
    }

    #[test]
    fn page_segmentation_orders_and_indexes_chunks() {
        let segmenter = segmenter();
        let body = "秋天的雨，是一把钥匙。它带着清凉和温柔，轻轻地把秋天的大门打开了。课文要求背诵并理解词语。";
        let page = Page::new(7, format!("{}\n{}", body.repeat(40), body));

        let segments = segmenter.segment_page(&document(), &page);
        assert!(!segments.chunks.is_empty());

        let mut previous = None;
        for chunk in &segments.chunks {
            assert_eq!(chunk.page_number, 7);
            assert!(chunk.text_length > 0);
            assert!(chunk.text_length <= 1200);
            if let Some(previous) = previous {
                assert!(chunk.chunk_index > previous);
            }
            previous = Some(chunk.chunk_index);
        }
    }

    #[test]
    fn low_quality_chunks_are_rejected_with_reasons() {
        let segmenter = segmenter();
        let page = Page::new(3, "1234 5678 9012".to_string());

        let segments = segmenter.segment_page(&document(), &page);
        assert!(segments.chunks.is_empty());
        assert!(!segments.rejected.is_empty());
        assert!(!segments.rejected[0].reason.is_empty());
    }

    #[test]
    fn page_number_lines_are_stripped_before_splitting() {
        let segmenter = segmenter();
        let page = Page::new(
            9,
            "第9页\n秋天的雨，是一把钥匙。它带着清凉和温柔，轻轻地把秋天的大门打开了。课文要求背诵并理解词语的意思。\n- 9 -",
        );

        let segments = segmenter.segment_page(&document(), &page);
        assert_eq!(segments.chunks.len(), 1);
        assert!(!segments.chunks[0].content.contains("第9页"));
    }

    #[test]
    fn content_kinds_follow_the_profile_rules() {
        let segmenter = segmenter();
        assert_eq!(segmenter.classify("古诗三首：山行、赠刘景文"), ContentKind::Poem);
        assert_eq!(segmenter.classify("课后练习一：朗读全文"), ContentKind::Exercise);
        assert_eq!(segmenter.classify("生字表：呼 唱 歌"), ContentKind::Vocabulary);
        assert_eq!(segmenter.classify("《大青树下的小学》"), ContentKind::LessonMain);
        assert_eq!(segmenter.classify("没有任何标记的普通段落"), ContentKind::Other);
    }
}
