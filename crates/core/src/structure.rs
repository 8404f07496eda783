use crate::error::IngestError;
use crate::models::{Lesson, TextChunk, TextbookStructure};
use crate::profile::DomainProfile;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Converts a native-numeral token (一..十, 十一..九十) or a digit string
/// to its value. Unrecognized tokens are an explicit unknown, not a
/// guessed default.
pub fn parse_numeral(token: &str) -> Option<u32> {
    if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
        return token.parse().ok();
    }

    let digit = |c: char| -> Option<u32> {
        match c {
            '一' => Some(1),
            '二' => Some(2),
            '三' => Some(3),
            '四' => Some(4),
            '五' => Some(5),
            '六' => Some(6),
            '七' => Some(7),
            '八' => Some(8),
            '九' => Some(9),
            '十' => Some(10),
            _ => None,
        }
    };

    let chars: Vec<char> = token.chars().collect();
    match chars.as_slice() {
        [single] => digit(*single),
        ['十', units] => Some(10 + digit(*units)?),
        [tens, '十'] => Some(digit(*tens)? * 10),
        _ => None,
    }
}

/// Infers the unit/lesson hierarchy of a textbook from its directory
/// pages, falling back to a whole-document unit scan when the directory
/// is unreadable. An empty structure is a valid outcome; callers keep
/// unassigned chunks retrievable without lesson metadata.
pub struct StructureAnalyzer {
    unit_header: Regex,
    lesson_entry: Regex,
    section_markers: Vec<&'static str>,
    stoplist: Vec<String>,
    known_lessons: HashMap<u32, Vec<String>>,
    unit_page_ranges: Vec<(u32, u32, u32)>,
    expected_units: u32,
    directory_page_limit: u32,
}

impl StructureAnalyzer {
    pub fn new(profile: &DomainProfile) -> Result<Self, IngestError> {
        Ok(Self {
            unit_header: Regex::new(r"第([一二三四五六七八九十\d]+)单元")?,
            // number, title (no digits, dots, or terminals), optional
            // leader dots, trailing page number.
            lesson_entry: Regex::new(r"(\d+)\s*([^0-9。\n.…]{2,30}?)[.…]*\s*(\d+)")?,
            section_markers: vec!["口语交际", "习作", "语文园地", "习作例文"],
            stoplist: profile
                .directory_stoplist
                .iter()
                .map(|entry| entry.to_string())
                .collect(),
            known_lessons: profile
                .known_lessons
                .iter()
                .map(|(unit, titles)| {
                    (*unit, titles.iter().map(|title| title.to_string()).collect())
                })
                .collect(),
            unit_page_ranges: profile.unit_page_ranges.clone(),
            expected_units: profile.expected_units,
            directory_page_limit: 8,
        })
    }

    pub fn analyze(
        &self,
        chunks: &[TextChunk],
        grade: &str,
        subject: &str,
    ) -> TextbookStructure {
        let mut sorted: Vec<&TextChunk> = chunks.iter().collect();
        sorted.sort_by_key(|chunk| (chunk.page_number, chunk.chunk_index));

        let directory_text = self.directory_text(&sorted);
        let mut units = self.units_from_directory(&directory_text);

        if (units.len() as u32) < self.expected_units.min(4) {
            warn!(
                found = units.len(),
                "directory unit extraction incomplete, scanning all pages"
            );
            units = self.units_from_content(&sorted);
        }

        if units.is_empty() {
            warn!("no units recognized, returning empty structure");
            return TextbookStructure::new(grade, subject, Vec::new());
        }

        let mut lessons = self.lessons_from_directory(&directory_text);
        self.confirm_lessons_on_content_pages(&sorted, &mut lessons);

        let mut lessons = dedup_lessons(lessons);
        lessons.sort_by_key(|lesson| lesson.start_page);
        self.assign_chunks(&sorted, &mut lessons);

        info!(
            units = units.len(),
            lessons = lessons.len(),
            "textbook structure analyzed"
        );
        TextbookStructure::new(grade, subject, lessons)
    }

    /// Concatenated text of the directory pages: early pages carrying the
    /// table-of-contents marker or a unit header.
    fn directory_text(&self, sorted: &[&TextChunk]) -> String {
        let mut text = String::new();
        for chunk in sorted {
            if chunk.page_number > self.directory_page_limit {
                break;
            }
            if chunk.content.contains("目录") || self.unit_header.is_match(&chunk.content) {
                text.push_str(&chunk.content);
                text.push('\n');
            }
        }
        text
    }

    fn units_from_directory(&self, directory_text: &str) -> Vec<u32> {
        let mut found = HashSet::new();
        for capture in self.unit_header.captures_iter(directory_text) {
            let token = &capture[1];
            match parse_numeral(token) {
                Some(number) => {
                    found.insert(number);
                }
                None => warn!(token, "unrecognized unit numeral skipped"),
            }
        }

        if found.is_empty() {
            return Vec::new();
        }

        // The directory can be partially unreadable; synthesize the
        // missing unit numbers so the structure is always complete.
        if (found.len() as u32) < self.expected_units {
            debug!(
                found = found.len(),
                expected = self.expected_units,
                "synthesizing placeholder units"
            );
            for number in 1..=self.expected_units {
                found.insert(number);
            }
        }

        let mut units: Vec<u32> = found.into_iter().collect();
        units.sort_unstable();
        units
    }

    fn units_from_content(&self, sorted: &[&TextChunk]) -> Vec<u32> {
        let mut found = HashSet::new();
        for chunk in sorted {
            for capture in self.unit_header.captures_iter(&chunk.content) {
                if let Some(number) = parse_numeral(&capture[1]) {
                    found.insert(number);
                }
            }
        }
        let mut units: Vec<u32> = found.into_iter().collect();
        units.sort_unstable();
        units
    }

    fn lessons_from_directory(&self, directory_text: &str) -> Vec<Lesson> {
        let mut lessons = Vec::new();

        let headers: Vec<_> = self.unit_header.captures_iter(directory_text).collect();
        for (position, header) in headers.iter().enumerate() {
            let Some(unit_number) = parse_numeral(&header[1]) else {
                continue;
            };

            let Some(whole) = header.get(0) else {
                continue;
            };
            let section_start = whole.end();
            let section_end = headers
                .get(position + 1)
                .and_then(|next| next.get(0))
                .map_or(directory_text.len(), |m| m.start());
            let section = &directory_text[section_start..section_end];

            for entry in self.lesson_entry.captures_iter(section) {
                let title = entry[2].trim().to_string();
                if title.chars().count() < 2 || self.is_stoplisted(&title) {
                    continue;
                }
                let (Ok(lesson_number), Ok(start_page)) =
                    (entry[1].parse::<u32>(), entry[3].parse::<u32>())
                else {
                    continue;
                };

                debug!(
                    unit = unit_number,
                    lesson = lesson_number,
                    title = %title,
                    page = start_page,
                    "lesson found in directory"
                );
                lessons.push(Lesson::new(unit_number, lesson_number, title, start_page));
            }
        }

        lessons
    }

    /// Confirms known lesson titles on content pages, picking up lessons
    /// the directory parse missed. The owning unit comes from the fixed
    /// page-range table; lesson numbers come from the directory entry
    /// when one exists, otherwise from a per-unit counter.
    fn confirm_lessons_on_content_pages(&self, sorted: &[&TextChunk], lessons: &mut Vec<Lesson>) {
        let mut seen: HashSet<(u32, String)> = lessons
            .iter()
            .map(|lesson| (lesson.unit_number, lesson.lesson_title.clone()))
            .collect();
        let mut unit_counters: HashMap<u32, u32> = HashMap::new();
        for lesson in lessons.iter() {
            let counter = unit_counters.entry(lesson.unit_number).or_default();
            *counter = (*counter).max(lesson.lesson_number);
        }

        let directory: Vec<(u32, String, u32, u32)> = lessons
            .iter()
            .map(|lesson| {
                (
                    lesson.unit_number,
                    lesson.lesson_title.clone(),
                    lesson.lesson_number,
                    lesson.start_page,
                )
            })
            .collect();

        for chunk in sorted {
            let Some(unit_number) = self.unit_for_page(chunk.page_number) else {
                continue;
            };
            let Some(titles) = self.known_lessons.get(&unit_number) else {
                continue;
            };

            for title in titles {
                if title.chars().count() <= 3 || !chunk.content.contains(title.as_str()) {
                    continue;
                }
                if !seen.insert((unit_number, title.clone())) {
                    continue;
                }

                let from_directory = directory
                    .iter()
                    .find(|(unit, known, _, _)| *unit == unit_number && known == title);
                let lesson_number = match from_directory {
                    Some((_, _, number, _)) => *number,
                    None => {
                        let counter = unit_counters.entry(unit_number).or_default();
                        *counter += 1;
                        *counter
                    }
                };

                debug!(
                    unit = unit_number,
                    lesson = lesson_number,
                    title = %title,
                    page = chunk.page_number,
                    "lesson confirmed on content page"
                );
                lessons.push(Lesson::new(
                    unit_number,
                    lesson_number,
                    title.clone(),
                    chunk.page_number,
                ));
            }
        }
    }

    fn is_stoplisted(&self, title: &str) -> bool {
        self.stoplist.iter().any(|entry| title.contains(entry.as_str()))
    }

    fn unit_for_page(&self, page: u32) -> Option<u32> {
        self.unit_page_ranges
            .iter()
            .find(|(_, start, end)| (*start..=*end).contains(&page))
            .map(|(unit, _, _)| *unit)
    }

    /// Assigns chunks to lessons by page span. The span of a lesson runs
    /// from its start page to the page before the next lesson's start.
    fn assign_chunks(&self, sorted: &[&TextChunk], lessons: &mut [Lesson]) {
        let spans: Vec<(u32, u32)> = lessons
            .iter()
            .enumerate()
            .map(|(index, lesson)| {
                let end = lessons
                    .get(index + 1)
                    .map_or(u32::MAX, |next| next.start_page.saturating_sub(1));
                (lesson.start_page, end)
            })
            .collect();

        let titles: Vec<String> = lessons
            .iter()
            .map(|lesson| lesson.lesson_title.clone())
            .collect();

        for (index, lesson) in lessons.iter_mut().enumerate() {
            let (start, end) = spans[index];

            for chunk in sorted {
                let page = chunk.page_number;
                if page < start || page > end {
                    continue;
                }

                let belongs = if page == start {
                    chunk.content.contains(&lesson.lesson_title)
                } else {
                    !self.belongs_elsewhere(&chunk.content, lesson, &titles)
                };

                if belongs {
                    lesson.content_chunks.push((*chunk).clone());
                }
            }

            lesson.end_page = lesson
                .content_chunks
                .iter()
                .map(|chunk| chunk.page_number)
                .max();
        }
    }

    fn belongs_elsewhere(&self, content: &str, current: &Lesson, all_titles: &[String]) -> bool {
        for title in all_titles {
            if title != &current.lesson_title && content.contains(title.as_str()) {
                return true;
            }
        }

        if content.contains("单元") && !content.contains(&current.unit_title) {
            return true;
        }

        self.section_markers
            .iter()
            .any(|marker| content.contains(marker) && !content.contains(&current.unit_title))
    }
}

fn dedup_lessons(lessons: Vec<Lesson>) -> Vec<Lesson> {
    let mut seen = HashSet::new();
    lessons
        .into_iter()
        .filter(|lesson| seen.insert((lesson.unit_number, lesson.lesson_title.clone())))
        .collect()
}

/// Per-unit summary of an analyzed structure.
#[derive(Debug, Clone)]
pub struct UnitSummary {
    pub unit_number: u32,
    pub lesson_count: usize,
    pub chunk_count: usize,
    pub first_page: Option<u32>,
    pub last_page: Option<u32>,
}

pub fn unit_summaries(structure: &TextbookStructure) -> Vec<UnitSummary> {
    let mut by_unit: HashMap<u32, UnitSummary> = HashMap::new();

    for lesson in structure.lessons() {
        let summary = by_unit
            .entry(lesson.unit_number)
            .or_insert_with(|| UnitSummary {
                unit_number: lesson.unit_number,
                lesson_count: 0,
                chunk_count: 0,
                first_page: None,
                last_page: None,
            });
        summary.lesson_count += 1;
        summary.chunk_count += lesson.content_chunks.len();
        summary.first_page = Some(
            summary
                .first_page
                .map_or(lesson.start_page, |page| page.min(lesson.start_page)),
        );
        if let Some(end) = lesson.end_page {
            summary.last_page = Some(summary.last_page.map_or(end, |page| page.max(end)));
        }
    }

    let mut summaries: Vec<UnitSummary> = by_unit.into_values().collect();
    summaries.sort_by_key(|summary| summary.unit_number);
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentKind;
    use serde_json::Map;

    fn chunk(page: u32, index: u32, content: &str) -> TextChunk {
        TextChunk {
            id: format!("test_page_{page}_chunk_{index}"),
            content: content.to_string(),
            page_number: page,
            chunk_index: index,
            text_length: content.chars().count(),
            quality_score: 0.8,
            kind: ContentKind::Other,
            metadata: Map::new(),
        }
    }

    fn analyzer() -> StructureAnalyzer {
        StructureAnalyzer::new(&DomainProfile::chinese_grade3()).expect("fixed patterns compile")
    }

    #[test]
    fn numerals_convert_or_are_rejected() {
        assert_eq!(parse_numeral("三"), Some(3));
        assert_eq!(parse_numeral("十"), Some(10));
        assert_eq!(parse_numeral("十三"), Some(13));
        assert_eq!(parse_numeral("三十"), Some(30));
        assert_eq!(parse_numeral("7"), Some(7));
        assert_eq!(parse_numeral("卅"), None);
        assert_eq!(parse_numeral(""), None);
    }

    #[test]
    fn directory_entries_yield_units_and_lessons() {
        let directory =
            "目录 第一单元 1 大青树下的小学.......2 第二单元 1 古诗三首......14";
        let chunks = vec![chunk(4, 0, directory)];

        let analyzer = analyzer();
        let structure = analyzer.analyze(&chunks, "三年级", "语文");

        let lessons = structure.lessons();
        assert_eq!(lessons.len(), 2);

        let first = &lessons[0];
        assert_eq!(first.unit_number, 1);
        assert_eq!(first.lesson_title, "大青树下的小学");
        assert_eq!(first.start_page, 2);

        let second = &lessons[1];
        assert_eq!(second.unit_number, 2);
        assert_eq!(second.lesson_title, "古诗三首");
        assert_eq!(second.start_page, 14);
    }

    #[test]
    fn stoplisted_directory_entries_are_skipped() {
        let directory = "目录 第一单元 1 大青树下的小学.......2 2 习作：我的暑假......9";
        let chunks = vec![chunk(4, 0, directory)];

        let analyzer = analyzer();
        let structure = analyzer.analyze(&chunks, "三年级", "语文");

        assert!(structure
            .lessons()
            .iter()
            .all(|lesson| !lesson.lesson_title.contains("习作")));
    }

    #[test]
    fn chunks_are_assigned_within_lesson_spans() {
        let directory =
            "目录 第一单元 1 大青树下的小学.......2 2 花的学校......6";
        let chunks = vec![
            chunk(4, 0, directory),
            chunk(2, 0, "大青树下的小学 那是一所美丽的学校"),
            chunk(3, 0, "同学们向在校园里欢唱的小鸟打招呼"),
            chunk(6, 0, "花的学校 雨一来他们便放假了"),
            chunk(7, 0, "树枝在林中互相碰触着"),
        ];

        let analyzer = analyzer();
        let structure = analyzer.analyze(&chunks, "三年级", "语文");

        let lessons = structure.lessons();
        assert_eq!(lessons.len(), 2);

        let first = &lessons[0];
        assert_eq!(first.start_page, 2);
        assert_eq!(first.end_page, Some(3));
        assert_eq!(first.content_chunks.len(), 2);
        for assigned in &first.content_chunks {
            assert!(assigned.page_number >= first.start_page);
        }

        let second = &lessons[1];
        assert_eq!(second.start_page, 6);
        assert_eq!(second.end_page, Some(7));
    }

    #[test]
    fn start_page_never_exceeds_end_page() {
        let directory = "目录 第一单元 1 大青树下的小学.......2 第二单元 1 古诗三首......14";
        let chunks = vec![
            chunk(4, 0, directory),
            chunk(2, 0, "大青树下的小学 那是一所美丽的学校"),
            chunk(15, 0, "停车坐爱枫林晚 霜叶红于二月花"),
        ];

        let analyzer = analyzer();
        let structure = analyzer.analyze(&chunks, "三年级", "语文");

        for lesson in structure.lessons() {
            if let Some(end) = lesson.end_page {
                assert!(lesson.start_page <= end);
            }
        }
    }

    #[test]
    fn unreadable_directory_falls_back_to_content_scan() {
        let chunks = vec![
            chunk(10, 0, "第一单元的学习就要结束了"),
            chunk(30, 0, "第三单元从童话故事开始"),
        ];

        let analyzer = analyzer();
        let structure = analyzer.analyze(&chunks, "三年级", "语文");
        // The content scan finds units but no directory lessons exist;
        // known-title confirmation has nothing to match either.
        assert_eq!(structure.total_lessons(), 0);
    }

    #[test]
    fn no_recognizable_structure_yields_an_empty_result() {
        let chunks = vec![chunk(1, 0, "这里没有任何教材结构标记")];

        let analyzer = analyzer();
        let structure = analyzer.analyze(&chunks, "三年级", "语文");
        assert!(structure.is_empty());
        assert_eq!(structure.total_lessons(), 0);
    }

    #[test]
    fn known_titles_are_confirmed_on_content_pages() {
        // Directory readable for units but the lesson line for unit four
        // is missing; the known-title table recovers it from page 45.
        let directory = "目录 第一单元 第二单元 第三单元 第四单元 1 大青树下的小学.......2";
        let chunks = vec![
            chunk(4, 0, directory),
            chunk(45, 0, "搭船的鸟 我们坐着小船到外祖父家里去"),
        ];

        let analyzer = analyzer();
        let structure = analyzer.analyze(&chunks, "三年级", "语文");

        assert!(structure
            .lessons()
            .iter()
            .any(|lesson| lesson.lesson_title == "搭船的鸟" && lesson.unit_number == 4));
    }

    #[test]
    fn unit_summaries_aggregate_by_unit() {
        let directory = "目录 第一单元 1 大青树下的小学.......2 2 花的学校......6";
        let chunks = vec![
            chunk(4, 0, directory),
            chunk(2, 0, "大青树下的小学 那是一所美丽的学校"),
            chunk(6, 0, "花的学校 雨一来他们便放假了"),
        ];

        let analyzer = analyzer();
        let structure = analyzer.analyze(&chunks, "三年级", "语文");
        let summaries = unit_summaries(&structure);

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].unit_number, 1);
        assert_eq!(summaries[0].lesson_count, 2);
    }
}
