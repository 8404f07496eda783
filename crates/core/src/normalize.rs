use crate::error::IngestError;
use crate::profile::DomainProfile;
use regex::Regex;
use std::collections::HashMap;

/// Cleans raw page text for segmentation and embedding.
///
/// `normalize` is total: malformed input degrades to the empty string,
/// never to an error.
pub struct TextNormalizer {
    pinyin: HashMap<String, String>,
    encoding_repairs: Vec<(String, String)>,
    latin_token: Regex,
    spaces: Regex,
    newlines: Regex,
    page_marker: Regex,
    lesson_marker: Regex,
    unit_marker: Regex,
}

impl TextNormalizer {
    pub fn new(profile: &DomainProfile) -> Result<Self, IngestError> {
        let pinyin = profile
            .pinyin_repairs
            .iter()
            .map(|(token, hanzi)| (token.to_string(), hanzi.to_string()))
            .collect();

        let encoding_repairs = profile
            .encoding_repairs
            .iter()
            .map(|(wrong, right)| (wrong.to_string(), right.to_string()))
            .collect();

        Ok(Self {
            pinyin,
            encoding_repairs,
            latin_token: Regex::new(r"[A-Za-z]+")?,
            spaces: Regex::new(r"[^\S\n]+")?,
            newlines: Regex::new(r" ?\n[\s]*")?,
            page_marker: Regex::new(r"\d+\s*页")?,
            // Digit-numbered markers only; the analyzer still needs the
            // native-numeral forms (第一单元) on directory pages.
            lesson_marker: Regex::new(r"第\s*\d+\s*课")?,
            unit_marker: Regex::new(r"第\s*\d+\s*单元")?,
        })
    }

    pub fn normalize(&self, raw: &str) -> String {
        if raw.trim().is_empty() {
            return String::new();
        }

        let mut text = self.repair_encoding(raw);
        text = self.repair_latin_tokens(&text);
        text = self.spaces.replace_all(&text, " ").to_string();
        text = self.newlines.replace_all(&text, "\n").to_string();
        text = text.chars().filter(|c| is_allowed_char(*c)).collect();
        text = normalize_ascii_punctuation(&text);
        text = self.page_marker.replace_all(&text, "").to_string();
        text = self.lesson_marker.replace_all(&text, "课文").to_string();
        text = self.unit_marker.replace_all(&text, "单元").to_string();
        text = collapse_duplicate_punctuation(&text);

        let fragments: Vec<&str> = text
            .split(' ')
            .map(str::trim)
            .filter(|fragment| fragment.chars().count() >= 3)
            .collect();

        fragments.join(" ").trim().to_string()
    }

    fn repair_encoding(&self, text: &str) -> String {
        let mut repaired = text.to_string();
        for (wrong, right) in &self.encoding_repairs {
            repaired = repaired.replace(wrong, right);
        }
        repaired
    }

    /// Replaces isolated latin-letter runs that are known OCR misreads of
    /// characters. Candidates are tried in order: the token as-is, the
    /// lowercased token, the token minus its trailing character lowercased,
    /// then only the first letter lowercased. Tokens with no table entry
    /// are kept verbatim.
    fn repair_latin_tokens(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for found in self.latin_token.find_iter(text) {
            out.push_str(&text[last..found.start()]);
            match self.repair_token(found.as_str()) {
                Some(hanzi) => out.push_str(hanzi),
                None => out.push_str(found.as_str()),
            }
            last = found.end();
        }

        out.push_str(&text[last..]);
        out
    }

    fn repair_token(&self, token: &str) -> Option<&str> {
        if let Some(hanzi) = self.pinyin.get(token) {
            return Some(hanzi);
        }

        let lowered = token.to_lowercase();
        if let Some(hanzi) = self.pinyin.get(&lowered) {
            return Some(hanzi);
        }

        // The misread heuristics below guess at mangled capitalization,
        // which only happens on short one-syllable tokens; exact table
        // hits above carry no length bound.
        let length = token.chars().count();
        if !(2..=6).contains(&length) {
            return None;
        }

        let truncated: String = lowered.chars().take(length - 1).collect();
        if let Some(hanzi) = self.pinyin.get(&truncated) {
            return Some(hanzi);
        }

        let mut chars = token.chars();
        let first_lowered = chars
            .next()
            .map(|c| c.to_lowercase().collect::<String>() + chars.as_str())
            .unwrap_or_default();
        self.pinyin.get(&first_lowered).map(String::as_str)
    }
}

/// Script filter for step four of the normalization cascade. ASCII
/// sentence punctuation survives so the fullwidth mapping that follows has
/// something to act on.
fn is_allowed_char(c: char) -> bool {
    matches!(c,
        '\u{4e00}'..='\u{9fff}'
        | '\u{3000}'..='\u{303f}'
        | '\u{ff00}'..='\u{ffef}'
        | '0'..='9'
        | ',' | '.' | '!' | '?' | ':' | ';'
        | '“' | '”' | '‘' | '’' | '…' | '—'
    ) || c.is_whitespace()
}

fn normalize_ascii_punctuation(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            ',' => '，',
            '.' => '。',
            '!' => '！',
            '?' => '？',
            ':' => '：',
            ';' => '；',
            other => other,
        })
        .collect()
}

/// Collapses runs of two or more identical terminal punctuation marks.
fn collapse_duplicate_punctuation(text: &str) -> String {
    const TERMINALS: [char; 4] = ['。', '！', '？', '，'];

    let mut out = String::with_capacity(text.len());
    let mut previous: Option<char> = None;
    for c in text.chars() {
        if TERMINALS.contains(&c) && previous == Some(c) {
            continue;
        }
        out.push(c);
        previous = Some(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> TextNormalizer {
        TextNormalizer::new(&DomainProfile::chinese_grade3()).expect("fixed patterns compile")
    }

    #[test]
    fn corrupted_pinyin_tokens_are_repaired() {
        let normalizer = normalizer();
        assert_eq!(normalizer.normalize("huK你好chSng"), "呼你好唱");
    }

    #[test]
    fn exact_table_hits_repair_regardless_of_length() {
        let mut profile = DomainProfile::chinese_grade3();
        profile.pinyin_repairs.push(("zhuangjia", "庄稼"));
        let normalizer = TextNormalizer::new(&profile).expect("fixed patterns compile");
        assert_eq!(normalizer.normalize("zhuangjia长得真好"), "庄稼长得真好");
    }

    #[test]
    fn unmatched_tokens_are_dropped_by_script_filter() {
        let normalizer = normalizer();
        // "xyzq" has no table entry; the script filter removes it and the
        // short-fragment pass keeps the remaining run.
        let result = normalizer.normalize("xyzq今天天气真好");
        assert_eq!(result, "今天天气真好");
    }

    #[test]
    fn ascii_punctuation_becomes_fullwidth() {
        let normalizer = normalizer();
        let result = normalizer.normalize("今天天气真好,大家都很高兴!");
        assert_eq!(result, "今天天气真好，大家都很高兴！");
    }

    #[test]
    fn duplicate_terminals_collapse() {
        let normalizer = normalizer();
        let result = normalizer.normalize("真的吗？？？当然了。。。");
        assert_eq!(result, "真的吗？当然了。");
    }

    #[test]
    fn digit_lesson_markers_collapse_to_labels() {
        let normalizer = normalizer();
        let result = normalizer.normalize("第3课天天向上学习语文");
        assert!(!result.contains("第3课"));
        assert!(result.contains("课文"));
        assert!(result.contains("天天向上学习语文"));
    }

    #[test]
    fn native_numeral_unit_markers_survive() {
        let normalizer = normalizer();
        let result = normalizer.normalize("第一单元 大青树下的小学");
        assert!(result.contains("第一单元"));
    }

    #[test]
    fn meaningless_input_normalizes_to_empty() {
        let normalizer = normalizer();
        assert_eq!(normalizer.normalize("   \n \t "), "");
        assert_eq!(normalizer.normalize("a b c"), "");
    }

    #[test]
    fn whitespace_runs_collapse() {
        let normalizer = normalizer();
        let result = normalizer.normalize("秋天的雨   是一把钥匙\n\n\n它带着清凉");
        assert_eq!(result, "秋天的雨 是一把钥匙\n它带着清凉");
    }
}
