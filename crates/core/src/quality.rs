use crate::error::IngestError;
use crate::profile::DomainProfile;
use regex::Regex;

/// Outcome of scoring one text span for embedding suitability.
#[derive(Debug, Clone)]
pub struct QualityReport {
    pub is_suitable: bool,
    pub score: f64,
    pub reason: String,
    pub length: usize,
    pub han_chars: usize,
    pub han_ratio: f64,
    pub keyword_count: usize,
}

/// Linear additive scorer over length, script density, keyword density,
/// and structural markers, clamped to [0, 1].
pub struct QualityScorer {
    base: f64,
    threshold: f64,
    han_weight: f64,
    keyword_bonus: f64,
    keyword_cap: f64,
    short_len: usize,
    long_len: usize,
    keywords: Vec<String>,
    title_marks: Regex,
    enumeration: Regex,
    pure_numeric: Regex,
    pure_filler: Regex,
}

impl QualityScorer {
    pub fn new(profile: &DomainProfile) -> Result<Self, IngestError> {
        Ok(Self {
            base: profile.base_quality,
            threshold: profile.quality_threshold,
            han_weight: profile.han_ratio_weight,
            keyword_bonus: profile.keyword_bonus,
            keyword_cap: profile.keyword_bonus_cap,
            short_len: profile.short_text_len,
            long_len: profile.long_text_len,
            keywords: profile.keywords.iter().map(|k| k.to_string()).collect(),
            title_marks: Regex::new(r"《[^《》]+》")?,
            enumeration: Regex::new(r"(?m)^\s*\d+\s*[、.]")?,
            pure_numeric: Regex::new(r"^\d+$")?,
            pure_filler: Regex::new(r"^[\s\-—]*$")?,
        })
    }

    /// Overrides the suitability threshold, for call sites that accept a
    /// different cutoff than the profile default.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn score(&self, text: &str) -> QualityReport {
        let text = text.trim();

        if text.is_empty() {
            return QualityReport {
                is_suitable: false,
                score: 0.0,
                reason: "empty text".to_string(),
                length: 0,
                han_chars: 0,
                han_ratio: 0.0,
                keyword_count: 0,
            };
        }

        let mut score = self.base;
        let mut reasons: Vec<&str> = Vec::new();

        let length = text.chars().count();
        if length < self.short_len {
            score -= 0.5;
            reasons.push("text too short");
        } else if length < self.short_len + 30 {
            score -= 0.2;
            reasons.push("text rather short");
        } else if length > self.long_len {
            score -= 0.1;
            reasons.push("text rather long");
        } else {
            score += 0.3;
        }

        let han_chars = text
            .chars()
            .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
            .count();
        let han_ratio = han_chars as f64 / length as f64;
        if han_chars == 0 {
            score -= 0.8;
            reasons.push("no target-script characters");
        } else {
            score += han_ratio * self.han_weight;
        }

        let keyword_count = self
            .keywords
            .iter()
            .filter(|keyword| text.contains(keyword.as_str()))
            .count();
        if keyword_count > 0 {
            score += (keyword_count as f64 * self.keyword_bonus).min(self.keyword_cap);
        }

        if self.title_marks.is_match(text) {
            score += 0.2;
        }
        if self.enumeration.is_match(text) {
            score += 0.1;
        }

        if self.pure_numeric.is_match(text) || self.pure_filler.is_match(text) {
            score -= 0.6;
            reasons.push("noise content");
        }

        let score = score.clamp(0.0, 1.0);

        QualityReport {
            is_suitable: score > self.threshold,
            score,
            reason: if reasons.is_empty() {
                "acceptable quality".to_string()
            } else {
                reasons.join(", ")
            },
            length,
            han_chars,
            han_ratio,
            keyword_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn education_scorer() -> QualityScorer {
        QualityScorer::new(&DomainProfile::chinese_grade3()).expect("fixed patterns compile")
    }

    #[test]
    fn lesson_text_scores_above_threshold() {
        let scorer = education_scorer();
        let text = "秋天的雨，是一把钥匙。它带着清凉和温柔，轻轻地，轻轻地，趁你没留意，\
                    把秋天的大门打开了。课文要求背诵第一自然段，理解词语的意思。";
        let report = scorer.score(text);
        assert!(report.is_suitable, "score was {}", report.score);
        assert!(report.keyword_count >= 2);
    }

    #[test]
    fn pure_numbers_are_rejected() {
        let scorer = education_scorer();
        let report = scorer.score("123456");
        assert!(!report.is_suitable);
        assert!(report.reason.contains("noise"));
    }

    #[test]
    fn latin_only_text_is_rejected() {
        let scorer = education_scorer();
        let report = scorer.score("this page intentionally left blank this page left blank");
        assert!(!report.is_suitable);
        assert_eq!(report.han_chars, 0);
    }

    #[test]
    fn removing_han_characters_never_raises_the_score() {
        let scorer = education_scorer();
        let with_han = "山行课文，远上寒山石径斜，白云生处有人家。停车坐爱枫林晚，霜叶红于二月花。";
        let length = with_han.chars().count();
        let scrubbed: String = std::iter::repeat('0').take(length).collect();

        let original = scorer.score(with_han);
        let stripped = scorer.score(&scrubbed);
        assert!(stripped.score <= original.score);
    }

    #[test]
    fn generic_variant_starts_from_full_score() {
        let scorer = QualityScorer::new(&DomainProfile::generic()).expect("fixed patterns compile");
        let text = "本章介绍乘法运算的基本概念和方法，并通过例题讲解应用题的解题技巧，帮助学生掌握知识点。";
        let report = scorer.score(text);
        assert!(report.score > 0.5);
        assert!(report.is_suitable);
    }

    #[test]
    fn threshold_override_is_respected() {
        let scorer = education_scorer().with_threshold(0.95);
        let text = "秋天的雨，是一把钥匙。它带着清凉和温柔，轻轻地，轻轻地，把秋天的大门打开了。";
        let report = scorer.score(text);
        assert!(!report.is_suitable);
    }
}
