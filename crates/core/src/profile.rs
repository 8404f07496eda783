use crate::models::ContentKind;

/// One level of the separator cascade. Regex separators mark the start of
/// the following piece; literal separators stay attached to the piece they
/// terminate.
#[derive(Debug, Clone, Copy)]
pub enum Separator {
    Pattern(&'static str),
    Literal(&'static str),
}

/// The bundle of tables and thresholds that parameterize text processing
/// for one curriculum. All lookup data lives here as immutable
/// configuration so alternate curricula can be supplied without code
/// changes.
#[derive(Debug, Clone)]
pub struct DomainProfile {
    pub name: &'static str,
    pub chunk_size: usize,
    pub chunk_overlap: usize,

    /// Starting point of the additive quality score. The education variant
    /// starts from 0.0 and earns its way up; the generic variant starts
    /// from 1.0 and loses points.
    pub base_quality: f64,
    pub quality_threshold: f64,
    pub han_ratio_weight: f64,
    pub keyword_bonus: f64,
    pub keyword_bonus_cap: f64,
    pub short_text_len: usize,
    pub long_text_len: usize,

    pub keywords: Vec<&'static str>,
    pub separators: Vec<Separator>,
    pub kind_rules: Vec<(ContentKind, &'static str)>,

    /// OCR-corrupted latin tokens (and plain romanizations) mapped to the
    /// characters they stand for.
    pub pinyin_repairs: Vec<(&'static str, &'static str)>,
    /// Mis-decoded byte sequences mapped to the intended punctuation.
    pub encoding_repairs: Vec<(&'static str, &'static str)>,

    /// Directory-page section headers that are not lesson titles.
    pub directory_stoplist: Vec<&'static str>,
    /// Canonical lesson titles per unit, used to confirm lessons on
    /// content pages.
    pub known_lessons: Vec<(u32, Vec<&'static str>)>,
    /// Fallback page spans per unit when directory extraction is
    /// incomplete.
    pub unit_page_ranges: Vec<(u32, u32, u32)>,
    pub expected_units: u32,
}

impl DomainProfile {
    /// Reference curriculum: PEP Chinese, grade three, first volume.
    pub fn chinese_grade3() -> Self {
        Self {
            name: "chinese_grade3",
            chunk_size: 1200,
            chunk_overlap: 150,
            base_quality: 0.0,
            quality_threshold: 0.4,
            han_ratio_weight: 0.4,
            keyword_bonus: 0.1,
            keyword_bonus_cap: 0.5,
            short_text_len: 20,
            long_text_len: 1000,
            keywords: vec![
                "课文", "生字", "词语", "练习", "阅读", "写作", "口语", "交际", "拼音", "识字",
                "写字", "古诗", "学习", "理解", "背诵", "朗读", "例句", "造句", "近义词",
                "反义词", "意思", "解释", "日积月累", "语文园地",
            ],
            separators: chinese_separators(),
            kind_rules: vec![
                (ContentKind::Vocabulary, r"生字\s*词|生字\s*表|词语\s*盘点|词语\s*表|近义词|反义词|识字|写字"),
                (ContentKind::Exercise, r"课后练习|练习\s*[一二三四五六七八九十\d]|基础\s*练习|造句|句式"),
                (ContentKind::Poem, r"古诗|日积月累"),
                (ContentKind::UnitReview, r"语文\s*园地|单元\s*复习|口语\s*交际"),
                (ContentKind::WritingGuide, r"习作|写作|看图\s*写话"),
                (ContentKind::ReadingGuide, r"阅读\s*提示|精读\s*指导"),
                (ContentKind::LessonMain, r"第[一二三四五六七八九十\d]+课|《[^《》]{1,30}》"),
            ],
            pinyin_repairs: vec![
                // Corrupted forms observed in scanned-PDF output.
                ("huK", "呼"),
                ("chSng", "唱"),
                ("jK", "就"),
                ("zheng", "正"),
                // Toneless romanizations of high-frequency characters.
                ("de", "的"),
                ("le", "了"),
                ("ma", "吗"),
                ("ne", "呢"),
                ("ba", "吧"),
                ("shi", "是"),
                ("you", "有"),
                ("wo", "我"),
                ("ni", "你"),
                ("ta", "他"),
                ("zhe", "这"),
                ("na", "那"),
                ("zai", "在"),
                ("dou", "都"),
                ("ye", "也"),
                ("bu", "不"),
                ("he", "和"),
                ("yi", "一"),
                ("er", "二"),
                ("san", "三"),
                ("si", "四"),
                ("wu", "五"),
                ("liu", "六"),
                ("qi", "七"),
                ("jiu", "九"),
                ("nian", "年"),
                ("yue", "月"),
                ("tian", "天"),
                ("xue", "学"),
                ("xiao", "校"),
                ("jia", "家"),
                ("shu", "书"),
                ("ke", "课"),
                ("wen", "文"),
                ("du", "读"),
                ("xie", "写"),
                ("hua", "话"),
                ("ting", "听"),
                ("kan", "看"),
                ("shan", "山"),
                ("shui", "水"),
                ("feng", "风"),
                ("yu", "雨"),
            ],
            encoding_repairs: vec![
                ("ï¼š", "："),
                ("ï¼Œ", "，"),
                ("ï¼›", "；"),
                ("ï¼Ÿ", "？"),
                ("ï¼", "。"),
                ("â€œ", "“"),
                ("â€\u{9d}", "”"),
                ("â€¦", "…"),
            ],
            directory_stoplist: vec![
                "口语", "习作", "语文园地", "快乐读书吧", "识字表", "写字表", "词语表",
            ],
            known_lessons: vec![
                (1, vec!["大青树下的小学", "花的学校", "不懂就要问"]),
                (
                    2,
                    vec![
                        "古诗三首",
                        "山行",
                        "赠刘景文",
                        "夜书所见",
                        "铺满金色巴掌的水泥道",
                        "秋天的雨",
                        "听听，秋的声音",
                    ],
                ),
                (
                    3,
                    vec![
                        "卖火柴的小女孩",
                        "那一定会很好",
                        "在牛肚子里旅行",
                        "一块奶酪",
                        "总也倒不了的老屋",
                        "胡萝卜先生的长胡子",
                        "小狗学叫",
                    ],
                ),
                (4, vec!["搭船的鸟", "金色的草地"]),
                (
                    5,
                    vec![
                        "古诗三首",
                        "望天门山",
                        "饮湖上初晴后雨",
                        "望洞庭",
                        "富饶的西沙群岛",
                        "海滨小城",
                        "美丽的小兴安岭",
                    ],
                ),
                (6, vec!["大自然的声音", "父亲、树林和鸟", "带刺的朋友"]),
                (7, vec!["大自然的声音", "父亲、树林和鸟", "带刺的朋友"]),
                (8, vec!["司马光", "掌声", "手术台就是阵地"]),
            ],
            unit_page_ranges: vec![
                (1, 2, 12),
                (2, 13, 26),
                (3, 27, 44),
                (4, 45, 62),
                (5, 63, 72),
                (6, 73, 86),
                (7, 87, 100),
                (8, 101, 113),
            ],
            expected_units: 8,
        }
    }

    /// Subject-agnostic variant for textbooks without a curriculum table.
    pub fn generic() -> Self {
        Self {
            name: "generic",
            chunk_size: 1500,
            chunk_overlap: 200,
            base_quality: 1.0,
            quality_threshold: 0.3,
            han_ratio_weight: 0.3,
            keyword_bonus: 0.1,
            keyword_bonus_cap: 0.5,
            short_text_len: 50,
            long_text_len: 2000,
            keywords: vec![
                "练习", "例题", "答案", "知识点", "学习", "思考", "讨论", "数学", "语文", "英语",
                "运算", "概念", "方法", "技巧", "应用题",
            ],
            separators: generic_separators(),
            kind_rules: vec![
                (ContentKind::Exercise, r"例题|练习|测试|作业|考试"),
                (ContentKind::ReadingGuide, r"概念|定义|解释|说明"),
                (ContentKind::UnitReview, r"总结|小结|回顾|复习"),
            ],
            pinyin_repairs: Vec::new(),
            encoding_repairs: vec![
                ("ï¼š", "："),
                ("ï¼Œ", "，"),
                ("ï¼›", "；"),
                ("â€¦", "…"),
            ],
            directory_stoplist: Vec::new(),
            known_lessons: Vec::new(),
            unit_page_ranges: Vec::new(),
            expected_units: 0,
        }
    }
}

/// Ordered highest priority first; the character-level fallback is implicit.
fn chinese_separators() -> Vec<Separator> {
    vec![
        Separator::Pattern(r"\n第[一二三四五六七八九十\d]+课"),
        Separator::Pattern(r"\n第[一二三四五六七八九十\d]+单元"),
        Separator::Pattern(r"\n\s*[一二三四五六七八九十]+\s*、"),
        Separator::Pattern(r"\n\s*（[一二三四五六七八九十\d]+）"),
        Separator::Pattern(r"\n\s*[1-9]\d*\s*[、.]"),
        Separator::Pattern(r"\n\s*[①②③④⑤⑥⑦⑧⑨⑩]"),
        Separator::Literal("\n\n\n"),
        Separator::Literal("。\n"),
        Separator::Literal("！\n"),
        Separator::Literal("？\n"),
        Separator::Literal("；\n"),
        Separator::Literal("：\n"),
        Separator::Literal("\n\n"),
        Separator::Literal("。"),
        Separator::Literal("！"),
        Separator::Literal("？"),
        Separator::Literal("；"),
        Separator::Literal("："),
        Separator::Literal("，"),
        Separator::Literal("、"),
        Separator::Literal("\n"),
        Separator::Literal(" "),
    ]
}

fn generic_separators() -> Vec<Separator> {
    vec![
        Separator::Literal("\n\n\n"),
        Separator::Literal("。\n"),
        Separator::Literal("！\n"),
        Separator::Literal("？\n"),
        Separator::Literal("；\n"),
        Separator::Literal("：\n"),
        Separator::Literal("\n\n"),
        Separator::Literal("。"),
        Separator::Literal("！"),
        Separator::Literal("？"),
        Separator::Literal("；"),
        Separator::Literal("："),
        Separator::Literal("，"),
        Separator::Literal("\n"),
        Separator::Literal(" "),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_profile_covers_eight_units() {
        let profile = DomainProfile::chinese_grade3();
        assert_eq!(profile.expected_units, 8);
        assert_eq!(profile.known_lessons.len(), 8);
        assert_eq!(profile.unit_page_ranges.len(), 8);
    }

    #[test]
    fn thresholds_differ_between_variants() {
        let education = DomainProfile::chinese_grade3();
        let generic = DomainProfile::generic();
        assert_eq!(education.quality_threshold, 0.4);
        assert_eq!(generic.quality_threshold, 0.3);
        assert_eq!(generic.base_quality, 1.0);
    }
}
