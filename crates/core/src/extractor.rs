use crate::error::IngestError;
use crate::models::Page;
use lopdf::Document;
use regex::Regex;
use std::path::Path;
use tracing::{debug, warn};

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        let mut readable = 0usize;
        for (page_no, _page_id) in document.get_pages() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    debug!(page = page_no, %error, "page text extraction failed");
                    String::new()
                }
            };

            // Scanned textbooks routinely carry pages with no text
            // layer at all; keep them so page numbering stays aligned
            // with the physical book.
            let has_images = text.trim().is_empty();
            let mut page = Page::new(page_no, text);
            page.has_images = has_images;
            if !page.has_images {
                readable += 1;
            }
            pages.push(page);
        }

        if readable == 0 {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        debug!(
            path = %path.display(),
            pages = pages.len(),
            readable,
            "extracted page texts"
        );
        Ok(pages)
    }
}

/// Metadata recoverable from a textbook file name alone, e.g.
/// `三年级上册语文.pdf` carries both the grade and the subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileNameMeta {
    pub subject: Option<String>,
    pub grade: Option<String>,
}

pub fn infer_file_meta(path: &Path) -> Result<FileNameMeta, IngestError> {
    let stem = path
        .file_stem()
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string_lossy();

    let grade_pattern = Regex::new(r"([一二三四五六七八九\d]+)年级([上下]册)?")?;
    let grade = grade_pattern.find(&stem).map(|m| m.as_str().to_string());

    let subject = ["语文", "数学", "英语", "科学", "道德与法治"]
        .iter()
        .find(|subject| stem.contains(*subject))
        .map(|subject| subject.to_string());

    if grade.is_none() && subject.is_none() {
        warn!(file = %stem, "file name carries no grade or subject hints");
    }

    Ok(FileNameMeta { subject, grade })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn grade_and_subject_come_from_the_file_name() {
        let meta = infer_file_meta(Path::new("books/三年级上册语文.pdf"))
            .expect("file name present");
        assert_eq!(meta.grade.as_deref(), Some("三年级上册"));
        assert_eq!(meta.subject.as_deref(), Some("语文"));
    }

    #[test]
    fn digit_grades_are_recognized() {
        let meta = infer_file_meta(Path::new("3年级数学.pdf")).expect("file name present");
        assert_eq!(meta.grade.as_deref(), Some("3年级"));
        assert_eq!(meta.subject.as_deref(), Some("数学"));
    }

    #[test]
    fn uninformative_names_yield_empty_meta() {
        let meta = infer_file_meta(Path::new("scan_0001.pdf")).expect("file name present");
        assert_eq!(meta, FileNameMeta::default());
    }

    #[test]
    fn missing_file_name_is_an_error() {
        let error = infer_file_meta(&PathBuf::from("/")).unwrap_err();
        assert!(matches!(error, IngestError::MissingFileName(_)));
    }

    #[test]
    fn unreadable_pdf_reports_a_parse_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").expect("write fixture");

        let error = LopdfExtractor.extract_pages(&path).unwrap_err();
        assert!(matches!(error, IngestError::PdfParse(_)));
    }
}
