use crate::chunking::{normalize_whitespace, PageMap};
use crate::error::IngestError;
use lopdf::Document;
use std::fs;
use std::path::Path;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "md"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub text: String,
    pub pages: PageMap,
}

impl ExtractedDocument {
    pub fn from_pages(pages: Vec<PageText>) -> Self {
        let mut text = String::new();
        let mut map = PageMap::new();
        let mut char_len = 0usize;

        for page in pages {
            let normalized = normalize_whitespace(&page.text);
            if normalized.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push('\n');
                char_len += 1;
            }
            map.insert(char_len, page.number);
            char_len += normalized.chars().count();
            text.push_str(&normalized);
        }

        Self { text, pages: map }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, IngestError>;
}

pub fn is_supported(path: &Path) -> bool {
    extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileExtractor;

impl TextExtractor for FileExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, IngestError> {
        let pages = match extension(path).as_deref() {
            Some("pdf") => extract_pdf_pages(path)?,
            Some("txt") | Some("md") => extract_text_pages(path)?,
            _ => {
                return Err(IngestError::UnsupportedFormat(path.display().to_string()));
            }
        };

        let document = ExtractedDocument::from_pages(pages);
        if document.is_empty() {
            return Err(IngestError::Extraction(format!(
                "no readable text in {}",
                path.display()
            )));
        }
        Ok(document)
    }
}

pub fn extract_pdf_pages(path: &Path) -> Result<Vec<PageText>, IngestError> {
    let document =
        Document::load(path).map_err(|error| IngestError::Extraction(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| IngestError::Extraction(error.to_string()))?;

        if !text.trim().is_empty() {
            pages.push(PageText {
                number: page_no,
                text,
            });
        }
    }

    Ok(pages)
}

pub fn extract_text_pages(path: &Path) -> Result<Vec<PageText>, IngestError> {
    let raw = fs::read_to_string(path)?;
    Ok(split_form_feeds(&raw))
}

fn split_form_feeds(raw: &str) -> Vec<PageText> {
    raw.split('\u{000c}')
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(index, page)| PageText {
            number: index as u32 + 1,
            text: page.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pages_are_joined_with_offsets() {
        let document = ExtractedDocument::from_pages(vec![
            PageText {
                number: 1,
                text: "Dress  code\napplies".to_string(),
            },
            PageText {
                number: 2,
                text: "   ".to_string(),
            },
            PageText {
                number: 3,
                text: "Vacation".to_string(),
            },
        ]);

        assert_eq!(document.text, "Dress code applies\nVacation");
        assert_eq!(document.pages.page_at(0), Some(1));
        assert_eq!(document.pages.page_at(18), Some(1));
        assert_eq!(document.pages.page_at(19), Some(3));
    }

    #[test]
    fn form_feed_splits_pages_and_keeps_numbering() {
        let pages = split_form_feeds("first\u{000c}\u{000c}third\n");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[1].number, 3);
        assert_eq!(pages[1].text.trim(), "third");
    }

    #[test]
    fn text_files_are_read() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("Policy.MD");
        fs::write(&path, "# Leave\nReport sick leave before nine.")?;

        let document = FileExtractor.extract(&path)?;
        assert_eq!(document.text, "# Leave Report sick leave before nine.");
        assert_eq!(document.pages.page_at(5), Some(1));
        Ok(())
    }

    #[test]
    fn unsupported_and_empty_files_fail() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let docx = dir.path().join("handbook.docx");
        let blank = dir.path().join("blank.txt");
        fs::write(&docx, b"PK")?;
        fs::write(&blank, " \n\t")?;

        assert!(matches!(
            FileExtractor.extract(&docx),
            Err(IngestError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            FileExtractor.extract(&blank),
            Err(IngestError::Extraction(_))
        ));
        Ok(())
    }

    #[test]
    fn broken_pdf_is_an_extraction_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        assert!(matches!(
            FileExtractor.extract(&path),
            Err(IngestError::Extraction(_))
        ));
        Ok(())
    }

    #[test]
    fn supported_extensions_ignore_case() {
        assert!(is_supported(Path::new("a/B.PDF")));
        assert!(is_supported(Path::new("notes.txt")));
        assert!(!is_supported(Path::new("sheet.xlsx")));
        assert!(!is_supported(Path::new("README")));
    }
}
