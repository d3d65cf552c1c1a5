use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::{
    book::{book::Book, chapter::NewChapter, library::Library},
    error::{Error, Result},
};

/// Paragraphs longer than this are body text, never headings.
const MAX_HEADING_CHARS: usize = 100;
/// Text before the first heading shorter than this is dropped (title pages, copyright).
const MIN_PREFACE_CHARS: usize = 200;
const PREFACE_TITLE: &str = "Introducción";

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)^(?:
            (?i:chapter|cap[ií]tulo|part|parte|lesson|lecci[oó]n|unit|unidad)\s+(?:\d+|(?i:[ivxlcdm]+))
              (?:\s*$ | \s*[:.\-–—] | \s+\p{Lu})
            | \d{1,3}\.\s+\p{Lu}
            | [IVXLCDM]{1,6}\.\s+\p{Lu}
        )",
    )
    .expect("heading pattern is valid")
});

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").expect("blank line pattern is valid"));

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

/// Extracts the text layer of a PDF. Scanned documents have none.
pub fn extract_text(bytes: &[u8]) -> Result<String> {
    if !is_pdf(bytes) {
        return Err(Error::InvalidUpload("file is not a PDF".to_string()));
    }
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| Error::Pdf(e.to_string()))?;
    if text.trim().is_empty() {
        return Err(Error::EmptyDocument);
    }
    Ok(text)
}

/// Paragraphs separated by blank lines, inner line breaks joined by spaces.
fn paragraphs(text: &str) -> Vec<String> {
    BLANK_LINES
        .split(text)
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect()
}

fn is_heading(paragraph: &str) -> bool {
    paragraph.chars().count() <= MAX_HEADING_CHARS && HEADING.is_match(paragraph)
}

/// Splits document text into chapters at heading paragraphs.
///
/// Headings without body (tables of contents) are skipped. A document without
/// any heading becomes a single chapter named `fallback_title`.
pub fn split_chapters(text: &str, fallback_title: &str) -> Vec<NewChapter> {
    let mut chapters = Vec::new();
    let mut preface = Vec::new();
    let mut current: Option<(String, Vec<String>)> = None;
    for paragraph in paragraphs(text) {
        if is_heading(&paragraph) {
            if let Some(done) = current.replace((paragraph, vec![])) {
                chapters.push(done);
            }
            continue;
        }
        match current.as_mut() {
            Some((_, body)) => body.push(paragraph),
            None => preface.push(paragraph),
        }
    }
    chapters.extend(current);

    let mut result: Vec<NewChapter> = chapters
        .into_iter()
        .filter(|(_, body)| !body.is_empty())
        .map(|(title, body)| NewChapter {
            title,
            text: body.join("\n\n"),
        })
        .collect();

    let preface = preface.join("\n\n");
    if result.is_empty() {
        if !preface.is_empty() {
            result.push(NewChapter {
                title: fallback_title.to_string(),
                text: preface,
            });
        }
    } else if preface.chars().count() >= MIN_PREFACE_CHARS {
        result.insert(
            0,
            NewChapter {
                title: PREFACE_TITLE.to_string(),
                text: preface,
            },
        );
    }
    result
}

/// Creates a `pending` book from an uploaded PDF.
pub async fn ingest_pdf(library: &Library, title: &str, bytes: Vec<u8>) -> Result<Book> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidUpload("title is required".to_string()));
    }
    let fallback_title = title.to_string();
    let chapters = tokio::task::spawn_blocking(move || {
        extract_text(&bytes).map(|text| split_chapters(&text, &fallback_title))
    })
    .await
    .map_err(|e| Error::Pdf(e.to_string()))??;
    if chapters.is_empty() {
        return Err(Error::EmptyDocument);
    }
    info!(chapters = chapters.len(), "parsed {}", title);
    library.create_book(title, &chapters).await
}
