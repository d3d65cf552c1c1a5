use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::chapter::{Chapter, ChapterSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BookStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Raw `book` row, [`Book`] adds the derived progress.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct BookRow {
    pub id: i64,
    pub title: String,
    pub status: BookStatus,
    pub total_chapters: i64,
    pub processed_chapters: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub status: BookStatus,
    pub total_chapters: i64,
    pub processed_chapters: i64,
    /// percent of chapters processed, 0 when the book has no chapters yet
    pub progress: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        Book {
            progress: progress_percent(row.processed_chapters, row.total_chapters),
            id: row.id,
            title: row.title,
            status: row.status,
            total_chapters: row.total_chapters,
            processed_chapters: row.processed_chapters,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl Book {
    /// A book is complete only once every chapter has been counted.
    pub fn is_complete(&self) -> bool {
        self.total_chapters > 0 && self.processed_chapters >= self.total_chapters
    }
}

/// `round(processed / total * 100)`, or 0 for an empty book.
pub fn progress_percent(processed: i64, total: i64) -> u8 {
    if total <= 0 {
        return 0;
    }
    let percent = (processed.max(0) as f64 / total as f64 * 100.0).round();
    percent.min(100.0) as u8
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BookList {
    pub books: Vec<Book>,
}

/// Book detail read model, chapters in reading order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BookDetail {
    pub book: Book,
    pub chapters: Vec<Chapter>,
}

/// Polled by the reader while a book is processing.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookStatusView {
    pub status: BookStatus,
    pub total_chapters: i64,
    pub processed_chapters: i64,
    pub progress: u8,
    pub chapters: Vec<ChapterSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(3, 0), 0);
        assert_eq!(progress_percent(0, 4), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(1, 8), 13);
        assert_eq!(progress_percent(4, 4), 100);
    }

    #[test]
    fn test_is_complete() {
        let now = OffsetDateTime::now_utc();
        let mut book: Book = BookRow {
            id: 1,
            title: "Física".to_string(),
            status: BookStatus::Processing,
            total_chapters: 0,
            processed_chapters: 0,
            created_at: now,
            updated_at: now,
        }
        .into();
        assert!(!book.is_complete());
        book.total_chapters = 2;
        book.processed_chapters = 1;
        assert!(!book.is_complete());
        book.processed_chapters = 2;
        assert!(book.is_complete());
    }

    #[test]
    fn test_status_view_serializes_camel_case() {
        let view = BookStatusView {
            status: BookStatus::Processing,
            total_chapters: 4,
            processed_chapters: 1,
            progress: 25,
            chapters: vec![],
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "processing");
        assert_eq!(json["totalChapters"], 4);
        assert_eq!(json["processedChapters"], 1);
        assert_eq!(json["progress"], 25);
    }
}
