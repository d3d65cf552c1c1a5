use std::{path::Path, str::FromStr, time::Duration};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::{info, warn};

use super::{
    book::{Book, BookDetail, BookRow, BookStatus, BookStatusView},
    chapter::{Chapter, ChapterStage, ChapterStatus, ChapterSummary, NewChapter},
};
use crate::{
    ai_utils::ChapterAnalogy,
    error::{Error, Result},
    utils::now,
};

const BOOK_COLUMNS: &str =
    "id, title, status, total_chapters, processed_chapters, created_at, updated_at";
const CHAPTER_COLUMNS: &str = "id, book_id, chapter_number, title, original_text, status, stage, \
     analogy, image_prompt, image_url, attempts, updated_at";

/// Book state after a chapter completion has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionOutcome {
    pub status: BookStatus,
    pub processed_chapters: i64,
    pub total_chapters: i64,
    /// false when the chapter had already been counted by an earlier run
    pub counted_now: bool,
}

/// Storage of books and chapters.
#[derive(Debug, Clone)]
pub struct Library {
    pub database: SqlitePool,
}

impl Library {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            // concurrent chapter completions wait for the write lock
            .busy_timeout(Duration::from_secs(10));
        let database = SqlitePoolOptions::new().connect_with(options).await?;
        Self::new(database).await
    }

    /// Single-connection in-memory database, the memory db lives as long as the connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let database = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::new(database).await
    }

    pub async fn new(database: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&database).await?;
        Ok(Self { database })
    }

    /// Insert a book with its chapters, numbered from 1 in the given order.
    pub async fn create_book(&self, title: &str, chapters: &[NewChapter]) -> Result<Book> {
        let now = now();
        let total = chapters.len() as i64;
        let mut tx = self.database.begin().await?;
        let book_id = sqlx::query(
            "insert into book (title, status, total_chapters, processed_chapters, created_at, updated_at) \
             values (?, ?, ?, 0, ?, ?)",
        )
        .bind(title)
        .bind(BookStatus::Pending)
        .bind(total)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        for (idx, ch) in chapters.iter().enumerate() {
            sqlx::query(
                "insert into chapter (book_id, chapter_number, title, original_text, updated_at) \
                 values (?, ?, ?, ?, ?)",
            )
            .bind(book_id)
            .bind(idx as i64 + 1)
            .bind(&ch.title)
            .bind(&ch.text)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!(book_id, total_chapters = total, "created book {}", title);
        self.get_book(book_id).await
    }

    pub async fn delete_book(&self, book_id: i64) -> Result<()> {
        let deleted = sqlx::query("delete from book where id = ?")
            .bind(book_id)
            .execute(&self.database)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(Error::BookNotFound(book_id));
        }
        Ok(())
    }

    pub async fn find_book(&self, book_id: i64) -> Result<Option<Book>> {
        let row = sqlx::query_as::<_, BookRow>(&format!(
            "select {BOOK_COLUMNS} from book where id = ?"
        ))
        .bind(book_id)
        .fetch_optional(&self.database)
        .await?;
        Ok(row.map(Book::from))
    }

    pub async fn get_book(&self, book_id: i64) -> Result<Book> {
        self.find_book(book_id)
            .await?
            .ok_or(Error::BookNotFound(book_id))
    }

    /// Newest first.
    pub async fn list_books(&self) -> Result<Vec<Book>> {
        let rows = sqlx::query_as::<_, BookRow>(&format!(
            "select {BOOK_COLUMNS} from book order by created_at desc, id desc"
        ))
        .fetch_all(&self.database)
        .await?;
        Ok(rows.into_iter().map(Book::from).collect())
    }

    pub async fn get_book_detail(&self, book_id: i64) -> Result<BookDetail> {
        let book = self.get_book(book_id).await?;
        let chapters = self.get_chapters(book_id).await?;
        Ok(BookDetail { book, chapters })
    }

    pub async fn get_book_status(&self, book_id: i64) -> Result<BookStatusView> {
        let book = self.get_book(book_id).await?;
        let chapters = sqlx::query_as::<_, ChapterSummary>(
            "select id, chapter_number, title, status from chapter where book_id = ? order by chapter_number",
        )
        .bind(book_id)
        .fetch_all(&self.database)
        .await?;
        Ok(BookStatusView {
            status: book.status,
            total_chapters: book.total_chapters,
            processed_chapters: book.processed_chapters,
            progress: book.progress,
            chapters,
        })
    }

    pub async fn set_book_status(&self, book_id: i64, status: BookStatus) -> Result<()> {
        let updated = sqlx::query("update book set status = ?, updated_at = ? where id = ?")
            .bind(status)
            .bind(now())
            .bind(book_id)
            .execute(&self.database)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(Error::BookNotFound(book_id));
        }
        Ok(())
    }

    /// Marks the book failed unless it already completed. Returns whether it changed.
    pub async fn fail_book(&self, book_id: i64) -> Result<bool> {
        let updated = sqlx::query(
            "update book set status = ?, updated_at = ? where id = ? and status != ?",
        )
        .bind(BookStatus::Failed)
        .bind(now())
        .bind(book_id)
        .bind(BookStatus::Completed)
        .execute(&self.database)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn get_chapter(&self, chapter_id: i64) -> Result<Option<Chapter>> {
        let chapter = sqlx::query_as::<_, Chapter>(&format!(
            "select {CHAPTER_COLUMNS} from chapter where id = ?"
        ))
        .bind(chapter_id)
        .fetch_optional(&self.database)
        .await?;
        Ok(chapter)
    }

    /// Chapters in reading order.
    pub async fn get_chapters(&self, book_id: i64) -> Result<Vec<Chapter>> {
        let chapters = sqlx::query_as::<_, Chapter>(&format!(
            "select {CHAPTER_COLUMNS} from chapter where book_id = ? order by chapter_number"
        ))
        .bind(book_id)
        .fetch_all(&self.database)
        .await?;
        Ok(chapters)
    }

    pub async fn chapter_ids(&self, book_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "select id from chapter where book_id = ? order by chapter_number",
        )
        .bind(book_id)
        .fetch_all(&self.database)
        .await?;
        Ok(ids)
    }

    /// `(chapter_id, book_id)` of chapters left unfinished in books still processing,
    /// e.g. after a restart.
    pub async fn unfinished_chapters(&self) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "select chapter.id, chapter.book_id from chapter \
             inner join book on book.id = chapter.book_id \
             where book.status = ? and chapter.status in (?, ?) \
             order by chapter.book_id, chapter.chapter_number",
        )
        .bind(BookStatus::Processing)
        .bind(ChapterStatus::Pending)
        .bind(ChapterStatus::Processing)
        .fetch_all(&self.database)
        .await?;
        Ok(rows)
    }

    /// Moves the chapter to `processing` and counts the attempt, whatever its
    /// previous status. Returns the attempt number, or `None` when the book has
    /// no such chapter.
    pub async fn begin_chapter_attempt(&self, chapter_id: i64, book_id: i64) -> Result<Option<i64>> {
        let attempt = sqlx::query_scalar::<_, i64>(
            "update chapter set status = ?, stage = ?, attempts = attempts + 1, updated_at = ? \
             where id = ? and book_id = ? returning attempts",
        )
        .bind(ChapterStatus::Processing)
        .bind(ChapterStage::AwaitingAnalogy)
        .bind(now())
        .bind(chapter_id)
        .bind(book_id)
        .fetch_optional(&self.database)
        .await?;
        Ok(attempt)
    }

    pub async fn set_chapter_stage(&self, chapter_id: i64, stage: ChapterStage) -> Result<()> {
        sqlx::query("update chapter set stage = ?, updated_at = ? where id = ?")
            .bind(stage)
            .bind(now())
            .bind(chapter_id)
            .execute(&self.database)
            .await?;
        Ok(())
    }

    /// Persists the generated analogy and moves the chapter to `awaiting_image`.
    pub async fn save_analogy(&self, chapter_id: i64, analogy: &ChapterAnalogy) -> Result<()> {
        sqlx::query(
            "update chapter set analogy = ?, image_prompt = ?, stage = ?, updated_at = ? where id = ?",
        )
        .bind(&analogy.analogy)
        .bind(&analogy.image_prompt)
        .bind(ChapterStage::AwaitingImage)
        .bind(now())
        .bind(chapter_id)
        .execute(&self.database)
        .await?;
        Ok(())
    }

    pub async fn save_image_url(&self, chapter_id: i64, image_url: &str) -> Result<()> {
        sqlx::query("update chapter set image_url = ?, updated_at = ? where id = ?")
            .bind(image_url)
            .bind(now())
            .bind(chapter_id)
            .execute(&self.database)
            .await?;
        Ok(())
    }

    /// Marks the chapter failed, generated content is left untouched.
    pub async fn fail_chapter(&self, chapter_id: i64) -> Result<()> {
        sqlx::query("update chapter set status = ?, stage = ?, updated_at = ? where id = ?")
            .bind(ChapterStatus::Failed)
            .bind(ChapterStage::Failed)
            .bind(now())
            .bind(chapter_id)
            .execute(&self.database)
            .await?;
        Ok(())
    }

    /// Records a finished chapter in one transaction.
    ///
    /// The chapter is added to `processed_chapters` at most once over its
    /// lifetime, the counter never passes `total_chapters`, and the book flips to
    /// `completed` in the same statement that performs the last increment.
    pub async fn complete_chapter(&self, chapter_id: i64, book_id: i64) -> Result<CompletionOutcome> {
        let now = now();
        let mut tx = self.database.begin().await?;
        sqlx::query(
            "update chapter set status = ?, stage = ?, updated_at = ? where id = ? and book_id = ?",
        )
        .bind(ChapterStatus::Completed)
        .bind(ChapterStage::Completed)
        .bind(now)
        .bind(chapter_id)
        .bind(book_id)
        .execute(&mut *tx)
            .await?;
        let counted_now = sqlx::query(
            "update chapter set counted = 1 where id = ? and book_id = ? and counted = 0",
        )
        .bind(chapter_id)
        .bind(book_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;
        if counted_now {
            let incremented = sqlx::query(
                "update book set \
                 processed_chapters = processed_chapters + 1, \
                 status = case when processed_chapters + 1 >= total_chapters and total_chapters > 0 \
                     then ? else status end, \
                 updated_at = ? \
                 where id = ? and processed_chapters < total_chapters",
            )
            .bind(BookStatus::Completed)
            .bind(now)
            .bind(book_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if incremented == 0 {
                warn!(book_id, chapter_id, "processed chapter counter already at total");
            }
        }
        let (status, processed_chapters, total_chapters) =
            sqlx::query_as::<_, (BookStatus, i64, i64)>(
                "select status, processed_chapters, total_chapters from book where id = ?",
            )
            .bind(book_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::BookNotFound(book_id))?;
        tx.commit().await?;
        Ok(CompletionOutcome {
            status,
            processed_chapters,
            total_chapters,
            counted_now,
        })
    }

    /// Puts a failed chapter back to `pending` for a manual retry. The owning
    /// book returns to `processing` if it had failed.
    pub async fn reset_chapter(&self, chapter_id: i64) -> Result<Chapter> {
        let chapter = self
            .get_chapter(chapter_id)
            .await?
            .ok_or(Error::ChapterNotFound(chapter_id))?;
        if chapter.status != ChapterStatus::Failed {
            return Err(Error::InvalidState(format!(
                "chapter {} is {:?}, only failed chapters can be retried",
                chapter_id, chapter.status
            )));
        }
        let now = now();
        let mut tx = self.database.begin().await?;
        sqlx::query("update chapter set status = ?, stage = ?, updated_at = ? where id = ?")
            .bind(ChapterStatus::Pending)
            .bind(ChapterStage::Pending)
            .bind(now)
            .bind(chapter_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("update book set status = ?, updated_at = ? where id = ? and status = ?")
            .bind(BookStatus::Processing)
            .bind(now)
            .bind(chapter.book_id)
            .bind(BookStatus::Failed)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.get_chapter(chapter_id)
            .await?
            .ok_or(Error::ChapterNotFound(chapter_id))
    }
}
