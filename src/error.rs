pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Chapter not found: {0}")]
    ChapterNotFound(i64),
    #[error("Book not found: {0}")]
    BookNotFound(i64),
    #[error("Chapter {chapter_id} does not belong to book {book_id}")]
    ChapterBookMismatch { chapter_id: i64, book_id: i64 },
    #[error("Analogy generation failed: {0}")]
    Generation(String),
    #[error("Malformed model output: {0}")]
    MalformedOutput(String),
    #[error("Image generation failed: {0}")]
    ImageGeneration(String),
    #[error("Chapter run exceeded {secs}s")]
    Timeout { secs: u64 },
    #[error("The document contains no extractable text")]
    EmptyDocument,
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
    #[error("Uploads are temporarily disabled while we improve performance, please come back soon")]
    UploadsDisabled,
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("PDF parse failed: {0}")]
    Pdf(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the task runtime should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::ChapterNotFound(_)
                | Error::BookNotFound(_)
                | Error::ChapterBookMismatch { .. }
                | Error::InvalidState(_)
        )
    }
}
