use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ChapterStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Durable position of a chapter in the two-phase pipeline.
///
/// `pending -> awaiting_analogy -> awaiting_image -> completed`, any stage may
/// move to `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ChapterStage {
    Pending,
    AwaitingAnalogy,
    AwaitingImage,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: i64,
    pub book_id: i64,
    pub chapter_number: i64,
    pub title: String,
    pub original_text: String,
    pub status: ChapterStatus,
    pub stage: ChapterStage,
    pub analogy: Option<String>,
    pub image_prompt: Option<String>,
    pub image_url: Option<String>,
    pub attempts: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Chapter {
    /// Analogy and image prompt persisted by an earlier attempt, if both exist.
    pub fn persisted_analogy(&self) -> Option<(&str, &str)> {
        match (self.analogy.as_deref(), self.image_prompt.as_deref()) {
            (Some(analogy), Some(prompt)) if !analogy.is_empty() && !prompt.is_empty() => {
                Some((analogy, prompt))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChapterSummary {
    pub id: i64,
    pub chapter_number: i64,
    pub title: String,
    pub status: ChapterStatus,
}

impl From<&Chapter> for ChapterSummary {
    fn from(chapter: &Chapter) -> Self {
        Self {
            id: chapter.id,
            chapter_number: chapter.chapter_number,
            title: chapter.title.clone(),
            status: chapter.status,
        }
    }
}

/// A chapter detected at ingestion, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChapter {
    pub title: String,
    pub text: String,
}
