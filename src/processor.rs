use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    ai_utils::{
        AnalogyGenerator, ChapterAnalogy, ImageGenerator, ImageRequest, MAX_CHAPTER_CHARS,
        truncate_chars,
    },
    book::{
        book::BookStatus,
        chapter::{Chapter, ChapterStage},
        library::Library,
    },
    error::{Error, Result},
};

/// Unit of work, one per chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessChapter {
    pub chapter_id: i64,
    pub book_id: i64,
}

/// Informational result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedChapter {
    pub chapter_id: i64,
    pub analogy: String,
    pub image_prompt: String,
}

/// Drives one chapter through `awaiting_analogy -> awaiting_image -> completed`.
pub struct ChapterProcessor<A, I> {
    library: Library,
    analogies: A,
    images: I,
}

impl<A: AnalogyGenerator, I: ImageGenerator> ChapterProcessor<A, I> {
    pub fn new(library: Library, analogies: A, images: I) -> Self {
        Self {
            library,
            analogies,
            images,
        }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub async fn run(&self, task: ProcessChapter) -> Result<ProcessedChapter> {
        let ProcessChapter {
            chapter_id,
            book_id,
        } = task;
        info!(chapter_id, book_id, "processing chapter");
        let owner = self
            .library
            .get_chapter(chapter_id)
            .await?
            .ok_or(Error::ChapterNotFound(chapter_id))?
            .book_id;
        if owner != book_id {
            error!(chapter_id, book_id, owner, "chapter belongs to another book");
            return Err(Error::ChapterBookMismatch {
                chapter_id,
                book_id,
            });
        }
        let attempt = self.library.begin_chapter_attempt(chapter_id, book_id).await?;
        let chapter = match (attempt, self.library.get_chapter(chapter_id).await?) {
            (Some(_), Some(chapter)) => chapter,
            _ => return Err(Error::ChapterNotFound(chapter_id)),
        };
        match self.drive(&chapter, book_id).await {
            Ok(done) => Ok(done),
            Err(e) => {
                error!(chapter_id, book_id, attempt = chapter.attempts, "chapter processing failed: {}", e);
                if let Err(mark_err) = self.library.fail_chapter(chapter_id).await {
                    error!(chapter_id, "mark chapter failed: {}", mark_err);
                }
                Err(e)
            }
        }
    }

    async fn drive(&self, chapter: &Chapter, book_id: i64) -> Result<ProcessedChapter> {
        let analogy = match chapter.persisted_analogy() {
            Some((analogy, image_prompt)) => {
                info!(chapter_id = chapter.id, "reusing analogy from an earlier attempt");
                self.library
                    .set_chapter_stage(chapter.id, ChapterStage::AwaitingImage)
                    .await?;
                ChapterAnalogy {
                    analogy: analogy.to_string(),
                    image_prompt: image_prompt.to_string(),
                }
            }
            None => {
                let text = truncate_chars(&chapter.original_text, MAX_CHAPTER_CHARS);
                let analogy = self
                    .analogies
                    .generate_analogy(&chapter.title, text)
                    .await?;
                info!(
                    chapter_id = chapter.id,
                    analogy_length = analogy.analogy.chars().count(),
                    "analogy generated"
                );
                self.library.save_analogy(chapter.id, &analogy).await?;
                analogy
            }
        };

        let image_url = self
            .images
            .generate_image(&ImageRequest {
                chapter_id: chapter.id,
                book_id,
                prompt: analogy.image_prompt.clone(),
            })
            .await?;
        self.library.save_image_url(chapter.id, &image_url).await?;

        let outcome = self.library.complete_chapter(chapter.id, book_id).await?;
        info!(
            chapter_id = chapter.id,
            book_id,
            processed = outcome.processed_chapters,
            total = outcome.total_chapters,
            "chapter completed"
        );
        if outcome.counted_now && outcome.status == BookStatus::Completed {
            info!(book_id, "book processing completed");
        }

        Ok(ProcessedChapter {
            chapter_id: chapter.id,
            analogy: analogy.analogy,
            image_prompt: analogy.image_prompt,
        })
    }
}
