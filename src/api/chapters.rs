use axum::{
    Router,
    extract::{Json, Path, State},
    routing::post,
};
use tracing::info;

use super::AppState;
use crate::{book::chapter::ChapterSummary, error::Result, processor::ProcessChapter};

#[utoipa::path(
    context_path = "/api",
    path = "/chapters/{id}/retry",
    method(post),
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Chapter reset and queued again", body = ChapterSummary),
        (status = 404, description = "Chapter not found"),
        (status = 409, description = "Chapter has not failed")
    )
)]
pub async fn retry_chapter(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ChapterSummary>> {
    let chapter = state.library.reset_chapter(id).await?;
    state.queue.enqueue(ProcessChapter {
        chapter_id: chapter.id,
        book_id: chapter.book_id,
    });
    info!(chapter_id = chapter.id, book_id = chapter.book_id, "chapter requeued");
    Ok(Json(ChapterSummary::from(&chapter)))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/chapters/{id}/retry", post(retry_chapter))
}
