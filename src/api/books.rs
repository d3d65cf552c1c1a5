use axum::{
    Router,
    extract::{DefaultBodyLimit, Json, Multipart, Path, State},
    http::StatusCode,
    routing::get,
};
use serde::Serialize;
use utoipa::ToSchema;

use super::{AppState, read_upload};
use crate::{
    book::book::{Book, BookDetail, BookList, BookStatusView},
    error::{Error, Result},
    ingest, runtime,
};

/// Multipart form accepted by the upload route.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    pub title: String,
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub book: Book,
}

#[utoipa::path(
    context_path = "/api",
    path = "/books",
    method(get),
    responses(
        (status = 200, description = "All books, newest first", body = BookList)
    )
)]
pub async fn list_books(State(state): State<AppState>) -> Result<Json<BookList>> {
    let books = state.library.list_books().await?;
    Ok(Json(BookList { books }))
}

#[utoipa::path(
    context_path = "/api",
    path = "/books/{id}",
    method(get),
    params(("id" = i64, Path, description = "Book id")),
    responses(
        (status = 200, description = "Book with its chapters in reading order", body = BookDetail),
        (status = 404, description = "Book not found")
    )
)]
pub async fn get_book(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<BookDetail>> {
    Ok(Json(state.library.get_book_detail(id).await?))
}

#[utoipa::path(
    context_path = "/api",
    path = "/books/{id}/status",
    method(get),
    params(("id" = i64, Path, description = "Book id")),
    responses(
        (status = 200, description = "Processing progress", body = BookStatusView),
        (status = 404, description = "Book not found")
    )
)]
pub async fn get_book_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BookStatusView>> {
    Ok(Json(state.library.get_book_status(id).await?))
}

#[utoipa::path(
    context_path = "/api",
    path = "/books",
    method(post),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Book created and queued for processing", body = UploadResponse),
        (status = 400, description = "Missing title or file, or not a readable PDF"),
        (status = 503, description = "Uploads are disabled")
    )
)]
pub async fn upload_book(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    if !state.uploads_enabled {
        return Err(Error::UploadsDisabled);
    }
    let upload = read_upload(multipart).await?;
    let book = ingest::ingest_pdf(&state.library, &upload.title, upload.file).await?;
    runtime::start_book(&state.library, state.queue.as_ref(), book.id).await?;
    let book = state.library.get_book(book.id).await?;
    Ok((StatusCode::CREATED, Json(UploadResponse { book })))
}

pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/books",
            get(list_books)
                .post(upload_book)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/books/{id}", get(get_book))
        .route("/books/{id}/status", get(get_book_status))
}
