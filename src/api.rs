pub mod books;
pub mod chapters;
pub mod theme;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Multipart,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_cookies::CookieManagerLayer;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::error;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{book::library::Library, error::Error, runtime::ChapterQueue};

#[derive(Clone)]
pub struct AppState {
    pub library: Library,
    pub queue: Arc<dyn ChapterQueue>,
    pub uploads_enabled: bool,
    pub max_upload_bytes: usize,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        books::list_books,
        books::get_book,
        books::get_book_status,
        books::upload_book,
        chapters::retry_chapter,
        theme::get_theme,
        theme::toggle_theme,
    ),
    info(title = "analogy reader", description = "Books, chapter analogies and processing status")
)]
pub struct ApiDoc;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(books::routes(state.max_upload_bytes))
        .merge(chapters::routes())
        .merge(theme::routes());
    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CookieManagerLayer::new())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// `file` and `title` fields of an upload form.
pub struct Upload {
    pub title: String,
    pub file: Vec<u8>,
}

pub async fn read_upload(mut multipart: Multipart) -> Result<Upload, Error> {
    let mut title = None;
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidUpload(format!("failed to read field: {}", e)))?
    {
        match field.name() {
            Some("title") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::InvalidUpload(format!("failed to read title: {}", e)))?;
                title = Some(text);
            }
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::InvalidUpload(format!("failed to read file: {}", e)))?;
                file = Some(bytes.to_vec());
            }
            _ => {}
        }
    }
    match (title, file) {
        (Some(title), Some(file)) => Ok(Upload { title, file }),
        (None, _) => Err(Error::InvalidUpload("missing title field".to_string())),
        (_, None) => Err(Error::InvalidUpload("missing file field".to_string())),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::ChapterNotFound(_) | Error::BookNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidUpload(_) | Error::EmptyDocument => StatusCode::BAD_REQUEST,
            Error::Pdf(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::UploadsDisabled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
