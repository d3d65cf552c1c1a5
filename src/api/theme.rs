use axum::{
    Router,
    extract::Json,
    routing::{get, post},
};
use tower_cookies::Cookies;

use super::AppState;
use crate::theme::ThemeState;

#[utoipa::path(
    context_path = "/api",
    path = "/theme",
    method(get),
    responses((status = 200, description = "Current theme, light by default", body = ThemeState))
)]
pub async fn get_theme(cookies: Cookies) -> Json<ThemeState> {
    Json(ThemeState::load(&cookies))
}

#[utoipa::path(
    context_path = "/api",
    path = "/theme/toggle",
    method(post),
    responses((status = 200, description = "Theme after switching", body = ThemeState))
)]
pub async fn toggle_theme(cookies: Cookies) -> Json<ThemeState> {
    let mut state = ThemeState::load(&cookies);
    state.toggle(&cookies);
    Json(state)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/theme", get(get_theme))
        .route("/theme/toggle", post(toggle_theme))
}
