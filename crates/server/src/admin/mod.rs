pub mod songs;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};

use crate::state::AppState;
use crate::utils::{extract_token, json_error_response, tokens_match};

/// Room for the audio part, the cover part and the multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn admin_router(state: AppState) -> Router {
    let upload_limit = state
        .config
        .read()
        .max_upload_bytes
        .saturating_mul(2)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(
            "/songs",
            post(songs::admin_upload_song).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/songs/:song_id", delete(songs::admin_delete_song))
        .route("/songs/:song_id/play", get(songs::admin_preview_song))
        .route(
            "/songs/:song_id/diagnostics",
            get(songs::admin_song_diagnostics),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state)
}

async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let expected = state.config.read().admin_token.trim().to_string();
    if expected.is_empty() {
        return json_error_response(StatusCode::FORBIDDEN, "admin access is disabled");
    }
    match extract_token(req.headers()) {
        Some(token) if tokens_match(&token, &expected) => next.run(req).await,
        _ => json_error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
    }
}
