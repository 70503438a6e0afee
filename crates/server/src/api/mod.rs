pub mod moods;
pub mod player;
pub mod songs;

use axum::{response::IntoResponse, routing::get, Json, Router};

use crate::state::{AppState, HealthResponse};

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/songs", get(songs::list_songs))
        .route("/songs/:song_id", get(songs::get_song))
        .route("/songs/:song_id/cover", get(songs::get_song_cover))
        .route("/play/:song_id", get(player::play_song))
        .route("/moods", get(moods::list_moods))
        .route("/moods/:mood/manifest", get(moods::get_mood_manifest))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}
