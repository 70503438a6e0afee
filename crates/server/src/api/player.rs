use axum::{
    extract::{Path as AxumPath, Request, State},
    response::Response,
};

use crate::state::AppState;
use crate::streaming::{stream_song, CachePolicy};
use crate::utils::stream_error_response;

pub async fn play_song(
    State(state): State<AppState>,
    AxumPath(song_id): AxumPath<String>,
    request: Request,
) -> Response {
    match stream_song(
        state.songs.as_ref(),
        &state.resolver,
        &song_id,
        request,
        CachePolicy::Playback,
    )
    .await
    {
        Ok(response) => response,
        Err(err) => stream_error_response(err),
    }
}
