use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    Json,
};
use catalog::SongQuery;
use common::{Mood, Song};
use tracing::warn;

use crate::state::{AppState, JsonResult, ListResponse, ManifestSongView, MoodManifestResponse};
use crate::utils::{catalog_error, json_error};

pub async fn list_moods(State(state): State<AppState>) -> JsonResult<ListResponse<Mood>> {
    let items = state.songs.moods().map_err(catalog_error)?;
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

/// The manifest as stored on disk, with each entry linked to its catalog record
/// when one with the same title and artist exists.
pub async fn get_mood_manifest(
    State(state): State<AppState>,
    AxumPath(mood): AxumPath<String>,
) -> JsonResult<MoodManifestResponse> {
    let mood = Mood::parse(&mood)
        .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, format!("invalid mood: {}", mood)))?;
    let manifest = state.manifests.read_manifest(mood);

    let query = SongQuery {
        mood: Some(mood),
        ..SongQuery::default()
    };
    let songs: Vec<Song> = match state.songs.list(&query) {
        Ok((songs, _)) => songs,
        Err(err) => {
            warn!("Serving the {} manifest without catalog ids: {}", mood, err);
            Vec::new()
        }
    };

    let entries = manifest
        .songs
        .into_iter()
        .map(|entry| ManifestSongView {
            song_id: songs
                .iter()
                .find(|song| entry.matches(&song.title, &song.artist))
                .map(|song| song.id.clone()),
            entry,
        })
        .collect();
    Ok(Json(MoodManifestResponse {
        mood: mood.as_str().to_string(),
        description: if manifest.description.is_empty() {
            mood.default_description()
        } else {
            manifest.description
        },
        songs: entries,
    }))
}
