use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use catalog::{SongQuery, SongSort};
use common::{Mood, Song};
use tracing::warn;

use crate::state::{AppState, ErrorResponse, JsonResult, ListResponse, SongListQuery};
use crate::utils::{catalog_error, cover_response, json_error, json_error_response};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

pub async fn list_songs(
    State(state): State<AppState>,
    Query(params): Query<SongListQuery>,
) -> JsonResult<ListResponse<Song>> {
    let mood = parse_mood_filter(params.mood.as_deref())?;
    let sort = parse_sort(params.sort.as_deref())?;
    let query = SongQuery {
        mood,
        artist: params.artist,
        search: params.search,
        sort,
        limit: params
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT),
        offset: params.offset.unwrap_or(0),
    };
    let (items, total) = state.songs.list(&query).map_err(catalog_error)?;
    Ok(Json(ListResponse { items, total }))
}

pub async fn get_song(
    State(state): State<AppState>,
    AxumPath(song_id): AxumPath<String>,
) -> JsonResult<Song> {
    match state.songs.find_by_id(&song_id).map_err(catalog_error)? {
        Some(song) => Ok(Json(song)),
        None => Err(json_error(StatusCode::NOT_FOUND, "song not found")),
    }
}

pub async fn get_song_cover(
    State(state): State<AppState>,
    AxumPath(song_id): AxumPath<String>,
) -> Response {
    let song = match state.songs.find_by_id(&song_id) {
        Ok(Some(song)) => song,
        Ok(None) => return json_error_response(StatusCode::NOT_FOUND, "song not found"),
        Err(err) => return catalog_error(err).into_response(),
    };
    let resolved = match state.resolver.resolve_image_path(&song) {
        Ok(resolved) => resolved,
        Err(err) => {
            warn!("No cover for song {}: {}", song.id, err);
            return json_error_response(StatusCode::NOT_FOUND, "cover not found");
        }
    };
    match tokio::fs::read(&resolved.path).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&resolved.path).first_or_octet_stream();
            cover_response(bytes, mime.essence_str())
        }
        Err(err) => {
            warn!("Failed to read cover {}: {}", resolved.path.display(), err);
            json_error_response(StatusCode::NOT_FOUND, "cover not found")
        }
    }
}

fn parse_mood_filter(
    value: Option<&str>,
) -> Result<Option<Mood>, (StatusCode, Json<ErrorResponse>)> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => Mood::parse(value)
            .map(Some)
            .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, format!("invalid mood: {}", value))),
        None => Ok(None),
    }
}

fn parse_sort(value: Option<&str>) -> Result<SongSort, (StatusCode, Json<ErrorResponse>)> {
    match value.map(str::trim).unwrap_or("") {
        "" => Ok(SongSort::Unsorted),
        "plays" => Ok(SongSort::Plays),
        "created_at" | "newest" => Ok(SongSort::CreatedAt),
        other => Err(json_error(
            StatusCode::BAD_REQUEST,
            format!("invalid sort: {}", other),
        )),
    }
}
