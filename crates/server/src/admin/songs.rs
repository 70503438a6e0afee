use axum::{
    extract::{multipart::Field, Multipart, Path as AxumPath, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::songs::{create_song, delete_song, SongUpload, UploadedFile};
use crate::state::{AppState, AudioDiagnosticsResponse, JsonResult};
use crate::streaming::{stream_song, CachePolicy};
use crate::utils::{
    catalog_error, json_error, json_error_response, song_error_response, stream_error_response,
};

#[derive(Default)]
struct UploadForm {
    title: Option<String>,
    artist: Option<String>,
    mood: Option<String>,
    audio: Option<UploadedFile>,
    cover: Option<UploadedFile>,
}

pub async fn admin_upload_song(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut form = UploadForm::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return json_error_response(err.status(), err.body_text()),
        };
        let name = field.name().unwrap_or_default().to_string();
        let result = match name.as_str() {
            "title" => field.text().await.map(|value| form.title = Some(value)),
            "artist" => field.text().await.map(|value| form.artist = Some(value)),
            "mood" => field.text().await.map(|value| form.mood = Some(value)),
            "audio" => read_file(field).await.map(|file| form.audio = file),
            "cover" => read_file(field).await.map(|file| form.cover = file),
            _ => Ok(()),
        };
        if let Err(err) = result {
            return json_error_response(err.status(), err.body_text());
        }
    }

    let audio = match form.audio {
        Some(audio) => audio,
        None => return json_error_response(StatusCode::BAD_REQUEST, "audio file is required"),
    };
    let upload = SongUpload {
        title: form.title.unwrap_or_default(),
        artist: form.artist.unwrap_or_default(),
        mood: form.mood.unwrap_or_default(),
        audio,
        cover: form.cover,
    };

    let result = tokio::task::spawn_blocking(move || create_song(&state, upload)).await;
    match result {
        Ok(Ok(song)) => (StatusCode::CREATED, Json(song)).into_response(),
        Ok(Err(err)) => song_error_response(err),
        Err(err) => {
            error!("Upload task failed: {}", err);
            json_error_response(StatusCode::INTERNAL_SERVER_ERROR, "upload failed")
        }
    }
}

/// Browsers send an empty part for an untouched file input.
async fn read_file(
    field: Field<'_>,
) -> Result<Option<UploadedFile>, axum::extract::multipart::MultipartError> {
    let filename = field.file_name().unwrap_or_default().trim().to_string();
    let data = field.bytes().await?;
    if filename.is_empty() && data.is_empty() {
        return Ok(None);
    }
    Ok(Some(UploadedFile { filename, data }))
}

pub async fn admin_delete_song(
    State(state): State<AppState>,
    AxumPath(song_id): AxumPath<String>,
) -> Response {
    let result = tokio::task::spawn_blocking(move || delete_song(&state, &song_id)).await;
    match result {
        Ok(Ok(song)) => Json(song).into_response(),
        Ok(Err(err)) => song_error_response(err),
        Err(err) => {
            error!("Delete task failed: {}", err);
            json_error_response(StatusCode::INTERNAL_SERVER_ERROR, "delete failed")
        }
    }
}

pub async fn admin_preview_song(
    State(state): State<AppState>,
    AxumPath(song_id): AxumPath<String>,
    request: Request,
) -> Response {
    match stream_song(
        state.songs.as_ref(),
        &state.resolver,
        &song_id,
        request,
        CachePolicy::NoCache,
    )
    .await
    {
        Ok(response) => response,
        Err(err) => stream_error_response(err),
    }
}

pub async fn admin_song_diagnostics(
    State(state): State<AppState>,
    AxumPath(song_id): AxumPath<String>,
) -> JsonResult<AudioDiagnosticsResponse> {
    let song = match state.songs.find_by_id(&song_id).map_err(catalog_error)? {
        Some(song) => song,
        None => return Err(json_error(StatusCode::NOT_FOUND, "song not found")),
    };
    let candidates = state.resolver.probe_audio(&song);
    let (resolved, resolved_via) = match state.resolver.resolve_audio_path(&song) {
        Ok(resolved) => (
            Some(resolved.path.display().to_string()),
            Some(resolved.source),
        ),
        Err(_) => (None, None),
    };
    Ok(Json(AudioDiagnosticsResponse {
        song,
        resolved,
        resolved_via,
        candidates,
    }))
}
