use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use catalog::CatalogError;

use crate::songs::SongError;
use crate::state::ErrorResponse;
use crate::streaming::StreamError;

pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn json_error_response(status: StatusCode, message: impl Into<String>) -> Response {
    json_error(status, message).into_response()
}

pub fn catalog_status(err: &CatalogError) -> StatusCode {
    match err {
        CatalogError::Invalid(_) => StatusCode::BAD_REQUEST,
        CatalogError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn catalog_error(err: CatalogError) -> (StatusCode, Json<ErrorResponse>) {
    json_error(catalog_status(&err), err.to_string())
}

pub fn stream_error_response(err: StreamError) -> Response {
    match err {
        StreamError::SongNotFound | StreamError::AudioFileMissing => {
            json_error_response(StatusCode::NOT_FOUND, err.to_string())
        }
        StreamError::Catalog(err) => catalog_error(err).into_response(),
    }
}

pub fn song_error_response(err: SongError) -> Response {
    let status = match &err {
        SongError::NotFound => StatusCode::NOT_FOUND,
        SongError::Invalid(_) => StatusCode::BAD_REQUEST,
        SongError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        SongError::Catalog(err) => catalog_status(err),
        SongError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error_response(status, err.to_string())
}

pub fn cover_response(data: Vec<u8>, mime: &str) -> Response {
    let mut response = Response::new(axum::body::Body::from(data));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=86400"),
    );
    response
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Compares without short-circuiting on the first differing byte.
pub fn tokens_match(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc "));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match("secret", "secret"));
        assert!(!tokens_match("secreT", "secret"));
        assert!(!tokens_match("short", "secret"));
    }

    #[test]
    fn missing_file_and_missing_song_share_status_but_not_message() {
        let missing_song = stream_error_response(StreamError::SongNotFound);
        let missing_file = stream_error_response(StreamError::AudioFileMissing);
        assert_eq!(missing_song.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing_file.status(), StatusCode::NOT_FOUND);
        assert_ne!(
            StreamError::SongNotFound.to_string(),
            StreamError::AudioFileMissing.to_string()
        );
    }

    #[test]
    fn unavailable_catalog_maps_to_503() {
        let response =
            stream_error_response(StreamError::Catalog(CatalogError::Unavailable("x".into())));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
