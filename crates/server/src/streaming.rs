use std::path::Path;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use catalog::{CatalogError, SongStore};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, info, warn};

use crate::resolver::{PathResolver, ResolveError};

/// Content type for audio files whose extension is not in the table below.
/// Playback and admin preview share it so clients never see two answers.
pub const DEFAULT_AUDIO_MIME: &str = "application/octet-stream";

pub fn audio_mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("m4a") => "audio/mp4",
        _ => DEFAULT_AUDIO_MIME,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CachePolicy {
    /// Normal playback: cacheable for a day.
    Playback,
    /// Admin inspection: always revalidate.
    NoCache,
}

impl CachePolicy {
    pub fn header_value(&self) -> HeaderValue {
        match self {
            CachePolicy::Playback => HeaderValue::from_static("public, max-age=86400"),
            CachePolicy::NoCache => HeaderValue::from_static("no-cache"),
        }
    }
}

#[derive(Debug)]
pub enum StreamError {
    SongNotFound,
    AudioFileMissing,
    Catalog(CatalogError),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::SongNotFound => write!(f, "song not found"),
            StreamError::AudioFileMissing => write!(f, "audio file does not exist"),
            StreamError::Catalog(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<CatalogError> for StreamError {
    fn from(err: CatalogError) -> Self {
        StreamError::Catalog(err)
    }
}

/// Looks up a song, resolves its audio file and serves it. Range and
/// conditional requests are answered by `ServeFile` from the request headers.
pub async fn stream_song(
    songs: &dyn SongStore,
    resolver: &PathResolver,
    song_id: &str,
    request: Request,
    cache: CachePolicy,
) -> Result<Response, StreamError> {
    let song = songs
        .find_by_id(song_id)?
        .ok_or(StreamError::SongNotFound)?;

    let resolved = match resolver.resolve_audio_path(&song) {
        Ok(resolved) => resolved,
        Err(ResolveError::NotFound { checked }) => {
            warn!(
                "No audio file for song {} ({}); checked {:?}",
                song.id, song.file_path, checked
            );
            return Err(StreamError::AudioFileMissing);
        }
        Err(ResolveError::NoStoredPath) => {
            warn!("Song {} has no stored audio path", song.id);
            return Err(StreamError::AudioFileMissing);
        }
    };
    let content_type = audio_mime_for(&resolved.path);

    match songs.increment_play_count(&song.id) {
        Ok(Some(plays)) => debug!("Song {} now has {} plays", song.id, plays),
        Ok(None) => warn!("Song {} vanished before its play was counted", song.id),
        Err(err) => warn!("Failed to count play for song {}: {}", song.id, err),
    }

    info!(
        "Streaming song {} from {} as {}",
        song.id,
        resolved.path.display(),
        content_type
    );
    let response = match ServeFile::new(&resolved.path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };
    if response.status() == StatusCode::NOT_FOUND {
        return Err(StreamError::AudioFileMissing);
    }
    Ok(with_stream_headers(response, content_type, cache))
}

fn with_stream_headers(
    mut response: Response,
    content_type: &'static str,
    cache: CachePolicy,
) -> Response {
    let has_body = response_has_body(response.status());
    let headers = response.headers_mut();
    if has_body {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CACHE_CONTROL, cache.header_value());
    response
}

fn response_has_body(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    use catalog::{NewSong, RedbSongStore, UnavailableStore};
    use tempfile::TempDir;

    use crate::resolver::MediaPaths;

    struct Fixture {
        _dir: TempDir,
        store: RedbSongStore,
        resolver: PathResolver,
        paths: MediaPaths,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let paths = MediaPaths {
            working_dir: dir.path().to_path_buf(),
            static_root: dir.path().join("static"),
            upload_folder: dir.path().join("uploads"),
        };
        let store = RedbSongStore::open(&dir.path().join("songs.redb")).unwrap();
        Fixture {
            resolver: PathResolver::new(paths.clone()),
            paths,
            store,
            _dir: dir,
        }
    }

    fn add_song(fx: &Fixture, file_path: &str, contents: Option<&[u8]>) -> String {
        if let Some(contents) = contents {
            let path: PathBuf = fx.paths.static_root.join(file_path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        fx.store
            .insert(NewSong {
                title: "Rainy Day".to_string(),
                artist: "Cloud Nine".to_string(),
                mood: "Sad".to_string(),
                file_path: file_path.to_string(),
                image_path: None,
            })
            .unwrap()
            .id
    }

    fn get(range: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/play");
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn mime_table_and_default() {
        assert_eq!(audio_mime_for(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(audio_mime_for(Path::new("a.WAV")), "audio/wav");
        assert_eq!(audio_mime_for(Path::new("a.ogg")), "audio/ogg");
        assert_eq!(audio_mime_for(Path::new("a.m4a")), "audio/mp4");
        assert_eq!(audio_mime_for(Path::new("a.flac")), DEFAULT_AUDIO_MIME);
        assert_eq!(audio_mime_for(Path::new("noext")), DEFAULT_AUDIO_MIME);
    }

    #[tokio::test]
    async fn streams_with_playback_headers_and_counts_play() {
        let fx = fixture();
        let id = add_song(&fx, "Sad_(mood)/rainy_day.mp3", Some(b"0123456789"));

        let response = stream_song(&fx.store, &fx.resolver, &id, get(None), CachePolicy::Playback)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=86400");
        assert_eq!(fx.store.find_by_id(&id).unwrap().unwrap().plays, 1);
    }

    #[tokio::test]
    async fn admin_preview_is_not_cached() {
        let fx = fixture();
        let id = add_song(&fx, "Sad_(mood)/rainy_day.ogg", Some(b"0123456789"));
        let response = stream_song(&fx.store, &fx.resolver, &id, get(None), CachePolicy::NoCache)
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/ogg");
    }

    #[tokio::test]
    async fn range_requests_are_delegated_to_file_service() {
        let fx = fixture();
        let id = add_song(&fx, "Sad_(mood)/rainy_day.mp3", Some(b"0123456789"));
        let response = stream_song(
            &fx.store,
            &fx.resolver,
            &id,
            get(Some("bytes=2-5")),
            CachePolicy::Playback,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    }

    #[tokio::test]
    async fn play_count_grows_by_number_of_streams() {
        let fx = fixture();
        let id = add_song(&fx, "Sad_(mood)/rainy_day.mp3", Some(b"abc"));
        for _ in 0..3 {
            stream_song(&fx.store, &fx.resolver, &id, get(None), CachePolicy::Playback)
                .await
                .unwrap();
        }
        assert_eq!(fx.store.find_by_id(&id).unwrap().unwrap().plays, 3);
    }

    #[tokio::test]
    async fn missing_file_is_distinct_from_missing_song() {
        let fx = fixture();
        let id = add_song(&fx, "Sad_(mood)/missing.mp3", None);

        let err = stream_song(&fx.store, &fx.resolver, &id, get(None), CachePolicy::Playback)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::AudioFileMissing));
        assert_eq!(fx.store.find_by_id(&id).unwrap().unwrap().plays, 0);

        let err = stream_song(&fx.store, &fx.resolver, "nope", get(None), CachePolicy::Playback)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::SongNotFound));
    }

    #[tokio::test]
    async fn unavailable_catalog_is_reported() {
        let fx = fixture();
        let store = UnavailableStore::new("down");
        let err = stream_song(&store, &fx.resolver, "x", get(None), CachePolicy::Playback)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::Catalog(CatalogError::Unavailable(_))
        ));
    }
}
