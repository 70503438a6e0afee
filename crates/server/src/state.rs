use std::path::Path;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use catalog::SongStore;
use common::{ManifestEntry, Song};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::manifest::ManifestStore;
use crate::resolver::{CandidateProbe, CandidateSource, PathResolver};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<ServerConfig>>,
    pub songs: Arc<dyn SongStore>,
    pub resolver: PathResolver,
    pub manifests: ManifestStore,
}

impl AppState {
    pub fn new(config_path: &Path, config: ServerConfig, songs: Arc<dyn SongStore>) -> Self {
        let paths = config.media_paths(config_path);
        let manifests = ManifestStore::new(paths.clone(), config.lock_settings());
        Self {
            config: Arc::new(RwLock::new(config)),
            songs,
            resolver: PathResolver::new(paths),
            manifests,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct SongListQuery {
    pub mood: Option<String>,
    pub artist: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Serialize)]
pub struct ManifestSongView {
    pub song_id: Option<String>,
    #[serde(flatten)]
    pub entry: ManifestEntry,
}

#[derive(Serialize)]
pub struct MoodManifestResponse {
    pub mood: String,
    pub description: String,
    pub songs: Vec<ManifestSongView>,
}

#[derive(Serialize)]
pub struct AudioDiagnosticsResponse {
    pub song: Song,
    pub resolved: Option<String>,
    pub resolved_via: Option<CandidateSource>,
    pub candidates: Vec<CandidateProbe>,
}

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;
