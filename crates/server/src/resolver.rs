use std::fs;
use std::path::{Path, PathBuf};

use common::{file_basename, join_relpath, Mood, Song, MANIFEST_FILE, SONGS_DIR};
use serde::Serialize;
use tracing::{debug, warn};

use crate::manifest::load_manifest;

/// Filesystem roots that stored song paths are resolved against.
#[derive(Clone, Debug)]
pub struct MediaPaths {
    pub working_dir: PathBuf,
    pub static_root: PathBuf,
    pub upload_folder: PathBuf,
}

impl MediaPaths {
    pub fn songs_root(&self) -> PathBuf {
        self.static_root.join(SONGS_DIR)
    }

    pub fn mood_dir(&self, mood: Mood) -> PathBuf {
        self.songs_root().join(mood.dir_name())
    }

    pub fn manifest_path(&self, mood: Mood) -> PathBuf {
        self.mood_dir(mood).join(MANIFEST_FILE)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Stored,
    StaticRoot,
    UploadFolder,
    MoodDir,
    Manifest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    Audio,
    Image,
}

impl AssetKind {
    fn label(&self) -> &'static str {
        match self {
            AssetKind::Audio => "audio",
            AssetKind::Image => "image",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub source: CandidateSource,
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPath {
    pub path: PathBuf,
    pub source: CandidateSource,
}

#[derive(Clone, Debug, Serialize)]
pub struct CandidateProbe {
    pub source: CandidateSource,
    pub path: String,
    pub exists: bool,
    pub size: Option<u64>,
}

#[derive(Debug)]
pub enum ResolveError {
    /// The record carries no path for the requested asset.
    NoStoredPath,
    NotFound { checked: Vec<PathBuf> },
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::NoStoredPath => write!(f, "no stored path"),
            ResolveError::NotFound { checked } => {
                write!(f, "file not found ({} candidates checked)", checked.len())
            }
        }
    }
}

impl std::error::Error for ResolveError {}

#[derive(Clone, Debug)]
pub struct PathResolver {
    paths: MediaPaths,
}

impl PathResolver {
    pub fn new(paths: MediaPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &MediaPaths {
        &self.paths
    }

    /// Candidate locations for a stored path, most trusted first.
    pub fn candidates(&self, stored: &str, mood: Mood) -> Vec<Candidate> {
        let mut out = vec![
            Candidate {
                source: CandidateSource::Stored,
                path: self.paths.working_dir.join(stored),
            },
            Candidate {
                source: CandidateSource::StaticRoot,
                path: join_relpath(&self.paths.static_root, stored),
            },
        ];
        if let Some(name) = file_basename(stored) {
            out.push(Candidate {
                source: CandidateSource::UploadFolder,
                path: self.paths.upload_folder.join(name),
            });
            out.push(Candidate {
                source: CandidateSource::MoodDir,
                path: self.paths.mood_dir(mood).join(name),
            });
        }
        out
    }

    pub fn resolve_audio_path(&self, song: &Song) -> Result<ResolvedPath, ResolveError> {
        self.resolve(song, AssetKind::Audio)
    }

    pub fn resolve_image_path(&self, song: &Song) -> Result<ResolvedPath, ResolveError> {
        self.resolve(song, AssetKind::Image)
    }

    fn resolve(&self, song: &Song, kind: AssetKind) -> Result<ResolvedPath, ResolveError> {
        let stored = match stored_path(song, kind) {
            Some(stored) => stored,
            None => return Err(ResolveError::NoStoredPath),
        };

        let candidates = self.candidates(stored, song.mood);
        for candidate in &candidates {
            if is_regular_file(&candidate.path) {
                debug!(
                    "Resolved {} for song {} via {:?}: {}",
                    kind.label(),
                    song.id,
                    candidate.source,
                    candidate.path.display()
                );
                return Ok(ResolvedPath {
                    path: candidate.path.clone(),
                    source: candidate.source,
                });
            }
        }

        let mut checked: Vec<PathBuf> = candidates.into_iter().map(|c| c.path).collect();
        if let Some(path) = self.manifest_candidate(song, kind) {
            if is_regular_file(&path) {
                debug!(
                    "Resolved {} for song {} via manifest: {}",
                    kind.label(),
                    song.id,
                    path.display()
                );
                return Ok(ResolvedPath {
                    path,
                    source: CandidateSource::Manifest,
                });
            }
            checked.push(path);
        }
        Err(ResolveError::NotFound { checked })
    }

    /// Path built from the mood manifest entry whose title and artist match the song.
    fn manifest_candidate(&self, song: &Song, kind: AssetKind) -> Option<PathBuf> {
        let manifest_path = self.paths.manifest_path(song.mood);
        let manifest = match load_manifest(&manifest_path) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    "Skipping manifest lookup in {}: {}",
                    manifest_path.display(),
                    err
                );
                return None;
            }
        };
        let entry = manifest.find(&song.title, &song.artist)?;
        let name = match kind {
            AssetKind::Audio => entry.filename.as_str(),
            AssetKind::Image => entry.image.as_str(),
        };
        if name.trim().is_empty() {
            return None;
        }
        Some(join_relpath(&self.paths.mood_dir(song.mood), name))
    }

    /// Every audio candidate with its on-disk state, for diagnostics.
    pub fn probe_audio(&self, song: &Song) -> Vec<CandidateProbe> {
        let mut candidates = match stored_path(song, AssetKind::Audio) {
            Some(stored) => self.candidates(stored, song.mood),
            None => Vec::new(),
        };
        if let Some(path) = self.manifest_candidate(song, AssetKind::Audio) {
            candidates.push(Candidate {
                source: CandidateSource::Manifest,
                path,
            });
        }
        candidates
            .into_iter()
            .map(|candidate| {
                let size = fs::metadata(&candidate.path)
                    .ok()
                    .filter(|meta| meta.is_file())
                    .map(|meta| meta.len());
                CandidateProbe {
                    source: candidate.source,
                    path: candidate.path.display().to_string(),
                    exists: size.is_some(),
                    size,
                }
            })
            .collect()
    }
}

fn stored_path(song: &Song, kind: AssetKind) -> Option<&str> {
    let value = match kind {
        AssetKind::Audio => Some(song.file_path.as_str()),
        AssetKind::Image => song.image_path.as_deref(),
    };
    value.filter(|value| !value.trim().is_empty())
}

fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}
