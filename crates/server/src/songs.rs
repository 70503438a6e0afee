use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use catalog::{CatalogError, NewSong};
use common::{mood_file_relpath, Mood, Song, DEFAULT_COVER};
use tracing::{info, warn};
use uuid::Uuid;

use crate::resolver::{CandidateSource, ResolveError, ResolvedPath};
use crate::state::AppState;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];
const MAX_STEM_LEN: usize = 64;

pub struct UploadedFile {
    pub filename: String,
    pub data: Bytes,
}

pub struct SongUpload {
    pub title: String,
    pub artist: String,
    pub mood: String,
    pub audio: UploadedFile,
    pub cover: Option<UploadedFile>,
}

#[derive(Debug)]
pub enum SongError {
    NotFound,
    Invalid(String),
    TooLarge { limit: usize },
    Io(std::io::Error),
    Catalog(CatalogError),
}

impl std::fmt::Display for SongError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SongError::NotFound => write!(f, "song not found"),
            SongError::Invalid(message) => write!(f, "{}", message),
            SongError::TooLarge { limit } => write!(f, "file exceeds {} bytes", limit),
            SongError::Io(err) => write!(f, "io error: {}", err),
            SongError::Catalog(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for SongError {}

impl From<std::io::Error> for SongError {
    fn from(err: std::io::Error) -> Self {
        SongError::Io(err)
    }
}

impl From<CatalogError> for SongError {
    fn from(err: CatalogError) -> Self {
        SongError::Catalog(err)
    }
}

/// Stores the uploaded files in the mood directory and inserts the record.
/// The manifest append runs only after the insert and never fails the upload.
pub fn create_song(state: &AppState, upload: SongUpload) -> Result<Song, SongError> {
    let title = upload.title.trim();
    let artist = upload.artist.trim();
    if title.is_empty() || artist.is_empty() {
        return Err(SongError::Invalid(
            "title, artist and mood are required".to_string(),
        ));
    }
    let mood = Mood::parse(&upload.mood)
        .ok_or_else(|| SongError::Invalid(format!("invalid mood: {}", upload.mood.trim())))?;

    let limit = state.config.read().max_upload_bytes;
    let audio_ext = checked_extension(&upload.audio.filename, AUDIO_EXTENSIONS, "audio")?;
    check_size(&upload.audio, limit)?;
    let cover_ext = match &upload.cover {
        Some(cover) => {
            check_size(cover, limit)?;
            Some(checked_extension(&cover.filename, IMAGE_EXTENSIONS, "image")?)
        }
        None => None,
    };

    let mood_dir = state.resolver.paths().mood_dir(mood);
    fs::create_dir_all(&mood_dir)?;

    let audio_name = unique_filename(&upload.audio.filename, audio_ext);
    let audio_path = mood_dir.join(&audio_name);
    fs::write(&audio_path, &upload.audio.data)?;
    let mut written = vec![audio_path];

    let mut image_path = None;
    if let (Some(cover), Some(ext)) = (&upload.cover, cover_ext) {
        let name = unique_filename(&cover.filename, ext);
        let path = mood_dir.join(&name);
        if let Err(err) = fs::write(&path, &cover.data) {
            remove_files(&written);
            return Err(err.into());
        }
        written.push(path);
        image_path = Some(mood_file_relpath(mood, &name));
    }

    let inserted = state.songs.insert(NewSong {
        title: title.to_string(),
        artist: artist.to_string(),
        mood: mood.as_str().to_string(),
        file_path: mood_file_relpath(mood, &audio_name),
        image_path,
    });
    let song = match inserted {
        Ok(song) => song,
        Err(err) => {
            remove_files(&written);
            return Err(err.into());
        }
    };
    info!("Added song {} ({} - {}) to {}", song.id, song.artist, song.title, mood);

    if let Err(err) = state.manifests.on_song_created(&song) {
        warn!("Failed to add song {} to the {} manifest: {}", song.id, mood, err);
    }
    Ok(song)
}

/// Deletes the record, then makes a best-effort pass over its files and
/// manifest entry. Cleanup problems are logged and never undo the delete.
pub fn delete_song(state: &AppState, song_id: &str) -> Result<Song, SongError> {
    let song = state
        .songs
        .find_by_id(song_id)?
        .ok_or(SongError::NotFound)?;
    if !state.songs.delete_by_id(&song.id)? {
        return Err(SongError::NotFound);
    }
    info!("Deleted song record {} ({} - {})", song.id, song.artist, song.title);

    remove_resolved(&song, "audio", state.resolver.resolve_audio_path(&song));
    let has_own_cover = song
        .image_path
        .as_deref()
        .map(|path| path != DEFAULT_COVER)
        .unwrap_or(false);
    if has_own_cover {
        remove_resolved(&song, "image", state.resolver.resolve_image_path(&song));
    }

    if let Err(err) = state.manifests.on_song_deleted(&song) {
        warn!(
            "Failed to remove song {} from the {} manifest: {}",
            song.id, song.mood, err
        );
    }
    Ok(song)
}

/// Deletes the file only when it was found through the record's own path.
/// A manifest match keys on title and artist, so it may be another song's file.
fn remove_resolved(song: &Song, label: &str, resolved: Result<ResolvedPath, ResolveError>) {
    match resolved {
        Ok(resolved) if resolved.source == CandidateSource::Manifest => warn!(
            "Leaving {} file {} in place: song {} only matched it through the manifest",
            label,
            resolved.path.display(),
            song.id
        ),
        Ok(resolved) => match fs::remove_file(&resolved.path) {
            Ok(()) => info!("Deleted {} file {}", label, resolved.path.display()),
            Err(err) => warn!(
                "Failed to delete {} file {}: {}",
                label,
                resolved.path.display(),
                err
            ),
        },
        Err(err) => warn!("No {} file to delete for song {}: {}", label, song.id, err),
    }
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = fs::remove_file(path) {
            warn!("Failed to clean up {}: {}", path.display(), err);
        }
    }
}

fn check_size(file: &UploadedFile, limit: usize) -> Result<(), SongError> {
    if file.data.is_empty() {
        return Err(SongError::Invalid(format!("{} is empty", file.filename)));
    }
    if file.data.len() > limit {
        return Err(SongError::TooLarge { limit });
    }
    Ok(())
}

fn checked_extension(
    filename: &str,
    allowed: &[&'static str],
    label: &str,
) -> Result<&'static str, SongError> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    allowed
        .iter()
        .copied()
        .find(|candidate| *candidate == ext)
        .ok_or_else(|| {
            SongError::Invalid(format!(
                "invalid {} file type; allowed: {}",
                label,
                allowed.join(", ")
            ))
        })
}

/// `<8 hex chars>_<sanitized stem>.<ext>`, safe to place in a mood directory.
fn unique_filename(original: &str, ext: &str) -> String {
    let stem = Path::new(original)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(sanitize_stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "track".to_string());
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_{}.{}", &id[..8], stem, ext)
}

fn sanitize_stem(value: &str) -> String {
    value
        .chars()
        .filter_map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                Some(ch)
            } else if ch.is_whitespace() {
                Some('_')
            } else {
                None
            }
        })
        .take(MAX_STEM_LEN)
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}
