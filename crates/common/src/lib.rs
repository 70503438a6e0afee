use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "info.json";
/// Directory under the static root that holds the per-mood directories.
pub const SONGS_DIR: &str = "songs";
pub const DEFAULT_COVER: &str = "img/default-cover.jpg";
pub const DEFAULT_MANIFEST_IMAGE: &str = "cover.jpg";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mood {
    Happy,
    Chill,
    Energetic,
    Romantic,
    Focus,
    Angry,
    Dark,
    Bright,
    Funky,
    Love,
    Uplifting,
    Sad,
    Relaxed,
    Calm,
}

impl Mood {
    pub const ALL: [Mood; 14] = [
        Mood::Happy,
        Mood::Chill,
        Mood::Energetic,
        Mood::Romantic,
        Mood::Focus,
        Mood::Angry,
        Mood::Dark,
        Mood::Bright,
        Mood::Funky,
        Mood::Love,
        Mood::Uplifting,
        Mood::Sad,
        Mood::Relaxed,
        Mood::Calm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Happy => "Happy",
            Mood::Chill => "Chill",
            Mood::Energetic => "Energetic",
            Mood::Romantic => "Romantic",
            Mood::Focus => "Focus",
            Mood::Angry => "Angry",
            Mood::Dark => "Dark",
            Mood::Bright => "Bright",
            Mood::Funky => "Funky",
            Mood::Love => "Love",
            Mood::Uplifting => "Uplifting",
            Mood::Sad => "Sad",
            Mood::Relaxed => "Relaxed",
            Mood::Calm => "Calm",
        }
    }

    /// Accepts the canonical name in any ASCII case.
    pub fn parse(value: &str) -> Option<Mood> {
        let value = value.trim();
        Mood::ALL
            .iter()
            .copied()
            .find(|mood| mood.as_str().eq_ignore_ascii_case(value))
    }

    /// Directory holding this mood's audio files and manifest, e.g. `Sad_(mood)`.
    pub fn dir_name(&self) -> String {
        format!("{}_(mood)", self.as_str())
    }

    pub fn default_description(&self) -> String {
        format!("{} songs and tracks", self.as_str())
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub mood: Mood,
    pub file_path: String,
    #[serde(default)]
    pub image_path: Option<String>,
    pub plays: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub title: String,
    pub artist: String,
    pub filename: String,
    #[serde(default)]
    pub image: String,
}

impl ManifestEntry {
    pub fn for_song(song: &Song) -> Self {
        let image = song
            .image_path
            .as_deref()
            .and_then(file_basename)
            .unwrap_or(DEFAULT_MANIFEST_IMAGE);
        Self {
            title: song.title.clone(),
            artist: song.artist.clone(),
            filename: file_basename(&song.file_path).unwrap_or_default().to_string(),
            image: image.to_string(),
        }
    }

    pub fn matches(&self, title: &str, artist: &str) -> bool {
        self.title == title && self.artist == artist
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MoodManifest {
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub songs: Vec<ManifestEntry>,
}

impl MoodManifest {
    pub fn for_mood(mood: Mood) -> Self {
        Self {
            mood: mood.as_str().to_string(),
            description: mood.default_description(),
            songs: Vec::new(),
        }
    }

    pub fn find(&self, title: &str, artist: &str) -> Option<&ManifestEntry> {
        self.songs.iter().find(|entry| entry.matches(title, artist))
    }
}

/// Stored path of a file placed in a mood directory, relative to the static root.
pub fn mood_file_relpath(mood: Mood, name: &str) -> String {
    format!("{}/{}/{}", SONGS_DIR, mood.dir_name(), name)
}

/// Pretty JSON with four-space indentation, the on-disk manifest format.
pub fn encode_manifest(manifest: &MoodManifest) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    manifest.serialize(&mut serializer)?;
    Ok(out)
}

/// Converts separators to `/` and drops leading slashes, the form paths are stored in.
pub fn normalize_relpath(value: &str) -> String {
    value.trim().replace('\\', "/").trim_start_matches('/').to_string()
}

/// Last component of a stored path, `None` when the path ends in a separator.
pub fn file_basename(path: &str) -> Option<&str> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or("");
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split(['/', '\\']) {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}
