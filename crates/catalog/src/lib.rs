use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::{normalize_relpath, Mood, Song};
use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

const SONGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("songs");

/// Song record store. Implementations are injected into the server at startup.
pub trait SongStore: Send + Sync {
    fn find_by_id(&self, id: &str) -> Result<Option<Song>, CatalogError>;

    fn insert(&self, song: NewSong) -> Result<Song, CatalogError>;

    fn delete_by_id(&self, id: &str) -> Result<bool, CatalogError>;

    /// Adds exactly one play. Returns the new count, or `None` for an unknown id.
    fn increment_play_count(&self, id: &str) -> Result<Option<u64>, CatalogError>;

    fn list(&self, query: &SongQuery) -> Result<(Vec<Song>, usize), CatalogError>;

    fn moods(&self) -> Result<Vec<Mood>, CatalogError>;
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewSong {
    pub title: String,
    pub artist: String,
    pub mood: String,
    pub file_path: String,
    #[serde(default)]
    pub image_path: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SongSort {
    #[default]
    Unsorted,
    Plays,
    CreatedAt,
}

#[derive(Clone, Debug, Default)]
pub struct SongQuery {
    pub mood: Option<Mood>,
    pub artist: Option<String>,
    pub search: Option<String>,
    pub sort: SongSort,
    pub limit: usize,
    pub offset: usize,
}

impl SongQuery {
    fn matches(&self, song: &Song, artist: Option<&str>, search: Option<&str>) -> bool {
        if let Some(mood) = self.mood {
            if song.mood != mood {
                return false;
            }
        }
        if let Some(artist) = artist {
            if !song.artist.to_lowercase().contains(artist) {
                return false;
            }
        }
        if let Some(search) = search {
            let hit = song.title.to_lowercase().contains(search)
                || song.artist.to_lowercase().contains(search)
                || song.mood.as_str().to_lowercase().contains(search);
            if !hit {
                return false;
            }
        }
        true
    }
}

#[derive(Clone)]
pub struct RedbSongStore {
    db: Arc<Database>,
}

impl RedbSongStore {
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let db = open_or_create_db(path)?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    pub fn init_tables(&self) -> Result<(), CatalogError> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(SONGS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn all_songs(&self) -> Result<Vec<Song>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(SONGS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut songs = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            match decode_value::<Song>(entry.1.value()) {
                Ok(song) => songs.push(song),
                Err(err) => warn!("Skipping undecodable song {}: {}", entry.0.value(), err),
            }
        }
        Ok(songs)
    }
}

impl SongStore for RedbSongStore {
    fn find_by_id(&self, id: &str) -> Result<Option<Song>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(SONGS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let song = match table.get(id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(song)
    }

    fn insert(&self, song: NewSong) -> Result<Song, CatalogError> {
        let title = song.title.trim();
        let artist = song.artist.trim();
        let file_path = normalize_relpath(&song.file_path);
        if title.is_empty() || artist.is_empty() || file_path.is_empty() {
            return Err(CatalogError::Invalid(
                "title, artist and file_path are required".to_string(),
            ));
        }
        let mood = Mood::parse(&song.mood).ok_or_else(|| {
            let allowed: Vec<&str> = Mood::ALL.iter().map(|mood| mood.as_str()).collect();
            CatalogError::Invalid(format!(
                "invalid mood {:?}; must be one of: {}",
                song.mood,
                allowed.join(", ")
            ))
        })?;
        let image_path = song
            .image_path
            .as_deref()
            .map(normalize_relpath)
            .filter(|value| !value.is_empty());

        let now = now_secs();
        let record = Song {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            mood,
            file_path,
            image_path,
            plays: 0,
            created_at: now,
            updated_at: now,
        };

        let bytes = encode_value(&record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SONGS_TABLE)?;
            table.insert(record.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        debug!("Inserted song {} ({} - {})", record.id, record.artist, record.title);
        Ok(record)
    }

    fn delete_by_id(&self, id: &str) -> Result<bool, CatalogError> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = match write_txn.open_table(SONGS_TABLE) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(false),
                Err(err) => return Err(err.into()),
            };
            let removed = table.remove(id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    fn increment_play_count(&self, id: &str) -> Result<Option<u64>, CatalogError> {
        // redb serializes write transactions, so the read-modify-write below is atomic.
        let write_txn = self.db.begin_write()?;
        let plays = {
            let mut table = write_txn.open_table(SONGS_TABLE)?;
            let mut song: Song = match table.get(id)? {
                Some(value) => decode_value(value.value())?,
                None => return Ok(None),
            };
            song.plays = song.plays.saturating_add(1);
            let bytes = encode_value(&song)?;
            table.insert(id, bytes.as_slice())?;
            song.plays
        };
        write_txn.commit()?;
        Ok(Some(plays))
    }

    fn list(&self, query: &SongQuery) -> Result<(Vec<Song>, usize), CatalogError> {
        let artist = query
            .artist
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_lowercase);
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_lowercase);

        let mut songs: Vec<Song> = self
            .all_songs()?
            .into_iter()
            .filter(|song| query.matches(song, artist.as_deref(), search.as_deref()))
            .collect();
        match query.sort {
            SongSort::Plays => songs.sort_by(|a, b| b.plays.cmp(&a.plays)),
            SongSort::CreatedAt => songs.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SongSort::Unsorted => {}
        }

        let total = songs.len();
        let limit = if query.limit == 0 { usize::MAX } else { query.limit };
        let items = songs.into_iter().skip(query.offset).take(limit).collect();
        Ok((items, total))
    }

    fn moods(&self) -> Result<Vec<Mood>, CatalogError> {
        let moods: BTreeSet<&'static str> = self
            .all_songs()?
            .iter()
            .map(|song| song.mood.as_str())
            .collect();
        Ok(moods.into_iter().filter_map(Mood::parse).collect())
    }
}

/// Stand-in used when the database cannot be opened. Every call reports the
/// backend as unavailable instead of pretending the catalog is empty.
#[derive(Clone, Debug)]
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn err<T>(&self) -> Result<T, CatalogError> {
        Err(CatalogError::Unavailable(self.reason.clone()))
    }
}

impl SongStore for UnavailableStore {
    fn find_by_id(&self, _id: &str) -> Result<Option<Song>, CatalogError> {
        self.err()
    }

    fn insert(&self, _song: NewSong) -> Result<Song, CatalogError> {
        self.err()
    }

    fn delete_by_id(&self, _id: &str) -> Result<bool, CatalogError> {
        self.err()
    }

    fn increment_play_count(&self, _id: &str) -> Result<Option<u64>, CatalogError> {
        self.err()
    }

    fn list(&self, _query: &SongQuery) -> Result<(Vec<Song>, usize), CatalogError> {
        self.err()
    }

    fn moods(&self) -> Result<Vec<Mood>, CatalogError> {
        self.err()
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, CatalogError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

#[derive(Debug)]
pub enum CatalogError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    Invalid(String),
    Unavailable(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Io(err) => write!(f, "io error: {}", err),
            CatalogError::Redb(err) => write!(f, "db error: {}", err),
            CatalogError::Bincode(err) => write!(f, "bincode error: {}", err),
            CatalogError::Invalid(message) => write!(f, "{}", message),
            CatalogError::Unavailable(reason) => write!(f, "song catalog unavailable: {}", reason),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogError::Io(err) => Some(err),
            CatalogError::Redb(err) => Some(err),
            CatalogError::Bincode(err) => Some(err),
            CatalogError::Invalid(_) | CatalogError::Unavailable(_) => None,
        }
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::Io(err)
    }
}

impl From<redb::Error> for CatalogError {
    fn from(err: redb::Error) -> Self {
        CatalogError::Redb(err)
    }
}

impl From<DatabaseError> for CatalogError {
    fn from(err: DatabaseError) -> Self {
        CatalogError::Redb(err.into())
    }
}

impl From<TableError> for CatalogError {
    fn from(err: TableError) -> Self {
        CatalogError::Redb(err.into())
    }
}

impl From<TransactionError> for CatalogError {
    fn from(err: TransactionError) -> Self {
        CatalogError::Redb(err.into())
    }
}

impl From<StorageError> for CatalogError {
    fn from(err: StorageError) -> Self {
        CatalogError::Redb(err.into())
    }
}

impl From<CommitError> for CatalogError {
    fn from(err: CommitError) -> Self {
        CatalogError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for CatalogError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        CatalogError::Bincode(err)
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, CatalogError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CatalogError> {
    Ok(bincode::deserialize(bytes)?)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}
