use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use common::{encode_manifest, ManifestEntry, Mood, MoodManifest, Song};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::resolver::MediaPaths;

#[derive(Clone, Debug)]
pub struct LockSettings {
    pub timeout: Duration,
    pub retry: Duration,
    pub stale_after: Option<Duration>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry: Duration::from_millis(25),
            stale_after: Some(Duration::from_secs(30)),
        }
    }
}

/// Per-mood `info.json` manifests. Read-modify-write cycles are serialized
/// across threads and processes by an exclusive `<manifest>.lock` sentinel.
#[derive(Clone, Debug)]
pub struct ManifestStore {
    paths: MediaPaths,
    lock: LockSettings,
}

impl ManifestStore {
    pub fn new(paths: MediaPaths, lock: LockSettings) -> Self {
        Self { paths, lock }
    }

    pub fn manifest_path(&self, mood: Mood) -> PathBuf {
        self.paths.manifest_path(mood)
    }

    /// Current manifest for browsing; missing or corrupt files read as empty.
    pub fn read_manifest(&self, mood: Mood) -> MoodManifest {
        let path = self.manifest_path(mood);
        let mut manifest = match load_manifest(&path) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => MoodManifest::default(),
            Err(err) => {
                warn!("Ignoring manifest {}: {}", path.display(), err);
                MoodManifest::default()
            }
        };
        fill_defaults(&mut manifest, mood);
        manifest
    }

    pub fn update_manifest<F>(&self, mood: Mood, mutation: F) -> Result<MoodManifest, ManifestError>
    where
        F: FnOnce(MoodManifest) -> Result<MoodManifest, ManifestError>,
    {
        self.update_locked(mood, mutation, false)
    }

    /// With `restore_on_failure`, a failed write copies the `.bak` back before
    /// the lock is released, so no other writer can commit in between.
    fn update_locked<F>(
        &self,
        mood: Mood,
        mutation: F,
        restore_on_failure: bool,
    ) -> Result<MoodManifest, ManifestError>
    where
        F: FnOnce(MoodManifest) -> Result<MoodManifest, ManifestError>,
    {
        let path = self.manifest_path(mood);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _lock = ManifestLock::acquire(&sidecar(&path, "lock"), &self.lock)?;

        let mut current = match load_manifest(&path) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => MoodManifest::default(),
            Err(ManifestError::Corrupt(err)) => {
                warn!(
                    "Manifest {} is corrupt ({}); starting from an empty manifest",
                    path.display(),
                    err
                );
                MoodManifest::default()
            }
            Err(err) => return Err(err),
        };
        fill_defaults(&mut current, mood);

        let updated = mutation(current)?;
        let encoded = encode_manifest(&updated).map_err(ManifestError::Encode)?;

        let backed_up = path.exists();
        if backed_up {
            fs::copy(&path, sidecar(&path, "bak")).map_err(ManifestError::Backup)?;
        }
        if let Err(err) = replace_file(&path, &encoded) {
            if restore_on_failure && backed_up {
                match self.restore_backup(mood) {
                    Ok(_) => info!("Restored {} from backup", path.display()),
                    Err(restore_err) => {
                        warn!("Failed to restore {}: {}", path.display(), restore_err)
                    }
                }
            }
            return Err(ManifestError::Write(err));
        }
        debug!(
            "Wrote manifest {} ({} songs)",
            path.display(),
            updated.songs.len()
        );
        Ok(updated)
    }

    pub fn append_entry(&self, mood: Mood, entry: ManifestEntry) -> Result<(), ManifestError> {
        self.update_manifest(mood, |mut manifest| {
            manifest.songs.push(entry);
            Ok(manifest)
        })?;
        Ok(())
    }

    /// Drops every entry matching `title` and `artist` exactly. A missing
    /// manifest is left missing. A failed write puts the `.bak` copy back.
    pub fn remove_entries(
        &self,
        mood: Mood,
        title: &str,
        artist: &str,
    ) -> Result<usize, ManifestError> {
        if !self.manifest_path(mood).exists() {
            return Ok(0);
        }
        let mut removed = 0usize;
        self.update_locked(
            mood,
            |mut manifest| {
                let before = manifest.songs.len();
                manifest.songs.retain(|entry| !entry.matches(title, artist));
                removed = before - manifest.songs.len();
                Ok(manifest)
            },
            true,
        )?;
        Ok(removed)
    }

    /// Copies `<manifest>.bak` over the manifest. Returns false when no backup exists.
    /// Does not take the lock; callers outside an update race concurrent writers.
    pub fn restore_backup(&self, mood: Mood) -> Result<bool, ManifestError> {
        let path = self.manifest_path(mood);
        let backup = sidecar(&path, "bak");
        if !backup.exists() {
            return Ok(false);
        }
        fs::copy(&backup, &path).map_err(ManifestError::Write)?;
        Ok(true)
    }

    pub fn on_song_created(&self, song: &Song) -> Result<(), ManifestError> {
        self.append_entry(song.mood, ManifestEntry::for_song(song))
    }

    pub fn on_song_deleted(&self, song: &Song) -> Result<(), ManifestError> {
        let removed = self.remove_entries(song.mood, &song.title, &song.artist)?;
        debug!(
            "Removed {} manifest entries for {} - {}",
            removed, song.artist, song.title
        );
        Ok(())
    }
}

/// Parses a manifest file. `Ok(None)` when the file does not exist.
pub fn load_manifest(path: &Path) -> Result<Option<MoodManifest>, ManifestError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(ManifestError::Corrupt)
}

/// Writes a `.tmp` sibling and renames it into place. Unlocked readers see
/// either the old manifest or the new one, never a truncated file.
fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = sidecar(path, "tmp");
    fs::write(&tmp, bytes)?;
    if let Err(err) = fs::rename(&tmp, path) {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            warn!("Failed to remove {}: {}", tmp.display(), cleanup);
        }
        return Err(err);
    }
    Ok(())
}

fn fill_defaults(manifest: &mut MoodManifest, mood: Mood) {
    if manifest.mood.is_empty() {
        manifest.mood = mood.as_str().to_string();
    }
    if manifest.description.is_empty() {
        manifest.description = mood.default_description();
    }
}

fn sidecar(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Held while a manifest is being rewritten. Dropping it removes the sentinel.
struct ManifestLock {
    path: PathBuf,
}

impl ManifestLock {
    fn acquire(path: &Path, settings: &LockSettings) -> Result<Self, ManifestError> {
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    if let Err(err) = writeln!(file, "{}", lock_timestamp()) {
                        warn!("Failed to stamp lock {}: {}", path.display(), err);
                    }
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    let broken = is_stale(path, settings.stale_after)
                        && break_stale_lock(path, settings.stale_after);
                    if started.elapsed() >= settings.timeout {
                        return Err(ManifestError::LockTimeout(path.to_path_buf()));
                    }
                    if !broken {
                        thread::sleep(settings.retry);
                    }
                }
                Err(err) => return Err(ManifestError::Lock(err)),
            }
        }
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!("Failed to release lock {}: {}", self.path.display(), err);
            }
        }
    }
}

/// Only a regular file older than `stale_after` counts as an orphaned lock.
fn is_stale(path: &Path, stale_after: Option<Duration>) -> bool {
    let Some(stale_after) = stale_after else {
        return false;
    };
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        _ => return false,
    };
    meta.modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age >= stale_after)
        .unwrap_or(false)
}

/// Moves the sentinel to a unique name, so two breakers cannot both remove it,
/// then checks the moved file. A fresh lock that replaced the stale one in the
/// meantime is linked back in place. Returns true when a stale lock was removed.
fn break_stale_lock(path: &Path, stale_after: Option<Duration>) -> bool {
    let moved = sidecar(path, &format!("stale.{}", Uuid::new_v4().simple()));
    if let Err(err) = fs::rename(path, &moved) {
        if err.kind() != ErrorKind::NotFound {
            warn!("Failed to break stale lock {}: {}", path.display(), err);
        }
        return false;
    }

    let stale = is_stale(&moved, stale_after);
    if !stale {
        if let Err(err) = fs::hard_link(&moved, path) {
            warn!("Failed to put back live lock {}: {}", path.display(), err);
        }
    }
    if let Err(err) = fs::remove_file(&moved) {
        warn!("Failed to remove {}: {}", moved.display(), err);
    }
    if stale {
        warn!("Removed stale manifest lock {}", path.display());
    }
    stale
}

fn lock_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Debug)]
pub enum ManifestError {
    Io(std::io::Error),
    Lock(std::io::Error),
    LockTimeout(PathBuf),
    Corrupt(serde_json::Error),
    Encode(serde_json::Error),
    Backup(std::io::Error),
    Write(std::io::Error),
}

impl std::fmt::Display for ManifestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestError::Io(err) => write!(f, "io error: {}", err),
            ManifestError::Lock(err) => write!(f, "failed to create lock: {}", err),
            ManifestError::LockTimeout(path) => {
                write!(f, "timed out waiting for lock {}", path.display())
            }
            ManifestError::Corrupt(err) => write!(f, "corrupt manifest: {}", err),
            ManifestError::Encode(err) => write!(f, "failed to encode manifest: {}", err),
            ManifestError::Backup(err) => write!(f, "failed to back up manifest: {}", err),
            ManifestError::Write(err) => write!(f, "failed to write manifest: {}", err),
        }
    }
}

impl std::error::Error for ManifestError {}

impl From<std::io::Error> for ManifestError {
    fn from(err: std::io::Error) -> Self {
        ManifestError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ManifestStore {
        let paths = MediaPaths {
            working_dir: dir.path().to_path_buf(),
            static_root: dir.path().join("static"),
            upload_folder: dir.path().join("static").join("uploads"),
        };
        ManifestStore::new(
            paths,
            LockSettings {
                timeout: Duration::from_millis(200),
                retry: Duration::from_millis(1),
                stale_after: None,
            },
        )
    }

    fn entry(title: &str, artist: &str) -> ManifestEntry {
        ManifestEntry {
            title: title.to_string(),
            artist: artist.to_string(),
            filename: format!("{}.mp3", title.to_lowercase().replace(' ', "_")),
            image: "cover.jpg".to_string(),
        }
    }

    fn lock_path(store: &ManifestStore, mood: Mood) -> PathBuf {
        sidecar(&store.manifest_path(mood), "lock")
    }

    fn backup_path(store: &ManifestStore, mood: Mood) -> PathBuf {
        sidecar(&store.manifest_path(mood), "bak")
    }

    fn leftover_stale_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".lock.stale."))
            .count()
    }

    #[test]
    fn first_write_creates_manifest_without_backup() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append_entry(Mood::Sad, entry("Rainy Day", "Cloud Nine")).unwrap();

        let manifest = load_manifest(&store.manifest_path(Mood::Sad)).unwrap().unwrap();
        assert_eq!(manifest.mood, "Sad");
        assert_eq!(manifest.description, "Sad songs and tracks");
        assert_eq!(manifest.songs, vec![entry("Rainy Day", "Cloud Nine")]);
        assert!(!backup_path(&store, Mood::Sad).exists());
        assert!(!lock_path(&store, Mood::Sad).exists());
        assert!(!sidecar(&store.manifest_path(Mood::Sad), "tmp").exists());
    }

    #[test]
    fn manifest_is_written_with_four_space_indent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append_entry(Mood::Calm, entry("Still", "Lake")).unwrap();
        let raw = fs::read_to_string(store.manifest_path(Mood::Calm)).unwrap();
        assert!(raw.contains("\n    \"mood\": \"Calm\""));
    }

    #[test]
    fn backup_reflects_immediately_preceding_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.manifest_path(Mood::Happy);

        store.append_entry(Mood::Happy, entry("One", "A")).unwrap();
        let after_first = fs::read(&path).unwrap();
        store.append_entry(Mood::Happy, entry("Two", "B")).unwrap();
        assert_eq!(fs::read(backup_path(&store, Mood::Happy)).unwrap(), after_first);

        let after_second = fs::read(&path).unwrap();
        store.append_entry(Mood::Happy, entry("Three", "C")).unwrap();
        assert_eq!(fs::read(backup_path(&store, Mood::Happy)).unwrap(), after_second);
    }

    #[test]
    fn failing_mutation_releases_lock_and_keeps_manifest() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append_entry(Mood::Dark, entry("Shade", "Umbra")).unwrap();
        let before = fs::read(store.manifest_path(Mood::Dark)).unwrap();

        let err = store
            .update_manifest(Mood::Dark, |_| {
                Err(ManifestError::Io(std::io::Error::new(ErrorKind::Other, "rejected")))
            })
            .unwrap_err();
        assert!(matches!(err, ManifestError::Io(_)));
        assert!(!lock_path(&store, Mood::Dark).exists());
        assert_eq!(fs::read(store.manifest_path(Mood::Dark)).unwrap(), before);
    }

    #[test]
    fn unreadable_manifest_errors_but_releases_lock() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(store.manifest_path(Mood::Angry)).unwrap();

        let result = store.append_entry(Mood::Angry, entry("Rage", "Fury"));
        assert!(result.is_err());
        assert!(!lock_path(&store, Mood::Angry).exists());
    }

    #[test]
    fn corrupt_manifest_is_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.manifest_path(Mood::Funky);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        assert!(store.read_manifest(Mood::Funky).songs.is_empty());
        store.append_entry(Mood::Funky, entry("Groove", "Bass")).unwrap();
        let manifest = load_manifest(&path).unwrap().unwrap();
        assert_eq!(manifest.songs.len(), 1);
        assert_eq!(
            fs::read_to_string(backup_path(&store, Mood::Funky)).unwrap(),
            "{ not json"
        );
    }

    #[test]
    fn held_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let lock = lock_path(&store, Mood::Focus);
        fs::create_dir_all(lock.parent().unwrap()).unwrap();
        fs::write(&lock, "held").unwrap();

        let err = store.append_entry(Mood::Focus, entry("Deep", "Work")).unwrap_err();
        assert!(matches!(err, ManifestError::LockTimeout(_)));
        assert!(lock.exists());
        assert!(!store.manifest_path(Mood::Focus).exists());
    }

    #[test]
    fn stale_lock_is_broken() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.lock.stale_after = Some(Duration::ZERO);
        let lock = lock_path(&store, Mood::Bright);
        fs::create_dir_all(lock.parent().unwrap()).unwrap();
        fs::write(&lock, "orphaned").unwrap();

        store.append_entry(Mood::Bright, entry("Glow", "Sun")).unwrap();
        assert!(!lock.exists());
        assert_eq!(store.read_manifest(Mood::Bright).songs.len(), 1);
        assert_eq!(leftover_stale_files(lock.parent().unwrap()), 0);
    }

    #[test]
    fn unbreakable_stale_lock_still_times_out() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.lock.stale_after = Some(Duration::ZERO);
        let lock = lock_path(&store, Mood::Uplifting);
        fs::create_dir_all(lock.join("inner")).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let result = store.append_entry(Mood::Uplifting, entry("Rise", "Up"));
            let _ = tx.send(result);
        });
        let result = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("lock acquisition should give up after its timeout");
        assert!(matches!(result, Err(ManifestError::LockTimeout(_))));
        assert!(lock.is_dir());
    }

    #[test]
    fn breaking_leaves_a_fresh_lock_in_place() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("info.json.lock");
        fs::write(&lock, "held").unwrap();

        assert!(!break_stale_lock(&lock, Some(Duration::from_secs(60))));
        assert_eq!(fs::read_to_string(&lock).unwrap(), "held");
        assert_eq!(leftover_stale_files(dir.path()), 0);

        assert!(break_stale_lock(&lock, Some(Duration::ZERO)));
        assert!(!lock.exists());
        assert_eq!(leftover_stale_files(dir.path()), 0);

        assert!(!break_stale_lock(&lock, Some(Duration::ZERO)));
    }

    #[test]
    fn failed_removal_write_restores_previous_manifest() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append_entry(Mood::Relaxed, entry("Breeze", "Shore")).unwrap();
        store.append_entry(Mood::Relaxed, entry("Drift", "Tide")).unwrap();
        let path = store.manifest_path(Mood::Relaxed);
        let before = fs::read(&path).unwrap();
        fs::create_dir_all(sidecar(&path, "tmp")).unwrap();

        let err = store
            .remove_entries(Mood::Relaxed, "Breeze", "Shore")
            .unwrap_err();
        assert!(matches!(err, ManifestError::Write(_)));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(fs::read(backup_path(&store, Mood::Relaxed)).unwrap(), before);
        assert!(!lock_path(&store, Mood::Relaxed).exists());
    }

    #[test]
    fn concurrent_writers_do_not_lose_entries() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.lock.timeout = Duration::from_secs(10);
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .append_entry(Mood::Energetic, entry(&format!("Track {}", i), "Crowd"))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.read_manifest(Mood::Energetic).songs.len(), 8);
        assert!(!lock_path(&store, Mood::Energetic).exists());
    }

    #[test]
    fn remove_matches_title_and_artist_exactly() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append_entry(Mood::Love, entry("Heart", "Ana")).unwrap();
        store.append_entry(Mood::Love, entry("Heart", "Bo")).unwrap();
        store.append_entry(Mood::Love, entry("Heart", "Ana")).unwrap();

        assert_eq!(store.remove_entries(Mood::Love, "heart", "Ana").unwrap(), 0);
        assert_eq!(store.remove_entries(Mood::Love, "Heart", "Ana").unwrap(), 2);
        let manifest = store.read_manifest(Mood::Love);
        assert_eq!(manifest.songs, vec![entry("Heart", "Bo")]);
    }

    #[test]
    fn remove_does_not_create_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_eq!(store.remove_entries(Mood::Chill, "A", "B").unwrap(), 0);
        assert!(!store.manifest_path(Mood::Chill).exists());
    }

    #[test]
    fn restore_backup_copies_previous_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(!store.restore_backup(Mood::Romantic).unwrap());
        store.append_entry(Mood::Romantic, entry("Rose", "Petal")).unwrap();
        store.append_entry(Mood::Romantic, entry("Moon", "Night")).unwrap();

        assert!(store.restore_backup(Mood::Romantic).unwrap());
        assert_eq!(store.read_manifest(Mood::Romantic).songs, vec![entry("Rose", "Petal")]);
    }
}
