use std::env;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use common::{encode_manifest, Mood, MoodManifest, MANIFEST_FILE};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let songs_root = env::args()
        .nth(1)
        .or_else(|| env::var("SONGS_ROOT").ok())
        .unwrap_or_else(|| "static/songs".to_string());
    let songs_root = PathBuf::from(songs_root);

    let created = bootstrap(&songs_root)?;
    println!(
        "Mood directories ready under {}: {} manifests created, {} kept",
        songs_root.display(),
        created,
        Mood::ALL.len() - created
    );
    Ok(())
}

/// Creates every mood directory and its empty manifest. Returns how many
/// manifests were written.
fn bootstrap(songs_root: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    let mut created = 0;
    for mood in Mood::ALL {
        let dir = songs_root.join(mood.dir_name());
        fs::create_dir_all(&dir)?;
        let manifest_path = dir.join(MANIFEST_FILE);
        let bytes = encode_manifest(&MoodManifest::for_mood(mood))?;
        if write_new(&manifest_path, &bytes)? {
            info!("Created {:?}", manifest_path);
            created += 1;
        } else {
            info!("Keeping existing manifest {:?}", manifest_path);
        }
    }
    Ok(created)
}

/// Writes only when nothing is at `path`, so a manifest the server created
/// in the meantime is never replaced.
fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<bool> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(err),
    };
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_every_mood_and_keeps_existing_manifests() {
        let dir = TempDir::new().unwrap();
        let sad = dir.path().join(Mood::Sad.dir_name());
        fs::create_dir_all(&sad).unwrap();
        fs::write(sad.join(MANIFEST_FILE), "{\"mood\":\"Sad\"}").unwrap();

        let created = bootstrap(dir.path()).unwrap();
        assert_eq!(created, Mood::ALL.len() - 1);
        assert_eq!(
            fs::read_to_string(sad.join(MANIFEST_FILE)).unwrap(),
            "{\"mood\":\"Sad\"}"
        );

        let calm = dir.path().join(Mood::Calm.dir_name()).join(MANIFEST_FILE);
        let written = fs::read(&calm).unwrap();
        assert_eq!(
            written,
            encode_manifest(&MoodManifest::for_mood(Mood::Calm)).unwrap()
        );

        assert_eq!(bootstrap(dir.path()).unwrap(), 0);
    }
}
