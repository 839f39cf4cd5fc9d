//! Clip resources — duration probing, the revocable clip store, and the
//! remote-synthesis seam.
//!
//! Uploaded and generated clips live as files in a store directory and are
//! addressed by `clip://` URLs. The engine releases each URL exactly once,
//! when its assignment is replaced or removed.

use crate::slot::AudioAssignment;
use lofty::file::AudioFile;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bundled announcement clips used to seed slots when a line is selected.
/// Reconciliation rotates through this list by slot position.
pub const DEFAULT_CLIPS: &[(&str, &str)] = &[
    ("Two-tone chime", "assets/clips/chime_two_tone.mp3"),
    ("Arrival bell", "assets/clips/arrival_bell.mp3"),
    ("Door warning", "assets/clips/door_warning.mp3"),
    ("Departure whistle", "assets/clips/departure_whistle.mp3"),
];

/// The default clip for a slot at `position` in the line walk order.
pub fn default_assignment(position: usize) -> AudioAssignment {
    let (name, path) = DEFAULT_CLIPS[position % DEFAULT_CLIPS.len()];
    AudioAssignment::preset(PathBuf::from(path), name)
}

/// Read a clip's duration from its container metadata.
/// Fails for missing or undecodable files; callers degrade by leaving the
/// slot's duration unresolved.
pub fn probe_duration(path: &Path) -> Result<Duration, String> {
    let tagged_file = lofty::read_from_path(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    Ok(tagged_file.properties().duration())
}

const CLIP_URL_SCHEME: &str = "clip://";

/// Owns the files behind `clip://` URLs.
///
/// Not serialized with the slot board — the store directory is rescanned into
/// entries at load time by re-registering the URLs found in saved
/// assignments.
pub struct ClipStore {
    dir: PathBuf,
    entries: HashMap<String, PathBuf>,
}

impl ClipStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: PathBuf) -> Result<Self, String> {
        fs::create_dir_all(&dir)
            .map_err(|e| format!("Cannot create clip store '{}': {}", dir.display(), e))?;
        Ok(ClipStore {
            dir,
            entries: HashMap::new(),
        })
    }

    /// The default store location under the user's local data directory.
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("stationvoice")
            .join("clips")
    }

    /// Copy an uploaded file into the store. Returns the revocable URL and a
    /// display name derived from the file name.
    pub fn acquire_upload(&mut self, source: &Path) -> Result<(String, String), String> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3");
        let display_name = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Upload".to_string());
        let file_name = self.unique_name("up", ext);
        let dest = self.dir.join(&file_name);
        fs::copy(source, &dest).map_err(|e| {
            format!(
                "Cannot copy '{}' into clip store: {}",
                source.display(),
                e
            )
        })?;
        let url = format!("{}{}", CLIP_URL_SCHEME, file_name);
        self.entries.insert(url.clone(), dest);
        Ok((url, display_name))
    }

    /// Write generated audio bytes into the store. Returns the revocable URL.
    pub fn store_generated(&mut self, bytes: &[u8]) -> Result<String, String> {
        let file_name = self.unique_name("gen", "mp3");
        let dest = self.dir.join(&file_name);
        fs::write(&dest, bytes)
            .map_err(|e| format!("Cannot write generated clip '{}': {}", dest.display(), e))?;
        let url = format!("{}{}", CLIP_URL_SCHEME, file_name);
        self.entries.insert(url.clone(), dest);
        Ok(url)
    }

    /// Re-register a URL loaded from a saved slot board, if its backing file
    /// still exists.
    pub fn readopt(&mut self, url: &str) {
        if let Some(file_name) = url.strip_prefix(CLIP_URL_SCHEME) {
            let path = self.dir.join(file_name);
            if path.is_file() {
                self.entries.insert(url.to_string(), path);
            }
        }
    }

    /// Release a URL: forget it and delete its backing file. Returns false
    /// for URLs not owned by this store (already released, or foreign).
    pub fn release(&mut self, url: &str) -> bool {
        match self.entries.remove(url) {
            Some(path) => {
                if let Err(e) = fs::remove_file(&path) {
                    eprintln!("Warning: could not delete clip '{}': {}", path.display(), e);
                }
                true
            }
            None => false,
        }
    }

    /// The file behind a URL, if the store owns it.
    pub fn resolve(&self, url: &str) -> Option<&Path> {
        self.entries.get(url).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn unique_name(&self, prefix: &str, ext: &str) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        loop {
            let name = format!("{}_{}_{:04}.{}", prefix, millis, fastrand::u16(..), ext);
            if !self.dir.join(&name).exists() {
                return name;
            }
        }
    }
}

/// Remote text-to-speech seam. The HTTP client lives with the host; the
/// engine only sees the result bytes or a surfaced error.
pub trait SpeechSynthesizer {
    fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_store() -> (tempfile::TempDir, ClipStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ClipStore::new(dir.path().join("clips")).unwrap();
        (dir, store)
    }

    fn write_sample(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(b"not real audio").unwrap();
        path
    }

    #[test]
    fn upload_acquires_and_resolves() {
        let (dir, mut store) = temp_store();
        let src = write_sample(dir.path(), "doors closing.mp3");
        let (url, name) = store.acquire_upload(&src).unwrap();
        assert!(url.starts_with("clip://"));
        assert_eq!(name, "doors closing");
        let resolved = store.resolve(&url).unwrap();
        assert!(resolved.is_file());
    }

    #[test]
    fn release_deletes_file_and_is_single_shot() {
        let (dir, mut store) = temp_store();
        let src = write_sample(dir.path(), "a.mp3");
        let (url, _) = store.acquire_upload(&src).unwrap();
        let backing = store.resolve(&url).unwrap().to_path_buf();

        assert!(store.release(&url));
        assert!(!backing.exists());
        assert!(store.resolve(&url).is_none());
        // Second release of the same URL is a no-op.
        assert!(!store.release(&url));
    }

    #[test]
    fn generated_bytes_are_stored() {
        let (_dir, mut store) = temp_store();
        let url = store.store_generated(b"synthesized").unwrap();
        let path = store.resolve(&url).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"synthesized");
    }

    #[test]
    fn readopt_restores_known_files_only() {
        let (dir, mut store) = temp_store();
        let src = write_sample(dir.path(), "a.mp3");
        let (url, _) = store.acquire_upload(&src).unwrap();

        let mut reopened = ClipStore::new(store.dir.clone()).unwrap();
        reopened.readopt(&url);
        assert!(reopened.resolve(&url).is_some());
        reopened.readopt("clip://never_existed.mp3");
        assert!(reopened.resolve("clip://never_existed.mp3").is_none());
    }

    #[test]
    fn default_assignments_rotate() {
        let a = default_assignment(0);
        let b = default_assignment(1);
        let wrapped = default_assignment(DEFAULT_CLIPS.len());
        assert_ne!(a.display_name, b.display_name);
        assert_eq!(a.display_name, wrapped.display_name);
        assert!(a.owned_url().is_none());
    }

    #[test]
    fn probe_duration_rejects_missing_file() {
        assert!(probe_duration(Path::new("no_such_clip.mp3")).is_err());
    }
}
