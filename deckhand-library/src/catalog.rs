//! On-disk catalog discovery
//!
//! Songs live under `<data>/songs`, transition presets under
//! `<data>/transitions/*.json`. Both listings are cheap directory walks the
//! UI can refresh at will; a preset that fails to parse is logged and
//! skipped rather than poisoning the whole list.

use deckhand_audio::{artist_title_from_path, TransitionDef};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Song file extensions the decoder is expected to handle.
const SONG_EXTENSIONS: [&str; 3] = ["wav", "mp3", "mp4"];

/// One discovered song file.
#[derive(Debug, Clone)]
pub struct SongEntry {
    pub file: PathBuf,
    pub artist: String,
    pub title: String,
}

/// One discovered transition preset.
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub effects: TransitionDef,
    /// Where the preset was read from; filled in by the scanner.
    #[serde(skip)]
    pub file: PathBuf,
}

/// List song files under `dir`, sorted by path.
pub fn song_list(dir: &Path) -> Vec<SongEntry> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| {
                    SONG_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext))
                });
            if matches {
                files.push(path);
            }
        }
    }
    files.sort();

    files
        .into_iter()
        .map(|file| {
            let (artist, title) = artist_title_from_path(&file);
            SongEntry {
                file,
                artist,
                title,
            }
        })
        .collect()
}

/// List transition presets under `dir`, sorted by path.
pub fn transition_list(dir: &Path) -> Vec<TransitionEntry> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let is_json = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if path.is_file() && is_json {
                files.push(path);
            }
        }
    }
    files.sort();

    files
        .into_iter()
        .filter_map(|file| match std::fs::read_to_string(&file) {
            Ok(text) => match serde_json::from_str::<TransitionEntry>(&text) {
                Ok(mut entry) => {
                    entry.file = file;
                    Some(entry)
                }
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "skipping unparsable transition");
                    None
                }
            },
            Err(e) => {
                warn!(file = %file.display(), error = %e, "skipping unreadable transition");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_song_list_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("B - Second.mp3"), b"x").unwrap();
        fs::write(dir.path().join("A - First.wav"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("clip.MP4"), b"x").unwrap();

        let songs = song_list(dir.path());
        assert_eq!(songs.len(), 3);
        assert_eq!(songs[0].artist, "A");
        assert_eq!(songs[0].title, "First");
        assert_eq!(songs[1].artist, "B");
    }

    #[test]
    fn test_song_list_missing_dir_is_empty() {
        assert!(song_list(Path::new("/nonexistent/songs")).is_empty());
    }

    #[test]
    fn test_transition_list_parses_presets() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("smooth.json"),
            r#"{
                "name": "Smooth fade",
                "description": "Long volume swap",
                "effects": { "vol": [[0.0, 0.0], [1.0, 1.0]] }
            }"#,
        )
        .unwrap();
        fs::write(dir.path().join("broken.json"), b"{ nope").unwrap();

        let presets = transition_list(dir.path());
        assert_eq!(presets.len(), 1);
        let preset = &presets[0];
        assert_eq!(preset.name, "Smooth fade");
        assert_eq!(preset.effects["vol"].len(), 2);
        assert_eq!(preset.file, dir.path().join("smooth.json"));
    }
}
