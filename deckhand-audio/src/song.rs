//! Songs: audio plus analysis results and musical time mapping

use crate::source::AudioSource;
use crate::SAMPLE_RATE;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A loaded song: immutable audio, tempo analysis and display metadata.
///
/// Bar `k` starts at `offset / SAMPLE_RATE + k * (60 / bpm) * 4` seconds;
/// `time_to_bar` and `bar_to_time` are exact inverses of each other.
pub struct Song {
    source: Arc<AudioSource>,
    pub file: PathBuf,
    pub artist: String,
    pub title: String,
    /// Tempo in beats per minute.
    pub bpm: f64,
    /// Samples from the start of the signal to the first downbeat.
    pub offset: i64,
}

impl Song {
    pub fn new(source: Arc<AudioSource>, file: impl Into<PathBuf>, bpm: f64, offset: i64) -> Song {
        let file = file.into();
        let (artist, title) = artist_title_from_path(&file);
        Song {
            source,
            file,
            artist,
            title,
            bpm,
            offset,
        }
    }

    pub fn source(&self) -> &Arc<AudioSource> {
        &self.source
    }

    pub fn duration(&self) -> f64 {
        self.source.duration()
    }

    /// Seconds per bar (four beats).
    pub fn bar_duration(&self) -> f64 {
        60.0 / self.bpm * 4.0
    }

    /// Map a position in source seconds to a (fractional) bar index.
    pub fn time_to_bar(&self, time: f64) -> f64 {
        (time - self.offset as f64 / SAMPLE_RATE as f64) / self.bar_duration()
    }

    /// Map a (fractional) bar index to a position in source seconds.
    pub fn bar_to_time(&self, bar: f64) -> f64 {
        self.offset as f64 / SAMPLE_RATE as f64 + bar * self.bar_duration()
    }

    /// Read a window of the signal, silence-padded outside its bounds.
    pub fn stream_into(&self, pos: i64, out: &mut [f32]) {
        self.source.stream_into(pos, out);
    }
}

/// Derive artist and title from a file name by splitting at the first `-`.
/// Without a dash the whole stem becomes the title.
pub fn artist_title_from_path(file: &Path) -> (String, String) {
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match stem.split_once('-') {
        Some((artist, title)) => (artist.trim().to_string(), title.trim().to_string()),
        None => (String::new(), stem.trim().to_string()),
    }
}
