//! Song loading: decode, analyse (or hit the cache), build a `Song`
//!
//! Loading performs the heavy work - external decode plus tempo analysis -
//! and must therefore never run under the mixer lock. The mixer only locks
//! to install the finished `Song`.

use crate::cache::{AnalysisCache, CacheError, CachedAnalysis};
use crate::decoder::{decode_file, DecodeError};
use deckhand_analysis::{analyze_song, AnalyzeError, ANALYSIS_SECONDS, SAMPLE_RATE};
use deckhand_audio::{EffectAssets, Song};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors surfaced by a load command.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The analyzer could not find a usable tempo.
    #[error("song cannot be analysed: {0}")]
    Unanalyzable(#[from] AnalyzeError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decodes songs and resolves their analysis, consulting a cache when one
/// is attached.
pub struct SongLoader {
    cache: Option<AnalysisCache>,
}

impl SongLoader {
    pub fn new() -> SongLoader {
        SongLoader { cache: None }
    }

    pub fn with_cache(cache: AnalysisCache) -> SongLoader {
        SongLoader { cache: Some(cache) }
    }

    /// Load a song from disk: decode to a source, then take the analysis
    /// from the cache or run it fresh.
    pub fn load(&self, file: &Path) -> Result<Song, LoadError> {
        let meta = std::fs::metadata(file)?;
        let file_size = meta.len();
        let modified_time = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let source = Arc::new(decode_file(file)?);

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(file, file_size, modified_time) {
                info!(file = %file.display(), bpm = hit.bpm, "analysis cache hit");
                return Ok(Song::new(source, file, hit.bpm, hit.offset_samples));
            }
        }

        let channel0 = source.channel(0, ANALYSIS_SECONDS * SAMPLE_RATE as usize);
        let analysis = analyze_song(&channel0)?;
        info!(
            file = %file.display(),
            bpm = analysis.bpm,
            offset = analysis.offset,
            length = source.duration(),
            "song analysed"
        );

        if let Some(cache) = &self.cache {
            // A failed store only costs a re-analysis next time.
            if let Err(e) = cache.store(&CachedAnalysis {
                path: file.to_path_buf(),
                file_size,
                modified_time,
                duration_secs: source.duration(),
                bpm: analysis.bpm,
                offset_samples: analysis.offset,
            }) {
                tracing::warn!(file = %file.display(), error = %e, "analysis cache store failed");
            }
        }

        Ok(Song::new(source, file, analysis.bpm, analysis.offset))
    }
}

impl Default for SongLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode the two fixed effect assets from `<fx_dir>`: the noise clip and
/// the reverb impulse response. Both stay in memory for the process
/// lifetime.
pub fn load_effect_assets(fx_dir: &Path) -> Result<EffectAssets, LoadError> {
    let noise = decode_file(&fx_dir.join("noise.wav"))?;
    let reverb_ir = decode_file(&fx_dir.join("reverb.wav"))?;
    Ok(EffectAssets {
        noise: Arc::new(noise),
        reverb_ir: Arc::new(reverb_ir),
    })
}
