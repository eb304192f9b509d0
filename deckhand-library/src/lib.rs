//! Song library for deckhand
//!
//! The collaborators around the engine core: invoking the external decoder,
//! discovering songs and transition presets on disk, caching analysis
//! results, and pre-analysing the catalog in the background.

mod cache;
mod catalog;
mod decoder;
mod loader;
mod scanner;

pub use cache::{AnalysisCache, CacheError, CachedAnalysis};
pub use catalog::{song_list, transition_list, SongEntry, TransitionEntry};
pub use decoder::{decode_file, DecodeError};
pub use loader::{load_effect_assets, LoadError, SongLoader};
pub use scanner::{LibraryScanner, ScanProgress};
