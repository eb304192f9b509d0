//! Audio engine for deckhand
//!
//! The core playback pipeline of the automatic DJ:
//! - `AudioSource` / `Song`: normalised PCM with musical time mapping
//! - `effects`: the per-deck effect chain driven by automation curves
//! - `TransitionCurve`: window-clamped automation over a musical interval
//! - `Deck`: mutable playback state for one logical channel
//! - `TimeStretcher`: pitch-preserving per-block tempo adjustment
//! - `Mixer`: the real-time producer feeding the audio sink
//! - `MixerFsm`: the three-stage controller behind load/queue/cancel

mod deck;
mod effects;
mod error;
mod fsm;
mod mixer;
mod song;
mod source;
mod status;
mod stretch;
mod transition;

pub use deck::{Deck, TransitionStage};
pub use effects::{Effect, EffectAssets, EffectRegistry, EFFECT_CHAIN};
pub use error::MixerError;
pub use fsm::{MixerFsm, MixerStage, QueueData, QueueDirection, TargetDeck};
pub use mixer::Mixer;
pub use song::{artist_title_from_path, Song};
pub use source::{AudioSource, SourceError};
pub use status::{Actions, ChannelStatus, MixerStatus};
pub use stretch::TimeStretcher;
pub use transition::{build_transition, invert_transition, TransitionCurve, TransitionDef};

pub use deckhand_analysis::SAMPLE_RATE;

/// Frames per block handed to the audio sink (250 ms at 48 kHz).
pub const BUFFER_SIZE: usize = 12_000;

/// Frames of stretched look-ahead kept per deck to cross-fade block seams.
pub const TRANSIENT_SIZE: usize = 1_000;
