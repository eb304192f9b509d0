//! Deck state - one logical playback channel

use crate::song::Song;
use crate::stretch::TimeStretcher;
use crate::transition::TransitionCurve;
use crate::{BUFFER_SIZE, TRANSIENT_SIZE};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Where the playhead sits relative to the deck's transition window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionStage {
    /// Not playing, or no song loaded.
    None,
    /// Playing, transition window still ahead.
    Pre,
    /// Inside the transition window.
    Mix,
    /// Past the window, or no window queued.
    Post,
}

/// Mutable playback state for one channel plus its render scratch.
pub struct Deck {
    pub(crate) song: Option<Arc<Song>>,
    /// Read head in source seconds. May be negative while a deck rolls in
    /// ahead of its selection.
    pub(crate) time: f64,
    pub(crate) is_playing: bool,
    /// Automation curves in chain order; empty outside a queued transition.
    pub(crate) transition: Vec<(String, TransitionCurve)>,
    /// `[start_bar, end_bar]` of the transition window in this deck's song.
    pub(crate) transition_bars: Option<[i64; 2]>,
    /// Tail of the previous stretched block, cross-faded into the next one.
    pub(crate) transient: Option<Vec<f32>>,
    /// Previous raw block, prepended as effect pre-roll.
    pub(crate) last: Option<Vec<f32>>,
    pub(crate) render: RenderScratch,
}

/// Reusable per-deck buffers so the producer never allocates mid-stream.
pub(crate) struct RenderScratch {
    /// Source read buffer, `2 * BUFFER_SIZE` frames.
    pub src: Vec<f32>,
    /// Stretcher output.
    pub stretched: Vec<f32>,
    pub stretcher: TimeStretcher,
    /// Effect chain ping-pong buffers, `2 * BUFFER_SIZE` frames each.
    pub chain_a: Vec<f32>,
    pub chain_b: Vec<f32>,
    /// Per-frame automation values over the chain input.
    pub param: Vec<f32>,
}

impl RenderScratch {
    fn new() -> RenderScratch {
        RenderScratch {
            src: vec![0.0; BUFFER_SIZE * 4],
            stretched: Vec::with_capacity((BUFFER_SIZE + TRANSIENT_SIZE) * 4),
            stretcher: TimeStretcher::new(),
            chain_a: vec![0.0; BUFFER_SIZE * 4],
            chain_b: vec![0.0; BUFFER_SIZE * 4],
            param: vec![0.0; BUFFER_SIZE * 2],
        }
    }
}

impl Deck {
    pub fn new() -> Deck {
        Deck {
            song: None,
            time: 0.0,
            is_playing: false,
            transition: Vec::new(),
            transition_bars: None,
            transient: None,
            last: None,
            render: RenderScratch::new(),
        }
    }

    /// Drop everything but the scratch buffers.
    pub fn clear(&mut self) {
        self.song = None;
        self.time = 0.0;
        self.is_playing = false;
        self.transition.clear();
        self.transition_bars = None;
        self.transient = None;
        self.last = None;
    }

    /// Install a song, resetting all playback state.
    pub fn load(&mut self, song: Arc<Song>) {
        self.clear();
        info!(file = %song.file.display(), "deck load");
        self.song = Some(song);
    }

    pub fn clear_transition(&mut self) {
        self.transition.clear();
        self.transition_bars = None;
    }

    /// Start producing output from `time` seconds.
    pub fn play(&mut self, time: f64) {
        self.time = time;
        self.is_playing = true;
    }

    /// Derive the transition stage from the playhead and the window.
    pub fn stage(&self) -> TransitionStage {
        let Some(song) = &self.song else {
            return TransitionStage::None;
        };
        if !self.is_playing {
            return TransitionStage::None;
        }
        let Some(bars) = self.transition_bars else {
            return TransitionStage::Post;
        };
        let bar = song.time_to_bar(self.time);
        if bar < bars[0] as f64 {
            TransitionStage::Pre
        } else if bar >= (bars[1] + 1) as f64 {
            TransitionStage::Post
        } else {
            TransitionStage::Mix
        }
    }

    pub fn song(&self) -> Option<&Arc<Song>> {
        self.song.as_ref()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn transition_bars(&self) -> Option<[i64; 2]> {
        self.transition_bars
    }
}

impl Default for Deck {
    fn default() -> Self {
        Self::new()
    }
}
