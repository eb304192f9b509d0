//! Transition state machine
//!
//! Three operator intents (load a song, queue a transition, cancel a queued
//! transition) are regulated by a small controller over the two decks. Every
//! command has a dry mode reporting the deck or direction that would be
//! affected, so a UI can grey out illegal actions; the dry result always
//! matches what the real call mutates.

use crate::deck::{Deck, TransitionStage};
use crate::effects::EffectRegistry;
use crate::error::MixerError;
use crate::song::Song;
use crate::transition::{build_transition, TransitionDef};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Overall mixer mode, controlling which deck the next queue targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MixerStage {
    /// Startup: at most one song, in deck A.
    InitA,
    /// The next queued transition runs A to B.
    AToB,
    /// The next queued transition runs B to A.
    BToA,
}

/// Which deck a command affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetDeck {
    Invalid,
    A,
    B,
}

/// Direction a queue command would take, as reported by its dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueDirection {
    Invalid,
    InitA,
    AToB,
    BToA,
}

/// A queued transition after direction resolution: curves and bar
/// selections for the outgoing (src) and incoming (dst) sides.
#[derive(Debug, Clone)]
pub struct QueueData {
    pub transition_src: TransitionDef,
    pub transition_dst: TransitionDef,
    pub selection_src: [i64; 2],
    pub selection_dst: [i64; 2],
}

/// The controller. It owns only its stage; decks are borrowed per call from
/// the mixer, which serialises every command under its lock.
pub struct MixerFsm {
    stage: MixerStage,
}

impl MixerFsm {
    pub fn new() -> MixerFsm {
        MixerFsm {
            stage: MixerStage::InitA,
        }
    }

    pub fn stage(&self) -> MixerStage {
        self.stage
    }

    /// Observe deck state after a produced block. Startup ends once deck A
    /// has faded in and a song is waiting in B.
    pub fn update(&mut self, decks: &[Deck; 2]) {
        if self.stage == MixerStage::InitA
            && decks[0].stage() == TransitionStage::Post
            && decks[1].song().is_some()
        {
            self.stage = MixerStage::AToB;
            info!("mixer stage INIT_A -> A_TO_B");
        }
    }

    /// The deck currently considered audible-dominant.
    pub fn master_deck(&self, decks: &[Deck; 2]) -> TargetDeck {
        let stage_a = decks[0].stage();
        let stage_b = decks[1].stage();
        match self.stage {
            MixerStage::InitA => TargetDeck::A,
            MixerStage::AToB => {
                if matches!(stage_b, TransitionStage::None | TransitionStage::Pre) {
                    TargetDeck::A
                } else {
                    TargetDeck::B
                }
            }
            MixerStage::BToA => {
                if matches!(stage_a, TransitionStage::None | TransitionStage::Pre) {
                    TargetDeck::B
                } else {
                    TargetDeck::A
                }
            }
        }
    }

    /// Which deck a load would target, plus the stage the mixer advances to
    /// when the load doubles as a hand-over acknowledgement.
    fn load_plan(&self, decks: &[Deck; 2]) -> (TargetDeck, Option<MixerStage>) {
        let stage_a = decks[0].stage();
        let stage_b = decks[1].stage();
        match self.stage {
            MixerStage::InitA => {
                if decks[0].song().is_none() || stage_a == TransitionStage::None {
                    // Nothing playing yet: (re)load A.
                    (TargetDeck::A, None)
                } else {
                    // A is queued or playing; the new song goes to B. Once A
                    // has faded in, transitions A to B become legal.
                    let advance = (stage_a == TransitionStage::Post).then_some(MixerStage::AToB);
                    (TargetDeck::B, advance)
                }
            }
            MixerStage::AToB => match (stage_a, stage_b) {
                (TransitionStage::Post, TransitionStage::None) => (TargetDeck::B, None),
                (TransitionStage::Post, TransitionStage::Post) => {
                    // Hand-over to B is complete; A is free again.
                    (TargetDeck::A, Some(MixerStage::BToA))
                }
                _ => (TargetDeck::Invalid, None),
            },
            MixerStage::BToA => match (stage_a, stage_b) {
                (TransitionStage::None, TransitionStage::Post) => (TargetDeck::A, None),
                (TransitionStage::Post, TransitionStage::Post) => {
                    (TargetDeck::B, Some(MixerStage::AToB))
                }
                _ => (TargetDeck::Invalid, None),
            },
        }
    }

    /// Dry run of [`MixerFsm::load`].
    pub fn load_dry(&self, decks: &[Deck; 2]) -> TargetDeck {
        self.load_plan(decks).0
    }

    /// Install a song into the deck the current state designates.
    pub fn load(&mut self, decks: &mut [Deck; 2], song: Arc<Song>) -> Result<TargetDeck, MixerError> {
        let (target, advance) = self.load_plan(decks);
        match target {
            TargetDeck::A => decks[0].load(song),
            TargetDeck::B => decks[1].load(song),
            TargetDeck::Invalid => return Err(MixerError::IllegalCommand),
        }
        if let Some(stage) = advance {
            info!(?stage, "mixer stage advanced by load");
            self.stage = stage;
        }
        Ok(target)
    }

    /// Which deck a cancel would reset. Cancelling is only possible while
    /// the outgoing deck has not reached its transition window.
    fn cancel_plan(&self, decks: &[Deck; 2]) -> TargetDeck {
        match self.stage {
            MixerStage::InitA => TargetDeck::Invalid,
            MixerStage::AToB => {
                if decks[0].stage() == TransitionStage::Pre {
                    TargetDeck::B
                } else {
                    TargetDeck::Invalid
                }
            }
            MixerStage::BToA => {
                if decks[1].stage() == TransitionStage::Pre {
                    TargetDeck::A
                } else {
                    TargetDeck::Invalid
                }
            }
        }
    }

    /// Dry run of [`MixerFsm::cancel`].
    pub fn cancel_dry(&self, decks: &[Deck; 2]) -> TargetDeck {
        self.cancel_plan(decks)
    }

    /// Abort the queued transition: the outgoing deck keeps playing with its
    /// curves cleared, the incoming deck is reloaded with its own song and
    /// stops.
    pub fn cancel(&mut self, decks: &mut [Deck; 2]) -> Result<TargetDeck, MixerError> {
        let target = self.cancel_plan(decks);
        let (outgoing, incoming) = match target {
            TargetDeck::B => (0usize, 1usize),
            TargetDeck::A => (1usize, 0usize),
            TargetDeck::Invalid => return Err(MixerError::IllegalCommand),
        };
        decks[outgoing].clear_transition();
        if let Some(song) = decks[incoming].song().cloned() {
            decks[incoming].load(song);
        }
        info!(?target, "transition cancelled");
        Ok(target)
    }

    /// Direction a queue would take, plus the stage advance it implies.
    fn queue_plan(&self, decks: &[Deck; 2]) -> (QueueDirection, Option<MixerStage>) {
        let stage_a = decks[0].stage();
        let stage_b = decks[1].stage();
        match self.stage {
            MixerStage::InitA => {
                if decks[0].song().is_some()
                    && decks[1].song().is_none()
                    && stage_a == TransitionStage::None
                {
                    (QueueDirection::InitA, None)
                } else {
                    (QueueDirection::Invalid, None)
                }
            }
            MixerStage::AToB => match (stage_a, stage_b) {
                (TransitionStage::Post, TransitionStage::None) => (QueueDirection::AToB, None),
                (TransitionStage::Post, TransitionStage::Post) => {
                    (QueueDirection::BToA, Some(MixerStage::BToA))
                }
                _ => (QueueDirection::Invalid, None),
            },
            MixerStage::BToA => match (stage_a, stage_b) {
                (TransitionStage::None, TransitionStage::Post) => (QueueDirection::BToA, None),
                (TransitionStage::Post, TransitionStage::Post) => {
                    (QueueDirection::AToB, Some(MixerStage::AToB))
                }
                _ => (QueueDirection::Invalid, None),
            },
        }
    }

    /// Dry run of [`MixerFsm::queue`].
    pub fn queue_dry(&self, decks: &[Deck; 2]) -> QueueDirection {
        self.queue_plan(decks).0
    }

    /// Queue a transition. In `INIT_A` this is a one-sided fade-in of deck
    /// A; otherwise the source deck gets an outgoing curve, the destination
    /// an incoming one, and the destination starts playing so that the two
    /// selections align on the global timeline.
    pub fn queue(
        &mut self,
        decks: &mut [Deck; 2],
        registry: &EffectRegistry,
        qd: &QueueData,
    ) -> Result<QueueDirection, MixerError> {
        let (direction, advance) = self.queue_plan(decks);
        match direction {
            QueueDirection::Invalid => return Err(MixerError::IllegalCommand),
            QueueDirection::InitA => {
                let deck = &mut decks[0];
                let Some(song) = deck.song().cloned() else {
                    return Err(MixerError::IllegalCommand);
                };
                let start = song.bar_to_time(qd.selection_src[0] as f64);
                let end = song.bar_to_time(qd.selection_src[1] as f64 + 1.0);
                let chain = build_transition(registry, &qd.transition_src, start, end, true)?;
                deck.transition = chain;
                deck.transition_bars = Some(qd.selection_src);
                deck.play(start);
            }
            QueueDirection::AToB => apply_transition(decks, 0, 1, registry, qd)?,
            QueueDirection::BToA => apply_transition(decks, 1, 0, registry, qd)?,
        }
        if let Some(stage) = advance {
            self.stage = stage;
        }
        info!(?direction, "transition queued");
        Ok(direction)
    }
}

impl Default for MixerFsm {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a src -> dst transition: curves on both decks, windows recorded,
/// and the destination deck started so the first selected bars coincide.
fn apply_transition(
    decks: &mut [Deck; 2],
    src: usize,
    dst: usize,
    registry: &EffectRegistry,
    qd: &QueueData,
) -> Result<(), MixerError> {
    debug_assert_ne!(src, dst);
    let (first, second) = decks.split_at_mut(1);
    let (src_deck, dst_deck) = if src == 0 {
        (&mut first[0], &mut second[0])
    } else {
        (&mut second[0], &mut first[0])
    };

    let (Some(src_song), Some(dst_song)) = (src_deck.song().cloned(), dst_deck.song().cloned())
    else {
        return Err(MixerError::IllegalCommand);
    };

    let src_start = src_song.bar_to_time(qd.selection_src[0] as f64);
    let src_end = src_song.bar_to_time(qd.selection_src[1] as f64 + 1.0);
    let dst_start = dst_song.bar_to_time(qd.selection_dst[0] as f64);
    let dst_end = dst_song.bar_to_time(qd.selection_dst[1] as f64 + 1.0);

    // Build both curve sets before touching any deck so a bad definition
    // leaves the mixer untouched.
    let src_chain = build_transition(registry, &qd.transition_src, src_start, src_end, false)?;
    let dst_chain = build_transition(registry, &qd.transition_dst, dst_start, dst_end, true)?;

    src_deck.transition = src_chain;
    src_deck.transition_bars = Some(qd.selection_src);
    dst_deck.transition = dst_chain;
    dst_deck.transition_bars = Some(qd.selection_dst);

    // Start the destination so that selection_src[0] and selection_dst[0]
    // meet on the global timeline.
    let bars_until_window = qd.selection_src[0] as f64 - src_song.time_to_bar(src_deck.time());
    dst_deck.play(dst_song.bar_to_time(qd.selection_dst[0] as f64 - bars_until_window));
    Ok(())
}
