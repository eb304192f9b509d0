//! The mixer - real-time producer and operator surface
//!
//! One mutex guards everything mutable: global clock and tempo, both decks,
//! the effect registry and the state machine. The audio sink's callback and
//! every operator command contend on that single lock; the producer holds it
//! exactly once per block and never allocates in steady state.

use crate::deck::Deck;
use crate::effects::{EffectAssets, EffectRegistry};
use crate::error::MixerError;
use crate::fsm::{MixerFsm, QueueData, QueueDirection, TargetDeck};
use crate::song::Song;
use crate::status::{Actions, ChannelStatus, MixerStatus};
use crate::transition::{invert_transition, TransitionDef};
use crate::{BUFFER_SIZE, SAMPLE_RATE, TRANSIENT_SIZE};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Everything the mixer lock protects.
struct MixerState {
    global_time: f64,
    global_bpm: i32,
    decks: [Deck; 2],
    fsm: MixerFsm,
    registry: EffectRegistry,
    /// Equal-power block-seam fades over `TRANSIENT_SIZE` frames.
    fade_in: Vec<f32>,
    fade_out: Vec<f32>,
}

/// The playback and mixing engine.
pub struct Mixer {
    state: Mutex<MixerState>,
}

impl Mixer {
    pub fn new(assets: &EffectAssets) -> Mixer {
        let n = (TRANSIENT_SIZE - 1) as f32;
        let fade_in = (0..TRANSIENT_SIZE).map(|k| (k as f32 / n).sqrt()).collect();
        let fade_out = (0..TRANSIENT_SIZE)
            .map(|k| (1.0 - k as f32 / n).sqrt())
            .collect();

        Mixer {
            state: Mutex::new(MixerState {
                global_time: 0.0,
                global_bpm: 130,
                decks: [Deck::new(), Deck::new()],
                fsm: MixerFsm::new(),
                registry: EffectRegistry::new(assets),
                fade_in,
                fade_out,
            }),
        }
    }

    /// Produce one block of `BUFFER_SIZE` stereo frames into `out`.
    ///
    /// Commands issued before this call are audible in this block; the FSM
    /// observes deck stages after the block's time advance.
    pub fn produce(&self, out: &mut [f32]) {
        debug_assert_eq!(out.len(), BUFFER_SIZE * 2);
        out.fill(0.0);

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let bpm = state.global_bpm;
            for deck in state.decks.iter_mut() {
                if deck.is_playing() {
                    render_deck(
                        deck,
                        &mut state.registry,
                        bpm,
                        &state.fade_in,
                        &state.fade_out,
                        out,
                    );
                }
            }
            state.global_time += BUFFER_SIZE as f64 / SAMPLE_RATE as f64;
            state.fsm.update(&state.decks);
        }

        for v in out.iter_mut() {
            *v = v.clamp(-1.0, 1.0);
        }
    }

    /// Set the global tempo every playing deck is stretched to.
    pub fn set_global_bpm(&self, bpm: i32) -> Result<(), MixerError> {
        if !(60..=200).contains(&bpm) {
            return Err(MixerError::BpmOutOfRange(bpm));
        }
        self.state.lock().global_bpm = bpm;
        info!(bpm, "global BPM set");
        Ok(())
    }

    pub fn global_bpm(&self) -> i32 {
        self.state.lock().global_bpm
    }

    /// Look for a song already installed in either deck, so repeated loads
    /// of the same file skip decoding and analysis.
    pub fn find_loaded(&self, file: &Path) -> Option<Arc<Song>> {
        let state = self.state.lock();
        state
            .decks
            .iter()
            .filter_map(|d| d.song())
            .find(|s| s.file == file)
            .cloned()
    }

    /// Install an already-loaded song into the deck the FSM designates.
    ///
    /// Decoding and analysis happen outside the lock; only this installation
    /// step serialises with the producer.
    pub fn install(&self, song: Arc<Song>) -> Result<TargetDeck, MixerError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.fsm.load(&mut state.decks, song)
    }

    /// Cancel the queued transition, if still legal.
    pub fn cancel(&self) -> Result<TargetDeck, MixerError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.fsm.cancel(&mut state.decks)
    }

    /// Queue a transition from the operator's two curve sets and bar
    /// selections. The dry-run direction decides which side plays the
    /// outgoing role; that side's curves are time-inverted so the same
    /// definition describes both directions.
    pub fn queue(
        &self,
        a_trans: &TransitionDef,
        b_trans: &TransitionDef,
        a_sel: [i64; 2],
        b_sel: [i64; 2],
    ) -> Result<QueueDirection, MixerError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let qd = match state.fsm.queue_dry(&state.decks) {
            QueueDirection::BToA => QueueData {
                transition_src: invert_transition(b_trans),
                transition_dst: a_trans.clone(),
                selection_src: b_sel,
                selection_dst: a_sel,
            },
            QueueDirection::AToB => QueueData {
                transition_src: invert_transition(a_trans),
                transition_dst: b_trans.clone(),
                selection_src: a_sel,
                selection_dst: b_sel,
            },
            QueueDirection::InitA => QueueData {
                transition_src: a_trans.clone(),
                transition_dst: b_trans.clone(),
                selection_src: a_sel,
                selection_dst: b_sel,
            },
            QueueDirection::Invalid => return Err(MixerError::IllegalCommand),
        };
        state.fsm.queue(&mut state.decks, &state.registry, &qd)
    }

    /// Snapshot the mixer for operators, including dry-run action outcomes.
    pub fn status(&self) -> MixerStatus {
        let state = self.state.lock();
        let channel = |deck: &Deck| ChannelStatus {
            time: deck.time(),
            file: deck.song().map(|s| s.file.clone()),
            is_playing: deck.is_playing(),
            transition_bars: deck.transition_bars(),
        };
        MixerStatus {
            global_time: state.global_time,
            global_bpm: state.global_bpm,
            stage: state.fsm.stage(),
            master: state.fsm.master_deck(&state.decks),
            channels: [channel(&state.decks[0]), channel(&state.decks[1])],
            actions: Actions {
                load: state.fsm.load_dry(&state.decks),
                cancel: state.fsm.cancel_dry(&state.decks),
                queue: state.fsm.queue_dry(&state.decks),
            },
        }
    }
}

/// Pick the stretch factor closest to unity: play at tempo, or fall back to
/// half- or double-time when the songs are far apart.
fn select_speed(global_bpm: i32, song_bpm: f64) -> f64 {
    let base = global_bpm as f64 / song_bpm;
    let candidates = [base, base / 2.0, base * 2.0];
    let mut speed = candidates[0];
    for &c in &candidates[1..] {
        if (1.0 - c).abs() < (1.0 - speed).abs() {
            speed = c;
        }
    }
    speed
}

/// Render one deck's contribution into the master accumulator.
fn render_deck(
    deck: &mut Deck,
    registry: &mut EffectRegistry,
    global_bpm: i32,
    fade_in: &[f32],
    fade_out: &[f32],
    master: &mut [f32],
) {
    let Deck {
        song,
        time,
        transition,
        transient,
        last,
        render: scratch,
        ..
    } = deck;
    let Some(song) = song.as_ref() else {
        return;
    };

    let speed = select_speed(global_bpm, song.bpm);

    // Read twice the block so heavy stretching still fills the buffer.
    let read_pos = (*time * SAMPLE_RATE as f64).floor() as i64;
    song.stream_into(read_pos, &mut scratch.src);
    scratch
        .stretcher
        .stretch(&scratch.src, speed, &mut scratch.stretched);
    if scratch.stretched.len() < (BUFFER_SIZE + TRANSIENT_SIZE) * 2 {
        scratch.stretched.resize((BUFFER_SIZE + TRANSIENT_SIZE) * 2, 0.0);
    }

    // Cross-fade the previous block's look-ahead over this block's head to
    // mask the stretch seam.
    let inp = &mut scratch.stretched[..BUFFER_SIZE * 2];
    if let Some(prev) = transient.as_ref() {
        for k in 0..TRANSIENT_SIZE {
            let fi = fade_in[k];
            let fo = fade_out[k];
            inp[2 * k] = inp[2 * k] * fi + prev[2 * k] * fo;
            inp[2 * k + 1] = inp[2 * k + 1] * fi + prev[2 * k + 1] * fo;
        }
    }

    // The chain input doubles the block: the previous raw block first as
    // pre-roll so IIR, delay and reverb state settles before the audible
    // half begins.
    match last.as_ref() {
        Some(prev) => scratch.chain_a[..BUFFER_SIZE * 2].copy_from_slice(prev),
        None => scratch.chain_a[..BUFFER_SIZE * 2].fill(0.0),
    }
    scratch.chain_a[BUFFER_SIZE * 2..].copy_from_slice(&scratch.stretched[..BUFFER_SIZE * 2]);

    last.get_or_insert_with(|| vec![0.0; BUFFER_SIZE * 2])
        .copy_from_slice(&scratch.stretched[..BUFFER_SIZE * 2]);
    transient
        .get_or_insert_with(|| vec![0.0; TRANSIENT_SIZE * 2])
        .copy_from_slice(&scratch.stretched[BUFFER_SIZE * 2..(BUFFER_SIZE + TRANSIENT_SIZE) * 2]);

    // Apply the chain, sampling each curve on the per-frame time axis of
    // the doubled input.
    let dt = speed / SAMPLE_RATE as f64;
    for (fx, curve) in transition.iter() {
        curve.sample_into(*time, dt, &mut scratch.param);
        if let Some(effect) = registry.get_mut(fx) {
            effect.apply(
                &scratch.chain_a,
                &mut scratch.chain_b,
                &scratch.param,
                global_bpm as f64,
            );
            std::mem::swap(&mut scratch.chain_a, &mut scratch.chain_b);
        }
    }

    *time += BUFFER_SIZE as f64 * speed / SAMPLE_RATE as f64;

    // Only the second half is audible; the pre-roll is discarded.
    for (m, v) in master.iter_mut().zip(&scratch.chain_a[BUFFER_SIZE * 2..]) {
        *m += *v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_support::test_assets;
    use crate::fsm::MixerStage;
    use crate::source::AudioSource;
    use crate::TransitionStage;

    fn tone_source(frames: usize) -> Arc<AudioSource> {
        use std::f64::consts::PI;
        let signal: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let v = (2.0 * PI * 220.0 * i as f64 / SAMPLE_RATE as f64).sin() as f32 * 0.5;
                [v, v]
            })
            .collect();
        Arc::new(AudioSource::from_frames(signal).unwrap())
    }

    fn song(bpm: f64, seconds: usize) -> Arc<Song> {
        Arc::new(Song::new(
            tone_source(SAMPLE_RATE as usize * seconds),
            "x - y.wav",
            bpm,
            0,
        ))
    }

    fn vol_def() -> TransitionDef {
        let mut def = TransitionDef::new();
        def.insert("vol".into(), vec![(0.0, 0.0), (1.0, 1.0)]);
        def
    }

    fn produce_block(mixer: &Mixer) -> Vec<f32> {
        let mut out = vec![0.0f32; BUFFER_SIZE * 2];
        mixer.produce(&mut out);
        out
    }

    #[test]
    fn test_speed_selection_prefers_unity() {
        // 140 over 70: half-time beats double speed.
        assert_eq!(select_speed(140, 70.0), 1.0);
        // Identical tempos play straight.
        assert_eq!(select_speed(128, 128.0), 1.0);
        // 130 over 128: no halving helps.
        assert!((select_speed(130, 128.0) - 130.0 / 128.0).abs() < 1e-12);
        // 180 over 70: base 2.571, half 1.286, double 5.143.
        assert!((select_speed(180, 70.0) - 180.0 / 70.0 / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_silent_start_produces_exact_zeros() {
        let mixer = Mixer::new(&test_assets());
        for _ in 0..4 {
            let out = produce_block(&mixer);
            assert!(out.iter().all(|&v| v == 0.0));
        }
        let status = mixer.status();
        assert_eq!(status.stage, MixerStage::InitA);
        assert_eq!(status.master, TargetDeck::A);
        assert!(matches!(status.actions.load, TargetDeck::A));
        assert!(matches!(status.actions.cancel, TargetDeck::Invalid));
        assert!(matches!(status.actions.queue, QueueDirection::Invalid));
        assert!((status.global_time - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_global_bpm_bounds() {
        let mixer = Mixer::new(&test_assets());
        assert!(mixer.set_global_bpm(128).is_ok());
        assert_eq!(mixer.global_bpm(), 128);
        assert!(matches!(
            mixer.set_global_bpm(59),
            Err(MixerError::BpmOutOfRange(59))
        ));
        assert!(matches!(
            mixer.set_global_bpm(201),
            Err(MixerError::BpmOutOfRange(201))
        ));
        assert_eq!(mixer.global_bpm(), 128);
    }

    #[test]
    fn test_output_is_clipped() {
        let mixer = Mixer::new(&test_assets());
        mixer.set_global_bpm(128).unwrap();
        let song = song(128.0, 40);
        mixer.install(song).unwrap();
        mixer
            .queue(&vol_def(), &TransitionDef::new(), [0, 0], [0, 0])
            .unwrap();
        for _ in 0..8 {
            let out = produce_block(&mixer);
            assert!(out.iter().all(|&v| (-1.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn test_single_deck_passthrough_matches_source() {
        let mixer = Mixer::new(&test_assets());
        mixer.set_global_bpm(128).unwrap();
        let song = song(128.0, 40);
        mixer.install(song.clone()).unwrap();

        // Start playback directly with no transition curves: POST, raw deck.
        {
            let mut guard = mixer.state.lock();
            guard.decks[0].play(0.0);
        }

        // First block: speed is 1, no transient yet, so output equals the
        // source exactly.
        let out = produce_block(&mixer);
        let expected = song.source().stream(0, BUFFER_SIZE);
        assert_eq!(out, expected);

        // Later blocks still match exactly outside the transient seam.
        let out = produce_block(&mixer);
        let expected = song.source().stream(BUFFER_SIZE as i64, BUFFER_SIZE);
        assert_eq!(out[TRANSIENT_SIZE * 2..], expected[TRANSIENT_SIZE * 2..]);

        // Inside the seam the look-ahead tail carries the same samples, so
        // the cross-fade scales them by fade_in + fade_out.
        let n = (TRANSIENT_SIZE - 1) as f32;
        for k in 0..TRANSIENT_SIZE {
            let f = (k as f32 / n).sqrt() + (1.0 - k as f32 / n).sqrt();
            for ch in 0..2 {
                let got = out[2 * k + ch];
                let want = expected[2 * k + ch] * f;
                assert!((got - want).abs() < 1e-4, "frame {} ch {}", k, ch);
            }
        }
    }

    #[test]
    fn test_producer_advances_clocks() {
        let mixer = Mixer::new(&test_assets());
        mixer.set_global_bpm(128).unwrap();
        mixer.install(song(128.0, 40)).unwrap();
        mixer
            .queue(&vol_def(), &TransitionDef::new(), [0, 3], [0, 0])
            .unwrap();

        produce_block(&mixer);
        let status = mixer.status();
        let block = BUFFER_SIZE as f64 / SAMPLE_RATE as f64;
        assert!((status.global_time - block).abs() < 1e-9);
        assert!((status.channels[0].time - block).abs() < 1e-9);
    }

    #[test]
    fn test_initial_fade_in_scenario() {
        let mixer = Mixer::new(&test_assets());
        mixer.set_global_bpm(128).unwrap();
        let song = song(128.0, 40);
        mixer.install(song.clone()).unwrap();

        let status = mixer.status();
        assert!(!status.channels[0].is_playing);
        assert!(matches!(status.actions.queue, QueueDirection::InitA));

        mixer
            .queue(&vol_def(), &TransitionDef::new(), [0, 3], [0, 0])
            .unwrap();
        let status = mixer.status();
        assert!(status.channels[0].is_playing);
        assert_eq!(status.channels[0].transition_bars, Some([0, 3]));

        // Four bars at 128 BPM are 7.5 s = 30 blocks. Walk through the
        // window and watch the deck's stage progress.
        {
            let guard = mixer.state.lock();
            assert_eq!(guard.decks[0].stage(), TransitionStage::Mix);
        }
        for _ in 0..30 {
            produce_block(&mixer);
        }
        {
            let guard = mixer.state.lock();
            assert_eq!(guard.decks[0].stage(), TransitionStage::Post);
        }
        // B is still empty, so the mixer stays in INIT_A.
        assert_eq!(mixer.status().stage, MixerStage::InitA);

        // Loading a second song now goes to B and unlocks A_TO_B.
        mixer.install(self::song(130.0, 40)).unwrap();
        assert_eq!(mixer.status().stage, MixerStage::AToB);
    }

    #[test]
    fn test_fade_in_ramps_volume() {
        let mixer = Mixer::new(&test_assets());
        mixer.set_global_bpm(128).unwrap();
        mixer.install(song(128.0, 60)).unwrap();

        // Fade in over bars 0..=7 (15 s).
        mixer
            .queue(&vol_def(), &TransitionDef::new(), [0, 7], [0, 0])
            .unwrap();

        let early = produce_block(&mixer);
        let early_rms =
            (early.iter().map(|v| v * v).sum::<f32>() / early.len() as f32).sqrt();

        // Jump near the end of the fade.
        for _ in 0..55 {
            produce_block(&mixer);
        }
        let late = produce_block(&mixer);
        let late_rms = (late.iter().map(|v| v * v).sum::<f32>() / late.len() as f32).sqrt();

        assert!(
            late_rms > early_rms * 4.0,
            "early {} late {}",
            early_rms,
            late_rms
        );
    }

    #[test]
    fn test_find_loaded_reuses_song() {
        let mixer = Mixer::new(&test_assets());
        let song = song(128.0, 30);
        mixer.install(song.clone()).unwrap();
        let found = mixer.find_loaded(Path::new("x - y.wav")).unwrap();
        assert!(Arc::ptr_eq(&found, &song));
        assert!(mixer.find_loaded(Path::new("other.wav")).is_none());
    }

    #[test]
    fn test_queue_inversion_uses_b_side_as_source() {
        let mixer = Mixer::new(&test_assets());
        mixer.set_global_bpm(128).unwrap();

        // Drive the mixer into A_TO_B with both decks in POST, so the next
        // queue runs B to A.
        mixer.install(song(128.0, 60)).unwrap();
        {
            let mut guard = mixer.state.lock();
            guard.decks[0].play(0.0);
        }
        mixer.install(song(128.0, 60)).unwrap();
        {
            let mut guard = mixer.state.lock();
            let state = &mut *guard;
            state.fsm.update(&state.decks);
            state.decks[1].play(0.0);
        }
        assert_eq!(mixer.status().stage, MixerStage::AToB);

        // An asymmetric b-side curve: after inversion its first control
        // point moves to t=1.
        let mut b_def = TransitionDef::new();
        b_def.insert("vol".into(), vec![(0.0, 0.25), (1.0, 1.0)]);
        let dir = mixer.queue(&vol_def(), &b_def, [0, 3], [4, 7]).unwrap();
        assert!(matches!(dir, QueueDirection::BToA));
        assert_eq!(mixer.status().stage, MixerStage::BToA);

        let guard = mixer.state.lock();
        // Source side is deck B with the inverted curve: outgoing clamps
        // land at 1 before the window and 0 after it, and the inverted
        // points put 1.0 at the window start.
        let (fx, curve) = &guard.decks[1].transition[0];
        assert_eq!(fx, "vol");
        let song_b = guard.decks[1].song().unwrap();
        let start = song_b.bar_to_time(4.0);
        let end = song_b.bar_to_time(8.0);
        assert!((curve.value_at(start) - 1.0).abs() < 1e-6);
        assert!((curve.value_at(end) - 0.25).abs() < 1e-6);
        // Destination deck A: bars recorded and rolling in.
        assert_eq!(guard.decks[0].transition_bars(), Some([0, 3]));
        assert!(guard.decks[0].is_playing());
    }
}
