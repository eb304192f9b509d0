//! Status document for the command surface

use crate::fsm::{MixerStage, QueueDirection, TargetDeck};
use serde::Serialize;
use std::path::PathBuf;

/// Snapshot of one channel for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    /// Read head in source seconds.
    pub time: f64,
    /// File backing the loaded song, if any.
    pub file: Option<PathBuf>,
    pub is_playing: bool,
    /// Queued transition window in bar indices.
    pub transition_bars: Option<[i64; 2]>,
}

/// Dry-run outcome of each operator command, for greying out UI actions.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Actions {
    pub load: TargetDeck,
    pub cancel: TargetDeck,
    pub queue: QueueDirection,
}

/// Full mixer state as reported to operators.
#[derive(Debug, Clone, Serialize)]
pub struct MixerStatus {
    pub global_time: f64,
    pub global_bpm: i32,
    pub stage: MixerStage,
    /// The audible-dominant deck.
    pub master: TargetDeck,
    pub channels: [ChannelStatus; 2],
    pub actions: Actions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialises_with_screaming_names() {
        let status = MixerStatus {
            global_time: 1.25,
            global_bpm: 128,
            stage: MixerStage::AToB,
            master: TargetDeck::A,
            channels: [
                ChannelStatus {
                    time: 0.5,
                    file: Some(PathBuf::from("data/songs/x - y.wav")),
                    is_playing: true,
                    transition_bars: Some([8, 11]),
                },
                ChannelStatus {
                    time: 0.0,
                    file: None,
                    is_playing: false,
                    transition_bars: None,
                },
            ],
            actions: Actions {
                load: TargetDeck::B,
                cancel: TargetDeck::Invalid,
                queue: QueueDirection::AToB,
            },
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["stage"], "A_TO_B");
        assert_eq!(json["master"], "A");
        assert_eq!(json["actions"]["cancel"], "INVALID");
        assert_eq!(json["channels"][0]["transition_bars"][0], 8);
        assert!(json["channels"][1]["file"].is_null());
    }
}
