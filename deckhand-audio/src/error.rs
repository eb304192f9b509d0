//! Engine error types

use thiserror::Error;

/// Errors surfaced by operator commands. The audio path itself never fails;
/// an illegal command leaves the mixer untouched.
#[derive(Debug, Error)]
pub enum MixerError {
    /// The FSM preconditions for the command are not met.
    #[error("command is not legal in the current mixer state")]
    IllegalCommand,

    /// Global BPM outside the range the stretcher can sensibly serve.
    #[error("global BPM {0} is outside the supported range 60-200")]
    BpmOutOfRange(i32),

    /// A transition definition references an effect the registry lacks.
    #[error("transition references unknown effect `{0}`")]
    UnknownEffect(String),

    /// A transition definition carries an effect with no control points.
    #[error("transition curve for `{0}` has no control points")]
    EmptyCurve(String),
}
