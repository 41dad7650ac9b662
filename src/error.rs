//! Error taxonomy for the capture and submission workflows.

use thiserror::Error;

/// User-facing failures of the voice workflow.
///
/// Hardware/permission failures end the round immediately; validation
/// failures are raised before anything goes on the wire; server failures
/// carry the service's detail text when it provided one.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// The platform refused microphone access or no usable device exists.
    #[error("microphone access denied: {0}")]
    MicAccessDenied(String),

    /// The capture produced zero audio; there is nothing to submit.
    #[error("nothing was recorded")]
    EmptyRecording,

    /// Merge validation: source and target are the same speaker.
    #[error("source and target speaker are the same")]
    SameSpeaker,

    /// The backend rejected or failed the submission.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    /// The state machine was driven out of order.
    #[error("invalid workflow state: {0}")]
    InvalidState(String),
}
