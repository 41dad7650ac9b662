//! Voicebooth: microphone capture, live level metering, and the speaker
//! enrollment / identification / merge workflows against a remote
//! voice-biometrics service.

pub mod audio;
pub mod config;
pub mod error;
pub mod gateway;
pub mod paths;
pub mod voice;

pub use audio::clip::Clip;
pub use error::VoiceError;
pub use gateway::{GatewayError, HttpSpeakerGateway, SpeakerGateway};
pub use voice::{VoiceWorkflow, WorkflowEvent, WorkflowIntent, WorkflowOutcome, WorkflowPhase};
