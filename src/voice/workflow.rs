//! Voice workflow state machine.
//!
//! Drives one dialog's capture → clip → submission round for a given intent,
//! independent of any rendering layer. Consumers watch the event channel;
//! every exit path — stop, failure, abandonment — releases the capture
//! hardware.

use std::mem;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::audio::capture::CaptureSession;
use crate::audio::clip::Clip;
use crate::audio::level::{LevelConfig, LevelPublisher, LevelUpdate};
use crate::audio::mic::MicSource;
use crate::error::VoiceError;
use crate::gateway::{GatewayError, IdentifyOutcome, SpeakerGateway};

/// What the captured sample (or merge request) is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowIntent {
    /// Attach the sample to a known speaker.
    Enroll { speaker_id: i64 },
    /// Match the sample against all enrolled speakers.
    Identify,
    /// Fold one speaker identity into another; ships no audio.
    MergePrep {
        source_speaker_id: i64,
        target_speaker_id: i64,
    },
}

/// Terminal result of one workflow round.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    Identified {
        speaker_id: i64,
        speaker_alias: String,
        confidence: f64,
    },
    NotIdentified,
    Success { message: String },
    Failure { reason: String },
}

/// Observable phase of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowPhase {
    Idle,
    Recording,
    Captured,
    Submitting,
    Finished,
}

/// Everything the rendering layer needs to mirror the workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    Phase(WorkflowPhase),
    Level(LevelUpdate),
    Completed(WorkflowOutcome),
}

enum Stage {
    Idle,
    Recording(CaptureSession),
    Captured(Clip),
    Submitting,
    Finished(WorkflowOutcome),
}

/// One dialog's worth of workflow state.
pub struct VoiceWorkflow {
    intent: WorkflowIntent,
    gateway: Arc<dyn SpeakerGateway>,
    mic: Box<dyn MicSource>,
    level_cfg: LevelConfig,
    publisher: Arc<LevelPublisher>,
    stage: Stage,
    closed: bool,
    events: Sender<WorkflowEvent>,
    subscriber: Receiver<WorkflowEvent>,
}

impl VoiceWorkflow {
    pub fn new(
        intent: WorkflowIntent,
        gateway: Arc<dyn SpeakerGateway>,
        mic: Box<dyn MicSource>,
        level_cfg: LevelConfig,
    ) -> Self {
        let (events, subscriber) = unbounded();

        let level_events = events.clone();
        let publisher = Arc::new(LevelPublisher::new(
            level_cfg.speech_threshold,
            move |update| {
                let _ = level_events.try_send(WorkflowEvent::Level(update));
            },
        ));

        Self {
            intent,
            gateway,
            mic,
            level_cfg,
            publisher,
            stage: Stage::Idle,
            closed: false,
            events,
            subscriber,
        }
    }

    /// Event feed for the rendering layer. May be cloned freely.
    pub fn events(&self) -> Receiver<WorkflowEvent> {
        self.subscriber.clone()
    }

    pub fn intent(&self) -> WorkflowIntent {
        self.intent
    }

    pub fn phase(&self) -> WorkflowPhase {
        match self.stage {
            Stage::Idle => WorkflowPhase::Idle,
            Stage::Recording(_) => WorkflowPhase::Recording,
            Stage::Captured(_) => WorkflowPhase::Captured,
            Stage::Submitting => WorkflowPhase::Submitting,
            Stage::Finished(_) => WorkflowPhase::Finished,
        }
    }

    pub fn outcome(&self) -> Option<&WorkflowOutcome> {
        match &self.stage {
            Stage::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn clip(&self) -> Option<&Clip> {
        match &self.stage {
            Stage::Captured(clip) => Some(clip),
            _ => None,
        }
    }

    /// True once the workflow cannot be driven further (enroll success or
    /// explicit close).
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        let _ = self.events.try_send(WorkflowEvent::Phase(self.phase()));
        if let Stage::Finished(outcome) = &self.stage {
            let _ = self
                .events
                .try_send(WorkflowEvent::Completed(outcome.clone()));
        }
    }

    fn guard_open(&self) -> Result<(), VoiceError> {
        if self.closed {
            return Err(VoiceError::InvalidState("workflow is closed".to_string()));
        }
        Ok(())
    }

    /// Begin a capture. Allowed from Idle and from a finished round
    /// ("record again"). A denied microphone finishes the round immediately,
    /// without ever entering Recording.
    pub fn start_recording(&mut self) -> Result<(), VoiceError> {
        self.guard_open()?;
        match self.stage {
            Stage::Idle | Stage::Finished(_) => {}
            Stage::Recording(_) | Stage::Captured(_) | Stage::Submitting => {
                return Err(VoiceError::InvalidState(
                    "a capture is already in progress".to_string(),
                ));
            }
        }

        match CaptureSession::start(self.mic.as_mut(), &self.level_cfg, self.publisher.clone()) {
            Ok(session) => {
                self.enter(Stage::Recording(session));
                Ok(())
            }
            Err(err) => {
                log::warn!("capture refused: {}", err);
                self.enter(Stage::Finished(WorkflowOutcome::Failure {
                    reason: err.to_string(),
                }));
                Err(err)
            }
        }
    }

    /// Stop the live capture and hold the assembled clip. A stop with no
    /// capture in progress is a no-op.
    pub fn stop_recording(&mut self) {
        if !matches!(self.stage, Stage::Recording(_)) {
            return;
        }
        if let Stage::Recording(session) = mem::replace(&mut self.stage, Stage::Idle) {
            let clip = Clip::assemble(session.stop());
            log::info!(
                "captured clip: {} bytes ({} ms)",
                clip.len(),
                clip.duration_ms()
            );
            self.enter(Stage::Captured(clip));
        }
    }

    /// Send the held clip to the backend according to the intent.
    ///
    /// An empty clip is rejected with `EmptyRecording` before anything goes
    /// on the wire and the clip round stays recoverable. Gateway failures
    /// finish the round with the server's detail text when it provided one.
    pub async fn submit(&mut self) -> Result<(), VoiceError> {
        self.guard_open()?;
        if matches!(self.intent, WorkflowIntent::MergePrep { .. }) {
            return Err(VoiceError::InvalidState(
                "merge submits no audio; call merge()".to_string(),
            ));
        }

        let clip = match mem::replace(&mut self.stage, Stage::Submitting) {
            Stage::Captured(clip) => {
                if clip.is_empty() {
                    self.stage = Stage::Captured(clip);
                    return Err(VoiceError::EmptyRecording);
                }
                clip
            }
            other => {
                self.stage = other;
                return Err(VoiceError::InvalidState(
                    "no captured clip to submit".to_string(),
                ));
            }
        };
        let _ = self
            .events
            .try_send(WorkflowEvent::Phase(WorkflowPhase::Submitting));

        match self.intent {
            WorkflowIntent::Enroll { speaker_id } => {
                match self.gateway.enroll(speaker_id, &clip).await {
                    Ok(message) => {
                        // Terminal for enroll: the dialog closes on success.
                        self.closed = true;
                        self.enter(Stage::Finished(WorkflowOutcome::Success { message }));
                        Ok(())
                    }
                    Err(err) => self.finish_failed(err),
                }
            }
            WorkflowIntent::Identify => match self.gateway.identify(&clip).await {
                Ok(IdentifyOutcome::Match {
                    speaker_id,
                    speaker_alias,
                    confidence,
                }) => {
                    self.enter(Stage::Finished(WorkflowOutcome::Identified {
                        speaker_id,
                        speaker_alias,
                        confidence,
                    }));
                    Ok(())
                }
                Ok(IdentifyOutcome::NoMatch) => {
                    self.enter(Stage::Finished(WorkflowOutcome::NotIdentified));
                    Ok(())
                }
                Err(err) => self.finish_failed(err),
            },
            WorkflowIntent::MergePrep { .. } => Err(VoiceError::InvalidState(
                "merge submits no audio".to_string(),
            )),
        }
    }

    /// Run the merge round: local validation, then the JSON call. Bypasses
    /// capture entirely and only reuses the result surface.
    pub async fn merge(&mut self) -> Result<(), VoiceError> {
        self.guard_open()?;
        let (source, target) = match self.intent {
            WorkflowIntent::MergePrep {
                source_speaker_id,
                target_speaker_id,
            } => (source_speaker_id, target_speaker_id),
            _ => {
                return Err(VoiceError::InvalidState(
                    "workflow intent is not a merge".to_string(),
                ));
            }
        };
        if matches!(self.stage, Stage::Recording(_) | Stage::Submitting) {
            return Err(VoiceError::InvalidState("workflow is busy".to_string()));
        }
        if source == target {
            let err = VoiceError::SameSpeaker;
            self.enter(Stage::Finished(WorkflowOutcome::Failure {
                reason: err.to_string(),
            }));
            return Err(err);
        }

        self.enter(Stage::Submitting);
        match self.gateway.merge(source, target).await {
            Ok(message) => {
                self.enter(Stage::Finished(WorkflowOutcome::Success { message }));
                Ok(())
            }
            Err(err) => self.finish_failed(err),
        }
    }

    /// Abandon the workflow from any state, releasing any live capture.
    pub fn close(&mut self) {
        let stage = mem::replace(&mut self.stage, Stage::Idle);
        if let Stage::Recording(session) = stage {
            // Implicit stop; the recording is discarded.
            let _ = session.stop();
        }
        self.closed = true;
        log::debug!("voice workflow closed");
    }

    fn finish_failed(&mut self, err: GatewayError) -> Result<(), VoiceError> {
        let reason = submission_reason(&err);
        self.enter(Stage::Finished(WorkflowOutcome::Failure {
            reason: reason.clone(),
        }));
        Err(VoiceError::SubmissionFailed(reason))
    }
}

impl Drop for VoiceWorkflow {
    fn drop(&mut self) {
        if !self.closed {
            self.close();
        }
    }
}

/// The user-facing reason for a failed submission: the server's detail text
/// when present, a generic line otherwise.
fn submission_reason(err: &GatewayError) -> String {
    match err.detail() {
        Some(detail) => detail.to_string(),
        None => {
            log::warn!("submission failed without server detail: {}", err);
            "the voice service could not process the request".to_string()
        }
    }
}
