//! Scripted stand-ins for the platform media layer, shared by the capture
//! and workflow tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::unbounded;

use crate::audio::mic::{MicSource, MicStream, OpenedMic, SampleFrame};
use crate::error::VoiceError;

/// Observable state of the mock microphone, held by the test.
#[derive(Default)]
pub(crate) struct MockMicState {
    live: AtomicBool,
    opens: AtomicUsize,
}

impl MockMicState {
    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }
}

/// Mock microphone that either denies access or replays scripted frames.
pub(crate) struct MockMicSource {
    deny: Option<String>,
    frames: Vec<SampleFrame>,
    sample_rate: u32,
    state: Arc<MockMicState>,
}

impl MockMicSource {
    pub(crate) fn with_frames(frames: Vec<SampleFrame>) -> Self {
        Self {
            deny: None,
            frames,
            sample_rate: 16_000,
            state: Arc::new(MockMicState::default()),
        }
    }

    pub(crate) fn denied(reason: &str) -> Self {
        Self {
            deny: Some(reason.to_string()),
            frames: Vec::new(),
            sample_rate: 16_000,
            state: Arc::new(MockMicState::default()),
        }
    }

    pub(crate) fn state(&self) -> Arc<MockMicState> {
        self.state.clone()
    }
}

impl MicSource for MockMicSource {
    fn open(&mut self) -> Result<OpenedMic, VoiceError> {
        if let Some(reason) = &self.deny {
            return Err(VoiceError::MicAccessDenied(reason.clone()));
        }

        self.state.opens.fetch_add(1, Ordering::AcqRel);
        self.state.live.store(true, Ordering::Release);

        // Preload the scripted frames; the closed sender marks end of feed.
        let (tx, rx) = unbounded();
        for frame in &self.frames {
            let _ = tx.send(frame.clone());
        }
        drop(tx);

        Ok(OpenedMic {
            frames: rx,
            sample_rate: self.sample_rate,
            stream: Box::new(MockMicStream {
                state: self.state.clone(),
            }),
        })
    }
}

struct MockMicStream {
    state: Arc<MockMicState>,
}

impl MicStream for MockMicStream {
    fn stop(&mut self) {
        self.state.live.store(false, Ordering::Release);
    }

    fn is_live(&self) -> bool {
        self.state.is_live()
    }
}

impl Drop for MockMicStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Little-endian byte image of one PCM frame, as the recorder stores it.
pub(crate) fn frame_bytes(frame: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for &sample in frame {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
