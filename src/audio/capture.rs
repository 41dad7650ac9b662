//! Capture session lifecycle.
//!
//! Owns the microphone stream, the chunk recorder, and the analyser graph for
//! the one session that may be open at a time. Teardown always runs in the
//! same order: recorder finish, monitor cancel, graph close, track stop,
//! meter reset — and it runs on every exit path, including drop.

use std::mem;
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::audio::analyser::{Analyser, SpectrumAnalyser};
use crate::audio::level::{LevelConfig, LevelMonitor, LevelPublisher};
use crate::audio::mic::{MicSource, MicStream, SampleFrame};
use crate::error::VoiceError;

/// Media type of the raw capture: interleaved signed 16-bit little-endian PCM.
fn media_type_for(sample_rate: u32) -> String {
    format!("audio/L16;rate={sample_rate};channels=1")
}

/// Everything the recorder produced for one finished session. Chunks are in
/// arrival order and stay that way.
pub struct RecordedAudio {
    pub chunks: Vec<Vec<u8>>,
    pub media_type: String,
    pub sample_rate: u32,
}

/// The audio graph attached to a live session; in this crate that is the
/// spectrum analyser feeding the meter.
struct AudioGraph {
    analyser: Arc<SpectrumAnalyser>,
}

impl AudioGraph {
    fn build(level_cfg: &LevelConfig) -> anyhow::Result<Self> {
        let analyser = SpectrumAnalyser::new(level_cfg.window_size, level_cfg.smoothing)?;
        Ok(Self {
            analyser: Arc::new(analyser),
        })
    }

    /// Release the graph. Failures here must never propagate.
    fn close(self) {
        log::debug!("audio graph closed");
    }
}

/// Drains the frame feed into the chunk sequence until asked to finish.
struct ChunkRecorder {
    stop_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ChunkRecorder {
    fn start(frames: Receiver<SampleFrame>, analyser: Option<Arc<SpectrumAnalyser>>) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = chunks.clone();

        let handle = thread::spawn(move || loop {
            select! {
                recv(frames) -> frame => match frame {
                    Ok(frame) => record_frame(&sink, analyser.as_deref(), &frame),
                    Err(_) => break,
                },
                recv(stop_rx) -> _ => {
                    // Flush whatever the device already delivered, then finish.
                    while let Ok(frame) = frames.try_recv() {
                        record_frame(&sink, analyser.as_deref(), &frame);
                    }
                    break;
                }
            }
        });

        Self {
            stop_tx,
            handle: Some(handle),
            chunks,
        }
    }

    /// Ask the recorder to finish and wait for its completion. The returned
    /// chunk sequence is final.
    fn finish(&mut self) -> Vec<Vec<u8>> {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("recorder worker panicked during finish");
            }
        }
        mem::take(&mut *self.chunks.lock().unwrap())
    }
}

fn record_frame(
    chunks: &Mutex<Vec<Vec<u8>>>,
    analyser: Option<&SpectrumAnalyser>,
    frame: &[i16],
) {
    if frame.is_empty() {
        return;
    }
    if let Some(analyser) = analyser {
        analyser.push_samples(frame);
    }
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for &sample in frame {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    chunks.lock().unwrap().push(bytes);
}

/// One open capture session: microphone, recorder, analyser graph, meter.
pub struct CaptureSession {
    stream: Option<Box<dyn MicStream>>,
    recorder: Option<ChunkRecorder>,
    graph: Option<AudioGraph>,
    monitor: Option<LevelMonitor>,
    publisher: Arc<LevelPublisher>,
    sample_rate: u32,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl CaptureSession {
    /// Open the microphone and begin recording.
    ///
    /// Permission/device failures abort the start and surface as
    /// `MicAccessDenied`. Failure to build the analyser graph does not
    /// prevent recording; the meter stays at zero for the session.
    pub fn start(
        mic: &mut dyn MicSource,
        level_cfg: &LevelConfig,
        publisher: Arc<LevelPublisher>,
    ) -> Result<Self, VoiceError> {
        let opened = mic.open()?;
        log::info!("capture session opened at {} Hz", opened.sample_rate);

        let graph = match AudioGraph::build(level_cfg) {
            Ok(graph) => Some(graph),
            Err(err) => {
                log::warn!("audio graph unavailable, recording without meter: {err:#}");
                publisher.reset();
                None
            }
        };

        let monitor = graph.as_ref().map(|graph| {
            let analyser: Arc<dyn Analyser> = graph.analyser.clone();
            LevelMonitor::start(analyser, publisher.clone())
        });

        let recorder = ChunkRecorder::start(
            opened.frames,
            graph.as_ref().map(|graph| graph.analyser.clone()),
        );

        Ok(Self {
            stream: Some(opened.stream),
            recorder: Some(recorder),
            graph,
            monitor,
            publisher,
            sample_rate: opened.sample_rate,
        })
    }

    /// True while the microphone still has live tracks.
    pub fn is_live(&self) -> bool {
        self.stream.as_ref().map(|s| s.is_live()).unwrap_or(false)
    }

    /// True while a meter frame is still scheduled.
    pub fn monitor_running(&self) -> bool {
        self.monitor
            .as_ref()
            .map(LevelMonitor::is_running)
            .unwrap_or(false)
    }

    /// Stop recording and release every acquired resource, in order.
    pub fn stop(mut self) -> RecordedAudio {
        let sample_rate = self.sample_rate;
        self.release().unwrap_or_else(|| RecordedAudio {
            chunks: Vec::new(),
            media_type: media_type_for(sample_rate),
            sample_rate,
        })
    }

    /// Ordered teardown. None of the steps may skip the ones after it; all
    /// failures here are logged and swallowed.
    fn release(&mut self) -> Option<RecordedAudio> {
        let mut recorder = self.recorder.take()?;

        // 1. Recorder completes; the chunk sequence is final.
        let chunks = recorder.finish();

        // 2. No further meter frames.
        if let Some(mut monitor) = self.monitor.take() {
            monitor.cancel();
        }

        // 3. Graph closed before the stream it reads from goes away.
        if let Some(graph) = self.graph.take() {
            graph.close();
        }

        // 4. Microphone tracks stopped.
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }

        // 5. Meter back to zero.
        self.publisher.reset();

        log::info!("capture session released ({} chunks)", chunks.len());
        Some(RecordedAudio {
            chunks,
            media_type: media_type_for(self.sample_rate),
            sample_rate: self.sample_rate,
        })
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.recorder.is_some() {
            log::debug!("capture session dropped while live, releasing");
            let _ = self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_support::{frame_bytes, MockMicSource};
    use std::time::Duration;

    fn level_cfg() -> LevelConfig {
        LevelConfig::default()
    }

    #[test]
    fn test_stop_releases_everything_in_any_sequence() {
        let mut mic = MockMicSource::with_frames(vec![vec![1, 2, 3], vec![4, 5]]);
        let state = mic.state();

        for _ in 0..3 {
            let publisher = Arc::new(LevelPublisher::silent(10));
            let session =
                CaptureSession::start(&mut mic, &level_cfg(), publisher.clone()).unwrap();
            assert!(session.is_live());

            let recorded = session.stop();
            assert!(!state.is_live(), "all tracks must have ended");
            assert_eq!(publisher.current(), 0, "meter must be reset");
            assert_eq!(recorded.chunks.len(), 2);
        }
    }

    #[test]
    fn test_chunks_keep_arrival_order() {
        let frames = vec![vec![10i16, -3], vec![7], vec![0, 0, 1]];
        let mut mic = MockMicSource::with_frames(frames.clone());
        let publisher = Arc::new(LevelPublisher::silent(10));

        let session = CaptureSession::start(&mut mic, &level_cfg(), publisher).unwrap();
        // Give the recorder a moment to drain the scripted frames.
        std::thread::sleep(Duration::from_millis(20));
        let recorded = session.stop();

        let expected: Vec<Vec<u8>> = frames.iter().map(|f| frame_bytes(f)).collect();
        assert_eq!(recorded.chunks, expected);
        assert!(recorded.media_type.starts_with("audio/L16"));
    }

    #[test]
    fn test_graph_failure_is_not_fatal() {
        let mut mic = MockMicSource::with_frames(vec![vec![1, 1, 1]]);
        let publisher = Arc::new(LevelPublisher::silent(10));

        // 500 is not a power of two; the graph cannot be built.
        let cfg = LevelConfig {
            window_size: 500,
            ..LevelConfig::default()
        };
        let session = CaptureSession::start(&mut mic, &cfg, publisher.clone()).unwrap();
        assert!(!session.monitor_running());
        assert_eq!(publisher.current(), 0);

        std::thread::sleep(Duration::from_millis(20));
        let recorded = session.stop();
        assert_eq!(recorded.chunks.len(), 1, "capture proceeds without a graph");
    }

    #[test]
    fn test_empty_capture_yields_no_chunks() {
        let mut mic = MockMicSource::with_frames(Vec::new());
        let publisher = Arc::new(LevelPublisher::silent(10));

        let session = CaptureSession::start(&mut mic, &level_cfg(), publisher).unwrap();
        let recorded = session.stop();
        assert!(recorded.chunks.is_empty());
    }

    #[test]
    fn test_drop_releases_abandoned_session() {
        let mut mic = MockMicSource::with_frames(vec![vec![9, 9]]);
        let state = mic.state();
        let publisher = Arc::new(LevelPublisher::silent(10));

        {
            let session = CaptureSession::start(&mut mic, &level_cfg(), publisher).unwrap();
            assert!(session.is_live());
        }
        assert!(!state.is_live(), "drop must stop the tracks");
    }

    #[test]
    fn test_denied_mic_surfaces_access_error() {
        let mut mic = MockMicSource::denied("microphone permission denied");
        let publisher = Arc::new(LevelPublisher::silent(10));

        let err = CaptureSession::start(&mut mic, &level_cfg(), publisher).unwrap_err();
        assert!(matches!(err, VoiceError::MicAccessDenied(_)));
    }
}
