//! Live input level metering.
//!
//! Once per frame tick the monitor reduces the analyser's frequency snapshot
//! to a single RMS amplitude in [0, 255] and classifies it as speech or
//! silence for the UI. The loop runs until cancelled; cancelling twice is
//! harmless.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::audio::analyser::Analyser;

/// Analysis window driving the meter (samples per FFT frame).
pub const ANALYSER_WINDOW: usize = 512;

/// Frame-to-frame smoothing applied to the frequency bins.
pub const LEVEL_SMOOTHING: f32 = 0.3;

/// Amplitudes above this read as speech on the meter.
pub const SPEECH_THRESHOLD: u16 = 10;

/// Meter refresh cadence (one UI frame).
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Level meter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelConfig {
    /// FFT window size; must be a power of two.
    pub window_size: usize,
    /// Bin smoothing constant in [0, 1).
    pub smoothing: f32,
    /// Speech classification threshold on the RMS amplitude.
    pub speech_threshold: u16,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            window_size: ANALYSER_WINDOW,
            smoothing: LEVEL_SMOOTHING,
            speech_threshold: SPEECH_THRESHOLD,
        }
    }
}

/// Speech/no-speech reading derived from the current amplitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceActivity {
    SpeechDetected,
    Listening,
}

impl VoiceActivity {
    pub fn classify(amplitude: u16, threshold: u16) -> Self {
        if amplitude > threshold {
            Self::SpeechDetected
        } else {
            Self::Listening
        }
    }
}

/// One meter reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelUpdate {
    pub amplitude: u16,
    pub activity: VoiceActivity,
}

/// RMS over all frequency bins, rounded to an integer in [0, 255].
pub fn rms_amplitude(bins: &[u8]) -> u16 {
    if bins.is_empty() {
        return 0;
    }
    let sum: f64 = bins.iter().map(|&b| (b as f64) * (b as f64)).sum();
    (sum / bins.len() as f64).sqrt().round() as u16
}

/// Publishes meter readings to whoever renders them.
///
/// Holds only the most recent value; readings are never persisted.
pub struct LevelPublisher {
    current: AtomicU16,
    threshold: u16,
    sink: Box<dyn Fn(LevelUpdate) + Send + Sync>,
}

impl LevelPublisher {
    pub fn new(threshold: u16, sink: impl Fn(LevelUpdate) + Send + Sync + 'static) -> Self {
        Self {
            current: AtomicU16::new(0),
            threshold,
            sink: Box::new(sink),
        }
    }

    /// A publisher with no subscriber; the meter still tracks `current`.
    pub fn silent(threshold: u16) -> Self {
        Self::new(threshold, |_| {})
    }

    pub fn publish(&self, amplitude: u16) {
        self.current.store(amplitude, Ordering::Relaxed);
        (self.sink)(LevelUpdate {
            amplitude,
            activity: VoiceActivity::classify(amplitude, self.threshold),
        });
    }

    /// Drop the meter back to zero (session stopped or never had a graph).
    pub fn reset(&self) {
        self.publish(0);
    }

    pub fn current(&self) -> u16 {
        self.current.load(Ordering::Relaxed)
    }
}

/// Frame loop that polls the analyser until cancelled.
pub struct LevelMonitor {
    stop_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl LevelMonitor {
    /// Start the frame loop against a live analyser.
    pub fn start(analyser: Arc<dyn Analyser>, publisher: Arc<LevelPublisher>) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::spawn(move || {
            let mut bins = vec![0u8; analyser.bin_count()];
            loop {
                match stop_rx.recv_timeout(FRAME_INTERVAL) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                analyser.byte_frequency_data(&mut bins);
                publisher.publish(rms_amplitude(&bins));
            }
            flag.store(false, Ordering::Release);
        });

        Self {
            stop_tx,
            handle: Some(handle),
            running,
        }
    }

    /// Cancel the frame loop. Safe to call after the loop already stopped.
    pub fn cancel(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("level monitor worker panicked");
            }
        }
    }

    /// True while a frame tick is still scheduled.
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl Drop for LevelMonitor {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct FixedAnalyser(Vec<u8>);

    impl Analyser for FixedAnalyser {
        fn byte_frequency_data(&self, bins: &mut [u8]) {
            let count = bins.len().min(self.0.len());
            bins[..count].copy_from_slice(&self.0[..count]);
        }

        fn bin_count(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn test_rms_silence_is_zero() {
        assert_eq!(rms_amplitude(&[0u8; 256]), 0);
        assert_eq!(rms_amplitude(&[]), 0);
    }

    #[test]
    fn test_rms_full_scale_is_max() {
        assert_eq!(rms_amplitude(&[255u8; 256]), 255);
    }

    #[test]
    fn test_rms_known_value() {
        // sqrt((9 + 16) / 2) = 3.53.. rounds to 4
        assert_eq!(rms_amplitude(&[3, 4]), 4);
    }

    #[test]
    fn test_activity_threshold() {
        assert_eq!(
            VoiceActivity::classify(10, SPEECH_THRESHOLD),
            VoiceActivity::Listening
        );
        assert_eq!(
            VoiceActivity::classify(11, SPEECH_THRESHOLD),
            VoiceActivity::SpeechDetected
        );
    }

    #[test]
    fn test_monitor_cancel_is_idempotent() {
        let analyser: Arc<dyn Analyser> = Arc::new(FixedAnalyser(vec![42; 16]));
        let publisher = Arc::new(LevelPublisher::silent(SPEECH_THRESHOLD));

        let mut monitor = LevelMonitor::start(analyser, publisher.clone());
        std::thread::sleep(Duration::from_millis(40));
        assert!(monitor.is_running());

        monitor.cancel();
        assert!(!monitor.is_running());
        monitor.cancel();
        assert!(!monitor.is_running());
        assert_eq!(publisher.current(), 42);
    }

    #[test]
    fn test_publisher_reset_drops_to_zero() {
        let publisher = LevelPublisher::silent(SPEECH_THRESHOLD);
        publisher.publish(120);
        assert_eq!(publisher.current(), 120);
        publisher.reset();
        assert_eq!(publisher.current(), 0);
    }

    proptest! {
        #[test]
        fn prop_dominated_buffers_give_ordered_amplitudes(
            pairs in proptest::collection::vec((0u8..=255u8, 0u8..=255u8), 1..64)
        ) {
            let lo: Vec<u8> = pairs.iter().map(|&(a, b)| a.min(b)).collect();
            let hi: Vec<u8> = pairs.iter().map(|&(a, b)| a.max(b)).collect();
            prop_assert!(rms_amplitude(&lo) <= rms_amplitude(&hi));
        }
    }
}
