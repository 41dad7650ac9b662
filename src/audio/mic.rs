//! Microphone acquisition.
//!
//! The cpal stream is owned by a dedicated worker thread (streams are not
//! Send); PCM frames cross a channel to the recorder. A bounded stop channel
//! ends the worker, and with it the stream and its tracks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::audio::resolve_input_device;
use crate::error::VoiceError;

/// One mono PCM frame as delivered by the device callback.
pub type SampleFrame = Vec<i16>;

/// How long to wait for the capture worker to come up.
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// An opened microphone: the frame feed plus the track handle.
pub struct OpenedMic {
    pub frames: Receiver<SampleFrame>,
    pub stream: Box<dyn MicStream>,
    pub sample_rate: u32,
}

/// Microphone acquisition seam. The production implementation drives cpal;
/// tests substitute a scripted source.
pub trait MicSource: Send {
    /// Request microphone access and begin delivering frames.
    fn open(&mut self) -> Result<OpenedMic, VoiceError>;
}

/// A live input whose tracks can be stopped.
pub trait MicStream: Send {
    /// Stop all tracks. Idempotent.
    fn stop(&mut self);

    /// True while any track is still live.
    fn is_live(&self) -> bool;
}

/// Real microphone input via cpal.
pub struct CpalMicSource {
    device_name: Option<String>,
}

impl CpalMicSource {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl MicSource for CpalMicSource {
    fn open(&mut self) -> Result<OpenedMic, VoiceError> {
        let device_name = self.device_name.clone();
        let (frame_tx, frame_rx) = unbounded::<SampleFrame>();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<u32, String>>(1);
        let live = Arc::new(AtomicBool::new(true));
        let live_flag = live.clone();

        let worker_ready = ready_tx.clone();
        let handle = thread::spawn(move || {
            if let Err(err) = run_capture_worker(device_name, frame_tx, stop_rx, worker_ready) {
                let _ = ready_tx.send(Err(err));
            }
            live_flag.store(false, Ordering::Release);
        });

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(sample_rate)) => {
                log::info!("✓ microphone opened at {} Hz", sample_rate);
                Ok(OpenedMic {
                    frames: frame_rx,
                    sample_rate,
                    stream: Box::new(CpalMicStream {
                        stop_tx,
                        handle: Some(handle),
                        live,
                    }),
                })
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(VoiceError::MicAccessDenied(classify_mic_error(&reason)))
            }
            Err(_) => {
                let _ = stop_tx.try_send(());
                let _ = handle.join();
                Err(VoiceError::MicAccessDenied(
                    "audio device timed out".to_string(),
                ))
            }
        }
    }
}

struct CpalMicStream {
    stop_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
    live: Arc<AtomicBool>,
}

impl MicStream for CpalMicStream {
    fn stop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("capture worker panicked during stop");
            }
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

impl Drop for CpalMicStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker body: builds the stream, signals readiness, then parks until
/// stopped. Dropping the stream ends the device tracks.
fn run_capture_worker(
    device_name: Option<String>,
    frames: Sender<SampleFrame>,
    stop_rx: Receiver<()>,
    ready_tx: Sender<Result<u32, String>>,
) -> Result<(), String> {
    let device = resolve_input_device(device_name.as_deref()).map_err(|e| format!("{e:#}"))?;
    let supported = device.default_input_config().map_err(|e| e.to_string())?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input_stream_f32(&device, &config, channels, frames)?,
        SampleFormat::I16 => build_input_stream_i16(&device, &config, channels, frames)?,
        SampleFormat::U16 => build_input_stream_u16(&device, &config, channels, frames)?,
        other => return Err(format!("unsupported sample format: {other:?}")),
    };

    stream.play().map_err(|e| e.to_string())?;
    let _ = ready_tx.send(Ok(sample_rate));

    let _ = stop_rx.recv();
    drop(stream);
    Ok(())
}

// Input stream builders, one per device sample format. All downmix to mono
// i16 before handing frames to the recorder.

fn build_input_stream_f32(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    frames: Sender<SampleFrame>,
) -> Result<cpal::Stream, String> {
    device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono: SampleFrame = data
                    .chunks(channels.max(1))
                    .map(|frame| {
                        let avg = frame.iter().sum::<f32>() / channels.max(1) as f32;
                        (avg.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                    })
                    .collect();
                let _ = frames.send(mono);
            },
            |err| log::error!("capture stream error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())
}

fn build_input_stream_i16(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    frames: Sender<SampleFrame>,
) -> Result<cpal::Stream, String> {
    device
        .build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let mono: SampleFrame = data
                    .chunks(channels.max(1))
                    .map(|frame| {
                        let avg: i32 = frame.iter().map(|&s| s as i32).sum();
                        (avg / channels.max(1) as i32) as i16
                    })
                    .collect();
                let _ = frames.send(mono);
            },
            |err| log::error!("capture stream error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())
}

fn build_input_stream_u16(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    frames: Sender<SampleFrame>,
) -> Result<cpal::Stream, String> {
    device
        .build_input_stream(
            config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let mono: SampleFrame = data
                    .chunks(channels.max(1))
                    .map(|frame| {
                        let avg: i32 = frame.iter().map(|&s| s as i32).sum();
                        (avg / channels.max(1) as i32 - 32768) as i16
                    })
                    .collect();
                let _ = frames.send(mono);
            },
            |err| log::error!("capture stream error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())
}

/// Fold platform error text into the user-facing denial reason.
pub(crate) fn classify_mic_error(technical: &str) -> String {
    let lower = technical.to_lowercase();

    if lower.contains("permission") || lower.contains("denied") {
        return "microphone permission denied".to_string();
    }
    if lower.contains("busy") || lower.contains("in use") {
        return "microphone is in use by another application".to_string();
    }
    if lower.contains("no such device")
        || lower.contains("not found")
        || lower.contains("disconnected")
        || lower.contains("no input device")
        || lower.contains("no default")
    {
        return "no microphone available".to_string();
    }

    technical.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_mic_error() {
        assert_eq!(
            classify_mic_error("Access denied by the OS"),
            "microphone permission denied"
        );
        assert_eq!(
            classify_mic_error("device busy"),
            "microphone is in use by another application"
        );
        assert_eq!(
            classify_mic_error("no input device available"),
            "no microphone available"
        );
        assert_eq!(classify_mic_error("weird failure"), "weird failure");
    }
}
