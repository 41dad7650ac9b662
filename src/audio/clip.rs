//! Clip assembly.
//!
//! One immutable clip per finished capture session, built by concatenating
//! the recorded chunks in arrival order. Consuming the recording makes a
//! second assembly of the same session impossible.

use std::path::Path;

use anyhow::{Context, Result};

use crate::audio::capture::RecordedAudio;

/// The finished, immutable recording ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clip {
    bytes: Vec<u8>,
    media_type: String,
    sample_rate: u32,
}

impl Clip {
    /// Assemble the one clip for a finished session.
    ///
    /// Zero recorded chunks produce a valid but empty clip; submission
    /// rejects those before anything goes on the wire.
    pub fn assemble(recording: RecordedAudio) -> Self {
        let total = recording.chunks.iter().map(Vec::len).sum();
        let mut bytes = Vec::with_capacity(total);
        for chunk in &recording.chunks {
            bytes.extend_from_slice(chunk);
        }
        log::debug!(
            "assembled clip: {} bytes from {} chunks",
            bytes.len(),
            recording.chunks.len()
        );
        Self {
            bytes,
            media_type: recording.media_type,
            sample_rate: recording.sample_rate,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.bytes.len() as u64 / 2) * 1000 / self.sample_rate as u64
    }

    /// Write the clip to disk as a mono 16-bit WAV, for listening back.
    pub fn save_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("failed to create {}", path.display()))?;
        for sample in self.bytes.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .context("failed to write sample")?;
        }
        writer.finalize().context("failed to finalize wav")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(chunks: Vec<Vec<u8>>) -> RecordedAudio {
        RecordedAudio {
            chunks,
            media_type: "audio/L16;rate=16000;channels=1".to_string(),
            sample_rate: 16_000,
        }
    }

    #[test]
    fn test_clip_is_byte_concatenation_in_order() {
        let c1 = vec![1u8, 2, 3];
        let c2 = vec![4u8];
        let c3 = vec![5u8, 6];
        let clip = Clip::assemble(recording(vec![c1.clone(), c2.clone(), c3.clone()]));

        let mut expected = c1;
        expected.extend(c2);
        expected.extend(c3);
        assert_eq!(clip.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_empty_recording_yields_valid_empty_clip() {
        let clip = Clip::assemble(recording(Vec::new()));
        assert!(clip.is_empty());
        assert_eq!(clip.len(), 0);
        assert_eq!(clip.duration_ms(), 0);
        assert_eq!(clip.media_type(), "audio/L16;rate=16000;channels=1");
    }

    #[test]
    fn test_duration_from_sample_count() {
        // 16000 samples of 2 bytes = exactly one second
        let clip = Clip::assemble(recording(vec![vec![0u8; 32_000]]));
        assert_eq!(clip.duration_ms(), 1000);
    }
}
