//! Frequency-domain analysis of the live capture feed.
//!
//! Stands in for a platform analyser node: keeps a sliding window over the
//! incoming PCM samples and serves smoothed byte frequency bins on demand.
//! The meter polls this once per frame tick; the recorder feeds it from the
//! capture thread.

use std::f32::consts::PI;
use std::sync::Mutex;

use anyhow::{bail, Result};

/// Read side of the analyser, as seen by the level meter.
pub trait Analyser: Send + Sync {
    /// Copy the current frequency snapshot into `bins`, one byte per bin.
    fn byte_frequency_data(&self, bins: &mut [u8]);

    /// Number of frequency bins (half the analysis window).
    fn bin_count(&self) -> usize;
}

/// Windowed FFT analyser over the raw sample feed.
pub struct SpectrumAnalyser {
    window_size: usize,
    smoothing: f32,
    state: Mutex<AnalyserState>,
}

struct AnalyserState {
    /// Ring of the most recent `window_size` samples, normalized to [-1, 1].
    ring: Vec<f32>,
    cursor: usize,
    /// Per-bin magnitudes carried across frames for time smoothing.
    smoothed: Vec<f32>,
}

impl SpectrumAnalyser {
    /// Build an analyser with the given window size and smoothing constant.
    ///
    /// The window must be a power of two; smoothing blends the previous
    /// frame's bins into the current one (0 = none).
    pub fn new(window_size: usize, smoothing: f32) -> Result<Self> {
        if !window_size.is_power_of_two() || !(32..=32768).contains(&window_size) {
            bail!(
                "analyser window must be a power of two in 32..=32768, got {}",
                window_size
            );
        }
        if !(0.0..1.0).contains(&smoothing) {
            bail!("analyser smoothing must be in [0, 1), got {}", smoothing);
        }

        Ok(Self {
            window_size,
            smoothing,
            state: Mutex::new(AnalyserState {
                ring: vec![0.0; window_size],
                cursor: 0,
                smoothed: vec![0.0; window_size / 2],
            }),
        })
    }

    /// Feed freshly captured samples into the sliding window.
    pub fn push_samples(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let n = self.window_size;
        for &sample in samples {
            let cursor = state.cursor;
            state.ring[cursor] = sample as f32 / i16::MAX as f32;
            state.cursor = (cursor + 1) % n;
        }
    }
}

impl Analyser for SpectrumAnalyser {
    fn byte_frequency_data(&self, bins: &mut [u8]) {
        let mut state = self.state.lock().unwrap();
        let n = self.window_size;

        // Unroll the ring into time order for the transform.
        let mut re = vec![0.0f32; n];
        let mut im = vec![0.0f32; n];
        for (i, value) in re.iter_mut().enumerate() {
            *value = state.ring[(state.cursor + i) % n];
        }

        fft_in_place(&mut re, &mut im);

        let scale = 2.0 / n as f32;
        let tau = self.smoothing;
        let count = bins.len().min(n / 2);
        for k in 0..n / 2 {
            let magnitude = (re[k] * re[k] + im[k] * im[k]).sqrt() * scale;
            let smoothed = tau * state.smoothed[k] + (1.0 - tau) * magnitude;
            state.smoothed[k] = smoothed;
            if k < count {
                bins[k] = (smoothed.min(1.0) * 255.0).round() as u8;
            }
        }
        for bin in bins.iter_mut().skip(count) {
            *bin = 0;
        }
    }

    fn bin_count(&self) -> usize {
        self.window_size / 2
    }
}

/// In-place radix-2 FFT over `re`/`im`, which must share a power-of-2 length.
fn fft_in_place(re: &mut [f32], im: &mut [f32]) {
    let n = re.len();
    debug_assert_eq!(n, im.len());
    debug_assert!(n.is_power_of_two());
    if n <= 1 {
        return;
    }

    // Reorder into bit-reversed index order.
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = ((i as u32).reverse_bits() >> (32 - bits)) as usize;
        if j > i {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * PI / len as f32;
        let (step_re, step_im) = (angle.cos(), angle.sin());
        for base in (0..n).step_by(len) {
            let (mut w_re, mut w_im) = (1.0f32, 0.0f32);
            for off in 0..len / 2 {
                let a = base + off;
                let b = a + len / 2;
                let t_re = w_re * re[b] - w_im * im[b];
                let t_im = w_re * im[b] + w_im * re[b];
                re[b] = re[a] - t_re;
                im[b] = im[a] - t_im;
                re[a] += t_re;
                im[a] += t_im;
                let next_re = w_re * step_re - w_im * step_im;
                w_im = w_re * step_im + w_im * step_re;
                w_re = next_re;
            }
        }
        len <<= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_impulse_is_flat() {
        let mut re = vec![0.0f32; 32];
        let mut im = vec![0.0f32; 32];
        re[0] = 1.0;

        fft_in_place(&mut re, &mut im);

        for &v in &re {
            assert!((v - 1.0).abs() < 1e-4);
        }
        for &v in &im {
            assert!(v.abs() < 1e-4);
        }
    }

    #[test]
    fn test_rejects_bad_window() {
        assert!(SpectrumAnalyser::new(500, 0.3).is_err());
        assert!(SpectrumAnalyser::new(8, 0.3).is_err());
        assert!(SpectrumAnalyser::new(512, 1.5).is_err());
        assert!(SpectrumAnalyser::new(512, 0.3).is_ok());
    }

    #[test]
    fn test_silence_is_all_zero_bins() {
        let analyser = SpectrumAnalyser::new(512, 0.3).unwrap();
        analyser.push_samples(&[0i16; 512]);

        let mut bins = vec![0u8; analyser.bin_count()];
        analyser.byte_frequency_data(&mut bins);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sine_energy_lands_in_its_bin() {
        let analyser = SpectrumAnalyser::new(512, 0.0).unwrap();
        let tone: Vec<i16> = (0..512)
            .map(|i| {
                let phase = 2.0 * PI * 16.0 * i as f32 / 512.0;
                (phase.sin() * 0.9 * i16::MAX as f32) as i16
            })
            .collect();
        analyser.push_samples(&tone);

        let mut bins = vec![0u8; analyser.bin_count()];
        analyser.byte_frequency_data(&mut bins);

        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|&(_, &b)| b)
            .map(|(k, _)| k)
            .unwrap();
        assert_eq!(peak, 16);
        assert!(bins[16] > 200);
    }

    #[test]
    fn test_smoothing_decays_after_silence() {
        let analyser = SpectrumAnalyser::new(64, 0.3).unwrap();
        analyser.push_samples(&[i16::MAX / 2; 64]);

        let mut loud = vec![0u8; analyser.bin_count()];
        analyser.byte_frequency_data(&mut loud);

        analyser.push_samples(&[0i16; 64]);
        let mut quiet = vec![0u8; analyser.bin_count()];
        analyser.byte_frequency_data(&mut quiet);

        assert!(quiet[0] < loud[0]);
        assert!(quiet[0] > 0, "one smoothing step keeps some energy");
    }
}
