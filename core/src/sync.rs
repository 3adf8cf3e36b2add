//! Start/end marker tones and their Goertzel detector.
//!
//! A 200 ms 17 kHz tone optionally precedes the preamble so passive
//! listeners can arm detection cheaply; a 150 ms 17.5 kHz tone closes every
//! frame. Both carry 10 ms raised-cosine fades. The receiver measures tone
//! presence with a Goertzel filter over 10 ms windows.

use std::f32::consts::PI;

pub const START_TONE_HZ: f32 = 17_000.0;
pub const END_TONE_HZ: f32 = 17_500.0;
pub const START_TONE_MS: usize = 200;
pub const END_TONE_MS: usize = 150;
pub const TONE_FADE_MS: usize = 10;

/// Fraction of window energy the target bin must hold.
pub const TONE_DETECT_THRESHOLD: f32 = 0.5;
/// Mean-square floor below which a window counts as silence.
pub const TONE_MIN_POWER: f32 = 1e-6;

/// A windowed sinusoid marker tone.
pub fn marker_tone(freq_hz: f32, duration_ms: usize, sample_rate: usize) -> Vec<f32> {
    let total = sample_rate * duration_ms / 1000;
    let fade = sample_rate * TONE_FADE_MS / 1000;
    (0..total)
        .map(|i| {
            let mut amp = (2.0 * PI * freq_hz * i as f32 / sample_rate as f32).sin();
            if i < fade {
                amp *= 0.5 * (1.0 - (PI * i as f32 / fade as f32).cos());
            } else if i >= total - fade {
                let j = total - 1 - i;
                amp *= 0.5 * (1.0 - (PI * j as f32 / fade as f32).cos());
            }
            amp
        })
        .collect()
}

/// Goertzel power detector for one frequency.
pub struct ToneDetector {
    coeff: f32,
    window: usize,
}

impl ToneDetector {
    pub fn new(freq_hz: f32, sample_rate: usize) -> Self {
        let window = sample_rate / 100;
        let omega = 2.0 * PI * freq_hz / sample_rate as f32;
        Self {
            coeff: 2.0 * omega.cos(),
            window,
        }
    }

    /// Window length in samples (10 ms).
    pub fn window(&self) -> usize {
        self.window
    }

    /// Tone power normalized to the window energy, roughly 1.0 for a pure
    /// tone at the target frequency and near 0 for anything else.
    pub fn power(&self, window: &[f32]) -> f32 {
        let mut s1 = 0.0f32;
        let mut s2 = 0.0f32;
        for &x in window {
            let s0 = x + self.coeff * s1 - s2;
            s2 = s1;
            s1 = s0;
        }
        let bin = s1 * s1 + s2 * s2 - self.coeff * s1 * s2;
        let energy: f32 = window.iter().map(|x| x * x).sum();
        if energy <= f32::EPSILON {
            return 0.0;
        }
        // A pure tone at the target frequency concentrates its whole energy
        // in the bin: bin ~= (A*n/2)^2 against energy ~= A^2*n/2.
        bin / (energy * window.len() as f32 / 2.0)
    }

    pub fn detect(&self, window: &[f32]) -> bool {
        let energy: f32 = window.iter().map(|x| x * x).sum();
        if energy / window.len() as f32 <= TONE_MIN_POWER {
            return false;
        }
        self.power(window) >= TONE_DETECT_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: usize = 48_000;

    #[test]
    fn tone_lengths() {
        assert_eq!(marker_tone(START_TONE_HZ, START_TONE_MS, RATE).len(), 9_600);
        assert_eq!(marker_tone(END_TONE_HZ, END_TONE_MS, RATE).len(), 7_200);
    }

    #[test]
    fn fades_start_and_end_quiet() {
        let tone = marker_tone(START_TONE_HZ, START_TONE_MS, RATE);
        assert!(tone[0].abs() < 1e-3);
        assert!(tone[tone.len() - 1].abs() < 1e-2);
        // Mid-tone runs at full scale.
        let mid = tone.len() / 2;
        let peak = tone[mid..mid + 16].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.9);
    }

    #[test]
    fn detector_hears_its_own_tone() {
        let det = ToneDetector::new(END_TONE_HZ, RATE);
        let tone = marker_tone(END_TONE_HZ, END_TONE_MS, RATE);
        let mid = tone.len() / 2;
        assert!(det.detect(&tone[mid..mid + det.window()]));
    }

    #[test]
    fn detector_rejects_other_signals() {
        let det = ToneDetector::new(END_TONE_HZ, RATE);

        let other = marker_tone(START_TONE_HZ, START_TONE_MS, RATE);
        let mid = other.len() / 2;
        assert!(!det.detect(&other[mid..mid + det.window()]));

        let silence = vec![0.0f32; det.window()];
        assert!(!det.detect(&silence));

        // Deterministic wideband noise.
        let mut state = 0x1234_5678u32;
        let noise: Vec<f32> = (0..det.window())
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 16) as f32 / 32_768.0 - 1.0
            })
            .collect();
        assert!(!det.detect(&noise));
    }
}
