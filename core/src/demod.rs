//! OFDM demodulation: preamble search, symbol timing, carrier offset,
//! channel estimation, and per-symbol equalization.
//!
//! Stages over a rolling sample buffer:
//! 1. coarse detection with the Schmidl-Cox metric
//!    `P(d) = |sum r[d+k] conj(r[d+k+N/2])| / sum |r[d+k+N/2]|^2`,
//! 2. fine timing by cross-correlation against the known training symbol,
//! 3. fractional carrier offset from the lag-N/2 autocorrelation angle,
//! 4. per-bin channel gains from the training symbol,
//! 5. per-symbol FFT, equalization, and pilot phase tracking.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::{FRAC_PI_4, PI};
use std::sync::Arc;

use crate::error::{Result, SonicLinkError};
use crate::layout::{PreambleTables, SubcarrierLayout};
use crate::qam;

/// Schmidl-Cox plateau threshold.
pub const SC_THRESHOLD: f32 = 0.75;

/// Timing metric at offset `d`; needs `d + fft_size` samples.
pub fn schmidl_cox_metric(samples: &[f32], d: usize, fft_size: usize) -> f32 {
    let half = fft_size / 2;
    let mut corr = 0.0f64;
    let mut energy = 0.0f64;
    for k in 0..half {
        corr += samples[d + k] as f64 * samples[d + k + half] as f64;
        energy += samples[d + k + half] as f64 * samples[d + k + half] as f64;
    }
    if energy <= f64::EPSILON {
        0.0
    } else {
        (corr.abs() / energy) as f32
    }
}

/// Scan for a Schmidl-Cox plateau rising edge from `from`.
///
/// Returns the first offset whose metric stays above [`SC_THRESHOLD`] for at
/// least N/4 consecutive positions. Incremental sliding sums keep the scan
/// linear; they are recomputed periodically against float drift.
pub fn find_preamble(samples: &[f32], from: usize, fft_size: usize) -> Option<(usize, f32)> {
    let half = fft_size / 2;
    let persist = fft_size / 4;
    if samples.len() < from + fft_size + 1 {
        return None;
    }

    let mut corr = 0.0f64;
    let mut energy = 0.0f64;
    for k in 0..half {
        corr += samples[from + k] as f64 * samples[from + k + half] as f64;
        energy += samples[from + k + half] as f64 * samples[from + k + half] as f64;
    }

    let mut run_start: Option<usize> = None;
    let mut run_metric = 0.0f32;
    let last = samples.len() - fft_size - 1;
    for d in from..=last {
        let metric = if energy <= f64::EPSILON {
            0.0
        } else {
            (corr.abs() / energy) as f32
        };
        if metric >= SC_THRESHOLD {
            let start = *run_start.get_or_insert(d);
            run_metric = run_metric.max(metric);
            if d + 1 - start >= persist {
                return Some((start, run_metric));
            }
        } else {
            run_start = None;
            run_metric = 0.0;
        }

        if (d - from) % 4096 == 4095 {
            corr = 0.0;
            energy = 0.0;
            for k in 0..half {
                corr += samples[d + 1 + k] as f64 * samples[d + 1 + k + half] as f64;
                energy +=
                    samples[d + 1 + k + half] as f64 * samples[d + 1 + k + half] as f64;
            }
        } else {
            corr -= samples[d] as f64 * samples[d + half] as f64;
            corr += samples[d + half] as f64 * samples[d + fft_size] as f64;
            energy -= samples[d + half] as f64 * samples[d + half] as f64;
            energy += samples[d + fft_size] as f64 * samples[d + fft_size] as f64;
        }
    }
    None
}

/// Fractional carrier offset in subcarrier spacings from the lag-N/2
/// autocorrelation angle. The microphone feed is real-valued, so the
/// correlation is real and a genuine plateau collapses the angle to zero;
/// the derotation plumbing still applies it generally.
pub fn carrier_offset(samples: &[f32], d: usize, fft_size: usize) -> f32 {
    let half = fft_size / 2;
    let mut corr = 0.0f64;
    for k in 0..half {
        corr += samples[d + k] as f64 * samples[d + k + half] as f64;
    }
    (0.0f64.atan2(corr) / std::f64::consts::PI) as f32
}

/// Argmax of the normalized cross-correlation of `template` over offsets
/// `lo..=hi`. Offsets are absolute indices into `samples`.
pub fn cross_correlate(samples: &[f32], template: &[f32], lo: usize, hi: usize) -> usize {
    let template_energy: f64 = template.iter().map(|&t| (t as f64) * t as f64).sum();
    let mut best_pos = lo;
    let mut best_corr = f64::MIN;
    for d in lo..=hi {
        let window = &samples[d..d + template.len()];
        let mut corr = 0.0f64;
        let mut window_energy = 0.0f64;
        for (&s, &t) in window.iter().zip(template) {
            corr += s as f64 * t as f64;
            window_energy += s as f64 * s as f64;
        }
        let denom = (window_energy * template_energy).sqrt();
        let normalized = if denom > 1e-12 { corr / denom } else { 0.0 };
        if normalized > best_corr {
            best_corr = normalized;
            best_pos = d;
        }
    }
    best_pos
}

pub struct OfdmDemodulator {
    fft: Arc<dyn Fft<f32>>,
    layout: SubcarrierLayout,
    tables: PreambleTables,
}

impl OfdmDemodulator {
    pub fn new(layout: SubcarrierLayout, tables: PreambleTables) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(layout.fft_size);
        Self {
            fft,
            layout,
            tables,
        }
    }

    pub fn layout(&self) -> &SubcarrierLayout {
        &self.layout
    }

    /// FFT of one CP-stripped symbol, derotated by the cumulative carrier
    /// offset phase. `origin` is the symbol's absolute sample index, used as
    /// the phase-ramp reference.
    fn spectrum(&self, symbol: &[f32], cfo: f32, origin: usize) -> Vec<Complex<f32>> {
        let n = self.layout.fft_size;
        let cp = self.layout.cp_len;
        debug_assert!(symbol.len() >= cp + n);
        let mut buf: Vec<Complex<f32>> = (0..n)
            .map(|i| {
                let sample = symbol[cp + i];
                if cfo == 0.0 {
                    Complex::new(sample, 0.0)
                } else {
                    let phase = -2.0 * PI * cfo * ((origin + cp + i) as f32) / n as f32;
                    Complex::new(sample * phase.cos(), sample * phase.sin())
                }
            })
            .collect();
        self.fft.process(&mut buf);
        buf
    }

    /// Per-bin complex gains from the training symbol, aligned with
    /// `layout.bins`. Null bins stay null.
    pub fn estimate_channel(&self, training: &[f32], cfo: f32, origin: usize) -> Vec<Complex<f32>> {
        let spec = self.spectrum(training, cfo, origin);
        self.layout
            .bins
            .iter()
            .zip(&self.tables.train_values)
            .map(|(&bin, &known)| spec[bin] / known)
            .collect()
    }

    /// Decode one data symbol against channel `h` (aligned with
    /// `layout.bins`). Returns the demapped 6-bit labels and the residual
    /// pilot phase that was removed.
    pub fn demod_symbol(
        &self,
        symbol: &[f32],
        h: &[Complex<f32>],
        cfo: f32,
        origin: usize,
    ) -> Result<(Vec<u8>, f32)> {
        let spec = self.spectrum(symbol, cfo, origin);

        // Least-squares common phase across the pilots, energy weighted.
        let mut acc = Complex::new(0.0f32, 0.0);
        for (&pos, &pilot) in self.layout.pilot_pos.iter().zip(&self.tables.pilot_values) {
            let bin = self.layout.bins[pos];
            let expected = h[pos] * pilot;
            acc += spec[bin] * expected.conj();
        }
        let residual = acc.arg();
        if residual.abs() > FRAC_PI_4 {
            return Err(SonicLinkError::SyncLost);
        }
        let rotation = Complex::from_polar(1.0, -residual);

        let labels = self
            .layout
            .data_pos
            .iter()
            .map(|&pos| {
                let bin = self.layout.bins[pos];
                let gain = h[pos];
                let z = if gain.norm_sqr() > 1e-12 {
                    spec[bin] / gain * rotation
                } else {
                    Complex::new(0.0, 0.0)
                };
                qam::demap(z)
            })
            .collect();
        Ok((labels, residual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TABLE_SEED;
    use crate::ofdm::OfdmModulator;
    use crate::{qam, Config};

    fn pair() -> (OfdmModulator, OfdmDemodulator) {
        let layout = SubcarrierLayout::new(&Config::default()).unwrap();
        let tables = PreambleTables::new(&layout, TABLE_SEED);
        let demod = OfdmDemodulator::new(
            layout.clone(),
            PreambleTables::new(&layout, TABLE_SEED),
        );
        (OfdmModulator::new(layout, tables), demod)
    }

    #[test]
    fn clean_preamble_metric_exceeds_point_nine() {
        let (modulator, _) = pair();
        let (sc, train) = modulator.preamble();
        let mut samples = sc;
        samples.extend(train);
        // Anywhere on the repetition plateau the metric is essentially 1.
        let metric = schmidl_cox_metric(&samples, 32, 256);
        assert!(metric > 0.9, "metric = {metric}");
    }

    #[test]
    fn find_preamble_locates_rising_edge() {
        let (modulator, _) = pair();
        let (sc, train) = modulator.preamble();
        let mut samples = vec![0.0f32; 1000];
        samples.extend(&sc);
        samples.extend(&train);
        samples.extend(vec![0.0f32; 600]);

        let (edge, metric) = find_preamble(&samples, 0, 256).expect("preamble");
        assert!(metric > 0.9);
        // The plateau spans the whole 320-sample symbol; the rising edge
        // lands just before its start as the window slides in.
        assert!(edge + 64 >= 1000 && edge <= 1010, "edge = {edge}");
    }

    #[test]
    fn find_preamble_ignores_noise() {
        let mut state = 0xDEAD_BEEFu32;
        let noise: Vec<f32> = (0..8000)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                ((state >> 16) as f32 / 32_768.0 - 1.0) * 0.3
            })
            .collect();
        assert!(find_preamble(&noise, 0, 256).is_none());
    }

    #[test]
    fn fine_timing_is_exact_on_clean_signal() {
        let (modulator, _) = pair();
        let (sc, train) = modulator.preamble();
        let mut samples = vec![0.0f32; 777];
        samples.extend(&sc);
        let expected = samples.len();
        samples.extend(&train);
        samples.extend(vec![0.0f32; 400]);

        let found = cross_correlate(&samples, &train, expected - 64, expected + 64);
        assert_eq!(found, expected);
    }

    #[test]
    fn symbol_roundtrip_through_channel_estimate() {
        let (modulator, demod) = pair();
        let (_, train) = modulator.preamble();
        let h = demod.estimate_channel(&train, 0.0, 0);

        let labels_in: Vec<u8> = (0..demod.layout().data_count())
            .map(|i| (i * 11 % 64) as u8)
            .collect();
        let points: Vec<_> = labels_in.iter().map(|&l| qam::map(l)).collect();
        let symbol = modulator.modulate_symbol(&points);

        let (labels_out, residual) = demod.demod_symbol(&symbol, &h, 0.0, 0).unwrap();
        assert_eq!(labels_out, labels_in);
        assert!(residual.abs() < 1e-3);
    }

    #[test]
    fn attenuated_symbol_still_demaps() {
        let (modulator, demod) = pair();
        let (_, train) = modulator.preamble();
        // A flat 0.2x channel, applied to training and data alike.
        let faded_train: Vec<f32> = train.iter().map(|s| s * 0.2).collect();
        let h = demod.estimate_channel(&faded_train, 0.0, 0);

        let labels_in: Vec<u8> = (0..demod.layout().data_count())
            .map(|i| (i * 23 % 64) as u8)
            .collect();
        let points: Vec<_> = labels_in.iter().map(|&l| qam::map(l)).collect();
        let symbol: Vec<f32> = modulator
            .modulate_symbol(&points)
            .iter()
            .map(|s| s * 0.2)
            .collect();

        let (labels_out, _) = demod.demod_symbol(&symbol, &h, 0.0, 0).unwrap();
        assert_eq!(labels_out, labels_in);
    }

    #[test]
    fn carrier_offset_is_zero_on_plateau() {
        let (modulator, _) = pair();
        let (sc, _) = modulator.preamble();
        assert_eq!(carrier_offset(&sc, 32, 256), 0.0);
    }
}
