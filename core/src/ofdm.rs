//! OFDM symbol synthesis.
//!
//! Data constellation points land on the data bins in ascending frequency
//! order, pilots carry their constant BPSK values, every other bin stays
//! null. The inverse FFT output is scaled by 1/sqrt(K) for roughly unit RMS,
//! the real part is taken, and the last L samples are prepended as the
//! cyclic prefix.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::layout::{PreambleTables, SubcarrierLayout};

pub struct OfdmModulator {
    ifft: Arc<dyn Fft<f32>>,
    layout: SubcarrierLayout,
    tables: PreambleTables,
    scale: f32,
}

impl OfdmModulator {
    pub fn new(layout: SubcarrierLayout, tables: PreambleTables) -> Self {
        let mut planner = FftPlanner::new();
        let ifft = planner.plan_fft_inverse(layout.fft_size);
        let scale = 1.0 / (layout.data_count() as f32).sqrt();
        Self {
            ifft,
            layout,
            tables,
            scale,
        }
    }

    pub fn layout(&self) -> &SubcarrierLayout {
        &self.layout
    }

    pub fn tables(&self) -> &PreambleTables {
        &self.tables
    }

    /// Modulate one symbol's worth of constellation points into CP + N samples.
    pub fn modulate_symbol(&self, points: &[Complex<f32>]) -> Vec<f32> {
        debug_assert_eq!(points.len(), self.layout.data_count());
        let mut spectrum = vec![Complex::new(0.0f32, 0.0); self.layout.fft_size];
        for (&bin, &point) in self.layout.data_bins.iter().zip(points) {
            spectrum[bin] = point;
        }
        for (&bin, &pilot) in self.layout.pilot_bins.iter().zip(&self.tables.pilot_values) {
            spectrum[bin] = Complex::new(pilot, 0.0);
        }
        self.synthesize(spectrum)
    }

    /// The two preamble symbols: Schmidl-Cox then training.
    pub fn preamble(&self) -> (Vec<f32>, Vec<f32>) {
        let sc = self.synthesize(self.tables.sc_spectrum.clone());
        let train = self.synthesize(self.tables.train_spectrum.clone());
        (sc, train)
    }

    fn synthesize(&self, mut spectrum: Vec<Complex<f32>>) -> Vec<f32> {
        self.ifft.process(&mut spectrum);
        let n = self.layout.fft_size;
        let cp = self.layout.cp_len;
        let mut out = Vec::with_capacity(cp + n);
        for value in &spectrum[n - cp..] {
            out.push(value.re * self.scale);
        }
        for value in &spectrum[..n] {
            out.push(value.re * self.scale);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TABLE_SEED;
    use crate::{qam, Config};

    fn modulator() -> OfdmModulator {
        let layout = SubcarrierLayout::new(&Config::default()).unwrap();
        let tables = PreambleTables::new(&layout, TABLE_SEED);
        OfdmModulator::new(layout, tables)
    }

    #[test]
    fn symbol_has_cp_plus_fft_samples() {
        let m = modulator();
        let points: Vec<_> = (0..m.layout().data_count())
            .map(|i| qam::map((i % 64) as u8))
            .collect();
        let samples = m.modulate_symbol(&points);
        assert_eq!(samples.len(), 320);
    }

    #[test]
    fn cyclic_prefix_copies_symbol_tail() {
        let m = modulator();
        let points: Vec<_> = (0..m.layout().data_count())
            .map(|i| qam::map((i * 7 % 64) as u8))
            .collect();
        let samples = m.modulate_symbol(&points);
        let cp = m.layout().cp_len;
        let n = m.layout().fft_size;
        for i in 0..cp {
            let tail = samples[cp + n - cp + i];
            assert!(
                (samples[i] - tail).abs() < 1e-6,
                "CP mismatch at sample {i}"
            );
        }
    }

    #[test]
    fn schmidl_cox_symbol_halves_repeat() {
        let m = modulator();
        let (sc, _) = m.preamble();
        let cp = m.layout().cp_len;
        let n = m.layout().fft_size;
        for i in 0..n / 2 {
            let a = sc[cp + i];
            let b = sc[cp + n / 2 + i];
            assert!((a - b).abs() < 1e-5, "halves differ at {i}: {a} vs {b}");
        }
    }

    #[test]
    fn rms_is_near_unity() {
        let m = modulator();
        let points: Vec<_> = (0..m.layout().data_count())
            .map(|i| qam::map((i * 13 % 64) as u8))
            .collect();
        let samples = m.modulate_symbol(&points);
        let rms =
            (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        assert!(rms > 0.2 && rms < 1.5, "rms = {rms}");
    }
}
