//! Subcarrier layout and the PRN-derived preamble/pilot tables.
//!
//! The bin assignment is a pure function of `(sample_rate, fft_size, band,
//! pilot_spacing)`: a contiguous run of bins strictly inside the band, with
//! one pilot bin after every `pilot_spacing` data bins. Preamble symbols and
//! pilot values are derived from a fixed 32-bit seed through the LCG
//! `x <- 1664525 * x + 1013904223 (mod 2^32)` so both ends compute
//! identical tables.

use rustfft::num_complex::Complex;
use std::f32::consts::FRAC_1_SQRT_2;

use crate::error::{Result, SonicLinkError};
use crate::Config;

/// Seed shared by sender and receiver.
pub const TABLE_SEED: u32 = 0x0FFD_AA55;

#[derive(Debug, Clone)]
pub struct SubcarrierLayout {
    pub fft_size: usize,
    pub cp_len: usize,
    /// All used bins, ascending, data and pilots interleaved.
    pub bins: Vec<usize>,
    /// Absolute FFT bin indices of the data subcarriers, ascending.
    pub data_bins: Vec<usize>,
    pub pilot_bins: Vec<usize>,
    /// Positions of the data bins within `bins`.
    pub data_pos: Vec<usize>,
    pub pilot_pos: Vec<usize>,
    pub bytes_per_symbol: usize,
}

impl SubcarrierLayout {
    pub fn new(cfg: &Config) -> Result<Self> {
        let n = cfg.fft_size;
        if n < 16 || !n.is_power_of_two() {
            return Err(SonicLinkError::InvalidConfig(format!(
                "fft_size {n} must be a power of two of at least 16"
            )));
        }
        if !(cfg.cp_ratio > 0.0 && cfg.cp_ratio < 1.0) {
            return Err(SonicLinkError::InvalidConfig(format!(
                "cp_ratio {} outside (0, 1)",
                cfg.cp_ratio
            )));
        }
        let cp_len = (n as f64 * cfg.cp_ratio) as usize;
        if cp_len == 0 {
            return Err(SonicLinkError::InvalidConfig(
                "cyclic prefix rounds to zero samples".to_string(),
            ));
        }
        let nyquist = cfg.sample_rate as f64 / 2.0;
        if cfg.band_low <= 0.0 || cfg.band_high <= cfg.band_low || cfg.band_high >= nyquist {
            return Err(SonicLinkError::InvalidConfig(format!(
                "band [{}, {}] must sit inside (0, {nyquist})",
                cfg.band_low, cfg.band_high
            )));
        }
        if cfg.pilot_spacing == 0 {
            return Err(SonicLinkError::InvalidConfig(
                "pilot_spacing must be at least 1".to_string(),
            ));
        }

        let bin_hz = cfg.sample_rate as f64 / n as f64;
        let k_lo = (cfg.band_low / bin_hz).floor() as usize + 1;
        let k_hi = (cfg.band_high / bin_hz).ceil() as usize - 1;
        if k_hi < k_lo {
            return Err(SonicLinkError::InvalidConfig(
                "band narrower than one subcarrier".to_string(),
            ));
        }
        let available = k_hi - k_lo + 1;

        // Largest K with K*6 divisible by 8 whose data+pilot run fits.
        let spacing = cfg.pilot_spacing;
        let mut data_count = available / 4 * 4;
        while data_count > 0 && data_count + data_count / spacing > available {
            data_count -= 4;
        }
        if data_count == 0 {
            return Err(SonicLinkError::InvalidConfig(format!(
                "band fits no data subcarriers ({available} usable bins)"
            )));
        }

        let total = data_count + data_count / spacing;
        let mut bins = Vec::with_capacity(total);
        let mut data_bins = Vec::with_capacity(data_count);
        let mut pilot_bins = Vec::new();
        let mut data_pos = Vec::with_capacity(data_count);
        let mut pilot_pos = Vec::new();
        for j in 0..total {
            let bin = k_lo + j;
            bins.push(bin);
            if (j + 1) % (spacing + 1) == 0 {
                pilot_bins.push(bin);
                pilot_pos.push(j);
            } else {
                data_bins.push(bin);
                data_pos.push(j);
            }
        }
        debug_assert_eq!(data_bins.len(), data_count);

        Ok(Self {
            fft_size: n,
            cp_len,
            bins,
            data_bins,
            pilot_bins,
            data_pos,
            pilot_pos,
            bytes_per_symbol: data_count * 6 / 8,
        })
    }

    pub fn symbol_len(&self) -> usize {
        self.fft_size + self.cp_len
    }

    pub fn data_count(&self) -> usize {
        self.data_bins.len()
    }
}

struct Lcg(u32);

impl Lcg {
    fn new(seed: u32) -> Self {
        Self(seed)
    }

    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.0
    }

    /// QPSK point from the two high bits of a draw.
    fn qpsk(&mut self) -> Complex<f32> {
        match self.next() >> 30 {
            0 => Complex::new(FRAC_1_SQRT_2, FRAC_1_SQRT_2),
            1 => Complex::new(-FRAC_1_SQRT_2, FRAC_1_SQRT_2),
            2 => Complex::new(-FRAC_1_SQRT_2, -FRAC_1_SQRT_2),
            _ => Complex::new(FRAC_1_SQRT_2, -FRAC_1_SQRT_2),
        }
    }
}

/// Frequency-domain preamble symbols and the constant pilot values.
pub struct PreambleTables {
    /// Schmidl-Cox symbol spectrum: PRN on even used bins only, so the
    /// time-domain halves repeat.
    pub sc_spectrum: Vec<Complex<f32>>,
    /// Training symbol spectrum: PRN on every used bin.
    pub train_spectrum: Vec<Complex<f32>>,
    /// Training values aligned with `layout.bins`.
    pub train_values: Vec<Complex<f32>>,
    /// BPSK pilot values (+-1/sqrt(2)) aligned with `layout.pilot_bins`.
    pub pilot_values: Vec<f32>,
}

impl PreambleTables {
    pub fn new(layout: &SubcarrierLayout, seed: u32) -> Self {
        let mut lcg = Lcg::new(seed);
        let zero = Complex::new(0.0f32, 0.0);

        let mut sc_spectrum = vec![zero; layout.fft_size];
        for &bin in &layout.bins {
            if bin % 2 == 0 {
                sc_spectrum[bin] = lcg.qpsk();
            }
        }

        let mut train_spectrum = vec![zero; layout.fft_size];
        let mut train_values = Vec::with_capacity(layout.bins.len());
        for &bin in &layout.bins {
            let v = lcg.qpsk();
            train_spectrum[bin] = v;
            train_values.push(v);
        }

        let pilot_values = layout
            .pilot_bins
            .iter()
            .map(|_| {
                if lcg.next() >> 31 == 1 {
                    -FRAC_1_SQRT_2
                } else {
                    FRAC_1_SQRT_2
                }
            })
            .collect();

        Self {
            sc_spectrum,
            train_spectrum,
            train_values,
            pilot_values,
        }
    }
}
