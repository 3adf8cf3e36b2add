//! Channel impairment behavior: additive noise, byte corruption, and
//! synchronization robustness.

use soniclink_core::fec::RsCodec;
use soniclink_core::framing::{self, Frame, PREFIX_LEN};
use soniclink_core::{demod, Config, Decoder, Encoder, SliceSource, SonicLinkError};

fn wideband() -> Config {
    Config {
        band_high: 24_800.0,
        ..Config::default()
    }
}

/// Deterministic Gaussian noise, Box-Muller over an LCG.
struct NoiseGen {
    state: u32,
}

impl NoiseGen {
    fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    fn uniform(&mut self) -> f64 {
        self.state = self
            .state
            .wrapping_mul(1_664_525)
            .wrapping_add(1_013_904_223);
        (self.state >> 8) as f64 / (1u64 << 24) as f64
    }

    fn gaussian(&mut self) -> f32 {
        let u1 = self.uniform().max(1e-12);
        let u2 = self.uniform();
        ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
    }
}

fn add_awgn(waveform: &[f32], snr_db: f64, seed: u32) -> Vec<f32> {
    let power =
        waveform.iter().map(|&s| s as f64 * s as f64).sum::<f64>() / waveform.len() as f64;
    let sigma = (power / 10f64.powf(snr_db / 10.0)).sqrt() as f32;
    let mut noise = NoiseGen::new(seed);
    waveform.iter().map(|&s| s + sigma * noise.gaussian()).collect()
}

#[test]
fn payload_survives_20db_awgn() {
    let cfg = wideband();
    let encoder = Encoder::new(cfg.clone()).unwrap();
    let decoder = Decoder::new(cfg).unwrap();
    let payload: Vec<u8> = (0..200).map(|i| ((i * 29 + 7) % 256) as u8).collect();
    let clean = encoder.encode_frame(&payload).unwrap();

    let trials = 100u32;
    let mut successes = 0;
    for trial in 0..trials {
        let noisy = add_awgn(&clean, 20.0, 0xACE1 + trial);
        let mut source = SliceSource::new(&noisy);
        if matches!(decoder.decode_stream(&mut source), Ok(decoded) if decoded == payload) {
            successes += 1;
        }
    }
    assert!(successes >= trials - 1, "{successes}/{trials} trials succeeded");
}

#[test]
fn ten_scattered_byte_flips_are_corrected() {
    // 500-byte payload spans three RS codewords; ten byte errors scattered
    // over the coded region stay inside every block's correction budget.
    let rs = RsCodec::new();
    let payload: Vec<u8> = (0..500).map(|i| ((i * 31 + 3) % 256) as u8).collect();
    let frame = Frame {
        flags: 0,
        body: payload.clone(),
        envelope: None,
    };
    let (stream, _) = framing::assemble(&frame, &rs, 24).unwrap();
    let region_len = 3 * 255;

    let mut noise = NoiseGen::new(0xBEEF);
    for round in 0..20u8 {
        let mut corrupted = stream.clone();
        let mut positions: Vec<usize> = Vec::new();
        while positions.len() < 10 {
            let pos = PREFIX_LEN
                + ((noise.uniform() * region_len as f64) as usize).min(region_len - 1);
            if !positions.contains(&pos) {
                positions.push(pos);
                corrupted[pos] ^= 1 + round.wrapping_mul(13);
            }
        }
        let parsed = framing::parse(&corrupted, &rs).unwrap();
        assert_eq!(parsed.body, payload, "round {round}");
    }
}

#[test]
fn twenty_contiguous_flips_in_one_block_are_uncorrectable() {
    let rs = RsCodec::new();
    let payload: Vec<u8> = (0..500).map(|i| ((i * 17 + 5) % 256) as u8).collect();
    let frame = Frame {
        flags: 0,
        body: payload,
        envelope: None,
    };
    let (stream, _) = framing::assemble(&frame, &rs, 24).unwrap();

    let mut corrupted = stream;
    // Entirely inside the second codeword.
    let start = PREFIX_LEN + 255 + 60;
    for b in &mut corrupted[start..start + 20] {
        *b ^= 0xFF;
    }
    assert!(matches!(
        framing::parse(&corrupted, &rs),
        Err(SonicLinkError::UncorrectableFec)
    ));
}

#[test]
fn clean_preamble_autocorrelation_peak_exceeds_point_nine() {
    let cfg = Config {
        start_tone: false,
        ..wideband()
    };
    let encoder = Encoder::new(cfg).unwrap();
    let waveform = encoder.encode_frame(b"peak check").unwrap();
    // The Schmidl-Cox plateau covers the first preamble symbol.
    let metric = demod::schmidl_cox_metric(&waveform, 32, 256);
    assert!(metric > 0.9, "metric = {metric}");
}

#[test]
fn preamble_found_after_leading_noise() {
    let cfg = Config {
        start_tone: false,
        idle_timeout_ms: 10_000,
        ..wideband()
    };
    let encoder = Encoder::new(cfg.clone()).unwrap();
    let decoder = Decoder::new(cfg).unwrap();
    let payload = b"after noise";
    let waveform = encoder.encode_frame(payload).unwrap();

    // Half a second of low-level noise before the frame.
    let mut noise = NoiseGen::new(77);
    let mut tape: Vec<f32> = (0..24_000).map(|_| 0.02 * noise.gaussian()).collect();
    tape.extend(&waveform);

    let mut source = SliceSource::new(&tape);
    assert_eq!(decoder.decode_stream(&mut source).unwrap(), payload);
}

#[test]
fn amplitude_scaling_is_equalized_away() {
    let cfg = wideband();
    let encoder = Encoder::new(cfg.clone()).unwrap();
    let decoder = Decoder::new(cfg).unwrap();
    let payload = b"quiet speaker";
    let waveform = encoder.encode_frame(payload).unwrap();

    for gain in [0.1f32, 0.4, 0.9] {
        let scaled: Vec<f32> = waveform.iter().map(|&s| s * gain).collect();
        let mut source = SliceSource::new(&scaled);
        assert_eq!(
            decoder.decode_stream(&mut source).unwrap(),
            payload,
            "gain={gain}"
        );
    }
}

#[test]
fn sixteen_bit_quantization_is_harmless() {
    let cfg = wideband();
    let encoder = Encoder::new(cfg.clone()).unwrap();
    let decoder = Decoder::new(cfg).unwrap();
    let payload = b"quantized path";
    let waveform = encoder.encode_frame(payload).unwrap();

    let quantized: Vec<f32> = waveform
        .iter()
        .map(|&s| {
            let v = (s * 32_767.0).clamp(-32_768.0, 32_767.0) as i16;
            v as f32 / 32_768.0
        })
        .collect();
    let mut source = SliceSource::new(&quantized);
    assert_eq!(decoder.decode_stream(&mut source).unwrap(), payload);
}
