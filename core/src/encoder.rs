//! Transmit pipeline: payload -> Huffman -> envelope -> Reed-Solomon ->
//! framing -> 64-QAM OFDM -> marker tones.

use rustfft::num_complex::Complex;
use std::sync::Arc;

use crate::audio::AudioSink;
use crate::crypto::{self, KeyProvider};
use crate::error::{Result, SonicLinkError};
use crate::fec::RsCodec;
use crate::framing::{self, Frame, FrameEnvelope, FLAG_COMPRESSED, FLAG_ENCRYPTED};
use crate::layout::{PreambleTables, SubcarrierLayout, TABLE_SEED};
use crate::ofdm::OfdmModulator;
use crate::sync::{self, END_TONE_HZ, END_TONE_MS, START_TONE_HZ, START_TONE_MS};
use crate::trace::{null_sink, TraceEvent, TraceSink};
use crate::{huffman, qam, Config};

pub struct Encoder {
    cfg: Config,
    modulator: OfdmModulator,
    rs: RsCodec,
    preamble_sc: Vec<f32>,
    preamble_train: Vec<f32>,
    start_tone: Vec<f32>,
    end_tone: Vec<f32>,
    keys: Option<Box<dyn KeyProvider>>,
    trace: Arc<dyn TraceSink>,
}

impl Encoder {
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let layout = SubcarrierLayout::new(&cfg)?;
        let tables = PreambleTables::new(&layout, TABLE_SEED);
        let modulator = OfdmModulator::new(layout, tables);
        let (preamble_sc, preamble_train) = modulator.preamble();
        let start_tone = sync::marker_tone(START_TONE_HZ, START_TONE_MS, cfg.sample_rate);
        let end_tone = sync::marker_tone(END_TONE_HZ, END_TONE_MS, cfg.sample_rate);
        Ok(Self {
            cfg,
            modulator,
            rs: RsCodec::new(),
            preamble_sc,
            preamble_train,
            start_tone,
            end_tone,
            keys: None,
            trace: null_sink(),
        })
    }

    /// Attach key material; required when the configuration enables
    /// encryption.
    pub fn with_keys(mut self, keys: Box<dyn KeyProvider>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = trace;
        self
    }

    pub fn layout(&self) -> &SubcarrierLayout {
        self.modulator.layout()
    }

    /// Encode one payload into a complete waveform.
    pub fn encode_frame(&self, payload: &[u8]) -> Result<Vec<f32>> {
        let mut flags = 0u8;
        let mut body = payload.to_vec();

        if self.cfg.compress {
            let compressed = huffman::compress(&body);
            self.trace.trace(&TraceEvent::Compressed {
                original: body.len(),
                compressed: compressed.len(),
            });
            body = compressed;
            flags |= FLAG_COMPRESSED;
        }

        let frame = if self.cfg.encrypt {
            let keys = self
                .keys
                .as_deref()
                .ok_or(SonicLinkError::KeyRequired("recipient public key"))?;
            let envelope = crypto::seal(keys, &body)?;
            flags |= FLAG_ENCRYPTED;
            Frame {
                flags,
                body: envelope.ciphertext,
                envelope: Some(FrameEnvelope {
                    wrapped_key: envelope.wrapped_key,
                    nonce: envelope.nonce,
                    tag: envelope.tag,
                }),
            }
        } else {
            Frame {
                flags,
                body,
                envelope: None,
            }
        };

        let bytes_per_symbol = self.layout().bytes_per_symbol;
        let (stream, symbols) = framing::assemble(&frame, &self.rs, bytes_per_symbol)?;

        let symbol_len = self.layout().symbol_len();
        let mut samples = Vec::with_capacity(
            self.start_tone.len()
                + 2 * symbol_len
                + symbols as usize * symbol_len
                + self.end_tone.len(),
        );
        if self.cfg.start_tone {
            samples.extend_from_slice(&self.start_tone);
        }
        samples.extend_from_slice(&self.preamble_sc);
        samples.extend_from_slice(&self.preamble_train);
        for chunk in stream.chunks(bytes_per_symbol) {
            let points: Vec<Complex<f32>> = qam::bytes_to_labels(chunk)
                .iter()
                .map(|&label| qam::map(label))
                .collect();
            samples.extend_from_slice(&self.modulator.modulate_symbol(&points));
        }
        samples.extend_from_slice(&self.end_tone);

        // Samples are defined on [-1, 1]; OFDM peaks can poke past unit RMS.
        // One frame-constant gain keeps the waveform in range without
        // disturbing the receiver's channel estimate.
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if peak > 1.0 {
            let gain = 1.0 / peak;
            for sample in &mut samples {
                *sample *= gain;
            }
        }
        Ok(samples)
    }

    /// Encode and push the waveform to a sink.
    pub fn transmit(&self, payload: &[u8], sink: &mut dyn AudioSink) -> Result<()> {
        sink.push(&self.encode_frame(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_without_encryption() {
        let encoder = Encoder::new(Config::default()).unwrap();
        let a = encoder.encode_frame(b"deterministic").unwrap();
        let b = encoder.encode_frame(b"deterministic").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn encryption_without_keys_is_rejected() {
        let cfg = Config {
            encrypt: true,
            ..Config::default()
        };
        let encoder = Encoder::new(cfg).unwrap();
        assert!(matches!(
            encoder.encode_frame(b"x"),
            Err(SonicLinkError::KeyRequired(_))
        ));
    }

    #[test]
    fn start_tone_is_optional() {
        let with_tone = Encoder::new(Config::default()).unwrap();
        let without_tone = Encoder::new(Config {
            start_tone: false,
            ..Config::default()
        })
        .unwrap();
        let a = with_tone.encode_frame(b"hello").unwrap();
        let b = without_tone.encode_frame(b"hello").unwrap();
        assert_eq!(a.len() - b.len(), 9600);
    }
}
