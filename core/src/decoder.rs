//! Receive pipeline: pull samples from an `AudioSource`, synchronize,
//! demodulate the declared symbol count, then run FEC, the crypto envelope,
//! and decompression. Either the full verified payload comes back or an
//! error does; no partial output.

use std::sync::Arc;

use crate::audio::{AudioSource, CancelToken};
use crate::crypto::{self, Envelope, KeyProvider};
use crate::error::{Result, SonicLinkError};
use crate::fec::RsCodec;
use crate::framing::{self, FLAG_COMPRESSED, FLAG_ENCRYPTED, PREFIX_LEN};
use crate::layout::{PreambleTables, SubcarrierLayout, TABLE_SEED};
use crate::ofdm::OfdmModulator;
use crate::sync::{ToneDetector, END_TONE_HZ, START_TONE_HZ};
use crate::trace::{null_sink, TraceEvent, TraceSink};
use crate::{demod, huffman, Config};
use crate::demod::OfdmDemodulator;

/// How long after the last data symbol the end tone may arrive.
const END_TONE_SEARCH_MS: usize = 300;

pub struct Decoder {
    cfg: Config,
    demod: OfdmDemodulator,
    rs: RsCodec,
    /// Training-symbol template (CP included) for fine timing.
    train_template: Vec<f32>,
    start_detector: ToneDetector,
    end_detector: ToneDetector,
    keys: Option<Box<dyn KeyProvider>>,
    trace: Arc<dyn TraceSink>,
    cancel: CancelToken,
}

/// Rolling pull state over one `decode_stream` call.
struct Stream<'a> {
    source: &'a mut dyn AudioSource,
    buf: Vec<f32>,
    chunk: Vec<f32>,
    pulls: u64,
    exhausted: bool,
}

impl Decoder {
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let layout = SubcarrierLayout::new(&cfg)?;
        let tables = PreambleTables::new(&layout, TABLE_SEED);
        let modulator = OfdmModulator::new(layout.clone(), tables);
        let (_, train_template) = modulator.preamble();
        let demod = OfdmDemodulator::new(layout, PreambleTables::new(modulator.layout(), TABLE_SEED));
        Ok(Self {
            start_detector: ToneDetector::new(START_TONE_HZ, cfg.sample_rate),
            end_detector: ToneDetector::new(END_TONE_HZ, cfg.sample_rate),
            cfg,
            demod,
            rs: RsCodec::new(),
            train_template,
            keys: None,
            trace: null_sink(),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_keys(mut self, keys: Box<dyn KeyProvider>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn layout(&self) -> &SubcarrierLayout {
        self.demod.layout()
    }

    /// Wait for the 17 kHz start tone. Returns `false` on timeout or end of
    /// stream.
    pub fn detect(&self, source: &mut dyn AudioSource, timeout_ms: u64) -> Result<bool> {
        let mut stream = Stream::new(source, self.cfg.chunk_size);
        let limit = timeout_ms as usize * self.cfg.sample_rate / 1000;
        let window = self.start_detector.window();
        let mut pos = 0usize;
        loop {
            while stream.buf.len() < pos + window {
                if stream.buf.len() >= limit || self.pull(&mut stream)? == 0 {
                    return Ok(false);
                }
            }
            if self.start_detector.detect(&stream.buf[pos..pos + window]) {
                self.trace.trace(&TraceEvent::ToneDetected {
                    freq_hz: START_TONE_HZ,
                    offset: pos,
                });
                return Ok(true);
            }
            pos += window / 2;
        }
    }

    /// Decode one frame from the source.
    pub fn decode_stream(&self, source: &mut dyn AudioSource) -> Result<Vec<u8>> {
        let mut stream = Stream::new(source, self.cfg.chunk_size);
        let n = self.layout().fft_size;
        let symbol_len = self.layout().symbol_len();
        let cp = self.layout().cp_len;
        let idle_limit = self.cfg.idle_timeout_ms as usize * self.cfg.sample_rate / 1000;

        // Arm on the start tone when the sender emits one; cheap gating
        // against false preamble starts on background noise.
        let gate = if self.cfg.start_tone {
            self.wait_for_start_tone(&mut stream, idle_limit)?
        } else {
            0
        };

        // Coarse preamble search (Schmidl-Cox plateau).
        let mut scan_from = gate;
        let edge = loop {
            if let Some((edge, metric)) = demod::find_preamble(&stream.buf, scan_from, n) {
                self.trace.trace(&TraceEvent::PreambleDetected {
                    offset: edge,
                    metric,
                });
                break edge;
            }
            // A plateau cut short by the buffer end restarts no earlier than
            // this, so nothing before it needs rescanning.
            scan_from = scan_from.max((stream.buf.len().saturating_sub(n + n / 4)).max(gate));
            if stream.buf.len() > gate + idle_limit {
                return Err(SonicLinkError::NoPreamble);
            }
            if self.pull(&mut stream)? == 0 {
                return Err(SonicLinkError::NoPreamble);
            }
        };

        // Carrier offset from the plateau, then fine timing on the training
        // symbol.
        self.fill_to(&mut stream, edge + 3 * symbol_len)?;
        let cfo = demod::carrier_offset(&stream.buf, edge + n / 8, n);
        self.trace
            .trace(&TraceEvent::CarrierOffsetEstimated { fraction: cfo });

        let lo = edge + symbol_len - cp;
        let hi = edge + symbol_len + 2 * cp;
        self.fill_to(&mut stream, hi + symbol_len)?;
        let train_start =
            demod::cross_correlate(&stream.buf, &self.train_template, lo, hi);

        let h = self.demod.estimate_channel(
            &stream.buf[train_start..train_start + symbol_len],
            cfo,
            train_start,
        );
        let mean_gain =
            h.iter().map(|g| g.norm()).sum::<f32>() / h.len().max(1) as f32;
        self.trace.trace(&TraceEvent::ChannelEstimated {
            bins: h.len(),
            mean_gain,
        });

        // Demodulate until the framer-declared symbol count is reached.
        let data_start = train_start + symbol_len;
        let bytes_per_symbol = self.layout().bytes_per_symbol;
        let mut stream_bytes: Vec<u8> = Vec::new();
        let mut declared: Option<usize> = None;
        let mut index = 0usize;
        loop {
            let sym_start = data_start + index * symbol_len;
            self.fill_to(&mut stream, sym_start + symbol_len)?;
            let (labels, residual) = self.demod.demod_symbol(
                &stream.buf[sym_start..sym_start + symbol_len],
                &h,
                cfo,
                sym_start,
            )?;
            self.trace.trace(&TraceEvent::SymbolDecoded {
                index,
                residual_phase: residual,
            });
            stream_bytes.extend(crate::qam::labels_to_bytes(&labels));
            index += 1;

            if declared.is_none() && stream_bytes.len() >= PREFIX_LEN {
                let prefix = framing::parse_prefix(&stream_bytes).map_err(|e| {
                    self.trace.trace(&TraceEvent::FrameError { kind: "prefix" });
                    e
                })?;
                let count = prefix.symbols as usize;
                if count * bytes_per_symbol < PREFIX_LEN {
                    return Err(SonicLinkError::InvalidFrame(
                        "declared symbol count shorter than the prefix".to_string(),
                    ));
                }
                declared = Some(count);
            }
            if let Some(count) = declared {
                if index >= count {
                    break;
                }
            }
        }

        let payload = self.unpack(&stream_bytes)?;

        // The end tone should follow within 300 ms; its absence is only a
        // warning since the symbol count is framed.
        let frame_end = data_start + declared.unwrap_or(index) * symbol_len;
        self.check_end_tone(&mut stream, frame_end);
        Ok(payload)
    }

    /// FEC, envelope, and decompression stages.
    fn unpack(&self, stream_bytes: &[u8]) -> Result<Vec<u8>> {
        let frame = framing::parse(stream_bytes, &self.rs).map_err(|e| {
            self.trace.trace(&TraceEvent::FrameError { kind: "frame" });
            e
        })?;

        let mut payload = if frame.flags & FLAG_ENCRYPTED != 0 {
            let keys = self
                .keys
                .as_deref()
                .ok_or(SonicLinkError::KeyRequired("private key"))?;
            let fields = frame.envelope.ok_or_else(|| {
                SonicLinkError::InvalidFrame("encrypted frame without envelope".to_string())
            })?;
            crypto::open(
                keys,
                &Envelope {
                    wrapped_key: fields.wrapped_key,
                    nonce: fields.nonce,
                    ciphertext: frame.body,
                    tag: fields.tag,
                },
            )
            .map_err(|e| {
                self.trace.trace(&TraceEvent::FrameError { kind: "auth" });
                e
            })?
        } else {
            frame.body
        };

        if frame.flags & FLAG_COMPRESSED != 0 {
            payload = huffman::decompress(&payload).map_err(|e| {
                self.trace
                    .trace(&TraceEvent::FrameError { kind: "compression" });
                e
            })?;
        }
        Ok(payload)
    }

    fn wait_for_start_tone(&self, stream: &mut Stream<'_>, idle_limit: usize) -> Result<usize> {
        let window = self.start_detector.window();
        let mut pos = 0usize;
        loop {
            while stream.buf.len() < pos + window {
                if stream.buf.len() > idle_limit {
                    return Err(SonicLinkError::NoPreamble);
                }
                if self.pull(stream)? == 0 {
                    return Err(SonicLinkError::NoPreamble);
                }
            }
            if self.start_detector.detect(&stream.buf[pos..pos + window]) {
                self.trace.trace(&TraceEvent::ToneDetected {
                    freq_hz: START_TONE_HZ,
                    offset: pos,
                });
                return Ok(pos);
            }
            pos += window / 2;
        }
    }

    fn check_end_tone(&self, stream: &mut Stream<'_>, frame_end: usize) {
        let window = self.end_detector.window();
        let search_len = END_TONE_SEARCH_MS * self.cfg.sample_rate / 1000;
        let limit = frame_end + search_len;
        // Tolerate a source that ends right after the data symbols.
        while stream.buf.len() < limit {
            match self.pull(stream) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
        let mut pos = frame_end;
        while pos + window <= stream.buf.len().min(limit) {
            if self.end_detector.detect(&stream.buf[pos..pos + window]) {
                self.trace.trace(&TraceEvent::ToneDetected {
                    freq_hz: END_TONE_HZ,
                    offset: pos,
                });
                return;
            }
            pos += window / 2;
        }
        self.trace.trace(&TraceEvent::EndToneMissing);
    }

    /// One chunk pull with cancellation observed at the configured cadence.
    fn pull(&self, stream: &mut Stream<'_>) -> Result<usize> {
        let interval = self.cfg.cancel_check_interval_chunks.max(1) as u64;
        if stream.pulls % interval == 0 && self.cancel.is_cancelled() {
            return Err(SonicLinkError::Cancelled);
        }
        stream.pulls += 1;
        if stream.exhausted {
            return Ok(0);
        }
        let got = stream.source.pull(&mut stream.chunk)?;
        if got == 0 {
            stream.exhausted = true;
        }
        stream.buf.extend_from_slice(&stream.chunk[..got]);
        Ok(got)
    }

    /// Pull until the buffer holds `needed` samples; `IoExhausted` if the
    /// source ends first.
    fn fill_to(&self, stream: &mut Stream<'_>, needed: usize) -> Result<()> {
        while stream.buf.len() < needed {
            if self.pull(stream)? == 0 {
                return Err(SonicLinkError::IoExhausted);
            }
        }
        Ok(())
    }
}

impl<'a> Stream<'a> {
    fn new(source: &'a mut dyn AudioSource, chunk_size: usize) -> Self {
        Self {
            source,
            buf: Vec::new(),
            chunk: vec![0.0; chunk_size.max(1)],
            pulls: 0,
            exhausted: false,
        }
    }
}
