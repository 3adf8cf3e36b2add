//! SonicLink core: a near-ultrasonic acoustic modem.
//!
//! Byte payloads travel between a speaker and a microphone as 64-QAM OFDM in
//! the 18-22 kHz band, with Reed-Solomon(255,223) FEC, optional canonical
//! Huffman compression, and an optional AES-256-GCM + RSA-OAEP envelope.
//! Audio I/O, key storage, and the CLI are collaborators; the codec itself
//! only maps bytes to `f32` sample buffers and back.

pub mod audio;
pub mod crypto;
pub mod decoder;
pub mod demod;
pub mod encoder;
pub mod error;
pub mod fec;
pub mod framing;
pub mod huffman;
pub mod layout;
pub mod ofdm;
pub mod qam;
pub mod sync;
pub mod trace;

pub use audio::{AudioSink, AudioSource, CancelToken, SliceSource, VecSink};
pub use crypto::{KeyProvider, RsaKeys};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{Result, SonicLinkError};
pub use framing::{FLAG_COMPRESSED, FLAG_ENCRYPTED, MAGIC, VERSION};
pub use layout::{SubcarrierLayout, TABLE_SEED};
pub use trace::{LogSink, NullSink, RecordingSink, TraceEvent, TraceSink};

/// Default sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: usize = 48_000;

/// Forward error correction scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecScheme {
    /// Reed-Solomon(255,223) over GF(2^8); the only supported code.
    Rs255_223,
}

/// Codec configuration. The derived subcarrier layout is a pure function of
/// the signal parameters, so sender and receiver configured alike compute
/// identical tables.
#[derive(Debug, Clone)]
pub struct Config {
    pub sample_rate: usize,
    /// Lower edge of the usable band, Hz.
    pub band_low: f64,
    /// Upper edge of the usable band, Hz.
    pub band_high: f64,
    pub fft_size: usize,
    /// Cyclic prefix length as a fraction of `fft_size`.
    pub cp_ratio: f64,
    /// One pilot bin after every this many data bins.
    pub pilot_spacing: usize,
    /// Constellation order; fixed at 64.
    pub qam_order: usize,
    pub fec: FecScheme,
    pub compress: bool,
    pub encrypt: bool,
    /// Emit the 200 ms 17 kHz start tone and gate reception on it.
    pub start_tone: bool,
    /// Bound on listening before the first preamble.
    pub idle_timeout_ms: u64,
    /// Cancellation poll cadence, in source chunks.
    pub cancel_check_interval_chunks: u32,
    /// AudioSource pull granularity in samples.
    pub chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            band_low: 18_000.0,
            band_high: 22_000.0,
            fft_size: 256,
            cp_ratio: 0.25,
            pilot_spacing: 8,
            qam_order: 64,
            fec: FecScheme::Rs255_223,
            compress: false,
            encrypt: false,
            start_tone: true,
            idle_timeout_ms: 30_000,
            cancel_check_interval_chunks: 1,
            chunk_size: 1024,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.qam_order != 64 {
            return Err(SonicLinkError::InvalidConfig(format!(
                "unsupported QAM order {}",
                self.qam_order
            )));
        }
        if self.sample_rate == 0 {
            return Err(SonicLinkError::InvalidConfig(
                "sample_rate must be positive".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(SonicLinkError::InvalidConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        // Band, FFT and pilot parameters are validated by the layout.
        SubcarrierLayout::new(self)?;
        Ok(())
    }
}
