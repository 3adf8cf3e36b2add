//! Audio I/O collaborator traits.
//!
//! The codec never touches a device itself: samples arrive through a blocking
//! [`AudioSource`] pull and leave through an [`AudioSink`] push. Slice/vector
//! implementations are provided for file-based front-ends and tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;

/// Blocking pull of PCM samples.
pub trait AudioSource {
    /// Fill `buf` with up to `buf.len()` samples. `Ok(0)` means end of stream.
    fn pull(&mut self, buf: &mut [f32]) -> Result<usize>;
}

/// Blocking push of a complete waveform.
pub trait AudioSink {
    fn push(&mut self, samples: &[f32]) -> Result<()>;
}

/// An [`AudioSource`] over an in-memory sample buffer.
pub struct SliceSource<'a> {
    samples: &'a [f32],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(samples: &'a [f32]) -> Self {
        Self { samples, pos: 0 }
    }

    /// Samples consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl AudioSource for SliceSource<'_> {
    fn pull(&mut self, buf: &mut [f32]) -> Result<usize> {
        let n = buf.len().min(self.samples.len() - self.pos);
        buf[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// An [`AudioSink`] that accumulates samples in memory.
#[derive(Default)]
pub struct VecSink {
    pub samples: Vec<f32>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for VecSink {
    fn push(&mut self, samples: &[f32]) -> Result<()> {
        self.samples.extend_from_slice(samples);
        Ok(())
    }
}

/// Caller-provided cancellation signal, observed at chunk boundaries.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_source_drains() {
        let data = [0.1f32, 0.2, 0.3];
        let mut src = SliceSource::new(&data);
        let mut buf = [0.0f32; 2];
        assert_eq!(src.pull(&mut buf).unwrap(), 2);
        assert_eq!(src.pull(&mut buf).unwrap(), 1);
        assert_eq!(src.pull(&mut buf).unwrap(), 0);
        assert_eq!(src.position(), 3);
    }

    #[test]
    fn cancel_token_signals() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
