//! Event sink collaborator.
//!
//! The codec reports well-defined milestones (preamble found, channel
//! estimated, symbol decoded, markers) through a [`TraceSink`] instead of
//! logging directly. [`NullSink`] discards everything; [`LogSink`] forwards
//! to the `tracing` ecosystem.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// Start or end marker tone heard at `offset` samples into the stream.
    ToneDetected { freq_hz: f32, offset: usize },
    /// Schmidl-Cox plateau rising edge.
    PreambleDetected { offset: usize, metric: f32 },
    /// Fractional carrier offset, in subcarrier spacings.
    CarrierOffsetEstimated { fraction: f32 },
    ChannelEstimated { bins: usize, mean_gain: f32 },
    SymbolDecoded { index: usize, residual_phase: f32 },
    /// The declared symbol count was decoded but no end tone followed.
    EndToneMissing,
    Compressed { original: usize, compressed: usize },
    FrameError { kind: &'static str },
}

pub trait TraceSink: Send + Sync {
    fn trace(&self, event: &TraceEvent);
}

/// Discards all events.
#[derive(Default)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn trace(&self, _event: &TraceEvent) {}
}

/// Forwards events to `tracing` at debug level (warn for anomalies).
#[derive(Default)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn trace(&self, event: &TraceEvent) {
        match event {
            TraceEvent::ToneDetected { freq_hz, offset } => {
                tracing::debug!(freq_hz, offset, "marker tone detected");
            }
            TraceEvent::PreambleDetected { offset, metric } => {
                tracing::debug!(offset, metric, "preamble detected");
            }
            TraceEvent::CarrierOffsetEstimated { fraction } => {
                tracing::debug!(fraction, "carrier offset estimated");
            }
            TraceEvent::ChannelEstimated { bins, mean_gain } => {
                tracing::debug!(bins, mean_gain, "channel estimated");
            }
            TraceEvent::SymbolDecoded { index, residual_phase } => {
                tracing::trace!(index, residual_phase, "symbol decoded");
            }
            TraceEvent::EndToneMissing => {
                tracing::warn!("frame decoded but end tone not found");
            }
            TraceEvent::Compressed { original, compressed } => {
                tracing::debug!(original, compressed, "payload compressed");
            }
            TraceEvent::FrameError { kind } => {
                tracing::warn!(kind, "frame error");
            }
        }
    }
}

/// Default sink shared by encoder and decoder builders.
pub fn null_sink() -> Arc<dyn TraceSink> {
    Arc::new(NullSink)
}

/// Records every event; used by tests and diagnostics.
#[derive(Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<TraceEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().expect("trace mutex poisoned").clone()
    }

    pub fn contains(&self, wanted: &TraceEvent) -> bool {
        self.events().iter().any(|e| e == wanted)
    }
}

impl TraceSink for RecordingSink {
    fn trace(&self, event: &TraceEvent) {
        self.events.lock().expect("trace mutex poisoned").push(event.clone());
    }
}
