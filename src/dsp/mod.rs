//! DSP core — deterministic, whole-buffer synthesis and analysis.
//!
//! Everything here is synchronous and free of I/O; callers run each request
//! on their own worker. The only shared state is the read-only memoized
//! kernel/FFT caches owned by a [`DspContext`].

pub mod analysis;
pub mod envelope;
pub mod fft;
pub mod harmonics;
pub mod jitter;
pub mod kernels;
pub mod nonlinear;

use crate::buffer::SampleBuffer;
use crate::patch::Patch;

/// Session-scoped memoization caches. One per worker/session; independent
/// contexts may redundantly rebuild identical tables, which is safe because
/// entries are pure functions of their keys.
pub struct DspContext {
    pub fft: fft::FftCache,
    pub kernels: kernels::KernelCache,
}

impl Default for DspContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DspContext {
    pub fn new() -> Self {
        DspContext {
            fft: fft::FftCache::new(),
            kernels: kernels::KernelCache::new(),
        }
    }
}

/// Delegated routines the core calls but does not implement: the resonant
/// filter, the loudspeaker-nonlinearity model, and quantization dither.
/// Default implementations are no-ops so tests and previews can run bare.
pub trait ExternalFx {
    /// Resonant filter applied to a freshly synthesized channel. May return
    /// a longer buffer (ringing tail); the caller sized for it via
    /// `max_filter_delay`.
    fn filter(&mut self, buffer: Vec<f64>, _sample_rate: f64, _patch: &Patch) -> Vec<f64> {
        buffer
    }

    /// Loudspeaker nonlinearity, in place, inside the oversampled domain of
    /// the distortion chain.
    fn speaker_sim(&mut self, _buffer: &mut [f64], _sample_rate: f64, _patch: &Patch) {}

    /// Quantization dither, in place, at assembly time. The target rate
    /// travels inside the buffer as `SampleBuffer::sample_rate`.
    fn dither(&mut self, _buffer: &mut SampleBuffer, _patch: &Patch) {}
}

/// The do-nothing collaborator set.
pub struct NoopFx;

impl ExternalFx for NoopFx {}
