//! Buffer assembly and analysis facade.
//!
//! Drives the synthesis pipeline per channel (harmonics → external filter →
//! nonlinear stage → jitter), applies scaling/null-test policies, and builds
//! leakage-free single-cycle buffers for spectra and THD measurement.

use std::f64::consts::PI;

use serde::Serialize;

use crate::buffer::SampleBuffer;
use crate::dsp::envelope::{FilterEnvelope, amplitude_envelope};
use crate::dsp::harmonics::synthesize_harmonics;
use crate::dsp::{DspContext, ExternalFx, jitter, nonlinear};
use crate::patch::{Patch, ZERO_LEVEL, db_to_gain};
use crate::rng::SeededRng;

/// Scaling policy for A/B buffer sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalePolicy {
    /// Scale every buffer by the same gain so the loudest peaks at full scale.
    NormalizeLoudest,
    /// Leave the synthesized levels untouched.
    PreserveLevels,
}

/// Result of a null test: the difference buffer and its peak level.
#[derive(Debug, Clone)]
pub struct NullBuffer {
    pub peak_db: f64,
    pub buffer: SampleBuffer,
}

/// Single-cycle waveform plus its spectrum.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewResult {
    pub waveform: Vec<f64>,
    pub magnitude: Vec<f64>,
    pub phase: Vec<f64>,
}

/// Whole-cycle-snapped spectrum with derived metrics.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedSpectrum {
    /// The frequency after snapping to a whole number of cycles.
    pub frequency: f64,
    pub magnitude: Vec<f64>,
    pub phase: Vec<f64>,
    /// Peak bin level minus the largest non-harmonic residual, in dB.
    pub dynamic_range_db: f64,
}

/// One point of a THD sweep.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThdPoint {
    pub frequency: f64,
    pub thd_percent: f64,
}

/// Transform size used for THD probes.
const THD_FFT_SIZE: usize = 4096;
/// Highest harmonic summed into the THD figure.
const THD_MAX_HARMONIC: usize = 11;
/// Measurement floor for null-test residuals, well below the zero level.
const NULL_FLOOR: f64 = 1e-10;

/// Synthesize a full buffer for one or two channels.
///
/// The shared buffer is sized from the worst-case channel duration plus the
/// caller-declared pre-delay and filter-delay headroom, so every channel
/// decays below the zero level inside the buffer. `sample_mix` is consumed
/// destructively; the caller must not reuse it.
pub fn synthesize<F: ExternalFx>(
    ctx: &mut DspContext,
    patch: &Patch,
    patch_right: Option<&Patch>,
    sample_rate: u32,
    max_pre_delay: f64,
    max_filter_delay: f64,
    fx: &mut F,
    sample_mix: Option<Vec<f32>>,
) -> SampleBuffer {
    let sr = sample_rate as f64;
    let mut channel_patches = vec![patch];
    if let Some(right) = patch_right {
        channel_patches.push(right);
    }

    let length = channel_patches
        .iter()
        .map(|p| (sr * (p.envelope_duration() + max_pre_delay + max_filter_delay)).round() as usize)
        .max()
        .unwrap_or(0);

    let mut channels = Vec::with_capacity(channel_patches.len());
    for &p in &channel_patches {
        let mut rng = SeededRng::new(p.seed as u64);
        let env = amplitude_envelope(p, sr, length);
        let fenv = if p.filter_enabled {
            Some(FilterEnvelope::build(p, sr, length))
        } else {
            None
        };
        let mut data =
            synthesize_harmonics(p, sr, length, &env, fenv.as_ref(), &mut rng, &mut ());

        if let Some(mix) = &sample_mix {
            let gain = p.sample_mix;
            if gain != 0.0 {
                for (s, &m) in data.iter_mut().zip(mix.iter()) {
                    *s += gain * m as f64;
                }
            }
        }

        data = fx.filter(data, sr, p);
        data.resize(length, 0.0);
        data = nonlinear::process(data, p, sr, false, &mut ctx.kernels, fx);
        data = jitter::process(data, p, sr, false, &mut rng, &mut ctx.kernels);
        channels.push(data);
    }

    SampleBuffer::from_channels(sample_rate, channels)
}

/// Apply the scaling policy, per-patch polarity/attenuation, and dither to a
/// set of buffers.
pub fn scale_buffer_list<F: ExternalFx>(
    buffers: &mut [SampleBuffer],
    patches: &[&Patch],
    policy: ScalePolicy,
    fx: &mut F,
) {
    let norm = match policy {
        ScalePolicy::NormalizeLoudest => {
            let loudest = buffers.iter().map(|b| b.peak()).fold(0.0_f64, f64::max);
            if loudest > ZERO_LEVEL { 1.0 / loudest } else { 1.0 }
        }
        ScalePolicy::PreserveLevels => 1.0,
    };

    for (buffer, &p) in buffers.iter_mut().zip(patches.iter()) {
        let gain = norm * p.polarity * db_to_gain(-p.attenuation_db);
        buffer.scale(gain);
        fx.dither(buffer, p);
    }
}

/// Scale two configurations and difference them sample-wise.
///
/// The reported peak is floored far below the zero level so a bit-identical
/// pair reads as a deep null rather than clamping at the silence threshold.
pub fn scale_and_get_null_buffer<F: ExternalFx>(
    a: SampleBuffer,
    b: SampleBuffer,
    patch_a: &Patch,
    patch_b: &Patch,
    policy: ScalePolicy,
    fx: &mut F,
) -> NullBuffer {
    let mut pair = [a, b];
    scale_buffer_list(&mut pair, &[patch_a, patch_b], policy, fx);
    let [a, b] = pair;

    let channels = a.channels().min(b.channels());
    let length = a.len().min(b.len());
    let mut diff = SampleBuffer::silent(a.sample_rate, channels, length);
    let mut peak = 0.0_f64;
    for ch in 0..channels {
        for i in 0..length {
            let d = a.data[ch][i] as f64 - b.data[ch][i] as f64;
            diff.data[ch][i] = d as f32;
            peak = peak.max(d.abs());
        }
    }

    NullBuffer {
        peak_db: 20.0 * peak.max(NULL_FLOOR).log10(),
        buffer: diff,
    }
}

/// Impulse response of the delegated resonant filter: a unit impulse fed
/// through the [`ExternalFx::filter`] hook. The hook may return a longer
/// buffer than `length` when the filter rings past it.
pub fn get_filter_impulse_response<F: ExternalFx>(
    patch: &Patch,
    sample_rate: f64,
    length: usize,
    fx: &mut F,
) -> Vec<f64> {
    let mut impulse = vec![0.0; length];
    if let Some(first) = impulse.first_mut() {
        *first = 1.0;
    }
    fx.filter(impulse, sample_rate, patch)
}

/// Render one steady-state cycle of a patch at a virtual sample rate chosen
/// so the fundamental period exactly fills `size` samples.
fn single_cycle(
    ctx: &mut DspContext,
    patch: &Patch,
    size: usize,
) -> Vec<f64> {
    // One cycle across the whole buffer: virtual rate = f0 × size.
    let virtual_rate = patch.fundamental() * size as f64;
    let env = vec![1.0; size];
    let mut rng = SeededRng::new(patch.seed as u64);
    let data = synthesize_harmonics(patch, virtual_rate, size, &env, None, &mut rng, &mut ());
    nonlinear::process(
        data,
        patch,
        virtual_rate,
        true,
        &mut ctx.kernels,
        &mut crate::dsp::NoopFx,
    )
}

/// Single exact-cycle waveform and leakage-free spectrum.
///
/// Returns `None` when `size` is not a supported FFT size.
pub fn get_preview(ctx: &mut DspContext, patch: &Patch, size: usize) -> Option<PreviewResult> {
    if !crate::dsp::fft::FftCache::supported(size) {
        return None;
    }
    let waveform = single_cycle(ctx, patch, size);
    let spectrum = ctx.fft.forward(&waveform)?;
    Some(PreviewResult {
        waveform,
        magnitude: spectrum.magnitude,
        phase: spectrum.phase.unwrap_or_default(),
    })
}

/// Detailed spectrum at the real sample rate, with the fundamental snapped to
/// a whole number of cycles so the analysis stays leakage-free.
pub fn get_detailed_fft(
    ctx: &mut DspContext,
    patch: &Patch,
    sample_rate: u32,
    size: usize,
) -> Option<DetailedSpectrum> {
    if !crate::dsp::fft::FftCache::supported(size) {
        return None;
    }
    let sr = sample_rate as f64;
    let cycles = ((size as f64 * patch.fundamental() / sr).round() as usize).max(1);
    let snapped = cycles as f64 * sr / size as f64;

    // Copy-on-write: the caller's patch is never mutated.
    let mut probe = patch.clone();
    probe.frequency = snapped;
    probe.frequency_fine = 0.0;

    let env = vec![1.0; size];
    let mut rng = SeededRng::new(probe.seed as u64);
    let data = synthesize_harmonics(&probe, sr, size, &env, None, &mut rng, &mut ());
    let data = nonlinear::process(data, &probe, sr, true, &mut ctx.kernels, &mut crate::dsp::NoopFx);
    let spectrum = ctx.fft.forward(&data)?;

    let mut peak = 0.0_f64;
    let mut residual = 0.0_f64;
    for (k, &mag) in spectrum.magnitude.iter().enumerate() {
        peak = peak.max(mag);
        if k % cycles != 0 {
            residual = residual.max(mag);
        }
    }
    let dynamic_range_db =
        20.0 * (peak.max(ZERO_LEVEL) / residual.max(ZERO_LEVEL)).log10();

    Some(DetailedSpectrum {
        frequency: snapped,
        magnitude: spectrum.magnitude,
        phase: spectrum.phase.unwrap_or_default(),
        dynamic_range_db,
    })
}

/// THD in percent at one test frequency.
///
/// Forces a pure-sine template — rectangular window, envelope = 1, no filter
/// — runs only the nonlinear stage, and sums the power of harmonics 2..=11
/// against the fundamental. Exactly 0.0 when distortion is zero, whatever
/// the other parameters.
pub fn get_thd_percent<F: ExternalFx>(
    ctx: &mut DspContext,
    patch: &Patch,
    sample_rate: f64,
    frequency: f64,
    fx: &mut F,
) -> f64 {
    if !patch.distortion_active() {
        return 0.0;
    }

    let n = THD_FFT_SIZE;
    let cycles = ((n as f64 * frequency / sample_rate).round() as usize).max(1);
    if cycles >= n / 2 {
        // Test frequency at or above Nyquist: no measurable fundamental.
        return 0.0;
    }
    let virtual_rate = n as f64 * frequency / cycles as f64;

    let probe: Vec<f64> = (0..n)
        .map(|i| (2.0 * PI * cycles as f64 * i as f64 / n as f64).sin())
        .collect();
    let shaped = nonlinear::process(probe, patch, virtual_rate, true, &mut ctx.kernels, fx);

    let Some(mags) = ctx.fft.forward_magnitude(&shaped) else {
        return 0.0;
    };
    // A fully-driven shaper can annihilate the fundamental outright (the
    // 3rd-order Chebyshev at full blend maps a sine to its pure 3rd
    // harmonic). Floor the reading at the zero level so the ratio stays
    // finite and keeps growing instead of collapsing to 0%.
    let fundamental = mags[cycles].max(ZERO_LEVEL);
    let mut harmonic_power = 0.0;
    for h in 2..=THD_MAX_HARMONIC {
        let bin = h * cycles;
        if bin >= n / 2 {
            break;
        }
        harmonic_power += mags[bin] * mags[bin];
    }
    100.0 * (harmonic_power / (fundamental * fundamental)).sqrt()
}

/// Swept THD: log-spaced test frequencies from `start_freq` up to
/// min(10 kHz, Nyquist/2).
pub fn get_thd_graph<F: ExternalFx>(
    ctx: &mut DspContext,
    patch: &Patch,
    sample_rate: f64,
    start_freq: f64,
    points: usize,
    fx: &mut F,
) -> Vec<ThdPoint> {
    let lo = start_freq.max(20.0);
    let hi = (sample_rate / 4.0).min(10000.0);
    let points = points.max(2);
    let mut out = Vec::with_capacity(points);
    for i in 0..points {
        let f = lo * (hi / lo).powf(i as f64 / (points - 1) as f64);
        out.push(ThdPoint {
            frequency: f,
            thd_percent: get_thd_percent(ctx, patch, sample_rate, f, fx),
        });
    }
    out
}
