//! Oversampled nonlinear distortion stage.
//!
//! Upsamples, applies a fixed chain of waveshapers, and downsamples with the
//! same kernel so aliasing products land above the final Nyquist. The stage
//! order — hyperbolic asymmetric saturation, 3rd-order Chebyshev shaping,
//! normalized tanh, hard clip, external speaker model — is a hard numeric
//! contract: the stages interact nonlinearly and reordering changes output.

use std::f64::consts::PI;

use crate::dsp::ExternalFx;
use crate::dsp::kernels::{KernelCache, KernelKey, downsample, upsample};
use crate::patch::{Patch, db_to_gain};

/// Denominator floor for the hyperbolic saturator, keeping the pole out of
/// reach of any bounded input.
const POLE_CLAMP: f64 = 0.05;

/// Run the distortion stage on one channel.
///
/// `cyclic` selects circular wraparound (single-cycle previews, THD probes)
/// versus zero-padded edges (one-shot buffers). With `distortion == 0` the
/// input passes through untouched — the identity path costs nothing.
pub fn process<F: ExternalFx>(
    input: Vec<f64>,
    patch: &Patch,
    sample_rate: f64,
    cyclic: bool,
    kernels: &mut KernelCache,
    fx: &mut F,
) -> Vec<f64> {
    if !patch.distortion_active() {
        return input;
    }

    let factor = patch.oversample_factor();
    if factor == 1 {
        let mut buf = input;
        waveshape(&mut buf, patch);
        fx.speaker_sim(&mut buf, sample_rate, patch);
        return buf;
    }

    let kernel = kernels
        .get(KernelKey {
            factor,
            stopband_db: patch.kernel_stopband_db,
            transition: patch.kernel_transition,
        })
        .clone();
    let os_rate = sample_rate * factor as f64;

    let mut up = upsample(&kernel, &input, cyclic);
    inject_ultrasonic(&mut up, patch, sample_rate, os_rate, cyclic);
    waveshape(&mut up, patch);
    fx.speaker_sim(&mut up, os_rate, patch);
    downsample(&kernel, &up, cyclic)
}

/// Human-readable summary of the oversampling configuration.
pub fn oversampling_description(patch: &Patch, kernels: &mut KernelCache) -> String {
    let factor = patch.oversample_factor();
    if factor == 1 {
        return "oversampling off".to_string();
    }
    let kernel = kernels.get(KernelKey {
        factor,
        stopband_db: patch.kernel_stopband_db,
        transition: patch.kernel_transition,
    });
    format!(
        "{factor}× oversampling, {:.0} dB stopband, {:.0}% transition, {} taps",
        patch.kernel_stopband_db,
        patch.kernel_transition * 100.0,
        kernel.taps.len()
    )
}

/// Ultrasonic probe tone: above the original Nyquist, inside the oversampled
/// one, windowed to avoid onset clicks. Skipped when the frequency cannot
/// land between the two Nyquists or the level is off.
fn inject_ultrasonic(buf: &mut [f64], patch: &Patch, base_rate: f64, os_rate: f64, cyclic: bool) {
    let amp = db_to_gain(patch.ultrasonic_level_db);
    if amp == 0.0 {
        return;
    }
    let freq = patch.ultrasonic_hz;
    if freq <= base_rate / 2.0 || freq >= os_rate / 2.0 {
        return;
    }

    let n = buf.len();
    let w = 2.0 * PI * freq / os_rate;
    if cyclic {
        // Blackman-Harris envelope over the cycle.
        let (a0, a1, a2, a3) = (0.35875, 0.48829, 0.14128, 0.01168);
        for (i, s) in buf.iter_mut().enumerate() {
            let x = 2.0 * PI * i as f64 / n as f64;
            let win = a0 - a1 * x.cos() + a2 * (2.0 * x).cos() - a3 * (3.0 * x).cos();
            *s += amp * win * (w * i as f64).sin();
        }
    } else {
        // Linear attack/decay ramps for one-shot buffers.
        let ramp = ((os_rate * 0.005) as usize).min(n / 8).max(1);
        for (i, s) in buf.iter_mut().enumerate() {
            let win = if i < ramp {
                i as f64 / ramp as f64
            } else if i >= n - ramp {
                (n - 1 - i) as f64 / ramp as f64
            } else {
                1.0
            };
            *s += amp * win * (w * i as f64).sin();
        }
    }
}

/// The fixed waveshaping chain. Do not reorder.
fn waveshape(buf: &mut [f64], patch: &Patch) {
    let d = patch.distortion;
    let asym = 0.5 * patch.asymmetry * d;
    let cheb = patch.odd_distortion * d;
    let drive = 1.0 + 4.0 * d;
    let tanh_norm = 1.0 / drive.tanh();
    let clip = 1.0 - 0.4 * d;

    for s in buf.iter_mut() {
        let mut x = *s;

        // 1. Hyperbolic asymmetric saturation, denominator clamped near the
        //    pole so large excursions saturate instead of blowing up.
        if asym != 0.0 {
            x /= (1.0 - asym * x).max(POLE_CLAMP);
        }

        // 2. 3rd-order Chebyshev odd shaping (sine convention:
        //    sin 3θ = 3 sin θ − 4 sin³ θ), blended by amount.
        if cheb != 0.0 {
            let xc = x.clamp(-1.0, 1.0);
            x = (1.0 - cheb) * x + cheb * (3.0 * xc - 4.0 * xc * xc * xc);
        }

        // 3. tanh saturation normalized so near-unity input maps to
        //    near-unity output.
        x = (drive * x).tanh() * tanh_norm;

        // 4. Hard clip with a distortion-dependent threshold.
        x = x.clamp(-clip, clip);

        *s = x;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::NoopFx;
    use crate::patch::{Patch, ZERO_LEVEL_DB};

    fn sine(n: usize, cycles: f64, amp: f64) -> Vec<f64> {
        (0..n)
            .map(|i| amp * (2.0 * PI * cycles * i as f64 / n as f64).sin())
            .collect()
    }

    #[test]
    fn zero_distortion_is_bit_exact_identity() {
        let mut p = Patch::default();
        p.distortion = 0.0;
        p.oversample = 3; // factor 8 — must still short-circuit
        let mut kernels = KernelCache::new();
        let input = sine(256, 5.0, 0.9);
        let out = process(input.clone(), &p, 48000.0, true, &mut kernels, &mut NoopFx);
        assert_eq!(out, input, "identity path must be sample-for-sample exact");
        assert!(kernels.is_empty(), "identity path must not design kernels");
    }

    #[test]
    fn distortion_changes_the_signal() {
        let mut p = Patch::default();
        p.distortion = 0.6;
        p.odd_distortion = 0.8;
        let mut kernels = KernelCache::new();
        let input = sine(256, 3.0, 0.9);
        let out = process(input.clone(), &p, 48000.0, true, &mut kernels, &mut NoopFx);
        assert_eq!(out.len(), input.len());
        let diff = input
            .iter()
            .zip(out.iter())
            .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()));
        assert!(diff > 0.01, "distortion should reshape the waveform, diff {diff}");
    }

    #[test]
    fn output_respects_clip_threshold() {
        let mut p = Patch::default();
        p.distortion = 1.0;
        let mut kernels = KernelCache::new();
        let input = sine(256, 3.0, 2.0);
        let out = process(input, &p, 48000.0, true, &mut kernels, &mut NoopFx);
        let clip = 1.0 - 0.4;
        for (i, &s) in out.iter().enumerate() {
            assert!(
                s.abs() <= clip + 1e-12,
                "sample {i} exceeds the clip threshold: {s}"
            );
        }
    }

    #[test]
    fn oversampled_output_keeps_length() {
        let mut p = Patch::default();
        p.distortion = 0.5;
        p.oversample = 2; // factor 4
        let mut kernels = KernelCache::new();
        let input = sine(512, 7.0, 0.8);
        let out = process(input.clone(), &p, 48000.0, true, &mut kernels, &mut NoopFx);
        assert_eq!(out.len(), input.len());
        assert_eq!(kernels.len(), 1, "one kernel design per parameter set");

        // Second call reuses the memoized kernel
        let _ = process(input, &p, 48000.0, true, &mut kernels, &mut NoopFx);
        assert_eq!(kernels.len(), 1);
    }

    #[test]
    fn oversampling_reduces_aliasing() {
        // A hard-driven low sine aliases odd harmonics back into the audible
        // band at 1×; at 8× the folded products are filtered out.
        let mut p = Patch::default();
        p.distortion = 1.0;
        p.odd_distortion = 1.0;
        let n = 512;
        let cycles = 101.0; // high enough that 3rd/5th harmonics fold at 1×
        let input = sine(n, cycles, 0.95);
        let mut kernels = KernelCache::new();

        p.oversample = 0;
        let plain = process(input.clone(), &p, 48000.0, true, &mut kernels, &mut NoopFx);
        p.oversample = 3;
        let oversampled = process(input, &p, 48000.0, true, &mut kernels, &mut NoopFx);

        let mut fft = crate::dsp::fft::FftCache::new();
        let mag_plain = fft.forward_magnitude(&plain).unwrap();
        let mag_os = fft.forward_magnitude(&oversampled).unwrap();

        // The 3rd harmonic of bin 101 lands at 303 → folds to 512−303 = 209.
        let folded = 512 - 303;
        assert!(
            mag_os[folded] < mag_plain[folded] * 0.5,
            "oversampling should attenuate the folded harmonic: {} vs {}",
            mag_os[folded],
            mag_plain[folded]
        );
    }

    #[test]
    fn ultrasonic_tone_lands_between_nyquists() {
        let mut p = Patch::default();
        p.distortion = 0.2;
        p.oversample = 2; // 4× → oversampled Nyquist 96 kHz
        p.ultrasonic_level_db = -20.0;
        p.ultrasonic_hz = 30000.0;
        let mut kernels = KernelCache::new();
        let input = sine(256, 3.0, 0.5);

        let with_tone = process(input.clone(), &p, 48000.0, true, &mut kernels, &mut NoopFx);
        p.ultrasonic_level_db = ZERO_LEVEL_DB;
        let without = process(input, &p, 48000.0, true, &mut kernels, &mut NoopFx);

        let diff = with_tone
            .iter()
            .zip(without.iter())
            .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()));
        assert!(diff > 1e-6, "in-band probe tone should affect the chain");
    }

    #[test]
    fn ultrasonic_skipped_when_out_of_band() {
        let mut p = Patch::default();
        p.distortion = 0.2;
        p.oversample = 0; // no headroom above the base Nyquist
        p.ultrasonic_level_db = -20.0;
        let mut kernels = KernelCache::new();
        let input = sine(256, 3.0, 0.5);
        let with_flag = process(input.clone(), &p, 48000.0, true, &mut kernels, &mut NoopFx);
        p.ultrasonic_level_db = ZERO_LEVEL_DB;
        let without = process(input, &p, 48000.0, true, &mut kernels, &mut NoopFx);
        assert_eq!(with_flag, without, "probe above the oversampled Nyquist must be skipped");
    }

    #[test]
    fn speaker_hook_runs_inside_the_chain() {
        struct Recorder {
            calls: usize,
            rate: f64,
        }
        impl ExternalFx for Recorder {
            fn speaker_sim(&mut self, _buffer: &mut [f64], sample_rate: f64, _patch: &Patch) {
                self.calls += 1;
                self.rate = sample_rate;
            }
        }

        let mut p = Patch::default();
        p.distortion = 0.3;
        p.oversample = 1; // factor 2
        let mut kernels = KernelCache::new();
        let mut fx = Recorder { calls: 0, rate: 0.0 };
        let _ = process(sine(128, 2.0, 0.5), &p, 48000.0, true, &mut kernels, &mut fx);
        assert_eq!(fx.calls, 1);
        assert_eq!(fx.rate, 96000.0, "speaker model must run at the oversampled rate");
    }

    #[test]
    fn description_reports_configuration() {
        let mut p = Patch::default();
        let mut kernels = KernelCache::new();
        assert_eq!(oversampling_description(&p, &mut kernels), "oversampling off");
        p.oversample = 2;
        let desc = oversampling_description(&p, &mut kernels);
        assert!(desc.starts_with("4× oversampling"), "unexpected description: {desc}");
        assert!(desc.contains("96 dB"), "unexpected description: {desc}");
    }
}
