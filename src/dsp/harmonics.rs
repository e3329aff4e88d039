//! Harmonic synthesizer — additive sum of fundamental, harmonics, and
//! inharmonic partials, shaped by the shared amplitude envelope and the
//! inline filter-envelope gain.
//!
//! Pure function of its inputs. Malformed numbers (NaN, negative durations)
//! are caller responsibility; the hot loop carries no defensive checks.

use std::f64::consts::PI;

use crate::dsp::envelope::FilterEnvelope;
use crate::patch::{MAX_HARMONICS, NYQUIST_MARGIN, Patch, ZERO_LEVEL, db_to_gain};
use crate::rng::SeededRng;

/// Per-harmonic introspection hook for previews. Monomorphized, so the
/// default no-op collector costs nothing in the synthesis loop.
pub trait HarmonicSink {
    fn harmonic(&mut self, index: usize, frequency: f64, amplitude: f64);
}

impl HarmonicSink for () {
    #[inline]
    fn harmonic(&mut self, _index: usize, _frequency: f64, _amplitude: f64) {}
}

/// Collects (index, frequency, amplitude) triples for spectrum previews.
#[derive(Debug, Default)]
pub struct HarmonicCollector {
    pub harmonics: Vec<(usize, f64, f64)>,
}

impl HarmonicSink for HarmonicCollector {
    fn harmonic(&mut self, index: usize, frequency: f64, amplitude: f64) {
        self.harmonics.push((index, frequency, amplitude));
    }
}

/// Number of Voss-McCartney update rows for the pink-noise generator.
const PINK_ROWS: usize = 6;

/// Balance cross-fade: squared-exponential dB law, not a linear blend.
/// At 0 only the fundamental sounds, at 1 only the upper harmonics; the
/// attenuated side reaches the zero level at the extremes, so it contributes
/// exactly nothing.
fn balance_gains(balance: f64) -> (f64, f64) {
    let b = balance.clamp(0.0, 1.0);
    let fund = db_to_gain(-(b * b) * 91.0);
    let harm = db_to_gain(-((1.0 - b) * (1.0 - b)) * 91.0);
    (fund, harm)
}

/// Sum fundamental + harmonics + inharmonic partials into a fresh buffer.
///
/// `envelope` has `length` samples and gates every partial; previews pass an
/// all-ones envelope for steady-state cycles. Partials whose level falls
/// below the zero level are skipped entirely — exact zero contribution.
pub fn synthesize_harmonics<S: HarmonicSink>(
    patch: &Patch,
    sample_rate: f64,
    length: usize,
    envelope: &[f64],
    filter_env: Option<&FilterEnvelope>,
    rng: &mut SeededRng,
    sink: &mut S,
) -> Vec<f64> {
    let mut out = vec![0.0; length];

    let channel_gain = db_to_gain(patch.level_db);
    if channel_gain == 0.0 {
        return out;
    }

    let nyquist_limit = NYQUIST_MARGIN * sample_rate / 2.0;
    let f0 = patch.fundamental();
    let (fund_gain, harm_gain) = balance_gains(patch.balance);
    let h_max = (patch.harmonic_count.max(1) as usize).min(MAX_HARMONICS);
    let duty = patch.alt_duty.max(1);

    for n in 1..=h_max {
        let f_n = f0 * n as f64;
        if f_n >= nyquist_limit {
            break;
        }

        let odd = n % 2 == 1;
        let (base, falloff, alt) = if odd {
            (patch.odd_level, patch.odd_falloff, patch.odd_alt)
        } else {
            (patch.even_level, patch.even_falloff, patch.even_alt)
        };

        let mut amp = base / (n as f64).powf(falloff);
        // Alternating-polarity pattern: every `duty` harmonics the gain walks
        // from +1 down to (1 − 2·alt), a full flip at alt = 1. The fundamental
        // always sits in an unflipped block at offset 0.
        if (n as i64 - 1 + patch.alt_offset)
            .div_euclid(duty)
            .rem_euclid(2)
            != 0
        {
            amp *= 1.0 - 2.0 * alt;
        }
        amp *= if n == 1 { fund_gain } else { harm_gain };
        amp *= channel_gain;

        if amp.abs() < ZERO_LEVEL {
            continue;
        }

        let phase0 = if patch.incoherent_phase {
            rng.uniform_range(0.0, 2.0 * PI)
        } else {
            0.0
        };
        // Group delay spreads onsets toward `group_delay`, fundamental fixed.
        let onset_s = patch.group_delay * (1.0 - 1.0 / n as f64);
        let onset = (onset_s * sample_rate).round() as usize;

        sink.harmonic(n, f_n, amp.abs());

        let w = 2.0 * PI * f_n / sample_rate;
        match filter_env {
            Some(fenv) => {
                for i in onset..length {
                    let t = (i - onset) as f64;
                    out[i] += amp
                        * fenv.gain(f_n, i)
                        * envelope[i - onset]
                        * (w * t + phase0).sin();
                }
            }
            None => {
                for i in onset..length {
                    let t = (i - onset) as f64;
                    out[i] += amp * envelope[i - onset] * (w * t + phase0).sin();
                }
            }
        }
    }

    add_inharmonics(patch, sample_rate, length, envelope, channel_gain, &mut out);
    add_noise(patch, length, envelope, channel_gain, rng, &mut out);

    out
}

/// Fixed-Hz, equal-tempered, and just-intonation extra partials.
fn add_inharmonics(
    patch: &Patch,
    sample_rate: f64,
    length: usize,
    envelope: &[f64],
    channel_gain: f64,
    out: &mut [f64],
) {
    let f0 = patch.fundamental();
    let et_freq = f0 * (patch.et_semitones / 12.0).exp2();
    let just_freq = f0 * patch.just_numerator as f64 / patch.just_denominator.max(1) as f64;
    let partials = [
        (patch.tone_hz, patch.tone_level_db),
        (et_freq, patch.et_level_db),
        (just_freq, patch.just_level_db),
    ];

    let nyquist_limit = NYQUIST_MARGIN * sample_rate / 2.0;
    for (freq, level_db) in partials {
        let amp = db_to_gain(level_db) * channel_gain;
        if amp < ZERO_LEVEL || freq <= 0.0 || freq >= nyquist_limit {
            continue;
        }
        let w = 2.0 * PI * freq / sample_rate;
        for i in 0..length {
            out[i] += amp * envelope[i] * (w * i as f64).sin();
        }
    }
}

/// Colored noise: 6-row Voss-McCartney pink blended with white, gated by the
/// shared envelope.
fn add_noise(
    patch: &Patch,
    length: usize,
    envelope: &[f64],
    channel_gain: f64,
    rng: &mut SeededRng,
    out: &mut [f64],
) {
    let amp = db_to_gain(patch.noise_level_db) * channel_gain;
    if amp < ZERO_LEVEL {
        return;
    }
    let color = patch.noise_color.clamp(0.0, 1.0);
    let mut rows = [0.0_f64; PINK_ROWS];
    for (i, o) in out.iter_mut().enumerate().take(length) {
        let tz = (i + 1).trailing_zeros() as usize;
        if tz < PINK_ROWS {
            rows[tz] = rng.uniform_range(-1.0, 1.0);
        }
        let white = rng.uniform_range(-1.0, 1.0);
        let pink = (rows.iter().sum::<f64>() + white) / (PINK_ROWS + 1) as f64;
        let sample = color * pink + (1.0 - color) * white;
        *o += amp * envelope[i] * sample;
    }
}
