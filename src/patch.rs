//! Patch parameter schema.
//!
//! A `Patch` describes one test sound: harmonic structure, envelope, filter
//! sweep, distortion, oversampling, and jitter settings. All callers (WASM
//! facade, native hosts, tests) use the same struct.
//!
//! Uses `#[serde(default)]` so sparse patch JSON loads correctly — missing
//! keys get default values, unknown keys are ignored. Levels are in dB and
//! anything at or below [`ZERO_LEVEL_DB`] is exactly "off", not merely quiet.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::PatchError;

/// Global silence threshold in dB. Partials, spectrum bins, and null-test
/// residuals at or below this level are treated as exactly zero.
pub const ZERO_LEVEL_DB: f64 = -91.0;

/// Linear amplitude of [`ZERO_LEVEL_DB`] (10^(-91/20)).
pub const ZERO_LEVEL: f64 = 2.8183829312644538e-5;

/// Exponential decay runs for `DECAY_TAIL × decay` seconds, calibrated so the
/// tail lands on the zero level exactly at the end of the buffer.
pub const DECAY_TAIL: f64 = 1.4;

/// Available oversampling factors; `Patch::oversample` indexes this table and
/// index 0 means the distortion stage runs at the base rate.
pub const OVERSAMPLE_FACTORS: [usize; 5] = [1, 2, 4, 8, 16];

/// Harmonics above this index are never summed, whatever the sample rate.
pub const MAX_HARMONICS: usize = 2000;

/// Harmonics are kept strictly below `NYQUIST_MARGIN × Nyquist` so the
/// distortion stage has headroom before products alias.
pub const NYQUIST_MARGIN: f64 = 0.95;

/// Convert a dB level to linear gain. At or below the zero level the result
/// is exactly 0.0 so "off" short-circuits downstream work.
pub fn db_to_gain(db: f64) -> f64 {
    if db <= ZERO_LEVEL_DB {
        0.0
    } else {
        10.0_f64.powf(db / 20.0)
    }
}

/// Convert a linear amplitude to dB, clamped at the zero level so silence
/// reports a finite floor instead of -inf.
pub fn gain_to_db(gain: f64) -> f64 {
    20.0 * gain.abs().max(ZERO_LEVEL).log10()
}

/// Accept both `3` and `3.0` from JSON, truncate to i64.
fn as_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let v: serde_json::Value = Deserialize::deserialize(d)?;
    match &v {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| serde::de::Error::custom(format!("cannot convert {n} to i64"))),
        _ => Err(serde::de::Error::custom(format!("expected number, got {v}"))),
    }
}

/// All synthesis parameters for one channel.
///
/// Cloned (never mutated in place) when a routine needs a trial override,
/// e.g. the preview path snapping `frequency` to a whole FFT cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Patch {
    // --- Tone ---
    /// Fundamental frequency in Hz.
    pub frequency: f64,
    /// Fine offset added to the fundamental, in Hz.
    pub frequency_fine: f64,
    /// Channel level in dB (0 = unity).
    pub level_db: f64,
    /// Output polarity, +1.0 or -1.0.
    pub polarity: f64,
    /// Static attenuation applied at assembly time, in dB.
    pub attenuation_db: f64,

    // --- Amplitude envelope ---
    /// Attack ramp duration in seconds.
    pub attack: f64,
    /// Hold duration at full level in seconds.
    pub hold: f64,
    /// Decay parameter in seconds; the tail runs `DECAY_TAIL ×` this long.
    pub decay: f64,
    /// One-pole smoothing time constant for the envelope, in milliseconds.
    pub smoothing_ms: f64,

    // --- Harmonic structure ---
    /// Cap on the number of harmonics summed (further capped by Nyquist).
    #[serde(deserialize_with = "as_i64")]
    pub harmonic_count: i64,
    /// Base level of odd harmonics (linear, 0..1; fundamental counts as odd).
    pub odd_level: f64,
    /// Base level of even harmonics (linear, 0..1).
    pub even_level: f64,
    /// Power-law falloff exponent for odd harmonics (level ∝ 1/n^k).
    pub odd_falloff: f64,
    /// Power-law falloff exponent for even harmonics.
    pub even_falloff: f64,
    /// Alternating-polarity depth for odd harmonics, 0 (off) .. 1 (full flip).
    pub odd_alt: f64,
    /// Alternating-polarity depth for even harmonics.
    pub even_alt: f64,
    /// Run length of the alternation pattern, in harmonics.
    #[serde(deserialize_with = "as_i64")]
    pub alt_duty: i64,
    /// Offset of the alternation pattern, in harmonics.
    #[serde(deserialize_with = "as_i64")]
    pub alt_offset: i64,
    /// Fundamental vs. harmonics cross-fade, 0..1: 0 leaves the fundamental
    /// alone, 1 only the upper harmonics, blended by a squared-exponential
    /// dB law (not linear).
    pub balance: f64,
    /// Per-harmonic onset spread in seconds; harmonic n starts at
    /// `group_delay × (1 − 1/n)`.
    pub group_delay: f64,
    /// When true, each harmonic gets a random initial phase from the call's
    /// PRNG stream instead of the coherent sine-aligned start.
    pub incoherent_phase: bool,

    // --- Filter envelope ---
    /// Enables the time-varying resonant filter envelope.
    pub filter_enabled: bool,
    /// Resting filter cutoff in Hz.
    pub filter_cutoff: f64,
    /// Resonance amount 0..1 (mapped to a peak at the cutoff).
    pub filter_resonance: f64,
    /// Filter envelope attack in seconds.
    pub filter_attack: f64,
    /// Filter envelope decay in seconds.
    pub filter_decay: f64,
    /// Filter envelope depth in octaves above the resting cutoff.
    pub filter_env_octaves: f64,

    // --- Inharmonic partials ---
    /// Fixed-frequency extra tone in Hz (0 disables regardless of level).
    pub tone_hz: f64,
    /// Level of the fixed tone in dB; ≤ -91 is off.
    pub tone_level_db: f64,
    /// Equal-tempered offset from the fundamental, in semitones.
    pub et_semitones: f64,
    /// Level of the equal-tempered partial in dB; ≤ -91 is off.
    pub et_level_db: f64,
    /// Just-intonation ratio numerator.
    #[serde(deserialize_with = "as_i64")]
    pub just_numerator: i64,
    /// Just-intonation ratio denominator.
    #[serde(deserialize_with = "as_i64")]
    pub just_denominator: i64,
    /// Level of the just-intonation partial in dB; ≤ -91 is off.
    pub just_level_db: f64,
    /// Noise level in dB; ≤ -91 is off.
    pub noise_level_db: f64,
    /// Noise color: 0 = white, 1 = pink (Voss-McCartney), blended between.
    pub noise_color: f64,
    /// Gain for an externally supplied sample buffer mixed into the channel.
    pub sample_mix: f64,

    // --- Distortion ---
    /// Master distortion amount 0..1; 0 bypasses the nonlinear stage.
    pub distortion: f64,
    /// Odd-harmonic (3rd-order Chebyshev) shaping amount 0..1.
    pub odd_distortion: f64,
    /// Asymmetry of the hyperbolic saturator, 0..1.
    pub asymmetry: f64,
    /// Index into [`OVERSAMPLE_FACTORS`]; 0 = no oversampling.
    #[serde(deserialize_with = "as_i64")]
    pub oversample: i64,
    /// Stopband attenuation of the resampling kernel, in dB.
    pub kernel_stopband_db: f64,
    /// Transition bandwidth of the resampling kernel, as a fraction of the
    /// passband edge.
    pub kernel_transition: f64,
    /// Ultrasonic probe tone level in dB; ≤ -91 is off.
    pub ultrasonic_level_db: f64,
    /// Ultrasonic probe tone frequency in Hz; must land above the original
    /// Nyquist and below the oversampled one, or it is skipped.
    pub ultrasonic_hz: f64,

    // --- Jitter ---
    /// ADC read-clock jitter, RMS fraction of a sample period.
    pub jitter_adc: f64,
    /// DAC reconstruction jitter, RMS fraction of a sample period.
    pub jitter_dac: f64,
    /// Periodic (sinusoidal) jitter amplitude, fraction of a sample period.
    pub jitter_periodic: f64,
    /// Periodic jitter frequency in Hz.
    pub jitter_periodic_hz: f64,
    /// PRNG seed for this patch; identical seeds replay identical jitter
    /// and noise, which null tests rely on.
    #[serde(deserialize_with = "as_i64")]
    pub seed: i64,
}

impl Default for Patch {
    fn default() -> Self {
        Self {
            // Tone
            frequency: 440.0,
            frequency_fine: 0.0,
            level_db: 0.0,
            polarity: 1.0,
            attenuation_db: 0.0,
            // Envelope
            attack: 0.01,
            hold: 0.0,
            decay: 0.5,
            smoothing_ms: 0.5,
            // Harmonics
            harmonic_count: MAX_HARMONICS as i64,
            odd_level: 1.0,
            even_level: 0.0,
            odd_falloff: 1.0,
            even_falloff: 1.0,
            odd_alt: 0.0,
            even_alt: 0.0,
            alt_duty: 1,
            alt_offset: 0,
            balance: 0.0,
            group_delay: 0.0,
            incoherent_phase: false,
            // Filter
            filter_enabled: false,
            filter_cutoff: 2000.0,
            filter_resonance: 0.0,
            filter_attack: 0.0,
            filter_decay: 0.3,
            filter_env_octaves: 0.0,
            // Inharmonics
            tone_hz: 0.0,
            tone_level_db: ZERO_LEVEL_DB,
            et_semitones: 0.0,
            et_level_db: ZERO_LEVEL_DB,
            just_numerator: 1,
            just_denominator: 1,
            just_level_db: ZERO_LEVEL_DB,
            noise_level_db: ZERO_LEVEL_DB,
            noise_color: 1.0,
            sample_mix: 0.0,
            // Distortion
            distortion: 0.0,
            odd_distortion: 0.0,
            asymmetry: 0.0,
            oversample: 0,
            kernel_stopband_db: 96.0,
            kernel_transition: 0.2,
            ultrasonic_level_db: ZERO_LEVEL_DB,
            ultrasonic_hz: 30000.0,
            // Jitter
            jitter_adc: 0.0,
            jitter_dac: 0.0,
            jitter_periodic: 0.0,
            jitter_periodic_hz: 120.0,
            seed: 1,
        }
    }
}

impl Patch {
    /// Parse from JSON. Missing keys get defaults; unknown keys are ignored.
    pub fn from_json(json: &str) -> Result<Self, PatchError> {
        serde_json::from_str(json).map_err(|e| PatchError::InvalidJson {
            message: e.to_string(),
        })
    }

    /// Effective fundamental frequency including the fine offset.
    pub fn fundamental(&self) -> f64 {
        self.frequency + self.frequency_fine
    }

    /// Oversampling factor selected by the `oversample` index.
    pub fn oversample_factor(&self) -> usize {
        let idx = self.oversample.clamp(0, OVERSAMPLE_FACTORS.len() as i64 - 1) as usize;
        OVERSAMPLE_FACTORS[idx]
    }

    /// Envelope duration in seconds: attack + hold + full decay tail.
    pub fn envelope_duration(&self) -> f64 {
        self.attack + self.hold + DECAY_TAIL * self.decay
    }

    /// True when the nonlinear stage would change the signal at all.
    pub fn distortion_active(&self) -> bool {
        self.distortion > 0.0
    }

    /// True when any jitter term is nonzero.
    pub fn jitter_active(&self) -> bool {
        self.jitter_adc > 0.0 || self.jitter_dac > 0.0 || self.jitter_periodic > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_patch() {
        let p = Patch::default();
        assert_eq!(p.frequency, 440.0);
        assert_eq!(p.oversample, 0);
        assert_eq!(p.oversample_factor(), 1);
        assert!(!p.distortion_active());
        assert!(!p.jitter_active());
    }

    #[test]
    fn sparse_json_load() {
        let p = Patch::from_json(r#"{"frequency": 220.0, "distortion": 0.5}"#).unwrap();
        assert_eq!(p.frequency, 220.0);
        assert_eq!(p.distortion, 0.5);
        // Missing fields fall back to defaults
        assert_eq!(p.attack, 0.01);
        assert_eq!(p.seed, 1);
    }

    #[test]
    fn unknown_keys_ignored() {
        let p = Patch::from_json(r#"{"frequency": 100.0, "sliderColor": "red"}"#).unwrap();
        assert_eq!(p.frequency, 100.0);
    }

    #[test]
    fn numeric_coercion() {
        // Integer fields accept floats (the UI sends slider values as f64)
        let p = Patch::from_json(r#"{"oversample": 2.0, "harmonic_count": 64.0}"#).unwrap();
        assert_eq!(p.oversample, 2);
        assert_eq!(p.harmonic_count, 64);
        assert_eq!(p.oversample_factor(), 4);
    }

    #[test]
    fn zero_level_is_exactly_off() {
        assert_eq!(db_to_gain(ZERO_LEVEL_DB), 0.0);
        assert_eq!(db_to_gain(-200.0), 0.0);
        assert!(db_to_gain(ZERO_LEVEL_DB + 0.1) > 0.0);
        assert!((db_to_gain(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn gain_to_db_clamps_silence() {
        let floor = gain_to_db(0.0);
        assert!((floor - ZERO_LEVEL_DB).abs() < 1e-9, "floor should be the zero level, got {floor}");
        assert!((gain_to_db(1.0) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn envelope_duration_scenario() {
        let mut p = Patch::default();
        p.attack = 0.01;
        p.hold = 0.1;
        p.decay = 0.2;
        let len = (48000.0 * p.envelope_duration()).round() as usize;
        assert_eq!(len, 18720);
    }
}
