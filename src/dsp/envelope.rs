//! Envelope generation — amplitude trajectory and the time-varying resonant
//! filter envelope with its transition-band magnitude lookup.

use crate::patch::{DECAY_TAIL, Patch, ZERO_LEVEL};

/// Decay rate constant: the exponential tail hits the zero level exactly at
/// `DECAY_TAIL × decay` seconds after the hold ends.
fn decay_rate() -> f64 {
    (1.0 / ZERO_LEVEL).ln() / DECAY_TAIL
}

/// Per-sample amplitude trajectory: linear attack ramp → hold → exponential
/// decay, then band-limited by one-pole smoothing so the onset carries no
/// spectral splatter. Shared by every partial of a channel.
pub fn amplitude_envelope(patch: &Patch, sample_rate: f64, length: usize) -> Vec<f64> {
    shaped_envelope(
        patch.attack,
        patch.hold,
        patch.decay,
        patch.smoothing_ms,
        sample_rate,
        length,
    )
}

fn shaped_envelope(
    attack: f64,
    hold: f64,
    decay: f64,
    smoothing_ms: f64,
    sample_rate: f64,
    length: usize,
) -> Vec<f64> {
    let rate = decay_rate();
    let decay_start = attack + hold;
    let mut env = Vec::with_capacity(length);
    for i in 0..length {
        let t = i as f64 / sample_rate;
        let v = if t < attack {
            t / attack
        } else if t < decay_start {
            1.0
        } else if decay > 0.0 {
            (-(t - decay_start) * rate / decay).exp()
        } else {
            0.0
        };
        env.push(v);
    }

    if smoothing_ms > 0.0 {
        let c = 1.0 - (-1.0 / (sample_rate * smoothing_ms * 1e-3)).exp();
        let mut y = 0.0;
        for v in env.iter_mut() {
            y += c * (*v - y);
            *v = y;
        }
    }
    env
}

const FILTER_TABLE_SIZE: usize = 512;
/// Lookup span in octaves around the cutoff.
const FILTER_TABLE_OCTAVES: f64 = 4.0;

/// Time-varying resonant low-pass applied inline while summing harmonics.
///
/// Instead of convolving, each harmonic reads a per-sample gain from a
/// precomputed transition-band magnitude table indexed by log2(f / cutoff).
/// Valid because the cutoff trajectory varies slowly against one cycle; the
/// accuracy trade-off is deliberate and documented here.
pub struct FilterEnvelope {
    /// Cutoff in Hz per output sample.
    cutoff: Vec<f64>,
    /// Second-order low-pass magnitude over log2(f/fc) in ±FILTER_TABLE_OCTAVES.
    table: Vec<f64>,
}

impl FilterEnvelope {
    pub fn build(patch: &Patch, sample_rate: f64, length: usize) -> FilterEnvelope {
        let rate = decay_rate();
        let mut cutoff = Vec::with_capacity(length);
        for i in 0..length {
            let t = i as f64 / sample_rate;
            let env = if t < patch.filter_attack {
                t / patch.filter_attack
            } else if patch.filter_decay > 0.0 {
                (-(t - patch.filter_attack) * rate / patch.filter_decay).exp()
            } else {
                0.0
            };
            let fc = patch.filter_cutoff * (env * patch.filter_env_octaves).exp2();
            cutoff.push(fc.min(sample_rate / 2.0));
        }

        // Resonance 0..1 maps to Q from Butterworth up to a sharp peak.
        let q = 0.707 + patch.filter_resonance.clamp(0.0, 1.0) * 9.3;
        let mut table = Vec::with_capacity(FILTER_TABLE_SIZE);
        for i in 0..FILTER_TABLE_SIZE {
            let x = -FILTER_TABLE_OCTAVES
                + 2.0 * FILTER_TABLE_OCTAVES * i as f64 / (FILTER_TABLE_SIZE - 1) as f64;
            let r = x.exp2();
            let d = (1.0 - r * r).powi(2) + (r / q).powi(2);
            table.push(1.0 / d.sqrt());
        }

        FilterEnvelope { cutoff, table }
    }

    /// Gain for a partial at `frequency` Hz at output sample `index`.
    #[inline]
    pub fn gain(&self, frequency: f64, index: usize) -> f64 {
        // Cutoff clamped before the log so a swept-to-zero filter never
        // divides by zero.
        let fc = self.cutoff[index].max(ZERO_LEVEL);
        let x = (frequency / fc).log2();
        let pos = (x + FILTER_TABLE_OCTAVES) / (2.0 * FILTER_TABLE_OCTAVES)
            * (FILTER_TABLE_SIZE - 1) as f64;
        if pos <= 0.0 {
            return self.table[0];
        }
        if pos >= (FILTER_TABLE_SIZE - 1) as f64 {
            return self.table[FILTER_TABLE_SIZE - 1];
        }
        let i = pos as usize;
        let frac = pos - i as f64;
        self.table[i] + (self.table[i + 1] - self.table[i]) * frac
    }

    /// Length of the cutoff trajectory in samples.
    pub fn len(&self) -> usize {
        self.cutoff.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cutoff.is_empty()
    }
}
