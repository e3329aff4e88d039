//! Resampling kernels — Kaiser windowed-sinc prototypes with polyphase
//! decomposition for integer-factor up/downsampling.
//!
//! Kernels are memoized in a [`KernelCache`] keyed by (factor, stopband,
//! transition) and regenerated only when the key changes. Each cache entry
//! checks its own key, never another cache's.

/// Parameters that fully determine a kernel design.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelKey {
    /// Integer resampling factor.
    pub factor: usize,
    /// Stopband attenuation in dB.
    pub stopband_db: f64,
    /// Transition bandwidth as a fraction of the passband edge.
    pub transition: f64,
}

/// A symmetric windowed-sinc FIR plus its polyphase sub-kernels.
#[derive(Debug, Clone)]
pub struct ResamplingKernel {
    pub key: KernelKey,
    /// Prototype low-pass taps, DC gain normalized to 1.
    pub taps: Vec<f64>,
    /// Polyphase split: `phases[p][k] = taps[k * factor + p]`.
    pub phases: Vec<Vec<f64>>,
    /// Index of the symmetry center, `(taps.len() - 1) / 2`.
    pub center: usize,
}

impl ResamplingKernel {
    fn design(key: KernelKey) -> Self {
        let factor = key.factor.max(1);
        // Passband edge at the target Nyquist, pulled in by half the
        // transition band; the band itself straddles the edge.
        let edge = 0.5 / factor as f64;
        let cutoff = edge * (1.0 - key.transition / 2.0);
        let width = (edge * key.transition).max(1e-4);

        // Kaiser tap estimate: N ≈ (A − 7.95) / (2.285 · Δω).
        let a = key.stopband_db.max(21.0);
        let est = (a - 7.95) / (2.285 * 2.0 * std::f64::consts::PI * width);
        let mut len = est.ceil() as usize + 1;
        if len % 2 == 0 {
            len += 1; // odd length keeps the center on a tap
        }
        let center = (len - 1) / 2;
        let beta = kaiser_beta(a);
        let i0_beta = bessel_i0(beta);

        let mut taps = Vec::with_capacity(len);
        for n in 0..len {
            let x = n as f64 - center as f64;
            let s = sinc(2.0 * cutoff * x) * 2.0 * cutoff;
            let r = 2.0 * n as f64 / (len - 1) as f64 - 1.0;
            let w = bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / i0_beta;
            taps.push(s * w);
        }
        let sum: f64 = taps.iter().sum();
        for t in taps.iter_mut() {
            *t /= sum;
        }

        let mut phases = vec![Vec::new(); factor];
        for (n, &t) in taps.iter().enumerate() {
            phases[n % factor].push(t);
        }

        ResamplingKernel {
            key,
            taps,
            phases,
            center,
        }
    }

    /// Group delay of the prototype in output-rate samples at unit factor.
    pub fn delay(&self) -> f64 {
        self.center as f64
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    }
}

/// Kaiser β from stopband attenuation (Kaiser's empirical formula).
fn kaiser_beta(a: f64) -> f64 {
    if a > 50.0 {
        0.1102 * (a - 8.7)
    } else if a >= 21.0 {
        0.5842 * (a - 21.0).powf(0.4) + 0.07886 * (a - 21.0)
    } else {
        0.0
    }
}

/// Zeroth-order modified Bessel function of the first kind, by power series.
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    let mut k = 1.0;
    loop {
        term *= (half / k) * (half / k);
        sum += term;
        if term < sum * 1e-12 {
            return sum;
        }
        k += 1.0;
    }
}

/// Memoized kernels keyed by (factor, stopband, transition).
///
/// A handful of designs exist per session, so a linear scan is cheaper than
/// hashing float keys. Redundant recomputation across independent contexts is
/// tolerated; entries are immutable once built.
pub struct KernelCache {
    entries: Vec<ResamplingKernel>,
}

impl Default for KernelCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelCache {
    pub fn new() -> Self {
        KernelCache {
            entries: Vec::new(),
        }
    }

    /// Fetch the kernel for `key`, designing it on first use.
    pub fn get(&mut self, key: KernelKey) -> &ResamplingKernel {
        if let Some(pos) = self.entries.iter().position(|k| k.key == key) {
            return &self.entries[pos];
        }
        self.entries.push(ResamplingKernel::design(key));
        self.entries.last().unwrap()
    }

    /// Number of distinct designs currently memoized.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[inline]
fn sample_at(input: &[f64], idx: isize, cyclic: bool) -> f64 {
    if cyclic {
        let n = input.len() as isize;
        input[idx.rem_euclid(n) as usize]
    } else if idx < 0 || idx >= input.len() as isize {
        0.0
    } else {
        input[idx as usize]
    }
}

/// Upsample by the kernel's factor: zero-stuffing + centered polyphase FIR,
/// gain = factor. Cyclic buffers wrap; one-shot buffers see zero-padded edges.
pub fn upsample(kernel: &ResamplingKernel, input: &[f64], cyclic: bool) -> Vec<f64> {
    let factor = kernel.key.factor;
    if factor <= 1 {
        return input.to_vec();
    }
    let n = input.len();
    let center = kernel.center as isize;
    let taps = &kernel.taps;
    let mut out = vec![0.0; n * factor];
    for (j, o) in out.iter_mut().enumerate() {
        // Only taps aligned with an original sample contribute.
        let aligned = (j as isize + center).rem_euclid(factor as isize) as usize;
        let mut acc = 0.0;
        let mut m = aligned;
        while m < taps.len() {
            let q = (j as isize + center - m as isize) / factor as isize;
            acc += taps[m] * sample_at(input, q, cyclic);
            m += factor;
        }
        *o = acc * factor as f64;
    }
    out
}

/// Downsample by the kernel's factor with a centered FIR, so an
/// upsample/downsample round trip introduces no net delay.
pub fn downsample(kernel: &ResamplingKernel, input: &[f64], cyclic: bool) -> Vec<f64> {
    let factor = kernel.key.factor;
    if factor <= 1 {
        return input.to_vec();
    }
    let n_out = input.len() / factor;
    let center = kernel.center as isize;
    let taps = &kernel.taps;
    let mut out = vec![0.0; n_out];
    for (i, o) in out.iter_mut().enumerate() {
        let base = (i * factor) as isize + center;
        let mut acc = 0.0;
        for (m, &t) in taps.iter().enumerate() {
            acc += t * sample_at(input, base - m as isize, cyclic);
        }
        *o = acc;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn key(factor: usize) -> KernelKey {
        KernelKey {
            factor,
            stopband_db: 96.0,
            transition: 0.2,
        }
    }

    #[test]
    fn kernel_is_memoized_by_key() {
        let mut cache = KernelCache::new();
        cache.get(key(4));
        cache.get(key(4));
        assert_eq!(cache.len(), 1, "same key must not rebuild");
        cache.get(key(8));
        assert_eq!(cache.len(), 2);
        cache.get(KernelKey {
            factor: 4,
            stopband_db: 120.0,
            transition: 0.2,
        });
        assert_eq!(cache.len(), 3, "changed stopband is a new design");
    }

    #[test]
    fn prototype_is_symmetric_unity_dc() {
        let mut cache = KernelCache::new();
        let k = cache.get(key(4));
        let sum: f64 = k.taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12, "DC gain should be 1, got {sum}");
        let n = k.taps.len();
        for i in 0..n / 2 {
            assert!(
                (k.taps[i] - k.taps[n - 1 - i]).abs() < 1e-12,
                "kernel should be symmetric at tap {i}"
            );
        }
        let total: usize = k.phases.iter().map(|p| p.len()).sum();
        assert_eq!(total, n, "polyphase split must cover every tap");
    }

    #[test]
    fn cyclic_round_trip_preserves_passband_sine() {
        let mut cache = KernelCache::new();
        let k = cache.get(key(4)).clone();
        let n = 256;
        let signal: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 5.0 * i as f64 / n as f64).sin())
            .collect();
        let up = upsample(&k, &signal, true);
        assert_eq!(up.len(), n * 4);
        let down = downsample(&k, &up, true);
        assert_eq!(down.len(), n);
        let err = signal
            .iter()
            .zip(down.iter())
            .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()));
        assert!(err < 1e-3, "cyclic round trip error too large: {err}");
    }

    #[test]
    fn upsampled_sine_stays_band_limited() {
        // Zero-stuffing images must be attenuated by the kernel.
        let mut cache = KernelCache::new();
        let k = cache.get(key(4)).clone();
        let n = 128;
        let signal: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 3.0 * i as f64 / n as f64).sin())
            .collect();
        let up = upsample(&k, &signal, true);
        // The oversampled waveform should be smooth: successive-sample steps
        // bounded by the continuous slope of the original sine.
        let max_step = up
            .windows(2)
            .fold(0.0_f64, |acc, w| acc.max((w[1] - w[0]).abs()));
        let bound = 2.0 * PI * 3.0 / n as f64 * 2.0;
        assert!(
            max_step < bound,
            "oversampled sine too jagged: step {max_step} vs bound {bound}"
        );
    }

    #[test]
    fn one_shot_edges_are_padded_not_wrapped() {
        let mut cache = KernelCache::new();
        let k = cache.get(key(2)).clone();
        let mut signal = vec![0.0; 64];
        signal[63] = 1.0;
        let up = upsample(&k, &signal, false);
        // Nothing from the tail may wrap to the head.
        let head_energy: f64 = up[..8].iter().map(|s| s * s).sum();
        assert!(
            head_energy < 1e-12,
            "one-shot upsampling must not wrap: head energy {head_energy}"
        );
    }
}
