//! Spectral transform — radix-2 FFT with cached per-size tables.
//!
//! Each supported power-of-two size gets a bit-reversal table and a full-cycle
//! sine lookup, built once and memoized in an explicit [`FftCache`] owned by
//! the session context (no global state).
//!
//! Phase convention: zero phase corresponds to a pure **sine** reference, not
//! cosine. Downstream phase arithmetic (previews, null-test displays) assumes
//! this and it must propagate unchanged.

use std::collections::HashMap;

use crate::patch::ZERO_LEVEL;

/// Smallest supported transform size.
pub const MIN_FFT_SIZE: usize = 128;
/// Largest supported transform size.
pub const MAX_FFT_SIZE: usize = 65536;

/// Magnitude (and optionally phase) of the positive-frequency half spectrum.
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// Amplitude per bin, scaled so a unit sine reports 1.0 at its bin.
    pub magnitude: Vec<f64>,
    /// Sine-referenced phase per bin; exactly 0.0 where the magnitude is
    /// below the zero level.
    pub phase: Option<Vec<f64>>,
}

/// Precomputed tables for one transform size.
pub struct FftTables {
    size: usize,
    bitrev: Vec<usize>,
    /// sin(2π k / size) for k in 0..size; cosines read at a quarter offset.
    sin: Vec<f64>,
}

impl FftTables {
    fn build(size: usize) -> Self {
        let bits = size.trailing_zeros();
        let mut bitrev = vec![0usize; size];
        for (i, r) in bitrev.iter_mut().enumerate() {
            *r = i.reverse_bits() >> (usize::BITS - bits);
        }
        let step = 2.0 * std::f64::consts::PI / size as f64;
        let sin = (0..size).map(|k| (k as f64 * step).sin()).collect();
        FftTables { size, bitrev, sin }
    }

    #[inline]
    fn twiddle(&self, k: usize) -> (f64, f64) {
        let cos = self.sin[(k + self.size / 4) % self.size];
        (cos, self.sin[k])
    }
}

/// Memoized FFT tables keyed by size. Owned by a session-scoped context;
/// independent contexts may redundantly rebuild the same tables, which is
/// harmless because the tables are pure functions of the size.
pub struct FftCache {
    tables: HashMap<usize, FftTables>,
}

impl Default for FftCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FftCache {
    pub fn new() -> Self {
        FftCache {
            tables: HashMap::new(),
        }
    }

    /// Whether `size` is a supported transform size.
    pub fn supported(size: usize) -> bool {
        size.is_power_of_two() && (MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&size)
    }

    fn tables(&mut self, size: usize) -> Option<&FftTables> {
        if !Self::supported(size) {
            return None;
        }
        Some(self.tables.entry(size).or_insert_with(|| FftTables::build(size)))
    }

    /// Forward transform of a real signal to raw complex bins.
    ///
    /// Returns `None` for unsupported sizes rather than panicking.
    pub fn forward_complex(&mut self, signal: &[f64]) -> Option<(Vec<f64>, Vec<f64>)> {
        let t = self.tables(signal.len())?;
        let mut re = signal.to_vec();
        let mut im = vec![0.0; signal.len()];
        fft_in_place(&mut re, &mut im, t, false);
        Some((re, im))
    }

    /// Forward transform to magnitude and sine-referenced phase (length N/2).
    pub fn forward(&mut self, signal: &[f64]) -> Option<Spectrum> {
        let n = signal.len();
        let (re, im) = self.forward_complex(signal)?;
        let half = n / 2;
        let mut magnitude = Vec::with_capacity(half);
        let mut phase = Vec::with_capacity(half);
        for k in 0..half {
            let scale = if k == 0 { 1.0 / n as f64 } else { 2.0 / n as f64 };
            let mag = (re[k] * re[k] + im[k] * im[k]).sqrt() * scale;
            magnitude.push(mag);
            // Noise-floor bins get an exact zero phase, never atan2 garbage.
            if mag < ZERO_LEVEL {
                phase.push(0.0);
            } else {
                phase.push(re[k].atan2(-im[k]));
            }
        }
        Some(Spectrum {
            magnitude,
            phase: Some(phase),
        })
    }

    /// Forward transform to magnitude only — skips the atan2 per bin.
    pub fn forward_magnitude(&mut self, signal: &[f64]) -> Option<Vec<f64>> {
        let n = signal.len();
        let (re, im) = self.forward_complex(signal)?;
        let half = n / 2;
        let mut magnitude = Vec::with_capacity(half);
        for k in 0..half {
            let scale = if k == 0 { 1.0 / n as f64 } else { 2.0 / n as f64 };
            magnitude.push((re[k] * re[k] + im[k] * im[k]).sqrt() * scale);
        }
        Some(magnitude)
    }

    /// Inverse transform from raw complex bins back to a real signal.
    pub fn inverse(&mut self, re: &[f64], im: &[f64]) -> Option<Vec<f64>> {
        if re.len() != im.len() {
            return None;
        }
        let t = self.tables(re.len())?;
        let mut wre = re.to_vec();
        let mut wim = im.to_vec();
        fft_in_place(&mut wre, &mut wim, t, true);
        Some(wre)
    }

    /// Inverse transform from a magnitude-only half spectrum (length N/2),
    /// mirrored to a full conjugate-symmetric spectrum with sine phase.
    pub fn inverse_magnitude(&mut self, magnitude: &[f64]) -> Option<Vec<f64>> {
        let n = magnitude.len() * 2;
        if !Self::supported(n) {
            return None;
        }
        let mut re = vec![0.0; n];
        let mut im = vec![0.0; n];
        // A·sin(2πkn/N) forward-transforms to X[k] = -i·A·N/2, X[N-k] = conj.
        re[0] = magnitude[0] * n as f64;
        for (k, &mag) in magnitude.iter().enumerate().skip(1) {
            let a = mag * n as f64 / 2.0;
            im[k] = -a;
            im[n - k] = a;
        }
        self.inverse(&re, &im)
    }
}

/// Iterative radix-2 Cooley-Tukey on bit-reversed data.
fn fft_in_place(re: &mut [f64], im: &mut [f64], t: &FftTables, inverse: bool) {
    let n = re.len();
    for i in 0..n {
        let j = t.bitrev[i];
        if j > i {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let stride = n / len;
        for start in (0..n).step_by(len) {
            for k in 0..half {
                let (cos, sin) = t.twiddle(k * stride);
                // Forward kernel is e^{-iθ}; inverse flips the sign.
                let wim = if inverse { sin } else { -sin };
                let i0 = start + k;
                let i1 = i0 + half;
                let tr = re[i1] * cos - im[i1] * wim;
                let ti = re[i1] * wim + im[i1] * cos;
                re[i1] = re[i0] - tr;
                im[i1] = im[i0] - ti;
                re[i0] += tr;
                im[i0] += ti;
            }
        }
        len *= 2;
    }

    if inverse {
        let scale = 1.0 / n as f64;
        for i in 0..n {
            re[i] *= scale;
            im[i] *= scale;
        }
    }
}
