//! Sample buffers — planar single-precision audio owned by one synthesis call.

use crate::patch::gain_to_db;

/// A finite buffer of synthesized audio, one `Vec<f32>` per channel.
///
/// The buffer is sized up front from the worst-case envelope, pre-delay and
/// filter-delay duration so the signal decays below the zero level before the
/// end — no truncation click.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub sample_rate: u32,
    /// Planar channel data; all channels have equal length.
    pub data: Vec<Vec<f32>>,
}

impl SampleBuffer {
    /// Allocate a silent buffer of `length` samples × `channels`.
    pub fn silent(sample_rate: u32, channels: usize, length: usize) -> Self {
        SampleBuffer {
            sample_rate,
            data: vec![vec![0.0; length]; channels],
        }
    }

    /// Build from per-channel f64 working buffers, narrowing to f32.
    pub fn from_channels(sample_rate: u32, channels: Vec<Vec<f64>>) -> Self {
        SampleBuffer {
            sample_rate,
            data: channels
                .into_iter()
                .map(|ch| ch.into_iter().map(|s| s as f32).collect())
                .collect(),
        }
    }

    pub fn channels(&self) -> usize {
        self.data.len()
    }

    /// Length in samples per channel.
    pub fn len(&self) -> usize {
        self.data.first().map_or(0, |ch| ch.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Peak absolute sample value across all channels.
    pub fn peak(&self) -> f64 {
        self.data
            .iter()
            .flat_map(|ch| ch.iter())
            .fold(0.0_f64, |acc, &s| acc.max((s as f64).abs()))
    }

    /// Peak level in dB, floored at the zero level.
    pub fn peak_db(&self) -> f64 {
        gain_to_db(self.peak())
    }

    /// Multiply every sample by `gain`.
    pub fn scale(&mut self, gain: f64) {
        for ch in &mut self.data {
            for s in ch.iter_mut() {
                *s = (*s as f64 * gain) as f32;
            }
        }
    }

    /// Interleave channels for PCM export (L R L R ...).
    pub fn interleaved(&self) -> Vec<f32> {
        let len = self.len();
        let channels = self.channels();
        let mut out = Vec::with_capacity(len * channels);
        for i in 0..len {
            for ch in &self.data {
                out.push(ch[i]);
            }
        }
        out
    }
}
