//! Shared synthesis primitives: partial summation, envelopes, peak
//! normalization to 16-bit PCM and stereo interleaving.

use std::f64::consts::PI;

use crate::types::FULL_SCALE;

/// One additive-synthesis component: `amplitude * sin(2π · f0 · ratio · t)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Partial {
    pub ratio: f64,
    pub amplitude: f64,
}

pub const fn partial(ratio: f64, amplitude: f64) -> Partial {
    Partial { ratio, amplitude }
}

/// Amplitude-over-time shapes used by the timbres and blips.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Envelope {
    /// `exp(-decay·t) · (1 - exp(-attack·t))`
    Percussive { decay: f64, attack: f64 },
    /// Flat at 1.0 with linear ramps at both ends (seconds).
    Sustained { attack_secs: f64, release_secs: f64 },
    /// `exp(-decay·t)` with a linear fade-in over `attack_secs`.
    Swell { decay: f64, attack_secs: f64 },
}

impl Envelope {
    /// Render the envelope for `n` samples at `sample_rate`.
    pub fn render(&self, n: usize, sample_rate: u32) -> Vec<f64> {
        let sr = sample_rate as f64;
        match *self {
            Envelope::Percussive { decay, attack } => (0..n)
                .map(|i| {
                    let t = i as f64 / sr;
                    (-decay * t).exp() * (1.0 - (-attack * t).exp())
                })
                .collect(),
            Envelope::Sustained {
                attack_secs,
                release_secs,
            } => {
                let mut env = vec![1.0; n];
                apply_ramp(&mut env, 0, (attack_secs * sr) as usize, 0.0, 1.0);
                let release = ((release_secs * sr) as usize).min(n);
                apply_ramp(&mut env, n - release, release, 1.0, 0.0);
                env
            }
            Envelope::Swell { decay, attack_secs } => {
                let mut env: Vec<f64> = (0..n)
                    .map(|i| (-decay * (i as f64 / sr)).exp())
                    .collect();
                let attack = ((attack_secs * sr) as usize).min(n);
                for (i, v) in env.iter_mut().take(attack).enumerate() {
                    *v *= linspace_at(0.0, 1.0, attack, i);
                }
                env
            }
        }
    }
}

/// Overwrite `len` samples starting at `from` with a linear ramp `a → b`.
fn apply_ramp(env: &mut [f64], from: usize, len: usize, a: f64, b: f64) {
    let len = len.min(env.len().saturating_sub(from));
    for i in 0..len {
        env[from + i] = linspace_at(a, b, len, i);
    }
}

/// Value `i` of an inclusive `n`-point linear sequence from `a` to `b`.
fn linspace_at(a: f64, b: f64, n: usize, i: usize) -> f64 {
    if n <= 1 {
        return a;
    }
    a + (b - a) * i as f64 / (n - 1) as f64
}

/// Time axis for `n` samples, `t[i] = i / sample_rate`.
pub fn time_axis(n: usize, sample_rate: u32) -> impl Iterator<Item = f64> {
    let sr = sample_rate as f64;
    (0..n).map(move |i| i as f64 / sr)
}

/// Sum of sine partials over a fundamental, sample by sample.
pub fn additive(freq: f64, partials: &[Partial], n: usize, sample_rate: u32) -> Vec<f64> {
    time_axis(n, sample_rate)
        .map(|t| {
            partials
                .iter()
                .map(|p| p.amplitude * (2.0 * PI * freq * p.ratio * t).sin())
                .sum()
        })
        .collect()
}

/// Scale a composite so its absolute peak lands on 16-bit full scale.
/// A silent composite is passed through unscaled.
pub fn normalize_to_pcm(samples: &[f64]) -> Vec<i16> {
    let peak = samples.iter().fold(0.0f64, |m, s| m.max(s.abs()));
    if peak > 0.0 {
        let gain = FULL_SCALE / peak;
        samples.iter().map(|&s| (s * gain) as i16).collect()
    } else {
        to_pcm(samples)
    }
}

/// Convert a signal in [-1, 1] to 16-bit PCM, saturating outside that range.
pub fn to_pcm(samples: &[f64]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * FULL_SCALE).clamp(-FULL_SCALE, FULL_SCALE) as i16)
        .collect()
}

/// Duplicate a mono signal into interleaved stereo.
pub fn mono_to_stereo(mono: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(mono.len() * 2);
    for &s in mono {
        out.push(s);
        out.push(s);
    }
    out
}
