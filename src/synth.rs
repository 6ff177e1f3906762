use crate::dsp::{
    additive, mono_to_stereo, normalize_to_pcm, partial, time_axis, to_pcm, Envelope, Partial,
};
use crate::error::SynthError;
use crate::theory::ChordSymbol;
use crate::types::*;
use log::{debug, error, info, trace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Longest clip the engine will render.
const MAX_CLIP_SECS: f64 = 30.0;
/// Per-note level before the chord is summed and normalized.
const NOTE_VOLUME: f64 = 0.5;

// ─── Timbres ────────────────────────────────────────────────────────────────

/// Instrument-like parameter sets for chord synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timbre {
    Piano,
    Guitar,
    Synth,
    Pad,
    Organ,
}

/// Harmonic mix, envelope and output gain for one timbre.
#[derive(Debug, Clone, Copy)]
pub struct TimbreProfile {
    pub partials: &'static [Partial],
    pub envelope: Envelope,
    pub gain: f64,
}

const PIANO_PARTIALS: [Partial; 4] = [
    partial(1.0, 0.6),
    partial(2.0, 0.25),
    partial(3.0, 0.1),
    partial(4.0, 0.05),
];

// Slight inharmonic 2.01 partial for string realism.
const GUITAR_PARTIALS: [Partial; 6] = [
    partial(1.0, 0.5),
    partial(2.0, 0.2),
    partial(3.0, 0.15),
    partial(4.0, 0.08),
    partial(5.0, 0.05),
    partial(2.01, 0.02),
];

// Band-limited sawtooth: 1/h for h in 1..=7, scaled by 1/3.
const SYNTH_PARTIALS: [Partial; 7] = [
    partial(1.0, 1.0 / 3.0),
    partial(2.0, 1.0 / 6.0),
    partial(3.0, 1.0 / 9.0),
    partial(4.0, 1.0 / 12.0),
    partial(5.0, 1.0 / 15.0),
    partial(6.0, 1.0 / 18.0),
    partial(7.0, 1.0 / 21.0),
];

// Detuned 1.005 duplicate gives the chorus.
const PAD_PARTIALS: [Partial; 3] = [partial(1.0, 0.7), partial(2.0, 0.2), partial(1.005, 0.1)];

// Drawbars: 8', 4', 2 2/3', 2', 16'.
const ORGAN_PARTIALS: [Partial; 5] = [
    partial(1.0, 0.5),
    partial(2.0, 0.3),
    partial(3.0, 0.2),
    partial(4.0, 0.15),
    partial(0.5, 0.1),
];

const PIANO: TimbreProfile = TimbreProfile {
    partials: &PIANO_PARTIALS,
    envelope: Envelope::Percussive {
        decay: 2.5,
        attack: 50.0,
    },
    gain: 1.0,
};

const GUITAR: TimbreProfile = TimbreProfile {
    partials: &GUITAR_PARTIALS,
    envelope: Envelope::Percussive {
        decay: 3.0,
        attack: 100.0,
    },
    gain: 1.0,
};

const SYNTH: TimbreProfile = TimbreProfile {
    partials: &SYNTH_PARTIALS,
    envelope: Envelope::Sustained {
        attack_secs: 0.05,
        release_secs: 0.1,
    },
    gain: 1.0,
};

const PAD: TimbreProfile = TimbreProfile {
    partials: &PAD_PARTIALS,
    envelope: Envelope::Swell {
        decay: 0.5,
        attack_secs: 0.2,
    },
    gain: 0.8,
};

const ORGAN: TimbreProfile = TimbreProfile {
    partials: &ORGAN_PARTIALS,
    envelope: Envelope::Sustained {
        attack_secs: 0.02,
        release_secs: 0.0,
    },
    gain: 0.7,
};

impl Timbre {
    pub const ALL: [Timbre; 5] = [
        Timbre::Piano,
        Timbre::Guitar,
        Timbre::Synth,
        Timbre::Pad,
        Timbre::Organ,
    ];

    pub fn profile(&self) -> &'static TimbreProfile {
        match self {
            Timbre::Piano => &PIANO,
            Timbre::Guitar => &GUITAR,
            Timbre::Synth => &SYNTH,
            Timbre::Pad => &PAD,
            Timbre::Organ => &ORGAN,
        }
    }

    /// The following timbre in `ALL`, wrapping around.
    pub fn next(&self) -> Timbre {
        let i = Self::ALL.iter().position(|t| t == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timbre::Piano => "piano",
            Timbre::Guitar => "guitar",
            Timbre::Synth => "synth",
            Timbre::Pad => "pad",
            Timbre::Organ => "organ",
        }
    }

    /// Render one note of `n` samples, before chord normalization.
    fn render_note(&self, freq: f64, n: usize, sample_rate: u32) -> Vec<f64> {
        let profile = self.profile();
        let wave = additive(freq, profile.partials, n, sample_rate);
        let env = profile.envelope.render(n, sample_rate);
        let level = NOTE_VOLUME * profile.gain;
        wave.iter()
            .zip(&env)
            .map(|(w, e)| w * e * level)
            .collect()
    }
}

impl fmt::Display for Timbre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timbre {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown timbre '{}' (piano, guitar, synth, pad, organ)", s))
    }
}

// ─── Cache keys ─────────────────────────────────────────────────────────────

/// Length class of a chord clip. Short clips are keyed by their length in ms
/// so different confirmation lengths never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationClass {
    Full,
    Short { millis: u32 },
}

impl DurationClass {
    pub fn short(seconds: f64) -> Self {
        DurationClass::Short {
            millis: (seconds * 1000.0).round().max(0.0) as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClipKey {
    symbol: String,
    timbre: Timbre,
    duration: DurationClass,
}

// ─── Engine ─────────────────────────────────────────────────────────────────

/// Synthesizes chord, error and blip clips and memoizes them.
///
/// The chord cache is an unbounded map from (symbol, timbre, duration class)
/// to an immutable clip. It never evicts: the key space is the handful of
/// distinct chords in a track times five timbres times two lengths. Every key
/// is synthesized at most once; callers hold `Arc`s to the cached buffers.
///
/// The engine is single-threaded. Sharing it across threads needs a per-key
/// compute-and-insert guard to keep the at-most-once guarantee.
pub struct ChordAudioEngine {
    sample_rate: u32,
    timbre: Timbre,
    full_duration: f64,
    cache: HashMap<ClipKey, Arc<PcmBuffer>>,
    error_tone: Option<Arc<PcmBuffer>>,
    blips: HashMap<GestureCategory, Arc<PcmBuffer>>,
    synth_count: u64,
    /// Seeded noise source so error tones and clicks are reproducible
    rng: fastrand::Rng,
}

impl ChordAudioEngine {
    pub fn new(timbre: Timbre) -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            timbre,
            full_duration: 1.0,
            cache: HashMap::new(),
            error_tone: None,
            blips: HashMap::new(),
            synth_count: 0,
            rng: fastrand::Rng::with_seed(0x5eed_c40d),
        }
    }

    /// Override the length of `DurationClass::Full` clips (seconds).
    pub fn with_full_duration(mut self, seconds: f64) -> Self {
        self.full_duration = seconds;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn timbre(&self) -> Timbre {
        self.timbre
    }

    /// Switch the active timbre. Clips for other timbres stay cached.
    pub fn set_timbre(&mut self, timbre: Timbre) {
        if timbre != self.timbre {
            info!("Timbre: {} → {}", self.timbre, timbre);
            self.timbre = timbre;
        }
    }

    /// Number of chord syntheses actually performed (cache misses).
    pub fn synthesis_count(&self) -> u64 {
        self.synth_count
    }

    pub fn cached_clips(&self) -> usize {
        self.cache.len()
    }

    /// Chord clip for `symbol` in `timbre`, synthesized on first request.
    /// Returns None (after logging) if synthesis fails.
    pub fn generate_chord(
        &mut self,
        symbol: &str,
        timbre: Timbre,
        duration: DurationClass,
    ) -> Option<Arc<PcmBuffer>> {
        let key = ClipKey {
            symbol: symbol.to_string(),
            timbre,
            duration,
        };
        if let Some(clip) = self.cache.get(&key) {
            trace!("cache hit {} [{} {:?}]", symbol, timbre, duration);
            return Some(Arc::clone(clip));
        }

        let seconds = match duration {
            DurationClass::Full => self.full_duration,
            DurationClass::Short { millis } => millis as f64 / 1000.0,
        };
        match self.synthesize_chord(symbol, timbre, seconds) {
            Ok(buf) => {
                self.synth_count += 1;
                debug!(
                    "synthesized {} [{} {:.2}s] ({} cached)",
                    symbol,
                    timbre,
                    seconds,
                    self.cache.len() + 1
                );
                let clip = Arc::new(buf);
                self.cache.insert(key, Arc::clone(&clip));
                Some(clip)
            }
            Err(e) => {
                error!("Failed to synthesize chord {}: {}", symbol, e);
                None
            }
        }
    }

    /// Full-length chord in the active timbre.
    pub fn chord(&mut self, symbol: &str) -> Option<Arc<PcmBuffer>> {
        self.generate_chord(symbol, self.timbre, DurationClass::Full)
    }

    /// Short confirmation chord in the active timbre.
    pub fn short_chord(&mut self, symbol: &str, seconds: f64) -> Option<Arc<PcmBuffer>> {
        self.generate_chord(symbol, self.timbre, DurationClass::short(seconds))
    }

    /// Synthesize full chords for every symbol up front. Returns how many
    /// were available afterwards.
    pub fn preload<'a, I>(&mut self, symbols: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ready = 0;
        for symbol in symbols {
            if self.chord(symbol).is_some() {
                ready += 1;
            }
        }
        ready
    }

    /// Harsh, non-musical penalty cue. Rendered once, then reused.
    pub fn error_tone(&mut self) -> Option<Arc<PcmBuffer>> {
        if let Some(tone) = &self.error_tone {
            return Some(Arc::clone(tone));
        }
        let tone = Arc::new(self.synthesize_error_tone());
        self.error_tone = Some(Arc::clone(&tone));
        Some(tone)
    }

    /// Short acknowledgement sound for a gesture category.
    pub fn gesture_blip(&mut self, gesture: GestureCategory) -> Option<Arc<PcmBuffer>> {
        if let Some(blip) = self.blips.get(&gesture) {
            return Some(Arc::clone(blip));
        }
        let recipe = BlipRecipe::for_gesture(gesture);
        match self.synthesize_blip(&recipe) {
            Ok(buf) => {
                let blip = Arc::new(buf);
                self.blips.insert(gesture, Arc::clone(&blip));
                Some(blip)
            }
            Err(e) => {
                error!("Failed to synthesize {} blip: {}", gesture, e);
                None
            }
        }
    }

    fn sample_count(&self, seconds: f64) -> Result<usize, SynthError> {
        if !seconds.is_finite() || seconds <= 0.0 || seconds > MAX_CLIP_SECS {
            return Err(SynthError::InvalidDuration(seconds));
        }
        Ok((self.sample_rate as f64 * seconds) as usize)
    }

    fn synthesize_chord(
        &self,
        symbol: &str,
        timbre: Timbre,
        seconds: f64,
    ) -> Result<PcmBuffer, SynthError> {
        let n = self.sample_count(seconds)?;
        let chord = ChordSymbol::parse(symbol);

        let mut mix = vec![0.0f64; n];
        for freq in chord.frequencies() {
            let note = timbre.render_note(freq, n, self.sample_rate);
            for (m, s) in mix.iter_mut().zip(&note) {
                *m += s;
            }
        }
        if mix.iter().any(|s| !s.is_finite()) {
            return Err(SynthError::NonFinite(symbol.to_string()));
        }

        Ok(self.stereo(normalize_to_pcm(&mix)))
    }

    fn synthesize_error_tone(&mut self) -> PcmBuffer {
        // Near-semitone pairs 100/106 and 150/159
        const VOICES: [(f64, f64); 4] = [(100.0, 0.4), (106.0, 0.3), (150.0, 0.2), (159.0, 0.2)];
        const DURATION: f64 = 0.8;
        const NOISE: f64 = 0.1;
        const CLIP_LEVEL: f64 = 0.8;

        let n = (self.sample_rate as f64 * DURATION) as usize;
        let rng = &mut self.rng;
        let wave: Vec<f64> = time_axis(n, self.sample_rate)
            .map(|t| {
                let tone: f64 = VOICES
                    .iter()
                    .map(|&(f, a)| a * (2.0 * PI * f * t).sin())
                    .sum();
                let noise = (rng.f64() * 2.0 - 1.0) * NOISE;
                let shaped = (tone + noise) * (-2.0 * t).exp() * 0.7;
                shaped.clamp(-CLIP_LEVEL, CLIP_LEVEL)
            })
            .collect();
        self.stereo(to_pcm(&wave))
    }

    fn synthesize_blip(&mut self, recipe: &BlipRecipe) -> Result<PcmBuffer, SynthError> {
        let n = self.sample_count(recipe.duration)?;
        let sr = self.sample_rate;
        let f = recipe.freq;

        let mut wave = match recipe.voice {
            BlipVoice::Blend(partials) => additive(f, partials, n, sr),
            BlipVoice::Click => {
                let mut w = additive(f, &[partial(1.0, 0.8)], n, sr);
                for s in w.iter_mut().take(500) {
                    *s += (self.rng.f64() * 2.0 - 1.0) * 0.3;
                }
                w
            }
            BlipVoice::Tap => time_axis(n, sr)
                .map(|t| {
                    let bend = 1.0 + 0.5 * (-20.0 * t).exp();
                    0.6 * (2.0 * PI * f * t * bend).sin()
                })
                .collect(),
            BlipVoice::Distorted(partials) => additive(f, partials, n, sr)
                .into_iter()
                .map(|s| (s * 2.0).tanh() * 0.7)
                .collect(),
        };

        let env = recipe.envelope.render(n, sr);
        for (s, e) in wave.iter_mut().zip(&env) {
            *s *= e * 0.6;
        }
        if wave.iter().any(|s| !s.is_finite()) {
            return Err(SynthError::NonFinite(format!("blip {:.2} Hz", f)));
        }
        Ok(self.stereo(to_pcm(&wave)))
    }

    fn stereo(&self, mono: Vec<i16>) -> PcmBuffer {
        PcmBuffer {
            sample_rate: self.sample_rate,
            channels: OUTPUT_CHANNELS,
            samples: mono_to_stereo(&mono),
        }
    }
}

// ─── Gesture blips ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum BlipVoice {
    /// Plain harmonic blend
    Blend(&'static [Partial]),
    /// Sine with a burst of noise on the attack
    Click,
    /// Pitch falling from 1.5× to 1× the base
    Tap,
    /// Harmonic blend through tanh soft clipping
    Distorted(&'static [Partial]),
}

#[derive(Debug, Clone, Copy)]
struct BlipRecipe {
    freq: f64,
    duration: f64,
    voice: BlipVoice,
    envelope: Envelope,
}

const CLEAN_BLEND: [Partial; 2] = [partial(1.0, 0.7), partial(2.0, 0.2)];
const HEAVY_BLEND: [Partial; 3] = [partial(1.0, 0.5), partial(0.5, 0.3), partial(1.5, 0.2)];
const BRIGHT_BLEND: [Partial; 4] = [
    partial(1.0, 0.5),
    partial(2.0, 0.3),
    partial(3.0, 0.15),
    partial(4.0, 0.05),
];
const FIFTH_BLEND: [Partial; 2] = [partial(1.0, 0.6), partial(1.5, 0.4)];

const fn perc(decay: f64, attack: f64) -> Envelope {
    Envelope::Percussive { decay, attack }
}

impl BlipRecipe {
    fn for_gesture(gesture: GestureCategory) -> Self {
        let (freq, duration, voice, envelope) = match gesture {
            // C5
            GestureCategory::OpenHand => (523.25, 0.15, BlipVoice::Blend(&CLEAN_BLEND), perc(6.0, 30.0)),
            // G4 with the octave below
            GestureCategory::Fist => (392.00, 0.15, BlipVoice::Blend(&HEAVY_BLEND), perc(4.0, 50.0)),
            // E5
            GestureCategory::Peace => (659.25, 0.15, BlipVoice::Blend(&BRIGHT_BLEND), perc(8.0, 40.0)),
            // G5
            GestureCategory::ThumbUp => (784.00, 0.12, BlipVoice::Click, perc(15.0, 100.0)),
            // D5
            GestureCategory::IndexPoint => (587.33, 0.12, BlipVoice::Tap, perc(10.0, 100.0)),
            // A4
            GestureCategory::Rock => (440.00, 0.2, BlipVoice::Distorted(&FIFTH_BLEND), perc(3.0, 50.0)),
            GestureCategory::Unknown => (880.00, 0.1, BlipVoice::Blend(&CLEAN_BLEND), perc(6.0, 30.0)),
        };
        Self {
            freq,
            duration,
            voice,
            envelope,
        }
    }
}
