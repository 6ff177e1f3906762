//! Chord theory tables: note base frequencies and chord-quality intervals.
//!
//! Lookups never fail. An unknown root falls back to C4 and an unknown
//! quality to a major triad, so any chord symbol yields something playable.

/// Equal-tempered fourth-octave frequencies (A4 = 440 Hz), sharps and flats.
const NOTE_TABLE: [(&str, f64); 17] = [
    ("C", 261.63),
    ("C#", 277.18),
    ("Db", 277.18),
    ("D", 293.66),
    ("D#", 311.13),
    ("Eb", 311.13),
    ("E", 329.63),
    ("F", 349.23),
    ("F#", 369.99),
    ("Gb", 369.99),
    ("G", 392.00),
    ("G#", 415.30),
    ("Ab", 415.30),
    ("A", 440.00),
    ("A#", 466.16),
    ("Bb", 466.16),
    ("B", 493.88),
];

/// Semitone offsets from the root for each chord quality.
const QUALITY_TABLE: [(&str, &[i32]); 5] = [
    ("maj", &[0, 4, 7]),
    ("min", &[0, 3, 7]),
    ("dim", &[0, 3, 6]),
    ("aug", &[0, 4, 8]),
    ("7", &[0, 4, 7, 10]),
];

pub const DEFAULT_QUALITY: &str = "maj";
pub const DEFAULT_ROOT_HZ: f64 = 261.63;
const MAJOR_TRIAD: &[i32] = &[0, 4, 7];

/// Base frequency of a note name, C4 when the name is not in the table.
pub fn base_frequency(note: &str) -> f64 {
    NOTE_TABLE
        .iter()
        .find(|(name, _)| *name == note)
        .map(|&(_, hz)| hz)
        .unwrap_or(DEFAULT_ROOT_HZ)
}

/// Interval set for a quality name, a major triad when unknown.
pub fn intervals(quality: &str) -> &'static [i32] {
    QUALITY_TABLE
        .iter()
        .find(|(name, _)| *name == quality)
        .map(|&(_, iv)| iv)
        .unwrap_or(MAJOR_TRIAD)
}

/// `base_frequency(note) * 2^(semitones/12)`
pub fn frequency(note: &str, semitone_offset: i32) -> f64 {
    base_frequency(note) * 2.0_f64.powf(semitone_offset as f64 / 12.0)
}

/// A chord symbol split into root and quality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordSymbol<'a> {
    pub root: &'a str,
    pub quality: &'a str,
}

impl<'a> ChordSymbol<'a> {
    /// Split "<Root>:<Quality>". A bare root means major.
    pub fn parse(symbol: &'a str) -> Self {
        let symbol = symbol.trim();
        match symbol.split_once(':') {
            Some((root, quality)) => Self {
                root: root.trim(),
                quality: quality.trim(),
            },
            None => Self {
                root: symbol,
                quality: DEFAULT_QUALITY,
            },
        }
    }

    pub fn intervals(&self) -> &'static [i32] {
        intervals(self.quality)
    }

    /// Frequencies of every chord member, root first.
    pub fn frequencies(&self) -> Vec<f64> {
        self.intervals()
            .iter()
            .map(|&semi| frequency(self.root, semi))
            .collect()
    }
}

/// Member-note frequencies of a chord symbol, with fallbacks applied.
pub fn chord_frequencies(symbol: &str) -> Vec<f64> {
    ChordSymbol::parse(symbol).frequencies()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a4_is_440() {
        assert_eq!(base_frequency("A"), 440.0);
        assert!((frequency("A", 12) - 880.0).abs() < 1e-9);
    }

    #[test]
    fn test_enharmonics_share_frequency() {
        assert_eq!(base_frequency("C#"), base_frequency("Db"));
        assert_eq!(base_frequency("A#"), base_frequency("Bb"));
    }

    #[test]
    fn test_unknown_note_falls_back_to_c() {
        assert_eq!(base_frequency("H"), 261.63);
        assert_eq!(base_frequency(""), 261.63);
    }

    #[test]
    fn test_quality_intervals() {
        assert_eq!(intervals("maj"), &[0, 4, 7]);
        assert_eq!(intervals("min"), &[0, 3, 7]);
        assert_eq!(intervals("dim"), &[0, 3, 6]);
        assert_eq!(intervals("aug"), &[0, 4, 8]);
        assert_eq!(intervals("7"), &[0, 4, 7, 10]);
        assert_eq!(intervals("sus13"), &[0, 4, 7]);
    }

    #[test]
    fn test_parse_symbol() {
        let s = ChordSymbol::parse("A:min");
        assert_eq!(s.root, "A");
        assert_eq!(s.quality, "min");

        let bare = ChordSymbol::parse("G");
        assert_eq!(bare.root, "G");
        assert_eq!(bare.quality, "maj");
    }

    #[test]
    fn test_malformed_symbol_still_yields_triad() {
        let freqs = chord_frequencies("::garbage::");
        assert_eq!(freqs.len(), 3);
        assert!((freqs[0] - 261.63).abs() < 1e-9);
    }

    #[test]
    fn test_g_major_members() {
        let freqs = chord_frequencies("G:maj");
        // G4, B4, D5
        assert!((freqs[0] - 392.0).abs() < 0.01);
        assert!((freqs[1] - 493.88).abs() < 0.1);
        assert!((freqs[2] - 587.33).abs() < 0.1);
    }
}
