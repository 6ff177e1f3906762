//! Chord track: the ordered, immutable list of chord segments for a session.

use crate::error::Error;
use crate::types::ChordSegment;
use log::{info, warn};
use std::path::Path;

/// Ordered sequence of chord segments, sorted by start and non-overlapping.
/// Never mutated after construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChordTrack {
    segments: Vec<ChordSegment>,
}

impl ChordTrack {
    /// Validate and sort. Rejects non-finite times, `start >= end`, and
    /// segments that overlap their predecessor once sorted.
    pub fn new(mut segments: Vec<ChordSegment>) -> Result<Self, Error> {
        for (index, seg) in segments.iter().enumerate() {
            if !seg.start.is_finite() || !seg.end.is_finite() {
                return Err(Error::InvalidSegment {
                    index,
                    reason: "non-finite time".into(),
                });
            }
            if seg.start >= seg.end {
                return Err(Error::InvalidSegment {
                    index,
                    reason: format!("start {} is not before end {}", seg.start, seg.end),
                });
            }
        }

        segments.sort_by(|a, b| a.start.total_cmp(&b.start));

        for (index, pair) in segments.windows(2).enumerate() {
            if pair[1].start < pair[0].end {
                return Err(Error::InvalidSegment {
                    index: index + 1,
                    reason: format!(
                        "{} overlaps {} ({:.2}s < {:.2}s)",
                        pair[1].display_name, pair[0].display_name, pair[1].start, pair[0].end
                    ),
                });
            }
        }
        Ok(Self { segments })
    }

    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let segments: Vec<ChordSegment> = serde_json::from_str(json)?;
        if segments.is_empty() {
            return Err(Error::EmptyTrack);
        }
        Self::new(segments)
    }

    /// Load a JSON array of `{start, end, chord_majmin, chord_simple_pop}`
    /// records (or `root_quality`/`display_name`).
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path)?;
        let track = Self::from_json_str(&data)?;
        info!(
            "Loaded {} chord segments from {:?} ({:.2}s)",
            track.len(),
            path,
            track.end_time()
        );
        Ok(track)
    }

    /// Load from `path`, falling back to the demo track on any error.
    pub fn load_or_demo(path: Option<&Path>) -> Self {
        match path {
            Some(p) => match Self::load(p) {
                Ok(track) => track,
                Err(e) => {
                    warn!("Failed to load chord track {:?}: {}; using demo track", p, e);
                    Self::demo()
                }
            },
            None => Self::demo(),
        }
    }

    /// Built-in four-chord demo: G, Am, C, D over 25 seconds.
    pub fn demo() -> Self {
        Self {
            segments: vec![
                ChordSegment::new(0.27, 11.66, "G:maj", "G"),
                ChordSegment::new(11.66, 16.46, "A:min", "Am"),
                ChordSegment::new(16.46, 17.66, "C:maj", "C"),
                ChordSegment::new(17.66, 25.00, "D:maj", "D"),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ChordSegment> {
        self.segments.get(index)
    }

    pub fn segments(&self) -> &[ChordSegment] {
        &self.segments
    }

    /// End of the last segment, 0 for an empty track.
    pub fn end_time(&self) -> f64 {
        self.segments.last().map(|s| s.end).unwrap_or(0.0)
    }

    /// Distinct chord symbols in first-appearance order.
    pub fn unique_symbols(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for seg in &self.segments {
            if !out.contains(&seg.root_quality.as_str()) {
                out.push(&seg.root_quality);
            }
        }
        out
    }
}
