use crate::types::*;
use log::trace;
use std::collections::{HashMap, VecDeque};

/// Default minimum confidence for a gesture to count as correct.
pub const DEFAULT_TOLERANCE: f32 = 0.7;
/// Raw classifications kept for smoothing.
const HISTORY_SIZE: usize = 5;
/// Smoothing only kicks in once this many samples are buffered.
const MIN_HISTORY: usize = 3;
/// A category must appear this often in the window to override the raw result.
const MIN_VOTES: usize = 2;

/// Which of the five fingers are extended: thumb, index, middle, ring, pinky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FingerState(pub [bool; 5]);

impl FingerState {
    pub fn thumb(&self) -> bool {
        self.0[0]
    }
    pub fn index(&self) -> bool {
        self.0[1]
    }
    pub fn middle(&self) -> bool {
        self.0[2]
    }
    pub fn ring(&self) -> bool {
        self.0[3]
    }
    pub fn pinky(&self) -> bool {
        self.0[4]
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&e| e).count()
    }

    /// Evaluate finger extension from landmarks.
    ///
    /// Thumb: tip horizontally farther from the wrist than its joint. This
    /// assumes an upright hand facing the camera; a rotated hand fools it.
    /// Other fingers: tip above (smaller y than) the joint.
    pub fn from_landmarks(hand: &HandLandmarks) -> Self {
        let wrist = hand.get(WRIST);
        let mut ext = [false; 5];
        for (finger, e) in ext.iter_mut().enumerate() {
            let tip = hand.get(FINGER_TIPS[finger]);
            let joint = hand.get(FINGER_JOINTS[finger]);
            *e = if finger == 0 {
                (tip.x - wrist.x).abs() > (joint.x - wrist.x).abs()
            } else {
                tip.y < joint.y
            };
        }
        Self(ext)
    }
}

/// Priority-ordered rule table. First match wins.
pub fn classify_fingers(f: FingerState) -> GestureObservation {
    let n = f.count();
    let (gesture, confidence) = if n == 5 {
        (GestureCategory::OpenHand, 1.0)
    } else if n == 0 {
        (GestureCategory::Fist, 1.0)
    } else if f.thumb() && n == 1 {
        (GestureCategory::ThumbUp, 1.0)
    } else if f.index() && f.middle() && !f.ring() && !f.pinky() {
        (GestureCategory::Peace, if f.thumb() { 0.85 } else { 0.95 })
    } else if f.index() && n == 1 {
        (GestureCategory::IndexPoint, 1.0)
    } else if f.index() && !f.middle() && !f.ring() && !f.pinky() {
        // Index with the thumb also out
        (GestureCategory::IndexPoint, 0.9)
    } else if f.index() && f.pinky() && !f.middle() && !f.ring() {
        (GestureCategory::Rock, 0.95)
    } else if n >= 4 {
        // Exactly four fingers up
        (GestureCategory::OpenHand, n as f32 / 5.0)
    } else if n <= 1 {
        (GestureCategory::Fist, 0.7)
    } else {
        (GestureCategory::Unknown, 0.0)
    };
    GestureObservation {
        gesture,
        confidence,
    }
}

/// Turns hand landmarks into a gesture with temporal smoothing.
///
/// The last five raw results are kept. With at least three buffered, the
/// most frequent category (first seen wins ties) replaces the raw one if it
/// appears at least twice. The raw confidence is kept either way, so a
/// smoothed-over dropout still reads as low confidence.
pub struct GestureClassifier {
    history: VecDeque<GestureCategory>,
    tolerance: f32,
    map: GestureMap,
}

impl GestureClassifier {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_SIZE + 1),
            tolerance: DEFAULT_TOLERANCE,
            map: GestureMap::default(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_map(mut self, map: GestureMap) -> Self {
        self.map = map;
        self
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    pub fn map(&self) -> &GestureMap {
        &self.map
    }

    /// Unsmoothed classification of one frame.
    pub fn classify_raw(landmarks: Option<&HandLandmarks>) -> GestureObservation {
        match landmarks {
            Some(hand) => classify_fingers(FingerState::from_landmarks(hand)),
            None => GestureObservation::none(),
        }
    }

    /// Classify one frame and apply smoothing. A missing hand reports
    /// UNKNOWN without entering the smoothing window.
    pub fn classify(&mut self, landmarks: Option<&HandLandmarks>) -> GestureObservation {
        let Some(hand) = landmarks else {
            return GestureObservation::none();
        };
        let raw = classify_fingers(FingerState::from_landmarks(hand));

        self.history.push_back(raw.gesture);
        if self.history.len() > HISTORY_SIZE {
            self.history.pop_front();
        }

        let mut obs = raw;
        if self.history.len() >= MIN_HISTORY {
            if let Some((winner, votes)) = self.most_common() {
                if votes >= MIN_VOTES && winner != raw.gesture {
                    trace!("smoothing {} → {} ({} votes)", raw.gesture, winner, votes);
                    obs.gesture = winner;
                }
            }
        }
        obs
    }

    fn most_common(&self) -> Option<(GestureCategory, usize)> {
        let mut best: Option<(GestureCategory, usize)> = None;
        for &g in &self.history {
            let votes = self.history.iter().filter(|&&h| h == g).count();
            match best {
                Some((_, v)) if v >= votes => {}
                _ => best = Some((g, votes)),
            }
        }
        best
    }

    pub fn expected_gesture(&self, chord_name: &str) -> GestureCategory {
        self.map.expected(chord_name)
    }

    /// Whether `obs` matches the chord's expected gesture with enough confidence.
    pub fn matches(&self, obs: &GestureObservation, chord_name: &str) -> bool {
        obs.gesture == self.expected_gesture(chord_name) && obs.confidence >= self.tolerance
    }

    /// Classify (with smoothing) and check against the chord's gesture.
    pub fn is_correct(
        &mut self,
        landmarks: Option<&HandLandmarks>,
        chord_name: &str,
    ) -> (bool, GestureObservation) {
        let obs = self.classify(landmarks);
        (self.matches(&obs, chord_name), obs)
    }

    /// Forget the smoothing window.
    pub fn reset(&mut self) {
        self.history.clear();
    }
}

impl Default for GestureClassifier {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Chord → gesture table ──────────────────────────────────────────────────

const CHORD_GESTURES: [(&str, GestureCategory); 13] = [
    ("G", GestureCategory::OpenHand),
    ("C", GestureCategory::Peace),
    ("D", GestureCategory::ThumbUp),
    ("E", GestureCategory::Rock),
    ("F", GestureCategory::IndexPoint),
    ("A", GestureCategory::Peace),
    ("B", GestureCategory::ThumbUp),
    ("Am", GestureCategory::Fist),
    ("Am7", GestureCategory::Fist),
    ("Em", GestureCategory::Fist),
    ("Dm", GestureCategory::IndexPoint),
    ("Bm", GestureCategory::Rock),
    ("Fm", GestureCategory::IndexPoint),
];

/// Chord display name → gesture the player must show.
/// Names missing from the table expect an open hand.
#[derive(Debug, Clone, Default)]
pub struct GestureMap {
    overrides: HashMap<String, GestureCategory>,
}

impl GestureMap {
    pub fn with_overrides(overrides: HashMap<String, GestureCategory>) -> Self {
        Self { overrides }
    }

    pub fn expected(&self, chord_name: &str) -> GestureCategory {
        if let Some(&g) = self.overrides.get(chord_name) {
            return g;
        }
        CHORD_GESTURES
            .iter()
            .find(|(name, _)| *name == chord_name)
            .map(|&(_, g)| g)
            .unwrap_or(GestureCategory::OpenHand)
    }
}

// ─── Synthetic poses ────────────────────────────────────────────────────────

/// Finger pattern that produces `gesture` with full (or near-full) confidence.
pub fn fingers_for(gesture: GestureCategory) -> FingerState {
    FingerState(match gesture {
        GestureCategory::OpenHand => [true, true, true, true, true],
        GestureCategory::Fist => [false, false, false, false, false],
        GestureCategory::ThumbUp => [true, false, false, false, false],
        GestureCategory::Peace => [false, true, true, false, false],
        GestureCategory::IndexPoint => [false, true, false, false, false],
        GestureCategory::Rock => [false, true, false, false, true],
        // Middle + ring only matches no rule
        GestureCategory::Unknown => [false, false, true, true, false],
    })
}

/// Build an upright right-hand pose with the given fingers extended.
///
/// Wrist at (0.5, 0.9). Thumb joint 0.10 left of the wrist, tip at 0.18
/// when extended and 0.04 when tucked. Finger joints at y=0.60, tips at
/// y=0.45 when extended and y=0.68 when curled.
pub fn synthetic_hand(fingers: FingerState) -> HandLandmarks {
    let mut lm = [Landmark::default(); LANDMARK_COUNT];
    lm[WRIST] = Landmark::new(0.5, 0.9);

    // Thumb: 1 CMC, 2 MCP, 3 IP, 4 tip
    lm[1] = Landmark::new(0.46, 0.85);
    lm[2] = Landmark::new(0.43, 0.80);
    lm[3] = Landmark::new(0.40, 0.76);
    lm[4] = if fingers.thumb() {
        Landmark::new(0.32, 0.72)
    } else {
        Landmark::new(0.46, 0.74)
    };

    // Index..pinky: MCP, PIP, DIP, tip
    let columns = [0.44f32, 0.50, 0.56, 0.62];
    for (i, &x) in columns.iter().enumerate() {
        let base = 5 + i * 4;
        lm[base] = Landmark::new(x, 0.70);
        lm[base + 1] = Landmark::new(x, 0.60);
        if fingers.0[i + 1] {
            lm[base + 2] = Landmark::new(x, 0.52);
            lm[base + 3] = Landmark::new(x, 0.45);
        } else {
            lm[base + 2] = Landmark::new(x, 0.64);
            lm[base + 3] = Landmark::new(x, 0.68);
        }
    }
    HandLandmarks(lm)
}

/// Synthetic pose for a gesture.
pub fn pose_for(gesture: GestureCategory) -> HandLandmarks {
    synthetic_hand(fingers_for(gesture))
}
