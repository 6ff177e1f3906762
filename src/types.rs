use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

// ─── Chord track data ───────────────────────────────────────────────────────

/// One time interval of the track over which a single chord is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordSegment {
    /// Seconds from the start of the backing track
    pub start: f64,
    pub end: f64,
    /// "<Root>:<quality>", e.g. "G:maj". Accepts the `chord_majmin` key on load.
    #[serde(alias = "chord_majmin")]
    pub root_quality: String,
    /// Human-readable name, e.g. "Am". Accepts the `chord_simple_pop` key on load.
    #[serde(alias = "chord_simple_pop")]
    pub display_name: String,
}

impl ChordSegment {
    pub fn new(start: f64, end: f64, root_quality: &str, display_name: &str) -> Self {
        Self {
            start,
            end,
            root_quality: root_quality.to_string(),
            display_name: display_name.to_string(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

impl fmt::Display for ChordSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<4} ({})  {:>7.2}s → {:>7.2}s",
            self.display_name, self.root_quality, self.start, self.end
        )
    }
}

// ─── Gestures ───────────────────────────────────────────────────────────────

/// Closed set of hand poses the classifier can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GestureCategory {
    Unknown,
    OpenHand,
    Fist,
    Peace,
    ThumbUp,
    IndexPoint,
    Rock,
}

impl GestureCategory {
    pub const RECOGNIZABLE: [GestureCategory; 6] = [
        GestureCategory::OpenHand,
        GestureCategory::Fist,
        GestureCategory::Peace,
        GestureCategory::ThumbUp,
        GestureCategory::IndexPoint,
        GestureCategory::Rock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::OpenHand => "open_hand",
            Self::Fist => "fist",
            Self::Peace => "peace",
            Self::ThumbUp => "thumb_up",
            Self::IndexPoint => "index_point",
            Self::Rock => "rock",
        }
    }
}

impl fmt::Display for GestureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized 2-D hand landmark. (0,0) is the top-left of the source
/// frame, so a smaller `y` is higher up.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Anatomically indexed hand pose from an external hand tracker.
///
///   0 wrist · 1–4 thumb · 5–8 index · 9–12 middle · 13–16 ring · 17–20 pinky
///
/// Within each finger the last index is the fingertip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandLandmarks(pub [Landmark; LANDMARK_COUNT]);

impl HandLandmarks {
    /// Build from a slice of (x, y) pairs. Returns None unless there are exactly 21.
    pub fn from_points(points: &[(f32, f32)]) -> Option<Self> {
        if points.len() != LANDMARK_COUNT {
            return None;
        }
        let mut lm = [Landmark::default(); LANDMARK_COUNT];
        for (dst, &(x, y)) in lm.iter_mut().zip(points) {
            *dst = Landmark::new(x, y);
        }
        Some(Self(lm))
    }

    pub fn get(&self, index: usize) -> Landmark {
        self.0[index]
    }
}

/// Per-tick classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GestureObservation {
    pub gesture: GestureCategory,
    /// 0.0–1.0
    pub confidence: f32,
}

impl GestureObservation {
    pub fn none() -> Self {
        Self {
            gesture: GestureCategory::Unknown,
            confidence: 0.0,
        }
    }
}

// ─── Game state ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    /// Title screen, waiting for a start request
    Intro,
    /// Chord overview shown before the first segment
    Preview,
    WaitingForGesture,
    /// Gesture accepted, short feedback window before the track resumes
    GestureCorrect,
    /// Backing track running until the current segment ends
    Playing,
    /// Segment missed, serving the penalty
    Fail,
    Finished,
}

impl GameState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::Preview => "preview",
            Self::WaitingForGesture => "waiting",
            Self::GestureCorrect => "correct",
            Self::Playing => "playing",
            Self::Fail => "fail",
            Self::Finished => "finished",
        }
    }

    /// Stable numeric code for wire formats (OSC).
    pub fn code(&self) -> i32 {
        match self {
            Self::Intro => 0,
            Self::Preview => 1,
            Self::WaitingForGesture => 2,
            Self::GestureCorrect => 3,
            Self::Playing => 4,
            Self::Fail => 5,
            Self::Finished => 6,
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SessionStats {
    pub score: i64,
    pub correct_count: u32,
    pub error_count: u32,
    pub segment_index: usize,
}

impl SessionStats {
    /// Percentage of segments hit, 0 for an empty track.
    pub fn accuracy(&self, total_segments: usize) -> f64 {
        if total_segments == 0 {
            return 0.0;
        }
        self.correct_count as f64 / total_segments as f64 * 100.0
    }
}

// ─── Audio ──────────────────────────────────────────────────────────────────

/// Interleaved signed 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl PcmBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> i32 {
        self.samples
            .iter()
            .map(|&s| (s as i32).abs())
            .max()
            .unwrap_or(0)
    }
}

/// Which synthesized sound a trigger carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ClipKind {
    /// ~1 s chord (tap to play)
    FullChord(String),
    /// Short confirmation chord on acceptance
    ShortChord(String),
    ErrorTone,
    GestureBlip(GestureCategory),
}

impl fmt::Display for ClipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipKind::FullChord(s) => write!(f, "chord:{}", s),
            ClipKind::ShortChord(s) => write!(f, "short:{}", s),
            ClipKind::ErrorTone => f.write_str("error"),
            ClipKind::GestureBlip(g) => write!(f, "blip:{}", g),
        }
    }
}

/// Fire-and-forget request to start a clip on the foreground channel.
#[derive(Debug, Clone)]
pub struct AudioTrigger {
    pub kind: ClipKind,
    pub clip: Arc<PcmBuffer>,
}

/// Instruction for the backing-track channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackCommand {
    /// Begin playback at 0 and immediately pause
    StartPaused,
    Pause,
    Resume,
    Stop,
}

/// Backing-track status as reported by the audio collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackStatus {
    /// Playback position in seconds
    pub position: f64,
    pub playing: bool,
}

// ─── Tick interface ─────────────────────────────────────────────────────────

/// Everything the state machine consumes on one tick.
#[derive(Debug, Clone)]
pub struct TickInput {
    /// Monotonic seconds since session start
    pub now: f64,
    pub landmarks: Option<HandLandmarks>,
    /// None when no backing track is loaded or it cannot report a position
    pub track: Option<TrackStatus>,
}

impl TickInput {
    pub fn at(now: f64, landmarks: Option<HandLandmarks>) -> Self {
        Self {
            now,
            landmarks,
            track: None,
        }
    }
}

/// Snapshot produced after every tick or control request.
/// Consumed by the renderer, OSC sender and console display.
#[derive(Debug, Clone)]
pub struct GameFrame {
    pub now: f64,
    pub state: GameState,
    pub stats: SessionStats,
    pub total_segments: usize,
    pub segment: Option<ChordSegment>,
    pub expected_gesture: Option<GestureCategory>,
    pub next_segment: Option<ChordSegment>,
    pub next_gesture: Option<GestureCategory>,
    pub observation: GestureObservation,
    /// 0.0–1.0 of the required hold while waiting
    pub hold_progress: f32,
    /// Seconds of penalty left while in FAIL
    pub penalty_remaining: Option<f64>,
    pub fail_mode_enabled: bool,
    /// Percentage, only once FINISHED
    pub accuracy: Option<f64>,
    pub track_commands: Vec<TrackCommand>,
    pub audio_trigger: Option<AudioTrigger>,
}

impl fmt::Display for GameFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chord = match &self.segment {
            Some(s) => s.display_name.as_str(),
            None => "---",
        };
        write!(
            f,
            "t={:>8.3}s  {:<8} seg={}/{} chord={:<4} seen={}({:.2}) hold={:.2} score={} ok={} err={}",
            self.now,
            self.state.as_str(),
            self.stats.segment_index,
            self.total_segments,
            chord,
            self.observation.gesture,
            self.observation.confidence,
            self.hold_progress,
            self.stats.score,
            self.stats.correct_count,
            self.stats.error_count,
        )
    }
}

// ─── Inter-thread messages ──────────────────────────────────────────────────

/// Requests the external layer (keyboard, UI) can make of the game.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    StartSession,
    SkipPreview,
    SetFailMode(bool),
    ToggleFailMode,
    SetTimbre(crate::synth::Timbre),
    CycleTimbre,
    SetSynthEnabled(bool),
    TapChord,
    ResetToIntro,
}

#[derive(Debug, Clone)]
pub enum InputEvent {
    /// One tracker frame; `landmarks` is None when no hand is visible
    Hand {
        timestamp_us: u64,
        landmarks: Option<HandLandmarks>,
    },
    Control {
        timestamp_us: u64,
        request: ControlRequest,
    },
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the game session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a session timestamp to seconds.
pub fn us_to_secs(us: u64) -> f64 {
    us as f64 / 1_000_000.0
}

// ─── Constants ──────────────────────────────────────────────────────────────

pub const LANDMARK_COUNT: usize = 21;
pub const WRIST: usize = 0;
/// Fingertip landmark per finger: thumb, index, middle, ring, pinky.
pub const FINGER_TIPS: [usize; 5] = [4, 8, 12, 16, 20];
/// Joint compared against each fingertip.
pub const FINGER_JOINTS: [usize; 5] = [3, 6, 10, 14, 18];

pub const SAMPLE_RATE: u32 = 44_100;
pub const OUTPUT_CHANNELS: u16 = 2;
pub const FULL_SCALE: f64 = 32767.0;
