//! The playback state machine: waits for held gestures, drives the backing
//! track, and enforces the fail/penalty/cooldown rules.
//!
//! Time is injected. Every tick carries `now` (monotonic seconds) and the
//! machine stores the timestamps it needs at each transition. Track
//! commands and audio triggers are queued in an outbox and handed out with
//! the next `GameFrame`, so the machine itself never touches an audio device.

use crate::config::GameConfig;
use crate::gesture::{GestureClassifier, GestureMap};
use crate::synth::{ChordAudioEngine, Timbre};
use crate::track::ChordTrack;
use crate::types::*;
use log::{debug, info, warn};

#[derive(Default)]
struct Outbox {
    commands: Vec<TrackCommand>,
    trigger: Option<AudioTrigger>,
}

pub struct PlaybackStateMachine {
    track: ChordTrack,
    config: GameConfig,
    classifier: GestureClassifier,
    engine: ChordAudioEngine,

    state: GameState,
    stats: SessionStats,
    fail_mode: bool,
    synth_enabled: bool,
    /// Whether an external backing track receives commands
    has_backing: bool,

    now: f64,
    preview_start: f64,
    waiting_start: f64,
    gesture_start: Option<f64>,
    hold_duration: f64,
    transition_start: f64,
    fail_start: f64,
    last_fail_exit: Option<f64>,

    /// Wall-clock stand-in for the track position when none is reported
    virtual_position: f64,
    track_running: bool,
    track_started: bool,
    /// The reported track has been seen playing since the last resume
    track_seen_playing: bool,
    /// The reported track reached its end; later resumes cannot restart it
    track_exhausted: bool,

    observation: GestureObservation,
    outbox: Outbox,
}

impl PlaybackStateMachine {
    /// Build a machine for `track`. Synthesizes every chord in the track up
    /// front so the first acceptance never waits on synthesis.
    pub fn new(track: ChordTrack, config: GameConfig) -> Self {
        let classifier = GestureClassifier::new()
            .with_tolerance(config.gesture_tolerance)
            .with_map(GestureMap::with_overrides(config.gesture_overrides.clone()));
        let engine =
            ChordAudioEngine::new(config.timbre).with_full_duration(config.full_chord_duration);

        let mut machine = Self {
            fail_mode: config.fail_mode_enabled,
            synth_enabled: config.synth_enabled,
            track,
            config,
            classifier,
            engine,
            state: GameState::Intro,
            stats: SessionStats::default(),
            has_backing: false,
            now: 0.0,
            preview_start: 0.0,
            waiting_start: 0.0,
            gesture_start: None,
            hold_duration: 0.0,
            transition_start: 0.0,
            fail_start: 0.0,
            last_fail_exit: None,
            virtual_position: 0.0,
            track_running: false,
            track_started: false,
            track_seen_playing: false,
            track_exhausted: false,
            observation: GestureObservation::none(),
            outbox: Outbox::default(),
        };
        machine.preload();
        machine
    }

    /// Declare whether a backing track is attached. Without one, no track
    /// commands are emitted and PLAYING runs on the virtual clock.
    pub fn with_backing_track(mut self, present: bool) -> Self {
        self.has_backing = present;
        self
    }

    fn preload(&mut self) {
        let symbols: Vec<String> = self
            .track
            .unique_symbols()
            .into_iter()
            .map(String::from)
            .collect();
        let short = self.config.short_chord_duration;
        let mut ready = 0;
        for symbol in &symbols {
            if self.engine.chord(symbol).is_some() {
                ready += 1;
            }
            self.engine.short_chord(symbol, short);
        }
        info!(
            "Chords ready: {}/{} unique ({} timbre)",
            ready,
            symbols.len(),
            self.engine.timbre()
        );
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn track(&self) -> &ChordTrack {
        &self.track
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn engine(&self) -> &ChordAudioEngine {
        &self.engine
    }

    pub fn fail_mode_enabled(&self) -> bool {
        self.fail_mode
    }

    pub fn synth_enabled(&self) -> bool {
        self.synth_enabled
    }

    pub fn timbre(&self) -> Timbre {
        self.engine.timbre()
    }

    /// Segment the player is working on, None before the session or after
    /// the last segment.
    pub fn current_segment(&self) -> Option<&ChordSegment> {
        match self.state {
            GameState::Intro | GameState::Finished => None,
            _ => self.track.get(self.stats.segment_index),
        }
    }

    // ─── Control operations ─────────────────────────────────────────────────

    /// INTRO → PREVIEW. An empty track keeps the machine in INTRO.
    pub fn start_session(&mut self, now: f64) {
        if self.state != GameState::Intro {
            debug!("start_session ignored in {}", self.state);
            return;
        }
        if self.track.is_empty() {
            warn!("Cannot start session: chord track is empty");
            return;
        }
        self.now = now;
        self.stats = SessionStats::default();
        self.last_fail_exit = None;
        self.reset_hold();
        self.preview_start = now;
        self.set_state(GameState::Preview);
        info!(
            "Session started: {} segments, preview {:.1}s",
            self.track.len(),
            self.config.preview_duration
        );
    }

    /// End the preview early.
    pub fn skip_preview(&mut self, now: f64) {
        if self.state == GameState::Preview {
            self.now = now;
            self.begin_waiting(now);
        }
    }

    pub fn set_fail_mode(&mut self, enabled: bool) {
        if self.fail_mode != enabled {
            info!("Fail mode {}", if enabled { "on" } else { "off" });
        }
        self.fail_mode = enabled;
    }

    pub fn toggle_fail_mode(&mut self) -> bool {
        self.set_fail_mode(!self.fail_mode);
        self.fail_mode
    }

    /// Switch timbre and warm the cache for it.
    pub fn set_timbre(&mut self, timbre: Timbre) {
        if timbre == self.engine.timbre() {
            return;
        }
        self.engine.set_timbre(timbre);
        self.preload();
    }

    pub fn cycle_timbre(&mut self) -> Timbre {
        let next = self.engine.timbre().next();
        self.set_timbre(next);
        next
    }

    pub fn set_synth_enabled(&mut self, enabled: bool) {
        info!("Synth {}", if enabled { "on" } else { "off" });
        self.synth_enabled = enabled;
    }

    /// Play the full chord of the current segment.
    pub fn tap_chord(&mut self) {
        let Some(symbol) = self.current_segment().map(|s| s.root_quality.clone()) else {
            debug!("tap ignored: no current segment");
            return;
        };
        if let Some(clip) = self.engine.chord(&symbol) {
            self.trigger(ClipKind::FullChord(symbol), clip);
        }
    }

    /// Return to INTRO from any state, stopping the track.
    pub fn reset_to_intro(&mut self) {
        if self.track_started {
            self.command(TrackCommand::Stop);
        }
        self.stats = SessionStats::default();
        self.last_fail_exit = None;
        self.virtual_position = 0.0;
        self.reset_hold();
        self.classifier.reset();
        self.observation = GestureObservation::none();
        self.set_state(GameState::Intro);
    }

    /// Apply a request from the external layer.
    pub fn handle_control(&mut self, request: &ControlRequest, now: f64) {
        match request {
            ControlRequest::StartSession => self.start_session(now),
            ControlRequest::SkipPreview => self.skip_preview(now),
            ControlRequest::SetFailMode(on) => self.set_fail_mode(*on),
            ControlRequest::ToggleFailMode => {
                self.toggle_fail_mode();
            }
            ControlRequest::SetTimbre(t) => self.set_timbre(*t),
            ControlRequest::CycleTimbre => {
                self.cycle_timbre();
            }
            ControlRequest::SetSynthEnabled(on) => self.set_synth_enabled(*on),
            ControlRequest::TapChord => self.tap_chord(),
            ControlRequest::ResetToIntro => self.reset_to_intro(),
        }
    }

    // ─── Tick ───────────────────────────────────────────────────────────────

    /// Advance by one logical step and return the resulting frame.
    pub fn tick(&mut self, input: &TickInput) -> GameFrame {
        let dt = (input.now - self.now).max(0.0);
        if self.track_running {
            self.virtual_position += dt;
        }
        self.now = input.now;
        let now = input.now;

        if !matches!(self.state, GameState::Intro | GameState::Finished) {
            self.observation = self.classifier.classify(input.landmarks.as_ref());
        }

        match self.state {
            GameState::Intro | GameState::Finished => {}
            GameState::Preview => {
                if now - self.preview_start >= self.config.preview_duration {
                    self.begin_waiting(now);
                }
            }
            GameState::WaitingForGesture => self.update_waiting(now),
            GameState::GestureCorrect => {
                if now - self.transition_start >= self.config.transition_duration {
                    if !self.track_running {
                        self.command(TrackCommand::Resume);
                    }
                    self.track_seen_playing = false;
                    self.set_state(GameState::Playing);
                }
            }
            GameState::Playing => self.update_playing(now, input.track),
            GameState::Fail => {
                if now - self.fail_start >= self.config.penalty_time {
                    self.last_fail_exit = Some(now);
                    self.advance(now);
                }
            }
        }

        self.snapshot()
    }

    fn update_waiting(&mut self, now: f64) {
        let Some(segment) = self.track.get(self.stats.segment_index) else {
            return;
        };
        let segment_duration = segment.duration();
        let name = segment.display_name.clone();
        let time_waiting = now - self.waiting_start;

        if self.fail_mode && time_waiting >= segment_duration && self.may_fail(segment_duration, now)
        {
            self.enter_fail(now);
            return;
        }

        if self.classifier.matches(&self.observation, &name) {
            let start = match self.gesture_start {
                Some(t) => t,
                None => {
                    self.gesture_start = Some(now);
                    if self.config.gesture_blips_enabled {
                        self.blip(self.observation.gesture);
                    }
                    now
                }
            };
            self.hold_duration = now - start;
            if self.hold_duration >= self.config.gesture_hold_time {
                self.accept(now);
            }
        } else {
            self.reset_hold();
        }
    }

    /// Cooldown and minimum-duration gates layered over the timeout rule.
    fn may_fail(&self, segment_duration: f64, now: f64) -> bool {
        if segment_duration < self.config.min_chord_duration {
            return false;
        }
        match self.last_fail_exit {
            Some(exit) => now - exit >= self.config.fail_cooldown,
            None => true,
        }
    }

    fn accept(&mut self, now: f64) {
        let Some(segment) = self.track.get(self.stats.segment_index) else {
            return;
        };
        let symbol = segment.root_quality.clone();
        let name = segment.display_name.clone();

        if self.synth_enabled {
            if let Some(clip) = self
                .engine
                .short_chord(&symbol, self.config.short_chord_duration)
            {
                self.trigger(ClipKind::ShortChord(symbol), clip);
            }
        }
        self.stats.score += self.config.points_per_chord;
        self.stats.correct_count += 1;
        self.transition_start = now;
        info!(
            "✓ {} held {:.2}s (score {})",
            name, self.hold_duration, self.stats.score
        );
        self.reset_hold();
        self.set_state(GameState::GestureCorrect);
    }

    fn update_playing(&mut self, now: f64, status: Option<TrackStatus>) {
        let Some(end) = self.track.get(self.stats.segment_index).map(|s| s.end) else {
            return;
        };

        // Reported position when a real track answers, virtual clock otherwise
        let (position, ran_out) = match status.filter(|_| self.has_backing) {
            Some(s) => {
                if s.playing {
                    self.track_seen_playing = true;
                }
                let stopped = !s.playing && (self.track_seen_playing || self.track_exhausted);
                if stopped {
                    self.track_exhausted = true;
                }
                (s.position, stopped)
            }
            None => (self.virtual_position, false),
        };

        if position >= end || ran_out {
            if ran_out && position < end {
                debug!("backing track ended at {:.2}s before segment end {:.2}s", position, end);
            }
            self.advance(now);
        }
    }

    fn enter_fail(&mut self, now: f64) {
        if self.track_running {
            self.command(TrackCommand::Pause);
        }
        self.stats.error_count += 1;
        self.fail_start = now;
        self.reset_hold();
        if let Some(tone) = self.engine.error_tone() {
            self.trigger(ClipKind::ErrorTone, tone);
        }
        if let Some(seg) = self.track.get(self.stats.segment_index) {
            info!("✗ missed {} (errors {})", seg.display_name, self.stats.error_count);
        }
        self.set_state(GameState::Fail);
    }

    /// Move to the next segment, or finish when none is left.
    fn advance(&mut self, now: f64) {
        self.stats.segment_index += 1;
        self.reset_hold();

        if self.stats.segment_index >= self.track.len() {
            if self.track_started {
                self.command(TrackCommand::Stop);
            }
            self.set_state(GameState::Finished);
            let total = self.track.len();
            info!(
                "Finished: score {}, {}/{} correct, {} errors, accuracy {:.1}%",
                self.stats.score,
                self.stats.correct_count,
                total,
                self.stats.error_count,
                self.stats.accuracy(total)
            );
            return;
        }

        if self.track_running {
            self.command(TrackCommand::Pause);
        }
        self.waiting_start = now;
        self.set_state(GameState::WaitingForGesture);
    }

    fn begin_waiting(&mut self, now: f64) {
        self.command(TrackCommand::StartPaused);
        self.virtual_position = 0.0;
        self.waiting_start = now;
        self.reset_hold();
        self.set_state(GameState::WaitingForGesture);
    }

    fn reset_hold(&mut self) {
        self.gesture_start = None;
        self.hold_duration = 0.0;
    }

    fn set_state(&mut self, next: GameState) {
        if next == self.state {
            return;
        }
        let prev = self.state;
        self.state = next;
        match next {
            GameState::WaitingForGesture => {
                if let Some(seg) = self.track.get(self.stats.segment_index) {
                    info!(
                        "{} → waiting [{}/{}] {} ({}), {:.2}s budget",
                        prev,
                        self.stats.segment_index + 1,
                        self.track.len(),
                        seg.display_name,
                        self.classifier.expected_gesture(&seg.display_name),
                        seg.duration()
                    );
                }
            }
            GameState::GestureCorrect | GameState::Fail | GameState::Finished => {
                info!("{} → {}", prev, next)
            }
            _ => debug!("{} → {}", prev, next),
        }
    }

    // ─── Outbox ─────────────────────────────────────────────────────────────

    /// Record a track command. The virtual clock follows every command; the
    /// command itself is only emitted when a backing track is attached.
    fn command(&mut self, cmd: TrackCommand) {
        match cmd {
            TrackCommand::StartPaused => {
                self.track_started = true;
                self.track_running = false;
                self.track_exhausted = false;
            }
            TrackCommand::Pause => self.track_running = false,
            TrackCommand::Resume => self.track_running = true,
            TrackCommand::Stop => {
                self.track_started = false;
                self.track_running = false;
                self.track_exhausted = false;
            }
        }
        if self.has_backing {
            self.outbox.commands.push(cmd);
        }
    }

    fn trigger(&mut self, kind: ClipKind, clip: std::sync::Arc<PcmBuffer>) {
        if let Some(prev) = &self.outbox.trigger {
            debug!("{} replaces pending {}", kind, prev.kind);
        }
        self.outbox.trigger = Some(AudioTrigger { kind, clip });
    }

    /// Acknowledgement blip, only if nothing else is queued this tick.
    fn blip(&mut self, gesture: GestureCategory) {
        if self.outbox.trigger.is_some() {
            return;
        }
        if let Some(clip) = self.engine.gesture_blip(gesture) {
            self.trigger(ClipKind::GestureBlip(gesture), clip);
        }
    }

    /// Current frame, draining queued commands and the pending trigger.
    pub fn snapshot(&mut self) -> GameFrame {
        let segment = self.current_segment().cloned();
        let expected_gesture = segment
            .as_ref()
            .map(|s| self.classifier.expected_gesture(&s.display_name));
        let next_segment = segment
            .as_ref()
            .and_then(|_| self.track.get(self.stats.segment_index + 1))
            .cloned();
        let next_gesture = next_segment
            .as_ref()
            .map(|s| self.classifier.expected_gesture(&s.display_name));

        let hold_progress = match (self.state, self.gesture_start) {
            (GameState::WaitingForGesture, Some(_)) => {
                if self.config.gesture_hold_time > 0.0 {
                    (self.hold_duration / self.config.gesture_hold_time).clamp(0.0, 1.0) as f32
                } else {
                    1.0
                }
            }
            _ => 0.0,
        };
        let penalty_remaining = (self.state == GameState::Fail)
            .then(|| (self.config.penalty_time - (self.now - self.fail_start)).max(0.0));
        let accuracy =
            (self.state == GameState::Finished).then(|| self.stats.accuracy(self.track.len()));

        let outbox = std::mem::take(&mut self.outbox);
        GameFrame {
            now: self.now,
            state: self.state,
            stats: self.stats,
            total_segments: self.track.len(),
            segment,
            expected_gesture,
            next_segment,
            next_gesture,
            observation: self.observation,
            hold_progress,
            penalty_remaining,
            fail_mode_enabled: self.fail_mode,
            accuracy,
            track_commands: outbox.commands,
            audio_trigger: outbox.trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::pose_for;

    const DT: f64 = 0.01;

    fn config() -> GameConfig {
        GameConfig {
            preview_duration: 0.0,
            gesture_blips_enabled: false,
            ..GameConfig::default()
        }
    }

    fn track(segments: &[(f64, f64, &str, &str)]) -> ChordTrack {
        ChordTrack::new(
            segments
                .iter()
                .map(|&(s, e, sym, name)| ChordSegment::new(s, e, sym, name))
                .collect(),
        )
        .unwrap()
    }

    fn two_chords() -> ChordTrack {
        track(&[(0.0, 2.0, "G:maj", "G"), (2.0, 4.0, "C:maj", "C")])
    }

    /// Start a session at t=0 and skip straight to waiting.
    fn started(track: ChordTrack, cfg: GameConfig) -> PlaybackStateMachine {
        let mut m = PlaybackStateMachine::new(track, cfg);
        m.start_session(0.0);
        m.skip_preview(0.0);
        m.snapshot();
        m
    }

    fn t(i: usize) -> f64 {
        i as f64 * DT
    }

    fn hand(g: GestureCategory) -> Option<HandLandmarks> {
        Some(pose_for(g))
    }

    #[test]
    fn test_starts_in_intro() {
        let m = PlaybackStateMachine::new(two_chords(), config());
        assert_eq!(m.state(), GameState::Intro);
        assert!(m.current_segment().is_none());
    }

    #[test]
    fn test_preload_synthesizes_each_chord_once() {
        let demo = ChordTrack::demo();
        let m = PlaybackStateMachine::new(demo, GameConfig::default());
        // Full + short clip per distinct chord
        assert_eq!(m.engine().cached_clips(), 8);
        assert_eq!(m.engine().synthesis_count(), 8);
    }

    #[test]
    fn test_preview_times_out() {
        let cfg = GameConfig {
            preview_duration: 1.0,
            ..config()
        };
        let mut m = PlaybackStateMachine::new(two_chords(), cfg);
        m.start_session(0.0);
        assert_eq!(m.state(), GameState::Preview);
        m.tick(&TickInput::at(0.5, None));
        assert_eq!(m.state(), GameState::Preview);
        m.tick(&TickInput::at(1.0, None));
        assert_eq!(m.state(), GameState::WaitingForGesture);
    }

    #[test]
    fn test_empty_track_stays_in_intro() {
        let mut m = PlaybackStateMachine::new(ChordTrack::default(), config());
        m.start_session(0.0);
        assert_eq!(m.state(), GameState::Intro);
    }

    #[test]
    fn test_hold_time_acceptance() {
        let mut m = started(two_chords(), config());
        let mut accepted_at = None;
        for i in 0..100 {
            let f = m.tick(&TickInput::at(t(i), hand(GestureCategory::OpenHand)));
            if f.state == GameState::GestureCorrect {
                accepted_at = Some(f.now);
                assert_eq!(f.stats.score, 100);
                assert_eq!(f.stats.correct_count, 1);
                assert!(matches!(
                    f.audio_trigger.as_ref().map(|a| &a.kind),
                    Some(ClipKind::ShortChord(s)) if s == "G:maj"
                ));
                break;
            }
        }
        let at = accepted_at.expect("never accepted");
        assert!(at >= 0.29 && at <= 0.32, "accepted at {}", at);
    }

    #[test]
    fn test_interrupted_hold_restarts() {
        let mut m = started(two_chords(), config());
        // Held 0.0..=0.2
        for i in 0..=20 {
            let f = m.tick(&TickInput::at(t(i), hand(GestureCategory::OpenHand)));
            assert_eq!(f.state, GameState::WaitingForGesture);
        }
        // One dropped tick
        let f = m.tick(&TickInput::at(t(21), None));
        assert_eq!(f.hold_progress, 0.0);
        // Resume at 0.22: must not accept before 0.52
        let mut accepted_at = None;
        for i in 22..100 {
            let f = m.tick(&TickInput::at(t(i), hand(GestureCategory::OpenHand)));
            if f.state == GameState::GestureCorrect {
                accepted_at = Some(f.now);
                break;
            }
        }
        let at = accepted_at.expect("never accepted");
        assert!(at >= 0.51, "accepted at {} with accumulated hold", at);
    }

    #[test]
    fn test_wrong_gesture_never_accepts() {
        let cfg = GameConfig {
            fail_mode_enabled: false,
            ..config()
        };
        let mut m = started(two_chords(), cfg);
        for i in 0..150 {
            let f = m.tick(&TickInput::at(t(i), hand(GestureCategory::Fist)));
            assert_eq!(f.state, GameState::WaitingForGesture);
        }
    }

    #[test]
    fn test_fail_timeout_and_penalty() {
        let mut m = started(two_chords(), config());
        let mut fail_at = None;
        let mut exit_at = None;
        for i in 0..700 {
            let f = m.tick(&TickInput::at(t(i), None));
            match (f.state, fail_at) {
                (GameState::Fail, None) => {
                    fail_at = Some(f.now);
                    assert_eq!(f.stats.error_count, 1);
                    assert!(matches!(
                        f.audio_trigger.as_ref().map(|a| &a.kind),
                        Some(ClipKind::ErrorTone)
                    ));
                }
                (GameState::WaitingForGesture, Some(_)) => {
                    exit_at = Some(f.now);
                    assert_eq!(f.stats.segment_index, 1);
                    assert_eq!(f.stats.error_count, 1);
                    assert_eq!(f.stats.score, 0);
                    break;
                }
                _ => {}
            }
        }
        let fail_at = fail_at.expect("never failed");
        let exit_at = exit_at.expect("never left FAIL");
        assert!((fail_at - 2.0).abs() < 0.011, "failed at {}", fail_at);
        assert!((exit_at - fail_at - 3.0).abs() < 0.011, "penalty {}", exit_at - fail_at);
    }

    #[test]
    fn test_penalty_remaining_counts_down() {
        let mut m = started(two_chords(), config());
        let f = m.tick(&TickInput::at(2.0, None));
        assert_eq!(f.state, GameState::Fail);
        assert_eq!(f.penalty_remaining, Some(3.0));
        let f = m.tick(&TickInput::at(3.0, None));
        assert!((f.penalty_remaining.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_segment_after_fail_never_fails() {
        let tr = track(&[
            (0.0, 2.0, "G:maj", "G"),
            (2.0, 2.5, "C:maj", "C"),
            (2.5, 5.0, "D:maj", "D"),
        ]);
        let mut m = started(tr, config());
        let mut errors = 0;
        for i in 0..1500 {
            let f = m.tick(&TickInput::at(t(i), None));
            errors = f.stats.error_count;
            if f.stats.segment_index == 1 && f.now > 5.0 + 4.0 {
                break;
            }
        }
        assert_eq!(errors, 1);
        assert_eq!(m.stats().segment_index, 1);
        assert_eq!(m.state(), GameState::WaitingForGesture);
    }

    #[test]
    fn test_cooldown_delays_next_fail() {
        let cfg = GameConfig {
            penalty_time: 0.5,
            fail_cooldown: 2.0,
            ..config()
        };
        let tr = track(&[(0.0, 1.0, "G:maj", "G"), (1.0, 2.0, "C:maj", "C")]);
        let mut m = started(tr, cfg);
        // Fail at 1.0, exit at 1.5; second segment times out at 2.5 but the
        // cooldown holds the FAIL off until 3.5
        let mut second_fail = None;
        for i in 0..500 {
            let f = m.tick(&TickInput::at(t(i), None));
            if f.stats.error_count == 2 {
                second_fail = Some(f.now);
                break;
            }
        }
        let at = second_fail.expect("no second fail");
        assert!((at - 3.5).abs() < 0.011, "second fail at {}", at);
    }

    #[test]
    fn test_fail_mode_off_waits_forever() {
        let mut m = started(two_chords(), config());
        m.set_fail_mode(false);
        let f = m.tick(&TickInput::at(60.0, None));
        assert_eq!(f.state, GameState::WaitingForGesture);
        assert_eq!(f.stats.error_count, 0);
        assert!(!f.fail_mode_enabled);
    }

    /// Hold the expected gesture until the machine reaches PLAYING.
    fn play_through_acceptance(m: &mut PlaybackStateMachine, from: usize, g: GestureCategory) -> usize {
        let mut i = from;
        while m.state() != GameState::Playing {
            m.tick(&TickInput::at(t(i), hand(g)));
            i += 1;
            assert!(i < from + 200, "stuck in {}", m.state());
        }
        i
    }

    #[test]
    fn test_virtual_clock_drives_playing() {
        let mut m = started(two_chords(), config());
        let i = play_through_acceptance(&mut m, 0, GestureCategory::OpenHand);
        // Track virtually resumes at ~0.8s from position 0; segment ends at 2.0
        let resumed_at = t(i - 1);
        let mut advanced_at = None;
        for j in i..1000 {
            let f = m.tick(&TickInput::at(t(j), None));
            if f.state == GameState::WaitingForGesture {
                advanced_at = Some(f.now);
                assert_eq!(f.stats.segment_index, 1);
                break;
            }
        }
        let at = advanced_at.expect("never advanced");
        assert!((at - resumed_at - 2.0).abs() < 0.02, "advanced {}s after resume", at - resumed_at);
    }

    #[test]
    fn test_reported_position_drives_playing() {
        let mut m = started(two_chords(), config()).with_backing_track(true);
        let i = play_through_acceptance(&mut m, 0, GestureCategory::OpenHand);
        let f = m.tick(&TickInput {
            now: t(i),
            landmarks: None,
            track: Some(TrackStatus {
                position: 1.5,
                playing: true,
            }),
        });
        assert_eq!(f.state, GameState::Playing);
        let f = m.tick(&TickInput {
            now: t(i + 1),
            landmarks: None,
            track: Some(TrackStatus {
                position: 2.0,
                playing: true,
            }),
        });
        assert_eq!(f.state, GameState::WaitingForGesture);
        assert_eq!(f.track_commands, vec![TrackCommand::Pause]);
    }

    #[test]
    fn test_track_ending_early_advances() {
        let mut m = started(two_chords(), config()).with_backing_track(true);
        let i = play_through_acceptance(&mut m, 0, GestureCategory::OpenHand);
        let playing = TrackStatus {
            position: 0.5,
            playing: true,
        };
        let stopped = TrackStatus {
            position: 0.6,
            playing: false,
        };
        let f = m.tick(&TickInput {
            now: t(i),
            landmarks: None,
            track: Some(playing),
        });
        assert_eq!(f.state, GameState::Playing);
        let f = m.tick(&TickInput {
            now: t(i + 1),
            landmarks: None,
            track: Some(stopped),
        });
        assert_eq!(f.state, GameState::WaitingForGesture);
    }

    #[test]
    fn test_exhausted_track_advances_every_segment() {
        let mut m = started(two_chords(), config()).with_backing_track(true);
        let i = play_through_acceptance(&mut m, 0, GestureCategory::OpenHand);
        let f = m.tick(&TickInput {
            now: t(i),
            landmarks: None,
            track: Some(TrackStatus {
                position: 0.9,
                playing: true,
            }),
        });
        assert_eq!(f.state, GameState::Playing);
        let ended = TrackStatus {
            position: 1.0,
            playing: false,
        };
        let f = m.tick(&TickInput {
            now: t(i + 1),
            landmarks: None,
            track: Some(ended),
        });
        assert_eq!(f.state, GameState::WaitingForGesture);

        // Second segment: resuming a finished track never reports playing
        let mut j = i + 2;
        while m.state() != GameState::Playing {
            m.tick(&TickInput {
                now: t(j),
                landmarks: hand(GestureCategory::Peace),
                track: Some(ended),
            });
            j += 1;
            assert!(j < i + 300, "second chord never accepted");
        }
        let f = m.tick(&TickInput {
            now: t(j),
            landmarks: None,
            track: Some(ended),
        });
        assert_eq!(f.state, GameState::Finished);
        assert_eq!(f.stats.correct_count, 2);
    }

    #[test]
    fn test_track_commands_sequence() {
        let mut m = PlaybackStateMachine::new(two_chords(), config()).with_backing_track(true);
        m.start_session(0.0);
        m.skip_preview(0.0);
        let f = m.snapshot();
        assert_eq!(f.track_commands, vec![TrackCommand::StartPaused]);

        let mut commands = Vec::new();
        for i in 0..100 {
            let f = m.tick(&TickInput::at(t(i), hand(GestureCategory::OpenHand)));
            commands.extend(f.track_commands);
        }
        assert_eq!(m.state(), GameState::Playing);
        assert_eq!(commands, vec![TrackCommand::Resume]);
    }

    #[test]
    fn test_no_track_commands_without_backing() {
        let mut m = PlaybackStateMachine::new(two_chords(), config());
        m.start_session(0.0);
        m.skip_preview(0.0);
        assert!(m.snapshot().track_commands.is_empty());
    }

    #[test]
    fn test_full_run_finishes_with_accuracy() {
        let mut m = started(two_chords(), config()).with_backing_track(true);
        let mut i = play_through_acceptance(&mut m, 0, GestureCategory::OpenHand);
        // Segment 0 ends, second chord (C = peace) accepted, then track ends
        let mut last = None;
        while i < 2000 {
            let g = match m.stats().segment_index {
                0 => GestureCategory::OpenHand,
                _ => GestureCategory::Peace,
            };
            let f = m.tick(&TickInput::at(t(i), hand(g)));
            i += 1;
            if f.state == GameState::Finished {
                last = Some(f);
                break;
            }
        }
        let f = last.expect("never finished");
        assert_eq!(f.stats.correct_count, 2);
        assert_eq!(f.stats.score, 200);
        assert_eq!(f.accuracy, Some(100.0));
        assert!(f.track_commands.contains(&TrackCommand::Stop));
        assert!(f.segment.is_none());
    }

    #[test]
    fn test_finished_with_misses_reports_accuracy() {
        let tr = track(&[(0.0, 1.0, "G:maj", "G")]);
        let mut m = started(tr, config());
        let mut finished = None;
        for i in 0..600 {
            let f = m.tick(&TickInput::at(t(i), None));
            if f.state == GameState::Finished {
                finished = Some(f);
                break;
            }
        }
        let f = finished.expect("never finished");
        assert_eq!(f.accuracy, Some(0.0));
        assert_eq!(f.stats.error_count, 1);
        // Terminal until reset
        let f = m.tick(&TickInput::at(100.0, hand(GestureCategory::OpenHand)));
        assert_eq!(f.state, GameState::Finished);
    }

    #[test]
    fn test_reset_to_intro_from_anywhere() {
        let mut m = started(two_chords(), config()).with_backing_track(true);
        m.tick(&TickInput::at(0.0, hand(GestureCategory::OpenHand)));
        m.reset_to_intro();
        let f = m.snapshot();
        assert_eq!(f.state, GameState::Intro);
        assert_eq!(f.stats, SessionStats::default());
        assert_eq!(f.track_commands, vec![TrackCommand::Stop]);

        // Replay
        m.start_session(10.0);
        assert_eq!(m.state(), GameState::Preview);
    }

    #[test]
    fn test_synth_disabled_accepts_silently() {
        let mut m = started(two_chords(), config());
        m.set_synth_enabled(false);
        for i in 0..100 {
            let f = m.tick(&TickInput::at(t(i), hand(GestureCategory::OpenHand)));
            if f.state == GameState::GestureCorrect {
                assert!(f.audio_trigger.is_none());
                assert_eq!(f.stats.score, 100);
                return;
            }
        }
        panic!("never accepted");
    }

    #[test]
    fn test_blip_on_hold_start() {
        let cfg = GameConfig {
            gesture_blips_enabled: true,
            ..config()
        };
        let mut m = started(two_chords(), cfg);
        let f = m.tick(&TickInput::at(0.0, hand(GestureCategory::OpenHand)));
        assert!(matches!(
            f.audio_trigger.as_ref().map(|a| &a.kind),
            Some(ClipKind::GestureBlip(GestureCategory::OpenHand))
        ));
        // Only once per hold
        let f = m.tick(&TickInput::at(0.01, hand(GestureCategory::OpenHand)));
        assert!(f.audio_trigger.is_none());
    }

    #[test]
    fn test_tap_plays_full_chord() {
        let mut m = started(two_chords(), config());
        m.tap_chord();
        let f = m.snapshot();
        let trig = f.audio_trigger.expect("no trigger");
        assert_eq!(trig.kind, ClipKind::FullChord("G:maj".into()));
        assert_eq!(trig.clip.frames(), SAMPLE_RATE as usize);
    }

    #[test]
    fn test_tap_ignored_in_intro() {
        let mut m = PlaybackStateMachine::new(two_chords(), config());
        m.tap_chord();
        assert!(m.snapshot().audio_trigger.is_none());
    }

    #[test]
    fn test_cycle_timbre_keeps_cache() {
        let mut m = PlaybackStateMachine::new(two_chords(), config());
        let before = m.engine().cached_clips();
        assert_eq!(m.cycle_timbre(), Timbre::Guitar);
        assert_eq!(m.engine().cached_clips(), before * 2);
        m.set_timbre(Timbre::Piano);
        assert_eq!(m.engine().cached_clips(), before * 2);
    }

    #[test]
    fn test_frame_carries_hint_and_progress() {
        let mut m = started(two_chords(), config());
        let f = m.tick(&TickInput::at(0.0, hand(GestureCategory::OpenHand)));
        assert_eq!(f.expected_gesture, Some(GestureCategory::OpenHand));
        assert_eq!(f.next_segment.as_ref().map(|s| s.display_name.as_str()), Some("C"));
        assert_eq!(f.next_gesture, Some(GestureCategory::Peace));
        let f = m.tick(&TickInput::at(0.15, hand(GestureCategory::OpenHand)));
        assert!((f.hold_progress - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_handle_control_dispatch() {
        let mut m = PlaybackStateMachine::new(two_chords(), config());
        m.handle_control(&ControlRequest::StartSession, 0.0);
        m.handle_control(&ControlRequest::SkipPreview, 0.0);
        assert_eq!(m.state(), GameState::WaitingForGesture);
        m.handle_control(&ControlRequest::ToggleFailMode, 0.0);
        assert!(!m.fail_mode_enabled());
        m.handle_control(&ControlRequest::SetTimbre(Timbre::Organ), 0.0);
        assert_eq!(m.timbre(), Timbre::Organ);
        m.handle_control(&ControlRequest::SetSynthEnabled(false), 0.0);
        assert!(!m.synth_enabled());
        m.handle_control(&ControlRequest::ResetToIntro, 0.0);
        assert_eq!(m.state(), GameState::Intro);
    }
}
