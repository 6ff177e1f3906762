use crate::audio::{BackingTrack, ClipPlayer, LogPlayer};
use crate::game::PlaybackStateMachine;
use crate::types::*;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, trace};

/// The session receives InputEvents (hand frames and control requests),
/// advances the state machine, carries out its track commands and audio
/// triggers, and fans the resulting GameFrames out to downstream consumers.
///
/// One hand frame is one tick. The input source paces the loop, so a
/// dropped tracker frame should still arrive as `landmarks: None` to keep
/// the timers running.
pub struct Session {
    input_rx: Receiver<InputEvent>,
    frame_txs: Vec<Sender<GameFrame>>,
    machine: PlaybackStateMachine,
    backing: Option<Box<dyn BackingTrack>>,
    player: Box<dyn ClipPlayer>,
}

impl Session {
    pub fn new(
        input_rx: Receiver<InputEvent>,
        frame_txs: Vec<Sender<GameFrame>>,
        machine: PlaybackStateMachine,
    ) -> Self {
        Self {
            input_rx,
            frame_txs,
            machine,
            backing: None,
            player: Box::new(LogPlayer::new()),
        }
    }

    /// Attach a backing track. The machine then emits track commands and
    /// reads positions from it while PLAYING.
    pub fn with_backing(mut self, backing: Box<dyn BackingTrack>) -> Self {
        self.machine = self.machine.with_backing_track(true);
        self.backing = Some(backing);
        self
    }

    /// Route foreground clips somewhere other than the log.
    pub fn with_player(mut self, player: Box<dyn ClipPlayer>) -> Self {
        self.player = player;
        self
    }

    pub fn machine(&self) -> &PlaybackStateMachine {
        &self.machine
    }

    /// Blocks until the input channel closes. Returns the final stats.
    pub fn run(&mut self) -> SessionStats {
        info!(
            "Session running ({} segments, backing track: {})",
            self.machine.track().len(),
            if self.backing.is_some() { "yes" } else { "no (virtual clock)" }
        );

        let mut frame_count: u64 = 0;
        let mut last_state = self.machine.state();

        while let Ok(event) = self.input_rx.recv() {
            let (frame, now) = match event {
                InputEvent::Hand {
                    timestamp_us,
                    landmarks,
                } => {
                    let now = us_to_secs(timestamp_us);
                    let track = self.backing.as_ref().and_then(|b| b.status(now));
                    let input = TickInput {
                        now,
                        landmarks,
                        track,
                    };
                    (self.machine.tick(&input), now)
                }
                InputEvent::Control {
                    timestamp_us,
                    request,
                } => {
                    let now = us_to_secs(timestamp_us);
                    debug!("control {:?} at {:.3}s", request, now);
                    self.machine.handle_control(&request, now);
                    (self.machine.snapshot(), now)
                }
            };

            self.dispatch(&frame, now);

            if frame.state != last_state {
                trace!("{}", frame);
                last_state = frame.state;
            }

            for tx in &self.frame_txs {
                let _ = tx.send(frame.clone());
            }

            frame_count += 1;
            if frame_count % 300 == 0 {
                debug!("Session: {} frames processed", frame_count);
                trace!("Latest: {}", frame);
            }
        }

        let stats = self.machine.stats();
        info!(
            "Session shutting down after {} frames (score {}, {} correct, {} errors)",
            frame_count, stats.score, stats.correct_count, stats.error_count
        );
        stats
    }

    /// Carry out the frame's side effects on the audio collaborators.
    fn dispatch(&mut self, frame: &GameFrame, now: f64) {
        if let Some(backing) = self.backing.as_mut() {
            for &cmd in &frame.track_commands {
                backing.apply(cmd, now);
            }
        }
        if let Some(trigger) = &frame.audio_trigger {
            self.player.play(trigger);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ClockedTrack;
    use crate::config::GameConfig;
    use crate::gesture::pose_for;
    use crate::track::ChordTrack;
    use crossbeam_channel::unbounded;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<ClipKind>>>);

    impl ClipPlayer for Recorder {
        fn play(&mut self, trigger: &AudioTrigger) {
            self.0.lock().unwrap().push(trigger.kind.clone());
        }
    }

    fn machine() -> PlaybackStateMachine {
        let cfg = GameConfig {
            preview_duration: 0.0,
            gesture_blips_enabled: false,
            ..GameConfig::default()
        };
        let track = ChordTrack::new(vec![ChordSegment::new(0.0, 1.0, "G:maj", "G")]).unwrap();
        PlaybackStateMachine::new(track, cfg)
    }

    fn control(ts: u64, request: ControlRequest) -> InputEvent {
        InputEvent::Control {
            timestamp_us: ts,
            request,
        }
    }

    #[test]
    fn test_session_plays_through_backing_track() {
        let (tx, rx) = unbounded();
        let (ftx, frx) = unbounded();
        let recorder = Recorder::default();
        let mut session = Session::new(rx, vec![ftx], machine())
            .with_backing(Box::new(ClockedTrack::new(1.5)))
            .with_player(Box::new(recorder.clone()));

        tx.send(control(0, ControlRequest::StartSession)).unwrap();
        tx.send(control(0, ControlRequest::SkipPreview)).unwrap();
        // 20 ms ticks for 3 s, open hand throughout
        for i in 0..150u64 {
            tx.send(InputEvent::Hand {
                timestamp_us: i * 20_000,
                landmarks: Some(pose_for(GestureCategory::OpenHand)),
            })
            .unwrap();
        }
        drop(tx);

        let stats = session.run();
        assert_eq!(stats.correct_count, 1);
        assert_eq!(stats.score, 100);

        let frames: Vec<GameFrame> = frx.try_iter().collect();
        assert_eq!(frames.len(), 152);
        assert_eq!(frames.last().unwrap().state, GameState::Finished);
        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            &[ClipKind::ShortChord("G:maj".into())]
        );
    }

    #[test]
    fn test_short_backing_track_still_finishes() {
        let cfg = GameConfig {
            preview_duration: 0.0,
            gesture_blips_enabled: false,
            ..GameConfig::default()
        };
        let track = ChordTrack::new(vec![
            ChordSegment::new(0.0, 2.0, "G:maj", "G"),
            ChordSegment::new(2.0, 4.0, "C:maj", "C"),
        ])
        .unwrap();
        let (tx, rx) = unbounded();
        let (ftx, frx) = unbounded();
        let mut session = Session::new(rx, vec![ftx], PlaybackStateMachine::new(track, cfg))
            .with_backing(Box::new(ClockedTrack::new(1.0)));

        tx.send(control(0, ControlRequest::StartSession)).unwrap();
        tx.send(control(0, ControlRequest::SkipPreview)).unwrap();
        // Open hand for G, then peace for C
        for i in 0..1000u64 {
            let g = if i < 150 {
                GestureCategory::OpenHand
            } else {
                GestureCategory::Peace
            };
            tx.send(InputEvent::Hand {
                timestamp_us: i * 20_000,
                landmarks: Some(pose_for(g)),
            })
            .unwrap();
        }
        drop(tx);

        let stats = session.run();
        assert_eq!(stats.correct_count, 2);
        assert_eq!(stats.error_count, 0);

        let frames: Vec<GameFrame> = frx.try_iter().collect();
        let last = frames.last().unwrap();
        assert_eq!(last.state, GameState::Finished);
        // Finishes right after the second resume, not at the end of input
        let finished_at = frames
            .iter()
            .find(|f| f.state == GameState::Finished)
            .map(|f| f.now)
            .unwrap();
        assert!(finished_at < 5.0, "finished at {:.2}", finished_at);
    }

    #[test]
    fn test_session_ends_when_input_closes() {
        let (tx, rx) = unbounded::<InputEvent>();
        let mut session = Session::new(rx, Vec::new(), machine());
        drop(tx);
        let stats = session.run();
        assert_eq!(stats, SessionStats::default());
        assert_eq!(session.machine().state(), GameState::Intro);
    }
}
