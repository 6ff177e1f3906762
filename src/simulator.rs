use crate::gesture::pose_for;
use crate::types::*;
use crossbeam_channel::{Receiver, Sender};
use log::{info, warn};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

/// Scripted stand-ins for a camera and a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demo {
    /// Watches the game frames and shows each expected gesture after a
    /// human-ish reaction delay. Stops once the session finishes.
    Autoplay,
    /// Cycles through every recognizable gesture, ignoring the game.
    Sweep,
    /// No hand in view. Every segment long enough to fail does.
    Idle,
}

impl FromStr for Demo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "autoplay" => Ok(Demo::Autoplay),
            "sweep" => Ok(Demo::Sweep),
            "idle" => Ok(Demo::Idle),
            other => Err(format!(
                "unknown demo '{}' (expected autoplay, sweep or idle)",
                other
            )),
        }
    }
}

/// Seconds between the game asking for a gesture and the autoplayer showing it.
const REACTION_SECS: f64 = 0.4;
/// Seconds each pose is held in the sweep demo.
const SWEEP_HOLD_SECS: f64 = 1.5;
/// Landmark jitter amplitude (normalized frame units).
const JITTER: f32 = 0.004;

/// Generates synthetic hand-landmark frames and control requests that
/// exercise the full game pipeline without a camera.
///
/// In realtime mode ticks are paced with `thread::sleep` and stamped from
/// the session clock. Otherwise timestamps are synthetic (`tick * period`)
/// and the simulator runs as fast as the session consumes.
pub struct Simulator {
    clock: SessionClock,
    tx: Sender<InputEvent>,
    tick_hz: u32,
    demo: Demo,
    /// Frames from the session, read in lockstep (one per event sent)
    frames_rx: Option<Receiver<GameFrame>>,
    max_secs: f64,
    realtime: bool,
    rng: fastrand::Rng,
    tick: u64,
    last_frame: Option<GameFrame>,
}

impl Simulator {
    pub fn new(clock: SessionClock, tx: Sender<InputEvent>, tick_hz: u32, demo: Demo) -> Self {
        Self {
            clock,
            tx,
            tick_hz: tick_hz.max(1),
            demo,
            frames_rx: None,
            max_secs: 120.0,
            realtime: true,
            rng: fastrand::Rng::with_seed(7),
            tick: 0,
            last_frame: None,
        }
    }

    /// Feed back the session's frames. Required for `Demo::Autoplay`.
    pub fn with_frames(mut self, rx: Receiver<GameFrame>) -> Self {
        self.frames_rx = Some(rx);
        self
    }

    /// Stop after this many seconds of session time.
    pub fn with_max_secs(mut self, secs: f64) -> Self {
        self.max_secs = secs;
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    fn tick_us(&self) -> u64 {
        1_000_000 / self.tick_hz as u64
    }

    fn now_us(&self) -> u64 {
        if self.realtime {
            self.clock.now_us()
        } else {
            self.tick * self.tick_us()
        }
    }

    /// Run the demo. Blocks the calling thread and returns when the demo is
    /// over or the session hangs up. Dropping the simulator closes its sender.
    pub fn run(&mut self) {
        if self.demo == Demo::Autoplay && self.frames_rx.is_none() {
            warn!("Autoplay needs session frames; falling back to sweep");
            self.demo = Demo::Sweep;
        }
        info!("Simulator starting {:?} demo at {} Hz", self.demo, self.tick_hz);

        if !self.control(ControlRequest::StartSession) || !self.control(ControlRequest::SkipPreview)
        {
            return;
        }

        let mut shown = GestureCategory::Unknown;
        let mut asked: Option<(usize, f64)> = None;
        let mut finished_ticks = 0;

        loop {
            let t = us_to_secs(self.now_us());
            if t >= self.max_secs {
                info!("Simulator reached {:.1}s limit", self.max_secs);
                break;
            }

            let pose = match self.demo {
                Demo::Idle => None,
                Demo::Sweep => {
                    let n = GestureCategory::RECOGNIZABLE.len();
                    let i = (t / SWEEP_HOLD_SECS) as usize % n;
                    Some(GestureCategory::RECOGNIZABLE[i])
                }
                Demo::Autoplay => {
                    if let Some(frame) = &self.last_frame {
                        if frame.state == GameState::Finished {
                            finished_ticks += 1;
                        }
                        if frame.state == GameState::WaitingForGesture {
                            let idx = frame.stats.segment_index;
                            match asked {
                                Some((i, _)) if i == idx => {}
                                _ => asked = Some((idx, t)),
                            }
                            if let (Some((_, since)), Some(g)) = (asked, frame.expected_gesture) {
                                if t - since >= REACTION_SECS {
                                    shown = g;
                                }
                            }
                        }
                    }
                    Some(shown).filter(|g| *g != GestureCategory::Unknown)
                }
            };

            if finished_ticks > 3 {
                info!("Session finished; autoplay done");
                break;
            }

            let landmarks = pose.map(|g| self.jittered(g));
            if !self.hand(landmarks) {
                break;
            }

            if self.realtime {
                thread::sleep(Duration::from_micros(self.tick_us()));
            }
        }

        info!("Simulator stopped after {} ticks", self.tick);
    }

    fn jittered(&mut self, gesture: GestureCategory) -> HandLandmarks {
        let mut hand = pose_for(gesture);
        for lm in hand.0.iter_mut() {
            lm.x += (self.rng.f32() * 2.0 - 1.0) * JITTER;
            lm.y += (self.rng.f32() * 2.0 - 1.0) * JITTER;
        }
        hand
    }

    /// Send one hand frame. False once the session has gone away.
    fn hand(&mut self, landmarks: Option<HandLandmarks>) -> bool {
        let event = InputEvent::Hand {
            timestamp_us: self.now_us(),
            landmarks,
        };
        let ok = self.send(event);
        self.tick += 1;
        ok
    }

    fn control(&mut self, request: ControlRequest) -> bool {
        info!("  {:?}", request);
        let event = InputEvent::Control {
            timestamp_us: self.now_us(),
            request,
        };
        self.send(event)
    }

    fn send(&mut self, event: InputEvent) -> bool {
        if self.tx.send(event).is_err() {
            return false;
        }
        if let Some(rx) = &self.frames_rx {
            match rx.recv_timeout(Duration::from_secs(1)) {
                Ok(frame) => self.last_frame = Some(frame),
                Err(_) => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_demo_names() {
        assert_eq!("autoplay".parse::<Demo>(), Ok(Demo::Autoplay));
        assert_eq!("idle".parse::<Demo>(), Ok(Demo::Idle));
        assert!("e9".parse::<Demo>().is_err());
    }

    #[test]
    fn test_sweep_emits_every_gesture() {
        use crate::gesture::GestureClassifier;

        let (tx, rx) = unbounded();
        let mut sim = Simulator::new(SessionClock::new(), tx, 10, Demo::Sweep)
            .with_realtime(false)
            .with_max_secs(SWEEP_HOLD_SECS * 6.0);
        sim.run();
        drop(sim);

        let events: Vec<InputEvent> = rx.try_iter().collect();
        assert!(matches!(
            events[0],
            InputEvent::Control {
                request: ControlRequest::StartSession,
                ..
            }
        ));

        let mut seen = Vec::new();
        for ev in &events {
            if let InputEvent::Hand {
                landmarks: Some(hand),
                ..
            } = ev
            {
                let g = GestureClassifier::classify_raw(Some(hand)).gesture;
                if !seen.contains(&g) {
                    seen.push(g);
                }
            }
        }
        assert_eq!(seen, GestureCategory::RECOGNIZABLE.to_vec());
    }

    #[test]
    fn test_idle_sends_no_hands_with_synthetic_time() {
        let (tx, rx) = unbounded();
        let mut sim = Simulator::new(SessionClock::new(), tx, 20, Demo::Idle)
            .with_realtime(false)
            .with_max_secs(1.0);
        sim.run();
        drop(sim);

        let hands: Vec<(u64, bool)> = rx
            .try_iter()
            .filter_map(|ev| match ev {
                InputEvent::Hand {
                    timestamp_us,
                    landmarks,
                } => Some((timestamp_us, landmarks.is_some())),
                _ => None,
            })
            .collect();
        assert_eq!(hands.len(), 20);
        assert!(hands.iter().all(|&(_, present)| !present));
        assert_eq!(hands[1].0, 50_000);
    }
}
