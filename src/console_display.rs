use crate::types::*;
use crossbeam_channel::Receiver;
use std::io::{self, Write};

const WIDTH: usize = 58;

/// Renders a live ASCII dashboard of the game state.
pub struct ConsoleDisplay {
    rx: Receiver<GameFrame>,
    tick_hz: u32,
    update_hz: u32,
}

impl ConsoleDisplay {
    pub fn new(rx: Receiver<GameFrame>, tick_hz: u32, update_hz: u32) -> Self {
        Self {
            rx,
            tick_hz,
            update_hz,
        }
    }

    pub fn run(&self) {
        let skip = if self.update_hz == 0 {
            1
        } else {
            (self.tick_hz / self.update_hz).max(1) as u64
        };
        let mut count: u64 = 0;
        let mut stdout = io::stdout();

        for frame in self.rx.iter() {
            count += 1;
            // Never skip frames that carry a sound or a track command
            let eventful = frame.audio_trigger.is_some() || !frame.track_commands.is_empty();
            if count % skip != 0 && !eventful {
                continue;
            }

            // Clear screen and move cursor home
            print!("\x1b[2J\x1b[H");
            print!("{}", render(&frame));
            let _ = stdout.flush();
        }
    }
}

/// The dashboard for one frame.
pub fn render(frame: &GameFrame) -> String {
    let mut out = String::new();
    let mut line = |text: String| {
        let pad = WIDTH.saturating_sub(text.chars().count());
        out.push_str(&format!("║  {}{}║\n", text, " ".repeat(pad)));
    };

    let rule = "═".repeat(WIDTH + 2);
    let mut s = format!("╔{}╗\n", rule);
    s.push_str(&format!("║  {:<w$}║\n", "CHORD HERO · Live Monitor", w = WIDTH));
    s.push_str(&format!("╠{}╣\n", rule));

    line(format!(
        "Time: {:>7.2}s   State: {:<8}  Fail mode: {}",
        frame.now,
        frame.state.as_str().to_uppercase(),
        if frame.fail_mode_enabled { "on" } else { "off" }
    ));
    line(String::new());

    match (&frame.segment, frame.expected_gesture) {
        (Some(seg), Some(g)) => {
            line(format!(
                "Chord {}/{}: {:<4} ({})  {:.2}s → {:.2}s",
                frame.stats.segment_index + 1,
                frame.total_segments,
                seg.display_name,
                seg.root_quality,
                seg.start,
                seg.end
            ));
            line(format!("Show:  {}", g));
        }
        _ => {
            line("Chord: ---".into());
            line(String::new());
        }
    }
    match (&frame.next_segment, frame.next_gesture) {
        (Some(seg), Some(g)) => line(format!("Next:  {} ({})", seg.display_name, g)),
        _ => line("Next:  ---".into()),
    }
    line(String::new());

    line(format!(
        "Seen:  {:<12} {}",
        frame.observation.gesture.as_str(),
        make_bar(frame.observation.confidence, 20)
    ));
    line(format!("Hold:  {}", make_bar(frame.hold_progress, 30)));
    if let Some(p) = frame.penalty_remaining {
        line(format!("PENALTY: {:.1}s", p));
    }
    line(String::new());

    line(format!(
        "Score: {:<6} Correct: {:<4} Errors: {}",
        frame.stats.score, frame.stats.correct_count, frame.stats.error_count
    ));
    if let Some(acc) = frame.accuracy {
        line(format!("Accuracy: {:.1}%", acc));
    }
    if let Some(trigger) = &frame.audio_trigger {
        line(format!("♪ {}", trigger.kind));
    }

    s.push_str(&out);
    s.push_str(&format!("╚{}╝\n", rule));
    s
}

fn make_bar(val: f32, width: usize) -> String {
    let filled = (val.clamp(0.0, 1.0) * width as f32).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_bar() {
        assert_eq!(make_bar(0.5, 4), "[██░░]");
        assert_eq!(make_bar(2.0, 2), "[██]");
    }

    #[test]
    fn test_render_lines_have_equal_width() {
        let frame = GameFrame {
            now: 3.25,
            state: GameState::Fail,
            stats: SessionStats::default(),
            total_segments: 2,
            segment: Some(ChordSegment::new(0.0, 2.0, "A:min", "Am")),
            expected_gesture: Some(GestureCategory::Fist),
            next_segment: Some(ChordSegment::new(2.0, 4.0, "C:maj", "C")),
            next_gesture: Some(GestureCategory::Peace),
            observation: GestureObservation::none(),
            hold_progress: 0.0,
            penalty_remaining: Some(1.6),
            fail_mode_enabled: true,
            accuracy: None,
            track_commands: Vec::new(),
            audio_trigger: None,
        };
        let text = render(&frame);
        assert!(text.contains("PENALTY: 1.6s"));
        assert!(text.contains("Next:  C (peace)"));
        let widths: Vec<usize> = text.lines().map(|l| l.chars().count()).collect();
        assert!(widths.iter().all(|&w| w == widths[0]), "{:?}", widths);
    }
}
