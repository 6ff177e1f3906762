use chord_hero::audio::{self, BackingTrack, ClipPlayer, ClockedTrack, LogPlayer};
use chord_hero::config::GameConfig;
use chord_hero::console_display;
use chord_hero::game::PlaybackStateMachine;
use chord_hero::osc_sender;
use chord_hero::session::Session;
use chord_hero::simulator::{Demo, Simulator};
use chord_hero::synth::{ChordAudioEngine, DurationClass, Timbre};
use chord_hero::track::ChordTrack;
use chord_hero::types::*;

use clap::Parser;
use crossbeam_channel::{bounded, Sender};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

#[derive(Parser)]
#[command(name = "chord-hero")]
#[command(about = "Gesture-driven chord rhythm game")]
struct Cli {
    /// Chord track JSON (array of {start, end, chord_majmin, chord_simple_pop})
    #[arg(long)]
    chords: Option<PathBuf>,

    /// Game config JSON
    #[arg(long, default_value = "chord_hero.json")]
    config: PathBuf,

    /// Write the effective config to --config and exit
    #[arg(long)]
    save_config: bool,

    /// Backing track WAV
    #[arg(long)]
    backing: Option<PathBuf>,

    /// Chord timbre: piano, guitar, synth, pad, organ
    #[arg(long)]
    timbre: Option<Timbre>,

    /// Disable the fail/penalty rules
    #[arg(long)]
    no_fail_mode: bool,

    /// Disable the confirmation chord on acceptance
    #[arg(long)]
    no_synth: bool,

    /// Enable OSC output
    #[arg(long)]
    osc: bool,

    /// OSC target address
    #[arg(long, default_value = "127.0.0.1:9000")]
    osc_target: String,

    /// Enable console display (terminal TUI)
    #[arg(long)]
    console: bool,

    /// Console display refresh rate (Hz)
    #[arg(long, default_value_t = 10)]
    display_hz: u32,

    /// Simulator demo: "autoplay" (default), "sweep", or "idle"
    #[arg(long, default_value = "autoplay")]
    demo: Demo,

    /// Stop the simulator after this many seconds
    #[arg(long, default_value_t = 120.0)]
    duration: f64,

    /// Game tick rate (Hz)
    #[arg(long)]
    tick_hz: Option<u32>,

    /// Skip the chord preview screen
    #[arg(long)]
    no_preview: bool,

    /// Render one chord symbol (e.g. "A:min") to --out and exit
    #[arg(long)]
    render: Option<String>,

    /// Output WAV for --render
    #[arg(long, default_value = "chord.wav")]
    out: PathBuf,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let mut config = GameConfig::load(&cli.config).unwrap_or_default();
    if let Some(t) = cli.timbre {
        config.timbre = t;
    }
    if let Some(hz) = cli.tick_hz {
        config.tick_hz = hz;
    }
    if cli.no_fail_mode {
        config.fail_mode_enabled = false;
    }
    if cli.no_synth {
        config.synth_enabled = false;
    }
    if cli.no_preview {
        config.preview_duration = 0.0;
    }

    if cli.save_config {
        return match config.save(&cli.config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Failed to save config: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    if let Some(symbol) = &cli.render {
        return render_chord(symbol, &config, &cli.out);
    }

    let track = ChordTrack::load_or_demo(cli.chords.as_deref());
    let backing = cli.backing.as_deref().and_then(|p| match audio::load_wav(p) {
        Ok(buf) => Some(Arc::new(buf)),
        Err(e) => {
            warn!("Failed to load backing track {:?}: {}; using virtual clock", p, e);
            None
        }
    });

    info!("═══════════════════════════════════════════════");
    info!("  CHORD HERO v{}", env!("CARGO_PKG_VERSION"));
    info!("  Track: {} segments, {:.1}s", track.len(), track.end_time());
    info!("  Timbre: {}", config.timbre);
    info!(
        "  Fail mode: {}",
        if config.fail_mode_enabled { "ON" } else { "OFF" }
    );
    info!("  Demo: {:?}", cli.demo);
    if cli.osc {
        info!("  UI: OSC → {}", cli.osc_target);
    }
    if cli.console {
        info!("  UI: Console TUI");
    }
    info!("═══════════════════════════════════════════════");

    let clock = SessionClock::new();
    let tick_hz = config.tick_hz;

    // Channel: simulator → session
    let (input_tx, input_rx) = bounded::<InputEvent>(1024);

    // Channels: session → consumers
    let mut frame_txs: Vec<Sender<GameFrame>> = Vec::new();
    let mut handles = Vec::new();

    // ─── Console display ────────────────────────────────────────────
    if cli.console {
        let (tx, rx) = bounded::<GameFrame>(256);
        frame_txs.push(tx);
        let hz = cli.display_hz;
        handles.push(
            thread::Builder::new()
                .name("display".into())
                .spawn(move || {
                    console_display::ConsoleDisplay::new(rx, tick_hz, hz).run();
                })
                .expect("spawn display thread"),
        );
    }

    // ─── OSC sender ─────────────────────────────────────────────────
    if cli.osc {
        let (tx, rx) = bounded::<GameFrame>(1024);
        frame_txs.push(tx);
        let target = cli.osc_target.clone();
        handles.push(
            thread::Builder::new()
                .name("osc".into())
                .spawn(move || {
                    osc_sender::OscSender::new(rx, target).run();
                })
                .expect("spawn osc thread"),
        );
    }

    // ─── Autoplay feedback ──────────────────────────────────────────
    let sim_frames = if cli.demo == Demo::Autoplay {
        let (tx, rx) = bounded::<GameFrame>(64);
        frame_txs.push(tx);
        Some(rx)
    } else {
        None
    };

    // ─── Session ────────────────────────────────────────────────────
    // Built on its own thread: a cpal stream must stay where it was created.
    let session_handle = thread::Builder::new()
        .name("session".into())
        .spawn(move || {
            let machine = PlaybackStateMachine::new(track, config);
            let (backing_track, player) = open_outputs(backing);
            let mut session = Session::new(input_rx, frame_txs, machine).with_player(player);
            if let Some(b) = backing_track {
                session = session.with_backing(b);
            }
            session.run()
        })
        .expect("spawn session thread");

    // ─── Input source ───────────────────────────────────────────────
    info!("Starting simulator...");
    let demo = cli.demo;
    let max_secs = cli.duration;
    handles.push(
        thread::Builder::new()
            .name("simulator".into())
            .spawn(move || {
                let mut sim = Simulator::new(clock, input_tx, tick_hz, demo).with_max_secs(max_secs);
                if let Some(rx) = sim_frames {
                    sim = sim.with_frames(rx);
                }
                sim.run();
            })
            .expect("spawn simulator thread"),
    );

    let stats = match session_handle.join() {
        Ok(stats) => stats,
        Err(_) => {
            error!("Session thread panicked");
            return ExitCode::FAILURE;
        }
    };
    for h in handles {
        let _ = h.join();
    }

    info!(
        "Final score {} ({} correct, {} errors)",
        stats.score, stats.correct_count, stats.error_count
    );
    ExitCode::SUCCESS
}

/// Speaker output when built with `audio`, headless stand-ins otherwise.
#[cfg(feature = "audio")]
fn open_outputs(
    backing: Option<Arc<PcmBuffer>>,
) -> (Option<Box<dyn BackingTrack>>, Box<dyn ClipPlayer>) {
    let has_backing = backing.is_some();
    match audio::CpalOutput::new(backing.clone()) {
        Ok(out) => {
            // One device serves both channels; the mixer keeps them apart
            let shared = std::rc::Rc::new(std::cell::RefCell::new(out));
            let track: Option<Box<dyn BackingTrack>> = if has_backing {
                Some(Box::new(SharedOutput(std::rc::Rc::clone(&shared))))
            } else {
                None
            };
            (track, Box::new(SharedOutput(shared)))
        }
        Err(e) => {
            warn!("Audio output unavailable ({}); running headless", e);
            headless_outputs(backing)
        }
    }
}

#[cfg(not(feature = "audio"))]
fn open_outputs(
    backing: Option<Arc<PcmBuffer>>,
) -> (Option<Box<dyn BackingTrack>>, Box<dyn ClipPlayer>) {
    headless_outputs(backing)
}

fn headless_outputs(
    backing: Option<Arc<PcmBuffer>>,
) -> (Option<Box<dyn BackingTrack>>, Box<dyn ClipPlayer>) {
    let track = backing.map(|b| Box::new(ClockedTrack::from_buffer(&b)) as Box<dyn BackingTrack>);
    (track, Box::new(LogPlayer::new()))
}

#[cfg(feature = "audio")]
struct SharedOutput(std::rc::Rc<std::cell::RefCell<audio::CpalOutput>>);

#[cfg(feature = "audio")]
impl BackingTrack for SharedOutput {
    fn start_paused(&mut self, now: f64) {
        self.0.borrow_mut().start_paused(now);
    }
    fn pause(&mut self, now: f64) {
        self.0.borrow_mut().pause(now);
    }
    fn resume(&mut self, now: f64) {
        self.0.borrow_mut().resume(now);
    }
    fn stop(&mut self, now: f64) {
        self.0.borrow_mut().stop(now);
    }
    fn status(&self, now: f64) -> Option<TrackStatus> {
        self.0.borrow().status(now)
    }
}

#[cfg(feature = "audio")]
impl ClipPlayer for SharedOutput {
    fn play(&mut self, trigger: &AudioTrigger) {
        self.0.borrow_mut().play(trigger);
    }
}

/// `--render`: synthesize one chord and write it as WAV.
fn render_chord(symbol: &str, config: &GameConfig, out: &std::path::Path) -> ExitCode {
    let mut engine =
        ChordAudioEngine::new(config.timbre).with_full_duration(config.full_chord_duration);
    let Some(clip) = engine.generate_chord(symbol, config.timbre, DurationClass::Full) else {
        error!("Could not synthesize {}", symbol);
        return ExitCode::FAILURE;
    };
    match audio::write_wav(out, &clip) {
        Ok(()) => {
            info!(
                "Rendered {} [{}] → {:?} (peak {})",
                symbol,
                config.timbre,
                out,
                clip.peak()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to write {:?}: {}", out, e);
            ExitCode::FAILURE
        }
    }
}
