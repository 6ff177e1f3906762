//! Game configuration: timing, tolerance, and audio knobs.

use crate::synth::Timbre;
use crate::types::GestureCategory;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Seconds a correct gesture must be held continuously
    pub gesture_hold_time: f64,
    /// GESTURE_CORRECT feedback window before the track resumes
    pub transition_duration: f64,
    /// Seconds spent in FAIL before advancing
    pub penalty_time: f64,
    /// No new FAIL within this many seconds of leaving one
    pub fail_cooldown: f64,
    /// Segments shorter than this never fail
    pub min_chord_duration: f64,
    pub gesture_tolerance: f32,
    pub preview_duration: f64,
    pub fail_mode_enabled: bool,
    pub synth_enabled: bool,
    pub gesture_blips_enabled: bool,
    pub short_chord_duration: f64,
    pub full_chord_duration: f64,
    pub points_per_chord: i64,
    pub timbre: Timbre,
    pub tick_hz: u32,
    /// Display name → gesture, layered over the built-in table
    pub gesture_overrides: HashMap<String, GestureCategory>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            gesture_hold_time: 0.3,
            transition_duration: 0.5,
            penalty_time: 3.0,
            fail_cooldown: 2.0,
            min_chord_duration: 1.0,
            gesture_tolerance: 0.7,
            preview_duration: 15.0,
            fail_mode_enabled: true,
            synth_enabled: true,
            gesture_blips_enabled: true,
            short_chord_duration: 0.3,
            full_chord_duration: 1.0,
            points_per_chord: 100,
            timbre: Timbre::Piano,
            tick_hz: 30,
            gesture_overrides: HashMap::new(),
        }
    }
}

impl GameConfig {
    /// Load from a JSON file. Returns None if file is absent or malformed.
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(c) => {
                info!("Loaded config from {:?}", path);
                Some(c)
            }
            Err(e) => {
                warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)?;
        info!("Config saved to {:?}", path);
        Ok(())
    }

    /// Seconds per tick at the configured rate.
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.tick_hz.max(1) as f64)
    }
}
