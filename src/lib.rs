pub mod audio;
pub mod config;
pub mod console_display;
pub mod dsp;
pub mod error;
pub mod game;
pub mod gesture;
pub mod osc_sender;
pub mod session;
pub mod simulator;
pub mod synth;
pub mod theory;
pub mod track;
pub mod types;
