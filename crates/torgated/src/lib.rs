//! torgated - LED status display daemon for the torgate gateway
//!
//! Polls host vitals, relay and AP service state, wifi clients and
//! interface throughput, and renders them as four quadrants on an 8x8
//! LED matrix. Strictly read-only: the daemon consumes the health
//! snapshot the orchestrator publishes and never mutates configuration.

pub mod config;
pub mod matrix;
pub mod probes;
pub mod render;

pub use config::{DisplayConfig, Rgb, DEFAULT_CONFIG_PATH};
pub use matrix::{Frame, LedMatrix};
pub use probes::{DisplayState, TrafficMeter};
pub use render::{OverrideMode, OverrideSet, Quadrant, Renderer};
