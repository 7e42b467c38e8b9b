//! Frame rendering
//!
//! The 8x8 matrix is split into four 4x4 quadrants: host vitals, relay,
//! access point and traffic. Rendering is a pure function of the polled
//! state, the override table and the current time, so every animation
//! frame is reproducible in tests.

use std::collections::HashMap;
use std::str::FromStr;

use crate::config::{DisplayConfig, Rgb};
use crate::matrix::Frame;
use crate::probes::{DisplayState, HostStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quadrant {
    Host,
    Relay,
    Ap,
    Traffic,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::Host,
        Quadrant::Relay,
        Quadrant::Ap,
        Quadrant::Traffic,
    ];

    pub fn origin(self) -> (usize, usize) {
        match self {
            Quadrant::Host => (0, 0),
            Quadrant::Relay => (4, 0),
            Quadrant::Ap => (0, 4),
            Quadrant::Traffic => (4, 4),
        }
    }
}

impl FromStr for Quadrant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(Quadrant::Host),
            "relay" => Ok(Quadrant::Relay),
            "ap" => Ok(Quadrant::Ap),
            "traffic" => Ok(Quadrant::Traffic),
            other => Err(format!("unknown quadrant '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideMode {
    Solid,
    Blink,
    Pulse,
}

/// Manual color forced onto a quadrant, optionally until a deadline.
#[derive(Debug, Clone, Copy)]
pub struct Override {
    pub color: Rgb,
    pub mode: OverrideMode,
    /// Seconds on the render clock; `None` persists until cleared
    pub expires_at: Option<f64>,
}

#[derive(Debug, Default)]
pub struct OverrideSet {
    map: HashMap<Quadrant, Override>,
}

impl OverrideSet {
    pub fn set(&mut self, quadrant: Quadrant, color: Rgb, mode: OverrideMode, until: Option<f64>) {
        self.map.insert(
            quadrant,
            Override {
                color,
                mode,
                expires_at: until,
            },
        );
    }

    pub fn clear(&mut self, quadrant: Quadrant) {
        self.map.remove(&quadrant);
    }

    /// Effective override color for a quadrant at `now`, if any.
    pub fn resolve(&self, quadrant: Quadrant, now: f64) -> Option<Rgb> {
        let ov = self.map.get(&quadrant)?;
        if let Some(expiry) = ov.expires_at {
            if now > expiry {
                return None;
            }
        }
        Some(match ov.mode {
            OverrideMode::Solid => ov.color,
            OverrideMode::Blink => blink(ov.color, now, 1.0, 0.5),
            OverrideMode::Pulse => pulse(ov.color, now, 1.0),
        })
    }
}

/// On for `duty` of each `period`, otherwise off.
pub fn blink(color: Rgb, now: f64, period: f64, duty: f64) -> Rgb {
    let phase = now.rem_euclid(period) / period;
    if phase < duty {
        color
    } else {
        (0, 0, 0)
    }
}

/// Cosine fade from black to full and back over one `period`.
pub fn pulse(color: Rgb, now: f64, period: f64) -> Rgb {
    let phase = now.rem_euclid(period) / period;
    let intensity = 0.5 * (1.0 - (2.0 * std::f64::consts::PI * phase).cos());
    let scale = |c: u8| (c as f64 * intensity).round() as u8;
    (scale(color.0), scale(color.1), scale(color.2))
}

pub fn breath(color: Rgb, now: f64) -> Rgb {
    pulse(color, now, 2.0)
}

pub struct Renderer {
    config: DisplayConfig,
}

impl Renderer {
    pub fn new(config: DisplayConfig) -> Self {
        Self { config }
    }

    pub fn render(&self, state: &DisplayState, overrides: &OverrideSet, now: f64) -> Frame {
        let mut frame = Frame::default();
        for quadrant in Quadrant::ALL {
            if let Some(color) = overrides.resolve(quadrant, now) {
                frame.fill_quad(quadrant.origin(), color);
                continue;
            }
            match quadrant {
                Quadrant::Host => self.render_host(&mut frame, &state.host, now),
                Quadrant::Relay => self.render_relay(&mut frame, state, now),
                Quadrant::Ap => self.render_ap(&mut frame, state, now),
                Quadrant::Traffic => frame.fill_rows(
                    Quadrant::Traffic.origin(),
                    state.traffic_level,
                    self.config.colors.ok,
                ),
            }
        }
        frame
    }

    /// Green gradient by temperature; warn blink on load or disk
    /// pressure; crit pulse on overheating or a nearly full disk.
    fn render_host(&self, frame: &mut Frame, host: &HostStats, now: f64) {
        let limits = &self.config.host;
        let mut color = (0, (255.0 * host.temp_c.min(80.0) / 80.0) as u8, 0);
        if host.load1 > limits.warn_load || host.disk_pct > limits.warn_disk_pct {
            color = blink(self.config.colors.warn, now, 1.0, 0.5);
        }
        if host.temp_c > limits.crit_temp_c || host.disk_pct > limits.crit_disk_pct {
            color = pulse(self.config.colors.crit, now, 1.0);
        }
        frame.fill_quad(Quadrant::Host.origin(), color);
    }

    /// Solid when the relay runs and the published verification is clean;
    /// warn blink when it runs but redirects are missing; fast red blink
    /// when it is down.
    fn render_relay(&self, frame: &mut Frame, state: &DisplayState, now: f64) {
        let color = if !state.relay_active {
            blink(self.config.colors.crit, now, 0.5, 0.5)
        } else if state.gateway.as_ref().is_some_and(|g| !g.redirects_ok) {
            blink(self.config.colors.warn, now, 1.0, 0.5)
        } else {
            self.config.colors.relay_on
        };
        frame.fill_quad(Quadrant::Relay.origin(), color);
    }

    /// Blue fill with one white pip per associated client (up to four,
    /// along the diagonal); fast red blink when the AP stack is down.
    fn render_ap(&self, frame: &mut Frame, state: &DisplayState, now: f64) {
        let origin = Quadrant::Ap.origin();
        if !state.ap_active {
            frame.fill_quad(origin, blink(self.config.colors.crit, now, 0.5, 0.5));
            return;
        }
        frame.fill_quad(origin, self.config.colors.ap_on);
        for i in 0..state.clients.min(4) {
            frame.set(origin.0 + i, origin.1 + i, (255, 255, 255));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> Renderer {
        Renderer::new(DisplayConfig::default())
    }

    fn healthy_state() -> DisplayState {
        DisplayState {
            host: HostStats {
                temp_c: 40.0,
                load1: 0.5,
                disk_pct: 30.0,
            },
            relay_active: true,
            ap_active: true,
            clients: 2,
            traffic_level: 2,
            gateway: None,
        }
    }

    #[test]
    fn test_blink_phases() {
        let red = (255, 0, 0);
        assert_eq!(blink(red, 0.0, 1.0, 0.5), red);
        assert_eq!(blink(red, 0.49, 1.0, 0.5), red);
        assert_eq!(blink(red, 0.5, 1.0, 0.5), (0, 0, 0));
        assert_eq!(blink(red, 1.25, 1.0, 0.5), red);
    }

    #[test]
    fn test_pulse_extremes() {
        let red = (255, 0, 0);
        assert_eq!(pulse(red, 0.0, 1.0), (0, 0, 0));
        assert_eq!(pulse(red, 0.5, 1.0), red);
        assert_eq!(breath(red, 1.0), red);
    }

    #[test]
    fn test_healthy_frame() {
        let frame = renderer().render(&healthy_state(), &OverrideSet::default(), 0.0);
        // host gradient: 40C of an 80C scale
        assert_eq!(frame.get(0, 0), (0, 127, 0));
        // relay solid cyan
        assert_eq!(frame.get(5, 1), (0, 255, 255));
        // ap blue with two white diagonal pips
        assert_eq!(frame.get(0, 4), (255, 255, 255));
        assert_eq!(frame.get(1, 5), (255, 255, 255));
        assert_eq!(frame.get(2, 6), (0, 128, 255));
        // traffic bar: two bottom rows lit, upper rows dark
        assert_eq!(frame.get(4, 7), (0, 255, 0));
        assert_eq!(frame.get(4, 6), (0, 255, 0));
        assert_eq!(frame.get(4, 5), (0, 0, 0));
    }

    #[test]
    fn test_relay_down_blinks_red() {
        let mut state = healthy_state();
        state.relay_active = false;
        let on = renderer().render(&state, &OverrideSet::default(), 0.1);
        assert_eq!(on.get(5, 1), (255, 0, 0));
        let off = renderer().render(&state, &OverrideSet::default(), 0.3);
        assert_eq!(off.get(5, 1), (0, 0, 0));
    }

    #[test]
    fn test_relay_warns_when_redirects_missing() {
        let mut state = healthy_state();
        state.gateway = Some(torgate_common::HealthSnapshot {
            generated_at: chrono::Utc::now(),
            relay_active: true,
            ap_active: true,
            forwarding: true,
            redirects_ok: false,
        });
        let frame = renderer().render(&state, &OverrideSet::default(), 0.0);
        assert_eq!(frame.get(5, 1), (255, 165, 0));
    }

    #[test]
    fn test_host_warn_beats_gradient_and_crit_beats_warn() {
        let mut state = healthy_state();
        state.host.load1 = 3.0;
        let frame = renderer().render(&state, &OverrideSet::default(), 0.0);
        assert_eq!(frame.get(0, 0), (255, 165, 0));

        state.host.temp_c = 90.0;
        let frame = renderer().render(&state, &OverrideSet::default(), 0.5);
        // crit pulse at peak intensity
        assert_eq!(frame.get(0, 0), (255, 0, 0));
    }

    #[test]
    fn test_override_wins_then_expires() {
        let mut overrides = OverrideSet::default();
        overrides.set(Quadrant::Traffic, (9, 9, 9), OverrideMode::Solid, Some(5.0));

        let state = healthy_state();
        let forced = renderer().render(&state, &overrides, 1.0);
        assert_eq!(forced.get(4, 4), (9, 9, 9));

        let expired = renderer().render(&state, &overrides, 6.0);
        assert_eq!(expired.get(4, 4), (0, 0, 0));
        assert_eq!(expired.get(4, 7), (0, 255, 0));
    }

    #[test]
    fn test_quadrant_from_str() {
        assert_eq!("relay".parse::<Quadrant>().unwrap(), Quadrant::Relay);
        assert!("sideways".parse::<Quadrant>().is_err());
    }
}
