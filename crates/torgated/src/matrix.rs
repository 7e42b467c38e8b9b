//! LED matrix backends
//!
//! Everything renders into an 8x8 [`Frame`] first; a backend only has to
//! paint a finished frame. Hardware HATs hook in through [`LedMatrix`];
//! without one the daemon falls back to a console or dummy backend so the
//! rest of the gateway never depends on the display hardware.

use owo_colors::OwoColorize;
use std::io::Write;
use tracing::info;

use crate::config::Rgb;

pub const SIZE: usize = 8;

/// One rendered frame, row-major, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pixels: [[Rgb; SIZE]; SIZE],
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            pixels: [[(0, 0, 0); SIZE]; SIZE],
        }
    }
}

impl Frame {
    pub fn set(&mut self, x: usize, y: usize, color: Rgb) {
        if x < SIZE && y < SIZE {
            self.pixels[y][x] = color;
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Rgb {
        self.pixels[y][x]
    }

    /// Fill a 4x4 quadrant whose top-left corner is `origin`.
    pub fn fill_quad(&mut self, origin: (usize, usize), color: Rgb) {
        for x in origin.0..origin.0 + 4 {
            for y in origin.1..origin.1 + 4 {
                self.set(x, y, color);
            }
        }
    }

    /// Fill `level` rows of a quadrant from the bottom up, bar-graph style.
    pub fn fill_rows(&mut self, origin: (usize, usize), level: usize, color: Rgb) {
        for i in 0..level.min(4) {
            let y = origin.1 + 3 - i;
            for x in origin.0..origin.0 + 4 {
                self.set(x, y, color);
            }
        }
    }
}

pub trait LedMatrix: Send {
    fn paint(&mut self, frame: &Frame);
    fn set_brightness(&mut self, value: f32);
    fn clear(&mut self);
}

/// Fallback backend used when no display hardware is available. Records
/// the last frame so tests can assert on it.
#[derive(Default)]
pub struct DummyMatrix {
    pub last_frame: Frame,
    pub brightness: f32,
}

impl LedMatrix for DummyMatrix {
    fn paint(&mut self, frame: &Frame) {
        self.last_frame = *frame;
    }

    fn set_brightness(&mut self, value: f32) {
        self.brightness = value;
    }

    fn clear(&mut self) {
        self.last_frame = Frame::default();
    }
}

/// Renders the matrix as truecolor blocks on the terminal.
pub struct ConsoleMatrix;

impl LedMatrix for ConsoleMatrix {
    fn paint(&mut self, frame: &Frame) {
        let mut out = String::with_capacity(SIZE * SIZE * 24);
        // move cursor home, redraw in place
        out.push_str("\x1b[H");
        for y in 0..SIZE {
            for x in 0..SIZE {
                let (r, g, b) = frame.get(x, y);
                out.push_str(&"██".truecolor(r, g, b).to_string());
            }
            out.push('\n');
        }
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(out.as_bytes());
        let _ = stdout.flush();
    }

    fn set_brightness(&mut self, _value: f32) {}

    fn clear(&mut self) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(b"\x1b[2J\x1b[H");
        let _ = stdout.flush();
    }
}

/// Pick a backend for the configured device string.
pub fn open_device(device: &str, brightness: f32) -> Box<dyn LedMatrix> {
    let mut backend: Box<dyn LedMatrix> = match device {
        "console" => Box::new(ConsoleMatrix),
        _ => {
            info!("no LED HAT detected; using dummy display");
            Box::new(DummyMatrix::default())
        }
    };
    backend.set_brightness(brightness);
    backend
}
