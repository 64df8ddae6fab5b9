//! Core of the LED wall driver.
//!
//! Frames arrive over a single NATS subscription, are parsed incrementally
//! off the socket, and are rendered at the wall-clock deadline carried in
//! each message so that independently powered wall segments stay in lockstep.
//!
//! - [`protocol`]: resumable byte-at-a-time NATS parser
//! - [`frame`]: payload decoding into [`frame::Frame`] values
//! - [`scheduler`]: bounded frame queue and the deadline dispatcher
//! - [`connection`]: broker socket and the read loop feeding the parser
//! - [`clock`]: wall clock and network/clock readiness collaborators
//! - [`render`]: display sinks (Pi matrix, tracing-only)
//! - [`server`], [`stats`]: optional HTTP status endpoint and its counters

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod render;
pub mod scheduler;
pub mod server;
pub mod stats;

pub use config::WallConfig;
pub use error::WallError;

use serde::Serialize;

#[cfg(feature = "hardware")]
use rpi_led_matrix::{LedMatrix, LedMatrixOptions, LedRuntimeOptions};

// ── Panel configuration ────────────────────────────────────────────

/// Configuration for the LED panel dimensions.
///
/// Pixels arrive on the wire as one flat run; pixel `i` lands at
/// column `i % cols`, row `i / cols`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PanelConfig {
    pub rows: u32,
    pub cols: u32,
}

impl PanelConfig {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }

    /// Total number of pixels on the panel.
    pub fn pixel_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Number of bytes needed for the RGB part of a frame (3 bytes per pixel).
    pub fn frame_byte_count(&self) -> usize {
        self.pixel_count() * 3
    }

    /// Length of one `MSG` payload: the 16-byte deadline plus the pixels.
    ///
    /// Only meaningful for a validated panel; see [`checked_payload_len`](Self::checked_payload_len).
    pub fn payload_len(&self) -> usize {
        frame::DEADLINE_LEN + self.frame_byte_count()
    }

    /// [`payload_len`](Self::payload_len), or `None` when it does not fit in a `usize`.
    pub fn checked_payload_len(&self) -> Option<usize> {
        (self.rows as usize)
            .checked_mul(self.cols as usize)?
            .checked_mul(3)?
            .checked_add(frame::DEADLINE_LEN)
    }
}

impl Default for PanelConfig {
    /// The 7x7 wall segment: 49 pixels, 163-byte payloads.
    fn default() -> Self {
        Self::new(7, 7)
    }
}

// ── Color ──────────────────────────────────────────────────────────

/// One RGB pixel, decoupled from the hardware crate.
///
/// At the hardware boundary we convert via `Into<LedColor>`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Apply brightness scaling (0-100) to this color.
    pub fn apply_brightness(self, brightness: u8) -> Self {
        if brightness >= 100 {
            return self;
        }
        Self {
            r: ((self.r as u16 * brightness as u16) / 100) as u8,
            g: ((self.g as u16 * brightness as u16) / 100) as u8,
            b: ((self.b as u16 * brightness as u16) / 100) as u8,
        }
    }
}

#[cfg(feature = "hardware")]
impl From<Color> for rpi_led_matrix::LedColor {
    fn from(c: Color) -> Self {
        rpi_led_matrix::LedColor {
            red: c.r,
            green: c.g,
            blue: c.b,
        }
    }
}

// ── Matrix initialization ──────────────────────────────────────────

/// Create a matrix configured for our hardware:
/// Pi Zero 2 W + Adafruit Bonnet + configurable panel size.
///
/// # Rust concept: mapping foreign errors
/// `rpi-led-matrix` reports failures as plain strings. `map_err` turns
/// them into our own [`WallError`] so callers can use `?` uniformly.
#[cfg(feature = "hardware")]
pub fn create_matrix(panel: PanelConfig) -> Result<LedMatrix, WallError> {
    let mut options = LedMatrixOptions::new();
    options.set_rows(panel.rows);
    options.set_cols(panel.cols);
    options.set_hardware_mapping("adafruit-hat");
    options
        .set_pwm_bits(8)
        .map_err(|e| WallError::Display(e.to_string()))?;
    options.set_pwm_lsb_nanoseconds(130);

    let mut rt_options = LedRuntimeOptions::new();
    rt_options.set_gpio_slowdown(2); // Pi Zero 2 W requires slowdown=2

    LedMatrix::new(Some(options), Some(rt_options)).map_err(|e| WallError::Display(e.to_string()))
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn panel_config_default_is_the_49_pixel_segment() {
        let panel = PanelConfig::default();
        assert_eq!(panel.pixel_count(), 49);
        assert_eq!(panel.payload_len(), 163);
    }

    #[rstest]
    #[case(7, 7, 147)]
    #[case(1, 50, 150)]
    #[case(32, 32, 3072)]
    fn test_frame_byte_count(#[case] rows: u32, #[case] cols: u32, #[case] expected: usize) {
        assert_eq!(PanelConfig::new(rows, cols).frame_byte_count(), expected);
    }

    #[rstest]
    #[case(7, 7, 163)]
    #[case(1, 50, 166)]
    #[case(1, 1, 19)]
    fn test_payload_len(#[case] rows: u32, #[case] cols: u32, #[case] expected: usize) {
        assert_eq!(PanelConfig::new(rows, cols).payload_len(), expected);
        assert_eq!(PanelConfig::new(rows, cols).checked_payload_len(), Some(expected));
    }

    #[test]
    fn checked_payload_len_overflows_to_none() {
        assert_eq!(PanelConfig::new(u32::MAX, u32::MAX).checked_payload_len(), None);
    }

    #[test]
    fn apply_brightness_100_is_identity() {
        let c = Color::new(100, 200, 50);
        assert_eq!(c.apply_brightness(100), c);
    }

    #[test]
    fn apply_brightness_0_is_black() {
        let c = Color::new(255, 255, 255);
        assert_eq!(c.apply_brightness(0), Color::BLACK);
    }

    #[test]
    fn apply_brightness_50_halves() {
        let c = Color::new(200, 100, 50);
        assert_eq!(c.apply_brightness(50), Color::new(100, 50, 25));
    }
}
