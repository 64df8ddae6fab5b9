//! Display sinks: where a due frame's pixels end up.
//!
//! The `rpi-led-matrix` C library is not thread-safe, so the matrix is
//! created and driven on the dispatcher's thread only. `TraceSink` stands in
//! for it on machines without the panel.
//!
//! ## Rust concepts
//! - A trait as the seam between scheduling and hardware
//! - `Option::take()` to move a value out of a struct field and back

use crate::{Color, PanelConfig};

#[cfg(feature = "hardware")]
use crate::{WallError, create_matrix};
#[cfg(feature = "hardware")]
use rpi_led_matrix::{LedCanvas, LedMatrix};

/// Anything that can show one full frame of pixels.
pub trait DisplaySink {
    /// Show `pixels`, laid out row-major across the panel.
    fn render(&mut self, pixels: &[Color]);
}

/// Map a flat pixel index to `(x, y)` on a panel `cols` wide.
pub fn pixel_position(index: usize, cols: u32) -> (i32, i32) {
    let cols = cols.max(1) as usize;
    ((index % cols) as i32, (index / cols) as i32)
}

// ── Hardware sink ────────────────────────────────────────────────────

/// Renders onto the RGB matrix through an offscreen canvas, swapped in on
/// vsync so a frame never shows half drawn.
#[cfg(feature = "hardware")]
pub struct MatrixSink {
    matrix: LedMatrix,
    canvas: Option<LedCanvas>,
    panel: PanelConfig,
    brightness: u8,
}

#[cfg(feature = "hardware")]
impl MatrixSink {
    pub fn new(panel: PanelConfig, brightness: u8) -> Result<Self, WallError> {
        let matrix = create_matrix(panel)?;
        let canvas = Some(matrix.offscreen_canvas());
        Ok(Self {
            matrix,
            canvas,
            panel,
            brightness,
        })
    }

    /// Blank the panel, e.g. on shutdown.
    pub fn clear(&mut self) {
        if let Some(mut canvas) = self.canvas.take() {
            canvas.clear();
            self.canvas = Some(self.matrix.swap(canvas));
        }
    }
}

#[cfg(feature = "hardware")]
impl DisplaySink for MatrixSink {
    fn render(&mut self, pixels: &[Color]) {
        let Some(mut canvas) = self.canvas.take() else {
            return;
        };
        for (i, pixel) in pixels.iter().take(self.panel.pixel_count()).enumerate() {
            let (x, y) = pixel_position(i, self.panel.cols);
            let c = pixel.apply_brightness(self.brightness);
            canvas.set(x, y, &c.into());
        }
        self.canvas = Some(self.matrix.swap(canvas));
    }
}

// ── Trace sink ───────────────────────────────────────────────────────

/// Logs each frame instead of driving a panel.
#[derive(Debug)]
pub struct TraceSink {
    panel: PanelConfig,
    frames: u64,
}

impl TraceSink {
    pub fn new(panel: PanelConfig) -> Self {
        Self { panel, frames: 0 }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl DisplaySink for TraceSink {
    fn render(&mut self, pixels: &[Color]) {
        self.frames += 1;
        let lit = pixels.iter().filter(|p| **p != Color::BLACK).count();
        tracing::debug!(
            frame = self.frames,
            lit,
            "render {}x{} frame",
            self.panel.cols,
            self.panel.rows
        );
    }
}
