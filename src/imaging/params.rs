//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the [`calculations`](super::calculations) module (which
//! decides the geometry) and an [`ImageHandle`](super::ImageHandle) (which does
//! the pixel work). Keeping them as plain data lets the planner be tested
//! against a recording mock and lets `improc plan` print a plan without
//! touching pixels.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 85). Clamped on construction.
//! - [`Dimensions`]: Width × height in pixels.
//! - [`Filter`]: Resampling filter requested from the handle.
//! - [`AlphaMode`]: What to do with the alpha channel before the background is applied.
//! - [`FormatOp`] / [`FormatPlan`]: The resize / crop / extent sequence for one output.
//! - [`FontMetrics`] / [`TextDraw`]: Inputs and outputs of the text block stage.

use crate::spec::Color;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    /// Strict variant: `None` outside 1..=100.
    pub fn try_new(value: u32) -> Option<Self> {
        (1..=100).contains(&value).then_some(Self(value))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// Pixel size of a source image, an intermediate step, or a planned output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Resampling filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    #[default]
    Lanczos,
    Triangle,
    Nearest,
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Filter::Lanczos => "lanczos",
            Filter::Triangle => "triangle",
            Filter::Nearest => "nearest",
        })
    }
}

/// Alpha channel treatment applied before the background color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    /// Flatten onto the background and drop the channel (JPEG).
    Remove,
    /// Keep an explicit, straight (non-premultiplied) alpha channel.
    Set,
}

/// One geometric primitive of a format plan.
///
/// Offsets are the position of the current content relative to the origin of
/// the new canvas: a crop at `x = -50` keeps the columns starting at 50, an
/// extent at `y = 25` leaves 25 rows of background above the content.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum FormatOp {
    Resize {
        width: u32,
        height: u32,
        filter: Filter,
    },
    Crop {
        width: u32,
        height: u32,
        x: i64,
        y: i64,
    },
    Extent {
        width: u32,
        height: u32,
        x: i64,
        y: i64,
    },
}

/// Which decision the planner took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Plain resize; aspect ratio already matches or only one edge was given.
    Resize,
    /// Fit inside the box, then pad the short axis with background.
    Pad,
    /// Cover the box, then crop the long axis.
    Crop,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Resize => "resize",
            Strategy::Pad => "pad",
            Strategy::Crop => "crop",
        })
    }
}

/// Ordered operations turning a source of known size into the requested output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatPlan {
    pub strategy: Strategy,
    pub ops: Vec<FormatOp>,
}

impl FormatPlan {
    /// Final canvas size after all ops run.
    pub fn output_dimensions(&self) -> Option<Dimensions> {
        self.ops.last().map(|op| match *op {
            FormatOp::Resize { width, height, .. }
            | FormatOp::Crop { width, height, .. }
            | FormatOp::Extent { width, height, .. } => Dimensions::new(width, height),
        })
    }
}

/// Vertical font measurements used to place the text baseline, in pixels.
///
/// `descender` is negative (below the baseline), as reported by font tables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMetrics {
    pub char_height: f32,
    pub descender: f32,
}

/// Request to draw a line of text onto a fresh layer.
///
/// The layer starts as a `canvas`-sized rectangle filled with `background`;
/// the handle draws `text` with its first glyph at `(x, baseline)` and returns
/// the layer trimmed to the drawn glyphs.
#[derive(Debug, Clone, PartialEq)]
pub struct TextDraw<'a> {
    pub text: &'a str,
    pub font_name: &'a str,
    pub font_size: f32,
    pub foreground: Color,
    pub background: Color,
    pub canvas: Dimensions,
    pub x: f32,
    pub baseline: f32,
}
