//! Pure calculation functions for output geometry.
//!
//! All functions here are pure and testable without any I/O or images:
//! anchor offsets, the resize / pad / crop decision, and text layer layout.

use super::params::{Dimensions, Filter, FontMetrics, FormatOp, FormatPlan, Strategy};
use crate::spec::{Anchor, Gravity, OutputSpec};
use thiserror::Error;

/// Slack for float edges that should land on a whole pixel.
const EDGE_EPSILON: f64 = 1e-6;

/// Sample string measured to size the text layer.
pub const TEXT_SAMPLE: &str = "W";

/// Horizontal inset of the first glyph on the text canvas.
pub const TEXT_INSET: f32 = 10.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("output spec has neither width nor height")]
    EmptyTarget,
    #[error("source image has no pixels ({0})")]
    EmptySource(Dimensions),
}

/// Offset of content of extent `current` on a canvas of extent `next`.
///
/// - `Pull` keeps the content on the origin edge: `0`.
/// - `Push` keeps it on the far edge: `next - current`.
/// - `Center` splits the difference, truncated toward zero.
///
/// Negative results mean the content starts before the canvas origin (the
/// canvas is smaller and shows a window into the content).
///
/// ```
/// # use improc::imaging::resolve_anchor;
/// # use improc::spec::Gravity;
/// assert_eq!(resolve_anchor(Gravity::Center, 200.0, 100.0), -50);
/// assert_eq!(resolve_anchor(Gravity::Push, 50.0, 100.0), 50);
/// ```
pub fn resolve_anchor(gravity: Gravity, current: f64, next: f64) -> i64 {
    match gravity {
        Gravity::Pull => 0,
        Gravity::Push => (next - current) as i64,
        Gravity::Center => ((next - current) / 2.0) as i64,
    }
}

/// Decide how to turn a source of size `input` into `spec`'s box.
///
/// - Both edges given and the aspect ratio differs: crop (cover, then crop
///   the overflowing axis) when `spec.crop`, pad (fit, then extend the short
///   axis with background) otherwise.
/// - Otherwise a single resize, deriving a missing edge from the source
///   ratio and rounding up so the box is never under-covered.
///
/// When the width scale equals the height scale the width-first branch wins.
pub fn plan_format(
    input: Dimensions,
    spec: &OutputSpec,
    filter: Filter,
) -> Result<FormatPlan, PlanError> {
    if spec.width == 0 && spec.height == 0 {
        return Err(PlanError::EmptyTarget);
    }
    if input.width == 0 || input.height == 0 {
        return Err(PlanError::EmptySource(input));
    }

    let (iw, ih) = (input.width as f64, input.height as f64);
    let (sw, sh) = (spec.width as f64, spec.height as f64);

    let boxed = spec.width > 0 && spec.height > 0;
    let keeps_ratio = sw / sh == iw / ih;

    if !boxed || keeps_ratio {
        return Ok(plan_resize(input, spec, filter));
    }

    let width_first = sw / iw >= sh / ih;
    let plan = if spec.crop {
        plan_crop(input, spec, width_first, filter)
    } else {
        plan_pad(input, spec, width_first, filter)
    };
    Ok(plan)
}

fn plan_resize(input: Dimensions, spec: &OutputSpec, filter: Filter) -> FormatPlan {
    let (iw, ih) = (input.width as f64, input.height as f64);
    let (sw, sh) = (spec.width as f64, spec.height as f64);

    let width = if spec.width == 0 {
        cover_edge((sh / ih) * iw)
    } else {
        spec.width
    };
    let height = if spec.height == 0 {
        cover_edge((sw / iw) * ih)
    } else {
        spec.height
    };

    FormatPlan {
        strategy: Strategy::Resize,
        ops: vec![FormatOp::Resize {
            width,
            height,
            filter,
        }],
    }
}

fn plan_crop(input: Dimensions, spec: &OutputSpec, width_first: bool, filter: Filter) -> FormatPlan {
    let (iw, ih) = (input.width as f64, input.height as f64);
    let (sw, sh) = (spec.width as f64, spec.height as f64);
    let mut ops = Vec::with_capacity(2);

    if width_first {
        let next_height = cover_edge(ih * (sw / iw)).max(spec.height);
        ops.push(FormatOp::Resize {
            width: spec.width,
            height: next_height,
            filter,
        });
        if next_height != spec.height {
            ops.push(FormatOp::Crop {
                width: spec.width,
                height: spec.height,
                x: 0,
                y: resolve_anchor(spec.anchor.vertical, next_height as f64, sh),
            });
        }
    } else {
        let next_width = cover_edge(iw * (sh / ih)).max(spec.width);
        ops.push(FormatOp::Resize {
            width: next_width,
            height: spec.height,
            filter,
        });
        if next_width != spec.width {
            ops.push(FormatOp::Crop {
                width: spec.width,
                height: spec.height,
                x: resolve_anchor(spec.anchor.horizontal, next_width as f64, sw),
                y: 0,
            });
        }
    }

    FormatPlan {
        strategy: Strategy::Crop,
        ops,
    }
}

fn plan_pad(input: Dimensions, spec: &OutputSpec, width_first: bool, filter: Filter) -> FormatPlan {
    let (iw, ih) = (input.width as f64, input.height as f64);
    let (sw, sh) = (spec.width as f64, spec.height as f64);
    let mut ops = Vec::with_capacity(2);

    if width_first {
        let next_width = contain_edge(iw * (sh / ih)).min(spec.width);
        ops.push(FormatOp::Resize {
            width: next_width,
            height: spec.height,
            filter,
        });
        if next_width != spec.width {
            ops.push(FormatOp::Extent {
                width: spec.width,
                height: spec.height,
                x: resolve_anchor(spec.anchor.horizontal, next_width as f64, sw),
                y: 0,
            });
        }
    } else {
        let next_height = contain_edge(ih * (sw / iw)).min(spec.height);
        ops.push(FormatOp::Resize {
            width: spec.width,
            height: next_height,
            filter,
        });
        if next_height != spec.height {
            ops.push(FormatOp::Extent {
                width: spec.width,
                height: spec.height,
                x: 0,
                y: resolve_anchor(spec.anchor.vertical, next_height as f64, sh),
            });
        }
    }

    FormatPlan {
        strategy: Strategy::Pad,
        ops,
    }
}

/// Round an edge up to a whole pixel (at least 1).
fn cover_edge(value: f64) -> u32 {
    ((value - EDGE_EPSILON).ceil() as u32).max(1)
}

/// Round an edge down to a whole pixel (at least 1).
fn contain_edge(value: f64) -> u32 {
    ((value + EDGE_EPSILON).floor() as u32).max(1)
}

/// Baseline of the text on its layer canvas.
pub fn text_baseline(metrics: &FontMetrics) -> f32 {
    metrics.char_height + metrics.descender
}

/// Canvas the trimmed text is padded into, and where the text sits on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerPadding {
    pub width: u32,
    pub height: u32,
    pub x: i64,
    pub y: i64,
}

/// Pad trimmed text by one font size horizontally and one baseline
/// vertically, centering it horizontally and nudging it down past the
/// descender.
pub fn pad_text_layer(trimmed: Dimensions, metrics: &FontMetrics, font_size: f32) -> LayerPadding {
    let baseline = (text_baseline(metrics) as i64).max(0);
    let pad = (font_size as i64).max(0);

    let width = trimmed.width as i64 + pad;
    let height = trimmed.height as i64 + baseline;
    let x = (width - trimmed.width as i64) / 2;
    let y = (height - trimmed.height as i64 - metrics.descender as i64) / 2;

    LayerPadding {
        width: width as u32,
        height: height as u32,
        x,
        y: y.clamp(0, height - trimmed.height as i64),
    }
}

/// Where a layer of size `layer` lands on a base of size `base`.
pub fn place_layer(anchor: &Anchor, layer: Dimensions, base: Dimensions) -> (i64, i64) {
    (
        resolve_anchor(anchor.horizontal, layer.width as f64, base.width as f64),
        resolve_anchor(anchor.vertical, layer.height as f64, base.height as f64),
    )
}
