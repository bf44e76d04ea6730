//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Plan
//!
//! ```text
//! photo.jpg 400x200 → 100x100 (pad)
//!     1 resize 100x50 lanczos
//!     2 extent 100x100 at (0, 25)
//!     Output: png, quality 85, background none
//! ```
//!
//! ## Convert
//!
//! ```text
//! photo.jpg 400x200 → thumb.png (12345 bytes)
//! ```
//!
//! ## Batch
//!
//! ```text
//! 001 a.jpg → out/a.webp (2048 bytes)
//! ... b.png failed: load stage failed: could not decode image: ...
//! Converted 1 image, 1 failed
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>` or `String`)
//! for testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::batch::{BatchEvent, BatchSummary};
use crate::imaging::{Dimensions, FormatOp, FormatPlan};
use crate::spec::OutputSpec;
use std::path::Path;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn format_op(op: &FormatOp) -> String {
    match *op {
        FormatOp::Resize {
            width,
            height,
            filter,
        } => format!("resize {width}x{height} {filter}"),
        FormatOp::Crop {
            width,
            height,
            x,
            y,
        } => format!("crop {width}x{height} at ({x}, {y})"),
        FormatOp::Extent {
            width,
            height,
            x,
            y,
        } => format!("extent {width}x{height} at ({x}, {y})"),
    }
}

// ============================================================================
// plan
// ============================================================================

pub fn format_plan(
    source: &Path,
    input: Dimensions,
    spec: &OutputSpec,
    plan: &FormatPlan,
) -> Vec<String> {
    let target = plan
        .output_dimensions()
        .map(|d| d.to_string())
        .unwrap_or_else(|| input.to_string());
    let mut lines = vec![format!(
        "{} {} → {} ({})",
        file_label(source),
        input,
        target,
        plan.strategy
    )];
    for (i, op) in plan.ops.iter().enumerate() {
        lines.push(format!("{}{} {}", indent(1), i + 1, format_op(op)));
    }
    lines.push(format!(
        "{}Output: {}, quality {}, background {}",
        indent(1),
        spec.compression,
        spec.quality.value(),
        spec.background
    ));
    if !spec.overlays.is_empty() {
        lines.push(format!("{}Overlays: {}", indent(1), spec.overlays.len()));
    }
    if let Some(text) = &spec.text {
        lines.push(format!(
            "{}Text: {:?} in {} at {}px",
            indent(1),
            text.text,
            text.font_name,
            text.font_size
        ));
    }
    lines
}

pub fn print_plan(source: &Path, input: Dimensions, spec: &OutputSpec, plan: &FormatPlan) {
    for line in format_plan(source, input, spec, plan) {
        println!("{}", line);
    }
}

// ============================================================================
// convert
// ============================================================================

pub fn format_convert(source: &Path, input: Dimensions, output: &Path, bytes: usize) -> String {
    format!(
        "{} {} → {} ({} bytes)",
        file_label(source),
        input,
        output.display(),
        bytes
    )
}

pub fn print_convert(source: &Path, input: Dimensions, output: &Path, bytes: usize) {
    println!("{}", format_convert(source, input, output, bytes));
}

// ============================================================================
// batch
// ============================================================================

/// One line per finished file. `index` counts events as they arrive.
pub fn format_batch_event(index: usize, event: &BatchEvent) -> String {
    match event {
        BatchEvent::Converted {
            source,
            output,
            bytes,
        } => format!(
            "{} {} → {} ({} bytes)",
            format_index(index),
            file_label(source),
            output.display(),
            bytes
        ),
        BatchEvent::Failed { source, error } => {
            format!("... {} failed: {}", file_label(source), error)
        }
    }
}

pub fn format_batch_summary(summary: &BatchSummary) -> String {
    let mut line = format!("Converted {}", plural(summary.converted, "image"));
    if summary.failed > 0 {
        line.push_str(&format!(", {} failed", summary.failed));
    }
    line
}

pub fn print_batch_summary(summary: &BatchSummary) {
    println!("{}", format_batch_summary(summary));
}
