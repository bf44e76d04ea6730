//! # improc
//!
//! Turns a source image into a thumbnail, preview or banner described by a
//! compact output spec: target size, anchor, crop or pad, background, format,
//! quality, overlays and a line of text.
//!
//! # Architecture: Plan, Then Execute
//!
//! Every conversion is split in two:
//!
//! ```text
//! 1. Plan     source size + OutputSpec  →  FormatPlan   (pure geometry)
//! 2. Execute  FormatPlan + ImageHandle  →  encoded bytes (pixel work)
//! ```
//!
//! The planner never touches pixels, so every rounding rule and anchor case
//! is unit tested against plain numbers. The executor only talks to an
//! [`ImageHandle`](imaging::ImageHandle), so the stage order and the alpha
//! policy are tested against a recording mock.
//!
//! Handles are expensive to create and hold decoded pixels, so they live in
//! a bounded [`HandlePool`](pool::HandlePool). A conversion takes a handle,
//! uses it, and puts it back reset. When the pool is at capacity, callers
//! wait.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`spec`] | `OutputSpec` and friends; parses `WxH@ax,ay` templates, colors, formats |
//! | [`request`] | Builds an `OutputSpec` from loose string options (CLI flags, query params) |
//! | [`imaging`] | Planner, handle trait, pure-Rust handle, and the conversion pipeline |
//! | [`pool`] | Bounded, blocking pool of reusable handles |
//! | [`batch`] | Parallel conversion of a directory tree |
//! | [`config`] | `improc.toml` loading, stock defaults, validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Offsets Are Content Positions
//!
//! Crop and extent offsets are the position of the current image on the new
//! canvas. Padding at `y = 25` leaves 25 rows above; cropping at `x = -50`
//! drops the first 50 columns. One convention for both ops keeps the anchor
//! math in a single function, [`imaging::resolve_anchor`].
//!
//! ## Alpha Before Background
//!
//! JPEG has no alpha, so JPEG outputs are flattened onto the background (white
//! when none is given). PNG and WebP keep an explicit alpha channel. The alpha
//! mode is always set before the background is applied.
//!
//! ## Text Is Best Effort
//!
//! A missing font or an undrawable string skips the text stage with a warning
//! by default. Set `text.on_failure = "abort"` to fail the conversion instead.

pub mod batch;
pub mod config;
pub mod imaging;
pub mod output;
pub mod pool;
pub mod request;
pub mod spec;
