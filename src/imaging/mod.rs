//! Image processing: geometry planning plus pixel work behind a handle trait.
//!
//! | Operation | Where |
//! |---|---|
//! | **Plan** resize / crop / extent | [`calculations::plan_format`] (pure) |
//! | **Place** overlays and text | [`calculations::place_layer`] (pure) |
//! | **Execute** primitives | [`ImageHandle`] → [`RustHandle`] (`image` + `ab_glyph`) |
//! | **Run** a request end to end | [`Converter`] over a [`HandlePool`](crate::pool::HandlePool) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageHandle`] trait + [`RustHandle`]
//! - **Pipeline**: The per-request state machine combining calculations + handle

pub mod backend;
pub mod calculations;
mod params;
pub mod pipeline;
pub mod rust_backend;

pub use backend::{BackendError, ImageHandle};
pub use calculations::{PlanError, plan_format, resolve_anchor};
pub use params::{
    AlphaMode, Dimensions, Filter, FontMetrics, FormatOp, FormatPlan, Quality, Strategy, TextDraw,
};
pub use pipeline::{ConvertError, ConvertOptions, Converter, Stage, TextFailurePolicy};
pub use rust_backend::{RustHandle, identify};
