//! Image handle trait and shared error type.
//!
//! An [`ImageHandle`] is one stateful, single-owner processing context: it
//! holds the image being converted, its alpha and background settings, and
//! whatever caches the implementation keeps between requests (loaded fonts,
//! for the bundled one). Handles live in a [`HandlePool`](crate::pool::HandlePool)
//! and are [`reset`](crate::pool::Reusable::reset) between uses.
//!
//! The trait is deliberately primitive. Deciding *which* primitives to run is
//! the job of [`calculations`](super::calculations) and the
//! [`pipeline`](super::pipeline); a handle only executes them.
//!
//! The production implementation is
//! [`RustHandle`](super::rust_backend::RustHandle), built on the `image` and
//! `ab_glyph` crates.

use super::params::{AlphaMode, Dimensions, Filter, FontMetrics, Quality, TextDraw};
use crate::pool::Reusable;
use crate::spec::{Color, Compression};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("could not encode image: {0}")]
    Encode(String),
    #[error("could not load font {name}: {reason}")]
    Font { name: String, reason: String },
    #[error("could not render text: {0}")]
    Text(String),
    #[error("no image loaded")]
    NoImage,
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// A single-owner image processing context.
///
/// Offsets for [`crop`](Self::crop), [`extent`](Self::extent) and
/// [`composite`](Self::composite) are the position of the existing content
/// relative to the new canvas origin, and may be negative.
pub trait ImageHandle: Reusable {
    /// A standalone image (overlay or rendered text) composited onto the base.
    type Layer;

    /// Load encoded image bytes as the base image.
    fn read_blob(&mut self, blob: &[u8]) -> Result<(), BackendError>;

    /// Size of the base image.
    fn dimensions(&self) -> Result<Dimensions, BackendError>;

    /// Drop profiles, comments and other metadata from the base image.
    fn strip_metadata(&mut self) -> Result<(), BackendError>;

    fn resize(&mut self, width: u32, height: u32, filter: Filter) -> Result<(), BackendError>;

    fn crop(&mut self, width: u32, height: u32, x: i64, y: i64) -> Result<(), BackendError>;

    /// Grow (or shrink) the canvas, filling new area with the current background.
    fn extent(&mut self, width: u32, height: u32, x: i64, y: i64) -> Result<(), BackendError>;

    fn set_alpha_mode(&mut self, mode: AlphaMode) -> Result<(), BackendError>;

    fn set_background(&mut self, color: &Color) -> Result<(), BackendError>;

    /// Decode encoded bytes into a layer, leaving the base image untouched.
    fn decode_layer(&mut self, blob: &[u8]) -> Result<Self::Layer, BackendError>;

    fn layer_dimensions(&self, layer: &Self::Layer) -> Dimensions;

    /// Place `layer` at `(x, y)` on a new `width` x `height` canvas filled with `fill`.
    fn pad_layer(
        &mut self,
        layer: Self::Layer,
        width: u32,
        height: u32,
        x: i64,
        y: i64,
        fill: &Color,
    ) -> Result<Self::Layer, BackendError>;

    /// Blend `layer` over the base image with its top-left corner at `(x, y)`.
    fn composite(&mut self, layer: &Self::Layer, x: i64, y: i64) -> Result<(), BackendError>;

    /// Measure `sample` in `font_name` at `font_size`.
    fn measure_text(
        &mut self,
        font_name: &str,
        font_size: f32,
        sample: &str,
    ) -> Result<FontMetrics, BackendError>;

    /// Render text onto a fresh layer, trimmed to the drawn glyphs.
    fn draw_text(&mut self, draw: &TextDraw<'_>) -> Result<Self::Layer, BackendError>;

    /// Encode the base image. [`Compression::Transient`] keeps the source format.
    fn encode(&mut self, compression: Compression, quality: Quality)
    -> Result<Vec<u8>, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Operations a [`MockHandle`] can be told to fail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FailAt {
        ReadBlob,
        DecodeLayer,
        MeasureText,
        DrawText,
        Encode,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        ReadBlob(usize),
        StripMetadata,
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
        SetAlphaMode(AlphaMode),
        SetBackground(Color),
        DecodeLayer(usize),
        PadLayer {
            width: u32,
            height: u32,
            x: i64,
            y: i64,
        },
        Composite {
            width: u32,
            height: u32,
            x: i64,
            y: i64,
        },
        MeasureText {
            font: String,
            size: f32,
        },
        DrawText {
            text: String,
            x: f32,
            baseline: f32,
        },
        Encode {
            compression: Compression,
            quality: u32,
        },
        Reset,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MockLayer {
        pub width: u32,
        pub height: u32,
    }

    /// Handle that records operations without touching pixels.
    ///
    /// Clones share the operation log, so a pool factory can hand out clones
    /// of one configured prototype and the test still sees every call.
    #[derive(Debug, Clone)]
    pub struct MockHandle {
        pub operations: Arc<Mutex<Vec<RecordedOp>>>,
        pub source: Dimensions,
        pub overlay: Dimensions,
        pub text_layer: Dimensions,
        pub metrics: FontMetrics,
        pub fail_at: Option<FailAt>,
        current: Option<Dimensions>,
    }

    impl Default for MockHandle {
        fn default() -> Self {
            Self {
                operations: Arc::new(Mutex::new(Vec::new())),
                source: Dimensions::new(400, 200),
                overlay: Dimensions::new(10, 10),
                text_layer: Dimensions::new(40, 12),
                metrics: FontMetrics {
                    char_height: 14.0,
                    descender: -3.0,
                },
                fail_at: None,
                current: None,
            }
        }
    }

    impl MockHandle {
        pub fn with_source(width: u32, height: u32) -> Self {
            Self {
                source: Dimensions::new(width, height),
                ..Self::default()
            }
        }

        pub fn failing_at(mut self, stage: FailAt) -> Self {
            self.fail_at = Some(stage);
            self
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        fn record(&self, op: RecordedOp) {
            self.operations.lock().unwrap().push(op);
        }

        fn check(&self, stage: FailAt) -> Result<(), BackendError> {
            if self.fail_at == Some(stage) {
                Err(BackendError::ProcessingFailed(format!("mock failure at {stage:?}")))
            } else {
                Ok(())
            }
        }
    }

    impl Reusable for MockHandle {
        fn reset(&mut self) {
            self.current = None;
            self.record(RecordedOp::Reset);
        }
    }

    impl ImageHandle for MockHandle {
        type Layer = MockLayer;

        fn read_blob(&mut self, blob: &[u8]) -> Result<(), BackendError> {
            self.record(RecordedOp::ReadBlob(blob.len()));
            self.check(FailAt::ReadBlob)?;
            self.current = Some(self.source);
            Ok(())
        }

        fn dimensions(&self) -> Result<Dimensions, BackendError> {
            self.current.ok_or(BackendError::NoImage)
        }

        fn strip_metadata(&mut self) -> Result<(), BackendError> {
            self.record(RecordedOp::StripMetadata);
            Ok(())
        }

        fn resize(&mut self, width: u32, height: u32, filter: Filter) -> Result<(), BackendError> {
            self.record(RecordedOp::Resize {
                width,
                height,
                filter,
            });
            self.current = Some(Dimensions::new(width, height));
            Ok(())
        }

        fn crop(&mut self, width: u32, height: u32, x: i64, y: i64) -> Result<(), BackendError> {
            self.record(RecordedOp::Crop {
                width,
                height,
                x,
                y,
            });
            self.current = Some(Dimensions::new(width, height));
            Ok(())
        }

        fn extent(&mut self, width: u32, height: u32, x: i64, y: i64) -> Result<(), BackendError> {
            self.record(RecordedOp::Extent {
                width,
                height,
                x,
                y,
            });
            self.current = Some(Dimensions::new(width, height));
            Ok(())
        }

        fn set_alpha_mode(&mut self, mode: AlphaMode) -> Result<(), BackendError> {
            self.record(RecordedOp::SetAlphaMode(mode));
            Ok(())
        }

        fn set_background(&mut self, color: &Color) -> Result<(), BackendError> {
            self.record(RecordedOp::SetBackground(*color));
            Ok(())
        }

        fn decode_layer(&mut self, blob: &[u8]) -> Result<MockLayer, BackendError> {
            self.record(RecordedOp::DecodeLayer(blob.len()));
            self.check(FailAt::DecodeLayer)?;
            Ok(MockLayer {
                width: self.overlay.width,
                height: self.overlay.height,
            })
        }

        fn layer_dimensions(&self, layer: &MockLayer) -> Dimensions {
            Dimensions::new(layer.width, layer.height)
        }

        fn pad_layer(
            &mut self,
            _layer: MockLayer,
            width: u32,
            height: u32,
            x: i64,
            y: i64,
            _fill: &Color,
        ) -> Result<MockLayer, BackendError> {
            self.record(RecordedOp::PadLayer {
                width,
                height,
                x,
                y,
            });
            Ok(MockLayer { width, height })
        }

        fn composite(&mut self, layer: &MockLayer, x: i64, y: i64) -> Result<(), BackendError> {
            self.record(RecordedOp::Composite {
                width: layer.width,
                height: layer.height,
                x,
                y,
            });
            Ok(())
        }

        fn measure_text(
            &mut self,
            font_name: &str,
            font_size: f32,
            _sample: &str,
        ) -> Result<FontMetrics, BackendError> {
            self.record(RecordedOp::MeasureText {
                font: font_name.to_string(),
                size: font_size,
            });
            self.check(FailAt::MeasureText)?;
            Ok(self.metrics)
        }

        fn draw_text(&mut self, draw: &TextDraw<'_>) -> Result<MockLayer, BackendError> {
            self.record(RecordedOp::DrawText {
                text: draw.text.to_string(),
                x: draw.x,
                baseline: draw.baseline,
            });
            self.check(FailAt::DrawText)?;
            Ok(MockLayer {
                width: self.text_layer.width,
                height: self.text_layer.height,
            })
        }

        fn encode(
            &mut self,
            compression: Compression,
            quality: Quality,
        ) -> Result<Vec<u8>, BackendError> {
            self.record(RecordedOp::Encode {
                compression,
                quality: quality.value(),
            });
            self.check(FailAt::Encode)?;
            let dims = self.current.ok_or(BackendError::NoImage)?;
            Ok(dims.to_string().into_bytes())
        }
    }

    #[test]
    fn mock_tracks_geometry() {
        let mut handle = MockHandle::with_source(800, 600);
        handle.read_blob(b"fake").unwrap();
        assert_eq!(handle.dimensions().unwrap(), Dimensions::new(800, 600));

        handle.resize(400, 300, Filter::Lanczos).unwrap();
        handle.extent(400, 400, 0, 50).unwrap();
        assert_eq!(handle.dimensions().unwrap(), Dimensions::new(400, 400));

        let ops = handle.get_operations();
        assert_eq!(ops[0], RecordedOp::ReadBlob(4));
        assert!(matches!(ops[2], RecordedOp::Extent { y: 50, .. }));
    }

    #[test]
    fn mock_reset_forgets_image() {
        let mut handle = MockHandle::default();
        handle.read_blob(b"x").unwrap();
        handle.reset();
        assert!(matches!(handle.dimensions(), Err(BackendError::NoImage)));
    }

    #[test]
    fn mock_clones_share_log() {
        let proto = MockHandle::default();
        let mut a = proto.clone();
        let mut b = proto.clone();
        a.strip_metadata().unwrap();
        b.strip_metadata().unwrap();
        assert_eq!(proto.get_operations().len(), 2);
    }

    #[test]
    fn mock_fails_where_told() {
        let mut handle = MockHandle::default().failing_at(FailAt::ReadBlob);
        assert!(handle.read_blob(b"x").is_err());
        assert!(matches!(handle.dimensions(), Err(BackendError::NoImage)));
    }
}
