//! Per-request processing pipeline.
//!
//! One [`Converter::apply`] call walks a single request through
//!
//! ```text
//! Acquired → Loaded → FormatApplied → BackgroundApplied
//!          → OverlaysApplied → TextApplied → Encoded → Released
//! ```
//!
//! on a handle it owns exclusively. A failing stage skips the rest, but the
//! handle is always returned to the pool before the error reaches the caller.

use super::backend::{BackendError, ImageHandle};
use super::calculations::{
    PlanError, TEXT_INSET, TEXT_SAMPLE, pad_text_layer, place_layer, plan_format, text_baseline,
};
use super::params::{AlphaMode, Filter, FormatOp, FormatPlan, TextDraw};
use crate::pool::{HandlePool, PoolError};
use crate::spec::{Color, Compression, OutputSpec, TextBlock};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Pipeline states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Acquired,
    Loaded,
    FormatApplied,
    BackgroundApplied,
    OverlaysApplied,
    TextApplied,
    Encoded,
    Released,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Acquired => "acquire",
            Stage::Loaded => "load",
            Stage::FormatApplied => "format",
            Stage::BackgroundApplied => "background",
            Stage::OverlaysApplied => "overlays",
            Stage::TextApplied => "text",
            Stage::Encoded => "encode",
            Stage::Released => "release",
        })
    }
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("{stage} stage failed: {source}")]
    Backend {
        stage: Stage,
        #[source]
        source: BackendError,
    },
    #[error("text stage failed: {0}")]
    Text(#[source] BackendError),
}

impl ConvertError {
    /// The stage that failed, when a handle primitive was at fault.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ConvertError::Backend { stage, .. } => Some(*stage),
            ConvertError::Text(_) => Some(Stage::TextApplied),
            _ => None,
        }
    }
}

fn at(stage: Stage) -> impl Fn(BackendError) -> ConvertError {
    move |source| ConvertError::Backend { stage, source }
}

/// What to do when the optional text block cannot be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFailurePolicy {
    /// Log a warning and return the image without the text.
    #[default]
    Skip,
    /// Fail the whole request.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvertOptions {
    pub filter: Filter,
    pub on_text_failure: TextFailurePolicy,
}

/// Turns source bytes plus an [`OutputSpec`] into encoded output, drawing
/// handles from a shared pool.
///
/// `Converter` is `Sync` whenever its handles are `Send`, so one instance can
/// serve many worker threads.
pub struct Converter<H: ImageHandle> {
    pool: HandlePool<H>,
    options: ConvertOptions,
}

impl<H: ImageHandle> Converter<H> {
    pub fn new(pool: HandlePool<H>, options: ConvertOptions) -> Self {
        Self { pool, options }
    }

    pub fn pool(&self) -> &HandlePool<H> {
        &self.pool
    }

    pub fn options(&self) -> ConvertOptions {
        self.options
    }

    /// Close the underlying pool. In-flight requests finish normally.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Run one request to completion.
    ///
    /// Blocks while every handle is checked out. The handle is back in the
    /// pool (or destroyed, if the pool closed meanwhile) before this returns,
    /// on success and on failure alike.
    pub fn apply(&self, blob: &[u8], spec: &OutputSpec) -> Result<Vec<u8>, ConvertError> {
        let mut handle = self.pool.take()?;
        debug!(stage = %Stage::Acquired, "pipeline");

        let outcome = Pipeline {
            handle: &mut *handle,
            options: &self.options,
        }
        .run(blob, spec);

        let released = handle.release();
        debug!(stage = %Stage::Released, ok = outcome.is_ok(), "pipeline");

        let bytes = outcome?;
        released?;
        Ok(bytes)
    }
}

struct Pipeline<'a, H: ImageHandle> {
    handle: &'a mut H,
    options: &'a ConvertOptions,
}

impl<H: ImageHandle> Pipeline<'_, H> {
    fn run(mut self, blob: &[u8], spec: &OutputSpec) -> Result<Vec<u8>, ConvertError> {
        let plan = self.load(blob, spec)?;
        debug!(stage = %Stage::Loaded, strategy = %plan.strategy, "pipeline");

        self.format(&plan).map_err(at(Stage::FormatApplied))?;
        debug!(stage = %Stage::FormatApplied, "pipeline");

        self.background(spec.compression, spec.background)
            .map_err(at(Stage::BackgroundApplied))?;
        debug!(stage = %Stage::BackgroundApplied, background = %spec.background, "pipeline");

        for overlay in &spec.overlays {
            let layer = self
                .handle
                .decode_layer(overlay.as_bytes())
                .map_err(at(Stage::OverlaysApplied))?;
            self.handle
                .composite(&layer, 0, 0)
                .map_err(at(Stage::OverlaysApplied))?;
        }
        debug!(stage = %Stage::OverlaysApplied, count = spec.overlays.len(), "pipeline");

        if let Some(block) = &spec.text {
            match self.text(block) {
                Ok(()) => debug!(stage = %Stage::TextApplied, "pipeline"),
                Err(e) => match self.options.on_text_failure {
                    TextFailurePolicy::Skip => warn!("skipping text block: {e}"),
                    TextFailurePolicy::Abort => return Err(ConvertError::Text(e)),
                },
            }
        }

        let bytes = self
            .handle
            .encode(spec.compression, spec.quality)
            .map_err(at(Stage::Encoded))?;
        debug!(
            stage = %Stage::Encoded,
            compression = %spec.compression,
            bytes = bytes.len(),
            "pipeline"
        );
        Ok(bytes)
    }

    fn load(&mut self, blob: &[u8], spec: &OutputSpec) -> Result<FormatPlan, ConvertError> {
        self.handle.read_blob(blob).map_err(at(Stage::Loaded))?;
        self.handle.strip_metadata().map_err(at(Stage::Loaded))?;
        let input = self.handle.dimensions().map_err(at(Stage::Loaded))?;
        Ok(plan_format(input, spec, self.options.filter)?)
    }

    fn format(&mut self, plan: &FormatPlan) -> Result<(), BackendError> {
        for op in &plan.ops {
            match *op {
                FormatOp::Resize {
                    width,
                    height,
                    filter,
                } => self.handle.resize(width, height, filter)?,
                FormatOp::Crop {
                    width,
                    height,
                    x,
                    y,
                } => self.handle.crop(width, height, x, y)?,
                FormatOp::Extent {
                    width,
                    height,
                    x,
                    y,
                } => self.handle.extent(width, height, x, y)?,
            }
        }
        Ok(())
    }

    fn background(&mut self, compression: Compression, color: Color) -> Result<(), BackendError> {
        match compression {
            Compression::Jpeg => {
                self.handle.set_alpha_mode(AlphaMode::Remove)?;
                let color = if color.is_transparent() {
                    Color::WHITE
                } else {
                    color
                };
                self.handle.set_background(&color)
            }
            Compression::Png | Compression::Webp => {
                self.handle.set_alpha_mode(AlphaMode::Set)?;
                self.handle.set_background(&color)
            }
            Compression::Transient => self.handle.set_background(&color),
        }
    }

    fn text(&mut self, block: &TextBlock) -> Result<(), BackendError> {
        let base = self.handle.dimensions()?;
        let metrics = self
            .handle
            .measure_text(&block.font_name, block.font_size, TEXT_SAMPLE)?;

        let trimmed = self.handle.draw_text(&TextDraw {
            text: &block.text,
            font_name: &block.font_name,
            font_size: block.font_size,
            foreground: block.foreground,
            background: block.background,
            canvas: base,
            x: TEXT_INSET,
            baseline: text_baseline(&metrics),
        })?;

        let padding = pad_text_layer(
            self.handle.layer_dimensions(&trimmed),
            &metrics,
            block.font_size,
        );
        let layer = self.handle.pad_layer(
            trimmed,
            padding.width,
            padding.height,
            padding.x,
            padding.y,
            &block.background,
        )?;

        let (x, y) = place_layer(&block.anchor, self.handle.layer_dimensions(&layer), base);
        self.handle.composite(&layer, x, y)
    }
}
