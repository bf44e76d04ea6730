//! Pure Rust image handle.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::load_from_memory_with_format` |
//! | Resize | `DynamicImage::resize_exact` (Lanczos3 / Triangle / Nearest) |
//! | Crop | `DynamicImage::crop_imm` |
//! | Extent, composite | `image::imageops::overlay` onto a fresh RGBA canvas |
//! | Background | padding fill (alpha kept), or "over" blend when alpha is removed |
//! | Text | `ab_glyph` outlines, coverage-blended onto an RGBA layer |
//! | Encode → JPEG | `JpegEncoder::new_with_quality` |
//! | Encode → PNG, WebP, TIFF | `DynamicImage::write_to` (WebP is lossless) |

use super::backend::{BackendError, ImageHandle};
use super::params::{AlphaMode, Dimensions, Filter, FontMetrics, Quality, TextDraw};
use crate::pool::Reusable;
use crate::spec::{Color, Compression};
use ab_glyph::{Font, FontVec, GlyphId, PxScale, ScaleFont, point};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::LazyLock;

/// Extensions whose decoders are compiled in.
const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Whether `blob` is already encoded in the format `extension` names, so a
/// transient conversion can be written under that extension.
pub fn source_matches_extension(blob: &[u8], extension: &str) -> bool {
    match (image::guess_format(blob), ImageFormat::from_extension(extension)) {
        (Ok(source), Some(target)) => source == target,
        _ => false,
    }
}

/// Read the pixel size of an encoded image without decoding it.
pub fn identify(blob: &[u8]) -> Result<Dimensions, BackendError> {
    let (width, height) = ImageReader::new(Cursor::new(blob))
        .with_guessed_format()?
        .into_dimensions()
        .map_err(|e| BackendError::Decode(e.to_string()))?;
    Ok(Dimensions::new(width, height))
}

/// Handle backed by the `image` crate.
///
/// Fonts are loaded from the path given as the font name and cached for the
/// lifetime of the handle, across resets.
pub struct RustHandle {
    image: Option<DynamicImage>,
    source_format: Option<ImageFormat>,
    background: Rgba<u8>,
    alpha: Option<AlphaMode>,
    /// Where the image content sits after the last extent; pixels outside
    /// it are padding.
    content: Option<ContentRect>,
    fonts: HashMap<String, FontVec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentRect {
    x: i64,
    y: i64,
    width: u32,
    height: u32,
}

impl ContentRect {
    fn contains(&self, px: u32, py: u32) -> bool {
        let (px, py) = (px as i64, py as i64);
        px >= self.x
            && py >= self.y
            && px < self.x + self.width as i64
            && py < self.y + self.height as i64
    }
}

const WHITE: Rgba<u8> = Rgba([0xFF, 0xFF, 0xFF, 0xFF]);

impl RustHandle {
    /// Build an empty handle. Meant as a [`HandlePool`](crate::pool::HandlePool)
    /// factory; requests should take handles from the pool.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            image: None,
            source_format: None,
            background: WHITE,
            alpha: None,
            content: None,
            fonts: HashMap::new(),
        }
    }

    fn image(&self) -> Result<&DynamicImage, BackendError> {
        self.image.as_ref().ok_or(BackendError::NoImage)
    }

    fn take_image(&mut self) -> Result<DynamicImage, BackendError> {
        self.image.take().ok_or(BackendError::NoImage)
    }

    fn font(&mut self, name: &str) -> Result<&FontVec, BackendError> {
        let font_error = |reason: String| BackendError::Font {
            name: name.to_string(),
            reason,
        };
        if !self.fonts.contains_key(name) {
            let bytes = std::fs::read(name).map_err(|e| font_error(e.to_string()))?;
            let font = FontVec::try_from_vec(bytes).map_err(|e| font_error(e.to_string()))?;
            self.fonts.insert(name.to_string(), font);
        }
        self.fonts
            .get(name)
            .ok_or_else(|| font_error("not cached".into()))
    }

    /// Opaque color used wherever alpha has to go.
    fn matte(&self) -> Rgb<u8> {
        if self.background[3] == 0 {
            Rgb([0xFF, 0xFF, 0xFF])
        } else {
            Rgb([self.background[0], self.background[1], self.background[2]])
        }
    }
}

fn filter_type(filter: Filter) -> FilterType {
    match filter {
        Filter::Lanczos => FilterType::Lanczos3,
        Filter::Triangle => FilterType::Triangle,
        Filter::Nearest => FilterType::Nearest,
    }
}

/// Blend every pixel over an opaque color.
fn flatten(image: &RgbaImage, matte: Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let px = image.get_pixel(x, y);
        let a = px[3] as u32;
        let mix = |c: usize| ((px[c] as u32 * a + matte[c] as u32 * (255 - a) + 127) / 255) as u8;
        Rgb([mix(0), mix(1), mix(2)])
    })
}

/// Paint every pixel outside `content` with `color`.
fn fill_padding(image: &mut RgbaImage, content: ContentRect, color: Rgba<u8>) {
    for (x, y, px) in image.enumerate_pixels_mut() {
        if !content.contains(x, y) {
            *px = color;
        }
    }
}

/// Blend `src` over `dst` with `src`'s alpha scaled by `coverage`.
fn blend_coverage(dst: &mut Rgba<u8>, src: [u8; 4], coverage: f32) {
    let a = src[3] as f32 / 255.0 * coverage.clamp(0.0, 1.0);
    let da = dst[3] as f32 / 255.0;
    let out = a + da * (1.0 - a);
    if out <= 0.0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }
    for c in 0..3 {
        let mixed = (src[c] as f32 * a + dst[c] as f32 * da * (1.0 - a)) / out;
        dst[c] = mixed.round() as u8;
    }
    dst[3] = (out * 255.0).round() as u8;
}

/// Bring an RGBA result back to the channel layout of `original`.
fn restore_layout(original: &DynamicImage, rgba: RgbaImage) -> DynamicImage {
    if original.color().has_alpha() {
        DynamicImage::ImageRgba8(rgba)
    } else {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8())
    }
}

fn encode_error(e: image::ImageError) -> BackendError {
    BackendError::Encode(e.to_string())
}

impl Reusable for RustHandle {
    fn reset(&mut self) {
        self.image = None;
        self.source_format = None;
        self.background = WHITE;
        self.alpha = None;
        self.content = None;
    }
}

impl ImageHandle for RustHandle {
    type Layer = RgbaImage;

    fn read_blob(&mut self, blob: &[u8]) -> Result<(), BackendError> {
        let format = image::guess_format(blob).map_err(|e| BackendError::Decode(e.to_string()))?;
        let image = image::load_from_memory_with_format(blob, format)
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        self.image = Some(image);
        self.source_format = Some(format);
        self.content = None;
        Ok(())
    }

    fn dimensions(&self) -> Result<Dimensions, BackendError> {
        let image = self.image()?;
        Ok(Dimensions::new(image.width(), image.height()))
    }

    fn strip_metadata(&mut self) -> Result<(), BackendError> {
        // Decoding keeps pixels only; nothing is carried into the encoder.
        self.image().map(|_| ())
    }

    fn resize(&mut self, width: u32, height: u32, filter: Filter) -> Result<(), BackendError> {
        let image = self.image()?;
        let resized = image.resize_exact(width, height, filter_type(filter));
        self.image = Some(resized);
        self.content = None;
        Ok(())
    }

    fn crop(&mut self, width: u32, height: u32, x: i64, y: i64) -> Result<(), BackendError> {
        let image = self.image()?;
        let left = (-x).max(0) as u32;
        let top = (-y).max(0) as u32;
        if left >= image.width() || top >= image.height() {
            return Err(BackendError::ProcessingFailed(format!(
                "crop {width}x{height} at ({x}, {y}) is outside {}x{}",
                image.width(),
                image.height()
            )));
        }
        let cropped = image.crop_imm(left, top, width, height);
        self.image = Some(cropped);
        self.content = None;
        Ok(())
    }

    fn extent(&mut self, width: u32, height: u32, x: i64, y: i64) -> Result<(), BackendError> {
        let image = self.take_image()?;
        let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
        imageops::overlay(&mut canvas, &image.to_rgba8(), x, y);
        self.content = Some(match self.content {
            Some(inner) => ContentRect {
                x: inner.x + x,
                y: inner.y + y,
                ..inner
            },
            None => ContentRect {
                x,
                y,
                width: image.width(),
                height: image.height(),
            },
        });
        self.image = Some(DynamicImage::ImageRgba8(canvas));
        Ok(())
    }

    fn set_alpha_mode(&mut self, mode: AlphaMode) -> Result<(), BackendError> {
        let image = self.take_image()?;
        self.image = Some(match mode {
            AlphaMode::Set => DynamicImage::ImageRgba8(image.to_rgba8()),
            AlphaMode::Remove => image,
        });
        self.alpha = Some(mode);
        Ok(())
    }

    fn set_background(&mut self, color: &Color) -> Result<(), BackendError> {
        self.background = Rgba(color.to_rgba());
        let image = self.take_image()?;
        let applied = if color.is_transparent() || !image.color().has_alpha() {
            image
        } else if self.alpha == Some(AlphaMode::Remove) {
            DynamicImage::ImageRgb8(flatten(&image.to_rgba8(), self.matte()))
        } else {
            // Source alpha is kept; only the padding takes the color.
            let mut rgba = image.to_rgba8();
            if let Some(content) = self.content {
                fill_padding(&mut rgba, content, self.background);
            }
            DynamicImage::ImageRgba8(rgba)
        };
        self.image = Some(applied);
        Ok(())
    }

    fn decode_layer(&mut self, blob: &[u8]) -> Result<RgbaImage, BackendError> {
        let layer =
            image::load_from_memory(blob).map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(layer.to_rgba8())
    }

    fn layer_dimensions(&self, layer: &RgbaImage) -> Dimensions {
        Dimensions::new(layer.width(), layer.height())
    }

    fn pad_layer(
        &mut self,
        layer: RgbaImage,
        width: u32,
        height: u32,
        x: i64,
        y: i64,
        fill: &Color,
    ) -> Result<RgbaImage, BackendError> {
        let mut canvas = RgbaImage::from_pixel(width, height, Rgba(fill.to_rgba()));
        imageops::overlay(&mut canvas, &layer, x, y);
        Ok(canvas)
    }

    fn composite(&mut self, layer: &RgbaImage, x: i64, y: i64) -> Result<(), BackendError> {
        let image = self.take_image()?;
        let mut base = image.to_rgba8();
        imageops::overlay(&mut base, layer, x, y);
        self.image = Some(restore_layout(&image, base));
        Ok(())
    }

    fn measure_text(
        &mut self,
        font_name: &str,
        font_size: f32,
        sample: &str,
    ) -> Result<FontMetrics, BackendError> {
        let font = self.font(font_name)?;
        if let Some(missing) = sample.chars().find(|c| font.glyph_id(*c).0 == 0) {
            return Err(BackendError::Font {
                name: font_name.to_string(),
                reason: format!("no glyph for {missing:?}"),
            });
        }
        let scaled = font.as_scaled(PxScale::from(font_size));
        Ok(FontMetrics {
            char_height: scaled.height(),
            descender: scaled.descent(),
        })
    }

    fn draw_text(&mut self, draw: &TextDraw<'_>) -> Result<RgbaImage, BackendError> {
        let font = self.font(draw.font_name)?;
        let scale = PxScale::from(draw.font_size);
        let scaled = font.as_scaled(scale);

        let mut canvas = RgbaImage::from_pixel(
            draw.canvas.width,
            draw.canvas.height,
            Rgba(draw.background.to_rgba()),
        );
        let ink = draw.foreground.to_rgba();
        let (width, height) = (canvas.width() as i64, canvas.height() as i64);
        let mut bounds: Option<(u32, u32, u32, u32)> = None;

        let mut caret = draw.x;
        let mut previous: Option<GlyphId> = None;
        for c in draw.text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                caret += scaled.kern(prev, id);
            }
            let glyph = id.with_scale_and_position(scale, point(caret, draw.baseline));
            caret += scaled.h_advance(id);
            previous = Some(id);

            let Some(outlined) = font.outline_glyph(glyph) else {
                continue;
            };
            let origin = outlined.px_bounds().min;
            outlined.draw(|gx, gy, coverage| {
                let px = origin.x as i64 + gx as i64;
                let py = origin.y as i64 + gy as i64;
                if coverage <= 0.0 || px < 0 || py < 0 || px >= width || py >= height {
                    return;
                }
                let (px, py) = (px as u32, py as u32);
                blend_coverage(canvas.get_pixel_mut(px, py), ink, coverage);
                bounds = Some(match bounds {
                    None => (px, py, px, py),
                    Some((x0, y0, x1, y1)) => (x0.min(px), y0.min(py), x1.max(px), y1.max(py)),
                });
            });
        }

        let (x0, y0, x1, y1) = bounds.ok_or_else(|| {
            BackendError::Text(format!("nothing drawn for {:?}", draw.text))
        })?;
        Ok(imageops::crop_imm(&canvas, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image())
    }

    fn encode(
        &mut self,
        compression: Compression,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError> {
        let format = match compression {
            Compression::Jpeg => ImageFormat::Jpeg,
            Compression::Png => ImageFormat::Png,
            Compression::Webp => ImageFormat::WebP,
            Compression::Transient => self
                .source_format
                .ok_or_else(|| BackendError::Encode("source format unknown".into()))?,
        };

        let image = self.image()?;
        let mut buf = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                let rgb = if image.color().has_alpha() {
                    flatten(&image.to_rgba8(), self.matte())
                } else {
                    image.to_rgb8()
                };
                let encoder = JpegEncoder::new_with_quality(&mut buf, quality.value() as u8);
                DynamicImage::ImageRgb8(rgb)
                    .write_with_encoder(encoder)
                    .map_err(encode_error)?;
            }
            ImageFormat::WebP => {
                let prepared = if image.color().has_alpha() {
                    DynamicImage::ImageRgba8(image.to_rgba8())
                } else {
                    DynamicImage::ImageRgb8(image.to_rgb8())
                };
                prepared
                    .write_to(&mut Cursor::new(&mut buf), format)
                    .map_err(encode_error)?;
            }
            _ => {
                let prepared = match self.alpha {
                    Some(AlphaMode::Remove) if image.color().has_alpha() => {
                        DynamicImage::ImageRgb8(flatten(&image.to_rgba8(), self.matte()))
                    }
                    _ => image.clone(),
                };
                prepared
                    .write_to(&mut Cursor::new(&mut buf), format)
                    .map_err(encode_error)?;
            }
        }
        Ok(buf)
    }
}
