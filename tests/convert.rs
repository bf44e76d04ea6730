//! End-to-end conversions through the pooled pure-Rust handle.

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use improc::imaging::{
    BackendError, ConvertError, ConvertOptions, Converter, RustHandle, Stage, TextFailurePolicy,
    identify,
};
use improc::pool::HandlePool;
use improc::spec::{Anchor, Color, Compression, Gravity, OutputSpec, TextBlock, parse_output_spec};
use std::io::Cursor;

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

fn converter(options: ConvertOptions) -> Converter<RustHandle> {
    let pool = HandlePool::new(2, || Ok(RustHandle::new())).unwrap();
    Converter::new(pool, options)
}

fn encode(image: RgbaImage, format: ImageFormat) -> Vec<u8> {
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8()),
        _ => DynamicImage::ImageRgba8(image),
    };
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

fn solid(width: u32, height: u32, color: Rgba<u8>, format: ImageFormat) -> Vec<u8> {
    encode(RgbaImage::from_pixel(width, height, color), format)
}

/// Left half red, right half green.
fn halves(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, _| if x < width / 2 { RED } else { GREEN });
    encode(image, ImageFormat::Png)
}

fn spec(template: &str, compression: Compression) -> OutputSpec {
    OutputSpec {
        compression,
        ..parse_output_spec(template).unwrap()
    }
}

fn decode(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes).unwrap().to_rgba8()
}

fn close_to(actual: Rgba<u8>, expected: [u8; 4]) -> bool {
    actual
        .0
        .iter()
        .zip(expected)
        .all(|(a, e)| a.abs_diff(e) <= 8)
}

#[test]
fn pad_keeps_box_and_leaves_transparent_bands() {
    let conv = converter(ConvertOptions::default());
    let blob = solid(400, 200, RED, ImageFormat::Png);

    let out = conv.apply(&blob, &spec("100x100", Compression::Png)).unwrap();

    assert_eq!(identify(&out).unwrap().to_string(), "100x100");
    let pixels = decode(&out);
    assert_eq!(pixels.get_pixel(50, 5)[3], 0, "band above content");
    assert!(close_to(*pixels.get_pixel(50, 50), [255, 0, 0, 255]));
    assert_eq!(pixels.get_pixel(50, 95)[3], 0, "band below content");
}

#[test]
fn pad_fills_bands_with_background() {
    let conv = converter(ConvertOptions::default());
    let blob = solid(400, 200, RED, ImageFormat::Png);
    let request = OutputSpec {
        background: Color::parse_hex("0000ff").unwrap(),
        ..spec("100x100", Compression::Png)
    };

    let pixels = decode(&conv.apply(&blob, &request).unwrap());
    assert!(close_to(*pixels.get_pixel(50, 5), [0, 0, 255, 255]));
}

#[test]
fn background_leaves_transparent_source_transparent() {
    let conv = converter(ConvertOptions::default());
    let clear = Rgba([0, 0, 0, 0]);
    let blue = Color::parse_hex("0000ff").unwrap();

    let resized = OutputSpec {
        background: blue,
        ..spec("50x50", Compression::Png)
    };
    let pixels = decode(&conv.apply(&solid(100, 100, clear, ImageFormat::Png), &resized).unwrap());
    assert_eq!(pixels.get_pixel(25, 25)[3], 0);

    let padded = OutputSpec {
        background: blue,
        ..spec("100x100", Compression::Png)
    };
    let pixels = decode(&conv.apply(&solid(400, 200, clear, ImageFormat::Png), &padded).unwrap());
    assert_eq!(pixels.get_pixel(50, 50)[3], 0, "content area");
    assert_eq!(*pixels.get_pixel(50, 5), Rgba([0, 0, 255, 255]), "band");
}

#[test]
fn jpeg_pad_without_background_is_white() {
    let conv = converter(ConvertOptions::default());
    let blob = solid(400, 200, RED, ImageFormat::Png);

    let out = conv.apply(&blob, &spec("100x100", Compression::Jpeg)).unwrap();

    assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    let pixels = decode(&out);
    assert!(close_to(*pixels.get_pixel(50, 5), [255, 255, 255, 255]));
}

#[test]
fn crop_follows_horizontal_anchor() {
    let conv = converter(ConvertOptions::default());
    let blob = halves(400, 200);

    let cropped = |template: &str| OutputSpec {
        crop: true,
        ..spec(template, Compression::Png)
    };

    let left = decode(&conv.apply(&blob, &cropped("100x100@-1,0")).unwrap());
    let right = decode(&conv.apply(&blob, &cropped("100x100@1,0")).unwrap());

    assert_eq!(left.dimensions(), (100, 100));
    assert!(close_to(*left.get_pixel(10, 50), [255, 0, 0, 255]));
    assert!(close_to(*right.get_pixel(90, 50), [0, 255, 0, 255]));
}

#[test]
fn crop_flag_fills_the_box() {
    let conv = converter(ConvertOptions::default());
    let blob = halves(400, 200);
    let request = OutputSpec {
        crop: true,
        ..spec("100x100", Compression::Png)
    };

    let pixels = decode(&conv.apply(&blob, &request).unwrap());
    assert_eq!(pixels.dimensions(), (100, 100));
    assert_eq!(pixels.get_pixel(50, 2)[3], 255, "no padding when cropping");
}

#[test]
fn single_edge_keeps_aspect_ratio() {
    let conv = converter(ConvertOptions::default());
    let blob = solid(400, 200, RED, ImageFormat::Png);

    let out = conv.apply(&blob, &spec("200x", Compression::Webp)).unwrap();

    assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::WebP);
    assert_eq!(identify(&out).unwrap().to_string(), "200x100");
}

#[test]
fn transient_keeps_source_format() {
    let conv = converter(ConvertOptions::default());
    let blob = solid(64, 64, RED, ImageFormat::Jpeg);

    let out = conv.apply(&blob, &spec("32x32", Compression::Transient)).unwrap();

    assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    assert_eq!(identify(&out).unwrap().to_string(), "32x32");
}

#[test]
fn same_request_gives_same_bytes() {
    let conv = converter(ConvertOptions::default());
    let blob = halves(300, 120);
    let request = spec("90x90@1,-1", Compression::Png);

    let first = conv.apply(&blob, &request).unwrap();
    let second = conv.apply(&blob, &request).unwrap();
    assert_eq!(first, second);
}

#[test]
fn overlay_is_composited_at_origin() {
    let conv = converter(ConvertOptions::default());
    let blob = solid(100, 100, RED, ImageFormat::Png);
    let request = OutputSpec {
        overlays: vec![solid(10, 10, GREEN, ImageFormat::Png).into()],
        ..spec("100x100", Compression::Png)
    };

    let pixels = decode(&conv.apply(&blob, &request).unwrap());
    assert!(close_to(*pixels.get_pixel(5, 5), [0, 255, 0, 255]));
    assert!(close_to(*pixels.get_pixel(50, 50), [255, 0, 0, 255]));
}

fn missing_font_text() -> Option<TextBlock> {
    TextBlock::from_parts(
        Some("caption".into()),
        Some("/nonexistent/improc-test-font.ttf".into()),
        Some(16.0),
    )
}

#[test]
fn missing_font_is_skipped_by_default() {
    let conv = converter(ConvertOptions::default());
    let blob = solid(100, 100, RED, ImageFormat::Png);
    let request = OutputSpec {
        text: missing_font_text(),
        ..spec("50x50", Compression::Png)
    };

    let out = conv.apply(&blob, &request).unwrap();
    assert_eq!(identify(&out).unwrap().to_string(), "50x50");
}

#[test]
fn missing_font_aborts_when_configured() {
    let conv = converter(ConvertOptions {
        on_text_failure: TextFailurePolicy::Abort,
        ..ConvertOptions::default()
    });
    let blob = solid(100, 100, RED, ImageFormat::Png);
    let request = OutputSpec {
        text: missing_font_text(),
        ..spec("50x50", Compression::Png)
    };

    let err = conv.apply(&blob, &request).unwrap_err();
    assert!(matches!(err, ConvertError::Text(BackendError::Font { .. })));
    assert_eq!(err.stage(), Some(Stage::TextApplied));
    assert_eq!(conv.pool().status().idle, 1);
}

#[test]
fn undecodable_input_fails_at_load_and_returns_handle() {
    let conv = converter(ConvertOptions::default());

    let err = conv
        .apply(b"definitely not an image", &spec("10x10", Compression::Png))
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Loaded));
    let status = conv.pool().status();
    assert_eq!((status.live, status.idle), (1, 1));

    // The returned handle is clean and serves the next request.
    let out = conv
        .apply(&solid(20, 20, RED, ImageFormat::Png), &spec("10x10", Compression::Png))
        .unwrap();
    assert_eq!(identify(&out).unwrap().to_string(), "10x10");
}

#[test]
fn closed_converter_rejects_requests() {
    let conv = converter(ConvertOptions::default());
    conv.close();

    let err = conv
        .apply(&solid(4, 4, RED, ImageFormat::Png), &spec("2x2", Compression::Png))
        .unwrap_err();
    assert!(matches!(err, ConvertError::Pool(_)));
}

const FONT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fonts/DejaVuSansMono.ttf");
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

fn caption(anchor: Anchor) -> OutputSpec {
    let mut block = TextBlock::from_parts(Some("Hello".into()), Some(FONT.into()), Some(24.0))
        .unwrap();
    block.background = Color::Rgb([0, 0, 255]);
    block.anchor = anchor;
    OutputSpec {
        text: Some(block),
        ..spec("200x100", Compression::Png)
    }
}

/// Inclusive bounding box of pixels equal to `color`.
fn bounds_of(pixels: &RgbaImage, color: Rgba<u8>) -> Option<(u32, u32, u32, u32)> {
    pixels
        .enumerate_pixels()
        .filter(|(_, _, px)| **px == color)
        .fold(None, |acc, (x, y, _)| {
            Some(match acc {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            })
        })
}

fn render_caption(anchor: Anchor) -> RgbaImage {
    let conv = converter(ConvertOptions {
        on_text_failure: TextFailurePolicy::Abort,
        ..ConvertOptions::default()
    });
    let white = Rgba([255, 255, 255, 255]);
    decode(
        &conv
            .apply(&solid(200, 100, white, ImageFormat::Png), &caption(anchor))
            .unwrap(),
    )
}

#[test]
fn text_draws_ink_on_a_centered_box() {
    let pixels = render_caption(Anchor::CENTER);

    let ink = pixels
        .pixels()
        .filter(|px| px[0] < 100 && px[1] < 100 && px[2] < 100)
        .count();
    assert!(ink > 50, "expected glyph ink, found {ink} dark pixels");

    let (x0, y0, x1, y1) = bounds_of(&pixels, BLUE).unwrap();
    assert!(x1 - x0 > 40 && y1 - y0 > 15, "box {x0},{y0}-{x1},{y1} too small");
    assert!(((x0 + x1) as i64 - 199).abs() <= 3, "box {x0}..{x1} not centered");
    assert!(((y0 + y1) as i64 - 99).abs() <= 3, "box {y0}..{y1} not centered");
    // The base image is untouched outside the box.
    assert_eq!(*pixels.get_pixel(2, 2), Rgba([255, 255, 255, 255]));
}

#[test]
fn text_box_follows_anchor_edges() {
    let pushed = render_caption(Anchor::new(Gravity::Push, Gravity::Push));
    let (_, _, x1, y1) = bounds_of(&pushed, BLUE).unwrap();
    assert_eq!((x1, y1), (199, 99));

    let pulled = render_caption(Anchor::new(Gravity::Pull, Gravity::Pull));
    let (x0, y0, _, _) = bounds_of(&pulled, BLUE).unwrap();
    assert_eq!((x0, y0), (0, 0));
}
