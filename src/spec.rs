//! Output specifications: what an encoded image should look like.
//!
//! An [`OutputSpec`] is built once per request, either directly or by parsing
//! a compact template with [`parse_output_spec`], and is only ever read after
//! that. The template grammar is `<dims>["@"<anchor>]`:
//!
//! ```text
//! 200x100         200 wide, 100 high, centered
//! 200x            200 wide, height follows the source aspect ratio
//! x100            100 high, width follows the source aspect ratio
//! 200x100@-1,1    pulled to the left edge, pushed to the bottom edge
//! ```
//!
//! Anchor values only matter by sign: negative pulls toward the origin,
//! positive pushes toward the far edge, zero (or garbage) centers.

use crate::imaging::Quality;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("the specified dimension format '{0}' is not valid")]
    Format(String),
    #[error("invalid {axis} '{value}': expected a non-negative integer")]
    Dimension { axis: &'static str, value: String },
    #[error("missing output dimensions")]
    MissingDimensions,
    #[error("malformed anchor specification")]
    Anchor,
}

/// Directional bias along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gravity {
    #[default]
    Center,
    /// Toward the origin (left / top).
    Pull,
    /// Toward the far edge (right / bottom).
    Push,
}

impl Gravity {
    /// Gravity from a signed integer token. Unparsable input centers.
    fn from_signed(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(v) if v < 0 => Gravity::Pull,
            Ok(v) if v > 0 => Gravity::Push,
            _ => Gravity::Center,
        }
    }
}

impl fmt::Display for Gravity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gravity::Center => "center",
            Gravity::Pull => "pull",
            Gravity::Push => "push",
        })
    }
}

/// Horizontal and vertical gravity, applied independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Anchor {
    pub horizontal: Gravity,
    pub vertical: Gravity,
}

impl Anchor {
    pub const CENTER: Anchor = Anchor {
        horizontal: Gravity::Center,
        vertical: Gravity::Center,
    };

    pub fn new(horizontal: Gravity, vertical: Gravity) -> Self {
        Self {
            horizontal,
            vertical,
        }
    }
}

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    Jpeg,
    Png,
    Webp,
    /// Keep whatever format the source was in.
    #[default]
    Transient,
}

impl Compression {
    /// Map a caller token (`jpg`, `JPEG`, `png`, `webp`) to a compression.
    /// Anything else keeps the source format.
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Compression::Jpeg,
            "png" => Compression::Png,
            "webp" => Compression::Webp,
            _ => Compression::Transient,
        }
    }

    /// Canonical format name, `None` for [`Compression::Transient`].
    pub fn as_str(self) -> Option<&'static str> {
        match self {
            Compression::Jpeg => Some("jpg"),
            Compression::Png => Some("png"),
            Compression::Webp => Some("webp"),
            Compression::Transient => None,
        }
    }

    /// File extension for outputs written in this compression.
    pub fn extension(self) -> Option<&'static str> {
        self.as_str()
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().unwrap_or("transient"))
    }
}

/// Either fully transparent or an opaque `#RRGGBB` color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    Transparent,
    Rgb([u8; 3]),
}

impl Color {
    pub const WHITE: Color = Color::Rgb([0xFF, 0xFF, 0xFF]);
    pub const BLACK: Color = Color::Rgb([0x00, 0x00, 0x00]);

    /// Parse exactly six hex digits, with or without a leading `#`.
    pub fn parse_hex(raw: &str) -> Option<Color> {
        let digits = raw.strip_prefix('#').unwrap_or(raw);
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Color::Rgb([channel(0)?, channel(2)?, channel(4)?]))
    }

    /// Background for a requested color string.
    ///
    /// Invalid or absent input falls back to white for JPEG (no alpha to
    /// show through) and to transparent for everything else.
    pub fn background_for(raw: Option<&str>, compression: Compression) -> Color {
        if let Some(color) = raw.and_then(Color::parse_hex) {
            return color;
        }
        match compression {
            Compression::Jpeg => Color::WHITE,
            _ => Color::Transparent,
        }
    }

    pub fn is_transparent(self) -> bool {
        matches!(self, Color::Transparent)
    }

    /// RGBA channels; transparent is all zeroes.
    pub fn to_rgba(self) -> [u8; 4] {
        match self {
            Color::Transparent => [0, 0, 0, 0],
            Color::Rgb([r, g, b]) => [r, g, b, u8::MAX],
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Transparent => f.write_str("none"),
            Color::Rgb([r, g, b]) => write!(f, "#{r:02X}{g:02X}{b:02X}"),
        }
    }
}

/// A line of text stamped onto the finished image.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub text: String,
    /// Font to render with. For the bundled backend this is a path to a
    /// TrueType/OpenType file.
    pub font_name: String,
    pub font_size: f32,
    pub foreground: Color,
    pub background: Color,
    pub anchor: Anchor,
}

impl TextBlock {
    /// Build a block only when text, font and a positive size are all given.
    pub fn from_parts(
        text: Option<String>,
        font_name: Option<String>,
        font_size: Option<f32>,
    ) -> Option<TextBlock> {
        let text = text.filter(|t| !t.is_empty())?;
        let font_name = font_name.filter(|f| !f.is_empty())?;
        let font_size = font_size.filter(|s| s.is_finite() && *s > 0.0)?;
        Some(TextBlock {
            text,
            font_name,
            font_size,
            foreground: Color::BLACK,
            background: Color::Transparent,
            anchor: Anchor::CENTER,
        })
    }
}

/// Raw bytes of an image composited over the base after resizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySource(pub Vec<u8>);

impl OverlaySource {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for OverlaySource {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Desired output of one conversion.
///
/// A width or height of 0 means "derive it from the other dimension,
/// preserving the source aspect ratio". Parsing never yields both as 0.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub width: u32,
    pub height: u32,
    pub crop: bool,
    pub anchor: Anchor,
    pub background: Color,
    pub quality: Quality,
    pub compression: Compression,
    pub overlays: Vec<OverlaySource>,
    pub text: Option<TextBlock>,
}

impl OutputSpec {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            crop: false,
            anchor: Anchor::CENTER,
            background: Color::Transparent,
            quality: Quality::default(),
            compression: Compression::Transient,
            overlays: Vec::new(),
            text: None,
        }
    }
}

/// Parse a `<dims>["@"<anchor>]` template.
///
/// ```
/// use improc::spec::{parse_output_spec, Gravity};
///
/// let spec = parse_output_spec("200x100@-1,1").unwrap();
/// assert_eq!((spec.width, spec.height), (200, 100));
/// assert_eq!(spec.anchor.horizontal, Gravity::Pull);
/// assert_eq!(spec.anchor.vertical, Gravity::Push);
/// ```
pub fn parse_output_spec(raw: &str) -> Result<OutputSpec, ParseError> {
    let lowered = raw.to_lowercase();
    let mut segments = lowered.split('@');
    let dims = segments.next().unwrap_or_default();
    let anchor = segments.next().map(parse_anchor).unwrap_or_default();

    let parts: Vec<&str> = dims.split('x').collect();
    let [width, height] = parts.as_slice() else {
        return Err(ParseError::Format(raw.to_string()));
    };

    let width = parse_dimension("width", width)?;
    let height = parse_dimension("height", height)?;
    if width == 0 && height == 0 {
        return Err(ParseError::MissingDimensions);
    }

    Ok(OutputSpec {
        anchor,
        ..OutputSpec::new(width, height)
    })
}

fn parse_dimension(axis: &'static str, raw: &str) -> Result<u32, ParseError> {
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse().map_err(|_| ParseError::Dimension {
        axis,
        value: raw.to_string(),
    })
}

/// Parse `<x>,<y>` into an anchor. Never fails: anything that is not two
/// comma-separated parts centers both axes.
pub fn parse_anchor(raw: &str) -> Anchor {
    let parts: Vec<&str> = raw.split(',').collect();
    match parts.as_slice() {
        [x, y] => Anchor::new(Gravity::from_signed(x), Gravity::from_signed(y)),
        _ => Anchor::CENTER,
    }
}
