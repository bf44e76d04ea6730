//! Building an [`OutputSpec`] from loose caller options.
//!
//! Callers rarely hand over a finished spec. They send a handful of optional
//! strings (from flags, a form, a query string) and expect sensible fallbacks
//! for anything missing or malformed. [`SpecRequest`] collects those strings
//! and [`SpecRequest::into_output_spec`] applies the fallbacks:
//!
//! | Input | Missing or invalid |
//! |---|---|
//! | `template` | composed from `width` / `height` / `anchor_x` / `anchor_y` |
//! | `quality` | the default quality |
//! | `out` | transient (keep the source format) |
//! | `background` | white for JPEG, transparent otherwise |
//! | `text` + `font` + `font_size` | no text block unless all three are present |
//! | `text_color` | black |
//! | `text_background` | transparent |

use crate::imaging::Quality;
use crate::spec::{
    Color, Compression, OutputSpec, OverlaySource, ParseError, TextBlock, parse_anchor,
    parse_output_spec,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecRequest {
    /// Full `<dims>[@<anchor>]` template. Wins over the separate parts.
    pub template: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub anchor_x: Option<String>,
    pub anchor_y: Option<String>,
    pub crop: bool,
    pub quality: Option<String>,
    /// Compression token: `jpg`, `jpeg`, `png`, `webp`.
    pub out: Option<String>,
    /// Six hex digits, with or without a leading `#`.
    pub background: Option<String>,
    pub text: Option<String>,
    pub font: Option<String>,
    pub font_size: Option<f32>,
    pub text_color: Option<String>,
    pub text_background: Option<String>,
    /// `<x>,<y>` anchor for the text block.
    pub text_anchor: Option<String>,
    /// Encoded images composited over the result, in order.
    pub overlays: Vec<Vec<u8>>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl SpecRequest {
    /// Resolve every option into a spec.
    ///
    /// Only the geometry can fail; everything else falls back silently.
    pub fn into_output_spec(self, default_quality: Quality) -> Result<OutputSpec, ParseError> {
        let template = match present(self.template) {
            Some(template) => template,
            None => compose_template(
                present(self.width).as_deref(),
                present(self.height).as_deref(),
                present(self.anchor_x).as_deref(),
                present(self.anchor_y).as_deref(),
            )?,
        };
        let mut spec = parse_output_spec(&template)?;

        spec.crop = self.crop;
        spec.quality = self
            .quality
            .as_deref()
            .and_then(|q| q.trim().parse::<u32>().ok())
            .and_then(Quality::try_new)
            .unwrap_or(default_quality);
        spec.compression = Compression::from_token(self.out.as_deref().unwrap_or_default());
        spec.background = Color::background_for(self.background.as_deref(), spec.compression);
        spec.overlays = self.overlays.into_iter().map(OverlaySource::from).collect();

        spec.text = TextBlock::from_parts(self.text, self.font, self.font_size).map(|mut block| {
            if let Some(color) = self.text_color.as_deref().and_then(Color::parse_hex) {
                block.foreground = color;
            }
            if let Some(color) = self.text_background.as_deref().and_then(Color::parse_hex) {
                block.background = color;
            }
            if let Some(anchor) = self.text_anchor.as_deref() {
                block.anchor = parse_anchor(anchor);
            }
            block
        });

        Ok(spec)
    }
}

/// Compose `<w>x<h>[@<ax>,<ay>]` from separate parts.
///
/// At least one dimension is required. Anchors come in pairs: giving only
/// one of them is an error rather than a silent center.
pub fn compose_template(
    width: Option<&str>,
    height: Option<&str>,
    anchor_x: Option<&str>,
    anchor_y: Option<&str>,
) -> Result<String, ParseError> {
    if width.is_none() && height.is_none() {
        return Err(ParseError::MissingDimensions);
    }
    let dims = format!("{}x{}", width.unwrap_or_default(), height.unwrap_or_default());

    match (anchor_x, anchor_y) {
        (None, None) => Ok(dims),
        (Some(x), Some(y)) => Ok(format!("{dims}@{x},{y}")),
        _ => Err(ParseError::Anchor),
    }
}
