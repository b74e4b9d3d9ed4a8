//! Map engine boundary.
//!
//! The native map engine is an external capability: expensive to construct
//! (it loads a style), cheap to reuse, and not reentrant. It is modelled as a
//! [`MapEngine`] owned by exactly one caller at a time, produced by an
//! [`EngineFactory`].
//!
//! [`BackgroundEngine`] is a software stand-in that paints the style's
//! background color, so the service runs without a native binding.

use mapgen_common::{LngLat, RenderOptions, StyleDocument};
use thiserror::Error;
use tiny_skia::{Color, Pixmap};

use crate::planner::PlannedTile;
use crate::raster::RasterTile;

/// Errors reported by an engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine could not be constructed (bad style, missing resources).
    #[error("engine initialization failed: {0}")]
    Init(String),

    /// One render call failed. The engine stays usable.
    #[error("render failed: {0}")]
    Render(String),

    /// The engine is in an unrecoverable state. Instances of the same pool
    /// should not be trusted any more.
    #[error("engine fault: {0}")]
    Fatal(String),
}

/// Parameters of one engine render call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRenderParams {
    pub center: LngLat,
    /// Logical width in pixels
    pub width: u32,
    /// Logical height in pixels
    pub height: u32,
    pub zoom: f64,
    pub pitch: f64,
    pub bearing: f64,
    pub scale: f64,
}

impl TileRenderParams {
    /// Request options with the tile's own center and size.
    pub fn for_tile(options: &RenderOptions, tile: &PlannedTile) -> Self {
        Self {
            center: tile.center,
            width: tile.logical_width,
            height: tile.logical_height,
            zoom: options.zoom,
            pitch: options.pitch,
            bearing: options.bearing,
            scale: options.scale,
        }
    }

    /// Size of the raster the engine returns, `floor(logical * scale)`.
    pub fn physical_size(&self) -> (u32, u32) {
        (
            (self.width as f64 * self.scale).floor() as u32,
            (self.height as f64 * self.scale).floor() as u32,
        )
    }
}

/// One loaded engine instance.
pub trait MapEngine: Send {
    /// Render one tile. Blocks the calling thread.
    fn render(&mut self, params: &TileRenderParams) -> Result<RasterTile, EngineError>;
}

/// Constructs and destroys engine instances.
pub trait EngineFactory: Send + Sync {
    /// Load `style` into a new engine rendering at `scale`. Blocks, often for seconds.
    fn create(&self, style: &StyleDocument, scale: f64) -> Result<Box<dyn MapEngine>, EngineError>;

    /// Free an engine's native resources.
    fn destroy(&self, engine: Box<dyn MapEngine>) {
        drop(engine);
    }
}

/// Software engine painting the style's `background` layer color.
pub struct BackgroundEngine {
    color: Color,
}

impl BackgroundEngine {
    pub fn new(style: &StyleDocument) -> Result<Self, EngineError> {
        let color = background_color(style)?;
        Ok(Self { color })
    }
}

impl MapEngine for BackgroundEngine {
    fn render(&mut self, params: &TileRenderParams) -> Result<RasterTile, EngineError> {
        let (width, height) = params.physical_size();
        let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
            EngineError::Render(format!("cannot allocate {}x{} tile", width, height))
        })?;
        pixmap.fill(self.color);

        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for pixel in pixmap.pixels() {
            let c = pixel.demultiply();
            data.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
        }
        RasterTile::new(data, width, height).map_err(|e| EngineError::Render(e.to_string()))
    }
}

/// Factory for [`BackgroundEngine`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BackgroundEngineFactory;

impl EngineFactory for BackgroundEngineFactory {
    fn create(&self, style: &StyleDocument, _scale: f64) -> Result<Box<dyn MapEngine>, EngineError> {
        Ok(Box::new(BackgroundEngine::new(style)?))
    }
}

/// Read `paint.background-color` of the first background layer. A style
/// without one renders white.
fn background_color(style: &StyleDocument) -> Result<Color, EngineError> {
    let layers = match style.as_value().get("layers") {
        Some(serde_json::Value::Array(layers)) => layers,
        Some(_) => return Err(EngineError::Init("style 'layers' must be an array".to_string())),
        None => return Err(EngineError::Init("style has no 'layers'".to_string())),
    };

    let value = layers
        .iter()
        .find(|layer| layer.get("type").and_then(|t| t.as_str()) == Some("background"))
        .and_then(|layer| layer.get("paint"))
        .and_then(|paint| paint.get("background-color"))
        .and_then(|c| c.as_str());

    match value {
        Some(text) => {
            let [r, g, b, a] = parse_color(text)
                .ok_or_else(|| EngineError::Init(format!("unsupported color '{}'", text)))?;
            Ok(Color::from_rgba8(r, g, b, a))
        }
        None => Ok(Color::WHITE),
    }
}

/// Parse `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb(r, g, b)` or `rgba(r, g, b, a)`.
pub fn parse_color(text: &str) -> Option<[u8; 4]> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix('#') {
        if !hex.is_ascii() {
            return None;
        }
        let digit = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok();
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        return match hex.len() {
            3 => Some([digit(0)? * 17, digit(1)? * 17, digit(2)? * 17, 255]),
            6 => Some([byte(0)?, byte(2)?, byte(4)?, 255]),
            8 => Some([byte(0)?, byte(2)?, byte(4)?, byte(6)?]),
            _ => None,
        };
    }

    let (body, has_alpha) = if let Some(rest) = text.strip_prefix("rgba(") {
        (rest.strip_suffix(')')?, true)
    } else if let Some(rest) = text.strip_prefix("rgb(") {
        (rest.strip_suffix(')')?, false)
    } else {
        return None;
    };

    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    match (parts.len(), has_alpha) {
        (3, false) | (4, true) => {}
        _ => return None,
    }
    let channel = |s: &str| s.parse::<f64>().ok().map(|v| v.clamp(0.0, 255.0).round() as u8);
    let alpha = if has_alpha {
        let a: f64 = parts[3].parse().ok()?;
        (a.clamp(0.0, 1.0) * 255.0).round() as u8
    } else {
        255
    };
    Some([channel(parts[0])?, channel(parts[1])?, channel(parts[2])?, alpha])
}
