//! Render request types.
//!
//! A request is a set of map options plus an opaque style document. Both are
//! immutable once submitted, and their canonical JSON serialization is what
//! identifies identical requests.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{MapGenError, MapGenResult};

/// Web Mercator cannot represent latitudes beyond this.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_6;

/// A geographic coordinate, serialized as `[lon, lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct LngLat {
    pub lon: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl From<[f64; 2]> for LngLat {
    fn from(v: [f64; 2]) -> Self {
        Self { lon: v[0], lat: v[1] }
    }
}

impl From<LngLat> for [f64; 2] {
    fn from(c: LngLat) -> Self {
        [c.lon, c.lat]
    }
}

impl std::fmt::Display for LngLat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.lon, self.lat)
    }
}

/// Map options for one rendered image.
///
/// Missing fields take the defaults of the original service (Helsinki region,
/// 500x500 at zoom 10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Geographic center of the image
    pub center: LngLat,
    /// Logical width in pixels (before scale)
    pub width: u32,
    /// Logical height in pixels (before scale)
    pub height: u32,
    pub zoom: f64,
    /// Pixel ratio; physical size is `logical * scale`
    pub scale: f64,
    pub pitch: f64,
    pub bearing: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            center: LngLat::new(24.9, 60.5),
            width: 500,
            height: 500,
            zoom: 10.0,
            scale: 1.0,
            pitch: 0.0,
            bearing: 0.0,
        }
    }
}

impl RenderOptions {
    /// Reject inputs the planner is not defined for.
    pub fn validate(&self, max_image_edge: u32) -> MapGenResult<()> {
        if self.width == 0 {
            return Err(MapGenError::invalid_parameter("width", "must be greater than 0"));
        }
        if self.height == 0 {
            return Err(MapGenError::invalid_parameter("height", "must be greater than 0"));
        }
        if self.width > max_image_edge || self.height > max_image_edge {
            return Err(MapGenError::invalid_parameter(
                "width/height",
                format!("must not exceed {} pixels", max_image_edge),
            ));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(MapGenError::invalid_parameter("scale", "must be a positive number"));
        }
        let physical_width = self.width as f64 * self.scale;
        let physical_height = self.height as f64 * self.scale;
        if physical_width < 1.0 || physical_height < 1.0 {
            return Err(MapGenError::invalid_parameter(
                "scale",
                "scaled image must be at least one pixel",
            ));
        }
        // The edge limit applies to the rendered size too
        if physical_width > max_image_edge as f64 || physical_height > max_image_edge as f64 {
            return Err(MapGenError::invalid_parameter(
                "scale",
                format!("scaled image must not exceed {} pixels per edge", max_image_edge),
            ));
        }
        if !self.zoom.is_finite() || self.zoom < 0.0 {
            return Err(MapGenError::invalid_parameter("zoom", "must be a non-negative number"));
        }
        if !self.pitch.is_finite() || !self.bearing.is_finite() {
            return Err(MapGenError::invalid_parameter("pitch/bearing", "must be finite"));
        }
        let LngLat { lon, lat } = self.center;
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(MapGenError::invalid_parameter(
                "center",
                format!("longitude {} out of range", lon),
            ));
        }
        if !lat.is_finite() || lat.abs() > MAX_MERCATOR_LATITUDE {
            return Err(MapGenError::invalid_parameter(
                "center",
                format!("latitude {} out of range", lat),
            ));
        }
        Ok(())
    }
}

/// An opaque map style document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StyleDocument(pub serde_json::Value);

impl StyleDocument {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Parse a style from JSON text. Only an object is accepted.
    pub fn from_json(text: &str) -> MapGenResult<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| MapGenError::InvalidStyle(e.to_string()))?;
        if !value.is_object() {
            return Err(MapGenError::InvalidStyle(
                "style must be a JSON object".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// Minimal style that only paints a background.
    pub fn background_only(color: &str) -> Self {
        Self(serde_json::json!({
            "version": 8,
            "name": "background",
            "sources": {},
            "layers": [
                { "id": "background", "type": "background", "paint": { "background-color": color } }
            ]
        }))
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Canonical serialization. Object keys are sorted by serde_json's map,
    /// so two equal documents always serialize identically.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    /// BLAKE3 digest of the canonical serialization, hex encoded.
    pub fn digest(&self) -> String {
        blake3::hash(&self.canonical_bytes()).to_hex().to_string()
    }
}

/// Request body accepted at the transport boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderRequest {
    #[serde(default)]
    pub options: RenderOptions,
    #[serde(default)]
    pub style: Option<StyleDocument>,
}

impl RenderRequest {
    pub fn new(options: RenderOptions, style: Option<StyleDocument>) -> Self {
        Self { options, style }
    }

    /// Resolve the style, falling back to the service default.
    pub fn into_parts(self, default_style: &Arc<StyleDocument>) -> (RenderOptions, Arc<StyleDocument>) {
        let style = match self.style {
            Some(style) => Arc::new(style),
            None => default_style.clone(),
        };
        (self.options, style)
    }
}

/// Content key for a request: BLAKE3 over the serialized options followed by
/// the serialized style. Byte-identical inputs always produce the same key.
pub fn job_key(options: &RenderOptions, style: &StyleDocument) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&serde_json::to_vec(options).unwrap_or_default());
    hasher.update(b"\0");
    hasher.update(&style.canonical_bytes());
    hasher.finalize().to_hex().to_string()
}
