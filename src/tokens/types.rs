//! Core types for pipeline input and output.
//!
//! A `Task` describes what to extract from a single image; a `DesignToken`
//! is one named, typed value produced by an agent.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::color::Rgb;

/// Metadata key holding the identifier of the agent or source that produced a token.
pub const SOURCE_METADATA_KEY: &str = "source";

/// Category of a design token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Color,
    Dimension,
    Spacing,
    BorderRadius,
    Typography,
    FontFamily,
    FontWeight,
    Shadow,
    Opacity,
    Other,
}

impl TokenKind {
    pub const ALL: [TokenKind; 10] = [
        TokenKind::Color,
        TokenKind::Dimension,
        TokenKind::Spacing,
        TokenKind::BorderRadius,
        TokenKind::Typography,
        TokenKind::FontFamily,
        TokenKind::FontWeight,
        TokenKind::Shadow,
        TokenKind::Opacity,
        TokenKind::Other,
    ];

    /// Returns the stable snake_case identifier of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Color => "color",
            TokenKind::Dimension => "dimension",
            TokenKind::Spacing => "spacing",
            TokenKind::BorderRadius => "border_radius",
            TokenKind::Typography => "typography",
            TokenKind::FontFamily => "font_family",
            TokenKind::FontWeight => "font_weight",
            TokenKind::Shadow => "shadow",
            TokenKind::Opacity => "opacity",
            TokenKind::Other => "other",
        }
    }

    /// Returns true for kinds whose values are measured lengths.
    pub fn is_length(&self) -> bool {
        matches!(
            self,
            TokenKind::Dimension | TokenKind::Spacing | TokenKind::BorderRadius
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "color" | "colour" => Ok(TokenKind::Color),
            "dimension" => Ok(TokenKind::Dimension),
            "spacing" => Ok(TokenKind::Spacing),
            "border_radius" | "radius" => Ok(TokenKind::BorderRadius),
            "typography" => Ok(TokenKind::Typography),
            "font_family" => Ok(TokenKind::FontFamily),
            "font_weight" => Ok(TokenKind::FontWeight),
            "shadow" => Ok(TokenKind::Shadow),
            "opacity" => Ok(TokenKind::Opacity),
            "other" => Ok(TokenKind::Other),
            other => Err(format!("unknown token kind '{}'", other)),
        }
    }
}

/// A unit of work for the pipeline.
///
/// Tasks are built once with the `with_*` methods and then shared by
/// reference across every stage; there are no mutating accessors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    id: String,
    image_ref: String,
    #[serde(default)]
    requested_kinds: Vec<TokenKind>,
    #[serde(default)]
    context: HashMap<String, serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl Task {
    /// Creates a task for the given image with a fresh UUID.
    pub fn new(image_ref: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            image_ref: image_ref.into(),
            requested_kinds: Vec::new(),
            context: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Overrides the generated task id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Restricts the run to the given token kinds.
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = TokenKind>) -> Self {
        self.requested_kinds = kinds.into_iter().collect();
        self
    }

    /// Adds a cross-stage context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image_ref(&self) -> &str {
        &self.image_ref
    }

    pub fn requested_kinds(&self) -> &[TokenKind] {
        &self.requested_kinds
    }

    pub fn context(&self) -> &HashMap<String, serde_json::Value> {
        &self.context
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns a context entry as a string slice, if present and a string.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }

    /// Returns true if the task asks for `kind` (an empty request means every kind).
    pub fn requests(&self, kind: TokenKind) -> bool {
        self.requested_kinds.is_empty() || self.requested_kinds.contains(&kind)
    }
}

/// A single extracted design token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesignToken {
    /// Token category.
    pub kind: TokenKind,
    /// Display name, e.g. "primary".
    pub name: String,
    /// Hierarchical path, e.g. ["color", "brand", "primary"].
    #[serde(default)]
    pub path: Vec<String>,
    /// Raw value as produced by the agent.
    pub value: serde_json::Value,
    /// Confidence in [0, 1].
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Alias target, e.g. "{color.brand.primary}".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Namespaced additional data (reverse-domain keys).
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl DesignToken {
    /// Creates a token. Confidence is clamped into [0, 1].
    pub fn new(
        kind: TokenKind,
        name: impl Into<String>,
        value: serde_json::Value,
        confidence: f64,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            path: Vec::new(),
            value,
            confidence: clamp_confidence(confidence),
            description: None,
            reference: None,
            extensions: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Shorthand for a color token with a string value.
    pub fn color(name: impl Into<String>, hex: impl Into<String>, confidence: f64) -> Self {
        Self::new(
            TokenKind::Color,
            name,
            serde_json::Value::String(hex.into()),
            confidence,
        )
    }

    pub fn with_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Records the producing source in metadata.
    pub fn with_source(self, source: impl Into<String>) -> Self {
        self.with_metadata(SOURCE_METADATA_KEY, serde_json::Value::String(source.into()))
    }

    /// Returns the producing source, if recorded.
    pub fn source(&self) -> Option<&str> {
        self.metadata
            .get(SOURCE_METADATA_KEY)
            .and_then(|v| v.as_str())
    }

    /// Returns the dotted path, falling back to the name when no path is set.
    pub fn path_string(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            self.path.join(".")
        }
    }

    /// Returns a normalized textual form of the value.
    ///
    /// Colors are rendered as uppercase `#RRGGBB` when parseable so that
    /// `#f00` and `#FF0000` share one canonical form.
    pub fn canonical_value(&self) -> String {
        if self.kind == TokenKind::Color {
            if let Some(rgb) = self.value.as_str().and_then(Rgb::parse) {
                return rgb.to_hex();
            }
        }
        match &self.value {
            serde_json::Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        }
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}
