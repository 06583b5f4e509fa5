//! Typed outcome of running one extraction engine against one drawing.
//!
//! Every value here is validated on construction: an [`ExtractionResult`] is
//! either a success carrying (possibly empty) content or a failure carrying a
//! non-empty error, and the items inside a success are attributed to the
//! source that produced them.

mod geom;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use geom::{BBox, Orientation, Point};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("source name is empty")]
    EmptySourceName,
    #[error("source '{source_name}' reported a text item with no text")]
    EmptyText { source_name: String },
    #[error("source '{source_name}' reported confidence {value} outside [0, 1]")]
    ConfidenceOutOfRange { source_name: String, value: f64 },
    #[error("source '{source_name}' failed without an error message")]
    MissingError { source_name: String },
    #[error("source '{source_name}' ({kind}) cannot contribute {content}")]
    UnsupportedContent {
        source_name: String,
        kind: SourceKind,
        content: &'static str,
    },
    #[error("source '{source_name}' reported non-finite geometry")]
    NonFiniteGeometry { source_name: String },
    #[error("invalid aggregation policy: {0}")]
    InvalidPolicy(String),
}

/// What categories of data a source is able to contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Text,
    Shape,
    Mixed,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Text => "text",
            SourceKind::Shape => "shape",
            SourceKind::Mixed => "mixed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "text" => Some(SourceKind::Text),
            "shape" | "shapes" => Some(SourceKind::Shape),
            "mixed" => Some(SourceKind::Mixed),
            _ => None,
        }
    }

    fn accepts_text(&self) -> bool {
        !matches!(self, SourceKind::Shape)
    }

    fn accepts_geometry(&self) -> bool {
        !matches!(self, SourceKind::Text)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextCategory {
    Printed,
    Handwritten,
    Mixed,
}

impl TextCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextCategory::Printed => "printed",
            TextCategory::Handwritten => "handwritten",
            TextCategory::Mixed => "mixed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "printed" => Some(TextCategory::Printed),
            "handwritten" | "handwriting" => Some(TextCategory::Handwritten),
            "mixed" => Some(TextCategory::Mixed),
            _ => None,
        }
    }
}

/// One extraction engine or hosted API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionSource {
    name: String,
    kind: SourceKind,
    category: TextCategory,
}

impl ExtractionSource {
    pub fn new(
        name: impl Into<String>,
        kind: SourceKind,
        category: TextCategory,
    ) -> Result<Self, ContractViolation> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(ContractViolation::EmptySourceName);
        }
        Ok(Self {
            name,
            kind,
            category,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Category inherited by every text item this source reports.
    pub fn category(&self) -> TextCategory {
        self.category
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TextSpan {
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl TextSpan {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Circle,
    Rectangle,
    Triangle,
    Polygon,
    Unknown,
}

impl ShapeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeType::Circle => "circle",
            ShapeType::Rectangle => "rectangle",
            ShapeType::Triangle => "triangle",
            ShapeType::Polygon => "polygon",
            ShapeType::Unknown => "unknown",
        }
    }

    /// Lenient label parsing for detector output; squares count as rectangles.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "circle" | "ellipse" => ShapeType::Circle,
            "rectangle" | "rect" | "square" => ShapeType::Rectangle,
            "triangle" => ShapeType::Triangle,
            "polygon" => ShapeType::Polygon,
            _ => ShapeType::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeSpec {
    pub shape_type: ShapeType,
    pub bbox: BBox,
    pub area: Option<f64>,
}

impl ShapeSpec {
    pub fn new(shape_type: ShapeType, bbox: BBox) -> Self {
        Self {
            shape_type,
            bbox,
            area: None,
        }
    }

    pub fn with_area(mut self, area: f64) -> Self {
        self.area = Some(area);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub start: Point,
    pub end: Point,
}

impl LineSegment {
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }
}

/// Raw content reported by a source before attribution.
///
/// `ExtractedContent::empty()` is the explicit marker for "the engine ran and
/// found nothing".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedContent {
    pub texts: Vec<TextSpan>,
    pub shapes: Vec<ShapeSpec>,
    pub lines: Vec<LineSegment>,
}

impl ExtractedContent {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_texts(texts: Vec<TextSpan>) -> Self {
        Self {
            texts,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.shapes.is_empty() && self.lines.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextItem {
    pub text: String,
    #[serde(rename = "source")]
    pub source_name: String,
    pub category: TextCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeItem {
    pub shape_type: ShapeType,
    pub bbox: BBox,
    pub area: f64,
    pub centroid: Point,
    #[serde(rename = "source")]
    pub source_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub start: Point,
    pub end: Point,
    pub length: f64,
    pub angle: f64,
    pub orientation: Orientation,
    #[serde(rename = "source")]
    pub source_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success {
        text_items: Vec<TextItem>,
        shapes: Vec<ShapeItem>,
        lines: Vec<LineItem>,
    },
    Failure {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    source_name: String,
    kind: SourceKind,
    #[serde(flatten)]
    outcome: Outcome,
    processing_time_ms: u64,
}

impl ExtractionResult {
    pub fn success(
        source: &ExtractionSource,
        content: ExtractedContent,
        processing_time_ms: u64,
    ) -> Result<Self, ContractViolation> {
        let name = source.name();
        if !content.texts.is_empty() && !source.kind().accepts_text() {
            return Err(unsupported(source, "text"));
        }
        if !content.shapes.is_empty() && !source.kind().accepts_geometry() {
            return Err(unsupported(source, "shapes"));
        }
        if !content.lines.is_empty() && !source.kind().accepts_geometry() {
            return Err(unsupported(source, "lines"));
        }

        let text_items = content
            .texts
            .into_iter()
            .map(|span| text_item(source, span))
            .collect::<Result<Vec<_>, _>>()?;
        let shapes = content
            .shapes
            .into_iter()
            .map(|shape| shape_item(name, shape))
            .collect::<Result<Vec<_>, _>>()?;
        let lines = content
            .lines
            .into_iter()
            .map(|segment| line_item(name, segment))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source_name: name.to_string(),
            kind: source.kind(),
            outcome: Outcome::Success {
                text_items,
                shapes,
                lines,
            },
            processing_time_ms,
        })
    }

    pub fn failure(
        source: &ExtractionSource,
        error: impl Into<String>,
        processing_time_ms: u64,
    ) -> Result<Self, ContractViolation> {
        let error = error.into().trim().to_string();
        if error.is_empty() {
            return Err(ContractViolation::MissingError {
                source_name: source.name().to_string(),
            });
        }
        Ok(Self {
            source_name: source.name().to_string(),
            kind: source.kind(),
            outcome: Outcome::Failure { error },
            processing_time_ms,
        })
    }

    /// Failure recorded by the orchestrator; a blank message becomes
    /// `unknown error` so a failed run is never lost.
    pub(crate) fn source_failure(
        source: &ExtractionSource,
        error: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        let error = error.into().trim().to_string();
        Self {
            source_name: source.name().to_string(),
            kind: source.kind(),
            outcome: Outcome::Failure {
                error: if error.is_empty() {
                    "unknown error".to_string()
                } else {
                    error
                },
            },
            processing_time_ms,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn status(&self) -> ExtractionStatus {
        match self.outcome {
            Outcome::Success { .. } => ExtractionStatus::Success,
            Outcome::Failure { .. } => ExtractionStatus::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == ExtractionStatus::Success
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failure { error } => Some(error),
            Outcome::Success { .. } => None,
        }
    }

    pub fn text_items(&self) -> &[TextItem] {
        match &self.outcome {
            Outcome::Success { text_items, .. } => text_items,
            Outcome::Failure { .. } => &[],
        }
    }

    pub fn shapes(&self) -> &[ShapeItem] {
        match &self.outcome {
            Outcome::Success { shapes, .. } => shapes,
            Outcome::Failure { .. } => &[],
        }
    }

    pub fn lines(&self) -> &[LineItem] {
        match &self.outcome {
            Outcome::Success { lines, .. } => lines,
            Outcome::Failure { .. } => &[],
        }
    }

    pub fn item_count(&self) -> usize {
        self.text_items().len() + self.shapes().len() + self.lines().len()
    }

    pub fn processing_time_ms(&self) -> u64 {
        self.processing_time_ms
    }
}

fn unsupported(source: &ExtractionSource, content: &'static str) -> ContractViolation {
    ContractViolation::UnsupportedContent {
        source_name: source.name().to_string(),
        kind: source.kind(),
        content,
    }
}

fn text_item(source: &ExtractionSource, span: TextSpan) -> Result<TextItem, ContractViolation> {
    let text = span.text.trim();
    if text.is_empty() {
        return Err(ContractViolation::EmptyText {
            source_name: source.name().to_string(),
        });
    }
    if let Some(value) = span.confidence {
        validate_confidence(source.name(), value)?;
    }
    Ok(TextItem {
        text: text.to_string(),
        source_name: source.name().to_string(),
        category: source.category(),
        confidence: span.confidence,
    })
}

fn shape_item(source_name: &str, shape: ShapeSpec) -> Result<ShapeItem, ContractViolation> {
    let area = shape.area.unwrap_or_else(|| shape.bbox.area());
    if !shape.bbox.is_finite() || !area.is_finite() || area < 0.0 {
        return Err(ContractViolation::NonFiniteGeometry {
            source_name: source_name.to_string(),
        });
    }
    Ok(ShapeItem {
        shape_type: shape.shape_type,
        bbox: shape.bbox,
        area,
        centroid: shape.bbox.centroid(),
        source_name: source_name.to_string(),
    })
}

fn line_item(source_name: &str, segment: LineSegment) -> Result<LineItem, ContractViolation> {
    if !segment.start.is_finite() || !segment.end.is_finite() {
        return Err(ContractViolation::NonFiniteGeometry {
            source_name: source_name.to_string(),
        });
    }
    let angle = geom::angle_degrees(&segment.start, &segment.end);
    Ok(LineItem {
        start: segment.start,
        end: segment.end,
        length: geom::segment_length(&segment.start, &segment.end),
        angle,
        orientation: Orientation::from_angle(angle),
        source_name: source_name.to_string(),
    })
}

pub(crate) fn validate_confidence(source_name: &str, value: f64) -> Result<(), ContractViolation> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ContractViolation::ConfidenceOutOfRange {
            source_name: source_name.to_string(),
            value,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tesseract() -> ExtractionSource {
        ExtractionSource::new("tesseract", SourceKind::Text, TextCategory::Printed).unwrap()
    }

    fn yolo() -> ExtractionSource {
        ExtractionSource::new("yolo", SourceKind::Shape, TextCategory::Printed).unwrap()
    }

    #[test]
    fn success_attributes_items_to_source() {
        let source = tesseract();
        let content = ExtractedContent::with_texts(vec![
            TextSpan::new("  DIM 150mm ").with_confidence(0.9),
            TextSpan::new("M8 x 1.25"),
        ]);
        let result = ExtractionResult::success(&source, content, 12).unwrap();

        assert_eq!(result.status(), ExtractionStatus::Success);
        assert_eq!(result.error_message(), None);
        assert_eq!(result.text_items().len(), 2);
        assert_eq!(result.text_items()[0].text, "DIM 150mm");
        assert_eq!(result.text_items()[0].source_name, "tesseract");
        assert_eq!(result.text_items()[0].category, TextCategory::Printed);
        assert_eq!(result.text_items()[1].confidence, None);
        assert_eq!(result.processing_time_ms(), 12);
    }

    #[test]
    fn empty_success_is_valid() {
        let result = ExtractionResult::success(&tesseract(), ExtractedContent::empty(), 0).unwrap();
        assert!(result.is_success());
        assert_eq!(result.item_count(), 0);
    }

    #[test]
    fn failure_requires_error_message() {
        let err = ExtractionResult::failure(&yolo(), "   ", 5).unwrap_err();
        assert_eq!(
            err,
            ContractViolation::MissingError {
                source_name: "yolo".to_string()
            }
        );

        let result = ExtractionResult::failure(&yolo(), "timeout", 5).unwrap();
        assert_eq!(result.status(), ExtractionStatus::Failure);
        assert_eq!(result.error_message(), Some("timeout"));
        assert!(result.text_items().is_empty());
        assert!(result.shapes().is_empty());
    }

    #[test]
    fn rejects_blank_text_and_bad_confidence() {
        let source = tesseract();
        let blank = ExtractedContent::with_texts(vec![TextSpan::new(" \n")]);
        assert!(matches!(
            ExtractionResult::success(&source, blank, 0),
            Err(ContractViolation::EmptyText { .. })
        ));

        for value in [1.5, -0.1, f64::NAN] {
            let content = ExtractedContent::with_texts(vec![TextSpan::new("A").with_confidence(value)]);
            assert!(matches!(
                ExtractionResult::success(&source, content, 0),
                Err(ContractViolation::ConfidenceOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn rejects_content_outside_source_kind() {
        let shapes_from_text_source = ExtractedContent {
            shapes: vec![ShapeSpec::new(ShapeType::Circle, BBox::new(0.0, 0.0, 10.0, 10.0))],
            ..ExtractedContent::default()
        };
        assert!(matches!(
            ExtractionResult::success(&tesseract(), shapes_from_text_source, 0),
            Err(ContractViolation::UnsupportedContent { content: "shapes", .. })
        ));

        let text_from_shape_source = ExtractedContent::with_texts(vec![TextSpan::new("A")]);
        assert!(matches!(
            ExtractionResult::success(&yolo(), text_from_shape_source, 0),
            Err(ContractViolation::UnsupportedContent { content: "text", .. })
        ));
    }

    #[test]
    fn derives_shape_and_line_geometry() {
        let content = ExtractedContent {
            shapes: vec![ShapeSpec::new(ShapeType::from_label("Square"), BBox::new(0.0, 0.0, 20.0, 10.0))],
            lines: vec![LineSegment::new(Point::new(0.0, 0.0), Point::new(3.0, 4.0))],
            ..ExtractedContent::default()
        };
        let result = ExtractionResult::success(&yolo(), content, 0).unwrap();

        let shape = &result.shapes()[0];
        assert_eq!(shape.shape_type, ShapeType::Rectangle);
        assert_eq!(shape.area, 200.0);
        assert_eq!(shape.centroid, Point::new(10.0, 5.0));

        let line = &result.lines()[0];
        assert_eq!(line.length, 5.0);
        assert_eq!(line.orientation, Orientation::Diagonal);
        assert_eq!(line.source_name, "yolo");
    }

    #[test]
    fn rejects_non_finite_geometry() {
        let content = ExtractedContent {
            lines: vec![LineSegment::new(Point::new(f64::INFINITY, 0.0), Point::new(1.0, 1.0))],
            ..ExtractedContent::default()
        };
        assert!(matches!(
            ExtractionResult::success(&yolo(), content, 0),
            Err(ContractViolation::NonFiniteGeometry { .. })
        ));
    }

    #[test]
    fn source_name_must_not_be_blank() {
        assert_eq!(
            ExtractionSource::new("  ", SourceKind::Mixed, TextCategory::Mixed).unwrap_err(),
            ContractViolation::EmptySourceName
        );
    }

    #[test]
    fn text_item_serializes_source_key() {
        let source = tesseract();
        let content = ExtractedContent::with_texts(vec![TextSpan::new("DIM 150mm")]);
        let result = ExtractionResult::success(&source, content, 0).unwrap();
        let value = serde_json::to_value(&result.text_items()[0]).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"text": "DIM 150mm", "source": "tesseract", "category": "printed"})
        );
    }
}
