//! Extraction engines run against a drawing.
//!
//! Every engine is a [`Source`]: it owns an [`ExtractionSource`] descriptor and
//! turns a drawing into raw [`ExtractedContent`] or an error. Attribution,
//! validation and timing happen in the pipeline.

use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use crate::data::DrawingImage;
use crate::extraction::{
    BBox, ExtractedContent, ExtractionSource, LineSegment, Point, ShapeSpec, ShapeType,
    SourceKind, TextCategory, TextSpan,
};
use crate::providers::ProviderKind;
use crate::settings::Settings;

mod command;
mod tesseract;
mod vision;

pub use command::CommandSource;
pub use tesseract::{TesseractSource, list_tesseract_languages};
pub use vision::VisionSource;

pub const TESSERACT: &str = "tesseract";

pub type SourceFuture = Pin<Box<dyn Future<Output = Result<ExtractedContent>> + Send>>;

pub trait Source: Send + Sync {
    fn descriptor(&self) -> &ExtractionSource;
    fn analyze(&self, image: &DrawingImage) -> SourceFuture;
}

#[derive(Debug, Clone)]
pub enum SourceImpl {
    Tesseract(TesseractSource),
    Command(CommandSource),
    Vision(VisionSource),
}

impl Source for SourceImpl {
    fn descriptor(&self) -> &ExtractionSource {
        match self {
            SourceImpl::Tesseract(source) => source.descriptor(),
            SourceImpl::Command(source) => source.descriptor(),
            SourceImpl::Vision(source) => source.descriptor(),
        }
    }

    fn analyze(&self, image: &DrawingImage) -> SourceFuture {
        match self {
            SourceImpl::Tesseract(source) => source.analyze(image),
            SourceImpl::Command(source) => source.analyze(image),
            SourceImpl::Vision(source) => source.analyze(image),
        }
    }
}

/// Builds the enabled sources in the order given.
///
/// Names are matched case-insensitively against the built-in engines
/// (`tesseract`, `openai`, `claude`, `gemini` and their aliases) and the
/// configured `[[commands]]`. Unknown names and names that resolve to the same
/// source twice are rejected.
pub fn build_sources(settings: &Settings, enabled: &[String]) -> Result<Vec<SourceImpl>> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for raw in enabled {
        let name = raw.trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        let source = build_source(settings, &name)?;
        if !seen.insert(source.descriptor().name().to_string()) {
            return Err(anyhow!(
                "source '{}' is enabled more than once",
                source.descriptor().name()
            ));
        }
        sources.push(source);
    }
    if sources.is_empty() {
        return Err(anyhow!("no sources enabled"));
    }
    Ok(sources)
}

fn build_source(settings: &Settings, name: &str) -> Result<SourceImpl> {
    if let Some(command) = settings.command(name) {
        return Ok(SourceImpl::Command(CommandSource::new(command)?));
    }
    if name == TESSERACT {
        return Ok(SourceImpl::Tesseract(TesseractSource::new(
            &settings.tesseract,
        )?));
    }
    if let Some(kind) = ProviderKind::from_name(name) {
        return Ok(SourceImpl::Vision(VisionSource::new(kind, &settings.vision)?));
    }
    Err(anyhow!(
        "unknown source '{}' (available: {})",
        name,
        available_sources(settings)
            .iter()
            .map(|source| source.name().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ))
}

/// Every source that can be enabled with the current settings.
pub fn available_sources(settings: &Settings) -> Vec<ExtractionSource> {
    let mut names = vec![
        (TESSERACT.to_string(), SourceKind::Text, TextCategory::Printed),
        (
            ProviderKind::OpenAI.as_str().to_string(),
            SourceKind::Mixed,
            TextCategory::Mixed,
        ),
        (
            ProviderKind::Claude.as_str().to_string(),
            SourceKind::Mixed,
            TextCategory::Mixed,
        ),
        (
            ProviderKind::Gemini.as_str().to_string(),
            SourceKind::Mixed,
            TextCategory::Mixed,
        ),
    ];
    for command in &settings.commands {
        names.retain(|(name, _, _)| name != &command.name);
        names.push((command.name.clone(), command.kind, command.category));
    }
    names
        .into_iter()
        .filter_map(|(name, kind, category)| ExtractionSource::new(name, kind, category).ok())
        .collect()
}

/// Content as external engines and vision tools report it.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawContent {
    #[serde(default)]
    pub texts: Vec<RawText>,
    #[serde(default)]
    pub shapes: Vec<RawShape>,
    #[serde(default)]
    pub lines: Vec<RawLine>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawText {
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawShape {
    #[serde(alias = "type", alias = "label")]
    pub shape_type: String,
    pub bbox: [f64; 4],
    #[serde(default)]
    pub area: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawLine {
    pub start: [f64; 2],
    pub end: [f64; 2],
}

impl RawContent {
    /// Converts without repairing anything; the pipeline rejects bad values.
    pub(crate) fn into_content(self) -> ExtractedContent {
        ExtractedContent {
            texts: self
                .texts
                .into_iter()
                .map(|text| TextSpan {
                    text: text.text,
                    confidence: text.confidence,
                })
                .collect(),
            shapes: self
                .shapes
                .into_iter()
                .map(|shape| {
                    let spec = ShapeSpec::new(
                        ShapeType::from_label(&shape.shape_type),
                        BBox::from(shape.bbox),
                    );
                    match shape.area {
                        Some(area) => spec.with_area(area),
                        None => spec,
                    }
                })
                .collect(),
            lines: self
                .lines
                .into_iter()
                .map(|line| LineSegment::new(Point::from(line.start), Point::from(line.end)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::CommandSettings;

    fn names(sources: &[SourceImpl]) -> Vec<&str> {
        sources
            .iter()
            .map(|source| source.descriptor().name())
            .collect()
    }

    fn with_yolo() -> Settings {
        let mut settings = Settings::default();
        settings.commands.push(CommandSettings {
            name: "yolo".to_string(),
            kind: SourceKind::Shape,
            category: TextCategory::Printed,
            program: "python3".to_string(),
            args: vec!["detect.py".to_string(), "{image}".to_string()],
        });
        settings
    }

    #[test]
    fn builds_sources_in_requested_order() {
        let settings = with_yolo();
        let enabled = ["Gemini", "yolo", "tesseract"].map(String::from);
        let sources = build_sources(&settings, &enabled).unwrap();
        assert_eq!(names(&sources), vec!["gemini", "yolo", "tesseract"]);
        assert_eq!(sources[1].descriptor().kind(), SourceKind::Shape);
        assert_eq!(sources[2].descriptor().category(), TextCategory::Printed);
    }

    #[test]
    fn aliases_count_as_duplicates() {
        let enabled = ["gpt4", "openai"].map(String::from);
        let err = build_sources(&Settings::default(), &enabled).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn unknown_source_lists_available_ones() {
        let enabled = ["easyocr".to_string()];
        let err = build_sources(&with_yolo(), &enabled).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown source 'easyocr'"));
        assert!(message.contains("tesseract, openai, claude, gemini, yolo"));
    }

    #[test]
    fn google_vision_is_not_an_alias_for_gemini() {
        let enabled = ["google".to_string()];
        let err = build_sources(&Settings::default(), &enabled).unwrap_err();
        assert!(err.to_string().contains("unknown source 'google'"));

        let mut settings = Settings::default();
        settings.commands.push(CommandSettings {
            name: "google".to_string(),
            kind: SourceKind::Mixed,
            category: TextCategory::Mixed,
            program: "python3".to_string(),
            args: vec!["cloud_vision.py".to_string()],
        });
        let sources = build_sources(&settings, &enabled).unwrap();
        assert!(matches!(sources[0], SourceImpl::Command(_)));
    }

    #[test]
    fn empty_selection_is_rejected() {
        let enabled = [" ".to_string()];
        assert!(build_sources(&Settings::default(), &enabled).is_err());
    }

    #[test]
    fn raw_content_parses_detector_output() {
        let raw: RawContent = serde_json::from_str(
            r#"{"shapes":[{"type":"Square","bbox":[0,0,10,10]},{"shape_type":"circle","bbox":[5,5,7,7],"area":2.5}],
                "lines":[{"start":[0,0],"end":[0,9]}]}"#,
        )
        .unwrap();
        let content = raw.into_content();
        assert!(content.texts.is_empty());
        assert_eq!(content.shapes[0].shape_type, ShapeType::Rectangle);
        assert_eq!(content.shapes[1].area, Some(2.5));
        assert_eq!(content.lines[0].end, Point::new(0.0, 9.0));
    }
}
