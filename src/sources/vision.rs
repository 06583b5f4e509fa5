use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{RawContent, Source, SourceFuture};
use crate::data::DrawingImage;
use crate::extraction::{ExtractedContent, ExtractionSource, SourceKind, TextCategory};
use crate::providers::{
    Provider, ProviderKind, ProviderUsage, ToolSpec, build_provider, resolve_key,
};
use crate::settings::VisionSettings;

pub(crate) const TOOL_NAME: &str = "report_drawing_content";

const SYSTEM_PROMPT: &str = "You are an expert technical drawing analyst. \
Read the attached engineering drawing and report everything visible on it:
- every piece of text exactly as written: dimensions, tolerances, labels, notes, part numbers, materials, title block fields (drawing number, revision, date, scale);
- geometric shapes (circles, rectangles, triangles, polygons) with their pixel bounding boxes [x1, y1, x2, y2];
- straight line segments with start and end points in pixels.
Give each text item a confidence between 0 and 1. Report only what you can see; never invent values. \
Call the report_drawing_content tool with the result.";

/// A hosted vision model asked to report drawing content through a forced tool call.
#[derive(Debug, Clone)]
pub struct VisionSource {
    descriptor: ExtractionSource,
    provider: ProviderKind,
    model: String,
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DrawingReport {
    #[serde(flatten)]
    content: RawContent,
    #[serde(default)]
    summary: Option<String>,
}

impl VisionSource {
    pub fn new(provider: ProviderKind, settings: &VisionSettings) -> Result<Self> {
        let descriptor =
            ExtractionSource::new(provider.as_str(), SourceKind::Mixed, TextCategory::Mixed)?;
        let model = match provider {
            ProviderKind::OpenAI => settings.openai_model.clone(),
            ProviderKind::Claude => settings.claude_model.clone(),
            ProviderKind::Gemini => settings.gemini_model.clone(),
        }
        .unwrap_or_else(|| provider.default_model().to_string());
        Ok(Self {
            descriptor,
            provider,
            model,
            context: settings.context.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Source for VisionSource {
    fn descriptor(&self) -> &ExtractionSource {
        &self.descriptor
    }

    fn analyze(&self, image: &DrawingImage) -> SourceFuture {
        let source = self.clone();
        let image = image.clone();
        Box::pin(async move {
            let key = resolve_key(source.provider)?;
            let mut provider = build_provider(source.provider, key, source.model.clone())
                .append_system_input(SYSTEM_PROMPT.to_string())
                .append_user_image(&image);
            if let Some(context) = source.context.as_deref() {
                provider = provider.append_user_input(format!("Context: {}", context));
            }
            let response = provider
                .register_tool(tool_spec())
                .call_tool(TOOL_NAME)
                .await?;
            debug!(
                "{} answered with model {} ({})",
                source.provider.as_str(),
                response.model.as_deref().unwrap_or(&source.model),
                format_usage(response.usage.as_ref())
            );
            parse_report(response.args)
        })
    }
}

pub(crate) fn tool_spec() -> ToolSpec {
    ToolSpec {
        name: TOOL_NAME.to_string(),
        description: "Report the text, shapes and lines found on a technical drawing.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "texts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "text": {"type": "string"},
                            "confidence": {"type": "number", "minimum": 0, "maximum": 1}
                        },
                        "required": ["text"]
                    }
                },
                "shapes": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "shape_type": {
                                "type": "string",
                                "enum": ["circle", "rectangle", "triangle", "polygon", "unknown"]
                            },
                            "bbox": {
                                "type": "array",
                                "items": {"type": "number"},
                                "minItems": 4,
                                "maxItems": 4
                            }
                        },
                        "required": ["shape_type", "bbox"]
                    }
                },
                "lines": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "start": {"type": "array", "items": {"type": "number"}, "minItems": 2, "maxItems": 2},
                            "end": {"type": "array", "items": {"type": "number"}, "minItems": 2, "maxItems": 2}
                        },
                        "required": ["start", "end"]
                    }
                },
                "summary": {"type": "string"}
            },
            "required": ["texts", "shapes", "lines"]
        }),
    }
}

fn format_usage(usage: Option<&ProviderUsage>) -> String {
    let Some(usage) = usage else {
        return "tokens: unavailable".to_string();
    };
    let total = usage.total_tokens.or_else(|| {
        usage
            .prompt_tokens
            .zip(usage.completion_tokens)
            .map(|(prompt, completion)| prompt + completion)
    });

    let mut parts = Vec::new();
    if let Some(prompt) = usage.prompt_tokens {
        parts.push(format!("prompt={}", prompt));
    }
    if let Some(completion) = usage.completion_tokens {
        parts.push(format!("completion={}", completion));
    }
    if let Some(total) = total {
        parts.push(format!("total={}", total));
    }

    if parts.is_empty() {
        "tokens: unavailable".to_string()
    } else {
        format!("tokens: {}", parts.join(", "))
    }
}

/// Models are not held to the item contract: blank texts are dropped and
/// confidences are clamped into `[0, 1]`.
fn parse_report(args: serde_json::Value) -> Result<ExtractedContent> {
    let mut report: DrawingReport =
        serde_json::from_value(args).with_context(|| "tool arguments do not match the schema")?;
    if let Some(summary) = report.summary.as_deref() {
        debug!("drawing summary: {}", summary);
    }
    report.content.texts.retain(|text| !text.text.trim().is_empty());
    for text in &mut report.content.texts {
        text.confidence = text
            .confidence
            .filter(|value| value.is_finite())
            .map(|value| value.clamp(0.0, 1.0));
    }
    Ok(report.content.into_content())
}
