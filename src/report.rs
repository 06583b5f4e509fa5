use anyhow::{Context, Result};

use crate::aggregate::MethodSummary;
use crate::pipeline::{BatchAnalysis, DrawingAnalysis};

const RULE_WIDE: usize = 60;
const RULE_NARROW: usize = 40;
const TEXT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

pub fn render(analysis: &DrawingAnalysis, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(render_text(analysis)),
        ReportFormat::Json => render_json(analysis),
    }
}

pub fn render_batch(batch: &BatchAnalysis, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(render_batch_text(batch)),
        ReportFormat::Json => render_batch_json(batch),
    }
}

pub fn render_json(analysis: &DrawingAnalysis) -> Result<String> {
    serde_json::to_string_pretty(analysis).with_context(|| "failed to serialize analysis")
}

pub fn render_batch_json(batch: &BatchAnalysis) -> Result<String> {
    serde_json::to_string_pretty(batch).with_context(|| "failed to serialize batch analysis")
}

/// Human-readable report for one drawing.
pub fn render_text(analysis: &DrawingAnalysis) -> String {
    let aggregated = &analysis.aggregated;
    let mut out = Vec::new();

    out.push("ENGINEERING DRAWING ANALYSIS REPORT".to_string());
    out.push("=".repeat(RULE_WIDE));
    out.push(format!(
        "Image: {} ({}x{})",
        analysis.image.name.as_deref().unwrap_or("drawing"),
        analysis.image.width,
        analysis.image.height
    ));
    out.push(format!("Analysis Date: {}", analysis.analyzed_at));
    out.push(format!("Methods Used: {}", aggregated.source_order.join(", ")));
    out.push(String::new());

    out.push("TEXT EXTRACTION SUMMARY:".to_string());
    out.push("-".repeat(RULE_NARROW));
    if aggregated.all_text.is_empty() {
        out.push("   No text detected".to_string());
    } else {
        for (idx, item) in aggregated.all_text.iter().enumerate() {
            out.push(format!(
                "{}. [{} - {}]:",
                idx + 1,
                item.source_name.to_uppercase(),
                item.category.as_str()
            ));
            out.push(format!("   {}", preview(&item.text)));
        }
    }
    out.push(String::new());

    out.push("SHAPES DETECTED:".to_string());
    out.push("-".repeat(RULE_NARROW));
    let counts = aggregated.shape_counts();
    if counts.is_empty() {
        out.push("   No shapes detected".to_string());
    } else {
        for (shape_type, count) in counts {
            out.push(format!("   {}: {}", shape_type.as_str(), count));
        }
    }
    out.push(String::new());

    out.push(format!("LINES DETECTED: {}", aggregated.lines_detected.len()));
    out.push(String::new());

    out.push("METHOD PERFORMANCE:".to_string());
    out.push("-".repeat(RULE_NARROW));
    for (name, summary) in aggregated.ledger() {
        out.push(format!("   {}: {}", name.to_uppercase(), method_line(summary)));
    }
    out.push(String::new());

    out.push(format!(
        "Success Rate: {}/{} ({:.1}%)",
        aggregated.sources_succeeded,
        aggregated.sources_attempted,
        aggregated.success_rate * 100.0
    ));
    out.push(format!(
        "Overall Confidence: {:.2} ({})",
        aggregated.overall_confidence,
        aggregated.confidence_level().as_str()
    ));

    out.join("\n")
}

/// Every drawing's report followed by the batch totals.
pub fn render_batch_text(batch: &BatchAnalysis) -> String {
    let mut sections = Vec::new();
    for entry in &batch.entries {
        match (&entry.analysis, &entry.error) {
            (Some(analysis), _) => sections.push(render_text(analysis)),
            (None, error) => sections.push(format!(
                "Image: {}\nERROR: {}",
                entry.path,
                error.as_deref().unwrap_or("unknown error")
            )),
        }
    }

    let summary = &batch.summary;
    let mut totals = Vec::new();
    totals.push("BATCH SUMMARY".to_string());
    totals.push("=".repeat(RULE_WIDE));
    totals.push(format!("Total Images: {}", summary.total_images));
    totals.push(format!("Successful: {}", summary.successful_images));
    totals.push(format!("Failed: {}", summary.failed_images));
    totals.push(format!("Success Rate: {:.1}%", summary.success_rate * 100.0));
    totals.push(format!(
        "Total Processing Time: {}ms",
        summary.total_processing_time_ms
    ));
    totals.push(format!(
        "Average Time Per Image: {:.1}ms",
        summary.average_time_per_image_ms
    ));
    sections.push(totals.join("\n"));

    sections.join("\n\n")
}

fn method_line(summary: &MethodSummary) -> String {
    let status = if summary.succeeded { "OK" } else { "FAILED" };
    let mut line = format!(
        "{}, {} item(s), {}ms",
        status, summary.item_count, summary.processing_time_ms
    );
    if let Some(error) = &summary.error {
        line.push_str(", error: ");
        line.push_str(error);
    }
    line
}

fn preview(text: &str) -> String {
    if text.chars().count() <= TEXT_PREVIEW_CHARS {
        return text.to_string();
    }
    let head = text.chars().take(TEXT_PREVIEW_CHARS).collect::<String>();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_text_is_truncated_by_characters() {
        let text = "寸".repeat(120);
        let shown = preview(&text);
        assert_eq!(shown.chars().count(), TEXT_PREVIEW_CHARS + 3);
        assert!(shown.ends_with("..."));
        assert_eq!(preview("R25"), "R25");
        assert_eq!(preview(&"a".repeat(100)), "a".repeat(100));
    }

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!(ReportFormat::from_name("JSON"), Some(ReportFormat::Json));
        assert_eq!(ReportFormat::from_name(" text "), Some(ReportFormat::Text));
        assert_eq!(ReportFormat::from_name("xlsx"), None);
    }

    #[test]
    fn failed_method_line_includes_error() {
        let summary = MethodSummary {
            attempted: true,
            succeeded: false,
            item_count: 0,
            error: Some("timed out after 30s".to_string()),
            processing_time_ms: 30001,
        };
        assert_eq!(
            method_line(&summary),
            "FAILED, 0 item(s), 30001ms, error: timed out after 30s"
        );
    }
}
