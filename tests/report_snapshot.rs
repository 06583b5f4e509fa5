use drawing_extract::aggregate::{AggregationPolicy, aggregate};
use drawing_extract::data::ImageInfo;
use drawing_extract::extraction::{
    BBox, ExtractedContent, ExtractionResult, ExtractionSource, LineSegment, Point, ShapeSpec,
    ShapeType, SourceKind, TextCategory, TextSpan,
};
use drawing_extract::pipeline::DrawingAnalysis;
use drawing_extract::report::{render_json, render_text};

fn analysis(results: Vec<ExtractionResult>) -> DrawingAnalysis {
    let aggregated = aggregate(&results, &AggregationPolicy::default());
    DrawingAnalysis {
        image: ImageInfo {
            name: Some("bracket.png".to_string()),
            mime: "image/png".to_string(),
            width: 1200,
            height: 800,
        },
        analyzed_at: "2026-10-18T09:30:00Z".to_string(),
        results,
        aggregated,
    }
}

fn mixed_results() -> Vec<ExtractionResult> {
    let tesseract =
        ExtractionSource::new("tesseract", SourceKind::Text, TextCategory::Printed).unwrap();
    let yolo = ExtractionSource::new("yolo", SourceKind::Shape, TextCategory::Printed).unwrap();
    let openai = ExtractionSource::new("openai", SourceKind::Mixed, TextCategory::Mixed).unwrap();

    let texts = ExtractedContent::with_texts(vec![
        TextSpan::new("DIM 150mm").with_confidence(0.9),
        TextSpan::new("SCALE 1:2").with_confidence(0.7),
    ]);
    let geometry = ExtractedContent {
        shapes: vec![
            ShapeSpec::new(ShapeType::Circle, BBox::new(100.0, 100.0, 140.0, 140.0)),
            ShapeSpec::new(ShapeType::Rectangle, BBox::new(40.0, 40.0, 460.0, 300.0)),
            ShapeSpec::new(ShapeType::Circle, BBox::new(300.0, 100.0, 340.0, 140.0)),
        ],
        lines: vec![LineSegment::new(
            Point::new(0.0, 50.0),
            Point::new(300.0, 50.0),
        )],
        ..ExtractedContent::empty()
    };

    vec![
        ExtractionResult::success(&tesseract, texts, 120).unwrap(),
        ExtractionResult::success(&yolo, geometry, 340).unwrap(),
        ExtractionResult::failure(&openai, "API key not found for provider openai", 0).unwrap(),
    ]
}

#[test]
fn text_report_snapshot() {
    let report = render_text(&analysis(mixed_results()));
    insta::assert_snapshot!("text_report", report);
}

#[test]
fn report_for_total_failure_still_renders() {
    let openai = ExtractionSource::new("openai", SourceKind::Mixed, TextCategory::Mixed).unwrap();
    let results = vec![ExtractionResult::failure(&openai, "HTTP 503", 12).unwrap()];
    let report = render_text(&analysis(results));

    assert!(report.contains("   No text detected"));
    assert!(report.contains("   No shapes detected"));
    assert!(report.contains("LINES DETECTED: 0"));
    assert!(report.contains("   OPENAI: FAILED, 0 item(s), 12ms, error: HTTP 503"));
    assert!(report.contains("Success Rate: 0/1 (0.0%)"));
    assert!(report.ends_with("Overall Confidence: 0.00 (Very Low)"));
}

#[test]
fn report_with_no_sources_renders() {
    let report = render_text(&analysis(Vec::new()));
    assert!(report.contains("Methods Used: \n"));
    assert!(report.contains("Success Rate: 0/0 (0.0%)"));
}

#[test]
fn json_export_keeps_ledger_and_items() {
    let json = render_json(&analysis(mixed_results())).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["image"]["name"], "bracket.png");
    assert_eq!(value["aggregated"]["all_text"][1]["text"], "SCALE 1:2");
    assert_eq!(value["aggregated"]["all_text"][1]["category"], "printed");
    assert_eq!(
        value["aggregated"]["shapes_detected"][0]["bbox"],
        serde_json::json!([100.0, 100.0, 140.0, 140.0])
    );
    assert_eq!(
        value["aggregated"]["shapes_detected"][0]["centroid"],
        serde_json::json!([120.0, 120.0])
    );
    assert_eq!(
        value["aggregated"]["lines_detected"][0]["orientation"],
        "horizontal"
    );
    assert_eq!(
        value["aggregated"]["method_summary"]["openai"]["error"],
        "API key not found for provider openai"
    );
    assert!(
        value["aggregated"]["method_summary"]["yolo"]
            .get("error")
            .is_none()
    );
}
