use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tokio::process::Command;

use super::{RawContent, Source, SourceFuture};
use crate::data::DrawingImage;
use crate::extraction::{ExtractedContent, ExtractionSource};
use crate::settings::CommandSettings;

const IMAGE_PLACEHOLDER: &str = "{image}";

/// An external detector or recognizer that prints JSON on stdout.
///
/// Shape detectors (YOLO, OpenCV contour scripts) and handwriting models
/// (TrOCR) plug in here. The program receives the drawing as a temp file
/// wherever `{image}` appears in its arguments, or as the last argument when
/// no placeholder is given.
#[derive(Debug, Clone)]
pub struct CommandSource {
    descriptor: ExtractionSource,
    program: String,
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CommandOutput {
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    content: RawContent,
}

impl CommandSource {
    pub fn new(settings: &CommandSettings) -> Result<Self> {
        let descriptor =
            ExtractionSource::new(settings.name.clone(), settings.kind, settings.category)?;
        if settings.program.trim().is_empty() {
            return Err(anyhow!("command source '{}' has no program", settings.name));
        }
        Ok(Self {
            descriptor,
            program: settings.program.clone(),
            args: settings.args.clone(),
        })
    }

    fn command_args(&self, image_path: &str) -> Vec<String> {
        if !self.args.iter().any(|arg| arg.contains(IMAGE_PLACEHOLDER)) {
            let mut args = self.args.clone();
            args.push(image_path.to_string());
            return args;
        }
        self.args
            .iter()
            .map(|arg| arg.replace(IMAGE_PLACEHOLDER, image_path))
            .collect()
    }
}

impl Source for CommandSource {
    fn descriptor(&self) -> &ExtractionSource {
        &self.descriptor
    }

    fn analyze(&self, image: &DrawingImage) -> SourceFuture {
        let source = self.clone();
        let image = image.clone();
        Box::pin(async move { source.run(&image).await })
    }
}

impl CommandSource {
    /// The child is killed when the returned future is dropped, so a
    /// pipeline timeout also ends the engine process.
    async fn run(&self, image: &DrawingImage) -> Result<ExtractedContent> {
        let tmp = image.write_temp_file()?;
        let image_path = tmp.path().to_string_lossy().to_string();
        let output = Command::new(&self.program)
            .args(self.command_args(&image_path))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ));
        }
        parse_output(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_output(stdout: &str) -> Result<ExtractedContent> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("engine produced no output"));
    }
    let output: CommandOutput =
        serde_json::from_str(trimmed).with_context(|| "engine output is not valid JSON")?;
    if let Some(error) = output.error
        && !error.trim().is_empty()
    {
        return Err(anyhow!(error.trim().to_string()));
    }
    Ok(output.content.into_content())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ShapeType, SourceKind, TextCategory};

    fn settings(args: &[&str]) -> CommandSettings {
        CommandSettings {
            name: "yolo".to_string(),
            kind: SourceKind::Shape,
            category: TextCategory::Printed,
            program: "python3".to_string(),
            args: args.iter().map(|value| value.to_string()).collect(),
        }
    }

    #[test]
    fn placeholder_is_replaced_with_image_path() {
        let source = CommandSource::new(&settings(&["detect.py", "--input={image}"])).unwrap();
        assert_eq!(
            source.command_args("/tmp/a.png"),
            vec!["detect.py", "--input=/tmp/a.png"]
        );
    }

    #[test]
    fn image_path_is_appended_without_placeholder() {
        let source = CommandSource::new(&settings(&["detect.py"])).unwrap();
        assert_eq!(source.command_args("/tmp/a.png"), vec!["detect.py", "/tmp/a.png"]);
    }

    #[test]
    fn parses_detector_json() {
        let content = parse_output(
            r#"{"shapes":[{"shape_type":"circle","bbox":[10,10,30,30]}],"lines":[]}"#,
        )
        .unwrap();
        assert_eq!(content.shapes.len(), 1);
        assert_eq!(content.shapes[0].shape_type, ShapeType::Circle);
    }

    #[test]
    fn empty_result_is_success_with_no_content() {
        assert!(parse_output(r#"{"texts":[]}"#).unwrap().is_empty());
    }

    #[test]
    fn error_field_and_garbage_are_failures() {
        let err = parse_output(r#"{"error":"CUDA out of memory"}"#).unwrap_err();
        assert_eq!(err.to_string(), "CUDA out of memory");
        assert!(parse_output("Traceback (most recent call last):").is_err());
        assert!(parse_output("   ").is_err());
    }

    #[test]
    fn blank_program_is_rejected() {
        let mut config = settings(&[]);
        config.program = " ".to_string();
        assert!(CommandSource::new(&config).is_err());
    }
}
