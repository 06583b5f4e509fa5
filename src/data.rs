use anyhow::{Context, Result, anyhow};
use image::GenericImageView;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct DrawingImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub name: Option<String>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub name: Option<String>,
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

impl DrawingImage {
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            name: self.name.clone(),
            mime: self.mime.clone(),
            width: self.width,
            height: self.height,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("drawing")
    }

    /// Writes the original bytes to a temp file that lives as long as the handle.
    pub fn write_temp_file(&self) -> Result<tempfile::NamedTempFile> {
        let suffix = extension_from_mime(&self.mime)
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        let mut tmp = tempfile::Builder::new()
            .prefix("drawing-")
            .suffix(&suffix)
            .tempfile()
            .with_context(|| "failed to create temp file for drawing")?;
        tmp.write_all(&self.bytes)
            .with_context(|| "failed to write drawing to temp file")?;
        tmp.flush().ok();
        Ok(tmp)
    }
}

pub fn load_drawing(path: &Path) -> Result<DrawingImage> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read drawing: {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .map(|value| value.to_string());
    drawing_from_bytes(bytes, name.as_deref(), Some(path))
}

pub fn drawing_from_bytes(
    bytes: Vec<u8>,
    name: Option<&str>,
    path: Option<&Path>,
) -> Result<DrawingImage> {
    if bytes.is_empty() {
        return Err(anyhow!(
            "drawing '{}' is empty",
            name.unwrap_or("input")
        ));
    }
    let mime = detect_image_mime(&bytes, path)?;
    let decoded = image::load_from_memory(&bytes)
        .with_context(|| format!("failed to decode drawing ({})", mime))?;
    let (width, height) = decoded.dimensions();
    Ok(DrawingImage {
        bytes,
        mime,
        name: name.map(|value| value.to_string()),
        width,
        height,
    })
}

fn detect_image_mime(bytes: &[u8], path: Option<&Path>) -> Result<String> {
    if let Some(kind) = infer::get(bytes) {
        let detected = kind.mime_type();
        if !detected.starts_with("image/") {
            return Err(anyhow!(
                "drawing must be an image (detected '{}')",
                detected
            ));
        }
        return Ok(detected.to_string());
    }

    if let Some(mime) = extension_lower(path).and_then(|ext| mime_from_extension(&ext)) {
        return Ok(mime.to_string());
    }

    Err(anyhow!(
        "unable to detect image type for '{}'",
        path.map(|value| value.display().to_string())
            .unwrap_or_else(|| "input".to_string())
    ))
}

fn extension_lower(path: Option<&Path>) -> Option<String> {
    path.and_then(|path| path.extension())
        .and_then(|value| value.to_str())
        .map(|value| value.to_lowercase())
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tiff" | "tif" => Some("image/tiff"),
        _ => None,
    }
}

pub fn extension_from_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tiff"),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_png_with_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bracket.png");
        std::fs::write(&path, png_bytes(32, 16)).unwrap();

        let drawing = load_drawing(&path).unwrap();
        assert_eq!(drawing.mime, "image/png");
        assert_eq!(drawing.name.as_deref(), Some("bracket.png"));
        assert_eq!((drawing.width, drawing.height), (32, 16));
    }

    #[test]
    fn rejects_non_image_data() {
        let err = drawing_from_bytes(b"%PDF-1.7\n".to_vec(), Some("sheet.pdf"), None).unwrap_err();
        assert!(err.to_string().contains("must be an image"));
    }

    #[test]
    fn rejects_empty_file() {
        assert!(drawing_from_bytes(Vec::new(), Some("blank.png"), None).is_err());
    }

    #[test]
    fn temp_file_keeps_extension() {
        let drawing = drawing_from_bytes(png_bytes(4, 4), Some("a.png"), None).unwrap();
        let tmp = drawing.write_temp_file().unwrap();
        assert_eq!(
            tmp.path().extension().and_then(|value| value.to_str()),
            Some("png")
        );
        assert_eq!(std::fs::read(tmp.path()).unwrap(), drawing.bytes);
    }
}
