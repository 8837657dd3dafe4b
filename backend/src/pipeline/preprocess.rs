use image::imageops::{self, FilterType};
use ndarray::Array4;
use std::path::Path;
use tch::Tensor;

use crate::config::PipelineConfig;
use shared::ImageKind;

/// Rejections of an upload before it ever reaches the model. All of these
/// are user errors, not system faults.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("unsupported image format: {0} (allowed: png, jpg, jpeg)")]
    UnsupportedFormat(String),
    #[error("file too large: {size} bytes (maximum {max})")]
    TooLarge { size: usize, max: usize },
    #[error("invalid or corrupted image file: {0}")]
    Corrupted(String),
}

/// A model-ready single-example batch plus the source pixel dimensions,
/// which the image record keeps for display.
pub struct PreparedInput {
    pub tensor: Tensor,
    pub width: u32,
    pub height: u32,
}

/// Turns uploaded bytes into the NCHW tensor the classifier expects:
/// grayscale, resized to the configured square resolution with Lanczos
/// filtering, intensities scaled into [0, 1]. Pure transformation, no side
/// effects; byte-identical input yields bit-identical output.
#[derive(Clone)]
pub struct ImagePreprocessor {
    size: u32,
    max_bytes: usize,
    allowed_extensions: Vec<String>,
}

impl ImagePreprocessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            size: config.image.size,
            max_bytes: config.limits.max_upload_bytes,
            allowed_extensions: config.limits.allowed_extensions.clone(),
        }
    }

    /// Check extension, size, and the actual container format of the bytes.
    /// The container check catches files renamed to dodge the allow-list.
    pub fn validate(&self, file_name: &str, data: &[u8]) -> Result<ImageKind, ValidationError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::UnsupportedFormat(if extension.is_empty() {
                "missing extension".to_string()
            } else {
                extension
            }));
        }

        if data.len() > self.max_bytes {
            return Err(ValidationError::TooLarge {
                size: data.len(),
                max: self.max_bytes,
            });
        }

        match image::guess_format(data) {
            Ok(image::ImageFormat::Png) => Ok(ImageKind::Png),
            Ok(image::ImageFormat::Jpeg) => Ok(ImageKind::Jpeg),
            Ok(other) => Err(ValidationError::UnsupportedFormat(format!("{:?}", other))),
            Err(e) => Err(ValidationError::Corrupted(e.to_string())),
        }
    }

    /// Decode into the normalized pixel plane, shape [1, 1, size, size].
    pub fn decode_plane(&self, data: &[u8]) -> Result<(Array4<f32>, u32, u32), ValidationError> {
        let decoded = image::load_from_memory(data)
            .map_err(|e| ValidationError::Corrupted(e.to_string()))?;
        let (width, height) = (decoded.width(), decoded.height());

        let gray = decoded.to_luma8();
        let resized = imageops::resize(&gray, self.size, self.size, FilterType::Lanczos3);
        let scaled: Vec<f32> = resized
            .pixels()
            .map(|p| f32::from(p.0[0]) / 255.0)
            .collect();

        let plane = Array4::from_shape_vec(
            (1, 1, self.size as usize, self.size as usize),
            scaled,
        )
        .map_err(|e| ValidationError::Corrupted(e.to_string()))?;

        Ok((plane, width, height))
    }

    /// Full preparation: decode, normalize, and lift into a batch tensor.
    pub fn prepare(&self, data: &[u8]) -> Result<PreparedInput, ValidationError> {
        let (plane, width, height) = self.decode_plane(data)?;
        let pixels = plane
            .as_slice()
            .ok_or_else(|| ValidationError::Corrupted("non-contiguous pixel buffer".to_string()))?;
        let side = i64::from(self.size);
        let tensor = Tensor::from_slice(pixels).view([1, 1, side, side]);

        Ok(PreparedInput {
            tensor,
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma, RgbImage};
    use std::io::Cursor;

    fn preprocessor() -> ImagePreprocessor {
        ImagePreprocessor::new(&PipelineConfig::default())
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = GrayImage::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]));
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    #[test]
    fn validate_accepts_png_and_jpeg() {
        let pre = preprocessor();
        assert_eq!(
            pre.validate("scan.png", &png_bytes(32, 32)).unwrap(),
            ImageKind::Png
        );
        assert_eq!(
            pre.validate("scan.JPG", &jpeg_bytes(32, 32)).unwrap(),
            ImageKind::Jpeg
        );
    }

    #[test]
    fn validate_rejects_disallowed_extension() {
        let pre = preprocessor();
        let err = pre.validate("scan.gif", &png_bytes(8, 8)).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFormat(_)));

        let err = pre.validate("noextension", &png_bytes(8, 8)).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFormat(_)));
    }

    #[test]
    fn validate_rejects_renamed_container() {
        let pre = preprocessor();
        let img = RgbImage::from_pixel(8, 8, image::Rgb([7, 7, 7]));
        let mut gif = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut gif), image::ImageFormat::Gif)
            .unwrap();
        // a gif renamed to .png must still be refused
        let err = pre.validate("scan.png", &gif).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFormat(_)));
    }

    #[test]
    fn validate_rejects_oversized_upload() {
        let pre = preprocessor();
        let max = PipelineConfig::default().limits.max_upload_bytes;
        let data = vec![0u8; max + 1];
        let err = pre.validate("scan.png", &data).unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { .. }));
    }

    #[test]
    fn validate_rejects_garbage_bytes() {
        let pre = preprocessor();
        let err = pre.validate("scan.png", b"definitely not an image").unwrap_err();
        assert!(matches!(err, ValidationError::Corrupted(_)));
    }

    #[test]
    fn decode_produces_expected_shape_and_range() {
        let pre = preprocessor();
        let (plane, width, height) = pre.decode_plane(&png_bytes(640, 480)).unwrap();
        assert_eq!(plane.shape(), &[1, 1, 224, 224]);
        assert_eq!((width, height), (640, 480));
        assert!(plane.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn decode_converts_color_input_to_one_channel() {
        let pre = preprocessor();
        let (plane, _, _) = pre.decode_plane(&jpeg_bytes(300, 200)).unwrap();
        assert_eq!(plane.shape(), &[1, 1, 224, 224]);
    }

    #[test]
    fn decode_is_deterministic() {
        let pre = preprocessor();
        let bytes = png_bytes(224, 224);
        let (first, _, _) = pre.decode_plane(&bytes).unwrap();
        let (second, _, _) = pre.decode_plane(&bytes).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn decode_fails_on_truncated_image() {
        let pre = preprocessor();
        let mut bytes = png_bytes(64, 64);
        bytes.truncate(bytes.len() / 2);
        assert!(matches!(
            pre.decode_plane(&bytes),
            Err(ValidationError::Corrupted(_))
        ));
    }
}
