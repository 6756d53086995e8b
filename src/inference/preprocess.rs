use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use ndarray::Array4;
use tracing::debug;

use super::error::{CascadeError, Result};

/// Input tensor shared by both cascade stages, laid out `[1, C, H, W]`.
pub type ImageTensor = Array4<f32>;

/// Default spatial resolution the models were trained at
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Reject uploads above this size before handing them to a decoder
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Turns encoded image bytes into the normalized model input.
///
/// Steps: decode (format guessed from content), convert to 8-bit luma with
/// ITU-R 601 weights (alpha dropped), stretch to `image_size` x `image_size`
/// with a bilinear filter, scale to [0, 1], then apply `(x - mean) / std`.
///
/// Non-square images are stretched, not cropped or letterboxed, matching the
/// resize used when the models were trained. The transform has no hidden
/// state, so identical bytes always yield an identical tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
    image_size: u32,
    mean: f32,
    std: f32,
    max_image_bytes: usize,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_SIZE, 0.5, 0.5, DEFAULT_MAX_IMAGE_BYTES)
    }
}

impl Preprocessor {
    pub fn new(image_size: u32, mean: f32, std: f32, max_image_bytes: usize) -> Self {
        Self {
            image_size,
            mean,
            std,
            max_image_bytes,
        }
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Decodes and normalizes `bytes`.
    ///
    /// # Errors
    /// `CascadeError::Decode` if the bytes are empty, too large, truncated or
    /// not in a supported image format.
    pub fn preprocess(&self, bytes: &[u8]) -> Result<ImageTensor> {
        if bytes.is_empty() {
            return Err(CascadeError::Decode("empty input".into()));
        }
        if bytes.len() > self.max_image_bytes {
            return Err(CascadeError::Decode(format!(
                "input is {} bytes, limit is {}",
                bytes.len(),
                self.max_image_bytes
            )));
        }

        let decoded = image::load_from_memory(bytes)
            .map_err(|e| CascadeError::Decode(e.to_string()))?;
        debug!("Decoded {}x{} image ({:?})", decoded.width(), decoded.height(), decoded.color());

        let gray = to_luma(decoded);
        let resized = imageops::resize(&gray, self.image_size, self.image_size, FilterType::Triangle);

        let size = self.image_size as usize;
        let (mean, std) = (self.mean, self.std);
        let tensor = Array4::from_shape_fn((1, 1, size, size), |(_, _, y, x)| {
            let intensity = resized.get_pixel(x as u32, y as u32)[0] as f32 / 255.0;
            (intensity - mean) / std
        });

        Ok(tensor)
    }
}

/// Grayscale input is kept as is. Colour input goes through `rgb_to_luma`;
/// `to_luma8` would weight the channels with Rec. 709 instead.
fn to_luma(image: DynamicImage) -> GrayImage {
    match image {
        DynamicImage::ImageLuma8(gray) => gray,
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => {
            image.to_luma8()
        }
        other => rgb_to_luma(&other.to_rgb8()),
    }
}

/// `L = R * 299/1000 + G * 587/1000 + B * 114/1000` in 16-bit fixed point,
/// rounded to nearest.
fn rgb_to_luma(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = (r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16;
        Luma([l as u8])
    })
}
