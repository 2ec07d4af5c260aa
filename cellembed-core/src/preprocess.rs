use camino::Utf8Path;
use image::{DynamicImage, ImageReader, RgbImage, imageops::{self, FilterType}};
use log::{debug, warn};
use ndarray::Array3;

pub const DEFAULT_TARGET_SIZE: u32 = 224;
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(thiserror::Error, Debug)]
pub enum PreprocessError {
    #[error("Error opening image file at {path}")]
    IO { path: String, #[source] source: std::io::Error },
    #[error("Error decoding image file at {path}")]
    Decode { path: String, #[source] source: image::ImageError },
}

/// Turns raster images into normalized `[3, size, size]` tensors, channel-first.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePreprocessor {
    pub target_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        ImagePreprocessor {
            target_size: DEFAULT_TARGET_SIZE,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

impl ImagePreprocessor {
    pub fn with_target_size(target_size: u32) -> Self {
        ImagePreprocessor { target_size, ..Default::default() }
    }

    /// Loads and preprocesses the image at `path`. Images that cannot be opened or decoded are
    /// replaced by an all-black placeholder so a single bad file never aborts a batch.
    pub fn preprocess_path(&self, path: &Utf8Path) -> Array3<f32> {
        match load_image(path) {
            Ok(img) => self.preprocess(&img),
            Err(e) => {
                warn!("Could not load image {}, substituting placeholder: {}", path, e);
                self.normalize(&self.placeholder())
            }
        }
    }

    pub fn preprocess(&self, img: &DynamicImage) -> Array3<f32> {
        let rgb = img.to_rgb8();
        let resized = if rgb.dimensions() == (self.target_size, self.target_size) {
            rgb
        } else {
            imageops::resize(&rgb, self.target_size, self.target_size, FilterType::Triangle)
        };
        self.normalize(&resized)
    }

    pub fn placeholder(&self) -> RgbImage {
        RgbImage::new(self.target_size, self.target_size)
    }

    fn normalize(&self, img: &RgbImage) -> Array3<f32> {
        let size = self.target_size as usize;
        let mut tensor = Array3::zeros((3, size, size));
        for (x, y, pixel) in img.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let value = pixel.0[c] as f32 / 255.;
                tensor[[c, y, x]] = (value - self.mean[c]) / self.std[c];
            }
        }
        tensor
    }
}

fn load_image(path: &Utf8Path) -> Result<DynamicImage, PreprocessError> {
    debug!("Decoding image at path: {}", path);
    ImageReader::open(path)
        .map_err(|e| PreprocessError::IO { path: path.to_string(), source: e })?
        .with_guessed_format()
        .map_err(|e| PreprocessError::IO { path: path.to_string(), source: e })?
        .decode()
        .map_err(|e| PreprocessError::Decode { path: path.to_string(), source: e })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8PathBuf;
    use image::Rgb;
    use ndarray::Axis;

    use super::*;

    const TOLERANCE: f32 = 1e-5;

    fn temp_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    fn channel_means(tensor: &Array3<f32>) -> Vec<f32> {
        tensor.axis_iter(Axis(0))
            .map(|channel| channel.mean().unwrap())
            .collect()
    }

    #[test]
    fn black_image_normalizes_to_negative_mean_over_std() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "black.png");
        RgbImage::new(224, 224).save(&path).unwrap();

        let tensor = ImagePreprocessor::default().preprocess_path(&path);
        assert_eq!(tensor.shape(), &[3, 224, 224]);
        for (c, mean) in channel_means(&tensor).into_iter().enumerate() {
            let expected = -IMAGENET_MEAN[c] / IMAGENET_STD[c];
            assert!((mean - expected).abs() < TOLERANCE, "channel {c}: {mean} != {expected}");
        }
    }

    #[test]
    fn resizes_and_orders_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "red.png");
        RgbImage::from_pixel(40, 30, Rgb([255, 0, 0])).save(&path).unwrap();

        let preprocessor = ImagePreprocessor::with_target_size(16);
        let tensor = preprocessor.preprocess_path(&path);
        assert_eq!(tensor.shape(), &[3, 16, 16]);

        let means = channel_means(&tensor);
        assert!((means[0] - (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0]).abs() < TOLERANCE);
        assert!((means[1] + IMAGENET_MEAN[1] / IMAGENET_STD[1]).abs() < TOLERANCE);
        assert!((means[2] + IMAGENET_MEAN[2] / IMAGENET_STD[2]).abs() < TOLERANCE);
    }

    #[test]
    fn grayscale_images_are_forced_to_three_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "gray.png");
        image::GrayImage::from_pixel(8, 8, image::Luma([255])).save(&path).unwrap();

        let tensor = ImagePreprocessor::with_target_size(8).preprocess_path(&path);
        let means = channel_means(&tensor);
        for c in 0..3 {
            let expected = (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            assert!((means[c] - expected).abs() < TOLERANCE);
        }
    }

    #[test]
    fn undecodable_and_missing_images_become_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let corrupt = temp_path(&dir, "corrupt.png");
        fs::write(&corrupt, b"definitely not a png").unwrap();

        let preprocessor = ImagePreprocessor::default();
        let placeholder = preprocessor.preprocess(&DynamicImage::ImageRgb8(preprocessor.placeholder()));

        assert_eq!(preprocessor.preprocess_path(&corrupt), placeholder);
        assert_eq!(preprocessor.preprocess_path(&temp_path(&dir, "missing.png")), placeholder);
    }
}
