//! Frame type and pixel conversions: YUYV/GREY/MJPG to RGB, dark detection, snapshots.

use std::path::Path;

/// A captured RGB24 camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Interleaved RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("is_dark", &self.is_dark)
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// Wrap an RGB buffer, checking its length.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = rgb_len(width, height);
        if data.len() != expected {
            return Err(FrameError::InvalidLength { expected, actual: data.len() });
        }
        let is_dark = is_dark_frame(&rgb_to_grayscale(&data), DARK_FRAME_THRESHOLD);
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        })
    }

    /// Convert a decoded image (e.g. a reference photo) into a frame.
    pub fn from_image(image: image::DynamicImage) -> Self {
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        let data = rgb.into_raw();
        let is_dark = is_dark_frame(&rgb_to_grayscale(&data), DARK_FRAME_THRESHOLD);
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 0,
            is_dark,
        }
    }

    /// BT.601 luma plane, one byte per pixel.
    pub fn to_grayscale(&self) -> Vec<u8> {
        rgb_to_grayscale(&self.data)
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let gray = self.to_grayscale();
        if gray.is_empty() {
            return 0.0;
        }
        gray.iter().map(|&b| b as f32).sum::<f32>() / gray.len() as f32
    }

    /// Write the frame as a JPEG, creating parent directories.
    pub fn save_jpeg(&self, path: &Path) -> Result<(), FrameError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let image = image::RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected: rgb_len(self.width, self.height),
                actual: self.data.len(),
            },
        )?;
        image.save_with_format(path, image::ImageFormat::Jpeg)?;
        tracing::debug!(path = %path.display(), "saved snapshot");
        Ok(())
    }
}

/// Share of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Convert packed YUYV (4:2:2) to RGB24 with BT.601 coefficients.
///
/// Every 4 bytes [Y0, U, Y1, V] become two RGB pixels sharing U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: yuyv.len() });
    }

    let mut rgb = Vec::with_capacity(rgb_len(width, height));
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(y + 1.402 * v),
        clamp(y - 0.344_136 * u - 0.714_136 * v),
        clamp(y + 1.772 * u),
    ]
}

/// Replicate 8-bit grayscale into RGB24.
pub fn grey_to_rgb(gray: &[u8]) -> Vec<u8> {
    gray.iter().flat_map(|&g| [g, g, g]).collect()
}

/// BT.601 luma of an RGB24 buffer.
pub fn rgb_to_grayscale(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| {
            (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
                .round()
                .clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// True if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_grey_pixels() {
        // Neutral chroma → R = G = B = Y
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_red_chroma() {
        // Strong V pushes red up, green down.
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        assert!(rgb[0] > 200, "red = {}", rgb[0]);
        assert!(rgb[1] < 60, "green = {}", rgb[1]);
        assert_eq!(&rgb[0..3], &rgb[3..6]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_rgb(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_grey_to_rgb() {
        assert_eq!(grey_to_rgb(&[7, 250]), vec![7, 7, 7, 250, 250, 250]);
    }

    #[test]
    fn test_rgb_to_grayscale() {
        let gray = rgb_to_grayscale(&[255, 255, 255, 0, 0, 0, 255, 0, 0]);
        assert_eq!(gray, vec![255, 0, 76]);
    }

    #[test]
    fn test_dark_frame_detection() {
        assert!(is_dark_frame(&[], DARK_FRAME_THRESHOLD));
        assert!(is_dark_frame(&vec![0u8; 1000], DARK_FRAME_THRESHOLD));
        assert!(!is_dark_frame(&vec![128u8; 1000], DARK_FRAME_THRESHOLD));

        let mut mostly_dark = vec![10u8; 960];
        mostly_dark.extend(vec![128u8; 40]);
        assert!(is_dark_frame(&mostly_dark, DARK_FRAME_THRESHOLD));

        let mut borderline = vec![10u8; 940];
        borderline.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&borderline, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_from_rgb_checks_length() {
        assert!(Frame::from_rgb(vec![0; 11], 2, 2, 0).is_err());
        let frame = Frame::from_rgb(vec![200; 12], 2, 2, 7).unwrap();
        assert!(!frame.is_dark);
        assert_eq!(frame.sequence, 7);
        assert!((frame.avg_brightness() - 200.0).abs() < 1e-3);
        assert_eq!(frame.to_grayscale(), vec![200; 4]);
    }

    #[test]
    fn test_from_image() {
        let img = image::RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]));
        let frame = Frame::from_image(image::DynamicImage::ImageRgb8(img));
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(&frame.data[..3], &[10, 20, 30]);
        assert!(frame.is_dark);
    }

    #[test]
    fn test_save_jpeg_roundtrip_dimensions() {
        let dir = std::env::temp_dir().join(format!("rollcall-frame-{}", uuid::Uuid::new_v4()));
        let path = dir.join("snaps").join("S1_20260105_080000.jpg");
        let frame = Frame::from_rgb(vec![150; 16 * 8 * 3], 16, 8, 0).unwrap();

        frame.save_jpeg(&path).unwrap();
        let reread = image::open(&path).unwrap();
        assert_eq!((reread.width(), reread.height()), (16, 8));
        std::fs::remove_dir_all(dir).ok();
    }
}
