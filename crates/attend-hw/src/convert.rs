//! Raw camera buffer to RGB conversion.

use image::RgbImage;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, ConvertError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(ConvertError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    rgb_image(width, height, rgb)
}

/// Replicate 8-bit grayscale into three channels.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, ConvertError> {
    let pixels = (width * height) as usize;
    if grey.len() < pixels {
        return Err(ConvertError::InvalidLength {
            expected: pixels,
            actual: grey.len(),
        });
    }
    let rgb = grey[..pixels].iter().flat_map(|&g| [g, g, g]).collect();
    rgb_image(width, height, rgb)
}

pub fn mjpeg_to_rgb(jpeg: &[u8]) -> Result<RgbImage, ConvertError> {
    Ok(image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?.to_rgb8())
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}

fn rgb_image(width: u32, height: u32, rgb: Vec<u8>) -> Result<RgbImage, ConvertError> {
    let actual = rgb.len();
    RgbImage::from_raw(width, height, rgb).ok_or(ConvertError::InvalidLength {
        expected: (width * height * 3) as usize,
        actual,
    })
}
