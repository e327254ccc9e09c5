use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Largest side, in pixels, handed to OCR.
const MAX_SIDE: u32 = 2800;
/// Skew search range and step, in degrees.
const MAX_SKEW_DEG: f32 = 5.0;
const SKEW_STEP_DEG: f32 = 0.5;
/// Skew estimation runs on a copy no larger than this.
const SKEW_SAMPLE_SIDE: u32 = 800;
const CROP_MARGIN: u32 = 10;

const INK: u8 = 0;
const PAPER: u8 = 255;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to load image: {0}")]
    Load(#[from] image::ImageError),
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

/// Load an image file, clean it up, and return PNG bytes ready for OCR.
pub fn prepare_for_ocr(path: &Path) -> Result<Vec<u8>, PreprocessError> {
    let img = image::open(path)?;
    encode_as_png(normalize(img))
}

/// Same as [`prepare_for_ocr`] for in-memory JPEG / PNG / WEBP bytes.
pub fn prepare_for_ocr_from_bytes(data: &[u8]) -> Result<Vec<u8>, PreprocessError> {
    let img = image::load_from_memory(data)?;
    encode_as_png(normalize(img))
}

/// Downscale, stretch, binarize, straighten and crop.
fn normalize(img: DynamicImage) -> DynamicImage {
    let gray = to_grayscale_stretched(img);

    let Some(threshold) = otsu_threshold(&gray) else {
        // Uniform image: nothing to separate.
        return DynamicImage::ImageLuma8(gray);
    };
    let binary = binarize(&gray, threshold);

    let angle = estimate_skew(&binary);
    debug!(threshold, angle, "preprocess: binarized");
    let straight = if angle.abs() >= SKEW_STEP_DEG {
        deskew(&binary, angle)
    } else {
        binary
    };

    DynamicImage::ImageLuma8(crop_to_content(&straight, CROP_MARGIN))
}

/// Down-scale very large photos, convert to luma and stretch contrast to the
/// full 0..=255 range.
pub fn to_grayscale_stretched(img: DynamicImage) -> GrayImage {
    let img = if img.width() > MAX_SIDE || img.height() > MAX_SIDE {
        img.resize(MAX_SIDE, MAX_SIDE, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let gray: GrayImage = img.to_luma8();

    let (min_px, max_px) = gray
        .pixels()
        .fold((255u8, 0u8), |(mn, mx), p| (mn.min(p[0]), mx.max(p[0])));

    if max_px <= min_px {
        return gray;
    }

    let range = (max_px - min_px) as u32;
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let p = gray.get_pixel(x, y)[0];
        Luma([((p - min_px) as u32 * 255 / range) as u8])
    })
}

/// Otsu's global threshold. `None` when the image has a single gray level.
pub fn otsu_threshold(gray: &GrayImage) -> Option<u8> {
    let mut hist = [0u64; 256];
    for p in gray.pixels() {
        hist[p[0] as usize] += 1;
    }
    if hist.iter().filter(|&&c| c > 0).count() < 2 {
        return None;
    }

    let total: u64 = hist.iter().sum();
    let sum_all: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut sum_bg = 0f64;
    let mut weight_bg = 0u64;
    let mut best = (0u8, -1f64);
    for (t, &count) in hist.iter().enumerate() {
        weight_bg += count;
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let between = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);
        if between > best.1 {
            best = (t as u8, between);
        }
    }
    Some(best.0)
}

/// Pixels at or below `threshold` become ink (0), the rest paper (255).
pub fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] <= threshold {
            Luma([INK])
        } else {
            Luma([PAPER])
        }
    })
}

/// Skew of the text lines in degrees (positive: lines fall to the right),
/// found by maximizing the variance of the horizontal projection profile.
pub fn estimate_skew(binary: &GrayImage) -> f32 {
    let sample = if binary.width() > SKEW_SAMPLE_SIDE || binary.height() > SKEW_SAMPLE_SIDE {
        image::imageops::resize(
            binary,
            SKEW_SAMPLE_SIDE.min(binary.width()),
            SKEW_SAMPLE_SIDE.min(binary.height()),
            image::imageops::FilterType::Nearest,
        )
    } else {
        binary.clone()
    };

    let ink: Vec<(f32, f32)> = sample
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] < 128)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect();
    if ink.is_empty() {
        return 0.0;
    }

    let (w, h) = (sample.width() as usize, sample.height() as usize);
    let offset = w as f32;
    let bins = h + 2 * w + 1;

    let steps = (MAX_SKEW_DEG / SKEW_STEP_DEG) as i32;
    let mut best = (0.0f32, f64::MIN);
    for step in -steps..=steps {
        let angle = step as f32 * SKEW_STEP_DEG;
        let (sin, cos) = angle.to_radians().sin_cos();
        let mut profile = vec![0u32; bins];
        for &(x, y) in &ink {
            let row = (y * cos - x * sin + offset).round();
            if row >= 0.0 && (row as usize) < bins {
                profile[row as usize] += 1;
            }
        }
        let score: f64 = profile.iter().map(|&c| (c as f64).powi(2)).sum();
        // Ties keep the angle closest to zero.
        if score > best.1 || (score == best.1 && angle.abs() < best.0.abs()) {
            best = (angle, score);
        }
    }
    best.0
}

/// Rotate by `-angle_deg` around the center, filling uncovered area with paper.
pub fn deskew(img: &GrayImage, angle_deg: f32) -> GrayImage {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let (w, h) = (img.width(), img.height());
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    ImageBuffer::from_fn(w, h, |xo, yo| {
        let (dx, dy) = (xo as f32 - cx, yo as f32 - cy);
        let xs = (cx + dx * cos - dy * sin).round();
        let ys = (cy + dx * sin + dy * cos).round();
        if xs >= 0.0 && ys >= 0.0 && (xs as u32) < w && (ys as u32) < h {
            *img.get_pixel(xs as u32, ys as u32)
        } else {
            Luma([PAPER])
        }
    })
}

/// Crop to the bounding box of dark pixels plus `margin`. Returns a copy of
/// the input when there is no ink at all.
pub fn crop_to_content(img: &GrayImage, margin: u32) -> GrayImage {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, p) in img.enumerate_pixels() {
        if p[0] < 128 {
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
    }
    let Some((x0, y0, x1, y1)) = bounds else {
        return img.clone();
    };
    let left = x0.saturating_sub(margin);
    let top = y0.saturating_sub(margin);
    let right = (x1 + margin).min(img.width() - 1);
    let bottom = (y1 + margin).min(img.height() - 1);
    image::imageops::crop_imm(img, left, top, right - left + 1, bottom - top + 1).to_image()
}

fn encode_as_png(img: DynamicImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}
