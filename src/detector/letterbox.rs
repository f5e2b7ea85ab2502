//! Square letterbox resize
//!
//! Scales an image so its long side matches the model input size, pads the
//! rest with gray and keeps the transform so boxes can be mapped back.

use image::{imageops::FilterType, DynamicImage, GenericImageView};

/// Padding value used by YOLO-style preprocessing
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Geometry of a letterbox transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    /// Original image width
    pub width: u32,
    /// Original image height
    pub height: u32,
    /// Side of the square model input
    pub size: u32,
}

impl Letterbox {
    /// Compute the transform for an image of `width` x `height`
    pub fn new(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width.max(1) as f32).min(size as f32 / height.max(1) as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size as f32 - new_w) / 2.0).floor(),
            pad_y: ((size as f32 - new_h) / 2.0).floor(),
            width,
            height,
            size,
        }
    }

    /// Size of the resized image inside the padded square
    pub fn resized_dims(&self) -> (u32, u32) {
        (
            ((self.width as f32 * self.scale).round() as u32).clamp(1, self.size),
            ((self.height as f32 * self.scale).round() as u32).clamp(1, self.size),
        )
    }

    /// Map an `[x1, y1, x2, y2]` box from model input space back to the original image
    pub fn unmap(&self, bbox: [f32; 4]) -> [f32; 4] {
        let w = self.width as f32;
        let h = self.height as f32;
        [
            ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, w),
            ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, h),
            ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, w),
            ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, h),
        ]
    }
}

/// Letterbox an image into a `size` x `size` RGB tensor in CHW layout, scaled to [0, 1]
pub fn letterbox(image: &DynamicImage, size: u32) -> (Vec<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let geometry = Letterbox::new(width, height, size);
    let (new_w, new_h) = geometry.resized_dims();

    let resized = image.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();

    let plane = (size * size) as usize;
    let mut data = vec![PAD_VALUE; 3 * plane];
    let off_x = geometry.pad_x as u32;
    let off_y = geometry.pad_y as u32;

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x + off_x, y + off_y);
        if tx >= size || ty >= size {
            continue;
        }
        let i = (ty * size + tx) as usize;
        data[i] = pixel[0] as f32 / 255.0;
        data[plane + i] = pixel[1] as f32 / 255.0;
        data[2 * plane + i] = pixel[2] as f32 / 255.0;
    }

    (data, geometry)
}
