//! Feature channels of an image.
//!
//! The trees of the forest compare pixel values of these channels.
//! A stack contains the intensity, the absolute horizontal and vertical
//! gradients and one channel per orientation bin of the `HogExtractor`.

use errors::*;
use hog::{HogExtractor, ORIENTATION_SCALE};
use image::{ImageBuffer, Luma};
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use std::f32::consts::PI;
use types::{FeatureImage, GrayImage};

/// Gradient magnitudes are multiplied with this value before they are stored
/// in a `u8` magnitude map.
pub const MAGNITUDE_SCALE: f32 = 0.25;

/// Number of channels in front of the orientation channels
/// (intensity, |dx|, |dy|).
pub const BASE_CHANNELS: usize = 3;

/// Horizontal or vertical Sobel response
type Gradient = ImageBuffer<Luma<i16>, Vec<i16>>;

/// Computes the orientation and the magnitude map of a grey image.
///
/// The orientation is unsigned (within [0, PI)) and stored multiplied with
/// `ORIENTATION_SCALE`. The magnitude is scaled with `MAGNITUDE_SCALE` and saturates at 255.
pub fn gradient_maps(img: &GrayImage) -> (GrayImage, GrayImage) {
    maps_from_sobel(&horizontal_sobel(img), &vertical_sobel(img))
}

fn maps_from_sobel(dx: &Gradient, dy: &Gradient) -> (GrayImage, GrayImage) {
    let (w, h) = dx.dimensions();
    let mut orientation = GrayImage::new(w, h);
    let mut magnitude = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let gx = dx.get_pixel(x, y).0[0] as f32;
            let gy = dy.get_pixel(x, y).0[0] as f32;
            let mut angle = gy.atan2(gx);
            if angle < 0.0 {
                angle += PI;
            }
            if angle >= PI {
                angle -= PI;
            }
            let o = (angle * ORIENTATION_SCALE).floor();
            let m = ((gx * gx + gy * gy).sqrt() * MAGNITUDE_SCALE).min(255.0);
            orientation.put_pixel(x, y, Luma([o as u8]));
            magnitude.put_pixel(x, y, Luma([m as u8]));
        }
    }
    (orientation, magnitude)
}

/// The feature channels of an image. Every channel has the same size.
#[derive(Debug, Clone)]
pub struct FeatureStack {
    width: u32,
    height: u32,
    channels: Vec<FeatureImage>,
}

impl FeatureStack {
    /// Builds the feature channels of a grey image.
    pub fn from_gray(img: &GrayImage, hog: &HogExtractor) -> Result<FeatureStack> {
        let (w, h) = img.dimensions();
        let mut channels = Vec::with_capacity(BASE_CHANNELS + hog.bins());
        channels.push(FeatureImage::from_fn(w, h, |x, y| Luma([img.get_pixel(x, y).0[0] as f32])));

        let dx = horizontal_sobel(img);
        let dy = vertical_sobel(img);
        channels.push(FeatureImage::from_fn(w, h, |x, y| {
            Luma([(dx.get_pixel(x, y).0[0] as f32).abs()])
        }));
        channels.push(FeatureImage::from_fn(w, h, |x, y| {
            Luma([(dy.get_pixel(x, y).0[0] as f32).abs()])
        }));

        let (orientation, magnitude) = maps_from_sobel(&dx, &dy);
        channels.extend(hog.extract(&orientation, &magnitude)?);
        FeatureStack::from_channels(channels)
    }

    /// Wraps already computed channels.
    /// Fails if no channel is given or the channels differ in size.
    pub fn from_channels(channels: Vec<FeatureImage>) -> Result<FeatureStack> {
        let (width, height) = match channels.first() {
            Some(c) => c.dimensions(),
            None => bail!("a feature stack needs at least one channel"),
        };
        for c in channels.iter() {
            if c.dimensions() != (width, height) {
                return Err(ErrorKind::DimensionMismatch((width, height), c.dimensions()).into());
            }
        }
        Ok(FeatureStack {
            width: width,
            height: height,
            channels: channels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, idx: usize) -> Option<&FeatureImage> {
        self.channels.get(idx)
    }

    /// Distance between two rows within the slices returned by `window`.
    pub fn stride(&self) -> usize {
        self.width as usize
    }

    /// Returns for every channel the data starting at the pixel (`x`, `y`).
    /// Together with `stride` this addresses a patch whose top left corner is (`x`, `y`).
    /// Returns None if (`x`, `y`) is outside of the image.
    pub fn window(&self, x: u32, y: u32) -> Option<Vec<&[f32]>> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = y as usize * self.stride() + x as usize;
        Some(self.channels.iter().map(|c| &(**c)[start..]).collect())
    }
}
