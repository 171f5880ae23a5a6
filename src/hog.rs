//! Soft binned histograms of oriented gradients.
//!
//! Every output pixel gets a histogram over the orientations within a small
//! window around it. An orientation is split between its two nearest bins
//! (circular) and every vote is weighted by the gradient magnitude and a
//! gaussian kernel over the window position. This makes the descriptor robust
//! against small changes of the orientation or the position.

use errors::*;
use rayon::prelude::*;
use std::f32::consts::PI;
use types::{FeatureImage, GrayImage};

/// Orientation maps store the angle (within [0, PI)) multiplied by this factor.
pub const ORIENTATION_SCALE: f32 = 80.0;

/// Extracts soft binned histograms of oriented gradients.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HogExtractor {
    bins: usize,
    bin_width: f32,
    window: u32,
    /// gaussian window, row major
    gauss: Vec<f32>,
}

impl Default for HogExtractor {
    /// 9 bins over a 5x5 window for orientation maps scaled with `ORIENTATION_SCALE`.
    fn default() -> HogExtractor {
        HogExtractor::new(9, 5, PI * ORIENTATION_SCALE / 9.0)
            .expect("default histogram parameters are valid")
    }
}

/// Computes the normalized `window` x `window` gaussian kernel (row major).
/// The entries sum up to 1.
fn gaussian_window(window: u32) -> Vec<f32> {
    let w = window as usize;
    let a = -((w as f64) - 1.0) / 2.0;
    let sigma2 = 2.0 * (0.5 * w as f64) * (0.5 * w as f64);
    let mut kernel = Vec::with_capacity(w * w);
    for y in 0..w {
        for x in 0..w {
            let dx = a + x as f64;
            let dy = a + y as f64;
            kernel.push((-(dx * dx + dy * dy) / sigma2).exp());
        }
    }
    let sum: f64 = kernel.iter().sum();
    kernel.into_iter().map(|k| (k / sum) as f32).collect()
}

/// Adds the value `w` to the histogram `desc` at the continuous bin coordinate `v`.
/// The mass is split between the bin containing `v` and its nearest neighbour bin
/// (the histogram is circular). `floor(v)` has to be a valid bin.
#[inline]
pub fn soft_bin(v: f32, w: f64, desc: &mut [f64]) {
    let bins = desc.len();
    let bin1 = v as usize;
    let mut delta = v - bin1 as f32 - 0.5;
    let bin2 = if delta < 0.0 {
        delta = -delta;
        if bin1 < 1 { bins - 1 } else { bin1 - 1 }
    } else if bin1 < bins - 1 {
        bin1 + 1
    } else {
        0
    };
    let delta = delta as f64;
    desc[bin1] += (1.0 - delta) * w;
    desc[bin2] += delta * w;
}

impl HogExtractor {
    /// Creates a new extractor.
    /// Returns None if `bins` or `window` is zero or `bin_width` is not positive.
    ///
    /// # Arguments
    /// * `bins` - number of orientation bins (= number of output channels)
    /// * `window` - the histogram of a pixel is computed over a `window` x `window` neighbourhood
    /// * `bin_width` - range of orientation values covered by one bin
    pub fn new(bins: usize, window: u32, bin_width: f32) -> Option<HogExtractor> {
        if bins == 0 || window == 0 || !(bin_width > 0.0) {
            return None;
        }
        Some(HogExtractor {
            bins: bins,
            bin_width: bin_width,
            window: window,
            gauss: gaussian_window(window),
        })
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn bin_width(&self) -> f32 {
        self.bin_width
    }

    /// The gaussian weights of the window (row major).
    pub fn gaussian(&self) -> &[f32] {
        &self.gauss
    }

    /// Checks that every orientation falls into one of the bins.
    fn check_orientation(&self, orientation: &GrayImage) -> Result<()> {
        for p in orientation.pixels() {
            let o = p.0[0];
            if (o as f32 / self.bin_width) as usize >= self.bins {
                return Err(ErrorKind::OrientationOutOfRange(o, self.bins).into());
            }
        }
        Ok(())
    }

    /// Computes the histogram of the window whose top left corner is at `start`
    /// (index into the raw image data).
    fn window_histogram(&self,
                        orient: &[u8],
                        magn: &[u8],
                        start: usize,
                        stride: usize,
                        desc: &mut [f64]) {
        for d in desc.iter_mut() {
            *d = 0.0;
        }
        let w = self.window as usize;
        let mut i = 0;
        for y in 0..w {
            let row = start + y * stride;
            for x in 0..w {
                #[cfg(feature="reduce_bound_checks")]
                let (o, m) = unsafe {
                    (*orient.get_unchecked(row + x), *magn.get_unchecked(row + x))
                };
                #[cfg(not(feature="reduce_bound_checks"))]
                let (o, m) = (orient[row + x], magn[row + x]);
                soft_bin(o as f32 / self.bin_width,
                         m as f64 * self.gauss[i] as f64,
                         desc);
                i += 1;
            }
        }
    }

    /// Extracts one channel per orientation bin.
    ///
    /// Every channel has the size of the input maps. The histogram of a window is
    /// stored at the window's center, so a border of `window / 2` pixels stays zero.
    ///
    /// # Arguments
    /// * `orientation` - orientation map, every value has to lie in `[0, bins * bin_width)`
    /// * `magnitude` - gradient magnitude map of the same size
    pub fn extract(&self, orientation: &GrayImage, magnitude: &GrayImage) -> Result<Vec<FeatureImage>> {
        let (width, height) = orientation.dimensions();
        if magnitude.dimensions() != (width, height) {
            return Err(ErrorKind::DimensionMismatch((width, height), magnitude.dimensions())
                .into());
        }
        self.check_orientation(orientation)?;

        let mut out: Vec<FeatureImage> = (0..self.bins)
            .map(|_| FeatureImage::new(width, height))
            .collect();
        if width < self.window || height < self.window {
            return Ok(out);
        }

        let stride = width as usize;
        let cols = (width - self.window + 1) as usize;
        let rows = (height - self.window + 1) as usize;
        let orient: &[u8] = &**orientation;
        let magn: &[u8] = &**magnitude;

        // Row y holds the histograms of the windows starting in image row y,
        // stored as cols x bins.
        let hist_rows: Vec<Vec<f64>> = (0..rows)
            .into_par_iter()
            .map(|y| {
                let mut row = vec![0.0; cols * self.bins];
                for (x, desc) in row.chunks_mut(self.bins).enumerate() {
                    self.window_histogram(orient, magn, y * stride + x, stride, desc);
                }
                row
            })
            .collect();

        let off = self.window / 2;
        for (y, row) in hist_rows.iter().enumerate() {
            for (x, desc) in row.chunks(self.bins).enumerate() {
                for (bin, channel) in out.iter_mut().enumerate() {
                    channel.get_pixel_mut(x as u32 + off, y as u32 + off).0[0] = desc[bin] as f32;
                }
            }
        }
        debug!("Extracted {} orientation channels of size {}x{}", self.bins, width, height);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gray(w: u32, h: u32, values: &[u8]) -> GrayImage {
        GrayImage::from_raw(w, h, values.to_vec()).unwrap()
    }

    #[test]
    fn test_gaussian_is_normalized() {
        for w in 1..8 {
            let hog = HogExtractor::new(4, w, 10.0).unwrap();
            let sum: f32 = hog.gaussian().iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert_eq!(hog.gaussian().len(), (w * w) as usize);
        }
        let hog = HogExtractor::new(4, 5, 10.0).unwrap();
        let g = hog.gaussian();
        // symmetric and peaked at the center
        assert!((g[0] - g[24]).abs() < 1e-7);
        assert!((g[1] - g[5]).abs() < 1e-7);
        assert!(g[12] > g[7] && g[7] > g[2]);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(HogExtractor::new(0, 5, 1.0).is_none());
        assert!(HogExtractor::new(9, 0, 1.0).is_none());
        assert!(HogExtractor::new(9, 5, 0.0).is_none());
        assert!(HogExtractor::new(9, 5, -1.0).is_none());
    }

    #[test]
    fn test_soft_bin_conservation() {
        let bins = 6;
        // integral values, wrap around at the lower and upper end, arbitrary fractions
        let values = [0.0f32, 0.2, 0.5, 0.7, 1.0, 2.5, 3.999, 5.0, 5.3, 5.9];
        for &v in values.iter() {
            let mut desc = vec![0.0; bins];
            soft_bin(v, 3.0 * 0.25, &mut desc);
            let sum: f64 = desc.iter().sum();
            assert!((sum - 0.75).abs() < 1e-9, "v = {}", v);
            assert_eq!(desc.iter().filter(|&&d| d != 0.0).count() <= 2, true);
        }
    }

    #[test]
    fn test_soft_bin_wrap_around() {
        let mut desc = vec![0.0; 4];
        // bin1 = 0, delta = -0.25 => neighbour is the last bin
        soft_bin(0.25, 1.0, &mut desc);
        assert!((desc[0] - 0.75).abs() < 1e-9);
        assert!((desc[3] - 0.25).abs() < 1e-9);

        let mut desc = vec![0.0; 4];
        // bin1 = 3, delta = 0.25 => neighbour is the first bin
        soft_bin(3.75, 1.0, &mut desc);
        assert!((desc[3] - 0.75).abs() < 1e-9);
        assert!((desc[0] - 0.25).abs() < 1e-9);

        let mut desc = vec![0.0; 4];
        // exactly at the center of a bin
        soft_bin(2.5, 2.0, &mut desc);
        assert_eq!(desc, vec![0.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_single_pixel_at_bin_boundary() {
        // 2 bins, 1x1 window, v = 10 / 10 = 1.0, magnitude 4
        let hog = HogExtractor::new(2, 1, 10.0).unwrap();
        assert_eq!(hog.gaussian(), &[1.0]);
        let out = hog.extract(&gray(1, 1, &[10]), &gray(1, 1, &[4])).unwrap();
        assert_eq!(out.len(), 2);
        let b0 = out[0].get_pixel(0, 0).0[0];
        let b1 = out[1].get_pixel(0, 0).0[0];
        assert_eq!(b0 + b1, 4.0);
        assert_eq!(b0, 2.0);
        assert_eq!(b1, 2.0);
    }

    #[test]
    fn test_extract_window_and_border() {
        let hog = HogExtractor::new(3, 3, 10.0).unwrap();
        let orient = GrayImage::from_pixel(5, 4, Luma([15]));
        let magn = GrayImage::from_pixel(5, 4, Luma([2]));
        let out = hog.extract(&orient, &magn).unwrap();
        assert_eq!(out.len(), 3);
        for channel in out.iter() {
            assert_eq!(channel.dimensions(), (5, 4));
            // border is zero
            assert_eq!(channel.get_pixel(0, 0).0[0], 0.0);
            assert_eq!(channel.get_pixel(4, 1).0[0], 0.0);
            assert_eq!(channel.get_pixel(2, 3).0[0], 0.0);
        }
        // v = 1.5 => all mass in bin 1, total 2 * (sum of gaussian) = 2
        for &(x, y) in [(1, 1), (2, 1), (3, 1), (1, 2), (2, 2), (3, 2)].iter() {
            assert!((out[1].get_pixel(x, y).0[0] - 2.0).abs() < 1e-5);
            assert_eq!(out[0].get_pixel(x, y).0[0], 0.0);
            assert_eq!(out[2].get_pixel(x, y).0[0], 0.0);
        }
    }

    #[test]
    fn test_extract_total_mass() {
        let hog = HogExtractor::new(4, 3, 8.0).unwrap();
        let orient = gray(3, 3, &[0, 4, 8, 12, 16, 20, 24, 28, 31]);
        let magn = gray(3, 3, &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let out = hog.extract(&orient, &magn).unwrap();
        let expected: f64 = magn.iter()
            .zip(hog.gaussian().iter())
            .map(|(&m, &g)| m as f64 * g as f64)
            .sum();
        let total: f64 = out.iter().map(|c| c.get_pixel(1, 1).0[0] as f64).sum();
        assert!((total - expected).abs() < 1e-4);
    }

    #[test]
    fn test_extract_rejects_invalid_input() {
        let hog = HogExtractor::new(2, 1, 10.0).unwrap();
        // 20 / 10 = 2 is not a valid bin
        let err = hog.extract(&gray(2, 1, &[3, 20]), &gray(2, 1, &[1, 1])).unwrap_err();
        match *err.kind() {
            ErrorKind::OrientationOutOfRange(20, 2) => (),
            ref e => panic!("unexpected error {}", e),
        }
        let err = hog.extract(&gray(2, 1, &[3, 4]), &gray(1, 2, &[1, 1])).unwrap_err();
        match *err.kind() {
            ErrorKind::DimensionMismatch((2, 1), (1, 2)) => (),
            ref e => panic!("unexpected error {}", e),
        }
    }

    #[test]
    fn test_default_covers_orientation_range() {
        let hog = HogExtractor::default();
        assert_eq!(hog.bins(), 9);
        assert_eq!(hog.window(), 5);
        let max = (PI * ORIENTATION_SCALE) as u8;
        let orient = GrayImage::from_pixel(6, 6, Luma([max]));
        let magn = GrayImage::from_pixel(6, 6, Luma([1]));
        assert!(hog.extract(&orient, &magn).is_ok());
    }

    #[test]
    fn test_small_image_gives_zero_channels() {
        let hog = HogExtractor::new(3, 5, 10.0).unwrap();
        let out = hog.extract(&gray(2, 2, &[1, 2, 3, 4]), &gray(2, 2, &[1, 1, 1, 1])).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|c| c.iter().all(|&v| v == 0.0)));
    }
}
