use image::{ImageBuffer, Luma};
use rand::{Rng, SeedableRng, XorShiftRng};

pub use image::GrayImage;

/// A single floating point feature channel (e.g. one orientation bin)
pub type FeatureImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Accumulator image used for Hough voting
pub type VoteImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// An offset (dx, dy) of a patch center relative to the center of the object
/// (patch center minus object center)
pub type Offset = [f32; 2];

/// Does a sliding window over an image of size `width` x `height` and calls `f` for every
/// window position that lies completely inside the image.
///
/// # Arguments
/// * `width` - width of the image
/// * `height` - height of the image
/// * `window_width` - the width of a window
/// * `window_height`- the height of a window
/// * `step_x` - the step size in the x-direction
/// * `step_y` - the step size in the y-direction
/// * `f` - called with the top left corner and the midpoint of every window
pub fn iterate_windows<F>(width: u32,
                          height: u32,
                          window_width: u32,
                          window_height: u32,
                          step_x: u32,
                          step_y: u32,
                          mut f: F)
    where F: FnMut(
                   // top left x, top left y
                   u32,
                   u32,
                   // mid_x, mid_y
                   u32,
                   u32)
{
    if window_width == 0 || window_height == 0 || window_width > width ||
       window_height > height {
        return;
    }
    let step_x = if step_x == 0 { 1 } else { step_x };
    let step_y = if step_y == 0 { 1 } else { step_y };
    let left_w = window_width / 2;
    let left_h = window_height / 2;
    let mut y = 0;
    while y + window_height <= height {
        let mut x = 0;
        while x + window_width <= width {
            f(x, y, x + left_w, y + left_h);
            x += step_x;
        }
        y += step_y;
    }
}

/// Draws `count` distinct indices of `0..len` (all of them if `count >= len`).
/// The order of the returned indices is random.
pub fn sample_indices<R: Rng>(len: usize, count: usize, rng: &mut R) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..len).collect();
    let count = if count > len { len } else { count };
    // partial Fisher-Yates
    for i in 0..count {
        let j = rng.gen_range(i, len);
        idx.swap(i, j);
    }
    idx.truncate(count);
    idx
}

/// Derives the seed of the sub stream with number `index` from `root_seed`.
/// Different indices give (with overwhelming probability) unrelated seeds, so
/// every tree of a forest can own its random stream.
pub fn sub_stream_seed(root_seed: u64, index: usize) -> u64 {
    splitmix64(root_seed ^ splitmix64(index as u64))
}

/// Creates a random number generator from a 64 bit seed.
pub fn seeded_rng(seed: u64) -> XorShiftRng {
    let a = splitmix64(seed);
    let b = splitmix64(a);
    let mut words = [a as u32, (a >> 32) as u32, b as u32, (b >> 32) as u32];
    // XorShift must not be seeded with zeros only
    if words.iter().all(|&w| w == 0) {
        words[0] = 0x9E37_79B9;
    }
    XorShiftRng::from_seed(words)
}

#[inline]
fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterate_windows() {
        let mut pos = vec![];
        iterate_windows(5, 4, 3, 2, 2, 2, |x, y, mx, my| pos.push((x, y, mx, my)));
        assert_eq!(pos,
                   vec![(0, 0, 1, 1), (2, 0, 3, 1), (0, 2, 1, 3), (2, 2, 3, 3)]);

        let mut count = 0;
        iterate_windows(2, 2, 3, 3, 1, 1, |_, _, _, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_sample_indices() {
        let mut rng = seeded_rng(7);
        let mut s = sample_indices(10, 4, &mut rng);
        assert_eq!(s.len(), 4);
        s.sort();
        s.dedup();
        assert_eq!(s.len(), 4);
        assert!(s.iter().all(|&i| i < 10));

        let mut all = sample_indices(5, 20, &mut rng);
        all.sort();
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_seeded_streams() {
        let mut a = seeded_rng(sub_stream_seed(42, 0));
        let mut b = seeded_rng(sub_stream_seed(42, 0));
        let mut c = seeded_rng(sub_stream_seed(42, 1));
        let va: Vec<u32> = (0..8).map(|_| a.gen()).collect();
        let vb: Vec<u32> = (0..8).map(|_| b.gen()).collect();
        let vc: Vec<u32> = (0..8).map(|_| c.gen()).collect();
        assert_eq!(va, vb);
        assert!(va != vc);
    }
}
