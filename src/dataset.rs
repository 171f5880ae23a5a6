//! Training patches for growing the trees of a forest.

use errors::*;
use features::FeatureStack;
use rand::Rng;
use types::{Offset, sample_indices};

/// A labeled patch. The feature data is copied out of the image,
/// so a set of patches does not keep the images alive.
#[derive(Debug, Clone)]
pub struct TrainingPatch {
    /// Class of the patch (not remapped). Background patches carry the class id of the
    /// background in the class remap table of the forest.
    pub class_id: usize,
    /// Patch center minus object center.
    /// None for background patches.
    pub offset: Option<Offset>,
    /// one vector (row major, width * height) per channel
    channels: Vec<Vec<f32>>,
}

impl TrainingPatch {
    /// The value of the channel `channel` at index `idx` (= y * patch width + x).
    #[inline]
    pub fn value(&self, channel: usize, idx: usize) -> f32 {
        self.channels[channel][idx]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }
}

/// A set of training patches sharing the same geometry.
#[derive(Debug, Clone)]
pub struct PatchSet {
    width: u32,
    height: u32,
    channel_count: usize,
    patches: Vec<TrainingPatch>,
}

impl PatchSet {
    /// Creates an empty set for patches of `width` x `height` pixels with `channel_count` channels.
    /// Returns None if one of the values is zero.
    pub fn new(width: u32, height: u32, channel_count: usize) -> Option<PatchSet> {
        if width == 0 || height == 0 || channel_count == 0 {
            return None;
        }
        Some(PatchSet {
            width: width,
            height: height,
            channel_count: channel_count,
            patches: vec![],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Number of patches
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn patches(&self) -> &[TrainingPatch] {
        &self.patches
    }

    pub fn get(&self, idx: usize) -> Option<&TrainingPatch> {
        self.patches.get(idx)
    }

    /// Adds a patch given by its raw channel data (row major, one vector per channel).
    pub fn push(&mut self,
                class_id: usize,
                offset: Option<Offset>,
                channels: Vec<Vec<f32>>)
                -> Result<()> {
        let size = (self.width * self.height) as usize;
        if channels.len() != self.channel_count || channels.iter().any(|c| c.len() != size) {
            bail!("patch data does not match {} channels of {}x{} pixels",
                  self.channel_count,
                  self.width,
                  self.height);
        }
        self.patches.push(TrainingPatch {
            class_id: class_id,
            offset: offset,
            channels: channels,
        });
        Ok(())
    }

    /// Copies the patch whose top left corner is at (`x`, `y`) out of the feature stack.
    pub fn push_from_stack(&mut self,
                           stack: &FeatureStack,
                           x: u32,
                           y: u32,
                           class_id: usize,
                           offset: Option<Offset>)
                           -> Result<()> {
        if stack.channel_count() != self.channel_count {
            bail!("feature stack has {} channels, expected {}",
                  stack.channel_count(),
                  self.channel_count);
        }
        if x + self.width > stack.width() || y + self.height > stack.height() {
            bail!("patch at ({}, {}) does not fit into the image", x, y);
        }
        let stride = stack.stride();
        let channels = match stack.window(x, y) {
            Some(win) => {
                win.iter()
                    .map(|c| {
                        let mut data = Vec::with_capacity((self.width * self.height) as usize);
                        for py in 0..self.height as usize {
                            let row = py * stride;
                            data.extend_from_slice(&c[row..row + self.width as usize]);
                        }
                        data
                    })
                    .collect()
            }
            None => bail!("patch at ({}, {}) does not fit into the image", x, y),
        };
        self.push(class_id, offset, channels)
    }

    /// Draws up to `count` distinct patch indices.
    pub fn sample<R: Rng>(&self, count: usize, rng: &mut R) -> Vec<usize> {
        sample_indices(self.patches.len(), count, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use types::{FeatureImage, seeded_rng};

    #[test]
    fn test_push_checks_geometry() {
        let mut set = PatchSet::new(2, 2, 1).unwrap();
        assert!(set.push(0, None, vec![vec![0.0; 4]]).is_ok());
        assert!(set.push(0, None, vec![vec![0.0; 3]]).is_err());
        assert!(set.push(0, None, vec![vec![0.0; 4], vec![0.0; 4]]).is_err());
        assert_eq!(set.len(), 1);
        assert!(PatchSet::new(0, 2, 1).is_none());
    }

    #[test]
    fn test_push_from_stack() {
        let c0 = FeatureImage::from_fn(5, 4, |x, y| Luma([(y * 5 + x) as f32]));
        let stack = FeatureStack::from_channels(vec![c0]).unwrap();
        let mut set = PatchSet::new(2, 2, 1).unwrap();
        set.push_from_stack(&stack, 3, 2, 1, Some([0.5, -1.0])).unwrap();
        let p = set.get(0).unwrap();
        assert_eq!(p.channels()[0], vec![13.0, 14.0, 18.0, 19.0]);
        assert_eq!(p.value(0, 3), 19.0);
        assert_eq!(p.class_id, 1);
        assert_eq!(p.offset, Some([0.5, -1.0]));

        assert!(set.push_from_stack(&stack, 4, 0, 1, None).is_err());
        assert!(set.push_from_stack(&stack, 0, 3, 1, None).is_err());
    }

    #[test]
    fn test_sample() {
        let mut set = PatchSet::new(1, 1, 1).unwrap();
        for i in 0..10 {
            set.push(i % 2, None, vec![vec![i as f32]]).unwrap();
        }
        let mut rng = seeded_rng(3);
        let s = set.sample(4, &mut rng);
        assert_eq!(s.len(), 4);
        assert_eq!(set.sample(100, &mut rng).len(), 10);
    }
}
