/// Hough voting: every patch of an image votes with the leafs of the forest
/// for the position of the object center.
///
/// see "Class-Specific Hough Forests for Object Detection" (Gall and Lempitsky)

use errors::*;
use features::FeatureStack;
use image::Luma;
use imageproc::filter::gaussian_blur_f32;
use super::forest::Ensemble;
use super::predictor::{HoughLeaf, TreePredictor};
use types::{VoteImage, iterate_windows};

/// Sliding window parameters used to build the vote images.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HoughVoting {
    /// width of a patch
    pub patch_width: u32,
    /// height of a patch
    pub patch_height: u32,
    /// Stepwidth for the sliding window
    pub stepwidth: u32,
    /// sigma of the gaussian blur applied to the votes
    pub gaussian_sigma: f32,
    /// a tree only votes for a label if its leaf has at least this probability for it
    pub min_probability: f32,
}

impl HoughVoting {
    /// Returns None if a size is zero, sigma is not positive or
    /// `min_probability` is not within [0, 1].
    pub fn new(patch_width: u32,
               patch_height: u32,
               stepwidth: u32,
               gaussian_sigma: f32,
               min_probability: f32)
               -> Option<HoughVoting> {
        if patch_width == 0 || patch_height == 0 || stepwidth == 0 || !(gaussian_sigma > 0.0) ||
           !(min_probability >= 0.0 && min_probability <= 1.0) {
            return None;
        }
        Some(HoughVoting {
            patch_width: patch_width,
            patch_height: patch_height,
            stepwidth: stepwidth,
            gaussian_sigma: gaussian_sigma,
            min_probability: min_probability,
        })
    }

    /// Collects the votes of every patch without smoothing them.
    /// Returns one image per label, the image of the background (label 0) stays empty.
    ///
    /// Only active labels (see `Ensemble::set_active_labels`) get votes. If no labels were
    /// selected every label is used.
    /// The patch size has to be the one the trees were grown from.
    pub fn accumulate<T>(&self, forest: &Ensemble<T>, stack: &FeatureStack) -> Result<Vec<VoteImage>>
        where T: TreePredictor,
              T::Leaf: HoughLeaf
    {
        let labels = forest.num_labels()?;
        let active = forest.active_labels();
        let weights: Vec<f32> = if active.is_empty() {
            vec![1.0; labels]
        } else if active.len() == labels {
            active.iter().map(|&a| a as f32).collect()
        } else {
            return Err(ErrorKind::LabelSelectorMismatch(labels, active.len()).into());
        };
        let patch = forest.patch_size()?;
        if patch != (self.patch_width, self.patch_height) {
            return Err(ErrorKind::DimensionMismatch(patch, (self.patch_width, self.patch_height))
                .into());
        }
        let (w, h) = (stack.width(), stack.height());
        let mut votes = vec![VoteImage::new(w, h); labels];

        let mut windows = vec![];
        iterate_windows(w,
                        h,
                        self.patch_width,
                        self.patch_height,
                        self.stepwidth,
                        self.stepwidth,
                        |x, y, mx, my| windows.push((x, y, mx, my)));

        for (x, y, mx, my) in windows {
            let channels = match stack.window(x, y) {
                Some(c) => c,
                None => continue,
            };
            let leafs = forest.regress(&channels, stack.stride())?;
            for label in 1..labels {
                let weight = weights[label];
                if weight <= 0.0 {
                    continue;
                }
                let img = &mut votes[label];
                for leaf in leafs.iter() {
                    let prob = leaf.probability(label);
                    let offsets = leaf.offsets(label);
                    // vote only if the tree is sure enough
                    if prob <= 0.0 || prob < self.min_probability || offsets.is_empty() {
                        continue;
                    }
                    let valtoadd = (weight * 255.0 * prob / offsets.len() as f32) as u16;
                    if valtoadd == 0 {
                        continue;
                    }
                    for offs in offsets.iter() {
                        let nx = (mx as f32 - offs[0]).round();
                        let ny = (my as f32 - offs[1]).round();
                        // force valid coordinates
                        if nx < 0.0 || ny < 0.0 || nx >= w as f32 || ny >= h as f32 {
                            continue;
                        }
                        let px = img.get_pixel_mut(nx as u32, ny as u32);
                        *px = Luma([px.0[0].saturating_add(valtoadd)]);
                    }
                }
            }
        }
        Ok(votes)
    }

    /// Builds one smoothed vote image per label.
    /// Use gaussian blur to avoid mean shifting and just search for a maximum value.
    pub fn vote<T>(&self, forest: &Ensemble<T>, stack: &FeatureStack) -> Result<Vec<VoteImage>>
        where T: TreePredictor,
              T::Leaf: HoughLeaf
    {
        let votes = self.accumulate(forest, stack)?;
        debug!("Smoothing {} vote images", votes.len());
        Ok(votes.iter().map(|v| gaussian_blur_f32(v, self.gaussian_sigma)).collect())
    }
}

/// Returns the position and the value of the largest vote.
/// Returns None for an empty image.
pub fn best_hypothesis(votes: &VoteImage) -> Option<(u32, u32, u16)> {
    let w = votes.width();
    (0..w * votes.height())
        .max_by_key(|i| votes[(i % w, i / w)].0[0])
        .map(|i| {
            let (x, y) = (i % w, i / w);
            (x, y, votes[(x, y)].0[0])
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hough::forest::TrainParameters;
    use hough::houghforest::ClassRegressionTree;
    use hough::houghforest::tests::toy_patches;
    use hough::predictor::TrainingMode;
    use types::{FeatureImage, seeded_rng};

    fn forest() -> Ensemble<ClassRegressionTree> {
        let data = toy_patches(6);
        let params = TrainParameters::new(vec![0, 1, 2])
            .unwrap()
            .min_samples_per_split(2)
            .max_depth(8)
            .samples_per_tree(data.len());
        let mut forest = Ensemble::new(3, true);
        forest.train_forest(&params, &mut seeded_rng(2), &data).unwrap();
        forest
    }

    /// 12x12 image made of the pattern of class 1 (left half of every 4x4 block bright)
    fn stack() -> FeatureStack {
        let c = FeatureImage::from_fn(12, 12, |x, _| Luma([if x % 4 < 2 { 10.0 } else { 0.0 }]));
        FeatureStack::from_channels(vec![c]).unwrap()
    }

    #[test]
    fn test_new() {
        assert!(HoughVoting::new(4, 4, 1, 1.0, 0.5).is_some());
        assert!(HoughVoting::new(0, 4, 1, 1.0, 0.5).is_none());
        assert!(HoughVoting::new(4, 4, 0, 1.0, 0.5).is_none());
        assert!(HoughVoting::new(4, 4, 1, 0.0, 0.5).is_none());
        assert!(HoughVoting::new(4, 4, 1, 1.0, 1.5).is_none());
    }

    #[test]
    fn test_accumulate() {
        let forest = forest();
        let voting = HoughVoting::new(4, 4, 4, 1.0, 0.5).unwrap();
        let votes = voting.accumulate(&forest, &stack()).unwrap();
        assert_eq!(votes.len(), 3);
        // every window is a class 1 patch, the offsets of class 1 are (1, 2)
        let targets: Vec<(u32, u32)> = vec![1, 5, 9]
            .into_iter()
            .flat_map(|x| vec![0, 4, 8].into_iter().map(move |y| (x, y)))
            .collect();
        for (x, y, p) in votes[1].enumerate_pixels() {
            if targets.contains(&(x, y)) {
                assert!(p.0[0] > 0);
            } else {
                assert_eq!(p.0[0], 0);
            }
        }
        assert!(votes[0].pixels().all(|p| p.0[0] == 0));
        assert!(votes[2].pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_inactive_labels_do_not_vote() {
        let mut forest = forest();
        forest.set_active_labels(&[1, 0, 1]).unwrap();
        let voting = HoughVoting::new(4, 4, 4, 1.0, 0.5).unwrap();
        let votes = voting.accumulate(&forest, &stack()).unwrap();
        assert!(votes[1].pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_patch_size_must_match_trees() {
        let forest = forest();
        let voting = HoughVoting::new(2, 2, 1, 1.0, 0.5).unwrap();
        let err = voting.accumulate(&forest, &stack()).unwrap_err();
        match *err.kind() {
            ErrorKind::DimensionMismatch((4, 4), (2, 2)) => (),
            ref e => panic!("unexpected error {}", e),
        }
    }

    #[test]
    fn test_retraining_resets_active_labels() {
        let data = toy_patches(6);
        let params = TrainParameters::new(vec![0, 1, 2])
            .unwrap()
            .min_samples_per_split(2)
            .max_depth(8)
            .samples_per_tree(data.len());
        let mut forest = Ensemble::<ClassRegressionTree>::new(2, true);
        forest.set_training_mode(TrainingMode::PositiveVsBackground);
        forest.train_forest(&params, &mut seeded_rng(3), &data).unwrap();
        forest.set_active_labels(&[-1]).unwrap();
        assert_eq!(forest.active_labels(), vec![1, 1]);

        forest.set_training_mode(TrainingMode::MultiClass);
        forest.train_forest(&params, &mut seeded_rng(3), &data).unwrap();
        assert_eq!(forest.num_labels().unwrap(), 3);
        assert!(forest.active_labels().is_empty());

        let voting = HoughVoting::new(4, 4, 4, 1.0, 0.5).unwrap();
        let votes = voting.accumulate(&forest, &stack()).unwrap();
        assert_eq!(votes.len(), 3);
        assert!(votes[1].pixels().any(|p| p.0[0] > 0));
    }

    #[test]
    fn test_vote_and_best_hypothesis() {
        let forest = forest();
        let voting = HoughVoting::new(4, 4, 4, 0.8, 0.5).unwrap();
        let votes = voting.vote(&forest, &stack()).unwrap();
        assert_eq!(votes[1].dimensions(), (12, 12));
        let (x, y, val) = best_hypothesis(&votes[1]).unwrap();
        assert!(val > 0);
        assert!(x < 12 && y < 12);
        assert!(best_hypothesis(&VoteImage::new(0, 0)).is_none());
    }

    #[test]
    fn test_best_hypothesis() {
        let mut img = VoteImage::new(5, 4);
        img.put_pixel(3, 2, Luma([7]));
        img.put_pixel(1, 1, Luma([5]));
        assert_eq!(best_hypothesis(&img), Some((3, 2, 7)));
    }
}
