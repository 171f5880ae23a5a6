//! The interface between a forest and its trees.
//!
//! A forest only orchestrates its trees: it creates, trains, queries and stores them
//! using the `TreePredictor` trait. How a tree splits its data and what it stores in
//! its leafs is up to the implementation.

use dataset::PatchSet;
use errors::*;
use rand::Rng;
use std::path::Path;
use types::Offset;

/// How the class ids of the training patches are used to split the nodes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingMode {
    /// Information gain over all labels
    MultiClass,
    /// Information gain over all labels (divided by the number of labels)
    /// plus the information gain foreground vs. background
    PositiveMultiClass,
    /// Every foreground label is merged into one label and the information gain
    /// foreground vs. background is used
    PositiveVsBackground,
}

impl Default for TrainingMode {
    fn default() -> TrainingMode {
        TrainingMode::MultiClass
    }
}

/// Everything a tree needs to know at construction.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TreeConfig {
    /// A node with less patches than this value becomes a leaf
    pub min_samples: usize,
    /// The maximum depth a tree may have
    pub max_depth: usize,
    /// Number of patches within the dataset the tree is grown from
    pub dataset_size: usize,
    /// Allow the tree to stop growing early
    pub skip: bool,
}

/// A node of a label hierarchy (taxonomy over the labels of a forest).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HierarchyNode {
    pub id: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// labels (not raw class ids) belonging to this node
    pub subclasses: Vec<usize>,
    pub linkage: f32,
}

/// Leafs used for Hough voting
pub trait HoughLeaf {
    /// Probability that the patch belongs to the label `label`
    fn probability(&self, label: usize) -> f32;
    /// Offsets (patch center minus object center) stored for the label `label`
    fn offsets(&self, label: usize) -> &[Offset];
}

/// A single tree of a forest.
///
/// A tree is either grown once or loaded from a file and afterwards only queried.
pub trait TreePredictor: Sized {
    type Leaf;

    /// Creates an empty (untrained) tree.
    fn new(config: TreeConfig) -> Self;

    /// Sets the label table: `remap[label]` is the class id of the patches with this label.
    /// The label 0 is the background.
    fn set_class_remap(&mut self, remap: &[usize]);

    /// Sets the scale of the images the tree is trained on.
    fn set_scale(&mut self, scale: f32);

    fn scale(&self) -> f32;

    fn set_training_mode(&mut self, mode: TrainingMode);

    /// Grows the tree from `samples` patches of `data`.
    /// Every random decision is drawn from `rng`.
    fn grow<R: Rng>(&mut self, data: &PatchSet, samples: usize, rng: &mut R) -> Result<()>;

    /// Passes a patch down the tree and returns the reached leaf.
    /// `channels` contains for every feature channel the data starting at the
    /// top left corner of the patch, `stride` is the distance between two rows.
    /// Returns None for an untrained tree, if too few channels are given or if a
    /// channel does not cover the whole patch.
    fn regress(&self, channels: &[&[f32]], stride: usize) -> Option<&Self::Leaf>;

    fn save(&self, path: &Path) -> Result<()>;

    fn load(path: &Path) -> Result<Self>;

    fn depth(&self) -> usize;

    /// Width and height of the patches the tree was grown from
    fn patch_size(&self) -> (u32, u32);

    fn num_labels(&self) -> usize;

    /// The class id of every label
    fn class_ids(&self) -> Vec<usize>;

    fn hierarchy(&self) -> Option<&[HierarchyNode]>;

    fn load_hierarchy(&mut self, path: &Path) -> Result<()>;
}
