/// A hough forest: a fixed number of trees which are trained, queried,
/// stored and loaded together.
///
/// The forest does not know how a tree splits its data. It only uses the
/// `TreePredictor` trait and can therefore be used with every tree implementing it.

use dataset::PatchSet;
use errors::*;
use rand::Rng;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use super::predictor::*;
use types::{seeded_rng, sub_stream_seed};

/// Two scales are equal if they differ less than this value
const SCALE_TOLERANCE: f32 = 1e-6;

/// Parameters to train every tree of a forest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainParameters {
    /// A node with less patches will not be split anymore
    pub min_samples_per_split: usize,
    /// The maximum depth of a tree
    pub max_depth: usize,
    /// Number of patches drawn from the dataset for every tree
    pub samples_per_tree: usize,
    /// `class_remap[label]` is the class id of the label; label 0 is the background
    pub class_remap: Vec<usize>,
    /// scale of the images the patches are taken from
    pub scale: f32,
}

impl TrainParameters {
    /// Creates the parameters with the values used by Gall and Lempitsky.
    /// Returns None if `class_remap` does not contain the background and at least one object class.
    pub fn new(class_remap: Vec<usize>) -> Option<TrainParameters> {
        if class_remap.len() < 2 {
            return None;
        }
        Some(TrainParameters {
            min_samples_per_split: 20,
            max_depth: 15,
            samples_per_tree: 20000,
            class_remap: class_remap,
            scale: 1.0,
        })
    }

    pub fn min_samples_per_split(mut self, val: usize) -> Self {
        self.min_samples_per_split = val;
        self
    }

    pub fn max_depth(mut self, val: usize) -> Self {
        self.max_depth = val;
        self
    }

    pub fn samples_per_tree(mut self, val: usize) -> Self {
        self.samples_per_tree = val;
        self
    }

    pub fn scale(mut self, val: f32) -> Self {
        self.scale = val;
        self
    }
}

/// Which trees take part in `regress_sampled`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum ScaleFilter {
    /// every tree
    All,
    /// only the trees trained on this scale
    Scale(f32),
}

impl ScaleFilter {
    fn accepts(&self, scale: f32) -> bool {
        match *self {
            ScaleFilter::All => true,
            ScaleFilter::Scale(s) => (s - scale).abs() < SCALE_TOLERANCE,
        }
    }
}

/// The file a tree with the index `index` is stored in.
pub fn tree_path(basename: &str, index: usize) -> PathBuf {
    PathBuf::from(format!("{}{:03}.txt", basename, index))
}

/// Creates and grows a single tree.
fn grow_tree<T, R>(params: &TrainParameters,
                   skip: bool,
                   mode: TrainingMode,
                   data: &PatchSet,
                   rng: &mut R)
                   -> Result<T>
    where T: TreePredictor,
          R: Rng
{
    let mut tree = T::new(TreeConfig {
        min_samples: params.min_samples_per_split,
        max_depth: params.max_depth,
        dataset_size: data.len(),
        skip: skip,
    });
    tree.set_class_remap(&params.class_remap);
    tree.set_scale(params.scale);
    tree.set_training_mode(mode);
    tree.grow(data, params.samples_per_tree, rng)?;
    Ok(tree)
}

pub struct Ensemble<T: TreePredictor> {
    trees: Vec<Option<T>>,
    skip: bool,
    mode: TrainingMode,
    active_labels: Vec<i32>,
    progress: Arc<AtomicUsize>,
}

impl<T: TreePredictor> Ensemble<T> {
    /// Creates a forest with `size` untrained trees.
    /// `skip` is handed to every tree (allows the trees to stop growing early).
    pub fn new(size: usize, skip: bool) -> Ensemble<T> {
        Ensemble {
            trees: (0..size).map(|_| None).collect(),
            skip: skip,
            mode: TrainingMode::default(),
            active_labels: vec![],
            progress: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Changes the number of trees. Removed trees are dropped, new slots are untrained.
    /// The active labels are reset.
    pub fn set_size(&mut self, size: usize) {
        self.active_labels.clear();
        if size <= self.trees.len() {
            self.trees.truncate(size);
        } else {
            let missing = size - self.trees.len();
            self.trees.extend((0..missing).map(|_| None));
        }
    }

    pub fn size(&self) -> usize {
        self.trees.len()
    }

    pub fn skip_training(&self) -> bool {
        self.skip
    }

    pub fn training_mode(&self) -> TrainingMode {
        self.mode
    }

    /// Training mode used for the next training.
    pub fn set_training_mode(&mut self, mode: TrainingMode) {
        self.mode = mode;
    }

    /// The tree at position `idx` if the slot is populated.
    pub fn slot(&self, idx: usize) -> Option<&T> {
        self.trees.get(idx).and_then(|t| t.as_ref())
    }

    /// Returns true if every slot holds a tree.
    pub fn is_complete(&self) -> bool {
        self.trees.iter().all(|t| t.is_some())
    }

    /// Number of trees finished in the current (or last) training.
    /// The counter can be read from another thread while training.
    pub fn progress(&self) -> Arc<AtomicUsize> {
        self.progress.clone()
    }

    /// Puts a new set of trees into the slots. The label count may have changed,
    /// so the active labels are reset.
    fn replace_trees(&mut self, trees: Vec<T>) {
        self.trees = trees.into_iter().map(Some).collect();
        self.active_labels.clear();
    }

    fn populated(&self, idx: usize) -> Result<&T> {
        if self.trees.is_empty() {
            return Err(ErrorKind::EmptyEnsemble.into());
        }
        match self.trees.get(idx) {
            Some(&Some(ref t)) => Ok(t),
            _ => Err(ErrorKind::EmptySlot(idx).into()),
        }
    }

    /// Depth of the trees (all trees share it)
    pub fn depth(&self) -> Result<usize> {
        Ok(self.populated(0)?.depth())
    }

    /// Number of labels of the trees (all trees share it)
    pub fn num_labels(&self) -> Result<usize> {
        Ok(self.populated(0)?.num_labels())
    }

    /// Patch size of the trees (all trees share it)
    pub fn patch_size(&self) -> Result<(u32, u32)> {
        Ok(self.populated(0)?.patch_size())
    }

    /// The class id table of every tree
    pub fn class_ids(&self) -> Result<Vec<Vec<usize>>> {
        (0..self.trees.len()).map(|i| self.populated(i).map(|t| t.class_ids())).collect()
    }

    pub fn hierarchy(&self) -> Result<Option<&[HierarchyNode]>> {
        Ok(self.populated(0)?.hierarchy())
    }

    /// Sets the weight of every label used for the detection.
    /// `[-1]` activates every label. Otherwise the selector needs one entry per label,
    /// if not, nothing is changed and an error is returned.
    pub fn set_active_labels(&mut self, selector: &[i32]) -> Result<()> {
        let labels = self.num_labels()?;
        if selector == [-1] {
            self.active_labels = vec![1; labels];
        } else if selector.len() == labels {
            self.active_labels = selector.to_vec();
        } else {
            error!("Label selector has {} entries but the forest has {} labels",
                   selector.len(),
                   labels);
            return Err(ErrorKind::LabelSelectorMismatch(labels, selector.len()).into());
        }
        Ok(())
    }

    /// The weight of every label.
    /// Empty until `set_active_labels` was successful and after the trees were replaced.
    pub fn active_labels(&self) -> Vec<i32> {
        self.active_labels.clone()
    }

    /// Trains every tree one after another. All trees share the random stream `rng`,
    /// so the result depends on the seed and on the order of the trees.
    pub fn train_forest<R: Rng>(&mut self,
                                params: &TrainParameters,
                                rng: &mut R,
                                data: &PatchSet)
                                -> Result<()> {
        if self.trees.is_empty() {
            return Err(ErrorKind::EmptyEnsemble.into());
        }
        if data.is_empty() {
            return Err(ErrorKind::EmptyTrainingSet.into());
        }
        self.progress.store(0, Ordering::SeqCst);
        let n = self.trees.len();
        let mut grown = Vec::with_capacity(n);
        for i in 0..n {
            info!("Training tree {} of {}", i + 1, n);
            grown.push(grow_tree(params, self.skip, self.mode, data, rng)?);
            self.progress.fetch_add(1, Ordering::SeqCst);
        }
        self.replace_trees(grown);
        info!("Trained {} trees", n);
        Ok(())
    }

    /// Stores every tree i in the file `<basename><i + offset>.txt` (index with three digits).
    pub fn save_forest(&self, basename: &str, offset: usize) -> Result<()> {
        for i in 0..self.trees.len() {
            self.populated(i)?;
        }
        for (i, tree) in self.trees.iter().enumerate() {
            if let Some(ref tree) = *tree {
                let path = tree_path(basename, i + offset);
                debug!("Saving tree {} to {}", i, path.display());
                tree.save(&path)?;
            }
        }
        Ok(())
    }

    /// Loads every tree i from the file `<basename><i + offset>.txt`.
    /// Every file is tried. A tree which cannot be loaded leaves its slot empty
    /// and its index is reported by the returned error.
    pub fn load_forest(&mut self, basename: &str, offset: usize) -> Result<()> {
        self.active_labels.clear();
        let mut failed = vec![];
        for (i, slot) in self.trees.iter_mut().enumerate() {
            let path = tree_path(basename, i + offset);
            *slot = match T::load(&path) {
                Ok(tree) => {
                    debug!("Loaded tree {} from {}", i, path.display());
                    Some(tree)
                }
                Err(e) => {
                    error!("Could not load tree {} from {}: {}", i, path.display(), e);
                    failed.push(i);
                    None
                }
            };
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ErrorKind::PartialLoad(failed).into())
        }
    }

    /// Loads the label hierarchy from `path` into every trained tree.
    /// Trees which fail keep working, their indices are reported by the returned error.
    pub fn load_hierarchy(&mut self, path: &Path) -> Result<()> {
        let mut failed = vec![];
        for (i, slot) in self.trees.iter_mut().enumerate() {
            if let Some(ref mut tree) = *slot {
                match tree.load_hierarchy(path) {
                    Ok(()) => info!("Tree {}: loaded hierarchy {}", i, path.display()),
                    Err(e) => {
                        warn!("Tree {}: could not load hierarchy {}: {}", i, path.display(), e);
                        failed.push(i);
                    }
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ErrorKind::HierarchyLoad(failed).into())
        }
    }

    /// Passes a patch down every tree and returns the reached leafs (in the order of the trees).
    ///
    /// `channels` contains the data of every feature channel starting at the top left corner
    /// of the patch, `stride` is the row length of this data.
    pub fn regress(&self, channels: &[&[f32]], stride: usize) -> Result<Vec<&T::Leaf>> {
        (0..self.trees.len()).map(|i| self.regress_tree(i, channels, stride)).collect()
    }

    fn regress_tree(&self, idx: usize, channels: &[&[f32]], stride: usize) -> Result<&T::Leaf> {
        match self.populated(idx)?.regress(channels, stride) {
            Some(leaf) => Ok(leaf),
            None => bail!("tree {} cannot regress a patch with {} channels", idx, channels.len()),
        }
    }

    /// Like `regress`, but only a random part of the trees is used.
    ///
    /// For every tree a value u within [0, 1) is drawn from `rng`. The tree is used if
    /// `u >= keep_threshold` and its scale passes `scale`.
    /// Returns the leafs and the indices of the used trees (ascending).
    pub fn regress_sampled<R: Rng>(&self,
                                   channels: &[&[f32]],
                                   stride: usize,
                                   rng: &mut R,
                                   keep_threshold: f64,
                                   scale: ScaleFilter)
                                   -> Result<(Vec<&T::Leaf>, Vec<usize>)> {
        if self.trees.is_empty() {
            return Err(ErrorKind::EmptyEnsemble.into());
        }
        let mut leafs = vec![];
        let mut indices = vec![];
        for i in 0..self.trees.len() {
            let u = rng.gen::<f64>();
            if u < keep_threshold {
                continue;
            }
            if !scale.accepts(self.populated(i)?.scale()) {
                continue;
            }
            leafs.push(self.regress_tree(i, channels, stride)?);
            indices.push(i);
        }
        Ok((leafs, indices))
    }
}

impl<T> Ensemble<T>
    where T: TreePredictor + Send + Sync,
          T::Leaf: Sync
{
    /// Trains every tree in parallel.
    ///
    /// Every tree gets its own random stream derived from `root_seed` and its index,
    /// so the result only depends on `root_seed` (and not on the order the trees are grown).
    pub fn train_forest_parallel(&mut self,
                                 params: &TrainParameters,
                                 root_seed: u64,
                                 data: &PatchSet)
                                 -> Result<()> {
        if self.trees.is_empty() {
            return Err(ErrorKind::EmptyEnsemble.into());
        }
        if data.is_empty() {
            return Err(ErrorKind::EmptyTrainingSet.into());
        }
        self.progress.store(0, Ordering::SeqCst);
        let n = self.trees.len();
        let skip = self.skip;
        let mode = self.mode;
        let progress = self.progress.clone();
        let grown: Vec<Result<T>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut rng = seeded_rng(sub_stream_seed(root_seed, i));
                let tree = grow_tree(params, skip, mode, data, &mut rng);
                let done = progress.fetch_add(1, Ordering::SeqCst) + 1;
                info!("Trained tree {} ({} of {} done)", i, done, n);
                tree
            })
            .collect();
        let grown: Vec<T> = grown.into_iter().collect::<Result<_>>()?;
        self.replace_trees(grown);
        Ok(())
    }

    /// Same as `regress` but the trees are queried in parallel.
    pub fn regress_parallel(&self, channels: &[&[f32]], stride: usize) -> Result<Vec<&T::Leaf>> {
        let leafs: Vec<Result<&T::Leaf>> = (0..self.trees.len())
            .into_par_iter()
            .map(|i| self.regress_tree(i, channels, stride))
            .collect();
        leafs.into_iter().collect()
    }
}
