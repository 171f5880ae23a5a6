/// A class-regression tree for hough forests.
///
/// Every node compares the difference of two pixel values of one feature channel
/// with a threshold. A leaf stores the probability of every label and the offsets
/// to the object centers of the foreground patches that reached it.
///
/// Literature:
/// * https://pages.iai.uni-bonn.de/gall_juergen/download/jgall_houghforest_cvpr09.pdf

use dataset::PatchSet;
use errors::*;
use meancov_estimation::{Vec2, offset_spread};
use rand::Rng;
use serde_json;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use super::predictor::*;
use types::Offset;

/// ln!(x) = ln x if x != 0 and 0 otherwise
macro_rules! ln {
     ($x: expr) => {if $x == 0f64 {0f64} else {$x.ln()} }
}

/// rel!(a,b) = a / b where a and b are forced to be a f64
macro_rules! rel {
    ($x: expr, $y: expr) => {($x as f64) / ($y as f64)}
}

/// Number of random tests tried for every node
pub const TESTS_PER_NODE: usize = 100;
/// Number of random thresholds tried for every test
pub const THRESHOLDS_PER_TEST: usize = 10;

/// In a hough forest a node is made up of two pixel positions within a channel and a
/// threshold. If the difference of both pixel values is lower than the threshold
/// the left child will be used, otherwise the right one.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct NodeParam {
    channel: usize,
    p1: [u32; 2],
    p2: [u32; 2],
    threshold: f32,
}

impl NodeParam {
    #[inline]
    fn value(&self, channels: &[&[f32]], stride: usize) -> f32 {
        let c = channels[self.channel];
        let i1 = self.p1[1] as usize * stride + self.p1[0] as usize;
        let i2 = self.p2[1] as usize * stride + self.p2[0] as usize;
        c[i1] - c[i2]
    }

    #[inline]
    fn goes_left(&self, channels: &[&[f32]], stride: usize) -> bool {
        self.value(channels, stride) < self.threshold
    }
}

/// A leaf is made up of the probability of every label and of the
/// relative coordinates (=offsets) of the object center for every foreground label.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LeafParam {
    pub probs: Vec<f32>,
    pub offsets: Vec<Vec<Offset>>,
}

impl HoughLeaf for LeafParam {
    fn probability(&self, label: usize) -> f32 {
        self.probs.get(label).cloned().unwrap_or(0.0)
    }

    fn offsets(&self, label: usize) -> &[Offset] {
        match self.offsets.get(label) {
            Some(o) => o,
            None => &[],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
enum Node {
    Split {
        param: NodeParam,
        left: usize,
        right: usize,
    },
    Leaf(usize),
}

/// What a node split should optimize
#[derive(Debug, Clone, Copy, PartialEq)]
enum Measure {
    /// purity of the labels
    Class,
    /// agreement of the offsets
    Offset,
}

/// A training sample: index of the patch within the dataset and its label
type Sample = (usize, usize);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClassRegressionTree {
    config: TreeConfig,
    class_remap: Vec<usize>,
    scale: f32,
    mode: TrainingMode,
    patch_width: u32,
    patch_height: u32,
    channel_count: usize,
    nodes: Vec<Node>,
    leafs: Vec<LeafParam>,
    #[serde(skip)]
    hierarchy: Option<Vec<HierarchyNode>>,
}

/// Entropy (natural logarithm) of a label histogram
fn entropy(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    -counts.iter()
        .map(|&c| {
            let p = rel!(c, total);
            p * ln!(p)
        })
        .sum::<f64>()
}

/// Information gain of splitting the histogram `left + right` into `left` and `right`
fn information_gain(left: &[usize], right: &[usize]) -> f64 {
    let parent: Vec<usize> = left.iter().zip(right.iter()).map(|(a, b)| a + b).collect();
    let nl: usize = left.iter().sum();
    let nr: usize = right.iter().sum();
    let n = nl + nr;
    if n == 0 {
        return 0.0;
    }
    entropy(&parent) - rel!(nl, n) * entropy(left) - rel!(nr, n) * entropy(right)
}

/// Merges every foreground label of a histogram into one
fn binarize(counts: &[usize]) -> [usize; 2] {
    let fg: usize = counts.iter().skip(1).sum();
    [counts.first().cloned().unwrap_or(0), fg]
}

impl ClassRegressionTree {
    /// Label of a patch with the class id `class_id`
    fn label_of(&self, class_id: usize) -> Result<usize> {
        match self.class_remap.iter().position(|&c| c == class_id) {
            Some(l) if self.mode == TrainingMode::PositiveVsBackground => Ok(if l > 0 { 1 } else { 0 }),
            Some(l) => Ok(l),
            None => Err(ErrorKind::UnknownClass(class_id).into()),
        }
    }

    fn label_count(&self) -> usize {
        match self.mode {
            TrainingMode::PositiveVsBackground if self.class_remap.len() > 2 => 2,
            _ => self.class_remap.len(),
        }
    }

    /// Stop training if size of elements is too low, the depth is too high or
    /// (if allowed) the node is already pure.
    fn early_stop(&self, depth: usize, set: &[Sample]) -> bool {
        if depth >= self.config.max_depth || set.len() < self.config.min_samples || set.len() < 2 {
            return true;
        }
        if self.config.skip {
            let first = set[0].1;
            if set.iter().all(|&(_, l)| l == first) {
                return true;
            }
        }
        false
    }

    fn make_leaf(&mut self, data: &PatchSet, set: &[Sample]) -> usize {
        let labels = self.label_count();
        let mut counts = vec![0usize; labels];
        let mut offsets = vec![vec![]; labels];
        for &(idx, label) in set.iter() {
            counts[label] += 1;
            if label > 0 {
                if let Some(o) = data.patches()[idx].offset {
                    offsets[label].push(o);
                }
            }
        }
        let probs = counts.iter()
            .map(|&c| if set.is_empty() { 0.0 } else { rel!(c, set.len()) as f32 })
            .collect();
        self.leafs.push(LeafParam {
            probs: probs,
            offsets: offsets,
        });
        self.leafs.len() - 1
    }

    /// Quality of a split. Larger is better.
    fn split_gain(&self,
                  measure: Measure,
                  data: &PatchSet,
                  set: &[Sample],
                  values: &[f32],
                  threshold: f32)
                  -> f64 {
        match measure {
            Measure::Class => {
                let labels = self.label_count();
                let mut left = vec![0usize; labels];
                let mut right = vec![0usize; labels];
                for (&(_, label), &v) in set.iter().zip(values.iter()) {
                    if v < threshold {
                        left[label] += 1;
                    } else {
                        right[label] += 1;
                    }
                }
                match self.mode {
                    TrainingMode::MultiClass |
                    TrainingMode::PositiveVsBackground => information_gain(&left, &right),
                    TrainingMode::PositiveMultiClass => {
                        information_gain(&left, &right) / labels as f64 +
                        information_gain(&binarize(&left), &binarize(&right))
                    }
                }
            }
            Measure::Offset => {
                // Sum of the squared distances to the mean offset of every label (and side)
                let labels = self.label_count();
                let mut left: Vec<Vec<Vec2>> = vec![vec![]; labels];
                let mut right: Vec<Vec<Vec2>> = vec![vec![]; labels];
                for (&(idx, label), &v) in set.iter().zip(values.iter()) {
                    if label == 0 {
                        continue;
                    }
                    if let Some(o) = data.patches()[idx].offset {
                        let o = Vec2::new([o[0] as f64, o[1] as f64]);
                        if v < threshold {
                            left[label].push(o);
                        } else {
                            right[label].push(o);
                        }
                    }
                }
                let spread: f64 = left.iter()
                    .chain(right.iter())
                    .map(|o| offset_spread(o))
                    .sum();
                -spread
            }
        }
    }

    /// Generates random tests and returns the best one together with the partition of `set`.
    fn best_split<R: Rng>(&self,
                          data: &PatchSet,
                          set: &[Sample],
                          rng: &mut R)
                          -> Option<(NodeParam, Vec<Sample>, Vec<Sample>)> {
        let has_foreground = set.iter().any(|&(_, l)| l > 0);
        let measure = if has_foreground && rng.gen::<bool>() {
            Measure::Offset
        } else {
            Measure::Class
        };
        let w = self.patch_width;
        let h = self.patch_height;
        let mut values = vec![0f32; set.len()];
        let mut best: Option<(f64, NodeParam)> = None;

        for _ in 0..TESTS_PER_NODE {
            let channel = rng.gen_range(0, self.channel_count);
            let p1 = [rng.gen_range(0, w), rng.gen_range(0, h)];
            let p2 = [rng.gen_range(0, w), rng.gen_range(0, h)];
            let i1 = (p1[1] * w + p1[0]) as usize;
            let i2 = (p2[1] * w + p2[0]) as usize;
            for (v, &(idx, _)) in values.iter_mut().zip(set.iter()) {
                let patch = &data.patches()[idx];
                *v = patch.value(channel, i1) - patch.value(channel, i2);
            }
            let min = values.iter().cloned().fold(::std::f32::INFINITY, f32::min);
            let max = values.iter().cloned().fold(::std::f32::NEG_INFINITY, f32::max);
            if !(max > min) {
                // this test cannot separate anything
                continue;
            }
            for _ in 0..THRESHOLDS_PER_TEST {
                let threshold = rng.gen_range(min, max);
                // both children need patches
                if !(threshold > min) {
                    continue;
                }
                let gain = self.split_gain(measure, data, set, &values, threshold);
                let better = match best {
                    Some((g, _)) => gain > g,
                    None => true,
                };
                if better {
                    best = Some((gain,
                                 NodeParam {
                        channel: channel,
                        p1: p1,
                        p2: p2,
                        threshold: threshold,
                    }));
                }
            }
        }

        best.map(|(_, param)| {
            let (left, right): (Vec<Sample>, Vec<Sample>) = set.iter().partition(|&&(idx, _)| {
                let patch = &data.patches()[idx];
                let i1 = (param.p1[1] * w + param.p1[0]) as usize;
                let i2 = (param.p2[1] * w + param.p2[0]) as usize;
                patch.value(param.channel, i1) - patch.value(param.channel, i2) < param.threshold
            });
            (param, left, right)
        })
    }

    /// Grows the subtree for `set` and returns the index of its root node.
    fn grow_node<R: Rng>(&mut self,
                         data: &PatchSet,
                         set: Vec<Sample>,
                         depth: usize,
                         rng: &mut R)
                         -> usize {
        let node = self.nodes.len();
        self.nodes.push(Node::Leaf(0));
        let split = if self.early_stop(depth, &set) {
            None
        } else {
            self.best_split(data, &set, rng)
        };
        match split {
            Some((param, left, right)) => {
                let l = self.grow_node(data, left, depth + 1, rng);
                let r = self.grow_node(data, right, depth + 1, rng);
                self.nodes[node] = Node::Split {
                    param: param,
                    left: l,
                    right: r,
                };
            }
            None => {
                let leaf = self.make_leaf(data, &set);
                self.nodes[node] = Node::Leaf(leaf);
            }
        }
        node
    }

    /// Checks the structure of a loaded tree, so `regress` cannot fail.
    fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            bail!(ErrorKind::InvalidTree("tree has no nodes".to_string()));
        }
        if self.patch_width == 0 || self.patch_height == 0 || self.channel_count == 0 {
            bail!(ErrorKind::InvalidTree("tree has an empty patch geometry".to_string()));
        }
        let labels = self.label_count();
        for (i, node) in self.nodes.iter().enumerate() {
            match *node {
                Node::Leaf(l) => {
                    let leaf = match self.leafs.get(l) {
                        Some(leaf) => leaf,
                        None => bail!(ErrorKind::InvalidTree(format!("node {} points to a missing leaf", i))),
                    };
                    if leaf.probs.len() != labels || leaf.offsets.len() != labels {
                        bail!(ErrorKind::InvalidTree(format!("leaf {} does not have {} labels", l, labels)));
                    }
                }
                Node::Split { ref param, left, right } => {
                    // children always follow their parent
                    if left <= i || right <= i || left >= self.nodes.len() ||
                       right >= self.nodes.len() {
                        bail!(ErrorKind::InvalidTree(format!("node {} has invalid children", i)));
                    }
                    if param.channel >= self.channel_count || param.p1[0] >= self.patch_width ||
                       param.p2[0] >= self.patch_width ||
                       param.p1[1] >= self.patch_height ||
                       param.p2[1] >= self.patch_height {
                        bail!(ErrorKind::InvalidTree(format!("node {} tests outside of the patch", i)));
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of nodes (splits and leafs)
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn training_mode(&self) -> TrainingMode {
        self.mode
    }
}

impl TreePredictor for ClassRegressionTree {
    type Leaf = LeafParam;

    fn new(config: TreeConfig) -> ClassRegressionTree {
        ClassRegressionTree {
            config: config,
            class_remap: vec![],
            scale: 1.0,
            mode: TrainingMode::default(),
            patch_width: 0,
            patch_height: 0,
            channel_count: 0,
            nodes: vec![],
            leafs: vec![],
            hierarchy: None,
        }
    }

    fn set_class_remap(&mut self, remap: &[usize]) {
        self.class_remap = remap.to_vec();
    }

    fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    fn scale(&self) -> f32 {
        self.scale
    }

    fn set_training_mode(&mut self, mode: TrainingMode) {
        self.mode = mode;
    }

    fn grow<R: Rng>(&mut self, data: &PatchSet, samples: usize, rng: &mut R) -> Result<()> {
        if data.is_empty() || samples == 0 {
            return Err(ErrorKind::EmptyTrainingSet.into());
        }
        if self.class_remap.len() < 2 {
            bail!("the class remap table needs the background and at least one object class");
        }
        let mut set = vec![];
        for idx in data.sample(samples, rng) {
            let label = self.label_of(data.patches()[idx].class_id)?;
            set.push((idx, label));
        }
        self.patch_width = data.width();
        self.patch_height = data.height();
        self.channel_count = data.channel_count();
        self.nodes.clear();
        self.leafs.clear();
        self.grow_node(data, set, 0, rng);
        debug!("Grown tree with {} nodes and {} leafs",
               self.nodes.len(),
               self.leafs.len());
        Ok(())
    }

    fn regress(&self, channels: &[&[f32]], stride: usize) -> Option<&LeafParam> {
        if self.nodes.is_empty() || channels.len() < self.channel_count ||
           stride < self.patch_width as usize {
            return None;
        }
        // last pixel of the patch has to be inside of every channel
        let extent = (self.patch_height as usize - 1) * stride + self.patch_width as usize;
        if channels[..self.channel_count].iter().any(|c| c.len() < extent) {
            return None;
        }
        let mut node = 0;
        loop {
            match self.nodes[node] {
                Node::Leaf(l) => return self.leafs.get(l),
                Node::Split { ref param, left, right } => {
                    node = if param.goes_left(channels, stride) {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    fn load(path: &Path) -> Result<ClassRegressionTree> {
        let file = File::open(path)?;
        let tree: ClassRegressionTree = serde_json::from_reader(BufReader::new(file))?;
        tree.validate()?;
        Ok(tree)
    }

    fn depth(&self) -> usize {
        self.config.max_depth
    }

    fn patch_size(&self) -> (u32, u32) {
        (self.patch_width, self.patch_height)
    }

    fn num_labels(&self) -> usize {
        self.label_count()
    }

    fn class_ids(&self) -> Vec<usize> {
        self.class_remap.clone()
    }

    fn hierarchy(&self) -> Option<&[HierarchyNode]> {
        self.hierarchy.as_ref().map(|h| &h[..])
    }

    fn load_hierarchy(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path)?;
        let hierarchy: Vec<HierarchyNode> = serde_json::from_reader(BufReader::new(file))?;
        let labels = self.label_count();
        for node in hierarchy.iter() {
            if let Some(&s) = node.subclasses.iter().find(|&&s| s >= labels) {
                bail!(ErrorKind::InvalidHierarchy(format!("node {} refers to label {} but the tree has {} labels",
                                                          node.id,
                                                          s,
                                                          labels)));
            }
            let known = |id: usize| hierarchy.iter().any(|n| n.id == id);
            if node.parent.map_or(false, |p| !known(p)) || node.children.iter().any(|&c| !known(c)) {
                bail!(ErrorKind::InvalidHierarchy(format!("node {} refers to an unknown node", node.id)));
            }
        }
        self.hierarchy = Some(hierarchy);
        Ok(())
    }
}
