use std::collections::VecDeque;
use std::iter::FromIterator;

use ndarray::parallel::prelude::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

use crate::{Metric, Scalar};

/// Query result containing k-nearest neighbours to a query point.
#[derive(Clone, Debug, Default)]
pub struct QueryResult {
    query_index: usize,
    neighbours: VecDeque<Neighbour>,
}

impl QueryResult {
    pub(crate) fn new(index: usize, neighbours: VecDeque<Neighbour>) -> Self {
        Self {
            query_index: index,
            neighbours,
        }
    }

    /// Returns the query index from batch query for this result.
    pub fn index(&self) -> usize {
        self.query_index
    }

    /// Returns the nearest neighbours of a query, closest first.
    pub fn neighbours(&self) -> &VecDeque<Neighbour> {
        &self.neighbours
    }

    /// Consumes ```self``` and returns the query index and the nearest neighbours of that query.
    pub fn take(self) -> (usize, VecDeque<Neighbour>) {
        (self.query_index, self.neighbours)
    }
}

/// A neighbour resulted from a k-nearest neighbour search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbour {
    idx: usize,
    dist: Scalar,
}

impl Neighbour {
    pub(crate) fn new(idx: usize, dist: Scalar) -> Self {
        Self { idx, dist }
    }

    /// Returns the index of a neighbour.
    pub fn index(&self) -> usize {
        self.idx
    }

    /// Returns the distance for a neighbour to a query point.
    pub fn dist(&self) -> Scalar {
        self.dist
    }

    /// Orders by distance, then by index so that ties resolve identically on every run.
    #[inline]
    fn precedes(&self, other: &Neighbour) -> bool {
        self.dist < other.dist || (self.dist == other.dist && self.idx < other.idx)
    }
}

/// Distance the tree is built and pruned with.
#[inline(always)]
fn tree_distance(metric: Metric, a: ArrayView1<'_, Scalar>, b: ArrayView1<'_, Scalar>) -> Scalar {
    match metric {
        Metric::Angular => (2. * metric.distance(a, b)).sqrt(),
        _ => metric.distance(a, b),
    }
}

/// Keeps `result` sorted and at most `k` long.
#[inline]
pub(crate) fn offer(result: &mut Vec<Neighbour>, candidate: Neighbour, k: usize) {
    if k == 0 {
        return;
    }

    if result.len() == k {
        match result.last() {
            Some(last) if candidate.precedes(last) => {
                result.pop();
            }
            _ => return,
        }
    }

    let pos = result.partition_point(|n| n.precedes(&candidate));
    result.insert(pos, candidate);
}

#[derive(Clone, Debug)]
struct Node {
    level: i32,
    maxdist: Scalar,
    parent: Option<usize>,
    children: Vec<usize>,
}

impl Node {
    fn with_level(level: i32) -> Self {
        Self {
            level,
            maxdist: 0.,
            parent: None,
            children: Vec::with_capacity(8),
        }
    }
}

/// A type of tree data structure which is designed for fast nearest neighbour search in general
/// n-point metric spaces and requires ```O(n)``` space.
///
/// Nodes live in an arena indexed by point identifier. Every node keeps `maxdist`, an upper bound
/// on the distance to any of its descendants, which makes pruned search exact. With
/// [`Metric::Angular`] the tree is organised by the chord length `sqrt(2 (1 - cos))`, which ranks
/// points like the cosine distance but obeys the triangle inequality; reported distances are still
/// `1 - cos`.
#[derive(Clone, Debug)]
pub struct CoverTree {
    base: Scalar,
    metric: Metric,
    initial_level: i32,
    points: Vec<Array1<Scalar>>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl Default for CoverTree {
    /// Creates a default cover tree with ```base = 1.37``` and Euclidean metric.
    fn default() -> Self {
        Self::new(1.37, Metric::Euclidean)
    }
}

impl CoverTree {
    /// Creates a new empty tree with given ```base``` and ```metric```.
    pub fn new(base: Scalar, metric: Metric) -> Self {
        Self {
            base,
            metric,
            initial_level: 0,
            points: Vec::new(),
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Returns the distance function of a tree.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Returns the point stored under identifier `idx`.
    pub fn point(&self, idx: usize) -> ArrayView1<'_, Scalar> {
        self.points[idx].view()
    }

    /// Inserts a new point to a tree. Its identifier is the number of points inserted before it.
    pub fn insert(&mut self, data: Array1<Scalar>) -> usize {
        let id = self.points.len();
        self.points.push(data);
        self.nodes.push(Node::with_level(self.initial_level));
        self.insert_node(id);
        id
    }

    fn insert_node(&mut self, x: usize) {
        let root = match self.root {
            Some(root) => root,
            None => {
                self.root = Some(x);
                return;
            }
        };

        let d_px = self.distance(root, x);
        if d_px <= self.covdist(root) {
            self.add_child(root, x, d_px);
            return;
        }

        let mut root = root;
        let mut d_px = d_px;
        while d_px > self.base * self.covdist(root) {
            match self.remove_leaf(root) {
                Some(leaf) => {
                    // leaf becomes a new root.
                    let d_lr = self.distance(leaf, root);
                    let level = self.nodes[root].level + 1;
                    let maxdist = d_lr + self.nodes[root].maxdist;
                    {
                        let lw = &mut self.nodes[leaf];
                        lw.level = level;
                        lw.maxdist = maxdist;
                        lw.children.push(root);
                        lw.parent = None;
                    }
                    self.nodes[root].parent = Some(leaf);
                    root = leaf;
                }
                None => {
                    self.nodes[root].level += 1;
                }
            }

            d_px = self.distance(root, x);
        }

        let level = self.nodes[root].level + 1;
        let maxdist = d_px + self.nodes[root].maxdist;
        {
            let xw = &mut self.nodes[x];
            xw.level = level;
            xw.maxdist = maxdist;
            xw.children.push(root);
        }
        self.nodes[root].parent = Some(x);
        self.root = Some(x);
    }

    /// Descends from `parent` to the deepest covering node and attaches `child` there.
    fn add_child(&mut self, parent: usize, child: usize, d_pc: Scalar) {
        let mut p = parent;
        let mut d_pc = d_pc;

        loop {
            if d_pc > self.nodes[p].maxdist {
                self.nodes[p].maxdist = d_pc;
            }

            // Duplicates stay flat under their twin instead of forming a chain.
            if d_pc == 0. {
                break;
            }

            let mut next = None;
            for &q in &self.nodes[p].children {
                let d_qx = self.distance(q, child);
                if d_qx <= self.covdist(q) {
                    next = Some((q, d_qx));
                    break;
                }
            }

            match next {
                Some((q, d_qx)) => {
                    p = q;
                    d_pc = d_qx;
                }
                None => break,
            }
        }

        let level = self.nodes[p].level - 1;
        {
            let cw = &mut self.nodes[child];
            cw.level = level;
            cw.parent = Some(p);
        }
        self.nodes[p].children.push(child);
    }

    /// Finds and detaches a leaf below `p`. Returns `None` if `p` itself is a leaf.
    fn remove_leaf(&mut self, p: usize) -> Option<usize> {
        let mut current = p;

        loop {
            let node = &self.nodes[current];
            if node.children.is_empty() {
                return None;
            }

            let leaf_pos = node
                .children
                .iter()
                .position(|&c| self.nodes[c].children.is_empty());

            match leaf_pos {
                Some(pos) => {
                    // Ordering among children are not important. So we use swap_remove for quick remove.
                    let leaf = self.nodes[current].children.swap_remove(pos);
                    self.nodes[leaf].parent = None;
                    return Some(leaf);
                }
                None => current = node.children[0],
            }
        }
    }

    /// Performs the nearest neighbour search for a single query and returns ```k``` neighbours who
    /// are closest to the ```query``` point.
    pub fn search(&self, query: ArrayView1<'_, Scalar>, k: usize) -> QueryResult {
        QueryResult::new(0, VecDeque::from_iter(self.exe_search(query, k)))
    }

    /// Performs the nearest neighbour search for an array of queries and returns ```k``` neighbours who
    /// are closest to the points in the query array.
    pub fn search2(&self, query: ArrayView2<'_, Scalar>, k: usize) -> Vec<QueryResult> {
        query
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(row_idx, q)| {
                QueryResult::new(row_idx, VecDeque::from_iter(self.exe_search(q, k)))
            })
            .collect()
    }

    pub(crate) fn exe_search(&self, query: ArrayView1<'_, Scalar>, k: usize) -> Vec<Neighbour> {
        let mut result = Vec::with_capacity(k + 1);

        if let Some(root) = self.root {
            let dist = tree_distance(self.metric, query, self.points[root].view());
            offer(&mut result, Neighbour::new(root, dist), k);
            self.nn(query, root, k, &mut result);
        }

        if self.metric == Metric::Angular {
            for nb in result.iter_mut() {
                nb.dist = self.metric.distance(query, self.points[nb.idx].view());
            }
            result.sort_by(|a, b| a.dist.total_cmp(&b.dist).then(a.idx.cmp(&b.idx)));
        }

        result
    }

    /// Executes the nearest neighbour search below a parent node.
    fn nn(&self, x: ArrayView1<'_, Scalar>, p: usize, k: usize, result: &mut Vec<Neighbour>) {
        let children = &self.nodes[p].children;
        if children.is_empty() {
            return;
        }

        let mut nn: Vec<Neighbour> = children
            .iter()
            .map(|&c| Neighbour::new(c, tree_distance(self.metric, x, self.points[c].view())))
            .collect();
        nn.sort_by(|a, b| a.dist.total_cmp(&b.dist).then(a.idx.cmp(&b.idx)));

        for child in nn {
            offer(result, child, k);

            let descend = match result.last() {
                Some(kth) if result.len() == k => child.dist - self.nodes[child.idx].maxdist <= kth.dist,
                _ => true,
            };

            if descend {
                self.nn(x, child.idx, k, result);
            }
        }
    }

    #[inline(always)]
    fn covdist(&self, node: usize) -> Scalar {
        self.base.powi(self.nodes[node].level)
    }

    #[inline(always)]
    fn distance(&self, a: usize, b: usize) -> Scalar {
        tree_distance(self.metric, self.points[a].view(), self.points[b].view())
    }

    /// Checks that every `maxdist` bounds the distances to all descendants.
    #[allow(dead_code)]
    pub(crate) fn verify(&self) -> bool {
        let root = match self.root {
            Some(root) => root,
            None => return self.nodes.is_empty(),
        };

        let mut stack = vec![root];
        let mut visited = 0;
        while let Some(p) = stack.pop() {
            visited += 1;
            if self.nodes[p].children.iter().any(|&c| self.nodes[c].parent != Some(p)) {
                return false;
            }

            let mut descendants = self.nodes[p].children.clone();
            while let Some(d) = descendants.pop() {
                if self.distance(p, d) > self.nodes[p].maxdist + 1e-9 {
                    return false;
                }
                descendants.extend_from_slice(&self.nodes[d].children);
            }
            stack.extend_from_slice(&self.nodes[p].children);
        }

        visited == self.nodes.len()
    }

    /// Returns the number of points in a tree.
    pub fn size(&self) -> usize {
        self.points.len()
    }
}

/// A build struct for initialising a new cover tree.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CoverTreeBuilder {
    base: Option<Scalar>,
    metric: Option<Metric>,
    depth: Option<usize>,
}

impl CoverTreeBuilder {
    /// Creates a builder with default parameters.
    pub fn new() -> Self {
        Self {
            ..Default::default()
        }
    }

    /// Sets the ```base``` in exponentiation when calculating the covering distance (or invariant)
    /// of a level.
    pub fn base(mut self, base: Scalar) -> Self {
        self.base = Some(base);
        self
    }

    /// Sets the distance function for a tree.
    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Sets the desired depth of a tree.
    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Constructs a cover tree based on the given data and parameters. Row `i` of `data` gets
    /// identifier `i`.
    pub fn build(self, data: ArrayView2<'_, Scalar>) -> CoverTree {
        let metric = self.metric.unwrap_or(Metric::Euclidean);

        // Find initial level for root.
        let mut max_dist: Scalar = 0.;
        let mut min_dist = Scalar::MAX;
        for ii in 1..data.nrows() {
            let d = tree_distance(metric, data.row(0), data.row(ii));
            if d > max_dist {
                max_dist = d;
            }

            if d > 0. && d < min_dist {
                min_dist = d;
            }
        }

        let base = match (self.base, self.depth) {
            (Some(base), _) if base > 1. => base,
            (_, Some(depth)) if depth > 0 && max_dist > 0. && min_dist < Scalar::MAX => {
                let base = (2 as Scalar).powf((max_dist / min_dist).log2() / depth as Scalar);
                if base.is_finite() && base > 1. {
                    base
                } else {
                    1.37
                }
            }
            _ => 1.37,
        };

        let mut ct = CoverTree::new(base, metric);
        if max_dist > 0. {
            ct.initial_level = Scalar::log(max_dist, base).ceil() as i32;
        }

        ct.points.reserve(data.nrows());
        ct.nodes.reserve(data.nrows());
        for row in data.outer_iter() {
            ct.insert(row.to_owned());
        }

        ct
    }
}
