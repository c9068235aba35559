use std::sync::Arc;

use glam::Vec3;

use crate::bounds::Bounds;
use crate::guiding::direction::{DirectionSampler, DirectionTrainer};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct NodeId(u32);

impl NodeId {
    const ROOT: NodeId = NodeId(0);

    fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Node of a k-d partition of the world bound. The payload type differs
/// between the training tree and the published sampler snapshot.
#[derive(Clone, Debug)]
enum SpatialNode<L> {
    Leaf(L),
    Interior {
        children: [NodeId; 2],
        axis: usize,
        split: f32,
    },
}

fn locate<L>(nodes: &[SpatialNode<L>], pos: Vec3) -> NodeId {
    let mut node = NodeId::ROOT;
    while let SpatialNode::Interior {
        children,
        axis,
        split,
    } = nodes[node.idx()]
    {
        node = children[(pos[axis] >= split) as usize];
    }
    node
}

#[derive(Clone, Debug, Default)]
struct TrainingLeaf {
    record_count: u32,
    trainer: DirectionTrainer,
    sampler: Option<Arc<DirectionSampler>>,
}

/// Summary of one training iteration over the spatial tree.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IterationStats {
    /// Leaves after the iteration.
    pub leaves: usize,
    /// Leaves split during the iteration.
    pub splits: usize,
    /// Records accumulated by all leaves since the previous iteration.
    pub records: u64,
    /// Directional quadtree nodes summed over all leaves after the iteration.
    pub quad_nodes: usize,
}

/// Spatial half of the SD-tree: a binary partition of a fixed world bound
/// with one directional trainer/sampler pair per leaf.
#[derive(Debug)]
pub struct SpatialTree {
    nodes: Vec<SpatialNode<TrainingLeaf>>,
    bounds: Bounds,
}

impl SpatialTree {
    pub fn new(bounds: Bounds) -> Self {
        SpatialTree {
            nodes: vec![SpatialNode::Leaf(TrainingLeaf::default())],
            bounds,
        }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    fn leaves_mut(&mut self) -> impl Iterator<Item = &mut TrainingLeaf> {
        self.nodes.iter_mut().filter_map(|node| match node {
            SpatialNode::Leaf(leaf) => Some(leaf),
            SpatialNode::Interior { .. } => None,
        })
    }

    fn leaves(&self) -> impl Iterator<Item = &TrainingLeaf> {
        self.nodes.iter().filter_map(|node| match node {
            SpatialNode::Leaf(leaf) => Some(leaf),
            SpatialNode::Interior { .. } => None,
        })
    }

    pub fn record(&mut self, pos: Vec3, dir: Vec3, value: f32) {
        if !(value >= 0.0 && value.is_finite()) {
            log::trace!("ignoring record with value {value} at {pos}");
            return;
        }
        debug_assert!(
            self.bounds.contains(pos),
            "{pos} is outside the guided volume {:?}",
            self.bounds
        );

        let id = locate(&self.nodes, pos);
        if let SpatialNode::Leaf(leaf) = &mut self.nodes[id.idx()] {
            leaf.trainer.record(dir, value);
            leaf.record_count = leaf.record_count.saturating_add(1);
        }
    }

    /// The sampler of the leaf containing `pos`, if that leaf has completed a
    /// training iteration.
    pub fn direction_sampler(&self, pos: Vec3) -> Option<&Arc<DirectionSampler>> {
        match &self.nodes[locate(&self.nodes, pos).idx()] {
            SpatialNode::Leaf(leaf) => leaf.sampler.as_ref(),
            SpatialNode::Interior { .. } => None,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }

    /// Record counts of every leaf with its region, in depth-first order.
    pub fn leaf_record_counts(&self) -> Vec<(Bounds, u32)> {
        let mut out = vec![];
        self.collect_counts(NodeId::ROOT, self.bounds, &mut out);
        out
    }

    fn collect_counts(&self, node: NodeId, bounds: Bounds, out: &mut Vec<(Bounds, u32)>) {
        match &self.nodes[node.idx()] {
            SpatialNode::Leaf(leaf) => out.push((bounds, leaf.record_count)),
            &SpatialNode::Interior { children, axis, .. } => {
                let (_, low, high) = bounds.split(axis);
                self.collect_counts(children[0], low, out);
                self.collect_counts(children[1], high, out);
            }
        }
    }

    /// Ends a training round: every leaf harvests a refined sampler, leaves
    /// with more than `record_count_threshold` records are split, and all
    /// record counts restart from zero.
    pub fn iterate(&mut self, rho: f32, record_count_threshold: u32) -> IterationStats {
        let records = self.total_records();
        for leaf in self.leaves_mut() {
            leaf.sampler = Some(leaf.trainer.iterate(rho));
        }

        let splits = self.split_leaves(record_count_threshold);
        self.reset_record_counts();

        IterationStats {
            leaves: self.leaf_count(),
            splits,
            records,
            quad_nodes: self.quad_node_count(),
        }
    }

    /// Ends the final training round. Samplers are harvested without any
    /// refinement and the structure is left untouched.
    pub fn iterate_end(&mut self) -> IterationStats {
        let records = self.total_records();
        for leaf in self.leaves_mut() {
            leaf.sampler = Some(leaf.trainer.harvest());
        }
        self.reset_record_counts();

        IterationStats {
            leaves: self.leaf_count(),
            splits: 0,
            records,
            quad_nodes: self.quad_node_count(),
        }
    }

    fn quad_node_count(&self) -> usize {
        self.leaves()
            .map(|leaf| leaf.trainer.tree().node_count())
            .sum()
    }

    fn total_records(&self) -> u64 {
        self.leaves().map(|leaf| leaf.record_count as u64).sum()
    }

    fn reset_record_counts(&mut self) {
        for leaf in self.leaves_mut() {
            leaf.record_count = 0;
        }
    }

    pub(crate) fn split_leaves(&mut self, threshold: u32) -> usize {
        self.split_node(NodeId::ROOT, self.bounds, 0, threshold)
    }

    fn split_node(&mut self, node: NodeId, bounds: Bounds, axis: usize, threshold: u32) -> usize {
        let next_axis = (axis + 1) % 3;
        let (split, low, high) = bounds.split(axis);

        let leaf = match &mut self.nodes[node.idx()] {
            SpatialNode::Interior { children, .. } => {
                let children = *children;
                return self.split_node(children[0], low, next_axis, threshold)
                    + self.split_node(children[1], high, next_axis, threshold);
            }
            SpatialNode::Leaf(leaf) if leaf.record_count > threshold => std::mem::take(leaf),
            SpatialNode::Leaf(_) => return 0,
        };

        let first = self.nodes.len() as u32;
        let children = [NodeId(first), NodeId(first + 1)];
        self.nodes[node.idx()] = SpatialNode::Interior {
            children,
            axis,
            split,
        };

        let record_count = leaf.record_count / 2;
        let twin = TrainingLeaf {
            record_count,
            trainer: leaf.trainer.clone(),
            sampler: leaf.sampler.clone(),
        };
        self.nodes.push(SpatialNode::Leaf(twin));
        self.nodes.push(SpatialNode::Leaf(TrainingLeaf {
            record_count,
            ..leaf
        }));

        1 + self.split_node(children[0], low, next_axis, threshold)
            + self.split_node(children[1], high, next_axis, threshold)
    }

    /// Immutable copy of the partition holding the current samplers.
    pub fn sampler_index(&self) -> SamplerIndex {
        SamplerIndex {
            nodes: self
                .nodes
                .iter()
                .map(|node| match node {
                    SpatialNode::Leaf(leaf) => SpatialNode::Leaf(leaf.sampler.clone()),
                    &SpatialNode::Interior {
                        children,
                        axis,
                        split,
                    } => SpatialNode::Interior {
                        children,
                        axis,
                        split,
                    },
                })
                .collect(),
        }
    }
}

/// Read-only snapshot of the spatial partition and its samplers, published
/// after every training iteration.
#[derive(Clone, Debug)]
pub struct SamplerIndex {
    nodes: Vec<SpatialNode<Option<Arc<DirectionSampler>>>>,
}

impl SamplerIndex {
    pub fn sampler(&self, pos: Vec3) -> Option<&Arc<DirectionSampler>> {
        match &self.nodes[locate(&self.nodes, pos).idx()] {
            SpatialNode::Leaf(sampler) => sampler.as_ref(),
            SpatialNode::Interior { .. } => None,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, SpatialNode::Leaf(_)))
            .count()
    }
}
