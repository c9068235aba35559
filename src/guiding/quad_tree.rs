use glam::Vec2;
use image::{Rgb, RgbImage};
use ordered_float::OrderedFloat;

use crate::guiding::direction_map::in_canonical;

/// Refinement never subdivides below this depth, whatever the threshold.
const MAX_DEPTH: u32 = 20;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct NodeId(u32);

impl NodeId {
    const ROOT: NodeId = NodeId(0);

    fn idx(self) -> usize {
        self.0 as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Node {
    Leaf { sum: f32, count: u32 },
    Interior { children: [NodeId; 4] },
}

impl Node {
    const EMPTY: Node = Node::Leaf { sum: 0.0, count: 0 };
}

fn mean(sum: f32, count: u32) -> f32 {
    match count {
        0 => 0.0,
        n => sum / n as f32,
    }
}

/// Selects the quadrant containing `p` and remaps `p` into that quadrant's
/// local `[0,1]²`. Bit 0 of the index is the x half, bit 1 the y half.
fn child_index(p: &mut Vec2) -> usize {
    let upper = p.cmpge(Vec2::splat(0.5));
    *p = *p * 2.0 - Vec2::select(upper, Vec2::ONE, Vec2::ZERO);
    upper.bitmask() as usize
}

fn child_offset(index: usize) -> Vec2 {
    Vec2::new((index & 1) as f32, (index >> 1) as f32)
}

/// A leaf region of the canonical square together with the mean of the
/// samples recorded in it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QuadLeaf {
    pub low: Vec2,
    pub extent: f32,
    pub value: f32,
}

impl QuadLeaf {
    pub fn area(&self) -> f32 {
        self.extent * self.extent
    }
}

/// Adaptive quadtree over `[0,1]²` approximating a non-negative function by
/// the per-leaf mean of recorded samples.
///
/// Nodes live in a flat arena; a collapse during [`QuadTree::refine`] leaves
/// the old children unreachable until the next copy compacts the arena.
#[derive(Clone, Debug)]
pub struct QuadTree {
    nodes: Vec<Node>,
}

impl Default for QuadTree {
    fn default() -> Self {
        Self::new()
    }
}

impl QuadTree {
    /// A root split once into four empty leaves.
    pub fn new() -> Self {
        let mut nodes = vec![Node::Interior {
            children: [NodeId(1), NodeId(2), NodeId(3), NodeId(4)],
        }];
        nodes.extend([Node::EMPTY; 4]);
        QuadTree { nodes }
    }

    fn find_leaf(&self, mut p: Vec2) -> (NodeId, f32) {
        let mut node = NodeId::ROOT;
        let mut area = 1.0;
        while let Node::Interior { children } = self.nodes[node.idx()] {
            node = children[child_index(&mut p)];
            area *= 0.25;
        }
        (node, area)
    }

    pub fn record(&mut self, p: Vec2, value: f32) {
        debug_assert!(in_canonical(p), "{p} is outside the canonical square");
        let (leaf, _) = self.find_leaf(p);
        if let Node::Leaf { sum, count } = &mut self.nodes[leaf.idx()] {
            *sum += value;
            *count += 1;
        }
    }

    pub fn total_integral(&self) -> f32 {
        self.node_integral(NodeId::ROOT, 1.0)
    }

    fn node_integral(&self, node: NodeId, area: f32) -> f32 {
        match self.nodes[node.idx()] {
            Node::Leaf { sum, count } => area * mean(sum, count),
            Node::Interior { children } => children
                .iter()
                .map(|&child| self.node_integral(child, area * 0.25))
                .sum(),
        }
    }

    /// Splits leaves whose integral exceeds `threshold` and collapses interior
    /// nodes whose children together integrate to at most `threshold`.
    pub fn refine(&mut self, threshold: f32) {
        self.refine_node(NodeId::ROOT, 1.0, threshold, 0);
    }

    fn refine_node(&mut self, node: NodeId, area: f32, threshold: f32, depth: u32) -> f32 {
        let children = match self.nodes[node.idx()] {
            Node::Leaf { sum, count } => {
                return self.refine_leaf(node, sum, count, area, threshold, depth);
            }
            Node::Interior { children } => children,
        };

        let integral: f32 = children
            .iter()
            .map(|&child| self.refine_node(child, area * 0.25, threshold, depth + 1))
            .sum();

        if integral <= threshold {
            let mut count = 0;
            for child in children {
                match self.nodes[child.idx()] {
                    Node::Leaf { count: n, .. } => count += n,
                    Node::Interior { .. } => return integral,
                }
            }
            // the merged mean must reproduce the measured integral, so the sum
            // is rescaled rather than accumulated from the children
            let sum = integral * count as f32 / area;
            self.nodes[node.idx()] = Node::Leaf { sum, count };
        }

        integral
    }

    fn refine_leaf(
        &mut self,
        node: NodeId,
        sum: f32,
        count: u32,
        area: f32,
        threshold: f32,
        depth: u32,
    ) -> f32 {
        let integral = area * mean(sum, count);
        if integral <= threshold || depth >= MAX_DEPTH {
            return integral;
        }

        let first = self.nodes.len() as u32;
        let children = [0, 1, 2, 3].map(|i| NodeId(first + i));
        self.nodes.extend([Node::Leaf { sum, count }; 4]);
        self.nodes[node.idx()] = Node::Interior { children };

        for child in children {
            self.refine_leaf(child, sum, count, area * 0.25, threshold, depth + 1);
        }

        integral
    }

    /// Replaces this tree with the shape of `other`, all leaves zeroed.
    pub fn copy_structure_from(&mut self, other: &QuadTree) {
        let mut nodes = Vec::with_capacity(other.nodes.len());
        other.copy_node(NodeId::ROOT, &mut nodes, false);
        self.nodes = nodes;
    }

    /// Replaces this tree with a compacted copy of `other`, statistics included.
    pub fn copy_from(&mut self, other: &QuadTree) {
        let mut nodes = Vec::with_capacity(other.nodes.len());
        other.copy_node(NodeId::ROOT, &mut nodes, true);
        self.nodes = nodes;
    }

    fn copy_node(&self, node: NodeId, nodes: &mut Vec<Node>, keep_stats: bool) -> NodeId {
        let id = NodeId(nodes.len() as u32);
        nodes.push(Node::EMPTY);

        let copy = match self.nodes[node.idx()] {
            Node::Leaf { sum, count } if keep_stats => Node::Leaf { sum, count },
            Node::Leaf { .. } => Node::EMPTY,
            Node::Interior { children } => Node::Interior {
                children: children.map(|child| self.copy_node(child, nodes, keep_stats)),
            },
        };
        nodes[id.idx()] = copy;

        id
    }

    /// Area and mean value of the leaf containing `p`.
    pub fn leaf_area_and_value(&self, p: Vec2) -> (f32, f32) {
        let (leaf, area) = self.find_leaf(p);
        match self.nodes[leaf.idx()] {
            Node::Leaf { sum, count } => (area, mean(sum, count)),
            Node::Interior { .. } => (area, 0.0),
        }
    }

    /// All leaf regions in depth-first order.
    pub fn leaves(&self) -> Vec<QuadLeaf> {
        let mut leaves = vec![];
        self.collect_leaves(NodeId::ROOT, Vec2::ZERO, 1.0, &mut leaves);
        leaves
    }

    fn collect_leaves(&self, node: NodeId, low: Vec2, extent: f32, out: &mut Vec<QuadLeaf>) {
        match self.nodes[node.idx()] {
            Node::Leaf { sum, count } => out.push(QuadLeaf {
                low,
                extent,
                value: mean(sum, count),
            }),
            Node::Interior { children } => {
                let half = extent * 0.5;
                for (i, child) in children.into_iter().enumerate() {
                    self.collect_leaves(child, low + child_offset(i) * half, half, out);
                }
            }
        }
    }

    /// Nodes reachable from the root.
    pub fn node_count(&self) -> usize {
        fn count(tree: &QuadTree, node: NodeId) -> usize {
            match tree.nodes[node.idx()] {
                Node::Leaf { .. } => 1,
                Node::Interior { children } => {
                    1 + children.iter().map(|&c| count(tree, c)).sum::<usize>()
                }
            }
        }
        count(self, NodeId::ROOT)
    }

    pub fn depth(&self) -> u32 {
        fn height(tree: &QuadTree, node: NodeId) -> u32 {
            match tree.nodes[node.idx()] {
                Node::Leaf { .. } => 0,
                Node::Interior { children } => {
                    1 + children.iter().map(|&c| height(tree, c)).max().unwrap_or(0)
                }
            }
        }
        height(self, NodeId::ROOT)
    }

    /// Rasterizes the learned density at the finest resolution of the tree
    /// (capped at 1024 pixels), scaled so the brightest leaf is white.
    pub fn to_image(&self) -> RgbImage {
        let resolution = 1u32 << self.depth().min(10);

        let density: Vec<f32> = (0..resolution * resolution)
            .map(|i| {
                let (x, y) = (i % resolution, i / resolution);
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5) / resolution as f32;
                self.leaf_area_and_value(p).1
            })
            .collect();

        let max = density
            .iter()
            .copied()
            .max_by_key(|&x| OrderedFloat(x))
            .unwrap_or(0.0);
        let scale = if max > 0.0 { 255.0 / max } else { 0.0 };

        RgbImage::from_fn(resolution, resolution, |x, y| {
            Rgb([(density[(y * resolution + x) as usize] * scale) as u8; 3])
        })
    }
}
