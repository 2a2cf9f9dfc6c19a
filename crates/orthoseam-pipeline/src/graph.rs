//! Skeleton adjacency graphs.
//!
//! [`SkeletonGraph`] holds one node per skeleton pixel in a petgraph
//! arena (integer node ids, no pointers). [`Contracted`] is a derived
//! view where every chain of degree-2 pixels between two junctions or
//! leaves is a single weighted edge; cycle removal, pruning, and
//! terminal scoring work on that view.

use std::collections::{HashMap, HashSet, VecDeque};

use image::GrayImage;
use petgraph::algo::dijkstra;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableUnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::{EdgeRef, NodeIndexable};

use crate::morphology::FloatImage;
use crate::types::{PixelCoord, Point, SeamError};

/// Pixel adjacency graph over the set pixels of a skeleton mask.
///
/// Orthogonal neighbours are joined with weight 1. Diagonal neighbours
/// are joined with weight `sqrt(2)` only when they share no set
/// orthogonal neighbour, so a staircase does not form triangles.
#[derive(Debug, Clone, Default)]
pub struct SkeletonGraph {
    graph: StableUnGraph<PixelCoord, f64>,
}

/// A contracted-graph node: a junction, leaf, or ring anchor pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Junction {
    /// Pixel position.
    pub pixel: PixelCoord,
    /// Matching node in the pixel graph.
    pub source: NodeIndex,
}

/// A contracted-graph edge: a run of pixel links between two junctions.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    /// Path length in pixels.
    pub weight: f64,
    /// Pixel-graph edges making up the run (empty for synthetic edges).
    links: Vec<EdgeIndex>,
    /// The run is a closed ring with no junction on it.
    ring: bool,
}

impl Chain {
    fn synthetic(weight: f64) -> Self {
        Self {
            weight,
            links: Vec::new(),
            ring: false,
        }
    }
}

/// Junction graph derived from a [`SkeletonGraph`].
#[derive(Debug, Clone, Default)]
pub struct Contracted {
    /// The contracted graph.
    pub graph: StableUnGraph<Junction, Chain>,
}

/// The node at the other end of an edge reference.
fn other_end<E: EdgeRef<NodeId = NodeIndex>>(edge: &E, from: NodeIndex) -> NodeIndex {
    if edge.source() == from {
        edge.target()
    } else {
        edge.source()
    }
}

impl SkeletonGraph {
    /// Build the adjacency graph of a skeleton mask.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_mask(skeleton: &GrayImage) -> Self {
        let (width, height) = skeleton.dimensions();
        let mut graph = StableUnGraph::default();
        let mut ids: Vec<Option<NodeIndex>> = vec![None; width as usize * height as usize];
        let at = |x: u32, y: u32| y as usize * width as usize + x as usize;
        let set = |x: i64, y: i64| {
            x >= 0
                && y >= 0
                && x < i64::from(width)
                && y < i64::from(height)
                && skeleton.get_pixel(x as u32, y as u32).0[0] != 0
        };

        for (x, y, p) in skeleton.enumerate_pixels() {
            if p.0[0] != 0 {
                ids[at(x, y)] = Some(graph.add_node(PixelCoord::new(x, y)));
            }
        }

        for (x, y, _) in skeleton.enumerate_pixels() {
            let Some(a) = ids[at(x, y)] else {
                continue;
            };
            let (xi, yi) = (i64::from(x), i64::from(y));
            let neighbours = [
                (1, 0, 1.0, true),
                (0, 1, 1.0, true),
                (1, 1, std::f64::consts::SQRT_2, !set(xi + 1, yi) && !set(xi, yi + 1)),
                (-1, 1, std::f64::consts::SQRT_2, !set(xi - 1, yi) && !set(xi, yi + 1)),
            ];
            for (dx, dy, weight, allowed) in neighbours {
                if allowed && set(xi + dx, yi + dy) {
                    if let Some(b) = ids[at((xi + dx) as u32, (yi + dy) as u32)] {
                        graph.add_edge(a, b, weight);
                    }
                }
            }
        }
        Self { graph }
    }

    /// Number of pixel nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of pixel links.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Every skeleton pixel.
    pub fn pixels(&self) -> impl Iterator<Item = PixelCoord> + '_ {
        self.graph.node_weights().copied()
    }

    /// The skeleton pixel nearest `p`, ties going to the lowest pixel.
    #[must_use]
    pub fn nearest_pixel(&self, p: Point) -> Option<PixelCoord> {
        self.pixels().min_by(|a, b| {
            p.distance_squared(Point::from(*a))
                .total_cmp(&p.distance_squared(Point::from(*b)))
                .then(a.cmp(b))
        })
    }

    fn degree(&self, n: NodeIndex) -> usize {
        self.graph.edges(n).count()
    }

    /// Drop every node outside the largest connected component.
    /// Isolated pixels count as components of size one.
    pub fn keep_largest_component(&mut self) {
        let mut uf = UnionFind::<usize>::new(self.graph.node_bound());
        for e in self.graph.edge_indices() {
            if let Some((a, b)) = self.graph.edge_endpoints(e) {
                uf.union(a.index(), b.index());
            }
        }
        let mut sizes: HashMap<usize, (usize, usize)> = HashMap::new();
        for n in self.graph.node_indices() {
            let root = uf.find_mut(n.index());
            let entry = sizes.entry(root).or_insert((0, n.index()));
            entry.0 += 1;
        }
        // Largest size, then earliest first node.
        let Some(keep) = sizes
            .iter()
            .max_by(|a, b| a.1.0.cmp(&b.1.0).then(b.1.1.cmp(&a.1.1)))
            .map(|(root, _)| *root)
        else {
            return;
        };
        let before = self.graph.node_count();
        self.graph.retain_nodes(|_, n| uf.find(n.index()) == keep);
        log::debug!(
            "skeleton: kept {} of {before} pixels in the largest component",
            self.graph.node_count()
        );
    }

    /// Contract degree-2 chains into single weighted edges.
    ///
    /// Every node whose degree is not 2 becomes a junction. A component
    /// made only of degree-2 nodes (a ring) gets its lowest pixel as a
    /// junction and a single self-loop.
    #[must_use]
    pub fn contract(&self) -> Contracted {
        let mut out = StableUnGraph::default();
        let mut map: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut used: HashSet<EdgeIndex> = HashSet::new();

        for n in self.graph.node_indices() {
            if self.degree(n) != 2 {
                map.insert(n, out.add_node(Junction {
                    pixel: self.graph[n],
                    source: n,
                }));
            }
        }

        let keys: Vec<NodeIndex> = self.graph.node_indices().filter(|n| map.contains_key(n)).collect();
        for start in keys {
            self.walk_chains(start, &mut map, &mut used, &mut out, false);
        }

        // Pure rings: no junction was ever reached.
        let mut ring_nodes: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&n| self.graph.edges(n).any(|e| !used.contains(&e.id())))
            .collect();
        ring_nodes.sort_by_key(|&n| self.graph[n]);
        for n in ring_nodes {
            if self.graph.edges(n).all(|e| used.contains(&e.id())) {
                continue;
            }
            map.entry(n).or_insert_with(|| {
                out.add_node(Junction {
                    pixel: self.graph[n],
                    source: n,
                })
            });
            self.walk_chains(n, &mut map, &mut used, &mut out, true);
        }

        Contracted { graph: out }
    }

    fn walk_chains(
        &self,
        start: NodeIndex,
        map: &mut HashMap<NodeIndex, NodeIndex>,
        used: &mut HashSet<EdgeIndex>,
        out: &mut StableUnGraph<Junction, Chain>,
        ring: bool,
    ) {
        let first_links: Vec<(EdgeIndex, NodeIndex, f64)> = self
            .graph
            .edges(start)
            .map(|e| (e.id(), other_end(&e, start), *e.weight()))
            .collect();
        for (first, next, w) in first_links {
            if used.contains(&first) {
                continue;
            }
            used.insert(first);
            let mut links = vec![first];
            let mut weight = w;
            let mut last = first;
            let mut cur = next;
            while cur != start && !map.contains_key(&cur) {
                let step = self
                    .graph
                    .edges(cur)
                    .find(|e| e.id() != last && !used.contains(&e.id()))
                    .map(|e| (e.id(), other_end(&e, cur), *e.weight()));
                let Some((id, to, w)) = step else {
                    break;
                };
                used.insert(id);
                links.push(id);
                weight += w;
                last = id;
                cur = to;
            }
            if let (Some(&a), Some(&b)) = (map.get(&start), map.get(&cur)) {
                out.add_edge(a, b, Chain {
                    weight,
                    links,
                    ring,
                });
            }
        }
    }

    /// Remove cycles until the graph is a tree.
    ///
    /// Each round contracts the graph, finds one cycle, and deletes the
    /// chain on it whose end junctions have the lowest average distance
    /// to the mask boundary (ties: lowest mean distance along the chain).
    /// A pure ring is opened by deleting its single link nearest the
    /// boundary. Returns the number of cycles broken.
    ///
    /// # Errors
    ///
    /// Returns [`SeamError::NonConvergence`] after `max_iterations` rounds.
    pub fn remove_cycles(
        &mut self,
        boundary: &FloatImage,
        max_iterations: usize,
    ) -> Result<usize, SeamError> {
        let distance = |p: PixelCoord| {
            boundary
                .get_pixel_checked(p.x, p.y)
                .map_or(0.0, |v| v.0[0])
        };
        let mut removed = 0;
        loop {
            let contracted = self.contract();
            let Some(cycle) = contracted.find_cycle() else {
                return Ok(removed);
            };
            if removed >= max_iterations {
                return Err(SeamError::NonConvergence {
                    stage: "cycle removal",
                    iterations: max_iterations,
                });
            }

            let link_score = |e: EdgeIndex| {
                self.graph.edge_endpoints(e).map_or(f64::INFINITY, |(a, b)| {
                    f64::midpoint(distance(self.graph[a]), distance(self.graph[b]))
                })
            };
            let chain_score = |e: EdgeIndex| -> (f64, f64) {
                let Some((a, b)) = contracted.graph.edge_endpoints(e) else {
                    return (f64::INFINITY, f64::INFINITY);
                };
                let ends = f64::midpoint(
                    distance(contracted.graph[a].pixel),
                    distance(contracted.graph[b].pixel),
                );
                let links = &contracted.graph[e].links;
                #[allow(clippy::cast_precision_loss)]
                let along = links.iter().map(|&l| link_score(l)).sum::<f64>() / links.len().max(1) as f64;
                (ends, along)
            };

            let Some(victim) = cycle.iter().copied().min_by(|&x, &y| {
                let (sx, sy) = (chain_score(x), chain_score(y));
                sx.0.total_cmp(&sy.0)
                    .then(sx.1.total_cmp(&sy.1))
                    .then(x.index().cmp(&y.index()))
            }) else {
                return Ok(removed);
            };
            let chain = &contracted.graph[victim];
            if chain.ring {
                if let Some(link) = chain
                    .links
                    .iter()
                    .copied()
                    .min_by(|&x, &y| link_score(x).total_cmp(&link_score(y)).then(x.index().cmp(&y.index())))
                {
                    self.graph.remove_edge(link);
                }
            } else {
                for &link in &chain.links {
                    self.graph.remove_edge(link);
                }
                self.graph.retain_nodes(|g, n| g.edges(n).next().is_some());
            }
            removed += 1;
        }
    }

    /// Shortest pixel path between two nodes, both ends included.
    #[must_use]
    pub fn shortest_path(&self, start: NodeIndex, end: NodeIndex) -> Option<Vec<PixelCoord>> {
        if start == end {
            return self.graph.node_weight(start).map(|p| vec![*p]);
        }
        let costs = dijkstra(&self.graph, start, Some(end), |e| *e.weight());
        costs.get(&end)?;

        // Step back from `end` along edges that account exactly for the
        // cost difference.
        let mut visited = HashSet::from([end]);
        let mut path = vec![self.graph[end]];
        let mut current = end;
        while current != start {
            let current_cost = costs.get(&current).copied().unwrap_or(f64::INFINITY);
            let next = self
                .graph
                .edges(current)
                .map(|e| (other_end(&e, current), *e.weight()))
                .filter(|(n, _)| !visited.contains(n))
                .filter_map(|(n, w)| costs.get(&n).map(|c| (n, c + w)))
                .find(|(_, via)| (via - current_cost).abs() < 1e-9)
                .map(|(n, _)| n)?;
            visited.insert(next);
            path.push(self.graph[next]);
            current = next;
        }
        path.reverse();
        Some(path)
    }
}

impl Contracted {
    /// Degree of a junction.
    #[must_use]
    pub fn degree(&self, n: NodeIndex) -> usize {
        self.graph.edges(n).count()
    }

    /// Junctions with exactly one edge, in index order.
    #[must_use]
    pub fn leaves(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&n| self.degree(n) == 1)
            .collect()
    }

    /// Edges of one cycle, or `None` for a forest.
    ///
    /// A spanning forest is grown in edge-index order; the first edge
    /// closing a loop yields the cycle made of it and the forest path
    /// between its ends.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<EdgeIndex>> {
        let mut uf = UnionFind::<usize>::new(self.graph.node_bound());
        let mut tree: HashMap<NodeIndex, Vec<(NodeIndex, EdgeIndex)>> = HashMap::new();
        for e in self.graph.edge_indices() {
            let (a, b) = self.graph.edge_endpoints(e)?;
            if a == b {
                return Some(vec![e]);
            }
            if uf.equiv(a.index(), b.index()) {
                let mut path = tree_path(&tree, a, b)?;
                path.push(e);
                return Some(path);
            }
            uf.union(a.index(), b.index());
            tree.entry(a).or_default().push((b, e));
            tree.entry(b).or_default().push((a, e));
        }
        None
    }

    /// Simplify the graph to a fixed point.
    ///
    /// Leaves whose only edge is shorter than `threshold` are removed.
    /// Degree-2 junctions with an edge shorter than `threshold` are
    /// merged into one edge of summed weight. The graph is never reduced
    /// below two junctions. Returns the number of edits.
    ///
    /// # Errors
    ///
    /// Returns [`SeamError::NonConvergence`] after `max_iterations` edits.
    pub fn prune(&mut self, threshold: f64, max_iterations: usize) -> Result<usize, SeamError> {
        let mut edits = 0;
        loop {
            let mut changed = false;
            let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
            for n in nodes {
                if self.graph.node_count() <= 2 {
                    break;
                }
                if self.graph.node_weight(n).is_none() {
                    continue;
                }
                let incident: Vec<(EdgeIndex, NodeIndex, f64)> = self
                    .graph
                    .edges(n)
                    .map(|e| (e.id(), other_end(&e, n), e.weight().weight))
                    .collect();
                let edited = match incident.as_slice() {
                    [(_, _, w)] if *w < threshold => {
                        self.graph.remove_node(n);
                        true
                    }
                    [(e1, a, w1), (e2, b, w2)]
                        if a != b && *a != n && *b != n && (*w1 < threshold || *w2 < threshold) =>
                    {
                        let mut links = self.graph[*e1].links.clone();
                        links.extend_from_slice(&self.graph[*e2].links);
                        self.graph.add_edge(*a, *b, Chain {
                            weight: w1 + w2,
                            links,
                            ring: false,
                        });
                        self.graph.remove_node(n);
                        true
                    }
                    _ => false,
                };
                if edited {
                    changed = true;
                    edits += 1;
                    if edits > max_iterations {
                        return Err(SeamError::NonConvergence {
                            stage: "branch pruning",
                            iterations: max_iterations,
                        });
                    }
                }
            }
            if !changed {
                return Ok(edits);
            }
        }
    }

    /// When more than two leaves remain, join the closest two with a
    /// synthetic edge. Returns whether an edge was added.
    pub fn reconnect_leaves(&mut self) -> bool {
        let leaves = self.leaves();
        if leaves.len() <= 2 {
            return false;
        }
        let mut best: Option<(NodeIndex, NodeIndex, f64)> = None;
        for (i, &a) in leaves.iter().enumerate() {
            for &b in &leaves[i + 1..] {
                let d = Point::from(self.graph[a].pixel).distance(self.graph[b].pixel.into());
                if best.is_none_or(|(_, _, bd)| d < bd) {
                    best = Some((a, b, d));
                }
            }
        }
        let Some((a, b, d)) = best else {
            return false;
        };
        log::debug!(
            "reconnecting leaves {:?} and {:?} ({d:.2} px apart)",
            self.graph[a].pixel,
            self.graph[b].pixel
        );
        self.graph.add_edge(a, b, Chain::synthetic(d));
        true
    }
}

/// Edges on the forest path between `from` and `to`.
fn tree_path(
    tree: &HashMap<NodeIndex, Vec<(NodeIndex, EdgeIndex)>>,
    from: NodeIndex,
    to: NodeIndex,
) -> Option<Vec<EdgeIndex>> {
    let mut previous: HashMap<NodeIndex, (NodeIndex, EdgeIndex)> = HashMap::new();
    let mut queue = VecDeque::from([from]);
    let mut seen = HashSet::from([from]);
    while let Some(n) = queue.pop_front() {
        if n == to {
            break;
        }
        for &(m, e) in tree.get(&n).into_iter().flatten() {
            if seen.insert(m) {
                previous.insert(m, (n, e));
                queue.push_back(m);
            }
        }
    }
    let mut path = Vec::new();
    let mut cur = to;
    while cur != from {
        let &(prev, e) = previous.get(&cur)?;
        path.push(e);
        cur = prev;
    }
    Some(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Luma;

    use crate::raster::ON;

    fn skeleton(w: u32, h: u32, pixels: &[(u32, u32)]) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for &(x, y) in pixels {
            img.put_pixel(x, y, Luma([ON]));
        }
        img
    }

    fn line(y: u32, x0: u32, x1: u32) -> Vec<(u32, u32)> {
        (x0..x1).map(|x| (x, y)).collect()
    }

    #[test]
    fn staircase_has_no_triangles() {
        let g = SkeletonGraph::from_mask(&skeleton(4, 4, &[(0, 0), (1, 0), (1, 1), (2, 2)]));
        assert_eq!(g.node_count(), 4);
        // (0,0)-(1,0), (1,0)-(1,1), (1,1)-(2,2); no (0,0)-(1,1) diagonal.
        assert_eq!(g.edge_count(), 3);
        assert!(g.contract().find_cycle().is_none());
    }

    #[test]
    fn straight_line_contracts_to_one_edge() {
        let g = SkeletonGraph::from_mask(&skeleton(12, 3, &line(1, 1, 11)));
        let c = g.contract();
        assert_eq!(c.graph.node_count(), 2);
        assert_eq!(c.graph.edge_count(), 1);
        let e = c.graph.edge_indices().next().unwrap();
        assert!((c.graph[e].weight - 9.0).abs() < 1e-12);
    }

    #[test]
    fn t_junction_contracts_to_star() {
        let mut px = line(5, 0, 11);
        px.extend((6..11).map(|y| (5, y)));
        let c = SkeletonGraph::from_mask(&skeleton(11, 11, &px)).contract();
        assert_eq!(c.graph.node_count(), 4);
        assert_eq!(c.graph.edge_count(), 3);
        assert_eq!(c.leaves().len(), 3);
    }

    #[test]
    fn largest_component_survives() {
        let mut px = line(1, 0, 10);
        px.extend(line(5, 0, 3));
        px.push((8, 8));
        let mut g = SkeletonGraph::from_mask(&skeleton(10, 10, &px));
        g.keep_largest_component();
        assert_eq!(g.node_count(), 10);
    }

    #[test]
    fn nearest_pixel_breaks_ties_low() {
        let g = SkeletonGraph::from_mask(&skeleton(10, 10, &[(2, 4), (4, 4), (3, 8)]));
        assert_eq!(g.pixels().count(), 3);
        assert_eq!(g.nearest_pixel(Point::new(3.0, 4.0)), Some(PixelCoord::new(2, 4)));
        assert_eq!(g.nearest_pixel(Point::new(3.0, 7.0)), Some(PixelCoord::new(3, 8)));
        assert_eq!(SkeletonGraph::default().nearest_pixel(Point::new(0.0, 0.0)), None);
    }

    #[test]
    fn ring_becomes_self_loop_and_opens() {
        let mut px = Vec::new();
        for i in 2..8 {
            px.extend([(i, 2), (i, 7), (2, i), (7, i)]);
        }
        let mask = skeleton(10, 10, &px);
        let mut g = SkeletonGraph::from_mask(&mask);
        let c = g.contract();
        assert_eq!(c.graph.node_count(), 1);
        assert!(c.find_cycle().is_some());

        let boundary = crate::morphology::boundary_distance(&mask);
        assert_eq!(g.remove_cycles(&boundary, 10).unwrap(), 1);
        assert_eq!(g.node_count(), 20);
        assert_eq!(g.edge_count(), 19);
        assert_eq!(g.contract().leaves().len(), 2);
    }

    #[test]
    fn lasso_loop_is_cut_away() {
        // A horizontal stem with a square loop hanging off its end.
        let mut px = line(5, 0, 10);
        for i in 10..15 {
            px.extend([(i, 3), (i, 7)]);
        }
        px.extend([(10, 4), (10, 6), (14, 4), (14, 5), (14, 6)]);
        let mask = skeleton(16, 10, &px);
        let mut g = SkeletonGraph::from_mask(&mask);
        let boundary = crate::morphology::boundary_distance(&mask);
        let removed = g.remove_cycles(&boundary, 10).unwrap();
        assert_eq!(removed, 1);
        assert!(g.contract().find_cycle().is_none());
    }

    #[test]
    fn cycle_cap_is_enforced() {
        let mut px = Vec::new();
        for i in 2..8 {
            px.extend([(i, 2), (i, 7), (2, i), (7, i)]);
        }
        let mask = skeleton(10, 10, &px);
        let mut g = SkeletonGraph::from_mask(&mask);
        let boundary = crate::morphology::boundary_distance(&mask);
        assert!(matches!(
            g.remove_cycles(&boundary, 0),
            Err(SeamError::NonConvergence { stage: "cycle removal", .. })
        ));
    }

    #[test]
    fn prune_drops_short_spur() {
        let mut px = line(5, 0, 20);
        px.push((10, 6));
        let mut c = SkeletonGraph::from_mask(&skeleton(20, 10, &px)).contract();
        assert_eq!(c.leaves().len(), 3);
        assert_eq!(c.prune(1.5, 100).unwrap(), 1);
        assert_eq!(c.leaves().len(), 2);
        // The former junction keeps two long edges, so it is not merged.
        assert_eq!(c.graph.node_count(), 3);
        let total: f64 = c.graph.edge_indices().map(|e| c.graph[e].weight).sum();
        assert!((total - 19.0).abs() < 1e-12);
    }

    #[test]
    fn prune_merges_short_link_junction() {
        // Two junction pixels one step apart. Once their spurs are gone
        // the short link between them is folded into its neighbour.
        let mut px = line(5, 0, 20);
        px.extend([(10, 6), (11, 4)]);
        let mut c = SkeletonGraph::from_mask(&skeleton(20, 10, &px)).contract();
        assert_eq!(c.graph.node_count(), 6);
        assert_eq!(c.prune(1.5, 100).unwrap(), 3);
        assert_eq!(c.graph.node_count(), 3);
        let mut weights: Vec<f64> = c.graph.edge_indices().map(|e| c.graph[e].weight).collect();
        weights.sort_by(f64::total_cmp);
        assert_eq!(weights, vec![9.0, 10.0]);
    }

    #[test]
    fn prune_never_goes_below_two_nodes() {
        let mut c = SkeletonGraph::from_mask(&skeleton(3, 1, &[(0, 0), (1, 0)])).contract();
        assert_eq!(c.prune(1.5, 100).unwrap(), 0);
        assert_eq!(c.graph.node_count(), 2);
    }

    #[test]
    fn reconnect_joins_nearest_leaves() {
        let mut px = line(5, 0, 21);
        px.extend((6..10).map(|y| (10, y)));
        px.extend((0..5).map(|y| (10, y)));
        let mut c = SkeletonGraph::from_mask(&skeleton(21, 10, &px)).contract();
        assert_eq!(c.leaves().len(), 4);
        assert!(c.reconnect_leaves());
        assert_eq!(c.leaves().len(), 2);
        let mut two = SkeletonGraph::from_mask(&skeleton(5, 1, &line(0, 0, 5))).contract();
        assert!(!two.reconnect_leaves());
    }

    #[test]
    fn shortest_path_is_connected() {
        let mut px = line(5, 0, 15);
        px.extend((0..5).map(|y| (7, y)));
        let g = SkeletonGraph::from_mask(&skeleton(15, 10, &px));
        let c = g.contract();
        let leaves = c.leaves();
        let ends: Vec<NodeIndex> = leaves
            .iter()
            .filter(|&&n| c.graph[n].pixel.y == 5)
            .map(|&n| c.graph[n].source)
            .collect();
        let path = g.shortest_path(ends[0], ends[1]).unwrap();
        assert_eq!(path.len(), 15);
        assert!(path.windows(2).all(|w| w[0].touches(w[1])));
    }
}
