use kd_tree::{KdPoint, KdTree};
use nalgebra::Point2;

use crate::precision::Real;

/// A node coordinate stored in the k-d tree together with its node index.
#[derive(Debug, Clone, Copy)]
struct IndexedPoint {
    index: usize,
    coords: [f64; 2],
}

impl IndexedPoint {
    fn new<T: Real>(index: usize, point: &Point2<T>) -> Self {
        IndexedPoint {
            index,
            coords: [point.x.widen(), point.y.widen()],
        }
    }
}

impl KdPoint for IndexedPoint {
    type Scalar = f64;
    type Dim = typenum::U2;
    fn at(&self, k: usize) -> f64 {
        self.coords[k]
    }
}

/// A neighbouring node returned by a [PointIndex] query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the node in the indexed point set.
    pub index: usize,
    /// Euclidean distance to the query.
    pub distance: f64,
}

/// Nearest-neighbour index over the 2-D coordinates of one graph.
///
/// Built on a [KdTree] from the `kd_tree` crate. Queries only return node
/// indices and distances, so the coordinates are indexed in `f64` whatever the
/// precision of the match.
pub struct PointIndex {
    tree: KdTree<IndexedPoint>,
}

impl PointIndex {
    pub fn new<T: Real>(points: &[Point2<T>]) -> Self {
        let items = points
            .iter()
            .enumerate()
            .map(|(index, point)| IndexedPoint::new(index, point))
            .collect();
        PointIndex {
            tree: KdTree::build_by_ordered_float(items),
        }
    }

    /// Up to `count` nearest indexed nodes to `query`, closest first.
    pub fn nearest<T: Real>(&self, query: &Point2<T>, count: usize) -> Vec<Neighbor> {
        let query = IndexedPoint::new(usize::MAX, query);
        let mut neighbors: Vec<Neighbor> = self
            .tree
            .nearests(&query, count)
            .into_iter()
            .map(|found| Neighbor {
                index: found.item.index,
                distance: found.squared_distance.sqrt(),
            })
            .collect();
        // equal distances resolve to the lower node index
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.index.cmp(&b.index)));
        neighbors
    }

    /// Indices of all indexed nodes at most `radius` from `query`, boundary
    /// included.
    pub fn within_radius<T: Real>(&self, query: &Point2<T>, radius: f64) -> Vec<usize> {
        let query = IndexedPoint::new(usize::MAX, query);
        let squared_radius = radius * radius;
        // the tree only returns points strictly inside its radius
        let mut indices: Vec<usize> = self
            .tree
            .within_radius(&query, radius * (1.0 + 1e-9) + f64::MIN_POSITIVE)
            .into_iter()
            .filter(|item| {
                let dx = item.coords[0] - query.coords[0];
                let dy = item.coords[1] - query.coords[1];
                dx * dx + dy * dy <= squared_radius
            })
            .map(|item| item.index)
            .collect();
        indices.sort_unstable();
        indices
    }
}
