use nalgebra::{DMatrix, Point2};

use crate::error::{MatchError, MatchResult};
use crate::feature_table::FeatureTable;
use crate::point_index::PointIndex;
use crate::precision::Real;

/// Identifier of a node, typically the label of a segmented object.
pub type NodeId = u32;

/// One side of a matching problem: a spatial adjacency graph over segmented
/// objects.
///
/// A graph always has node ids and a symmetric boolean adjacency matrix. It may
/// also carry:
/// - a symmetric edge-length matrix (`distances`), read only where adjacent;
/// - a [FeatureTable] with one row per node;
/// - 2-D node coordinates (`points`).
///
/// Which optional parts are required depends on the enabled cross-distance
/// terms of the matcher.
#[derive(Debug, Clone)]
pub struct Graph<T: Real> {
    /// Node ids in matrix order.
    node_ids: Vec<NodeId>,
    /// `n × n` symmetric adjacency.
    adjacency: DMatrix<bool>,
    /// `n × n` symmetric edge lengths.
    distances: Option<DMatrix<T>>,
    /// Per-node features.
    features: Option<FeatureTable<T>>,
    /// Per-node coordinates.
    points: Option<Vec<Point2<T>>>,
}

impl<T: Real> Graph<T> {
    /// Creates a graph from node ids and an adjacency matrix.
    ///
    /// # Errors
    /// Returns [MatchError::InvalidGraph] if the adjacency matrix is not square,
    /// not symmetric, or its size differs from the number of node ids.
    pub fn new(node_ids: Vec<NodeId>, adjacency: DMatrix<bool>) -> MatchResult<Self> {
        let n = node_ids.len();
        if adjacency.nrows() != n || adjacency.ncols() != n {
            return Err(MatchError::InvalidGraph(format!(
                "adjacency of shape {}x{} for {} nodes",
                adjacency.nrows(),
                adjacency.ncols(),
                n
            )));
        }
        if adjacency != adjacency.transpose() {
            return Err(MatchError::InvalidGraph("adjacency is not symmetric".into()));
        }
        Ok(Graph {
            node_ids,
            adjacency,
            distances: None,
            features: None,
            points: None,
        })
    }

    /// Creates a graph from an undirected edge list.
    ///
    /// # Examples
    /// ```
    /// # use graphmap::graph::Graph;
    /// let path = Graph::<f32>::from_edges(vec![10, 20, 30], &[(10, 20), (20, 30)]).unwrap();
    /// assert_eq!(path.degrees(), vec![1, 2, 1]);
    /// ```
    pub fn from_edges(node_ids: Vec<NodeId>, edges: &[(NodeId, NodeId)]) -> MatchResult<Self> {
        let n = node_ids.len();
        let mut adjacency = DMatrix::from_element(n, n, false);
        for &(a, b) in edges {
            let i = position_of(&node_ids, a)?;
            let j = position_of(&node_ids, b)?;
            adjacency[(i, j)] = true;
            adjacency[(j, i)] = true;
        }
        Self::new(node_ids, adjacency)
    }

    /// Builds a radius graph: nodes closer than or exactly `adj_radius` apart
    /// are adjacent (no self loops), and each edge is labelled with its
    /// Euclidean length. The points are kept on the graph.
    pub fn from_points(node_ids: Vec<NodeId>, points: Vec<Point2<T>>, adj_radius: T) -> MatchResult<Self> {
        let n = node_ids.len();
        if points.len() != n {
            return Err(MatchError::InvalidGraph(format!(
                "{} points for {} nodes",
                points.len(),
                n
            )));
        }
        let mut adjacency = DMatrix::from_element(n, n, false);
        let mut distances = DMatrix::zeros(n, n);
        let index = PointIndex::new(&points);
        for (i, point) in points.iter().enumerate() {
            for j in index.within_radius(point, adj_radius.widen()) {
                if j == i {
                    continue;
                }
                let length = nalgebra::distance(point, &points[j]);
                if length <= adj_radius {
                    adjacency[(i, j)] = true;
                    adjacency[(j, i)] = true;
                    distances[(i, j)] = length;
                    distances[(j, i)] = length;
                }
            }
        }
        Self::new(node_ids, adjacency)?
            .with_distances(distances)?
            .with_points(points)
    }

    /// Attaches an `n × n` symmetric edge-length matrix.
    pub fn with_distances(mut self, distances: DMatrix<T>) -> MatchResult<Self> {
        let n = self.num_nodes();
        if distances.nrows() != n || distances.ncols() != n {
            return Err(MatchError::InvalidGraph(format!(
                "distances of shape {}x{} for {} nodes",
                distances.nrows(),
                distances.ncols(),
                n
            )));
        }
        self.distances = Some(distances);
        Ok(self)
    }

    /// Attaches a feature table with one row per node.
    pub fn with_features(mut self, features: FeatureTable<T>) -> MatchResult<Self> {
        if features.nrows() != self.num_nodes() {
            return Err(MatchError::InvalidGraph(format!(
                "{} feature rows for {} nodes",
                features.nrows(),
                self.num_nodes()
            )));
        }
        self.features = Some(features);
        Ok(self)
    }

    /// Attaches one coordinate per node.
    pub fn with_points(mut self, points: Vec<Point2<T>>) -> MatchResult<Self> {
        if points.len() != self.num_nodes() {
            return Err(MatchError::InvalidGraph(format!(
                "{} points for {} nodes",
                points.len(),
                self.num_nodes()
            )));
        }
        self.points = Some(points);
        Ok(self)
    }

    pub fn num_nodes(&self) -> usize {
        self.node_ids.len()
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    pub fn adjacency(&self) -> &DMatrix<bool> {
        &self.adjacency
    }

    pub fn distances(&self) -> Option<&DMatrix<T>> {
        self.distances.as_ref()
    }

    pub fn features(&self) -> Option<&FeatureTable<T>> {
        self.features.as_ref()
    }

    pub fn points(&self) -> Option<&[Point2<T>]> {
        self.points.as_deref()
    }

    /// Number of neighbours of every node.
    pub fn degrees(&self) -> Vec<usize> {
        self.adjacency
            .row_iter()
            .map(|row| row.iter().filter(|&&adjacent| adjacent).count())
            .collect()
    }

    /// Indices of the neighbours of node `i`, in increasing order.
    pub fn neighbors(&self, i: usize) -> Vec<usize> {
        (0..self.num_nodes())
            .filter(|&j| self.adjacency[(i, j)])
            .collect()
    }
}

fn position_of(node_ids: &[NodeId], id: NodeId) -> MatchResult<usize> {
    node_ids
        .iter()
        .position(|&node| node == id)
        .ok_or_else(|| MatchError::InvalidGraph(format!("edge references unknown node {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_asymmetric_adjacency() {
        let mut adjacency = DMatrix::from_element(2, 2, false);
        adjacency[(0, 1)] = true;
        assert!(Graph::<f64>::new(vec![1, 2], adjacency).is_err());
    }

    #[test]
    fn rejects_unknown_edge_endpoint() {
        assert!(Graph::<f64>::from_edges(vec![1, 2], &[(1, 3)]).is_err());
    }

    #[test]
    fn radius_graph_connects_close_points() {
        let points = vec![
            Point2::new(0.0f64, 0.0),
            Point2::new(3.0, 0.0),
            Point2::new(3.0, 4.0),
            Point2::new(20.0, 20.0),
        ];
        let graph = Graph::from_points(vec![1, 2, 3, 4], points, 5.0).unwrap();
        assert_eq!(graph.degrees(), vec![2, 2, 2, 0]);
        assert_eq!(graph.neighbors(0), vec![1, 2]);
        let distances = graph.distances().unwrap();
        assert_eq!(distances[(0, 2)], 5.0);
        assert_eq!(distances[(1, 2)], 4.0);
        assert!(!graph.adjacency()[(0, 0)]);
    }

    #[test]
    fn points_exactly_one_radius_apart_are_adjacent() {
        let points = vec![Point2::new(0.0f32, 0.0), Point2::new(10.0, 0.0), Point2::new(20.0, 0.0)];
        let graph = Graph::from_points(vec![1, 2, 3], points, 10.0).unwrap();
        assert_eq!(graph.degrees(), vec![1, 2, 1]);
        assert_eq!(graph.distances().unwrap()[(1, 2)], 10.0);
        assert!(!graph.adjacency()[(0, 2)]);
    }

    #[test]
    fn optional_parts_must_match_node_count() {
        let graph = Graph::<f32>::from_edges(vec![1, 2, 3], &[(1, 2)]).unwrap();
        assert!(graph.clone().with_points(vec![Point2::new(0.0, 0.0)]).is_err());
        assert!(graph.with_distances(DMatrix::zeros(2, 2)).is_err());
    }
}
