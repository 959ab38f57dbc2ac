use anyhow::{bail, Context, Result};
use graphmap::feature_table::FeatureTable;
use graphmap::{Graph, NodeId, Real};
use nalgebra::{DMatrix, Point2};
use serde::Deserialize;

/// A matching problem as read from a JSON file.
#[derive(Debug, Deserialize)]
pub struct Problem {
    pub source: GraphSpec,
    pub target: GraphSpec,
}

/// One graph of a [Problem].
///
/// Either `edges` or `points` must be given. Without edges the graph is built
/// from the points with a radius.
#[derive(Debug, Deserialize)]
pub struct GraphSpec {
    pub nodes: Vec<NodeId>,
    #[serde(default)]
    pub edges: Option<Vec<[NodeId; 2]>>,
    /// One length per edge.
    #[serde(default)]
    pub edge_lengths: Option<Vec<f64>>,
    /// One `[x, y]` per node.
    #[serde(default)]
    pub points: Option<Vec<[f64; 2]>>,
    #[serde(default)]
    pub features: Option<FeatureSpec>,
}

#[derive(Debug, Deserialize)]
pub struct FeatureSpec {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl GraphSpec {
    /// Builds the graph in precision `T`.
    ///
    /// Edge lengths default to the distances between the points of the edge's
    /// end nodes when points are given.
    pub fn build<T: Real>(&self, adj_radius: Option<f64>) -> Result<Graph<T>> {
        let points: Option<Vec<Point2<T>>> = self.points.as_ref().map(|points| {
            points
                .iter()
                .map(|&[x, y]| Point2::new(T::cast(x), T::cast(y)))
                .collect()
        });

        let mut graph = match (&self.edges, &points) {
            (Some(edges), _) => {
                let pairs: Vec<(NodeId, NodeId)> = edges.iter().map(|&[a, b]| (a, b)).collect();
                let graph = Graph::from_edges(self.nodes.clone(), &pairs)?;
                let graph = match (&self.edge_lengths, &points) {
                    (Some(lengths), _) => {
                        if lengths.len() != edges.len() {
                            bail!("{} edge lengths for {} edges", lengths.len(), edges.len());
                        }
                        let distances = edge_matrix(&self.nodes, &pairs, |e, _, _| T::cast(lengths[e]));
                        graph.with_distances(distances)?
                    }
                    (None, Some(points)) => {
                        let distances =
                            edge_matrix(&self.nodes, &pairs, |_, i, j| nalgebra::distance(&points[i], &points[j]));
                        graph.with_distances(distances)?
                    }
                    (None, None) => graph,
                };
                match &points {
                    Some(points) => graph.with_points(points.clone())?,
                    None => graph,
                }
            }
            (None, Some(points)) => {
                let radius = adj_radius.context("a graph without edges needs --adj-radius")?;
                Graph::from_points(self.nodes.clone(), points.clone(), T::cast(radius))?
            }
            (None, None) => bail!("a graph needs edges or points"),
        };

        if let Some(features) = &self.features {
            let rows: Vec<Vec<T>> = features
                .rows
                .iter()
                .map(|row| row.iter().map(|&value| T::cast(value)).collect())
                .collect();
            graph = graph.with_features(FeatureTable::from_rows(features.columns.clone(), &rows)?)?;
        }
        Ok(graph)
    }
}

/// Symmetric matrix holding `value(edge index, i, j)` at the node positions of
/// every edge.
fn edge_matrix<T: Real>(
    nodes: &[NodeId],
    edges: &[(NodeId, NodeId)],
    value: impl Fn(usize, usize, usize) -> T,
) -> DMatrix<T> {
    let n = nodes.len();
    let mut matrix = DMatrix::zeros(n, n);
    for (e, &(a, b)) in edges.iter().enumerate() {
        // ids were validated by Graph::from_edges
        let (Some(i), Some(j)) = (
            nodes.iter().position(|&id| id == a),
            nodes.iter().position(|&id| id == b),
        ) else {
            continue;
        };
        let length = value(e, i, j);
        matrix[(i, j)] = length;
        matrix[(j, i)] = length;
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(json: &str) -> GraphSpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn edges_with_explicit_lengths() {
        let graph = spec(r#"{"nodes": [5, 6, 7], "edges": [[5, 6], [6, 7]], "edge_lengths": [2.5, 4.0]}"#)
            .build::<f64>(None)
            .unwrap();
        assert_eq!(graph.degrees(), vec![1, 2, 1]);
        let distances = graph.distances().unwrap();
        assert_eq!(distances[(0, 1)], 2.5);
        assert_eq!(distances[(2, 1)], 4.0);
        assert!(graph.points().is_none());
    }

    #[test]
    fn edge_lengths_default_to_point_distances() {
        let graph = spec(r#"{"nodes": [1, 2], "edges": [[1, 2]], "points": [[0, 0], [3, 4]]}"#)
            .build::<f32>(None)
            .unwrap();
        assert_eq!(graph.distances().unwrap()[(0, 1)], 5.0);
    }

    #[test]
    fn points_without_edges_need_a_radius() {
        let without_edges = spec(r#"{"nodes": [1, 2], "points": [[0, 0], [1, 0]]}"#);
        assert!(without_edges.build::<f64>(None).is_err());
        let graph = without_edges.build::<f64>(Some(2.0)).unwrap();
        assert!(graph.adjacency()[(0, 1)]);
    }

    #[test]
    fn features_are_attached() {
        let graph = spec(r#"{"nodes": [1, 2], "edges": [], "features": {"columns": ["CD3"], "rows": [[1.0], [2.0]]}}"#)
            .build::<f64>(None)
            .unwrap();
        assert_eq!(graph.features().unwrap().columns(), &["CD3".to_string()]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let graph = spec(r#"{"nodes": [1, 2], "edges": [[1, 2]], "edge_lengths": []}"#).build::<f64>(None);
        assert!(graph.is_err());
    }
}
