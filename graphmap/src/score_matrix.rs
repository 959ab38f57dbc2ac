use nalgebra::DMatrix;
use serde::Serialize;

use crate::assignment::max_weight_assignment;
use crate::error::{MatchError, MatchResult};
use crate::graph::NodeId;
use crate::precision::Real;

/// A source/target node correspondence with its score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredMatch<T> {
    pub source: NodeId,
    pub target: NodeId,
    pub score: T,
}

/// Dense correspondence scores labelled with node ids.
///
/// Rows are source nodes and columns target nodes, in the node order of the
/// matched graphs. Higher is better.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMatrix<T: Real> {
    source_ids: Vec<NodeId>,
    target_ids: Vec<NodeId>,
    scores: DMatrix<T>,
}

impl<T: Real> ScoreMatrix<T> {
    /// # Errors
    /// Returns [MatchError::InvalidGraph] if the matrix shape disagrees with
    /// the id lists.
    pub fn new(source_ids: Vec<NodeId>, target_ids: Vec<NodeId>, scores: DMatrix<T>) -> MatchResult<Self> {
        if scores.shape() != (source_ids.len(), target_ids.len()) {
            return Err(MatchError::InvalidGraph(format!(
                "score matrix of shape {:?} for {} source and {} target nodes",
                scores.shape(),
                source_ids.len(),
                target_ids.len()
            )));
        }
        Ok(ScoreMatrix {
            source_ids,
            target_ids,
            scores,
        })
    }

    pub fn source_ids(&self) -> &[NodeId] {
        &self.source_ids
    }

    pub fn target_ids(&self) -> &[NodeId] {
        &self.target_ids
    }

    pub fn scores(&self) -> &DMatrix<T> {
        &self.scores
    }

    pub fn into_scores(self) -> DMatrix<T> {
        self.scores
    }

    /// Score of the pair of nodes with the given ids.
    pub fn get(&self, source: NodeId, target: NodeId) -> Option<T> {
        let i = self.source_ids.iter().position(|&id| id == source)?;
        let j = self.target_ids.iter().position(|&id| id == target)?;
        Some(self.scores[(i, j)])
    }

    /// Best-scoring target of every source node.
    ///
    /// With `k_best` only the source nodes with the highest maximum scores are
    /// kept. Matches with a non-positive score are dropped. The result is
    /// ordered by source node.
    pub fn max_score_matches(&self, k_best: Option<usize>) -> Vec<ScoredMatch<T>> {
        let best = (0..self.scores.nrows())
            .filter_map(|i| {
                let &(j, score) = self.ranked_row(i).first()?;
                Some((i, j, score, score))
            })
            .collect();
        self.select(best, k_best)
    }

    /// Best target of every source node, preferring unambiguous nodes.
    ///
    /// With `k_best` only the source nodes with the largest margin between
    /// their best and second-best scores are kept. Matches with a non-positive
    /// score are dropped. The result is ordered by source node.
    pub fn max_margin_matches(&self, k_best: Option<usize>) -> Vec<ScoredMatch<T>> {
        let best = (0..self.scores.nrows())
            .filter_map(|i| {
                let ranked = self.ranked_row(i);
                let &(j, score) = ranked.first()?;
                let margin = ranked.get(1).map_or(score, |&(_, second)| score - second);
                Some((i, j, score, margin))
            })
            .collect();
        self.select(best, k_best)
    }

    /// Maximum-weight one-to-one assignment, restricted to positive scores.
    ///
    /// # Errors
    /// Propagates [MatchError::Assignment].
    pub fn assignment(&self) -> MatchResult<Vec<ScoredMatch<T>>> {
        Ok(max_weight_assignment(&self.scores)?
            .into_iter()
            .filter(|&(i, j)| self.scores[(i, j)] > T::zero())
            .map(|(i, j)| self.scored(i, j))
            .collect())
    }

    /// Columns of row `i` ordered by decreasing score.
    fn ranked_row(&self, i: usize) -> Vec<(usize, T)> {
        let mut ranked: Vec<(usize, T)> = self.scores.row(i).iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked
    }

    /// Keeps the `k_best` candidates `(row, column, score, rank key)` with the
    /// highest key, then drops non-positive scores.
    fn select(&self, mut candidates: Vec<(usize, usize, T, T)>, k_best: Option<usize>) -> Vec<ScoredMatch<T>> {
        if let Some(k) = k_best {
            candidates.sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap_or(std::cmp::Ordering::Equal));
            candidates.truncate(k);
            candidates.sort_by_key(|candidate| candidate.0);
        }
        candidates
            .into_iter()
            .filter(|&(_, _, score, _)| score > T::zero())
            .map(|(i, j, _, _)| self.scored(i, j))
            .collect()
    }

    fn scored(&self, i: usize, j: usize) -> ScoredMatch<T> {
        ScoredMatch {
            source: self.source_ids[i],
            target: self.target_ids[j],
            score: self.scores[(i, j)],
        }
    }
}
