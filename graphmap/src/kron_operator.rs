//! Sparse operator on the Kronecker product of two adjacency matrices.
//!
//! Product node `p = i·n2 + j` pairs source node `i` with target node `j`.
//! Product nodes `(i, j)` and `(k, l)` are adjacent exactly when `i ~ k` in the
//! source graph and `j ~ l` in the target graph. For realistic graphs the
//! product has hundreds of thousands of nodes but only a few non-zeros per row,
//! so the operator is held as a CSR matrix (`sprs::CsMat`) whose structure
//! never changes once the pattern is built.

use nalgebra::{DMatrix, DVector};
use sprs::CsMat;

use crate::precision::Real;

/// Non-zero structure of `A1 ⊗ A2` in CSR order.
#[derive(Debug, Clone)]
pub struct KronPattern {
    n1: usize,
    n2: usize,
    /// Offset of the first entry of every row, `dim + 1` values.
    indptr: Vec<usize>,
    /// Column of every entry, increasing within a row.
    indices: Vec<usize>,
    /// Row of every entry.
    rows: Vec<usize>,
}

impl KronPattern {
    /// Builds the pattern of `adj1 ⊗ adj2`.
    ///
    /// # Arguments
    /// * `adj1` - `n1 × n1` source adjacency.
    /// * `adj2` - `n2 × n2` target adjacency.
    ///
    /// # Examples
    /// ```
    /// # use graphmap::kron_operator::KronPattern;
    /// # use nalgebra::DMatrix;
    /// let edge = DMatrix::from_row_slice(2, 2, &[false, true, true, false]);
    /// let pattern = KronPattern::new(&edge, &edge);
    /// assert_eq!(pattern.dim(), 4);
    /// // (0, 0) ~ (1, 1) and (0, 1) ~ (1, 0), in both directions
    /// assert_eq!(pattern.nnz(), 4);
    /// ```
    pub fn new(adj1: &DMatrix<bool>, adj2: &DMatrix<bool>) -> Self {
        let n1 = adj1.nrows();
        let n2 = adj2.nrows();
        let neighbors1 = neighbor_lists(adj1);
        let neighbors2 = neighbor_lists(adj2);

        let mut indptr = Vec::with_capacity(n1 * n2 + 1);
        let mut indices = Vec::new();
        let mut rows = Vec::new();
        indptr.push(0);
        for i in 0..n1 {
            for j in 0..n2 {
                let p = i * n2 + j;
                for &k in &neighbors1[i] {
                    for &l in &neighbors2[j] {
                        indices.push(k * n2 + l);
                        rows.push(p);
                    }
                }
                indptr.push(indices.len());
            }
        }
        KronPattern {
            n1,
            n2,
            indptr,
            indices,
            rows,
        }
    }

    /// Number of product nodes, `n1 · n2`.
    pub fn dim(&self) -> usize {
        self.n1 * self.n2
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// `(n1, n2)`.
    pub fn factor_sizes(&self) -> (usize, usize) {
        (self.n1, self.n2)
    }

    /// Position of entry `(p, q)` in the pattern, if it is a non-zero.
    pub fn entry_index(&self, p: usize, q: usize) -> Option<usize> {
        if p >= self.dim() {
            return None;
        }
        let start = self.indptr[p];
        let end = self.indptr[p + 1];
        self.indices[start..end]
            .binary_search(&q)
            .ok()
            .map(|offset| start + offset)
    }

    /// Evaluates `f(i, j, k, l)` for every entry `((i, j), (k, l))`, in pattern
    /// order.
    pub fn map_entries<T, F>(&self, mut f: F) -> Vec<T>
    where
        F: FnMut(usize, usize, usize, usize) -> T,
    {
        self.rows
            .iter()
            .zip(&self.indices)
            .map(|(&p, &q)| f(p / self.n2, p % self.n2, q / self.n2, q % self.n2))
            .collect()
    }

    /// Row sums of `A1 ⊗ A2`, i.e. `deg1[i] · deg2[j]` for every product node.
    pub fn degrees(&self) -> Vec<usize> {
        self.indptr.windows(2).map(|row| row[1] - row[0]).collect()
    }
}

fn neighbor_lists(adjacency: &DMatrix<bool>) -> Vec<Vec<usize>> {
    (0..adjacency.nrows())
        .map(|i| (0..adjacency.ncols()).filter(|&k| adjacency[(i, k)]).collect())
        .collect()
}

/// Sparse `n1n2 × n1n2` matrix with the structure of a [KronPattern].
///
/// Starts as the weighted combination `W` of cross-distance terms and is turned
/// into the random-walk operator by [degree_normalized](SparseOperator::degree_normalized).
pub struct SparseOperator<'a, T: Real> {
    pattern: &'a KronPattern,
    matrix: CsMat<T>,
}

impl<'a, T: Real> SparseOperator<'a, T> {
    /// An operator with all pattern entries set to zero.
    pub fn zeros(pattern: &'a KronPattern) -> Self {
        let dim = pattern.dim();
        let matrix = CsMat::new(
            (dim, dim),
            pattern.indptr.clone(),
            pattern.indices.clone(),
            vec![T::zero(); pattern.nnz()],
        );
        SparseOperator { pattern, matrix }
    }

    /// Adds `weight · c[i, j]` to every entry in row `(i, j)`.
    ///
    /// `c` is an `n1 × n2` node-pair matrix.
    pub fn add_row_broadcast(&mut self, weight: T, c: &DMatrix<T>) {
        let n2 = self.pattern.n2;
        for (value, &p) in self.matrix.data_mut().iter_mut().zip(&self.pattern.rows) {
            *value += weight * c[(p / n2, p % n2)];
        }
    }

    /// Adds `weight · c[k, l]` to every entry in column `(k, l)`.
    pub fn add_col_broadcast(&mut self, weight: T, c: &DMatrix<T>) {
        let n2 = self.pattern.n2;
        for (value, &q) in self.matrix.data_mut().iter_mut().zip(&self.pattern.indices) {
            *value += weight * c[(q / n2, q % n2)];
        }
    }

    /// Adds `weight · values[e]` to entry `e`; `values` must be aligned with
    /// the pattern.
    pub fn add_aligned(&mut self, weight: T, values: &[T]) {
        debug_assert_eq!(values.len(), self.pattern.nnz());
        for (value, &addend) in self.matrix.data_mut().iter_mut().zip(values) {
            *value += weight * addend;
        }
    }

    /// Multiplies every entry by `factor`.
    pub fn scale(&mut self, factor: T) {
        for value in self.matrix.data_mut().iter_mut() {
            *value *= factor;
        }
    }

    /// Turns `W` into `D^{-1/2} (A_kron − W) D^{-1/2}`, with `D` the degrees of
    /// the product graph. Product nodes without neighbours get a zero factor.
    pub fn degree_normalized(mut self) -> Self {
        let inv_sqrt: Vec<T> = self
            .pattern
            .degrees()
            .into_iter()
            .map(|degree| {
                if degree > 0 {
                    T::one() / T::cast(degree as f64).sqrt()
                } else {
                    T::zero()
                }
            })
            .collect();
        let pattern = self.pattern;
        for ((value, &p), &q) in self
            .matrix
            .data_mut()
            .iter_mut()
            .zip(&pattern.rows)
            .zip(&pattern.indices)
        {
            *value = inv_sqrt[p] * (T::one() - *value) * inv_sqrt[q];
        }
        self
    }

    /// Sparse matrix-vector product.
    pub fn mul_vec(&self, x: &DVector<T>) -> DVector<T> {
        let mut result = DVector::zeros(self.pattern.dim());
        sprs::prod::mul_acc_mat_vec_csr(self.matrix.view(), x.as_slice(), result.as_mut_slice());
        result
    }

    /// Entry `(p, q)`; zero outside the pattern.
    pub fn get(&self, p: usize, q: usize) -> T {
        self.matrix.get(p, q).copied().unwrap_or_else(T::zero)
    }

    /// Entry values in pattern order.
    pub fn values(&self) -> &[T] {
        self.matrix.data()
    }

    pub fn pattern(&self) -> &KronPattern {
        self.pattern
    }
}

/// Flattens an `n1 × n2` matrix row by row, matching product node numbering.
pub fn row_major_vector<T: Real>(matrix: &DMatrix<T>) -> DVector<T> {
    let ncols = matrix.ncols();
    DVector::from_fn(matrix.len(), |p, _| matrix[(p / ncols, p % ncols)])
}

/// Inverse of [row_major_vector].
pub fn row_major_matrix<T: Real>(vector: &DVector<T>, nrows: usize, ncols: usize) -> DMatrix<T> {
    DMatrix::from_fn(nrows, ncols, |i, j| vector[i * ncols + j])
}
