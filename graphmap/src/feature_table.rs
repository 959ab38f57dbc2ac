use nalgebra::DMatrix;

use crate::error::{MatchError, MatchResult};
use crate::precision::Real;

/// Per-node feature vectors of one graph, with named columns.
///
/// Rows follow the node order of the owning [Graph](crate::graph::Graph).
/// Column names are chosen independently for each graph; only the columns
/// both graphs share can be compared directly.
#[derive(Debug, Clone)]
pub struct FeatureTable<T: Real> {
    /// Column names, unique within the table.
    columns: Vec<String>,
    /// Feature values, one row per node and one column per feature.
    values: DMatrix<T>,
}

impl<T: Real> FeatureTable<T> {
    /// Creates a table from column names and an `n × k` value matrix.
    ///
    /// # Errors
    /// Returns [MatchError::InvalidGraph] when the number of names differs
    /// from the number of matrix columns or a name occurs twice.
    pub fn new(columns: Vec<String>, values: DMatrix<T>) -> MatchResult<Self> {
        if columns.len() != values.ncols() {
            return Err(MatchError::InvalidGraph(format!(
                "{} feature names for {} feature columns",
                columns.len(),
                values.ncols()
            )));
        }
        for (index, name) in columns.iter().enumerate() {
            if columns[..index].contains(name) {
                return Err(MatchError::InvalidGraph(format!(
                    "duplicate feature column '{name}'"
                )));
            }
        }
        Ok(FeatureTable { columns, values })
    }

    /// Creates a table from row vectors.
    ///
    /// # Examples
    /// ```
    /// # use graphmap::feature_table::FeatureTable;
    /// let table = FeatureTable::from_rows(
    ///     vec!["CD3".to_string(), "CD20".to_string()],
    ///     &[vec![1.0f64, 0.5], vec![0.2, 3.0], vec![0.7, 0.7]],
    /// ).unwrap();
    /// assert_eq!(table.nrows(), 3);
    /// assert_eq!(table.column_index("CD20"), Some(1));
    /// ```
    pub fn from_rows(columns: Vec<String>, rows: &[Vec<T>]) -> MatchResult<Self> {
        let ncols = columns.len();
        if let Some(row) = rows.iter().find(|row| row.len() != ncols) {
            return Err(MatchError::InvalidGraph(format!(
                "feature row of length {} for {} columns",
                row.len(),
                ncols
            )));
        }
        let values = DMatrix::from_fn(rows.len(), ncols, |i, j| rows[i][j]);
        Self::new(columns, values)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &DMatrix<T> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// Position of the column called `name`, if any.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Names of the columns present in both tables, in this table's order.
    pub fn shared_columns(&self, other: &FeatureTable<T>) -> Vec<String> {
        self.columns
            .iter()
            .filter(|name| other.column_index(name).is_some())
            .cloned()
            .collect()
    }

    /// Returns a new table restricted to `names`, in the given order.
    pub fn select_columns(&self, names: &[String]) -> MatchResult<FeatureTable<T>> {
        let indices = names
            .iter()
            .map(|name| {
                self.column_index(name).ok_or_else(|| {
                    MatchError::InvalidGraph(format!("unknown feature column '{name}'"))
                })
            })
            .collect::<MatchResult<Vec<usize>>>()?;
        let values = self.values.select_columns(indices.iter());
        Ok(FeatureTable {
            columns: names.to_vec(),
            values,
        })
    }

    /// Gathers the feature rows of the given nodes, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> DMatrix<T> {
        self.values.select_rows(rows.iter())
    }

    /// Column-wise z-scores: each column centred on its mean and divided by its
    /// sample standard deviation. Constant columns are only centred.
    pub fn standardized(&self) -> DMatrix<T> {
        standardize_columns(&self.values)
    }
}

/// Column means and sample standard deviations (`ddof = 1`) of `data`.
///
/// A standard deviation of zero (constant column or a single row) is reported
/// as one so that callers can divide by it unconditionally.
pub(crate) fn column_mean_and_std<T: Real>(data: &DMatrix<T>) -> (Vec<T>, Vec<T>) {
    let nrows = data.nrows();
    let mut means = Vec::with_capacity(data.ncols());
    let mut stds = Vec::with_capacity(data.ncols());
    for column in data.column_iter() {
        if nrows == 0 {
            means.push(T::zero());
            stds.push(T::one());
            continue;
        }
        let mean = column.sum() / T::cast(nrows as f64);
        let mut squares = T::zero();
        for &value in column.iter() {
            let centred = value - mean;
            squares += centred * centred;
        }
        let std = if nrows > 1 {
            (squares / T::cast((nrows - 1) as f64)).sqrt()
        } else {
            T::zero()
        };
        means.push(mean);
        stds.push(if std > T::zero() { std } else { T::one() });
    }
    (means, stds)
}

/// Centres and scales each column of `data` with [column_mean_and_std].
pub(crate) fn standardize_columns<T: Real>(data: &DMatrix<T>) -> DMatrix<T> {
    let (means, stds) = column_mean_and_std(data);
    apply_standardization(data, &means, &stds)
}

/// Applies a previously computed centring and scaling to `data`.
pub(crate) fn apply_standardization<T: Real>(data: &DMatrix<T>, means: &[T], stds: &[T]) -> DMatrix<T> {
    let mut result = data.clone();
    for (col, mut column) in result.column_iter_mut().enumerate() {
        for value in column.iter_mut() {
            *value = (*value - means[col]) / stds[col];
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn rejects_mismatched_columns() {
        let values = DMatrix::<f64>::zeros(3, 2);
        assert!(FeatureTable::new(names(&["a"]), values.clone()).is_err());
        assert!(FeatureTable::new(names(&["a", "a"]), values).is_err());
    }

    #[test]
    fn shared_columns_follow_own_order() {
        let t1 = FeatureTable::<f64>::new(names(&["x", "y", "z"]), DMatrix::zeros(2, 3)).unwrap();
        let t2 = FeatureTable::<f64>::new(names(&["z", "w", "x"]), DMatrix::zeros(4, 3)).unwrap();
        assert_eq!(t1.shared_columns(&t2), names(&["x", "z"]));
        let restricted = t2.select_columns(&names(&["x", "z"])).unwrap();
        assert_eq!(restricted.columns(), names(&["x", "z"]).as_slice());
    }

    #[test]
    fn standardized_columns_have_unit_sample_variance() {
        let table = FeatureTable::from_rows(
            names(&["a", "b"]),
            &[vec![1.0f64, 5.0], vec![2.0, 5.0], vec![3.0, 5.0], vec![6.0, 5.0]],
        )
        .unwrap();
        let z = table.standardized();
        let mean: f64 = z.column(0).sum() / 4.0;
        let var: f64 = z.column(0).iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / 3.0;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-12);
        assert_relative_eq!(var, 1.0, epsilon = 1e-12);
        // constant column is centred, not divided by zero
        assert!(z.column(1).iter().all(|v| *v == 0.0));
    }
}
