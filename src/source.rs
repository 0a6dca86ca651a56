use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use ndarray::Array2;
use num_traits::Float;
use rayon::prelude::*;

use crate::error::ApError;

/// One point's sparse similarity vectors. An absent entry means the
/// similarity is negative infinity and the pair never exchanges messages.
pub struct PointVectors<F> {
    /// s(self, k): who this point can influence.
    pub row: HashMap<usize, F>,
    /// s(k, self): who can influence this point.
    pub col: HashMap<usize, F>,
}

/// Provider of per-point sparse similarity data for shard initialization.
///
/// Implementations translate whatever the backing representation uses for
/// "no edge" into absent entries before the data reaches a dispatcher.
pub trait SimilaritySource<F>: Send + Sync + 'static
where
    F: Float,
{
    /// Total number of points in the graph.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sparse row/col vectors for every point in `range`, in index order.
    fn load_shard(&self, range: Range<usize>) -> Result<Vec<PointVectors<F>>, ApError>;
}

/// In-memory similarity matrix adapter. Non-finite entries are treated as
/// pruned edges.
#[derive(Clone)]
pub struct DenseSimilarity<F> {
    matrix: Arc<Array2<F>>,
}

impl<F> DenseSimilarity<F>
where
    F: Float,
{
    pub fn new(matrix: Array2<F>) -> Result<Self, ApError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(ApError::InvalidInput(format!(
                "similarity matrix must be square, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        Ok(Self {
            matrix: Arc::new(matrix),
        })
    }

    pub fn matrix(&self) -> &Array2<F> {
        &self.matrix
    }
}

impl<F> SimilaritySource<F> for DenseSimilarity<F>
where
    F: Float + Send + Sync + 'static,
{
    fn len(&self) -> usize {
        self.matrix.nrows()
    }

    fn load_shard(&self, range: Range<usize>) -> Result<Vec<PointVectors<F>>, ApError> {
        if range.end > self.matrix.nrows() {
            return Err(ApError::InvalidInput(format!(
                "shard range {}..{} exceeds graph size {}",
                range.start,
                range.end,
                self.matrix.nrows()
            )));
        }
        let points = range
            .into_par_iter()
            .map(|i| {
                let row = self
                    .matrix
                    .row(i)
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_finite())
                    .map(|(j, &v)| (j, v))
                    .collect();
                let col = self
                    .matrix
                    .column(i)
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_finite())
                    .map(|(j, &v)| (j, v))
                    .collect();
                PointVectors { row, col }
            })
            .collect();
        Ok(points)
    }
}
