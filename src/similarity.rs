use ndarray::{Array2, ArrayView1, Zip};
use num_traits::Float;

/// Pairwise similarity between two data rows. Higher means more alike.
pub trait Similarity<F>
where
    F: Float + Send + Sync,
{
    fn similarity(&self, a: &ArrayView1<F>, b: &ArrayView1<F>) -> F;
}

/// `-1 * sum((a_i - b_i)^2)`
///
///     use ndarray::arr1;
///     use affinitymesh::{NegEuclidean, Similarity};
///
///     let a = arr1(&[1., 1., 1.]);
///     let b = arr1(&[3., 3., 3.]);
///     let s: f64 = NegEuclidean::default().similarity(&a.view(), &b.view());
///     assert!((s - -12.0).abs() < 1e-8);
#[derive(Debug, Default, Clone)]
pub struct NegEuclidean;

impl<F> Similarity<F> for NegEuclidean
where
    F: Float + Send + Sync,
{
    fn similarity(&self, a: &ArrayView1<F>, b: &ArrayView1<F>) -> F {
        let mut diff = a - b;
        diff.map_inplace(|v| *v = (*v).powi(2));
        -diff.sum()
    }
}

/// `-1 * (a . b) / (|a| * |b|)`
///
///     use ndarray::arr1;
///     use affinitymesh::{NegCosine, Similarity};
///
///     let a = arr1(&[3., 2., 0., 5.]);
///     let b = arr1(&[1., 0., 0., 0.]);
///     let s: f64 = NegCosine::default().similarity(&a.view(), &b.view());
///     assert!((s - -0.4866).abs() < 1e-4);
#[derive(Debug, Default, Clone)]
pub struct NegCosine;

impl<F> Similarity<F> for NegCosine
where
    F: Float + Send + Sync,
{
    fn similarity(&self, a: &ArrayView1<F>, b: &ArrayView1<F>) -> F {
        let dot: F = Zip::from(a).and(b).map_collect(|&x, &y| x * y).sum();
        let a_magnitude = a.map(|v| v.powi(2)).sum().sqrt();
        let b_magnitude = b.map(|v| v.powi(2)).sum().sqrt();
        -(dot / a_magnitude / b_magnitude)
    }
}

/// Build the N x N similarity matrix for row data, computing each pair once
/// and mirroring across the diagonal. The diagonal is left at zero for the
/// preference to overwrite.
pub(crate) fn similarity_matrix<F, S>(x: &Array2<F>, metric: &S) -> Array2<F>
where
    F: Float + Send + Sync,
    S: Similarity<F>,
{
    let n = x.nrows();
    let mut out = Array2::<F>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let a = x.row(i);
            let b = x.row(j);
            let s = metric.similarity(&a, &b);
            out[[i, j]] = s;
            out[[j, i]] = s;
        }
    }
    out
}

#[cfg(test)]
mod test {
    use ndarray::arr2;

    use super::{similarity_matrix, NegCosine, NegEuclidean, Similarity};

    #[test]
    fn euclidean_similarity() {
        let x = arr2(&[[1., 1., 1.], [2., 2., 2.], [3., 3., 3.]]);
        let s = similarity_matrix(&x, &NegEuclidean::default());
        let actual = arr2(&[[0., -3.0, -12.0], [-3.0, 0., -3.0], [-12.0, -3.0, 0.]]);
        ndarray::Zip::from(&s)
            .and(&actual)
            .for_each(|a: &f64, b: &f64| assert!((a - b).abs() < 1e-8));
    }

    #[test]
    fn cosine_similarity() {
        let x = arr2(&[[3., 2., 0., 5.], [1., 0., 0., 0.]]);
        let a = x.row(0);
        let b = x.row(1);
        let s: f64 = NegCosine::default().similarity(&a, &b);
        assert!((s - -0.4866).abs() < 1e-4);
    }

    #[test]
    fn matrix_is_symmetric_with_zero_diagonal() {
        let x = arr2(&[[0., 0.], [3., 4.], [6., 8.]]);
        let s = similarity_matrix(&x, &NegEuclidean::default());
        for i in 0..3 {
            assert_eq!(s[[i, i]], 0.0);
            for j in 0..3 {
                assert_eq!(s[[i, j]], s[[j, i]]);
            }
        }
    }
}
