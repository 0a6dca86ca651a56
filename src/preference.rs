use ndarray::{Array1, Array2, Zip};
use num_traits::Float;

use crate::error::ApError;

/// Preference is the value representing the degree to which a data point
/// will act as its own exemplar, with lower (more negative) values yielding
/// fewer clusters.
///
/// - Median: Use median finite similarity value as preference
/// - Value: Assign all members the same preference value
/// - List: Use provided per-point preference list
#[derive(Debug, Clone)]
pub enum Preference<F>
where
    F: Float + Send + Sync,
{
    Median,
    Value(F),
    List(Array1<F>),
}

impl<F> Preference<F>
where
    F: Float + Send + Sync,
{
    /// Overwrite the diagonal of a similarity matrix with the configured
    /// preference.
    pub fn apply(&self, s: &mut Array2<F>) -> Result<(), ApError> {
        match self {
            Preference::Median => {
                let median = median_similarity(s).ok_or_else(|| {
                    ApError::InvalidInput(
                        "median preference requires at least one finite off-diagonal similarity"
                            .to_string(),
                    )
                })?;
                s.diag_mut().par_map_inplace(|v| *v = median);
            }
            Preference::Value(preference) => {
                let preference = *preference;
                s.diag_mut().par_map_inplace(|v| *v = preference);
            }
            Preference::List(list) => {
                if list.len() != s.nrows() {
                    return Err(ApError::InvalidInput(format!(
                        "preference list has {} entries for {} points",
                        list.len(),
                        s.nrows()
                    )));
                }
                Zip::from(s.diag_mut()).and(list).for_each(|d, &p| *d = p);
            }
        }
        Ok(())
    }
}

/// Median over the finite off-diagonal entries; pruned pairs do not count.
fn median_similarity<F>(s: &Array2<F>) -> Option<F>
where
    F: Float,
{
    let mut values: Vec<F> = s
        .indexed_iter()
        .filter(|((i, j), v)| i != j && v.is_finite())
        .map(|(_, &v)| v)
        .collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / F::from(2.).unwrap()
    })
}
