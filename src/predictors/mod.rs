//! Online-learned predictors: runtime (per function/group) and transfer time
//! (per transfer-group pair). Both variants share the "grow a sample list,
//! refit every `train_every` updates" shape from `predictors.py`.

pub mod runtime;
pub mod transfer;

pub use runtime::{InputLengthPredictor, RollingAveragePredictor, RuntimePredictor};
pub use transfer::TransferPredictor;

/// Least-squares refit via the Moore-Penrose pseudoinverse, shared by both
/// predictor variants. `rows` is `samples x features`, `targets` is
/// `samples x 1`. Returns the zero vector if there are no samples yet so
/// callers never have to special-case an empty fit.
pub(crate) fn fit_least_squares(rows: &[Vec<f64>], targets: &[f64], n_features: usize) -> Vec<f64> {
    if rows.is_empty() {
        return vec![0.0; n_features];
    }

    let nrows = rows.len();
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    // nalgebra is column-major; build row-major then transpose via from_row_slice.
    let design = nalgebra::DMatrix::from_row_slice(nrows, n_features, &flat);
    let target = nalgebra::DVector::from_row_slice(targets);

    match design.clone().pseudo_inverse(1e-10) {
        Ok(pinv) => (pinv * target).iter().copied().collect(),
        Err(_) => vec![0.0; n_features],
    }
}
