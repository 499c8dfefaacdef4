use super::error::{PipelineError, PipelineResult};

/// Normalise a provider vector to the store's fixed width.
///
/// Narrower vectors are right-padded with exact zeros. Wider vectors are
/// rejected with [`PipelineError::DimensionMismatch`]: truncating would
/// silently change distances, so an over-wide provider is treated as a
/// configuration error.
pub fn adapt(mut vector: Vec<f32>, target: usize) -> PipelineResult<Vec<f32>> {
    let native = vector.len();
    if native > target {
        return Err(PipelineError::DimensionMismatch { native, target });
    }
    vector.resize(target, 0.0);
    Ok(vector)
}

/// Returns `true` when every value past `native` is exactly zero.
pub fn padding_is_zero(vector: &[f32], native: usize) -> bool {
    vector.iter().skip(native).all(|v| *v == 0.0)
}
