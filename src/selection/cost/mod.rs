mod join;
mod target;

pub use join::JoinCostFunction;
pub use target::TargetCostFunction;

/// Maps anything that is not a usable cost to `+inf` so it never wins a min-selection.
///
/// Negative finite values are clamped to 0 to keep path scores monotonic.
#[inline]
pub fn sanitize_cost(cost: f64) -> f64 {
    if cost.is_nan() || cost.is_infinite() {
        f64::INFINITY
    } else {
        cost.max(0.0)
    }
}
