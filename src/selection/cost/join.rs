use crate::config::JoinCostConfig;
use crate::types::{JoinFrame, Unit};

/// Decibels of energy step that count as one unit of energy distance.
const ENERGY_DB_PER_UNIT: f64 = 10.0;

/// Scores the acoustic discontinuity of playing `right` directly after `left`.
///
/// Order matters: the right edge of `left` is compared with the left edge of
/// `right`. Units that follow each other in the same recording get
/// `contiguous_cost` regardless of their frames; joins involving silence are free.
#[derive(Debug, Clone)]
pub struct JoinCostFunction {
    config: JoinCostConfig,
}

impl JoinCostFunction {
    pub fn new(config: JoinCostConfig) -> Self {
        Self { config }
    }

    pub fn cost(&self, left: &Unit, right: &Unit) -> f64 {
        if left.is_silence() || right.is_silence() {
            return 0.0;
        }
        if left.is_contiguous_with(right) {
            return self.config.contiguous_cost;
        }

        let worst = self.config.worst_case_penalty;
        let a = &left.right_join;
        let b = &right.left_join;
        self.config.spectral_weight * spectral_distance(a, b).unwrap_or(worst).min(worst)
            + self.config.f0_weight * self.f0_distance(a, b).min(worst)
            + self.config.energy_weight * energy_distance(a, b).min(worst)
    }

    fn f0_distance(&self, a: &JoinFrame, b: &JoinFrame) -> f64 {
        match (a.is_voiced(), b.is_voiced()) {
            (true, true) => (a.f0_hz as f64 / b.f0_hz as f64).log2().abs(),
            (false, false) => 0.0,
            _ => self.config.voicing_mismatch_penalty,
        }
    }
}

/// RMS difference of the boundary cepstra; `None` when the dimensions disagree.
fn spectral_distance(a: &JoinFrame, b: &JoinFrame) -> Option<f64> {
    if a.cepstrum.len() != b.cepstrum.len() {
        return None;
    }
    if a.cepstrum.is_empty() {
        return Some(0.0);
    }
    let sum_sq = a
        .cepstrum
        .iter()
        .zip(&b.cepstrum)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>();
    Some((sum_sq / a.cepstrum.len() as f64).sqrt())
}

fn energy_distance(a: &JoinFrame, b: &JoinFrame) -> f64 {
    (a.energy_db as f64 - b.energy_db as f64).abs() / ENERGY_DB_PER_UNIT
}
