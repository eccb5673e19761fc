use crate::config::{FeatureWeight, NumericDistance, TargetCostConfig};
use crate::database::UnitDatabase;
use crate::types::{FeatureValue, Target, TargetContext, Unit, UnitKind};

/// Scores how well a stored unit realizes a target.
///
/// The cost is the weighted sum of per-feature distances divided by the sum of
/// configured weights. Every term is capped at `worst_case_penalty`, so the
/// result is finite for any input and 0 for a perfect match.
#[derive(Debug, Clone)]
pub struct TargetCostFunction {
    config: TargetCostConfig,
    /// Sum of the weights `cost` divides by; excludes `context_weight`.
    base_weight: f64,
    total_weight: f64,
}

impl TargetCostFunction {
    pub fn new(config: TargetCostConfig) -> Self {
        let base_weight = config.features.iter().map(|f| f.weight).sum::<f64>()
            + config.duration_weight
            + config.pitch_weight;
        let total_weight = base_weight + config.context_weight;
        Self {
            config,
            base_weight,
            total_weight,
        }
    }

    pub fn config(&self) -> &TargetCostConfig {
        &self.config
    }

    /// Target cost without neighbour context, normalized over the
    /// context-free weights only.
    pub fn cost(&self, unit: &Unit, target: &Target) -> f64 {
        if self.base_weight <= 0.0 {
            return 0.0;
        }
        self.weighted_sum(unit, target) / self.base_weight
    }

    /// Target cost including the neighbour-context term.
    pub fn cost_in_context(
        &self,
        unit: &Unit,
        context: &TargetContext<'_>,
        database: &dyn UnitDatabase,
    ) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let mut sum = self.weighted_sum(unit, context.target);
        if self.config.context_weight > 0.0 {
            sum += self.config.context_weight * self.context_distance(unit, context, database);
        }
        sum / self.total_weight
    }

    fn weighted_sum(&self, unit: &Unit, target: &Target) -> f64 {
        let mut sum = 0.0;
        for feature in &self.config.features {
            if feature.weight == 0.0 {
                continue;
            }
            let distance = self.feature_distance(
                feature,
                target.features.get(&feature.name),
                unit.features.get(&feature.name),
            );
            sum += feature.weight * distance;
        }
        if self.config.duration_weight > 0.0 {
            sum += self.config.duration_weight * self.duration_distance(unit, target);
        }
        if self.config.pitch_weight > 0.0 {
            sum += self.config.pitch_weight * self.pitch_distance(unit, target);
        }
        sum
    }

    fn feature_distance(
        &self,
        feature: &FeatureWeight,
        target_value: Option<&FeatureValue>,
        unit_value: Option<&FeatureValue>,
    ) -> f64 {
        let worst = self.config.worst_case_penalty;
        let target_value = target_value.or(feature.default.as_ref());
        let unit_value = unit_value.or(feature.default.as_ref());

        match (target_value, unit_value) {
            // The target does not constrain this feature.
            (None, _) => 0.0,
            (Some(_), None) => worst,
            (Some(FeatureValue::Category(t)), Some(FeatureValue::Category(u))) => {
                if t == u {
                    0.0
                } else {
                    self.config.mismatch_penalty.min(worst)
                }
            }
            (Some(FeatureValue::Numeric(t)), Some(FeatureValue::Numeric(u))) => {
                let d = (t - u).abs() / feature.scale;
                let d = match feature.distance {
                    NumericDistance::Absolute => d,
                    NumericDistance::Squared => d * d,
                };
                // NaN.min(worst) is worst
                d.min(worst)
            }
            _ => worst,
        }
    }

    fn duration_distance(&self, unit: &Unit, target: &Target) -> f64 {
        let worst = self.config.worst_case_penalty;
        let t = target.duration_s;
        if !t.is_finite() || t <= 0.0 {
            return 0.0;
        }
        let u = unit.duration_s;
        if !u.is_finite() || u <= 0.0 {
            return if unit.is_silence() { 0.0 } else { worst };
        }
        (t / u).ln().abs().min(worst)
    }

    /// Distance in octaves between the target's mean F0 and the unit's F0.
    fn pitch_distance(&self, unit: &Unit, target: &Target) -> f64 {
        let worst = self.config.worst_case_penalty;
        let Some(t) = target.mean_f0_hz() else {
            return 0.0;
        };
        match unit.f0_hz.filter(|f0| f0.is_finite() && *f0 > 0.0) {
            Some(u) => (t / u).log2().abs().min(worst),
            None => worst,
        }
    }

    /// Fraction of the target's neighbours that differ from the unit's recorded neighbours.
    fn context_distance(
        &self,
        unit: &Unit,
        context: &TargetContext<'_>,
        database: &dyn UnitDatabase,
    ) -> f64 {
        if !matches!(unit.kind, UnitKind::Recorded) {
            return 0.0;
        }
        let recorded_prev = unit
            .index
            .checked_sub(1)
            .and_then(|i| database.unit(i))
            .filter(|u| u.source == unit.source);
        let recorded_next = unit
            .index
            .checked_add(1)
            .and_then(|i| database.unit(i))
            .filter(|u| u.source == unit.source);

        let mut sides = 0usize;
        let mut mismatches = 0usize;
        for (wanted, recorded) in [
            (context.previous, recorded_prev),
            (context.next, recorded_next),
        ] {
            let Some(wanted) = wanted else {
                continue;
            };
            sides += 1;
            let matched = match recorded {
                Some(recorded) => recorded.symbol == wanted.symbol,
                // Recording edges are preceded/followed by silence.
                None => wanted.is_silence,
            };
            if !matched {
                mismatches += 1;
            }
        }
        if sides == 0 {
            return 0.0;
        }
        self.config.mismatch_penalty.min(self.config.worst_case_penalty) * mismatches as f64
            / sides as f64
    }
}
