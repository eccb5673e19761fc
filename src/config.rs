use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SynthesisError;
use crate::types::FeatureValue;

/// Everything the cost functions, the search and the concatenator are tuned by.
///
/// Passed explicitly at construction time. Every field has a default, so a
/// partial JSON document is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub target_cost: TargetCostConfig,
    pub join_cost: JoinCostConfig,
    pub search: SearchConfig,
    pub silence: SilenceConfig,
    /// Symbol -> ordered substitutes tried when the database has no unit for the symbol.
    pub backoff: BTreeMap<String, Vec<String>>,
    pub concatenation: ConcatenationConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericDistance {
    #[default]
    Absolute,
    Squared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeight {
    pub name: String,
    pub weight: f64,
    /// Substituted when the target or the unit lacks the feature.
    #[serde(default)]
    pub default: Option<FeatureValue>,
    /// Numeric differences are divided by this before weighting.
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub distance: NumericDistance,
}

impl FeatureWeight {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
            default: None,
            scale: default_scale(),
            distance: NumericDistance::Absolute,
        }
    }

    pub fn with_default(mut self, default: impl Into<FeatureValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_distance(mut self, distance: NumericDistance) -> Self {
        self.distance = distance;
        self
    }
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetCostConfig {
    pub features: Vec<FeatureWeight>,
    pub duration_weight: f64,
    pub pitch_weight: f64,
    /// Penalizes candidates whose recorded neighbours differ from the target's neighbours.
    pub context_weight: f64,
    pub mismatch_penalty: f64,
    pub worst_case_penalty: f64,
}

impl TargetCostConfig {
    pub const DEFAULT_MISMATCH_PENALTY: f64 = 1.0;
    pub const DEFAULT_WORST_CASE_PENALTY: f64 = 10.0;
}

impl Default for TargetCostConfig {
    fn default() -> Self {
        Self {
            features: Vec::new(),
            duration_weight: 1.0,
            pitch_weight: 1.0,
            context_weight: 0.0,
            mismatch_penalty: Self::DEFAULT_MISMATCH_PENALTY,
            worst_case_penalty: Self::DEFAULT_WORST_CASE_PENALTY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinCostConfig {
    pub spectral_weight: f64,
    pub f0_weight: f64,
    pub energy_weight: f64,
    pub voicing_mismatch_penalty: f64,
    /// Cost of joining two units that are adjacent in the same recording.
    pub contiguous_cost: f64,
    pub worst_case_penalty: f64,
}

impl Default for JoinCostConfig {
    fn default() -> Self {
        Self {
            spectral_weight: 1.0,
            f0_weight: 1.0,
            energy_weight: 0.5,
            voicing_mismatch_penalty: 1.0,
            contiguous_cost: 0.0,
            worst_case_penalty: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Paths kept per stage; 0 keeps every path (exhaustive search).
    pub beam_width: usize,
    /// Candidates kept per target after ranking by target cost; 0 keeps all.
    pub max_candidates: usize,
    /// Workers scoring candidates within one stage.
    pub threads: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            beam_width: 0,
            max_candidates: 0,
            threads: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilencePolicy {
    /// Silence targets are searched in the database like any other symbol.
    #[default]
    Database,
    /// Silence targets are filled with generated silence and never searched.
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    pub policy: SilencePolicy,
    /// Use generated silence when a symbol and all its backoffs have no units.
    pub substitute_missing: bool,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            policy: SilencePolicy::Database,
            substitute_missing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcatenationConfig {
    pub base_crossfade_ms: f64,
    /// Extra cross-fade per unit of join cost.
    pub crossfade_ms_per_cost: f64,
    pub max_crossfade_ms: f64,
    /// Fade the left unit's recording continuation out under the right unit.
    pub use_right_context: bool,
}

impl Default for ConcatenationConfig {
    fn default() -> Self {
        Self {
            base_crossfade_ms: 5.0,
            crossfade_ms_per_cost: 5.0,
            max_crossfade_ms: 20.0,
            use_right_context: true,
        }
    }
}

impl SelectionConfig {
    pub fn load(path: &Path) -> Result<Self, SynthesisError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| SynthesisError::io("read selection config", e))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| SynthesisError::json("parse selection config", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SynthesisError> {
        let tc = &self.target_cost;
        let mut seen = HashSet::new();
        for feature in &tc.features {
            if feature.name.trim().is_empty() {
                return Err(SynthesisError::invalid_config(
                    "target_cost.features contains an empty feature name",
                ));
            }
            if !seen.insert(feature.name.as_str()) {
                return Err(SynthesisError::invalid_config(format!(
                    "target_cost.features lists '{}' more than once",
                    feature.name
                )));
            }
            check_weight(&format!("target_cost.features.{}.weight", feature.name), feature.weight)?;
            if !feature.scale.is_finite() || feature.scale <= 0.0 {
                return Err(SynthesisError::invalid_config(format!(
                    "target_cost.features.{}.scale must be a positive number, got {}",
                    feature.name, feature.scale
                )));
            }
            if let Some(FeatureValue::Numeric(v)) = &feature.default {
                if !v.is_finite() {
                    return Err(SynthesisError::invalid_config(format!(
                        "target_cost.features.{}.default must be finite",
                        feature.name
                    )));
                }
            }
        }
        check_weight("target_cost.duration_weight", tc.duration_weight)?;
        check_weight("target_cost.pitch_weight", tc.pitch_weight)?;
        check_weight("target_cost.context_weight", tc.context_weight)?;
        check_weight("target_cost.mismatch_penalty", tc.mismatch_penalty)?;
        check_weight("target_cost.worst_case_penalty", tc.worst_case_penalty)?;

        let jc = &self.join_cost;
        check_weight("join_cost.spectral_weight", jc.spectral_weight)?;
        check_weight("join_cost.f0_weight", jc.f0_weight)?;
        check_weight("join_cost.energy_weight", jc.energy_weight)?;
        check_weight("join_cost.voicing_mismatch_penalty", jc.voicing_mismatch_penalty)?;
        check_weight("join_cost.contiguous_cost", jc.contiguous_cost)?;
        check_weight("join_cost.worst_case_penalty", jc.worst_case_penalty)?;

        if self.search.threads == 0 {
            return Err(SynthesisError::invalid_config("search.threads must be >= 1"));
        }

        for (symbol, substitutes) in &self.backoff {
            if substitutes.iter().any(|s| s == symbol) {
                return Err(SynthesisError::invalid_config(format!(
                    "backoff for '{symbol}' lists the symbol itself"
                )));
            }
        }

        let cc = &self.concatenation;
        check_weight("concatenation.base_crossfade_ms", cc.base_crossfade_ms)?;
        check_weight("concatenation.crossfade_ms_per_cost", cc.crossfade_ms_per_cost)?;
        check_weight("concatenation.max_crossfade_ms", cc.max_crossfade_ms)?;
        if cc.max_crossfade_ms < cc.base_crossfade_ms {
            return Err(SynthesisError::invalid_config(format!(
                "concatenation.max_crossfade_ms ({}) is below base_crossfade_ms ({})",
                cc.max_crossfade_ms, cc.base_crossfade_ms
            )));
        }
        Ok(())
    }
}

fn check_weight(name: &str, value: f64) -> Result<(), SynthesisError> {
    if value.is_finite() && value >= 0.0 {
        return Ok(());
    }
    Err(SynthesisError::invalid_config(format!(
        "{name} must be a finite, non-negative number, got {value}"
    )))
}
