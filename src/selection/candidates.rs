use crate::config::{SelectionConfig, SilencePolicy};
use crate::database::UnitDatabase;
use crate::error::SynthesisError;
use crate::selection::cost::{sanitize_cost, TargetCostFunction};
use crate::types::{Diagnostic, Substitution, TargetKind, TargetSequence, UnitRef};

/// One unit that could realize one target, with its precomputed target cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViterbiCandidate {
    pub target_index: usize,
    pub unit: UnitRef,
    pub target_cost: f64,
}

/// Ranked candidates for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct StageCandidates {
    pub target_index: usize,
    /// Ascending target cost; ties keep database index order.
    pub candidates: Vec<ViterbiCandidate>,
    pub substitution: Option<Substitution>,
}

/// Looks up, scores and ranks the candidates of a target.
pub struct CandidateGenerator<'a> {
    database: &'a dyn UnitDatabase,
    target_cost: &'a TargetCostFunction,
    config: &'a SelectionConfig,
}

impl<'a> CandidateGenerator<'a> {
    pub fn new(
        database: &'a dyn UnitDatabase,
        target_cost: &'a TargetCostFunction,
        config: &'a SelectionConfig,
    ) -> Self {
        Self {
            database,
            target_cost,
            config,
        }
    }

    pub fn database(&self) -> &'a dyn UnitDatabase {
        self.database
    }

    /// Never returns an empty list: a symbol without units falls back to its
    /// backoff classes, then to generated silence when allowed.
    pub fn generate(
        &self,
        targets: &TargetSequence,
        target_index: usize,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<StageCandidates, SynthesisError> {
        let context = targets.context(target_index).ok_or_else(|| {
            SynthesisError::search_failure(target_index, "target index out of range")
        })?;
        let target = context.target;

        if target.is_silence && self.config.silence.policy == SilencePolicy::Generated {
            return Ok(StageCandidates {
                target_index,
                candidates: vec![self.placeholder(target_index, 0.0)],
                substitution: None,
            });
        }

        let wanted = target.kind.unit_symbol(&target.symbol);
        let Some((symbol, unit_indices)) = self.lookup(&target.symbol, target.kind) else {
            // A pause needs no recorded audio; generated silence is a full match.
            if target.is_silence {
                tracing::debug!(
                    target_index,
                    symbol = target.symbol.as_str(),
                    "candidates: no stored pause, using generated silence"
                );
                return Ok(StageCandidates {
                    target_index,
                    candidates: vec![self.placeholder(target_index, 0.0)],
                    substitution: None,
                });
            }
            if !self.config.silence.substitute_missing {
                return Err(SynthesisError::search_failure(
                    target_index,
                    format!(
                        "no units for symbol '{}' or any of its backoff classes",
                        target.symbol
                    ),
                ));
            }
            tracing::warn!(
                target_index,
                symbol = target.symbol.as_str(),
                "candidates: no units for symbol, substituting silence"
            );
            diagnostics.push(Diagnostic::SilenceSubstituted {
                target_index,
                requested: target.symbol.clone(),
            });
            let cost = self.target_cost.config().worst_case_penalty;
            return Ok(StageCandidates {
                target_index,
                candidates: vec![self.placeholder(target_index, cost)],
                substitution: Some(Substitution::Silence {
                    requested: target.symbol.clone(),
                }),
            });
        };

        let substitution = if symbol != wanted {
            tracing::warn!(
                target_index,
                requested = target.symbol.as_str(),
                used = symbol.as_str(),
                "candidates: symbol backed off"
            );
            diagnostics.push(Diagnostic::SymbolBackoff {
                target_index,
                requested: target.symbol.clone(),
                used: symbol.clone(),
            });
            Some(Substitution::Backoff {
                requested: target.symbol.clone(),
                used: symbol.clone(),
            })
        } else {
            None
        };

        let mut candidates = Vec::with_capacity(unit_indices.len());
        for &unit_index in unit_indices {
            let Some(unit) = self.database.unit(unit_index) else {
                tracing::warn!(
                    target_index,
                    unit_index,
                    "candidates: database lists a unit it cannot resolve"
                );
                continue;
            };
            let cost = sanitize_cost(self.target_cost.cost_in_context(
                unit,
                &context,
                self.database,
            ));
            if !cost.is_finite() {
                tracing::warn!(
                    target_index,
                    unit_index,
                    "candidates: non-finite target cost, candidate dropped"
                );
                diagnostics.push(Diagnostic::NonFiniteTargetCost {
                    target_index,
                    unit_index,
                });
                continue;
            }
            candidates.push(ViterbiCandidate {
                target_index,
                unit: UnitRef::Stored(unit_index),
                target_cost: cost,
            });
        }

        if candidates.is_empty() {
            return Err(SynthesisError::search_failure(
                target_index,
                format!("no candidate for '{symbol}' could be scored"),
            ));
        }

        candidates.sort_by(|a, b| a.target_cost.total_cmp(&b.target_cost));
        let max_candidates = self.config.search.max_candidates;
        if max_candidates > 0 && candidates.len() > max_candidates {
            candidates.truncate(max_candidates);
        }

        tracing::debug!(
            target_index,
            symbol = symbol.as_str(),
            available = unit_indices.len(),
            kept = candidates.len(),
            best_target_cost = candidates[0].target_cost,
            "candidates: ranked"
        );

        Ok(StageCandidates {
            target_index,
            candidates,
            substitution,
        })
    }

    /// Exact symbol first, then the configured backoff classes in order.
    ///
    /// Backoff classes are keyed by the bare symbol and qualified with the
    /// target kind the same way the exact symbol is.
    fn lookup(&self, symbol: &str, kind: TargetKind) -> Option<(String, &'a [usize])> {
        let exact = kind.unit_symbol(symbol);
        let units = self.database.units_for(&exact);
        if !units.is_empty() {
            return Some((exact.into_owned(), units));
        }
        self.config
            .backoff
            .get(symbol)?
            .iter()
            .map(|alt| kind.unit_symbol(alt).into_owned())
            .map(|alt| {
                let units = self.database.units_for(&alt);
                (alt, units)
            })
            .find(|(_, units)| !units.is_empty())
    }

    fn placeholder(&self, target_index: usize, target_cost: f64) -> ViterbiCandidate {
        ViterbiCandidate {
            target_index,
            unit: UnitRef::Silence,
            target_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureWeight, TargetCostConfig};
    use crate::database::InMemoryDatabase;
    use crate::types::{AudioFormat, HalfPhoneSide, Target, Unit};

    fn database() -> InMemoryDatabase {
        InMemoryDatabase::builder(AudioFormat::default())
            .with_unit(Unit::new(0, "a", 0, 0.0, 0.10))
            .with_unit(Unit::new(0, "a", 0, 0.1, 0.20))
            .with_unit(Unit::new(0, "a", 0, 0.3, 0.05))
            .with_unit(Unit::new(0, "s", 0, 0.4, 0.10))
            .with_unit(Unit::new(0, "a", 0, 0.5, 0.20))
            .build()
            .expect("database")
    }

    fn duration_only() -> TargetCostFunction {
        TargetCostFunction::new(TargetCostConfig {
            duration_weight: 1.0,
            pitch_weight: 0.0,
            ..TargetCostConfig::default()
        })
    }

    #[test]
    fn candidates_are_ranked_by_cost_with_index_tie_break() {
        let db = database();
        let cost = duration_only();
        let config = SelectionConfig::default();
        let generator = CandidateGenerator::new(&db, &cost, &config);
        let targets = TargetSequence::new(vec![Target::new("a", 0.2)]);
        let mut diagnostics = Vec::new();
        let stage = generator.generate(&targets, 0, &mut diagnostics).expect("candidates");
        let order = stage
            .candidates
            .iter()
            .map(|c| c.unit.index().expect("stored"))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![1, 4, 0, 2]);
        assert_eq!(stage.candidates[0].target_cost, 0.0);
        assert!(stage.substitution.is_none());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn max_candidates_truncates_after_ranking() {
        let db = database();
        let cost = duration_only();
        let mut config = SelectionConfig::default();
        config.search.max_candidates = 2;
        let generator = CandidateGenerator::new(&db, &cost, &config);
        let targets = TargetSequence::new(vec![Target::new("a", 0.2)]);
        let stage = generator.generate(&targets, 0, &mut Vec::new()).expect("candidates");
        assert_eq!(stage.candidates.len(), 2);
        assert_eq!(stage.candidates[1].unit, UnitRef::Stored(4));
    }

    #[test]
    fn missing_symbol_uses_backoff_class() {
        let db = database();
        let cost = duration_only();
        let mut config = SelectionConfig::default();
        config.backoff.insert("z".into(), vec!["zh".into(), "s".into()]);
        let generator = CandidateGenerator::new(&db, &cost, &config);
        let targets = TargetSequence::new(vec![Target::new("z", 0.1)]);
        let mut diagnostics = Vec::new();
        let stage = generator.generate(&targets, 0, &mut diagnostics).expect("candidates");
        assert_eq!(stage.candidates.len(), 1);
        assert_eq!(stage.candidates[0].unit, UnitRef::Stored(3));
        assert_eq!(
            stage.substitution,
            Some(Substitution::Backoff {
                requested: "z".into(),
                used: "s".into()
            })
        );
        assert_eq!(
            diagnostics,
            vec![Diagnostic::SymbolBackoff {
                target_index: 0,
                requested: "z".into(),
                used: "s".into()
            }]
        );
    }

    #[test]
    fn half_phone_targets_look_up_their_side() {
        let db = InMemoryDatabase::builder(AudioFormat::default())
            .with_unit(Unit::new(0, "a_L", 0, 0.0, 0.05))
            .with_unit(Unit::new(0, "a_R", 0, 0.05, 0.05))
            .with_unit(Unit::new(0, "e_R", 1, 0.0, 0.05))
            .build()
            .expect("database");
        let cost = duration_only();
        let mut config = SelectionConfig::default();
        config.backoff.insert("i".into(), vec!["e".into()]);
        let generator = CandidateGenerator::new(&db, &cost, &config);
        let targets = TargetSequence::new(vec![
            Target::new("a", 0.05).with_kind(TargetKind::HalfPhone(HalfPhoneSide::Right)),
            Target::new("i", 0.05).with_kind(TargetKind::HalfPhone(HalfPhoneSide::Right)),
        ]);
        let mut diagnostics = Vec::new();
        let right = generator.generate(&targets, 0, &mut diagnostics).expect("candidates");
        assert_eq!(right.candidates[0].unit, UnitRef::Stored(1));
        assert!(right.substitution.is_none());

        let backed_off = generator.generate(&targets, 1, &mut diagnostics).expect("candidates");
        assert_eq!(backed_off.candidates[0].unit, UnitRef::Stored(2));
        assert_eq!(
            backed_off.substitution,
            Some(Substitution::Backoff {
                requested: "i".into(),
                used: "e_R".into()
            })
        );
    }

    #[test]
    fn missing_symbol_substitutes_silence() {
        let db = database();
        let cost = duration_only();
        let config = SelectionConfig::default();
        let generator = CandidateGenerator::new(&db, &cost, &config);
        let targets = TargetSequence::new(vec![Target::new("a", 0.1), Target::new("q", 0.1)]);
        let mut diagnostics = Vec::new();
        let stage = generator.generate(&targets, 1, &mut diagnostics).expect("candidates");
        assert_eq!(stage.candidates.len(), 1);
        assert_eq!(stage.candidates[0].unit, UnitRef::Silence);
        assert_eq!(
            stage.candidates[0].target_cost,
            TargetCostConfig::DEFAULT_WORST_CASE_PENALTY
        );
        assert!(matches!(
            diagnostics.as_slice(),
            [Diagnostic::SilenceSubstituted { target_index: 1, .. }]
        ));
    }

    #[test]
    fn silence_target_without_stored_pause_is_not_a_substitution() {
        let db = database();
        let cost = duration_only();
        let mut config = SelectionConfig::default();
        config.silence.substitute_missing = false;
        let generator = CandidateGenerator::new(&db, &cost, &config);
        let targets = TargetSequence::new(vec![Target::silence("pau", 0.2), Target::new("a", 0.1)]);
        let mut diagnostics = Vec::new();
        let stage = generator.generate(&targets, 0, &mut diagnostics).expect("candidates");
        assert_eq!(stage.candidates.len(), 1);
        assert_eq!(stage.candidates[0].unit, UnitRef::Silence);
        assert_eq!(stage.candidates[0].target_cost, 0.0);
        assert_eq!(stage.substitution, None);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn missing_symbol_without_substitution_fails_with_index() {
        let db = database();
        let cost = duration_only();
        let mut config = SelectionConfig::default();
        config.silence.substitute_missing = false;
        let generator = CandidateGenerator::new(&db, &cost, &config);
        let targets = TargetSequence::new(vec![Target::new("a", 0.1), Target::new("q", 0.1)]);
        let err = generator.generate(&targets, 1, &mut Vec::new()).unwrap_err();
        assert_eq!(err.target_index(), Some(1));
    }

    #[test]
    fn generated_silence_policy_skips_database() {
        let db = database();
        let cost = duration_only();
        let mut config = SelectionConfig::default();
        config.silence.policy = SilencePolicy::Generated;
        let generator = CandidateGenerator::new(&db, &cost, &config);
        let targets = TargetSequence::new(vec![Target::silence("a", 0.2)]);
        let mut diagnostics = Vec::new();
        let stage = generator.generate(&targets, 0, &mut diagnostics).expect("candidates");
        assert_eq!(
            stage.candidates,
            vec![ViterbiCandidate {
                target_index: 0,
                unit: UnitRef::Silence,
                target_cost: 0.0
            }]
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn overflowing_costs_are_dropped_and_reported() {
        let db = database();
        // weight overflow: inf / inf
        let cost = TargetCostFunction::new(TargetCostConfig {
            features: vec![FeatureWeight::new("stress", f64::MAX)],
            duration_weight: f64::MAX,
            pitch_weight: 0.0,
            ..TargetCostConfig::default()
        });
        let config = SelectionConfig::default();
        let generator = CandidateGenerator::new(&db, &cost, &config);
        let targets = TargetSequence::new(vec![Target::new("a", 0.2).with_feature("stress", 1.0)]);
        let mut diagnostics = Vec::new();
        let err = generator.generate(&targets, 0, &mut diagnostics).unwrap_err();
        assert_eq!(err.target_index(), Some(0));
        assert_eq!(diagnostics.len(), 4);
        assert!(diagnostics
            .iter()
            .all(|d| matches!(d, Diagnostic::NonFiniteTargetCost { target_index: 0, .. })));
    }
}
