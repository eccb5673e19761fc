use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::candidates::{CandidateGenerator, ViterbiCandidate};
use super::cost::{sanitize_cost, JoinCostFunction, TargetCostFunction};
use super::viterbi::{SearchOutcome, ViterbiSearch};
use crate::cancel::CancellationToken;
use crate::config::{JoinCostConfig, SelectionConfig, TargetCostConfig};
use crate::database::{resolve_unit, InMemoryDatabase, UnitDatabase};
use crate::error::SynthesisError;
use crate::types::{
    AudioFormat, Diagnostic, JoinFrame, Substitution, Target, TargetSequence, Unit, UnitKind,
    UnitRef,
};

const EPS: f64 = 1e-9;

struct Lattice {
    db: InMemoryDatabase,
    config: SelectionConfig,
}

impl Lattice {
    fn new(units: Vec<Unit>, config: SelectionConfig) -> Self {
        let mut builder = InMemoryDatabase::builder(AudioFormat::default());
        for unit in units {
            builder.add_unit(unit);
        }
        Self {
            db: builder.build().expect("database"),
            config,
        }
    }

    fn run(&self, targets: &TargetSequence) -> Result<SearchOutcome, SynthesisError> {
        self.run_with(targets, &CancellationToken::new(), usize::MAX)
    }

    fn run_with(
        &self,
        targets: &TargetSequence,
        cancel: &CancellationToken,
        parallel_min_pairs: usize,
    ) -> Result<SearchOutcome, SynthesisError> {
        let target_cost = TargetCostFunction::new(self.config.target_cost.clone());
        let join_cost = JoinCostFunction::new(self.config.join_cost.clone());
        let generator = CandidateGenerator::new(&self.db, &target_cost, &self.config);
        ViterbiSearch::new(generator, &join_cost, &self.config.search)
            .with_parallel_min_pairs(parallel_min_pairs)
            .run(targets, cancel)
    }

    /// Cheapest total over every combination of the generated candidates.
    fn brute_force(&self, targets: &TargetSequence) -> f64 {
        let target_cost = TargetCostFunction::new(self.config.target_cost.clone());
        let join_cost = JoinCostFunction::new(self.config.join_cost.clone());
        let generator = CandidateGenerator::new(&self.db, &target_cost, &self.config);
        let stages: Vec<Vec<ViterbiCandidate>> = (0..targets.len())
            .map(|i| {
                generator
                    .generate(targets, i, &mut Vec::new())
                    .expect("candidates")
                    .candidates
            })
            .collect();

        let n = stages.len();
        let mut choice = vec![0usize; n];
        let mut best = f64::INFINITY;
        loop {
            let mut score = 0.0;
            for i in 0..n {
                let candidate = stages[i][choice[i]];
                score += candidate.target_cost;
                if i > 0 {
                    let left = resolve_unit(&self.db, stages[i - 1][choice[i - 1]].unit)
                        .expect("left unit");
                    let right = resolve_unit(&self.db, candidate.unit).expect("right unit");
                    score += sanitize_cost(join_cost.cost(left, right));
                }
            }
            if score < best {
                best = score;
            }

            let mut stage = n;
            loop {
                if stage == 0 {
                    return best;
                }
                stage -= 1;
                choice[stage] += 1;
                if choice[stage] < stages[stage].len() {
                    break;
                }
                choice[stage] = 0;
            }
        }
    }
}

fn frame(cepstrum: f32) -> JoinFrame {
    JoinFrame {
        cepstrum: vec![cepstrum],
        f0_hz: 0.0,
        energy_db: 0.0,
    }
}

fn unit(symbol: &str, source: usize, duration_s: f64, left: f32, right: f32) -> Unit {
    let mut unit = Unit::new(0, symbol, source, 0.0, duration_s);
    unit.left_join = frame(left);
    unit.right_join = frame(right);
    unit
}

fn pause(source: usize, duration_s: f64) -> Unit {
    let mut unit = Unit::new(0, "_", source, 0.0, duration_s);
    unit.kind = UnitKind::Silence;
    unit
}

/// Duration-only target cost, spectral-only join cost.
fn simple_config() -> SelectionConfig {
    SelectionConfig {
        target_cost: TargetCostConfig {
            duration_weight: 1.0,
            pitch_weight: 0.0,
            ..TargetCostConfig::default()
        },
        join_cost: JoinCostConfig {
            spectral_weight: 1.0,
            f0_weight: 0.0,
            energy_weight: 0.0,
            ..JoinCostConfig::default()
        },
        ..SelectionConfig::default()
    }
}

fn stored_indices(outcome: &SearchOutcome) -> Vec<Option<usize>> {
    outcome.units.iter().map(|u| u.unit.index()).collect()
}

fn targets(symbols: &[(&str, f64)]) -> TargetSequence {
    TargetSequence::new(
        symbols
            .iter()
            .map(|&(s, d)| {
                if s == "_" {
                    Target::silence(s, d)
                } else {
                    Target::new(s, d)
                }
            })
            .collect(),
    )
}

/// 3 targets x 2 candidates; the cheapest path is not the greedy one.
fn hand_built() -> Lattice {
    Lattice::new(
        vec![
            unit("a", 0, 0.1, 0.0, 0.0),  // 0: tc 0
            unit("a", 1, 0.2, 5.0, 5.0),  // 1: tc ln2
            unit("b", 2, 0.1, 4.0, 4.0),  // 2: tc 0
            unit("b", 3, 0.05, 0.0, 0.0), // 3: tc ln2
            unit("c", 4, 0.1, 0.0, 0.0),  // 4: tc 0
            unit("c", 5, 0.2, 4.0, 4.0),  // 5: tc ln2
        ],
        simple_config(),
    )
}

#[test]
fn hand_built_lattice_matches_brute_force() {
    let lattice = hand_built();
    let targets = targets(&[("a", 0.1), ("b", 0.1), ("c", 0.1)]);
    let outcome = lattice.run(&targets).expect("search");

    // a0 b1 c0: ln2 of target cost, no join cost
    assert_eq!(stored_indices(&outcome), vec![Some(0), Some(3), Some(4)]);
    assert!((outcome.total_cost - 2.0f64.ln()).abs() < EPS);
    assert!((outcome.total_cost - lattice.brute_force(&targets)).abs() < EPS);

    let joins = outcome.units.iter().map(|u| u.join_cost).collect::<Vec<_>>();
    assert_eq!(joins, vec![0.0, 0.0, 0.0]);
    let total = outcome
        .units
        .iter()
        .map(|u| u.target_cost + u.join_cost)
        .sum::<f64>();
    assert!((total - outcome.total_cost).abs() < EPS);
}

#[test]
fn selected_units_follow_target_order() {
    let lattice = hand_built();
    let targets = targets(&[("a", 0.1), ("b", 0.1), ("c", 0.1)]);
    let outcome = lattice.run(&targets).expect("search");
    assert_eq!(outcome.units.len(), targets.len());
    for (i, selected) in outcome.units.iter().enumerate() {
        assert_eq!(selected.target_index, i);
        assert_eq!(selected.symbol, targets.get(i).expect("target").symbol);
        assert!(selected.concatenation.is_none());
    }
}

fn cat_lattice() -> Lattice {
    let units = vec![
        // take 0: a natural "_ k a t _" with off-target durations
        pause(0, 0.3),
        unit("k", 0, 0.12, 1.0, 2.0),
        unit("a", 0, 0.20, 2.5, 3.0),
        unit("t", 0, 0.04, 3.5, 1.0),
        pause(0, 0.3),
        // take 1
        unit("k", 1, 0.08, 0.0, 1.0),
        unit("a", 1, 0.15, 6.0, 6.5),
        unit("t", 1, 0.07, 2.0, 0.0),
        // take 2
        unit("a", 2, 0.14, 1.2, 2.9),
        unit("t", 2, 0.09, 3.1, 0.5),
        unit("k", 2, 0.10, 0.3, 1.1),
        pause(2, 0.2),
    ];
    Lattice::new(units, simple_config())
}

#[test]
fn cat_scenario_finds_global_minimum() {
    let lattice = cat_lattice();
    let targets = targets(&[("_", 0.2), ("k", 0.09), ("a", 0.15), ("t", 0.08), ("_", 0.2)]);
    let outcome = lattice.run(&targets).expect("search");

    assert_eq!(outcome.units.len(), 5);
    assert!((outcome.total_cost - lattice.brute_force(&targets)).abs() < EPS);
    for (selected, target) in outcome.units.iter().zip(targets.iter()) {
        let unit = resolve_unit(&lattice.db, selected.unit).expect("unit");
        assert_eq!(unit.symbol, target.symbol);
    }
    assert!(outcome.diagnostics.is_empty());
}

#[test]
fn frontier_minimum_never_decreases() {
    let lattice = cat_lattice();
    let targets = targets(&[("_", 0.2), ("k", 0.09), ("a", 0.15), ("t", 0.08), ("_", 0.2)]);
    let outcome = lattice.run(&targets).expect("search");
    let mins = &outcome.trace.stage_min_scores;
    assert_eq!(mins.len(), 5);
    assert!(mins.windows(2).all(|w| w[1] >= w[0]));
    assert_eq!(outcome.trace.candidate_counts, vec![3, 3, 3, 3, 3]);
    assert_eq!(outcome.trace.frontier_sizes, vec![3, 3, 3, 3, 3]);
    assert!((mins[4] - outcome.total_cost).abs() < EPS);
}

#[test]
fn contiguous_pair_is_preferred() {
    let lattice = Lattice::new(
        vec![
            unit("k", 0, 0.1, 0.0, 1.0),
            unit("a", 0, 0.1, 3.0, 0.0), // follows k in take 0
            unit("a", 1, 0.1, 2.0, 0.0),
        ],
        simple_config(),
    );
    let targets = targets(&[("k", 0.1), ("a", 0.1)]);
    let outcome = lattice.run(&targets).expect("search");
    assert_eq!(stored_indices(&outcome), vec![Some(0), Some(1)]);
    assert!(outcome.units[1].contiguous);
    assert_eq!(outcome.units[1].join_cost, 0.0);
    assert!(!outcome.units[0].contiguous);
}

#[test]
fn exact_ties_keep_earliest_enumerated_path() {
    let lattice = Lattice::new(
        vec![
            unit("a", 0, 0.1, 0.0, 0.0),
            unit("a", 1, 0.1, 0.0, 0.0),
            unit("b", 2, 0.1, 0.0, 0.0),
            unit("b", 3, 0.1, 0.0, 0.0),
        ],
        simple_config(),
    );
    let targets = targets(&[("a", 0.1), ("b", 0.1)]);
    let outcome = lattice.run(&targets).expect("search");
    assert_eq!(stored_indices(&outcome), vec![Some(0), Some(2)]);
    assert_eq!(outcome.total_cost, 0.0);
}

fn random_lattice(seed: u64, symbols: &[&str], per_symbol: usize) -> Lattice {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut units = Vec::new();
    for take in 0..per_symbol {
        for symbol in symbols {
            let left = rng.gen_range(-3.0f32..3.0);
            let right = rng.gen_range(-3.0f32..3.0);
            let mut u = unit(symbol, take, rng.gen_range(0.04..0.2), left, right);
            u.left_join.f0_hz = rng.gen_range(80.0f32..250.0);
            u.right_join.f0_hz = rng.gen_range(80.0f32..250.0);
            u.f0_hz = Some(rng.gen_range(80.0..250.0));
            units.push(u);
        }
    }
    let mut config = SelectionConfig::default();
    config.join_cost.energy_weight = 0.0;
    Lattice::new(units, config)
}

fn random_targets(seed: u64, symbols: &[&str], len: usize) -> TargetSequence {
    let mut rng = StdRng::seed_from_u64(seed);
    TargetSequence::new(
        (0..len)
            .map(|_| {
                let symbol = symbols[rng.gen_range(0..symbols.len())];
                Target::new(symbol, rng.gen_range(0.05..0.15))
            })
            .collect(),
    )
}

#[test]
fn thread_count_does_not_change_the_result() {
    let symbols = ["p", "a", "t", "i", "s", "n"];
    let lattice = random_lattice(7, &symbols, 40);
    let targets = random_targets(11, &symbols, 25);

    let serial = lattice.run(&targets).expect("serial search");

    let mut threaded = random_lattice(7, &symbols, 40);
    threaded.config.search.threads = 4;
    let parallel = threaded
        .run_with(&targets, &CancellationToken::new(), 1)
        .expect("parallel search");

    assert_eq!(serial.units, parallel.units);
    assert_eq!(serial.total_cost.to_bits(), parallel.total_cost.to_bits());
    assert_eq!(serial.trace, parallel.trace);

    let again = threaded
        .run_with(&targets, &CancellationToken::new(), 1)
        .expect("repeat search");
    assert_eq!(parallel.units, again.units);
}

#[test]
fn narrow_beam_keeps_one_path_per_stage() {
    let symbols = ["p", "a", "t"];
    let mut lattice = random_lattice(3, &symbols, 6);
    let targets = random_targets(5, &symbols, 6);
    let exhaustive = lattice.run(&targets).expect("exhaustive");

    lattice.config.search.beam_width = 1;
    let beamed = lattice.run(&targets).expect("beam search");
    assert_eq!(beamed.units.len(), targets.len());
    assert!(beamed.trace.frontier_sizes.iter().all(|&n| n == 1));
    assert!(beamed.total_cost >= exhaustive.total_cost - EPS);

    lattice.config.search.beam_width = 6;
    let wide = lattice.run(&targets).expect("wide beam");
    assert_eq!(wide.units, exhaustive.units);
}

#[test]
fn beam_pruning_is_deterministic() {
    let symbols = ["p", "a", "t", "s"];
    let mut lattice = random_lattice(21, &symbols, 12);
    lattice.config.search.beam_width = 3;
    let targets = random_targets(22, &symbols, 10);
    let first = lattice.run(&targets).expect("search");
    let second = lattice.run(&targets).expect("search");
    assert_eq!(first.units, second.units);
    assert!(first.trace.frontier_sizes.iter().all(|&n| n <= 3));
}

#[test]
fn small_random_lattices_match_brute_force() {
    let symbols = ["p", "a", "t"];
    for seed in 0..8u64 {
        let lattice = random_lattice(100 + seed, &symbols, 3);
        let targets = random_targets(200 + seed, &symbols, 5);
        let outcome = lattice.run(&targets).expect("search");
        let expected = lattice.brute_force(&targets);
        assert!(
            (outcome.total_cost - expected).abs() < EPS,
            "seed {seed}: viterbi {} vs brute force {expected}",
            outcome.total_cost
        );
    }
}

#[test]
fn missing_symbol_degrades_to_flagged_silence() {
    let lattice = hand_built();
    let targets = targets(&[("a", 0.1), ("zh", 0.1), ("c", 0.1)]);
    let outcome = lattice.run(&targets).expect("search");
    assert_eq!(outcome.units.len(), 3);
    assert_eq!(outcome.units[1].unit, UnitRef::Silence);
    assert_eq!(
        outcome.units[1].substitution,
        Some(Substitution::Silence {
            requested: "zh".into()
        })
    );
    assert!(outcome
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::SilenceSubstituted { target_index: 1, .. })));
}

#[test]
fn infinite_joins_fail_with_target_index() {
    let mut config = simple_config();
    config.join_cost.spectral_weight = f64::MAX;
    let lattice = Lattice::new(
        vec![unit("a", 0, 0.1, 0.0, 1.0), unit("b", 1, 0.1, 5.0, 0.0)],
        config,
    );
    let targets = targets(&[("a", 0.1), ("b", 0.1)]);
    let err = lattice.run(&targets).unwrap_err();
    assert!(matches!(err, SynthesisError::SearchFailure { target_index: 1, .. }));
}

#[test]
fn cancelled_search_stops_at_stage_boundary() {
    let lattice = hand_built();
    let targets = targets(&[("a", 0.1), ("b", 0.1), ("c", 0.1)]);
    let token = CancellationToken::new();
    token.cancel();
    let err = lattice.run_with(&targets, &token, usize::MAX).unwrap_err();
    assert!(matches!(err, SynthesisError::Cancelled { stage: 0 }));
}

#[test]
fn empty_target_sequence_is_rejected() {
    let lattice = hand_built();
    let err = lattice.run(&TargetSequence::default()).unwrap_err();
    assert!(matches!(err, SynthesisError::InvalidInput { .. }));
}

#[test]
fn database_is_left_untouched() {
    let lattice = hand_built();
    let before = lattice.db.units().to_vec();
    let targets = targets(&[("a", 0.1), ("b", 0.1), ("c", 0.1)]);
    lattice.run(&targets).expect("search");
    assert_eq!(lattice.db.units(), before.as_slice());
    assert_eq!(lattice.db.len(), 6);
}
