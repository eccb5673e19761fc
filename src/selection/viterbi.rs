use std::cmp::Ordering;
use std::thread;

use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::config::SearchConfig;
use crate::database::{resolve_unit, UnitDatabase};
use crate::error::SynthesisError;
use crate::selection::candidates::{CandidateGenerator, ViterbiCandidate};
use crate::selection::cost::{sanitize_cost, JoinCostFunction};
use crate::types::{Diagnostic, SelectedUnit, Substitution, TargetSequence};

/// Below this many (previous path × candidate) pairs a stage is scored on the
/// calling thread; spawning workers costs more than it saves.
const PARALLEL_MIN_PAIRS: usize = 4_096;

/// Index of a node in the per-call path arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PathId(usize);

/// One node of the search lattice.
///
/// `previous` is set during the forward pass; `next` only after backtracking.
#[derive(Debug, Clone)]
struct ViterbiPath {
    score: f64,
    /// Join cost of the edge from `previous`; 0 at the first stage.
    join_cost: f64,
    previous: Option<PathId>,
    next: Option<PathId>,
    candidate: ViterbiCandidate,
}

/// Request-scoped node storage; dropping it tears down the whole lattice.
#[derive(Debug, Default)]
struct PathArena {
    nodes: Vec<ViterbiPath>,
}

impl PathArena {
    fn push(&mut self, node: ViterbiPath) -> PathId {
        self.nodes.push(node);
        PathId(self.nodes.len() - 1)
    }

    fn get(&self, id: PathId) -> &ViterbiPath {
        &self.nodes[id.0]
    }

    fn get_mut(&mut self, id: PathId) -> &mut ViterbiPath {
        &mut self.nodes[id.0]
    }
}

/// Best way found to reach one candidate of the current stage.
#[derive(Debug, Clone, Copy)]
struct Transition {
    score: f64,
    join_cost: f64,
    previous: Option<PathId>,
}

/// Per-stage statistics of one search.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchTrace {
    pub candidate_counts: Vec<usize>,
    /// Paths kept after pruning.
    pub frontier_sizes: Vec<usize>,
    pub stage_min_scores: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub units: Vec<SelectedUnit>,
    pub total_cost: f64,
    pub trace: SearchTrace,
    pub diagnostics: Vec<Diagnostic>,
}

/// Dynamic-programming search for the cheapest unit sequence.
///
/// Stages are processed in target order. Within a stage every candidate keeps
/// only its cheapest predecessor; on exact ties the predecessor that comes
/// first in the previous frontier wins. Frontiers are kept in candidate
/// enumeration order (ascending target cost, then database index), so results
/// depend only on the input, never on the number of worker threads.
pub struct ViterbiSearch<'a> {
    generator: CandidateGenerator<'a>,
    join_cost: &'a JoinCostFunction,
    beam_width: usize,
    threads: usize,
    parallel_min_pairs: usize,
}

impl<'a> ViterbiSearch<'a> {
    pub fn new(
        generator: CandidateGenerator<'a>,
        join_cost: &'a JoinCostFunction,
        search: &SearchConfig,
    ) -> Self {
        Self {
            generator,
            join_cost,
            beam_width: search.beam_width,
            threads: search.threads.max(1),
            parallel_min_pairs: PARALLEL_MIN_PAIRS,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_parallel_min_pairs(mut self, pairs: usize) -> Self {
        self.parallel_min_pairs = pairs;
        self
    }

    pub fn run(
        &self,
        targets: &TargetSequence,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, SynthesisError> {
        if targets.is_empty() {
            return Err(SynthesisError::invalid_input("target sequence is empty"));
        }

        let mut arena = PathArena::default();
        let mut frontier: Vec<PathId> = Vec::new();
        let mut trace = SearchTrace::default();
        let mut diagnostics = Vec::new();
        let mut substitutions: Vec<Option<Substitution>> = Vec::with_capacity(targets.len());

        for stage in 0..targets.len() {
            if cancel.is_cancelled() {
                tracing::debug!(stage, "viterbi: cancelled at stage boundary");
                return Err(SynthesisError::Cancelled { stage });
            }

            let stage_candidates = self.generator.generate(targets, stage, &mut diagnostics)?;
            let candidates = stage_candidates.candidates;
            substitutions.push(stage_candidates.substitution);
            trace.candidate_counts.push(candidates.len());

            let transitions = if stage == 0 {
                candidates
                    .iter()
                    .map(|c| {
                        Some(Transition {
                            score: c.target_cost,
                            join_cost: 0.0,
                            previous: None,
                        })
                    })
                    .collect::<Vec<_>>()
            } else {
                let (transitions, non_finite_joins) =
                    self.score_stage(stage, &arena, &frontier, &candidates)?;
                if non_finite_joins > 0 {
                    tracing::warn!(
                        stage,
                        count = non_finite_joins,
                        "viterbi: non-finite join costs excluded"
                    );
                    diagnostics.push(Diagnostic::NonFiniteJoinCosts {
                        target_index: stage,
                        count: non_finite_joins,
                    });
                }
                transitions
            };

            let mut survivors = transitions
                .into_iter()
                .enumerate()
                .filter_map(|(position, t)| t.filter(|t| t.score.is_finite()).map(|t| (position, t)))
                .collect::<Vec<_>>();
            if survivors.is_empty() {
                return Err(SynthesisError::search_failure(
                    stage,
                    "every path reaching this target has non-finite cost",
                ));
            }
            self.prune(&mut survivors);

            let mut stage_min = f64::INFINITY;
            frontier = survivors
                .into_iter()
                .map(|(position, t)| {
                    stage_min = stage_min.min(t.score);
                    arena.push(ViterbiPath {
                        score: t.score,
                        join_cost: t.join_cost,
                        previous: t.previous,
                        next: None,
                        candidate: candidates[position],
                    })
                })
                .collect();
            trace.frontier_sizes.push(frontier.len());
            trace.stage_min_scores.push(stage_min);

            tracing::debug!(
                stage,
                candidates = candidates.len(),
                frontier = frontier.len(),
                min_score = stage_min,
                "viterbi: stage complete"
            );
        }

        let best = best_path(&arena, &frontier).ok_or_else(|| {
            SynthesisError::search_failure(targets.len() - 1, "final frontier is empty")
        })?;
        let path = backtrack(&mut arena, best);
        if path.len() != targets.len() {
            return Err(SynthesisError::search_failure(
                targets.len() - 1,
                format!(
                    "backtracked path has {} nodes for {} targets",
                    path.len(),
                    targets.len()
                ),
            ));
        }

        let total_cost = arena.get(best).score;
        let units = self.materialize(targets, &path, substitutions);
        tracing::debug!(
            targets = targets.len(),
            total_cost,
            lattice_nodes = arena.nodes.len(),
            "viterbi: best path selected"
        );

        Ok(SearchOutcome {
            units,
            total_cost,
            trace,
            diagnostics,
        })
    }

    /// Finds the best predecessor for every candidate of `stage`.
    ///
    /// Returns one entry per candidate (`None` when no finite path reaches it)
    /// and the number of non-finite join costs met.
    fn score_stage(
        &self,
        stage: usize,
        arena: &PathArena,
        frontier: &[PathId],
        candidates: &[ViterbiCandidate],
    ) -> Result<(Vec<Option<Transition>>, usize), SynthesisError> {
        let pairs = frontier.len().saturating_mul(candidates.len());
        if self.threads <= 1 || candidates.len() < 2 || pairs < self.parallel_min_pairs {
            return Ok(self.score_candidates(arena, frontier, candidates));
        }

        let chunk_len = candidates.len().div_ceil(self.threads);
        let results = thread::scope(|scope| {
            let workers = candidates
                .chunks(chunk_len)
                .map(|chunk| scope.spawn(move || self.score_candidates(arena, frontier, chunk)))
                .collect::<Vec<_>>();
            // Joined in chunk order, so the reduction never depends on scheduling.
            workers
                .into_iter()
                .map(|worker| worker.join())
                .collect::<Vec<_>>()
        });

        let mut transitions = Vec::with_capacity(candidates.len());
        let mut non_finite = 0usize;
        for result in results {
            let (chunk, count) = result.map_err(|_| {
                SynthesisError::search_failure(stage, "candidate scoring worker panicked")
            })?;
            transitions.extend(chunk);
            non_finite += count;
        }
        Ok((transitions, non_finite))
    }

    fn score_candidates(
        &self,
        arena: &PathArena,
        frontier: &[PathId],
        candidates: &[ViterbiCandidate],
    ) -> (Vec<Option<Transition>>, usize) {
        let database = self.generator.database();
        let mut non_finite = 0usize;
        let transitions = candidates
            .iter()
            .map(|candidate| {
                let right = resolve_unit(database, candidate.unit)?;
                let mut best: Option<Transition> = None;
                for &id in frontier {
                    let path = arena.get(id);
                    let Some(left) = resolve_unit(database, path.candidate.unit) else {
                        continue;
                    };
                    let join_cost = sanitize_cost(self.join_cost.cost(left, right));
                    if !join_cost.is_finite() {
                        non_finite += 1;
                        continue;
                    }
                    let score = path.score + join_cost + candidate.target_cost;
                    if !score.is_finite() {
                        continue;
                    }
                    // strict: the earlier predecessor keeps exact ties
                    if best.map_or(true, |b| score < b.score) {
                        best = Some(Transition {
                            score,
                            join_cost,
                            previous: Some(id),
                        });
                    }
                }
                best
            })
            .collect();
        (transitions, non_finite)
    }

    /// Keeps the `beam_width` cheapest paths, ties resolved by position, in enumeration order.
    fn prune(&self, survivors: &mut Vec<(usize, Transition)>) {
        if self.beam_width == 0 || survivors.len() <= self.beam_width {
            return;
        }
        survivors.sort_by(|a, b| compare_score(a.1.score, b.1.score).then(a.0.cmp(&b.0)));
        survivors.truncate(self.beam_width);
        survivors.sort_by_key(|(position, _)| *position);
    }

    fn materialize(
        &self,
        targets: &TargetSequence,
        path: &[ViterbiPath],
        substitutions: Vec<Option<Substitution>>,
    ) -> Vec<SelectedUnit> {
        let database: &dyn UnitDatabase = self.generator.database();
        let mut units = Vec::with_capacity(path.len());
        for (i, (node, substitution)) in path.iter().zip(substitutions).enumerate() {
            let candidate = node.candidate;
            let contiguous = i > 0
                && match (
                    resolve_unit(database, path[i - 1].candidate.unit),
                    resolve_unit(database, candidate.unit),
                ) {
                    (Some(left), Some(right)) => left.is_contiguous_with(right),
                    _ => false,
                };
            units.push(SelectedUnit {
                target_index: candidate.target_index,
                symbol: targets
                    .get(candidate.target_index)
                    .map(|t| t.symbol.clone())
                    .unwrap_or_default(),
                unit: candidate.unit,
                target_cost: candidate.target_cost,
                join_cost: node.join_cost,
                contiguous,
                substitution,
                concatenation: None,
            });
        }
        units
    }
}

fn compare_score(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

/// Lowest score in the frontier; the first one wins exact ties.
fn best_path(arena: &PathArena, frontier: &[PathId]) -> Option<PathId> {
    let mut best: Option<PathId> = None;
    for &id in frontier {
        let replace = match best {
            None => true,
            Some(current) => arena.get(id).score < arena.get(current).score,
        };
        if replace {
            best = Some(id);
        }
    }
    best
}

/// Follows `previous` links back from `last`, links the nodes forward through
/// `next`, and returns them in target order.
fn backtrack(arena: &mut PathArena, last: PathId) -> Vec<ViterbiPath> {
    let mut first = last;
    let mut cursor = Some(last);
    let mut following: Option<PathId> = None;
    while let Some(id) = cursor {
        let node = arena.get_mut(id);
        node.next = following;
        following = Some(id);
        first = id;
        cursor = node.previous;
    }

    let mut path = Vec::new();
    let mut cursor = Some(first);
    while let Some(id) = cursor {
        let node = arena.get(id);
        path.push(node.clone());
        cursor = node.next;
    }
    path
}
