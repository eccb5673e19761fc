//! Unit selection: cost functions, candidate generation and the Viterbi search.

pub mod candidates;
pub mod cost;
pub mod viterbi;

pub use candidates::{CandidateGenerator, StageCandidates, ViterbiCandidate};
pub use cost::{JoinCostFunction, TargetCostFunction};
pub use viterbi::{SearchOutcome, SearchTrace, ViterbiSearch};

#[cfg(test)]
mod tests;
