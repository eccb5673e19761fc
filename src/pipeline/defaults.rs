use crate::cancel::CancellationToken;
use crate::concatenation::OverlapConcatenator;
use crate::config::SelectionConfig;
use crate::database::UnitDatabase;
use crate::error::SynthesisError;
use crate::pipeline::traits::{UnitConcatenator, UnitSelector};
use crate::selection::{
    CandidateGenerator, JoinCostFunction, SearchOutcome, TargetCostFunction, ViterbiSearch,
};
use crate::types::{AudioBuffer, Diagnostic, SelectedUnit, TargetSequence};

pub struct ViterbiUnitSelector {
    config: SelectionConfig,
    target_cost: TargetCostFunction,
    join_cost: JoinCostFunction,
}

impl ViterbiUnitSelector {
    pub fn new(config: SelectionConfig) -> Self {
        Self {
            target_cost: TargetCostFunction::new(config.target_cost.clone()),
            join_cost: JoinCostFunction::new(config.join_cost.clone()),
            config,
        }
    }
}

impl UnitSelector for ViterbiUnitSelector {
    fn select(
        &self,
        database: &dyn UnitDatabase,
        targets: &TargetSequence,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, SynthesisError> {
        let generator = CandidateGenerator::new(database, &self.target_cost, &self.config);
        ViterbiSearch::new(generator, &self.join_cost, &self.config.search).run(targets, cancel)
    }
}

impl UnitConcatenator for OverlapConcatenator {
    fn concatenate(
        &self,
        database: &dyn UnitDatabase,
        targets: &TargetSequence,
        units: &mut [SelectedUnit],
        diagnostics: &mut Vec<Diagnostic>,
        cancel: &CancellationToken,
    ) -> Result<AudioBuffer, SynthesisError> {
        OverlapConcatenator::concatenate(self, database, targets, units, diagnostics, cancel)
    }
}
