use crate::cancel::CancellationToken;
use crate::database::UnitDatabase;
use crate::error::SynthesisError;
use crate::selection::SearchOutcome;
use crate::types::{AudioBuffer, Diagnostic, SelectedUnit, TargetSequence};

/// Chooses one unit per target.
pub trait UnitSelector: Send + Sync {
    fn select(
        &self,
        database: &dyn UnitDatabase,
        targets: &TargetSequence,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, SynthesisError>;
}

/// Turns a selected unit sequence into audio, attaching concatenation data to each unit.
pub trait UnitConcatenator: Send + Sync {
    fn concatenate(
        &self,
        database: &dyn UnitDatabase,
        targets: &TargetSequence,
        units: &mut [SelectedUnit],
        diagnostics: &mut Vec<Diagnostic>,
        cancel: &CancellationToken,
    ) -> Result<AudioBuffer, SynthesisError>;
}
