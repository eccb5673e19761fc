use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::database::UnitDatabase;
use crate::error::SynthesisError;
use crate::pipeline::traits::{UnitConcatenator, UnitSelector};
use crate::types::{SynthesisOutput, TargetSequence};

/// Unit selection synthesis for one voice.
///
/// Holds no per-request state, so one instance can serve concurrent
/// requests from several threads.
pub struct UnitSelectionSynthesizer {
    database: Arc<dyn UnitDatabase>,
    selector: Box<dyn UnitSelector>,
    concatenator: Box<dyn UnitConcatenator>,
}

pub(crate) struct SynthesizerParts {
    pub database: Arc<dyn UnitDatabase>,
    pub selector: Box<dyn UnitSelector>,
    pub concatenator: Box<dyn UnitConcatenator>,
}

impl UnitSelectionSynthesizer {
    pub(crate) fn from_parts(parts: SynthesizerParts) -> Self {
        Self {
            database: parts.database,
            selector: parts.selector,
            concatenator: parts.concatenator,
        }
    }

    pub fn database(&self) -> &dyn UnitDatabase {
        self.database.as_ref()
    }

    pub fn synthesize(&self, targets: &TargetSequence) -> Result<SynthesisOutput, SynthesisError> {
        self.synthesize_with_cancel(targets, &CancellationToken::new())
    }

    /// Either returns a complete waveform (possibly with flagged degraded
    /// segments) or fails without any partial output.
    pub fn synthesize_with_cancel(
        &self,
        targets: &TargetSequence,
        cancel: &CancellationToken,
    ) -> Result<SynthesisOutput, SynthesisError> {
        validate_targets(targets)?;
        let database = self.database.as_ref();

        let outcome = self.selector.select(database, targets, cancel)?;
        if outcome.units.len() != targets.len() {
            return Err(SynthesisError::search_failure(
                outcome.units.len().min(targets.len().saturating_sub(1)),
                format!(
                    "selector returned {} units for {} targets",
                    outcome.units.len(),
                    targets.len()
                ),
            ));
        }

        let mut units = outcome.units;
        let mut diagnostics = outcome.diagnostics;
        let audio =
            self.concatenator
                .concatenate(database, targets, &mut units, &mut diagnostics, cancel)?;

        let output = SynthesisOutput {
            units,
            audio,
            diagnostics,
            total_cost: outcome.total_cost,
            trace: outcome.trace,
        };
        tracing::info!(
            targets = targets.len(),
            total_cost = output.total_cost,
            samples = output.audio.samples.len(),
            duration_s = output.audio.duration_s(),
            diagnostics = output.diagnostics.len(),
            degraded = output.is_degraded(),
            "synthesizer: utterance complete"
        );
        Ok(output)
    }
}

fn validate_targets(targets: &TargetSequence) -> Result<(), SynthesisError> {
    if targets.is_empty() {
        return Err(SynthesisError::invalid_input("target sequence is empty"));
    }
    for (index, target) in targets.iter().enumerate() {
        if target.symbol.is_empty() {
            return Err(SynthesisError::invalid_input(format!(
                "target {index} has an empty symbol"
            )));
        }
        if !target.duration_s.is_finite() || target.duration_s < 0.0 {
            return Err(SynthesisError::invalid_input(format!(
                "target {index} ('{}') has invalid duration {}",
                target.symbol, target.duration_s
            )));
        }
    }
    Ok(())
}
