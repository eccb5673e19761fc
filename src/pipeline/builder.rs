use std::path::Path;
use std::sync::Arc;

use crate::concatenation::OverlapConcatenator;
use crate::config::SelectionConfig;
use crate::database::UnitDatabase;
use crate::error::SynthesisError;
use crate::pipeline::defaults::ViterbiUnitSelector;
use crate::pipeline::runtime::{SynthesizerParts, UnitSelectionSynthesizer};
use crate::pipeline::traits::{UnitConcatenator, UnitSelector};

pub struct SynthesizerBuilder {
    config: SelectionConfig,
    selector: Option<Box<dyn UnitSelector>>,
    concatenator: Option<Box<dyn UnitConcatenator>>,
}

impl SynthesizerBuilder {
    pub fn new(config: SelectionConfig) -> Self {
        Self {
            config,
            selector: None,
            concatenator: None,
        }
    }

    /// Starts from a JSON configuration file.
    pub fn from_config_file(path: &Path) -> Result<Self, SynthesisError> {
        Ok(Self::new(SelectionConfig::load(path)?))
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    pub fn with_beam_width(mut self, beam_width: usize) -> Self {
        self.config.search.beam_width = beam_width;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.config.search.threads = threads;
        self
    }

    pub fn with_selector(mut self, selector: Box<dyn UnitSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_concatenator(mut self, concatenator: Box<dyn UnitConcatenator>) -> Self {
        self.concatenator = Some(concatenator);
        self
    }

    /// Validates the configuration and wires the default stages where none were given.
    pub fn build(
        self,
        database: Arc<dyn UnitDatabase>,
    ) -> Result<UnitSelectionSynthesizer, SynthesisError> {
        self.config.validate()?;
        if database.format().sample_rate_hz == 0 {
            return Err(SynthesisError::invalid_config(
                "unit database reports a sample rate of 0",
            ));
        }
        if database.is_empty() {
            tracing::warn!("synthesizer: unit database is empty, every target will be substituted");
        }

        let selector = match self.selector {
            Some(selector) => selector,
            None => Box::new(ViterbiUnitSelector::new(self.config.clone())),
        };
        let concatenator = match self.concatenator {
            Some(concatenator) => concatenator,
            None => Box::new(OverlapConcatenator::new(self.config.concatenation.clone())),
        };

        Ok(UnitSelectionSynthesizer::from_parts(SynthesizerParts {
            database,
            selector,
            concatenator,
        }))
    }
}
