pub mod cancel;
pub mod concatenation;
pub mod config;
pub mod database;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod selection;
pub mod types;

pub use cancel::CancellationToken;
pub use concatenation::OverlapConcatenator;
pub use config::SelectionConfig;
pub use database::{InMemoryDatabase, UnitAudio, UnitDatabase};
pub use error::SynthesisError;
pub use pipeline::builder::SynthesizerBuilder;
pub use pipeline::runtime::UnitSelectionSynthesizer;
pub use pipeline::traits::{UnitConcatenator, UnitSelector};
pub use report::SelectionReport;
pub use types::{
    AudioBuffer, AudioFormat, Diagnostic, SelectedUnit, SynthesisOutput, Target, TargetSequence,
    Unit,
};
