use std::collections::HashMap;

use crate::error::SynthesisError;
use crate::types::{AudioFormat, Unit, UnitKind, UnitRef, SILENCE_UNIT};

/// Samples for one unit plus the recording that immediately follows it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitAudio {
    pub samples: Vec<f32>,
    /// Right context from the same recording, for overlap at the next join.
    pub tail: Vec<f32>,
}

/// Read-only store of recorded units.
///
/// Shared across threads and synthesis calls; implementations must not
/// mutate state during a search.
pub trait UnitDatabase: Send + Sync {
    fn format(&self) -> AudioFormat;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unit(&self, index: usize) -> Option<&Unit>;

    /// Indices of every unit of `symbol`, ascending. Empty when the symbol is unknown.
    fn units_for(&self, symbol: &str) -> &[usize];

    /// Fetch the unit's samples and up to `tail_s` seconds of following recording.
    fn audio(&self, index: usize, tail_s: f64) -> Result<UnitAudio, SynthesisError>;
}

/// Resolves a search reference; silence references resolve to the shared placeholder.
pub fn resolve_unit(database: &dyn UnitDatabase, unit: UnitRef) -> Option<&Unit> {
    match unit {
        UnitRef::Stored(index) => database.unit(index),
        UnitRef::Silence => Some(&SILENCE_UNIT),
    }
}

/// Database held entirely in memory: source recordings plus unit annotations into them.
#[derive(Debug, Clone)]
pub struct InMemoryDatabase {
    format: AudioFormat,
    recordings: Vec<Vec<f32>>,
    units: Vec<Unit>,
    by_symbol: HashMap<String, Vec<usize>>,
}

impl InMemoryDatabase {
    pub fn builder(format: AudioFormat) -> InMemoryDatabaseBuilder {
        InMemoryDatabaseBuilder {
            format,
            recordings: Vec::new(),
            units: Vec::new(),
        }
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }
}

impl UnitDatabase for InMemoryDatabase {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn len(&self) -> usize {
        self.units.len()
    }

    fn unit(&self, index: usize) -> Option<&Unit> {
        self.units.get(index)
    }

    fn units_for(&self, symbol: &str) -> &[usize] {
        self.by_symbol
            .get(symbol)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn audio(&self, index: usize, tail_s: f64) -> Result<UnitAudio, SynthesisError> {
        let unit = self
            .units
            .get(index)
            .ok_or_else(|| SynthesisError::audio(index, "no such unit"))?;

        match &unit.kind {
            UnitKind::Silence => Ok(UnitAudio {
                samples: vec![0.0; self.format.samples_for(unit.duration_s)],
                tail: Vec::new(),
            }),
            UnitKind::Composite(_) => Err(SynthesisError::audio(
                index,
                "composite unit has no samples of its own",
            )),
            UnitKind::Recorded => {
                let recording = self.recordings.get(unit.source).ok_or_else(|| {
                    SynthesisError::audio(index, format!("recording {} not loaded", unit.source))
                })?;
                // Both ends are rounded from recording time, so a unit's end is
                // the next contiguous unit's start.
                let start = self.format.samples_for(unit.start_s);
                let end = self
                    .format
                    .samples_for(unit.start_s + unit.duration_s)
                    .max(start);
                if end > recording.len() {
                    return Err(SynthesisError::audio(
                        index,
                        format!(
                            "unit spans samples {start}..{end} but recording {} has {}",
                            unit.source,
                            recording.len()
                        ),
                    ));
                }
                let tail_end = (end + self.format.samples_for(tail_s)).min(recording.len());
                Ok(UnitAudio {
                    samples: recording[start..end].to_vec(),
                    tail: recording[end..tail_end].to_vec(),
                })
            }
        }
    }
}

pub struct InMemoryDatabaseBuilder {
    format: AudioFormat,
    recordings: Vec<Vec<f32>>,
    units: Vec<Unit>,
}

impl InMemoryDatabaseBuilder {
    /// Returns the source id to use in [`Unit::source`].
    pub fn add_recording(&mut self, samples: Vec<f32>) -> usize {
        self.recordings.push(samples);
        self.recordings.len() - 1
    }

    /// Appends a unit, assigning its index from insertion order.
    pub fn add_unit(&mut self, mut unit: Unit) -> usize {
        unit.index = self.units.len();
        self.units.push(unit);
        self.units.len() - 1
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.add_unit(unit);
        self
    }

    pub fn build(self) -> Result<InMemoryDatabase, SynthesisError> {
        if self.format.sample_rate_hz == 0 {
            return Err(SynthesisError::invalid_input(
                "unit database sample rate must be > 0",
            ));
        }

        let mut by_symbol: HashMap<String, Vec<usize>> = HashMap::new();
        for unit in &self.units {
            if !unit.start_s.is_finite()
                || !unit.duration_s.is_finite()
                || unit.start_s < 0.0
                || unit.duration_s < 0.0
            {
                return Err(SynthesisError::invalid_input(format!(
                    "unit {} ('{}') has invalid timing start={} duration={}",
                    unit.index, unit.symbol, unit.start_s, unit.duration_s
                )));
            }
            if let UnitKind::Composite(parts) = &unit.kind {
                if parts.is_empty() {
                    return Err(SynthesisError::invalid_input(format!(
                        "composite unit {} ('{}') has no parts",
                        unit.index, unit.symbol
                    )));
                }
                for part in parts {
                    let valid = self
                        .units
                        .get(part.unit_index)
                        .map(|u| matches!(u.kind, UnitKind::Recorded | UnitKind::Silence))
                        .unwrap_or(false);
                    if !valid {
                        return Err(SynthesisError::invalid_input(format!(
                            "composite unit {} part '{}' references unit {} which is not a recorded unit",
                            unit.index, part.name, part.unit_index
                        )));
                    }
                }
            }
            by_symbol
                .entry(unit.symbol.clone())
                .or_default()
                .push(unit.index);
        }

        tracing::debug!(
            units = self.units.len(),
            recordings = self.recordings.len(),
            symbols = by_symbol.len(),
            "unit database: built in-memory index"
        );

        Ok(InMemoryDatabase {
            format: self.format,
            recordings: self.recordings,
            units: self.units,
            by_symbol,
        })
    }
}
