//! Stitching selected units into one waveform.

pub mod overlap;

use crate::cancel::CancellationToken;
use crate::config::ConcatenationConfig;
use crate::database::{resolve_unit, UnitAudio, UnitDatabase};
use crate::error::SynthesisError;
use crate::types::{
    AudioBuffer, AudioFormat, ConcatenationData, Diagnostic, SelectedUnit, TargetSequence,
    UnitKind, UnitRef,
};

use self::overlap::{crossfade_samples, fade_into, overlap_add};

/// Concatenates unit audio with cost-modulated linear cross-fades.
///
/// Naturally contiguous joins and joins touching silence are butt-spliced.
/// Every other join is faded over `base + per_cost * join_cost` milliseconds,
/// taken from the left unit's recording continuation when available and from
/// the already written output otherwise.
#[derive(Debug, Clone)]
pub struct OverlapConcatenator {
    config: ConcatenationConfig,
}

/// Fetched samples of one unit plus what the next join may fade with.
struct Segment {
    audio: UnitAudio,
    silent: bool,
    degraded: bool,
}

impl OverlapConcatenator {
    pub fn new(config: ConcatenationConfig) -> Self {
        Self { config }
    }

    /// Writes every unit into one buffer and attaches its [`ConcatenationData`].
    ///
    /// Missing or corrupt unit audio is replaced by silence of the target's
    /// duration and reported in `diagnostics`; only cancellation fails.
    pub fn concatenate(
        &self,
        database: &dyn UnitDatabase,
        targets: &TargetSequence,
        units: &mut [SelectedUnit],
        diagnostics: &mut Vec<Diagnostic>,
        cancel: &CancellationToken,
    ) -> Result<AudioBuffer, SynthesisError> {
        let format = AudioFormat::mono(database.format().sample_rate_hz);
        let tail_s = if self.config.use_right_context {
            self.config.max_crossfade_ms.max(0.0) / 1_000.0
        } else {
            0.0
        };

        let mut output: Vec<f32> = Vec::new();
        let mut previous: Option<(Segment, usize)> = None;
        let mut faded_joins = 0usize;
        let mut natural_joins = 0usize;

        for selected in units.iter_mut() {
            if cancel.is_cancelled() {
                return Err(SynthesisError::Cancelled {
                    stage: selected.target_index,
                });
            }

            let duration_s = targets
                .get(selected.target_index)
                .map(|t| t.duration_s)
                .unwrap_or(0.0);
            let mut segment = self.fetch(database, selected, duration_s, tail_s, &format, diagnostics);

            let natural = selected.contiguous
                && !segment.degraded
                && previous.as_ref().is_some_and(|(left, _)| !left.degraded);
            let mut start = output.len();
            let mut faded = 0usize;
            match &previous {
                Some((left, left_len)) if !natural && !left.silent && !segment.silent => {
                    let wanted = crossfade_samples(&self.config, selected.join_cost, &format);
                    if self.config.use_right_context && !left.audio.tail.is_empty() {
                        faded = fade_into(
                            &mut segment.audio.samples[..],
                            &left.audio.tail[..wanted.min(left.audio.tail.len())],
                        );
                        output.extend_from_slice(&segment.audio.samples);
                    } else {
                        faded = overlap_add(&mut output, &segment.audio.samples, wanted.min(*left_len));
                        start -= faded;
                    }
                }
                _ => output.extend_from_slice(&segment.audio.samples),
            }
            if faded > 0 {
                faded_joins += 1;
            }
            if natural {
                natural_joins += 1;
            }

            let len = segment.audio.samples.len();
            selected.concatenation = Some(ConcatenationData {
                output_start: start,
                output_len: len,
                crossfade_samples: faded,
                natural_join: natural,
                degraded: segment.degraded,
            });
            // Only the tail is needed for the next join.
            segment.audio.samples = Vec::new();
            previous = Some((segment, len));
        }

        tracing::debug!(
            units = units.len(),
            samples = output.len(),
            faded_joins,
            natural_joins,
            "concatenation: waveform assembled"
        );

        Ok(AudioBuffer {
            samples: output,
            format,
        })
    }

    fn fetch(
        &self,
        database: &dyn UnitDatabase,
        selected: &SelectedUnit,
        duration_s: f64,
        tail_s: f64,
        format: &AudioFormat,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Segment {
        let silence = |degraded| Segment {
            audio: UnitAudio {
                samples: vec![0.0; format.samples_for(duration_s)],
                tail: Vec::new(),
            },
            silent: true,
            degraded,
        };

        let index = match selected.unit {
            UnitRef::Silence => return silence(false),
            UnitRef::Stored(index) => index,
        };
        let silent = resolve_unit(database, selected.unit).is_some_and(|u| u.is_silence());

        match fetch_audio(database, index, tail_s) {
            Ok(audio) => Segment {
                audio,
                silent,
                degraded: false,
            },
            Err(err) => {
                tracing::warn!(
                    target_index = selected.target_index,
                    unit_index = index,
                    error = %err,
                    "concatenation: unit audio unavailable, substituting silence"
                );
                diagnostics.push(Diagnostic::AudioSubstituted {
                    target_index: selected.target_index,
                    unit_index: index,
                    reason: err.to_string(),
                });
                silence(true)
            }
        }
    }
}

/// Composite units are played part by part; the tail comes from the last part.
fn fetch_audio(
    database: &dyn UnitDatabase,
    index: usize,
    tail_s: f64,
) -> Result<UnitAudio, SynthesisError> {
    let unit = database
        .unit(index)
        .ok_or_else(|| SynthesisError::audio(index, "unit is not in the database"))?;
    let UnitKind::Composite(parts) = &unit.kind else {
        return database.audio(index, tail_s);
    };

    let mut combined = UnitAudio::default();
    for (i, part) in parts.iter().enumerate() {
        let last = i + 1 == parts.len();
        let audio = database
            .audio(part.unit_index, if last { tail_s } else { 0.0 })
            .map_err(|err| {
                SynthesisError::audio(index, format!("part '{}': {err}", part.name))
            })?;
        combined.samples.extend_from_slice(&audio.samples);
        if last {
            combined.tail = audio.tail;
        }
    }
    Ok(combined)
}
