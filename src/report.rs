use std::cmp::Ordering;

use serde::Serialize;

use crate::error::SynthesisError;
use crate::selection::SearchTrace;
use crate::types::{Diagnostic, Substitution, SynthesisOutput, TargetSequence, UnitRef};

pub const SCHEMA_VERSION: u32 = 1;
const OUTLIER_TOP_N: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct SelectionReport {
    pub schema_version: u32,
    pub meta: Meta,
    pub utterances: Vec<UtteranceReport>,
    pub aggregates: AggregateReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    pub generated_at: String,
    pub voice: String,
    pub sample_rate_hz: u32,
    pub unit_count: usize,
    pub beam_width: usize,
    pub max_candidates: usize,
    pub utterance_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UtteranceReport {
    pub id: String,
    pub target_count: usize,
    pub target_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_unit: Option<Vec<UnitTrace>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchTrace>,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UtteranceError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisMetrics {
    pub total_cost: f64,
    pub mean_target_cost: f64,
    pub mean_join_cost: f64,
    /// Share of joins that reuse naturally contiguous recording.
    pub natural_join_ratio: f32,
    pub degraded_segment_count: u32,
    pub output_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitTrace {
    pub target_index: usize,
    pub symbol: String,
    /// `None` for generated silence.
    pub unit_index: Option<usize>,
    pub target_cost: f64,
    pub join_cost: f64,
    pub contiguous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub substitution: Option<Substitution>,
    pub output_start_ms: Option<f64>,
    pub crossfade_ms: Option<f64>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UtteranceError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_index: Option<usize>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub counts: AggregateCounts,
    pub total_cost: Option<MetricDistribution>,
    pub mean_target_cost: Option<MetricDistribution>,
    pub mean_join_cost: Option<MetricDistribution>,
    pub natural_join_ratio: Option<MetricDistribution>,
    pub degraded_segment_count: u32,
    pub worst_total_cost: Vec<OutlierEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateCounts {
    pub total: u32,
    pub synthesized: u32,
    pub failed: u32,
    pub degraded: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricDistribution {
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlierEntry {
    pub id: String,
    pub value: f64,
}

pub fn compute_utterance_report(
    id: &str,
    targets: &TargetSequence,
    output: &SynthesisOutput,
) -> UtteranceReport {
    let sample_rate = output.audio.format.sample_rate_hz as f64;
    let to_ms = |samples: usize| {
        if sample_rate > 0.0 {
            samples as f64 * 1_000.0 / sample_rate
        } else {
            0.0
        }
    };

    let per_unit = output
        .units
        .iter()
        .map(|unit| UnitTrace {
            target_index: unit.target_index,
            symbol: unit.symbol.clone(),
            unit_index: match unit.unit {
                UnitRef::Stored(index) => Some(index),
                UnitRef::Silence => None,
            },
            target_cost: unit.target_cost,
            join_cost: unit.join_cost,
            contiguous: unit.contiguous,
            substitution: unit.substitution.clone(),
            output_start_ms: unit.concatenation.map(|c| to_ms(c.output_start)),
            crossfade_ms: unit.concatenation.map(|c| to_ms(c.crossfade_samples)),
            degraded: unit.substitution.is_some()
                || unit.concatenation.is_some_and(|c| c.degraded),
        })
        .collect::<Vec<_>>();

    let joins = output.units.len().saturating_sub(1);
    let natural = output.units.iter().skip(1).filter(|u| u.contiguous).count();
    let metrics = SynthesisMetrics {
        total_cost: output.total_cost,
        mean_target_cost: mean(output.units.iter().map(|u| u.target_cost)),
        mean_join_cost: mean(output.units.iter().skip(1).map(|u| u.join_cost)),
        natural_join_ratio: ratio(natural, joins),
        degraded_segment_count: to_u32(per_unit.iter().filter(|u| u.degraded).count()),
        output_duration_ms: to_ms(output.audio.samples.len()).round() as u64,
    };

    UtteranceReport {
        id: id.to_string(),
        target_count: targets.len(),
        target_duration_ms: seconds_to_ms(targets.duration_s()),
        synthesis: Some(metrics),
        per_unit: Some(per_unit),
        search: Some(output.trace.clone()),
        diagnostics: output.diagnostics.clone(),
        error: None,
    }
}

pub fn failed_utterance_report(
    id: &str,
    targets: &TargetSequence,
    error: &SynthesisError,
) -> UtteranceReport {
    UtteranceReport {
        id: id.to_string(),
        target_count: targets.len(),
        target_duration_ms: seconds_to_ms(targets.duration_s()),
        synthesis: None,
        per_unit: None,
        search: None,
        diagnostics: Vec::new(),
        error: Some(UtteranceError {
            target_index: error.target_index(),
            message: error.to_string(),
        }),
    }
}

pub fn aggregate_reports(utterances: &[UtteranceReport]) -> AggregateReport {
    let synthesized = utterances
        .iter()
        .filter_map(|u| u.synthesis.as_ref().map(|m| (u.id.as_str(), m)))
        .collect::<Vec<_>>();
    let degraded = synthesized
        .iter()
        .filter(|(_, m)| m.degraded_segment_count > 0)
        .count();

    let mut worst = synthesized
        .iter()
        .map(|(id, m)| OutlierEntry {
            id: id.to_string(),
            value: m.total_cost,
        })
        .collect::<Vec<_>>();
    worst.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    worst.truncate(OUTLIER_TOP_N);

    let collect = |f: fn(&SynthesisMetrics) -> f64| {
        synthesized.iter().map(|(_, m)| f(m)).collect::<Vec<_>>()
    };

    AggregateReport {
        counts: AggregateCounts {
            total: to_u32(utterances.len()),
            synthesized: to_u32(synthesized.len()),
            failed: to_u32(utterances.len() - synthesized.len()),
            degraded: to_u32(degraded),
        },
        total_cost: distribution_or_none(&collect(|m| m.total_cost)),
        mean_target_cost: distribution_or_none(&collect(|m| m.mean_target_cost)),
        mean_join_cost: distribution_or_none(&collect(|m| m.mean_join_cost)),
        natural_join_ratio: distribution_or_none(&collect(|m| m.natural_join_ratio as f64)),
        degraded_segment_count: synthesized
            .iter()
            .map(|(_, m)| m.degraded_segment_count)
            .sum(),
        worst_total_cost: worst,
    }
}

fn distribution_or_none(values: &[f64]) -> Option<MetricDistribution> {
    let mut sorted = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .collect::<Vec<_>>();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Some(MetricDistribution {
        mean: sorted.iter().sum::<f64>() / sorted.len() as f64,
        p50: percentile_sorted(&sorted, 0.5),
        p90: percentile_sorted(&sorted, 0.9),
        max: sorted[sorted.len() - 1],
    })
}

fn percentile_sorted(sorted_values: &[f64], percentile: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }
    if sorted_values.len() == 1 {
        return sorted_values[0];
    }
    let rank = percentile.clamp(0.0, 1.0) * (sorted_values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted_values[lower]
    } else {
        let weight = rank - lower as f64;
        sorted_values[lower] * (1.0 - weight) + sorted_values[upper] * weight
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn ratio(part: usize, whole: usize) -> f32 {
    if whole == 0 {
        0.0
    } else {
        part as f32 / whole as f32
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1_000.0).round() as u64
    } else {
        0
    }
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
