use std::fmt::Write;

use unitsel::report::{MetricDistribution, UtteranceReport};
use unitsel::SelectionReport;

pub fn render(report: &SelectionReport) -> String {
    let mut out = String::new();
    let meta = &report.meta;
    let _ = writeln!(
        out,
        "voice {} ({} units, {} Hz), beam {}, generated {}",
        meta.voice,
        meta.unit_count,
        meta.sample_rate_hz,
        if meta.beam_width == 0 {
            "exhaustive".to_string()
        } else {
            meta.beam_width.to_string()
        },
        meta.generated_at
    );
    let _ = writeln!(out);

    for utterance in &report.utterances {
        render_utterance(&mut out, utterance);
    }

    let aggregates = &report.aggregates;
    let counts = &aggregates.counts;
    let _ = writeln!(
        out,
        "utterances: {} total, {} synthesized, {} failed, {} degraded ({} degraded segments)",
        counts.total, counts.synthesized, counts.failed, counts.degraded, aggregates.degraded_segment_count
    );
    render_distribution(&mut out, "total cost", aggregates.total_cost.as_ref());
    render_distribution(&mut out, "mean target cost", aggregates.mean_target_cost.as_ref());
    render_distribution(&mut out, "mean join cost", aggregates.mean_join_cost.as_ref());
    render_distribution(&mut out, "natural joins", aggregates.natural_join_ratio.as_ref());
    out
}

fn render_utterance(out: &mut String, utterance: &UtteranceReport) {
    if let Some(error) = &utterance.error {
        let _ = writeln!(out, "{}: FAILED {}", utterance.id, error.message);
        let _ = writeln!(out);
        return;
    }
    let Some(metrics) = &utterance.synthesis else {
        return;
    };
    let _ = writeln!(
        out,
        "{}: {} targets, cost {:.3}, natural joins {:.0}%, {} ms{}",
        utterance.id,
        utterance.target_count,
        metrics.total_cost,
        metrics.natural_join_ratio * 100.0,
        metrics.output_duration_ms,
        if metrics.degraded_segment_count > 0 {
            format!(", {} degraded", metrics.degraded_segment_count)
        } else {
            String::new()
        }
    );
    for unit in utterance.per_unit.iter().flatten() {
        let source = match unit.unit_index {
            Some(index) => format!("#{index}"),
            None => "silence".to_string(),
        };
        let _ = writeln!(
            out,
            "  {:>3} {:<6} {:<8} target {:>7.3} join {:>7.3}{}",
            unit.target_index,
            unit.symbol,
            source,
            unit.target_cost,
            unit.join_cost,
            if unit.contiguous { " contiguous" } else { "" }
        );
    }
    let _ = writeln!(out);
}

fn render_distribution(out: &mut String, name: &str, distribution: Option<&MetricDistribution>) {
    match distribution {
        Some(d) => {
            let _ = writeln!(
                out,
                "{name}: mean {:.3} p50 {:.3} p90 {:.3} max {:.3}",
                d.mean, d.p50, d.p90, d.max
            );
        }
        None => {
            let _ = writeln!(out, "{name}: n/a");
        }
    }
}
