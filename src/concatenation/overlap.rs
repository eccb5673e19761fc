use crate::config::ConcatenationConfig;
use crate::types::AudioFormat;

/// Requested cross-fade length for a join, before it is limited by the
/// material actually available on either side.
pub fn crossfade_samples(config: &ConcatenationConfig, join_cost: f64, format: &AudioFormat) -> usize {
    let ms = config.base_crossfade_ms + config.crossfade_ms_per_cost * join_cost.max(0.0);
    let ms = if ms.is_finite() {
        ms.min(config.max_crossfade_ms)
    } else {
        config.max_crossfade_ms
    };
    format.samples_for(ms / 1_000.0)
}

/// Weight of the incoming signal at position `i` of an `n`-sample linear fade.
///
/// Never exactly 0 or 1 so both signals contribute to every faded sample.
fn fade_in_weight(i: usize, n: usize) -> f32 {
    (i + 1) as f32 / (n + 1) as f32
}

/// Linear equal-gain cross-fade of `incoming` over `outgoing`, written into `incoming`.
///
/// Fades over `min(outgoing.len(), incoming.len())` samples.
pub fn fade_into(incoming: &mut [f32], outgoing: &[f32]) -> usize {
    let n = incoming.len().min(outgoing.len());
    for (i, (dst, &out)) in incoming.iter_mut().zip(outgoing).take(n).enumerate() {
        let w = fade_in_weight(i, n);
        *dst = out * (1.0 - w) + *dst * w;
    }
    n
}

/// Overlap-adds the head of `incoming` onto the last samples of `output`,
/// then appends the rest. Returns the faded length.
pub fn overlap_add(output: &mut Vec<f32>, incoming: &[f32], overlap: usize) -> usize {
    let n = overlap.min(output.len()).min(incoming.len());
    let start = output.len() - n;
    for (i, (dst, &inc)) in output[start..].iter_mut().zip(incoming).enumerate() {
        let w = fade_in_weight(i, n);
        *dst = *dst * (1.0 - w) + inc * w;
    }
    output.extend_from_slice(&incoming[n..]);
    n
}
