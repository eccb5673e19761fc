use std::borrow::Cow;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::selection::SearchTrace;

/// One feature value as produced by the linguistic front end or stored with a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Numeric(f64),
    Category(String),
}

impl FeatureValue {
    pub fn category(value: impl Into<String>) -> Self {
        Self::Category(value.into())
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        Self::Category(value.to_string())
    }
}

/// Insertion-ordered feature name to value mapping.
///
/// Serialized as a JSON object; key order in the document is preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features(Vec<(String, FeatureValue)>);

impl Features {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Inserts or replaces in place, keeping the original position of an existing key.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FeatureValue>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<FeatureValue>> FromIterator<(K, V)> for Features {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut features = Features::new();
        for (k, v) in iter {
            features.insert(k, v);
        }
        features
    }
}

impl Serialize for Features {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Features {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FeaturesVisitor;

        impl<'de> Visitor<'de> for FeaturesVisitor {
            type Value = Features;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of feature names to numbers or strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Features, A::Error> {
                let mut features = Features::new();
                while let Some((k, v)) = access.next_entry::<String, FeatureValue>()? {
                    features.insert(k, v);
                }
                Ok(features)
            }
        }

        deserializer.deserialize_map(FeaturesVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchPoint {
    pub time_s: f64,
    pub f0_hz: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HalfPhoneSide {
    #[default]
    Left,
    Right,
}

/// Granularity of a target slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[default]
    Phone,
    HalfPhone(HalfPhoneSide),
    Diphone,
}

impl TargetKind {
    /// Name under which units of this granularity are stored: half-phones
    /// carry an `_L`/`_R` suffix, phones and diphones use the symbol as is.
    pub fn unit_symbol(self, symbol: &str) -> Cow<'_, str> {
        match self {
            Self::HalfPhone(HalfPhoneSide::Left) => Cow::Owned(format!("{symbol}_L")),
            Self::HalfPhone(HalfPhoneSide::Right) => Cow::Owned(format!("{symbol}_R")),
            Self::Phone | Self::Diphone => Cow::Borrowed(symbol),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub symbol: String,
    #[serde(default)]
    pub kind: TargetKind,
    #[serde(default)]
    pub features: Features,
    pub duration_s: f64,
    #[serde(default)]
    pub pitch: Vec<PitchPoint>,
    #[serde(default)]
    pub is_silence: bool,
}

impl Target {
    pub fn new(symbol: impl Into<String>, duration_s: f64) -> Self {
        Self {
            symbol: symbol.into(),
            kind: TargetKind::Phone,
            features: Features::new(),
            duration_s,
            pitch: Vec::new(),
            is_silence: false,
        }
    }

    pub fn silence(symbol: impl Into<String>, duration_s: f64) -> Self {
        Self {
            is_silence: true,
            ..Self::new(symbol, duration_s)
        }
    }

    pub fn with_kind(mut self, kind: TargetKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_feature(mut self, name: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        self.features.insert(name, value);
        self
    }

    pub fn with_pitch(mut self, pitch: Vec<PitchPoint>) -> Self {
        self.pitch = pitch;
        self
    }

    /// Mean of the voiced, finite points of the pitch contour.
    pub fn mean_f0_hz(&self) -> Option<f64> {
        let voiced = self
            .pitch
            .iter()
            .map(|p| p.f0_hz)
            .filter(|f0| f0.is_finite() && *f0 > 0.0)
            .collect::<Vec<_>>();
        if voiced.is_empty() {
            return None;
        }
        Some(voiced.iter().sum::<f64>() / voiced.len() as f64)
    }
}

/// The ordered targets of one utterance.
///
/// Previous/next links are positional: target `i` links to `i - 1` and `i + 1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetSequence {
    targets: Vec<Target>,
}

#[derive(Debug, Clone, Copy)]
pub struct TargetContext<'a> {
    pub index: usize,
    pub target: &'a Target,
    pub previous: Option<&'a Target>,
    pub next: Option<&'a Target>,
}

impl TargetSequence {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Target> {
        self.targets.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Target> {
        self.targets.iter()
    }

    pub fn previous(&self, index: usize) -> Option<&Target> {
        index.checked_sub(1).and_then(|i| self.targets.get(i))
    }

    pub fn next(&self, index: usize) -> Option<&Target> {
        if index >= self.targets.len() {
            return None;
        }
        self.targets.get(index + 1)
    }

    pub fn context(&self, index: usize) -> Option<TargetContext<'_>> {
        let target = self.targets.get(index)?;
        Some(TargetContext {
            index,
            target,
            previous: self.previous(index),
            next: self.next(index),
        })
    }

    /// Sum of desired durations in seconds.
    pub fn duration_s(&self) -> f64 {
        self.targets.iter().map(|t| t.duration_s.max(0.0)).sum()
    }
}

impl From<Vec<Target>> for TargetSequence {
    fn from(targets: Vec<Target>) -> Self {
        Self::new(targets)
    }
}

/// Acoustic description of a unit edge, used by the join cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinFrame {
    #[serde(default)]
    pub cepstrum: Vec<f32>,
    /// 0 means unvoiced.
    #[serde(default)]
    pub f0_hz: f32,
    #[serde(default)]
    pub energy_db: f32,
}

impl JoinFrame {
    pub const fn empty() -> Self {
        Self {
            cepstrum: Vec::new(),
            f0_hz: 0.0,
            energy_db: 0.0,
        }
    }

    pub fn is_voiced(&self) -> bool {
        self.f0_hz.is_finite() && self.f0_hz > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubUnit {
    pub name: String,
    pub unit_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    #[default]
    Recorded,
    /// Built from other units of the database, played in order (e.g. vocalizations).
    Composite(Vec<SubUnit>),
    Silence,
}

/// One stored instance of a phonetic symbol. Owned by the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Position in the database; assigned by the database builder.
    #[serde(default)]
    pub index: usize,
    pub symbol: String,
    /// Recording (take) the unit was cut from.
    pub source: usize,
    pub start_s: f64,
    pub duration_s: f64,
    #[serde(default)]
    pub f0_hz: Option<f64>,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub left_join: JoinFrame,
    #[serde(default)]
    pub right_join: JoinFrame,
    #[serde(default)]
    pub kind: UnitKind,
}

/// Stand-in used for generated silence and for symbols with no recorded unit.
pub(crate) static SILENCE_UNIT: Unit = Unit {
    index: usize::MAX,
    symbol: String::new(),
    source: usize::MAX,
    start_s: 0.0,
    duration_s: 0.0,
    f0_hz: None,
    features: Features::new(),
    left_join: JoinFrame::empty(),
    right_join: JoinFrame::empty(),
    kind: UnitKind::Silence,
};

impl Unit {
    pub fn new(index: usize, symbol: impl Into<String>, source: usize, start_s: f64, duration_s: f64) -> Self {
        Self {
            index,
            symbol: symbol.into(),
            source,
            start_s,
            duration_s,
            f0_hz: None,
            features: Features::new(),
            left_join: JoinFrame::default(),
            right_join: JoinFrame::default(),
            kind: UnitKind::Recorded,
        }
    }

    pub fn is_silence(&self) -> bool {
        matches!(self.kind, UnitKind::Silence)
    }

    /// True when `next` directly follows `self` in the same recording.
    pub fn is_contiguous_with(&self, next: &Unit) -> bool {
        matches!(self.kind, UnitKind::Recorded)
            && matches!(next.kind, UnitKind::Recorded)
            && self.source == next.source
            && self.index.checked_add(1) == Some(next.index)
    }
}

/// Non-owning reference to a unit chosen by the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitRef {
    Stored(usize),
    Silence,
}

impl UnitRef {
    pub fn index(self) -> Option<usize> {
        match self {
            Self::Stored(index) => Some(index),
            Self::Silence => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Substitution {
    Backoff { requested: String, used: String },
    Silence { requested: String },
}

/// Filled in by the concatenator once the unit has been written to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatenationData {
    /// First output sample of this unit; a cross-fade with its predecessor starts here.
    pub output_start: usize,
    pub output_len: usize,
    pub crossfade_samples: usize,
    pub natural_join: bool,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedUnit {
    pub target_index: usize,
    pub symbol: String,
    pub unit: UnitRef,
    pub target_cost: f64,
    /// Cost of the join with the previous selected unit; 0 for the first unit.
    pub join_cost: f64,
    /// True when this unit directly follows the previous one in its recording.
    pub contiguous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substitution: Option<Substitution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concatenation: Option<ConcatenationData>,
}

/// Non-fatal events recorded while synthesizing one utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    SymbolBackoff {
        target_index: usize,
        requested: String,
        used: String,
    },
    SilenceSubstituted {
        target_index: usize,
        requested: String,
    },
    NonFiniteTargetCost {
        target_index: usize,
        unit_index: usize,
    },
    NonFiniteJoinCosts {
        target_index: usize,
        count: usize,
    },
    AudioSubstituted {
        target_index: usize,
        unit_index: usize,
        reason: String,
    },
}

impl Diagnostic {
    pub fn target_index(&self) -> usize {
        match self {
            Self::SymbolBackoff { target_index, .. }
            | Self::SilenceSubstituted { target_index, .. }
            | Self::NonFiniteTargetCost { target_index, .. }
            | Self::NonFiniteJoinCosts { target_index, .. }
            | Self::AudioSubstituted { target_index, .. } => *target_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;

    pub fn mono(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn samples_for(&self, seconds: f64) -> usize {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        (seconds * self.sample_rate_hz as f64).round() as usize
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::mono(Self::DEFAULT_SAMPLE_RATE_HZ)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub format: AudioFormat,
}

impl AudioBuffer {
    pub fn duration_s(&self) -> f64 {
        if self.format.sample_rate_hz == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.format.sample_rate_hz as f64
    }

    /// Clamped conversion for sinks that want integer PCM.
    pub fn to_pcm16(&self) -> Vec<i16> {
        self.samples
            .iter()
            .map(|&s| {
                let s = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
                (s * i16::MAX as f32).round() as i16
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub units: Vec<SelectedUnit>,
    pub audio: AudioBuffer,
    pub diagnostics: Vec<Diagnostic>,
    pub total_cost: f64,
    pub trace: SearchTrace,
}

impl SynthesisOutput {
    /// True when any segment was substituted or any audio was replaced by silence.
    pub fn is_degraded(&self) -> bool {
        self.diagnostics.iter().any(|d| {
            matches!(
                d,
                Diagnostic::SymbolBackoff { .. }
                    | Diagnostic::SilenceSubstituted { .. }
                    | Diagnostic::AudioSubstituted { .. }
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_keep_insertion_order_and_replace_in_place() {
        let mut features = Features::new();
        features.insert("stress", 1.0);
        features.insert("pos", "noun");
        features.insert("stress", 0.0);
        let keys = features.iter().map(|(k, _)| k).collect::<Vec<_>>();
        assert_eq!(keys, vec!["stress", "pos"]);
        assert_eq!(features.get("stress"), Some(&FeatureValue::Numeric(0.0)));
    }

    #[test]
    fn features_json_preserves_document_order() {
        let features: Features =
            serde_json::from_str(r#"{"z": 1, "a": "x", "m": 2.5}"#).expect("valid features");
        let keys = features.iter().map(|(k, _)| k).collect::<Vec<_>>();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(features.get("a"), Some(&FeatureValue::category("x")));
        let json = serde_json::to_string(&features).expect("serialize");
        assert_eq!(json, r#"{"z":1.0,"a":"x","m":2.5}"#);
    }

    #[test]
    fn target_sequence_links() {
        let seq = TargetSequence::new(vec![
            Target::silence("_", 0.1),
            Target::new("k", 0.08),
            Target::new("a", 0.12),
        ]);
        assert!(seq.previous(0).is_none());
        assert_eq!(seq.next(0).map(|t| t.symbol.as_str()), Some("k"));
        assert_eq!(seq.previous(2).map(|t| t.symbol.as_str()), Some("k"));
        assert!(seq.next(2).is_none());
        assert!(seq.next(10).is_none());
        let ctx = seq.context(1).expect("context");
        assert_eq!(ctx.previous.map(|t| t.is_silence), Some(true));
        assert_eq!(ctx.next.map(|t| t.symbol.as_str()), Some("a"));
        assert!((seq.duration_s() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn mean_f0_ignores_unvoiced_points() {
        let target = Target::new("a", 0.1).with_pitch(vec![
            PitchPoint { time_s: 0.0, f0_hz: 100.0 },
            PitchPoint { time_s: 0.05, f0_hz: 0.0 },
            PitchPoint { time_s: 0.1, f0_hz: 140.0 },
        ]);
        assert_eq!(target.mean_f0_hz(), Some(120.0));
        assert_eq!(Target::new("a", 0.1).mean_f0_hz(), None);
    }

    #[test]
    fn contiguity_requires_same_source_and_next_index() {
        let a = Unit::new(4, "k", 0, 0.0, 0.05);
        let b = Unit::new(5, "a", 0, 0.05, 0.1);
        let c = Unit::new(5, "a", 1, 0.05, 0.1);
        assert!(a.is_contiguous_with(&b));
        assert!(!b.is_contiguous_with(&a));
        assert!(!a.is_contiguous_with(&c));
        assert!(!SILENCE_UNIT.is_contiguous_with(&a));
    }

    #[test]
    fn pcm16_conversion_clamps() {
        let buffer = AudioBuffer {
            samples: vec![0.0, 1.5, -2.0, f32::NAN],
            format: AudioFormat::mono(8_000),
        };
        assert_eq!(buffer.to_pcm16(), vec![0, i16::MAX, -i16::MAX, 0]);
    }

    #[test]
    fn half_phone_targets_name_their_side() {
        assert_eq!(TargetKind::HalfPhone(HalfPhoneSide::Left).unit_symbol("a"), "a_L");
        assert_eq!(TargetKind::HalfPhone(HalfPhoneSide::Right).unit_symbol("a"), "a_R");
        assert_eq!(TargetKind::Diphone.unit_symbol("k-a"), "k-a");
        assert_eq!(TargetKind::Phone.unit_symbol("a"), "a");
    }

    #[test]
    fn target_json_uses_defaults() {
        let target: Target = serde_json::from_str(
            r#"{"symbol": "a", "duration_s": 0.1, "kind": {"half_phone": "right"}, "features": {"stress": 1}}"#,
        )
        .expect("valid target");
        assert_eq!(target.kind, TargetKind::HalfPhone(HalfPhoneSide::Right));
        assert!(!target.is_silence);
        assert!(target.pitch.is_empty());
        assert_eq!(target.features.get("stress"), Some(&FeatureValue::Numeric(1.0)));
    }
}
