use serde::{Deserialize, Serialize};

/// Canonical portion unit. Everything the pipeline emits is expressed in one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    G,
    Ml,
    Piece,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::G => "g",
            Unit::Ml => "ml",
            Unit::Piece => "piece",
        }
    }
}

/// Item as reported by the provider or the local text parser, before heuristics.
///
/// Every numeric field is optional: the provider is free to omit what it does not know and
/// the heuristics engine fills the gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub kcal: Option<f64>,
    #[serde(default)]
    pub protein_g: Option<f64>,
    #[serde(default)]
    pub fat_g: Option<f64>,
    #[serde(default)]
    pub carb_g: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub diameter_cm: Option<f64>,
    #[serde(default)]
    pub slices: Option<u32>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl RawItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub unit: Unit,
    pub amount: f64,
    pub kcal: f64,
    pub protein_g: f64,
    pub fat_g: f64,
    pub carb_g: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl NormalizedItem {
    pub fn kcal_from_macros(&self) -> f64 {
        4.0 * self.protein_g + 9.0 * self.fat_g + 4.0 * self.carb_g
    }

    pub fn has_source(&self, tag: &str) -> bool {
        self.sources.iter().any(|s| s == tag)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityBlock {
    #[serde(default)]
    pub not_food_probability: f64,
    #[serde(default)]
    pub unrealistic_scene_probability: f64,
    #[serde(default)]
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarifications: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl QualityBlock {
    /// Folds another verdict into this one: OR on the flag, ordered de-duplicated union on the
    /// message lists, max on the probabilities.
    pub fn merge(mut self, other: QualityBlock) -> QualityBlock {
        self.not_food_probability = self.not_food_probability.max(other.not_food_probability);
        self.unrealistic_scene_probability = self
            .unrealistic_scene_probability
            .max(other.unrealistic_scene_probability);
        self.needs_clarification |= other.needs_clarification;
        push_unique(&mut self.clarifications, other.clarifications);
        push_unique(&mut self.issues, other.issues);
        self
    }
}

/// Appends every string of `extra` not already present in `into`, keeping first-seen order.
pub fn push_unique(into: &mut Vec<String>, extra: impl IntoIterator<Item = String>) {
    for s in extra {
        if !into.contains(&s) {
            into.push(s);
        }
    }
}

pub(crate) fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
