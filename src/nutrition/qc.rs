use lazy_static::lazy_static;
use regex::Regex;

use super::heuristics::{diameter_in_name, disk_food, is_fried, is_oil, SOURCE_GEOMETRY};
use super::types::{push_unique, NormalizedItem, QualityBlock, Unit};

pub const ISSUE_ENERGY_MISMATCH: &str = "energy_mismatch";
pub const ISSUE_KCAL_PER_100G_OUTLIER: &str = "kcal_per_100g_outlier";

pub const ASK_SCALE_REFERENCE: &str =
    "Take another photo with a scale reference (palm, fork or card), ideally from a different angle.";
pub const ASK_OIL: &str = "Was it fried in oil? None / 1 tsp / 1 tbsp?";
pub const ASK_VOLUME: &str = "What volume was the cup or bowl: 200 / 300 / 400 ml?";

#[derive(Debug, Clone)]
pub struct QcConfig {
    pub energy_tolerance: f64,
    /// Mismatches are ignored while both energy figures stay below this.
    pub energy_noise_floor_kcal: f64,
    pub kcal_per_100g_min: f64,
    pub kcal_per_100g_max: f64,
    pub min_mean_confidence: f64,
    /// Confidence assumed for items that do not report one.
    pub default_confidence: f64,
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            energy_tolerance: 0.25,
            energy_noise_floor_kcal: 50.0,
            kcal_per_100g_min: 10.0,
            kcal_per_100g_max: 1200.0,
            min_mean_confidence: 0.5,
            default_confidence: 0.7,
        }
    }
}

lazy_static! {
    static ref VOLUME_FOOD_RE: Regex = Regex::new(
        r"soup|juice|smoothie|tea\b|coffee|latte|cappuccino|milkshake|суп|сок|смузи|напит|чай|кофе|борщ"
    )
    .expect("volume food regex");
}

pub fn kcal_per_100g(item: &NormalizedItem) -> Option<f64> {
    (item.unit == Unit::G && item.amount > 0.0).then(|| item.kcal / item.amount * 100.0)
}

pub fn mean_confidence(items: &[NormalizedItem], default_confidence: f64) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    let total: f64 = items
        .iter()
        .map(|i| i.confidence.unwrap_or(default_confidence))
        .sum();
    total / items.len() as f64
}

/// Checks energy balance and portion plausibility. Total: always returns a verdict.
pub fn validate(items: &[NormalizedItem], cfg: &QcConfig) -> QualityBlock {
    let mut clarifications = Vec::new();
    let mut issues = Vec::new();
    let has_oil_line = items.iter().any(|i| is_oil(&i.name.to_lowercase()));

    for item in items {
        let label = if item.name.trim().is_empty() {
            "this item"
        } else {
            item.name.as_str()
        };
        let lower = item.name.to_lowercase();

        let from_macros = item.kcal_from_macros();
        let larger = item.kcal.max(from_macros);
        let mismatch = (item.kcal - from_macros).abs() / larger.max(1.0);
        if mismatch > cfg.energy_tolerance && larger > cfg.energy_noise_floor_kcal {
            push_unique(&mut issues, [ISSUE_ENERGY_MISMATCH.to_string()]);
            push_unique(
                &mut clarifications,
                [format!(
                    "Check the macros for '{label}': 4P+9F+4C ≈ {} kcal, but {} kcal is reported.",
                    from_macros.round(),
                    item.kcal.round()
                )],
            );
        }

        if let Some(k100) = kcal_per_100g(item) {
            if k100 < cfg.kcal_per_100g_min || k100 > cfg.kcal_per_100g_max {
                push_unique(&mut issues, [ISSUE_KCAL_PER_100G_OUTLIER.to_string()]);
                push_unique(
                    &mut clarifications,
                    [format!(
                        "Unusual energy density for '{label}' (~{} kcal/100 g). Please check the weight.",
                        k100.round()
                    )],
                );
            }
        }

        if let Some((kind, _)) = disk_food(&lower) {
            let sized = item.has_source(SOURCE_GEOMETRY) || diameter_in_name(&lower).is_some();
            if !sized {
                push_unique(
                    &mut clarifications,
                    [format!(
                        "What was the {kind} diameter (25 / 30 / 35 cm) and how many slices did you eat?"
                    )],
                );
            }
        }

        if is_fried(&lower) && !has_oil_line {
            push_unique(&mut clarifications, [ASK_OIL.to_string()]);
        }

        if item.unit != Unit::Ml && VOLUME_FOOD_RE.is_match(&lower) {
            push_unique(&mut clarifications, [ASK_VOLUME.to_string()]);
        }
    }

    if mean_confidence(items, cfg.default_confidence) < cfg.min_mean_confidence {
        push_unique(&mut clarifications, [ASK_SCALE_REFERENCE.to_string()]);
    }

    issues.sort();
    QualityBlock {
        not_food_probability: 0.0,
        unrealistic_scene_probability: 0.0,
        needs_clarification: !clarifications.is_empty(),
        clarifications,
        issues,
    }
}
