use std::collections::HashMap;
use std::f64::consts::PI;

use lazy_static::lazy_static;
use regex::Regex;

use super::types::{round1, NormalizedItem, RawItem, Unit};
use super::units::canonical_unit;

/// Per-user overrides of the piece→grams table, keyed by (a fragment of) the food name.
pub type PortionPriors = HashMap<String, f64>;

pub const SOURCE_PER_100G: &str = "heuristic:per_100g";
pub const SOURCE_GEOMETRY: &str = "heuristic:geometry";
pub const SOURCE_PIECE_PRIOR: &str = "heuristic:piece_prior";
pub const SOURCE_OIL: &str = "heuristic:oil";
pub const SOURCE_BREADING: &str = "heuristic:breading";

#[derive(Debug, Clone)]
pub struct HeuristicsConfig {
    /// Mass assumed for a g/ml item whose amount is missing or non-positive.
    pub default_mass_g: f64,
    /// Reported kcal below this, on a large portion, is read as "per 100 g".
    pub per100_kcal_ceiling: f64,
    /// Per-100 rescaling only applies to portions heavier than this.
    pub per100_min_amount: f64,
    pub slices_per_whole: u32,
    pub fried_min_mass_g: f64,
    pub oil_quantum_g: f64,
    pub oil_per_food_g: f64,
    pub breading_ratio: f64,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            default_mass_g: 100.0,
            per100_kcal_ceiling: 50.0,
            per100_min_amount: 100.0,
            slices_per_whole: 8,
            fried_min_mass_g: 50.0,
            oil_quantum_g: 5.0,
            oil_per_food_g: 150.0,
            breading_ratio: 0.08,
        }
    }
}

// grams per piece; first match wins
const PIECE_PRIORS: &[(&str, &str, f64)] = &[
    ("egg", "egg", 55.0),
    ("яйц", "egg", 55.0),
    ("banana", "banana", 120.0),
    ("банан", "banana", 120.0),
    ("burger", "burger", 250.0),
    ("бургер", "burger", 250.0),
    ("sushi", "sushi piece", 30.0),
    ("суши", "sushi piece", 30.0),
    ("apple", "apple", 180.0),
    ("яблок", "apple", 180.0),
    ("orange", "orange", 150.0),
    ("апельсин", "orange", 150.0),
    ("bread", "slice of bread", 30.0),
    ("хлеб", "slice of bread", 30.0),
    ("cookie", "cookie", 15.0),
    ("печень", "cookie", 15.0),
];

// areal density in g/cm²; pancake must precede cake
const DISK_FOODS: &[(&str, &str, f64)] = &[
    ("pizza", "pizza", 0.95),
    ("пицц", "pizza", 0.95),
    ("pancake", "pancake", 0.45),
    ("блин", "pancake", 0.45),
    ("tortilla", "tortilla", 0.35),
    ("cake", "cake", 1.6),
    ("торт", "cake", 1.6),
];

lazy_static! {
    static ref DIAMETER_RE: Regex =
        Regex::new(r"(\d{2,3}(?:[.,]\d+)?)\s*(?:cm|см)\b").expect("diameter regex");
    static ref SLICES_RE: Regex =
        Regex::new(r"\b(\d{1,2})\s*(?:slices?|pieces?|кус\w*|ломт\w*)").expect("slices regex");
}

/// Returns the display label and areal density of a disk-shaped food, if the name is one.
pub fn disk_food(name_lower: &str) -> Option<(&'static str, f64)> {
    DISK_FOODS
        .iter()
        .find(|(needle, _, _)| name_lower.contains(needle))
        .map(|(_, label, density)| (*label, *density))
}

/// Diameter in cm written into the name itself, e.g. "pizza 30 cm".
pub fn diameter_in_name(name_lower: &str) -> Option<f64> {
    DIAMETER_RE
        .captures(name_lower)
        .and_then(|c| c[1].replace(',', ".").parse::<f64>().ok())
        .filter(|d| *d > 0.0)
}

fn slices_in_name(name_lower: &str) -> Option<u32> {
    SLICES_RE
        .captures(name_lower)
        .and_then(|c| c[1].parse::<u32>().ok())
        .filter(|n| *n > 0)
}

/// Mass of `slices` out of `per_whole` of a disk: π·(d/2)²·density·(slices/per_whole).
pub fn disk_mass_g(diameter_cm: f64, density: f64, slices: u32, per_whole: u32) -> f64 {
    let whole = PI * (diameter_cm / 2.0).powi(2) * density;
    whole * f64::from(slices) / f64::from(per_whole.max(1))
}

/// Grams per piece for a food name: user priors first (longest matching key), then the
/// built-in table.
pub fn piece_mass(name_lower: &str, user_priors: Option<&PortionPriors>) -> Option<(String, f64)> {
    if let Some(priors) = user_priors {
        let best = priors
            .iter()
            .filter(|(k, g)| {
                let k = k.trim().to_lowercase();
                !k.is_empty() && g.is_finite() && **g > 0.0 && name_lower.contains(&k)
            })
            .max_by_key(|(k, _)| k.len());
        if let Some((k, g)) = best {
            return Some((k.trim().to_lowercase(), *g));
        }
    }
    PIECE_PRIORS
        .iter()
        .find(|(needle, _, _)| name_lower.contains(needle))
        .map(|(_, label, grams)| ((*label).to_string(), *grams))
}

pub(crate) fn is_fried(name_lower: &str) -> bool {
    name_lower.contains("fried") || name_lower.contains("жарен")
}

pub(crate) fn is_oil(name_lower: &str) -> bool {
    name_lower.contains("oil") || name_lower.contains("масл")
}

fn is_breaded(name_lower: &str) -> bool {
    ["breaded", "панир", "кляр"]
        .iter()
        .any(|k| name_lower.contains(k))
}

#[derive(Debug, Clone, Copy, Default)]
struct Macros {
    kcal: f64,
    protein_g: f64,
    fat_g: f64,
    carb_g: f64,
}

impl Macros {
    fn from_raw(raw: &RawItem) -> Self {
        Self {
            kcal: non_negative(raw.kcal),
            protein_g: non_negative(raw.protein_g),
            fat_g: non_negative(raw.fat_g),
            carb_g: non_negative(raw.carb_g),
        }
    }

    fn scaled(self, k: f64) -> Self {
        Self {
            kcal: self.kcal * k,
            protein_g: self.protein_g * k,
            fat_g: self.fat_g * k,
            carb_g: self.carb_g * k,
        }
    }
}

fn non_negative(v: Option<f64>) -> f64 {
    v.filter(|x| x.is_finite() && *x > 0.0).unwrap_or(0.0)
}

/// Turns raw items into canonical ones. Never fails: every gap is filled with a documented
/// assumption and recorded on the item.
pub fn apply_heuristics(
    items: Vec<RawItem>,
    user_priors: Option<&PortionPriors>,
    cfg: &HeuristicsConfig,
) -> Vec<NormalizedItem> {
    let mut out: Vec<NormalizedItem> = items
        .into_iter()
        .map(|raw| normalize_one(raw, user_priors, cfg))
        .collect();
    let extra = cooking_corrections(&out, cfg);
    out.extend(extra);
    out
}

fn normalize_one(
    raw: RawItem,
    user_priors: Option<&PortionPriors>,
    cfg: &HeuristicsConfig,
) -> NormalizedItem {
    let name = raw.name.trim().to_string();
    let lower = name.to_lowercase();
    let mut sources = raw.sources.clone();
    let mut assumptions = raw.assumptions.clone();

    let (mut unit, factor) = match raw.unit.as_deref().map(str::trim) {
        Some(u) if !u.is_empty() => canonical_unit(u).unwrap_or_else(|| {
            assumptions.push(format!("unknown unit '{u}', assumed grams"));
            (Unit::G, 1.0)
        }),
        _ => {
            assumptions.push("unit missing, assumed grams".to_string());
            (Unit::G, 1.0)
        }
    };

    let mut amount = match raw.amount {
        Some(a) if a.is_finite() && a > 0.0 => a * factor,
        _ => {
            let fallback = if unit == Unit::Piece { 1.0 } else { cfg.default_mass_g };
            assumptions.push(format!(
                "amount missing, assumed {fallback} {}",
                unit.as_str()
            ));
            fallback
        }
    };

    let mut macros = Macros::from_raw(&raw);

    if matches!(unit, Unit::G | Unit::Ml)
        && macros.kcal > 0.0
        && macros.kcal < cfg.per100_kcal_ceiling
        && amount > cfg.per100_min_amount
    {
        macros = macros.scaled(amount / 100.0);
        sources.push(SOURCE_PER_100G.to_string());
        assumptions.push(format!(
            "macros read as per 100 {u}, scaled to {amount} {u}",
            u = unit.as_str()
        ));
    }

    if let Some((label, density)) = disk_food(&lower) {
        let diameter = raw
            .diameter_cm
            .filter(|d| d.is_finite() && *d > 0.0)
            .or_else(|| diameter_in_name(&lower));
        if let Some(d) = diameter {
            let per_whole = cfg.slices_per_whole;
            let slices = raw
                .slices
                .filter(|n| *n > 0)
                .or_else(|| slices_in_name(&lower))
                .or_else(|| {
                    let whole_count = amount.fract() == 0.0
                        && amount >= 1.0
                        && amount <= f64::from(per_whole);
                    (unit == Unit::Piece && whole_count).then_some(amount as u32)
                })
                .unwrap_or(per_whole);
            let mass = disk_mass_g(d, density, slices, per_whole);
            if unit == Unit::G && macros.kcal > 0.0 {
                macros = macros.scaled(mass / amount);
            }
            unit = Unit::G;
            amount = mass;
            sources.push(SOURCE_GEOMETRY.to_string());
            assumptions.push(format!(
                "{label} {d} cm, {slices}/{per_whole} slices ≈ {mass:.0} g"
            ));
        }
    }

    if unit == Unit::Piece {
        if let Some((label, grams)) = piece_mass(&lower, user_priors) {
            assumptions.push(format!("1 {label} ≈ {grams} g"));
            sources.push(SOURCE_PIECE_PRIOR.to_string());
            amount *= grams;
            unit = Unit::G;
        }
    }

    NormalizedItem {
        name,
        category: raw.category,
        unit,
        amount: round1(amount),
        kcal: round1(macros.kcal),
        protein_g: round1(macros.protein_g),
        fat_g: round1(macros.fat_g),
        carb_g: round1(macros.carb_g),
        confidence: raw
            .confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0)),
        sources,
        assumptions,
    }
}

/// Synthesizes extra lines for cooking methods: frying oil and breading. The original item is
/// never modified.
fn cooking_corrections(items: &[NormalizedItem], cfg: &HeuristicsConfig) -> Vec<NormalizedItem> {
    let has_oil_line = items.iter().any(|i| is_oil(&i.name.to_lowercase()));
    let mut extra = Vec::new();

    for item in items.iter().filter(|i| i.unit == Unit::G) {
        let lower = item.name.to_lowercase();
        if is_oil(&lower) {
            continue;
        }

        if !has_oil_line && is_fried(&lower) && item.amount >= cfg.fried_min_mass_g {
            let oil_g = (item.amount / cfg.oil_per_food_g).ceil() * cfg.oil_quantum_g;
            extra.push(NormalizedItem {
                name: "cooking oil".to_string(),
                category: Some("fat".to_string()),
                unit: Unit::G,
                amount: oil_g,
                kcal: round1(9.0 * oil_g),
                protein_g: 0.0,
                fat_g: oil_g,
                carb_g: 0.0,
                confidence: Some(0.5),
                sources: vec![SOURCE_OIL.to_string()],
                assumptions: vec![format!(
                    "frying oil for '{}': {} g per {} g of food",
                    item.name, cfg.oil_quantum_g, cfg.oil_per_food_g
                )],
            });
        }

        if is_breaded(&lower) && item.amount > 0.0 {
            let coating_g = round1(item.amount * cfg.breading_ratio).max(1.0);
            let protein_g = round1(coating_g * 0.13);
            let fat_g = round1(coating_g * 0.05);
            let carb_g = round1(coating_g * 0.72);
            extra.push(NormalizedItem {
                name: "breading".to_string(),
                category: Some("carbohydrate".to_string()),
                unit: Unit::G,
                amount: coating_g,
                kcal: round1(4.0 * protein_g + 9.0 * fat_g + 4.0 * carb_g),
                protein_g,
                fat_g,
                carb_g,
                confidence: Some(0.5),
                sources: vec![SOURCE_BREADING.to_string()],
                assumptions: vec![format!(
                    "breading for '{}': {:.0}% of its mass",
                    item.name,
                    cfg.breading_ratio * 100.0
                )],
            });
        }
    }
    extra
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(items: Vec<RawItem>) -> Vec<NormalizedItem> {
        apply_heuristics(items, None, &HeuristicsConfig::default())
    }

    #[test]
    fn missing_unit_defaults_to_grams() {
        let out = run(vec![RawItem {
            amount: Some(150.0),
            kcal: Some(200.0),
            ..RawItem::named("rice")
        }]);
        assert_eq!(out[0].unit, Unit::G);
        assert_eq!(out[0].amount, 150.0);
        assert!(out[0].assumptions.iter().any(|a| a.contains("assumed grams")));
    }

    #[test]
    fn non_positive_amount_gets_safe_default() {
        let out = run(vec![RawItem {
            unit: Some("g".into()),
            amount: Some(-3.0),
            ..RawItem::named("rice")
        }]);
        assert_eq!(out[0].amount, 100.0);

        let nan = run(vec![RawItem {
            unit: Some("ml".into()),
            amount: Some(f64::NAN),
            ..RawItem::named("milk")
        }]);
        assert_eq!(nan[0].unit, Unit::Ml);
        assert_eq!(nan[0].amount, 100.0);
    }

    #[test]
    fn kilograms_and_spoons_are_converted() {
        let out = run(vec![
            RawItem {
                unit: Some("kg".into()),
                amount: Some(0.25),
                kcal: Some(300.0),
                ..RawItem::named("potatoes")
            },
            RawItem {
                unit: Some("tbsp".into()),
                amount: Some(2.0),
                kcal: Some(120.0),
                ..RawItem::named("honey")
            },
        ]);
        assert_eq!((out[0].unit, out[0].amount), (Unit::G, 250.0));
        assert_eq!((out[1].unit, out[1].amount), (Unit::Ml, 30.0));
    }

    #[test]
    fn pieces_map_to_mass_with_priors() {
        let out = run(vec![RawItem {
            unit: Some("piece".into()),
            amount: Some(2.0),
            kcal: Some(140.0),
            ..RawItem::named("Boiled egg")
        }]);
        assert_eq!(out[0].unit, Unit::G);
        assert_eq!(out[0].amount, 110.0);
        assert!(out[0].has_source(SOURCE_PIECE_PRIOR));
    }

    #[test]
    fn user_priors_override_builtin_table() {
        let mut priors = PortionPriors::new();
        priors.insert("egg".into(), 62.0);
        let out = apply_heuristics(
            vec![RawItem {
                unit: Some("pcs".into()),
                amount: Some(1.0),
                ..RawItem::named("egg")
            }],
            Some(&priors),
            &HeuristicsConfig::default(),
        );
        assert_eq!(out[0].amount, 62.0);
    }

    #[test]
    fn unknown_piece_food_stays_in_pieces() {
        let out = run(vec![RawItem {
            unit: Some("piece".into()),
            amount: Some(3.0),
            ..RawItem::named("dumpling")
        }]);
        assert_eq!((out[0].unit, out[0].amount), (Unit::Piece, 3.0));
    }

    #[test]
    fn small_kcal_on_large_portion_is_read_per_100g() {
        let out = run(vec![RawItem {
            unit: Some("g".into()),
            amount: Some(250.0),
            kcal: Some(30.0),
            protein_g: Some(2.0),
            fat_g: Some(0.4),
            carb_g: Some(5.0),
            ..RawItem::named("salad")
        }]);
        assert_eq!(out[0].kcal, 75.0);
        assert_eq!(out[0].protein_g, 5.0);
        assert_eq!(out[0].carb_g, 12.5);
        assert!(out[0].has_source(SOURCE_PER_100G));
    }

    #[test]
    fn small_portions_are_not_rescaled() {
        let out = run(vec![RawItem {
            unit: Some("g".into()),
            amount: Some(80.0),
            kcal: Some(30.0),
            ..RawItem::named("cucumber")
        }]);
        assert_eq!(out[0].kcal, 30.0);
        assert!(!out[0].has_source(SOURCE_PER_100G));
    }

    #[test]
    fn pizza_slices_from_diameter() {
        let out = run(vec![RawItem {
            diameter_cm: Some(30.0),
            slices: Some(2),
            ..RawItem::named("pizza margherita")
        }]);
        assert_eq!(out[0].unit, Unit::G);
        assert!((out[0].amount - 167.9).abs() <= 1.0, "got {}", out[0].amount);
        assert!(out[0].has_source(SOURCE_GEOMETRY));
    }

    #[test]
    fn pizza_size_parsed_from_name() {
        let out = run(vec![RawItem {
            unit: Some("g".into()),
            amount: Some(100.0),
            kcal: Some(250.0),
            ..RawItem::named("pizza 30 cm 2 slices")
        }]);
        assert!((out[0].amount - 167.9).abs() <= 1.0);
        // energy density is kept when the original portion was in grams
        assert!((out[0].kcal - 419.8).abs() <= 2.0, "got {}", out[0].kcal);
    }

    #[test]
    fn whole_disk_when_slice_count_unknown() {
        let whole = disk_mass_g(30.0, 0.95, 8, 8);
        assert!((whole - 671.5).abs() < 1.0);
    }

    #[test]
    fn fried_food_gets_oil_line() {
        let out = run(vec![RawItem {
            unit: Some("g".into()),
            amount: Some(200.0),
            kcal: Some(480.0),
            ..RawItem::named("fried chicken")
        }]);
        assert_eq!(out.len(), 2);
        let oil = &out[1];
        assert_eq!(oil.amount, 10.0);
        assert_eq!(oil.fat_g, 10.0);
        assert!(oil.has_source(SOURCE_OIL));
        assert_eq!(out[0].amount, 200.0, "original item untouched");
    }

    #[test]
    fn no_oil_line_when_one_is_present_or_portion_tiny() {
        let with_oil = run(vec![
            RawItem {
                unit: Some("g".into()),
                amount: Some(200.0),
                ..RawItem::named("fried eggs")
            },
            RawItem {
                unit: Some("g".into()),
                amount: Some(5.0),
                ..RawItem::named("olive oil")
            },
        ]);
        assert_eq!(with_oil.len(), 2);

        let tiny = run(vec![RawItem {
            unit: Some("g".into()),
            amount: Some(20.0),
            ..RawItem::named("fried onion")
        }]);
        assert_eq!(tiny.len(), 1);
    }

    #[test]
    fn breaded_food_gets_coating_line() {
        let out = run(vec![RawItem {
            unit: Some("g".into()),
            amount: Some(150.0),
            ..RawItem::named("breaded cutlet")
        }]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].name, "breading");
        assert_eq!(out[1].amount, 12.0);
        assert!(out[1].has_source(SOURCE_BREADING));
    }

    #[test]
    fn negative_macros_and_bad_confidence_are_clamped() {
        let out = run(vec![RawItem {
            unit: Some("g".into()),
            amount: Some(100.0),
            kcal: Some(-5.0),
            fat_g: Some(f64::INFINITY),
            confidence: Some(1.7),
            ..RawItem::named("mystery")
        }]);
        assert_eq!(out[0].kcal, 0.0);
        assert_eq!(out[0].fat_g, 0.0);
        assert_eq!(out[0].confidence, Some(1.0));
    }
}
