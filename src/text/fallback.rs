//! Local parser used when the provider cannot answer.
//!
//! Only segments with an explicit amount become items. A mention without a quantity is never
//! given a default mass; it turns into a clarification instead.

use lazy_static::lazy_static;
use regex::Regex;

use crate::nutrition::heuristics::piece_mass;
use crate::nutrition::types::round1;
use crate::nutrition::units::canonical_unit;
use crate::nutrition::{RawItem, Unit};

pub const SOURCE_FALLBACK: &str = "fallback:text";

lazy_static! {
    static ref CONJUNCTION_RE: Regex =
        Regex::new(r"(?i)\s+(?:and|и|\+)\s+").expect("conjunction regex");
    static ref TRAILING_AMOUNT_RE: Regex = Regex::new(
        r"^(?P<name>.*?\S)\s*?(?P<amount>\d+(?:[.,]\d+)?)\s*(?P<unit>\p{L}[\p{L}.]*)?$"
    )
    .expect("trailing amount regex");
    static ref LEADING_AMOUNT_RE: Regex =
        Regex::new(r"^(?P<amount>\d+(?:[.,]\d+)?)\s*(?P<rest>\p{L}.*)$").expect("leading amount regex");
}

const FRUITS: &[&str] = &[
    "apple", "banana", "orange", "pear", "grape", "peach", "plum", "kiwi", "mango", "pineapple",
    "strawberr", "watermelon", "melon", "apricot", "cherr", "яблок", "банан", "апельсин", "груш",
    "виноград", "персик", "слив", "киви", "манго", "ананас", "клубник", "арбуз", "дын", "абрикос",
    "вишн", "черешн",
];

/// Items recognised in the text plus questions for everything that was not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackParse {
    pub items: Vec<RawItem>,
    pub clarifications: Vec<String>,
}

#[derive(Debug, PartialEq)]
struct Mention {
    name: String,
    amount: Option<f64>,
    unit: Option<String>,
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|a| a.is_finite() && *a > 0.0)
}

fn clean_name(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(|c: char| c == '-' || c == ':' || c == '—' || c.is_whitespace())
        .to_string()
}

fn mention(segment: &str) -> Mention {
    let leading = LEADING_AMOUNT_RE
        .captures(segment)
        .filter(|c| !c["rest"].chars().any(|ch| ch.is_ascii_digit()));
    if let Some(c) = leading {
        let rest = c["rest"].trim();
        let (first, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let (unit, name) = match canonical_unit(first) {
            Some(_) if !tail.trim().is_empty() => (Some(first.to_string()), tail),
            _ => (Some("piece".to_string()), rest),
        };
        return Mention {
            name: clean_name(name),
            amount: parse_amount(&c["amount"]),
            unit,
        };
    }
    if let Some(c) = TRAILING_AMOUNT_RE.captures(segment) {
        return Mention {
            name: clean_name(&c["name"]),
            amount: parse_amount(&c["amount"]),
            unit: c.name("unit").map(|m| m.as_str().to_string()),
        };
    }
    Mention {
        name: clean_name(segment),
        amount: None,
        unit: None,
    }
}

fn is_fruit(name_lower: &str) -> bool {
    FRUITS.iter().any(|f| name_lower.contains(f))
}

/// Rough macros for `mass` grams of a named food.
fn estimate(name_lower: &str, mass: f64, item: &mut RawItem) {
    if is_fruit(name_lower) {
        let k = mass / 100.0;
        item.kcal = Some(round1(52.0 * k));
        item.protein_g = Some(round1(0.5 * k));
        item.fat_g = Some(round1(0.2 * k));
        item.carb_g = Some(round1(13.0 * k));
        item.confidence = Some(0.7);
        item.assumptions
            .push("fruit: ~52 kcal per 100 g".to_string());
    } else {
        let (p, f, c) = (0.15 * mass, 0.10 * mass, 0.20 * mass);
        item.kcal = Some(round1(4.0 * p + 9.0 * f + 4.0 * c));
        item.protein_g = Some(round1(p));
        item.fat_g = Some(round1(f));
        item.carb_g = Some(round1(c));
        item.confidence = Some(0.5);
        item.assumptions
            .push("generic estimate: 15% protein, 10% fat, 20% carbs by mass".to_string());
    }
}

#[derive(Clone, Copy)]
enum Lang {
    En,
    Ru,
}

impl Lang {
    fn from_locale(locale: &str) -> Self {
        if locale.to_lowercase().starts_with("ru") {
            Lang::Ru
        } else {
            Lang::En
        }
    }

    fn how_much(self, name: &str) -> String {
        match self {
            Lang::En => format!("How much {name} was it? Please give grams, ml or pieces."),
            Lang::Ru => format!("Сколько было «{name}»? Укажите граммы, мл или штуки."),
        }
    }

    fn grams_for(self, name: &str) -> String {
        match self {
            Lang::En => format!("How many grams of {name}?"),
            Lang::Ru => format!("Сколько граммов «{name}»?"),
        }
    }

    fn unknown_unit(self, name: &str, unit: &str) -> String {
        match self {
            Lang::En => format!("What does '{unit}' of {name} weigh in grams?"),
            Lang::Ru => format!("Сколько граммов в «{unit}» для «{name}»?"),
        }
    }
}

/// Splits on `;`, newlines, commas that are not decimal separators, and conjunctions.
fn segments(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        let decimal_comma = c == ','
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(char::is_ascii_digit);
        if matches!(c, ';' | '\n') || (c == ',' && !decimal_comma) {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);

    parts
        .iter()
        .flat_map(|p| CONJUNCTION_RE.split(p).map(str::to_string).collect::<Vec<_>>())
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Parses free text into raw items. Never fails; unparseable pieces become clarifications.
pub fn parse(text: &str, locale: &str) -> FallbackParse {
    let lang = Lang::from_locale(locale);
    let mut out = FallbackParse::default();

    for segment in segments(text) {
        let m = mention(&segment);
        if m.name.is_empty() {
            continue;
        }
        let lower = m.name.to_lowercase();

        let Some(amount) = m.amount else {
            out.clarifications.push(lang.how_much(&m.name));
            continue;
        };

        let (unit, factor) = match m.unit.as_deref() {
            None => (Unit::G, 1.0),
            Some(word) => match canonical_unit(word) {
                Some(u) => u,
                None => {
                    out.clarifications.push(lang.unknown_unit(&m.name, word));
                    continue;
                }
            },
        };

        let mut item = RawItem::named(m.name.clone());
        item.sources.push(SOURCE_FALLBACK.to_string());
        if m.unit.is_none() {
            item.assumptions
                .push("number without unit read as grams".to_string());
        }

        let mass = match unit {
            Unit::Piece => match piece_mass(&lower, None) {
                Some((label, grams)) => {
                    item.assumptions.push(format!("1 {label} ≈ {grams} g"));
                    amount * grams
                }
                None => {
                    out.clarifications.push(lang.grams_for(&m.name));
                    continue;
                }
            },
            _ => amount * factor,
        };

        item.unit = Some(if unit == Unit::Ml { "ml" } else { "g" }.to_string());
        item.amount = Some(round1(mass));
        estimate(&lower, mass, &mut item);
        out.items.push(item);
    }

    out
}
