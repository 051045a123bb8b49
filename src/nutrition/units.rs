use super::types::Unit;

/// Maps a free-form unit word to a canonical unit and the factor that converts an amount
/// expressed in that word into the canonical unit.
///
/// Returns `None` for words that are not recognised; callers decide whether that means
/// "assume grams" or "ask the user".
pub fn canonical_unit(raw: &str) -> Option<(Unit, f64)> {
    let word = raw.trim().to_lowercase();
    let word = word.trim_end_matches('.');
    let unit = match word {
        "g" | "gr" | "gram" | "grams" | "gramm" | "г" | "гр" | "грамм" | "грамма" | "граммов" => {
            (Unit::G, 1.0)
        }
        "kg" | "kilo" | "kilogram" | "kilograms" | "кг" | "килограмм" => (Unit::G, 1000.0),
        "mg" | "мг" => (Unit::G, 0.001),
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" | "мл"
        | "миллилитр" | "миллилитров" => (Unit::Ml, 1.0),
        "l" | "liter" | "liters" | "litre" | "litres" | "л" | "литр" | "литра" | "литров" => {
            (Unit::Ml, 1000.0)
        }
        "tsp" | "teaspoon" | "teaspoons" | "ч.л" | "ч. л" | "чл" => (Unit::Ml, 5.0),
        "tbsp" | "tablespoon" | "tablespoons" | "ст.л" | "ст. л" | "стл" => (Unit::Ml, 15.0),
        "cup" | "cups" | "glass" | "стакан" | "стакана" => (Unit::Ml, 250.0),
        "piece" | "pieces" | "pc" | "pcs" | "slice" | "slices" | "plate" | "plates" | "portion"
        | "portions" | "serving" | "servings" | "шт" | "штук" | "штуки" | "кусок" | "куска"
        | "тарелка" | "тарелки" | "порция" | "порции" => (Unit::Piece, 1.0),
        _ => return None,
    };
    Some(unit)
}
