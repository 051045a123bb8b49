use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::nutrition::{QualityBlock, RawItem};

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("inference provider unavailable: {0}")]
    Unavailable(String),
    #[error("inference provider returned non-conforming output: {0}")]
    ParseFailure(String),
}

/// Items plus the provider's own quality verdict. This is what gets cached per content hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderPayload {
    pub items: Vec<RawItem>,
    #[serde(default)]
    pub quality: QualityBlock,
}

/// Stage-1 answer for free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub is_food: bool,
    #[serde(default)]
    pub not_food_probability: f64,
    #[serde(default)]
    pub unrealistic_probability: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
}

// Wire shape: quality may arrive nested or flattened at the top level.
#[derive(Deserialize)]
struct WirePayload {
    items: Vec<RawItem>,
    #[serde(default)]
    quality: Option<QualityBlock>,
    #[serde(default)]
    needs_clarification: bool,
    #[serde(default)]
    clarifications: Vec<String>,
    #[serde(default)]
    not_food_probability: Option<f64>,
    #[serde(default)]
    unrealistic_scene_probability: Option<f64>,
}

fn clamp_probability(p: f64) -> f64 {
    if p.is_finite() {
        p.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn check_number(name: &str, field: &str, v: Option<f64>) -> Result<(), ProviderError> {
    match v {
        Some(x) if !x.is_finite() || x < 0.0 => Err(ProviderError::ParseFailure(format!(
            "item '{name}' has invalid {field}: {x}"
        ))),
        _ => Ok(()),
    }
}

impl ProviderPayload {
    /// Parses and validates a raw provider reply. Anything that does not fit the item/quality
    /// schema becomes `ParseFailure` here, so nothing loosely typed travels further in.
    pub fn parse(raw: &str) -> Result<Self, ProviderError> {
        let wire: WirePayload =
            serde_json::from_str(raw).map_err(|e| ProviderError::ParseFailure(e.to_string()))?;

        for item in &wire.items {
            if item.name.trim().is_empty() {
                return Err(ProviderError::ParseFailure("item without a name".into()));
            }
            check_number(&item.name, "amount", item.amount)?;
            check_number(&item.name, "kcal", item.kcal)?;
            check_number(&item.name, "protein_g", item.protein_g)?;
            check_number(&item.name, "fat_g", item.fat_g)?;
            check_number(&item.name, "carb_g", item.carb_g)?;
        }

        let mut quality = wire.quality.unwrap_or_default();
        quality = quality.merge(QualityBlock {
            not_food_probability: wire.not_food_probability.unwrap_or(0.0),
            unrealistic_scene_probability: wire.unrealistic_scene_probability.unwrap_or(0.0),
            needs_clarification: wire.needs_clarification,
            clarifications: wire.clarifications,
            issues: Vec::new(),
        });
        quality.not_food_probability = clamp_probability(quality.not_food_probability);
        quality.unrealistic_scene_probability =
            clamp_probability(quality.unrealistic_scene_probability);

        Ok(Self {
            items: wire.items,
            quality,
        })
    }
}

impl Classification {
    pub fn parse(raw: &str) -> Result<Self, ProviderError> {
        let mut c: Classification =
            serde_json::from_str(raw).map_err(|e| ProviderError::ParseFailure(e.to_string()))?;
        c.not_food_probability = clamp_probability(c.not_food_probability);
        c.unrealistic_probability = clamp_probability(c.unrealistic_probability);
        c.confidence = c.confidence.map(clamp_probability);
        Ok(c)
    }
}

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn infer_image(
        &self,
        image: &[u8],
        content_type: &str,
    ) -> Result<ProviderPayload, ProviderError>;

    async fn classify_text(&self, text: &str, locale: &str)
        -> Result<Classification, ProviderError>;

    async fn normalize_text(
        &self,
        text: &str,
        locale: &str,
        classification: &Classification,
    ) -> Result<ProviderPayload, ProviderError>;
}

/// Stand-in used when no provider is configured: every call is `Unavailable`, so text input
/// falls back to the local parser and photo tasks fail.
pub struct DisabledProvider;

#[async_trait]
impl InferenceProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    fn model(&self) -> &str {
        "none"
    }

    async fn infer_image(&self, _: &[u8], _: &str) -> Result<ProviderPayload, ProviderError> {
        Err(ProviderError::Unavailable("no provider configured".into()))
    }

    async fn classify_text(&self, _: &str, _: &str) -> Result<Classification, ProviderError> {
        Err(ProviderError::Unavailable("no provider configured".into()))
    }

    async fn normalize_text(
        &self,
        _: &str,
        _: &str,
        _: &Classification,
    ) -> Result<ProviderPayload, ProviderError> {
        Err(ProviderError::Unavailable("no provider configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_quality() {
        let p = ProviderPayload::parse(
            r#"{"items":[{"name":"rice","unit":"g","amount":150,"kcal":195}],
                "quality":{"not_food_probability":0.05,"needs_clarification":false}}"#,
        )
        .unwrap();
        assert_eq!(p.items.len(), 1);
        assert_eq!(p.items[0].amount, Some(150.0));
        assert!((p.quality.not_food_probability - 0.05).abs() < 1e-9);
    }

    #[test]
    fn folds_top_level_clarifications() {
        let p = ProviderPayload::parse(
            r#"{"items":[],"needs_clarification":true,"clarifications":["what is it?"]}"#,
        )
        .unwrap();
        assert!(p.quality.needs_clarification);
        assert_eq!(p.quality.clarifications, vec!["what is it?"]);
    }

    #[test]
    fn rejects_missing_items_and_bad_types() {
        assert!(matches!(
            ProviderPayload::parse(r#"{"quality":{}}"#),
            Err(ProviderError::ParseFailure(_))
        ));
        assert!(matches!(
            ProviderPayload::parse(r#"{"items":[{"name":"rice","amount":"lots"}]}"#),
            Err(ProviderError::ParseFailure(_))
        ));
        assert!(matches!(
            ProviderPayload::parse("not json"),
            Err(ProviderError::ParseFailure(_))
        ));
    }

    #[test]
    fn rejects_negative_macros_and_blank_names() {
        assert!(ProviderPayload::parse(r#"{"items":[{"name":"rice","kcal":-1}]}"#).is_err());
        assert!(ProviderPayload::parse(r#"{"items":[{"name":"  "}]}"#).is_err());
    }

    #[test]
    fn classification_probabilities_are_clamped() {
        let c = Classification::parse(r#"{"is_food":false,"not_food_probability":1.4}"#).unwrap();
        assert!(!c.is_food);
        assert_eq!(c.not_food_probability, 1.0);
    }
}
