use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::fallback;
use crate::error::PipelineError;
use crate::inference::cache::{text_key, JsonCache};
use crate::inference::provider::{InferenceProvider, ProviderError};
use crate::nutrition::qc::ASK_SCALE_REFERENCE;
use crate::nutrition::types::push_unique;
use crate::nutrition::{
    apply_heuristics, validate, HeuristicsConfig, NormalizedItem, QcConfig, QualityBlock, RawItem,
};
use crate::state::AppState;

pub const ASK_DESCRIBE_FOOD: &str = "Please describe a food item, for example: 'rice 150 g'.";
pub const ASK_WEIGHTS: &str = "Add weights in grams for a more precise estimate.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    Provider,
    Fallback,
    NotFood,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeOutcome {
    pub items: Vec<NormalizedItem>,
    pub needs_clarification: bool,
    pub clarifications: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    pub source: OutcomeSource,
}

impl NormalizeOutcome {
    fn not_food() -> Self {
        Self {
            items: Vec::new(),
            needs_clarification: true,
            clarifications: vec![ASK_DESCRIBE_FOOD.to_string()],
            issues: Vec::new(),
            source: OutcomeSource::NotFood,
        }
    }
}

/// Free text to structured items: classify, then normalize, with a local parser behind both.
#[derive(Clone)]
pub struct TextNormalizer {
    provider: Arc<dyn InferenceProvider>,
    cache: JsonCache,
    cache_ttl: Duration,
    not_food_bar: f64,
    heuristics: HeuristicsConfig,
    qc: QcConfig,
}

impl TextNormalizer {
    pub fn from_state(st: &AppState) -> Self {
        Self {
            provider: st.provider.clone(),
            cache: JsonCache::new(st.kv.clone()),
            cache_ttl: st.config.pipeline.text_cache_ttl(),
            not_food_bar: st.config.pipeline.not_food_accept_bar,
            heuristics: HeuristicsConfig::default(),
            qc: QcConfig::default(),
        }
    }

    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn normalize(
        &self,
        text: &str,
        locale: &str,
    ) -> Result<NormalizeOutcome, PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::InvalidInput("text is empty".into()));
        }
        let locale = match locale.trim().to_lowercase() {
            l if l.is_empty() => "en".to_string(),
            l => l,
        };

        let key = text_key(&locale, text);
        if let Some(hit) = self.cache.get::<NormalizeOutcome>(&key).await {
            debug!(%key, "normalize cache hit");
            return Ok(hit);
        }

        match self.via_provider(text, &locale).await {
            Ok(outcome) => {
                self.cache.put(&key, &outcome, self.cache_ttl).await;
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "provider path failed, using local parser");
                Ok(self.via_fallback(text, &locale))
            }
        }
    }

    async fn via_provider(
        &self,
        text: &str,
        locale: &str,
    ) -> Result<NormalizeOutcome, ProviderError> {
        let class = self.provider.classify_text(text, locale).await?;
        if class.not_food_probability > self.not_food_bar {
            info!(p = class.not_food_probability, "text rejected as not food");
            return Ok(NormalizeOutcome::not_food());
        }

        let payload = self.provider.normalize_text(text, locale, &class).await?;
        Ok(self.finish(payload.items, payload.quality, OutcomeSource::Provider))
    }

    fn via_fallback(&self, text: &str, locale: &str) -> NormalizeOutcome {
        let parsed = fallback::parse(text, locale);
        let quality = QualityBlock {
            needs_clarification: !parsed.clarifications.is_empty(),
            clarifications: parsed.clarifications,
            ..QualityBlock::default()
        };
        self.finish(parsed.items, quality, OutcomeSource::Fallback)
    }

    /// Heuristics and QC shared by both paths, so they emit the same shape.
    fn finish(
        &self,
        raw: Vec<RawItem>,
        upstream: QualityBlock,
        source: OutcomeSource,
    ) -> NormalizeOutcome {
        let items = apply_heuristics(raw, None, &self.heuristics);

        let mut clarifications = upstream.clarifications;
        let mut issues = upstream.issues;
        if items.is_empty() {
            if clarifications.is_empty() {
                clarifications.push(ASK_DESCRIBE_FOOD.to_string());
            }
        } else {
            let qc = validate(&items, &self.qc);
            // Photo wording does not fit typed input.
            let asks = qc.clarifications.into_iter().map(|c| {
                if c == ASK_SCALE_REFERENCE {
                    ASK_WEIGHTS.to_string()
                } else {
                    c
                }
            });
            push_unique(&mut clarifications, asks);
            push_unique(&mut issues, qc.issues);
        }

        NormalizeOutcome {
            needs_clarification: upstream.needs_clarification || !clarifications.is_empty(),
            items,
            clarifications,
            issues,
            source,
        }
    }
}
