//! OpenAI-compatible chat completions client for image and text recognition.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::provider::{Classification, InferenceProvider, ProviderError, ProviderPayload};
use crate::config::ProviderConfig;

const VISION_PROMPT: &str = "Identify every dish or food on the photo. Reply with a JSON object \
{\"items\":[{\"name\",\"category\",\"amount\",\"unit\":\"g|ml|piece\",\"kcal\",\"protein_g\",\"fat_g\",\"carb_g\",\
\"confidence\",\"diameter_cm\",\"slices\"}],\"quality\":{\"not_food_probability\",\"unrealistic_scene_probability\",\
\"needs_clarification\",\"clarifications\":[]}}. Use totals for the visible portion, not per 100 g. \
If the portion is uncertain set needs_clarification=true and add short questions.";

const CLASSIFY_PROMPT: &str = "Decide whether the user's message describes food or drink they ate. \
Reply with a JSON object {\"is_food\":bool,\"not_food_probability\":0..1,\"unrealistic_probability\":0..1,\
\"confidence\":0..1}. Do not list items.";

const NORMALIZE_PROMPT_EN: &str = "You turn a meal description into structured items. Reply with a JSON \
object {\"items\":[{\"name\",\"amount\",\"unit\":\"g|ml|piece\",\"kcal\",\"protein_g\",\"fat_g\",\"carb_g\",\
\"confidence\",\"assumptions\":[]}],\"needs_clarification\":bool,\"clarifications\":[]}. \
Units must be g, ml or piece. Never invent a quantity the user did not give: ask instead.";

const NORMALIZE_PROMPT_RU: &str = "Преобразуй описание приёма пищи в структурированный список. Ответь \
JSON-объектом {\"items\":[{\"name\",\"amount\",\"unit\":\"g|ml|piece\",\"kcal\",\"protein_g\",\"fat_g\",\
\"carb_g\",\"confidence\",\"assumptions\":[]}],\"needs_clarification\":bool,\"clarifications\":[]}. \
Единицы только g, ml или piece. Не придумывай количество, если его нет: задай вопрос.";

// (user, assistant) pairs prepended to every normalize request.
const FEW_SHOTS_EN: &[(&str, &str)] = &[(
    "2 eggs and a coffee with milk 250 ml",
    r#"{"items":[{"name":"egg","amount":2,"unit":"piece","kcal":155,"protein_g":13,"fat_g":11,"carb_g":1.1,"confidence":0.8},{"name":"coffee with milk","amount":250,"unit":"ml","kcal":60,"protein_g":3,"fat_g":3,"carb_g":5,"confidence":0.7}],"needs_clarification":false,"clarifications":[]}"#,
)];

const FEW_SHOTS_RU: &[(&str, &str)] = &[(
    "гречка 200 г, курица",
    r#"{"items":[{"name":"гречка","amount":200,"unit":"g","kcal":220,"protein_g":8,"fat_g":2,"carb_g":42,"confidence":0.8}],"needs_clarification":true,"clarifications":["Сколько граммов курицы?"]}"#,
)];

fn is_ru(locale: &str) -> bool {
    locale.to_lowercase().starts_with("ru")
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    temperature: f64,
    response_format: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    vision_model: String,
    text_model: String,
}

impl OpenAiProvider {
    pub fn new(cfg: &ProviderConfig, api_key: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build provider http client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            vision_model: cfg.vision_model.clone(),
            text_model: cfg.text_model.clone(),
        })
    }

    async fn chat(&self, model: &str, messages: Vec<Value>) -> Result<String, ProviderError> {
        let req = ChatRequest {
            model,
            messages,
            temperature: 0.2,
            response_format: json!({"type": "json_object"}),
        };

        let start = std::time::Instant::now();
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!("provider returned {status}: {body}")));
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::ParseFailure(format!("response envelope: {e}")))?;
        debug!(model, elapsed_ms = start.elapsed().as_millis() as u64, "provider call done");

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::ParseFailure("empty completion".into()))
    }
}

#[async_trait]
impl InferenceProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.vision_model
    }

    async fn infer_image(
        &self,
        image: &[u8],
        content_type: &str,
    ) -> Result<ProviderPayload, ProviderError> {
        let data_url = format!("data:{content_type};base64,{}", Base64::encode_string(image));
        let messages = vec![json!({
            "role": "user",
            "content": [
                {"type": "text", "text": VISION_PROMPT},
                {"type": "image_url", "image_url": {"url": data_url}},
            ],
        })];
        let raw = self.chat(&self.vision_model, messages).await?;
        ProviderPayload::parse(&raw)
    }

    async fn classify_text(
        &self,
        text: &str,
        _locale: &str,
    ) -> Result<Classification, ProviderError> {
        let messages = vec![
            json!({"role": "system", "content": CLASSIFY_PROMPT}),
            json!({"role": "user", "content": text}),
        ];
        let raw = self.chat(&self.text_model, messages).await?;
        Classification::parse(&raw)
    }

    async fn normalize_text(
        &self,
        text: &str,
        locale: &str,
        classification: &Classification,
    ) -> Result<ProviderPayload, ProviderError> {
        let (system, shots) = if is_ru(locale) {
            (NORMALIZE_PROMPT_RU, FEW_SHOTS_RU)
        } else {
            (NORMALIZE_PROMPT_EN, FEW_SHOTS_EN)
        };

        let mut messages = vec![json!({"role": "system", "content": system})];
        for (user, assistant) in shots {
            messages.push(json!({"role": "user", "content": user}));
            messages.push(json!({"role": "assistant", "content": assistant}));
        }
        let hint = serde_json::to_string(classification).unwrap_or_default();
        messages.push(json!({
            "role": "user",
            "content": format!("{text}\n\nclassification: {hint}"),
        }));

        let raw = self.chat(&self.text_model, messages).await?;
        ProviderPayload::parse(&raw)
    }
}
